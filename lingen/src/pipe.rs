use std::time::Instant;

use arith::Field;
use grid::{Comm, Grid};
use tracing::info;

use crate::{CoeffRead, CoeffWrite, Error, MatPoly, Result};

/// Copies a whole stream from `input` to `output` with a window sized for
/// both ends, compressing runs of all-zero coefficients: a zero window is
/// queued as a count and only materialized when nonzero data (or the end of
/// the stream) follows. Trailing zero runs are dropped when
/// `skip_trailing_zeros` is set. Short writes abort the pipeline.
pub fn pipe<F, C, I, O>(
    comm_grid: &Grid<C>,
    input: &mut I,
    output: &mut O,
    action: Option<&str>,
    skip_trailing_zeros: bool,
) -> Result<()>
where
    F: Field,
    C: Comm,
    I: CoeffRead<F> + ?Sized,
    O: CoeffWrite<F> + ?Sized,
{
    let mut window: usize = input.preferred_window().max(output.preferred_window());
    if window == usize::MAX {
        window = 4096;
    }
    let field: F = input.field().clone();
    let mut fbuf: MatPoly<F> = MatPoly::new(field.clone(), input.nrows(), input.ncols(), 0);
    let mut zbuf: MatPoly<F> = MatPoly::new(field, input.nrows(), input.ncols(), 0);
    if comm_grid.is_root() {
        fbuf.zero_pad(window);
        zbuf.zero_pad(window);
    }

    let t0: Instant = Instant::now();
    let mut next_report_t: f64 = 0.0;
    let mut next_report_k: usize = 0;
    let expected: usize = input.guessed_length();
    let mut zq: usize = 0;
    let mut done: usize = 0;
    loop {
        if comm_grid.is_root() {
            fbuf.set_size(0);
            fbuf.zero_pad(window);
        }
        let n: usize = input.read(&mut fbuf, 0, window)?;
        let is_last: bool = n < window;
        if n == 0 {
            break;
        }
        let mut n1: u64 = 0;
        if comm_grid.is_root() {
            fbuf.set_size(n);
            n1 = if skip_trailing_zeros {
                fbuf.get_true_nonzero_size() as u64
            } else {
                n as u64
            };
        }
        let n1: usize = comm_grid.world().bcast_u64(0, n1) as usize;
        if n1 == 0 {
            zq += n;
            if is_last {
                break;
            }
            continue;
        }
        // flush the queued zero run before the payload
        while zq > 0 {
            let nz: usize = zq.min(window);
            if comm_grid.is_root() {
                zbuf.set_size(0);
                zbuf.zero_pad(nz);
            }
            let nn: usize = output.write(&zbuf, 0, nz)?;
            if nn < nz {
                return Err(Error::ShortWrite);
            }
            zq -= nz;
            done += nz;
        }
        let nn: usize = output.write(&fbuf, 0, n1)?;
        if nn < n1 {
            return Err(Error::ShortWrite);
        }
        zq = n - n1;
        done += n1;
        if let Some(action) = action {
            if comm_grid.is_root() && (done >= next_report_k || is_last) {
                let tt: f64 = t0.elapsed().as_secs_f64();
                if tt > next_report_t || is_last {
                    let percent: f64 = if expected == usize::MAX {
                        0.0
                    } else {
                        100.0 * done as f64 / expected as f64
                    };
                    info!(
                        "{} {} coefficients ({:.1}%) in {:.1} s ({:.1} MB/s)",
                        action,
                        done,
                        percent,
                        tt,
                        done as f64 * input.average_matsize() / tt / 1.0e6
                    );
                    next_report_t = tt + 10.0;
                    next_report_k = done + expected / 100;
                }
            }
        }
        if is_last {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use arith::Fp64;
    use grid::Grid;
    use sampling::source::Source;

    use super::pipe;
    use crate::{Gather, MatPoly, Scatter};

    const P: u64 = 0xffffffff00000001;

    fn field() -> Fp64 {
        Fp64::new(P).unwrap()
    }

    #[test]
    fn faithful_copy_for_every_window_size() {
        let g = Grid::solo();
        let mut src: MatPoly<Fp64> = MatPoly::new(field(), 2, 2, 30);
        src.zero_pad(30);
        let mut source: Source = Source::new([61u8; 32]);
        src.fill_random(0, 30, &mut source);

        for window in [1usize, 3, 7, 30, 64] {
            let mut collected: MatPoly<Fp64> = MatPoly::new(field(), 2, 2, 0);
            {
                let mut input = Gather::new(&g, &src).with_window(window);
                let mut output = Scatter::new(&g, &mut collected).with_window(window);
                pipe(&g, &mut input, &mut output, None, false).unwrap();
            }
            assert_eq!(collected.size(), 30);
            for i in 0..2 {
                for j in 0..2 {
                    assert_eq!(collected.part(i, j), src.part(i, j), "window {}", window);
                }
            }
        }
    }

    #[test]
    fn leading_zero_run_survives_compression() {
        let g = Grid::solo();
        let zrun: usize = 11;
        let mut src: MatPoly<Fp64> = MatPoly::new(field(), 1, 2, 20);
        src.zero_pad(20);
        let mut source: Source = Source::new([62u8; 32]);
        src.fill_random(zrun, 20, &mut source);
        *src.coeff_mut(0, 0, zrun) = 1;
        *src.coeff_mut(0, 1, 19) = 1;

        for window in [2usize, 5, 32] {
            let mut collected: MatPoly<Fp64> = MatPoly::new(field(), 1, 2, 0);
            {
                let mut input = Gather::new(&g, &src).with_window(window);
                let mut output = Scatter::new(&g, &mut collected).with_window(window);
                pipe(&g, &mut input, &mut output, None, true).unwrap();
            }
            // exactly the zero run, then the payload, whatever the window
            assert_eq!(collected.size(), 20, "window {}", window);
            for j in 0..2 {
                for k in 0..20 {
                    assert_eq!(collected.coeff(0, j, k), src.coeff(0, j, k), "window {}", window);
                }
            }
        }
    }

    #[test]
    fn trailing_zero_run_is_dropped_when_asked() {
        let g = Grid::solo();
        let mut src: MatPoly<Fp64> = MatPoly::new(field(), 1, 1, 24);
        src.zero_pad(24);
        let mut source: Source = Source::new([63u8; 32]);
        src.fill_random(0, 10, &mut source);
        // coefficients [10, 24) stay zero

        let mut collected: MatPoly<Fp64> = MatPoly::new(field(), 1, 1, 0);
        {
            let mut input = Gather::new(&g, &src).with_window(4);
            let mut output = Scatter::new(&g, &mut collected).with_window(4);
            pipe(&g, &mut input, &mut output, None, true).unwrap();
        }
        assert_eq!(collected.size(), src.get_true_nonzero_size());
        for k in 0..collected.size() {
            assert_eq!(collected.coeff(0, 0, k), src.coeff(0, 0, k));
        }
    }
}
