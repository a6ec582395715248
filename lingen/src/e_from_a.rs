use arith::Field;
use grid::{Comm, Grid};
use tracing::info;

use crate::{
    BootstrapState, CoeffRead, Error, F0, MatPoly, Result, StreamInfo, iceildiv,
    normalize_column, reduce_column_mod_previous,
};

/// Translates the raw input stream A into the internal sequence E, after
/// finding where usable linear-independence information begins.
///
/// The wrapper owns a lookahead cache of raw coefficients whose window
/// bounds `[cache_k0, cache_k1)` are identical at every worker even though
/// the payload is root-only. Once the raw stream runs dry the remainder is
/// drained through `tail`, so `read` keeps producing until genuinely empty.
pub struct EFromA<'g, F: Field, C: Comm, A: CoeffRead<F>> {
    f0: F0,
    a: A,
    grid: &'g Grid<C>,
    cache: MatPoly<F>,
    cache_k0: usize,
    cache_k1: usize,
    tail: MatPoly<F>,
    state: BootstrapState,
}

impl<'g, F: Field, C: Comm, A: CoeffRead<F>> EFromA<'g, F, C, A> {
    pub fn new(grid: &'g Grid<C>, field: F, nrhs: usize, a: A) -> EFromA<'g, F, C, A> {
        let m: usize = a.nrows();
        let n: usize = a.ncols();
        EFromA {
            f0: F0::new(m, n, nrhs),
            cache: MatPoly::new(field.clone(), m, n, 0),
            tail: MatPoly::new(field, m, m + n, 0),
            a,
            grid,
            cache_k0: 0,
            cache_k1: 0,
            state: BootstrapState::Accumulating,
        }
    }

    pub fn f0(&self) -> &F0 {
        &self.f0
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    fn share(&mut self, root: usize) {
        self.f0.share(self.grid, root);
        self.cache_k0 = self.grid.world().bcast_u64(root, self.cache_k0 as u64) as usize;
        self.cache_k1 = self.grid.world().bcast_u64(root, self.cache_k1 as u64) as usize;
        if self.grid.is_root() {
            self.cache.zero_pad(self.cache_k1 - self.cache_k0);
        }
    }

    /// Tops the lookahead cache up to raw degree `k` (rounded to the
    /// packing width). A short read here means the input cannot contain a
    /// full-rank prefix at all.
    fn refresh_cache_upto(&mut self, k: usize, found: usize) -> Result<()> {
        let next_k1: usize = F::SIMD * iceildiv(k, F::SIMD);
        assert!(next_k1 >= self.cache_k1);
        if next_k1 != self.cache_k1 {
            if self.grid.is_root() {
                self.cache.zero_pad(next_k1);
            }
            let nk: usize = self.a.read(&mut self.cache, self.cache_k1, next_k1)?;
            if nk < k.saturating_sub(self.cache_k1) {
                return Err(Error::InsufficientData {
                    needed: self.f0.m,
                    found,
                    consumed: self.cache_k1 + nk,
                });
            }
            self.cache_k1 = next_k1;
        }
        Ok(())
    }

    /// The rank-revealing prefix search. Collective: the per-column
    /// independence decision is taken at the root and broadcast, so every
    /// worker keeps identical bookkeeping without replicating the
    /// arithmetic. Deterministic for a fixed raw stream.
    pub fn initial_read(&mut self) -> Result<()> {
        let (m, n, nrhs) = (self.f0.m, self.f0.n, self.f0.nrhs);
        let field: F = self.cache.field().clone();
        self.share(0);

        if self.grid.is_root() {
            info!("computing the shift of the initial full-rank block");
        }

        let mut m_mat: MatPoly<F> = MatPoly::new(field.clone(), m, m, 1);
        m_mat.zero_pad(1);
        let mut pivots: Vec<usize> = Vec::new();

        let mut t0: usize = 1;
        loop {
            // coefficient degree of the raw stream this round inspects
            let k: usize = t0 - (nrhs == n) as usize;

            // +1 to reach degree k itself, +1 more for the leading
            // identity block of the internal sequence
            self.refresh_cache_upto(k + 2, pivots.len())?;

            let mut j: usize = 0;
            while pivots.len() < m && j < n {
                let mut inc: u64 = 0;
                if self.grid.is_root() {
                    m_mat.extract_column(pivots.len(), 0, &self.cache, j, t0 - (j < nrhs) as usize);
                    inc = reduce_column_mod_previous(&field, &mut m_mat, &mut pivots) as u64;
                }
                let inc: bool = self.grid.world().bcast_u64(0, inc) != 0;
                if inc && !self.grid.is_root() {
                    // only the count matters away from the root
                    pivots.push(0);
                }

                if !inc {
                    self.state = BootstrapState::Accumulating;
                    if self.grid.is_root() {
                        info!(
                            "[X^{}] raw column {} does not increase rank (still {})",
                            t0 - (j < nrhs) as usize,
                            j,
                            pivots.len()
                        );
                    }
                    if (t0 - 1) * n > m + 40 {
                        self.state = BootstrapState::Failed;
                        return Err(Error::InsufficientData {
                            needed: m,
                            found: pivots.len(),
                            consumed: self.cache_k1,
                        });
                    }
                    j += 1;
                    continue;
                }

                self.state = BootstrapState::CandidateFound;
                self.f0.fdesc.push([t0 - 1, j]);
                if self.grid.is_root() {
                    normalize_column(&field, &mut m_mat, &pivots)?;
                }
                j += 1;
            }
            if pivots.len() == m {
                break;
            }
            t0 += 1;
        }

        self.f0.t0 = t0;
        self.state = BootstrapState::Converged;
        if self.grid.is_root() {
            info!("found satisfactory initial data for shift {}", t0);
        }
        self.share(0);
        Ok(())
    }
}

impl<'g, F: Field, C: Comm, A: CoeffRead<F>> StreamInfo<F> for EFromA<'g, F, C, A> {
    fn field(&self) -> &F {
        self.cache.field()
    }

    fn nrows(&self) -> usize {
        self.f0.m
    }

    fn ncols(&self) -> usize {
        self.f0.m + self.f0.n
    }

    fn guessed_length(&self) -> usize {
        let g: usize = self.a.guessed_length();
        if g == usize::MAX { g } else { g.saturating_sub(self.f0.t0) }
    }
}

impl<'g, F: Field, C: Comm, A: CoeffRead<F>> CoeffRead<F> for EFromA<'g, F, C, A> {
    fn read(&mut self, dst: &mut MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        assert_eq!(k0 % F::SIMD, 0);
        assert_eq!(k1 % F::SIMD, 0);
        assert!(self.state == BootstrapState::Converged, "bootstrap has not run");
        let (m, n, nrhs, t0) = (self.f0.m, self.f0.n, self.f0.nrhs, self.f0.t0);

        let mut produced: usize = 0;

        if self.cache_k1 != self.cache_k0 {
            let f0_lookback: usize = t0 + (nrhs < n) as usize;
            let lookback: usize = self.cache_k1 - self.cache_k0;
            assert!(lookback >= f0_lookback);

            let mut nk: u64 = 0;
            if self.grid.is_root() {
                nk = (k1.min(dst.size()) - k0) as u64;
                assert_eq!(self.cache.size(), lookback);
                self.cache.zero_pad(lookback + nk as usize);
            }
            let nk: usize = self.grid.world().bcast_u64(0, nk) as usize;
            assert_eq!(nk % F::SIMD, 0);

            let mut nread: usize = self.a.read(&mut self.cache, lookback, lookback + nk)?;
            if self.grid.is_root() {
                self.cache.set_size(lookback + nread);
            }
            self.cache_k1 += nread;

            // a misaligned count can only happen on the final short read,
            // and the cache is torn down on that path anyway
            nread -= nread % F::SIMD;

            if self.grid.is_root() && nread > 0 {
                for j in 0..m + n {
                    let (ka, ja) = self.f0.column_data_from_a(j);
                    // column j of the output is the raw column ja advanced
                    // by ka degrees
                    for i in 0..m {
                        dst.part_head_mut(i, j, k0)[..nread]
                            .copy_from_slice(&self.cache.part_head(i, ja, ka)[..nread]);
                    }
                }
            }

            produced = nread;

            if nread + k0 < k1 {
                // the raw stream is over: stow what the cache still holds
                let cache_avail: usize = self.cache_k1 - self.cache_k0;
                let cache_access: usize = nread + f0_lookback;
                if self.grid.is_root() {
                    self.tail
                        .zero_pad(cache_avail - cache_avail.min(cache_access));
                    let mut k: usize = nread;
                    while k + f0_lookback < cache_avail {
                        for j in 0..m + n {
                            let (ka, ja) = self.f0.column_data_from_a(j);
                            if k + ka >= cache_avail {
                                continue;
                            }
                            for i in 0..m {
                                let v = self.cache.coeff(i, ja, ka + k);
                                *self.tail.coeff_mut(i, j, k - nread) = v;
                            }
                        }
                        k += F::SIMD;
                    }
                }
                self.cache.clear();
                self.cache_k1 = self.cache_k0;
            } else {
                if self.grid.is_root() {
                    self.cache.rshift(nread);
                }
                self.cache_k0 += nread;
            }
        }

        let mut total: u64 = produced as u64;
        if self.grid.is_root() {
            // never produce past the requested window; what is left of the
            // tail goes out on the next call
            let room: usize = k1.saturating_sub(k0 + produced);
            let take: usize = self.tail.size().min(room);
            for j in 0..self.tail.ncols() {
                for i in 0..self.tail.nrows() {
                    dst.part_head_mut(i, j, k0 + produced)[..take]
                        .copy_from_slice(&self.tail.part_head(i, j, 0)[..take]);
                }
            }
            self.tail.rshift(take);
            total += take as u64;
        }
        Ok(self.grid.world().bcast_u64(0, total) as usize)
    }
}

#[cfg(test)]
mod tests {
    use arith::Fp64;
    use grid::Grid;
    use sampling::source::Source;

    use super::EFromA;
    use crate::{BootstrapState, CoeffRead, Gather, MatPoly};

    const P: u64 = 0xffffffff00000001;

    fn random_a(field: Fp64, m: usize, n: usize, len: usize, seed: u8) -> MatPoly<Fp64> {
        let mut a: MatPoly<Fp64> = MatPoly::new(field, m, n, len);
        a.zero_pad(len);
        let mut source: Source = Source::new([seed; 32]);
        a.fill_random(0, len, &mut source);
        a
    }

    #[test]
    fn bootstrap_is_deterministic() {
        let field: Fp64 = Fp64::new(P).unwrap();
        let g = Grid::solo();
        let a_data: MatPoly<Fp64> = random_a(field, 3, 2, 24, 17);

        let run = |a_data: &MatPoly<Fp64>| {
            let mut wrapper = EFromA::new(&g, field, 1, Gather::new(&g, a_data));
            wrapper.initial_read().unwrap();
            (wrapper.f0().t0, wrapper.f0().fdesc.clone(), wrapper.state())
        };
        let (t0_a, fdesc_a, state_a) = run(&a_data);
        let (t0_b, fdesc_b, _) = run(&a_data);
        assert_eq!(state_a, BootstrapState::Converged);
        assert_eq!(t0_a, t0_b);
        assert_eq!(fdesc_a, fdesc_b);
        assert_eq!(fdesc_a.len(), 3);
    }

    #[test]
    fn random_data_converges_with_minimal_shift() {
        // with random data the very first coefficients already have full
        // rank, for either boundary of the rhs column count
        let field: Fp64 = Fp64::new(P).unwrap();
        let g = Grid::solo();
        for nrhs in [2usize, 4] {
            let a_data: MatPoly<Fp64> = random_a(field, 4, 4, 24, 29);
            let mut wrapper = EFromA::new(&g, field, nrhs, Gather::new(&g, &a_data));
            wrapper.initial_read().unwrap();
            assert_eq!(wrapper.f0().t0, 1, "nrhs = {}", nrhs);
            assert_eq!(wrapper.f0().fdesc.len(), 4);
        }
    }

    #[test]
    fn stream_matches_the_shifted_raw_columns() {
        let field: Fp64 = Fp64::new(P).unwrap();
        let g = Grid::solo();
        let (m, n, nrhs, len) = (2usize, 2usize, 1usize, 16usize);
        let a_data: MatPoly<Fp64> = random_a(field, m, n, len, 41);

        let mut wrapper = EFromA::new(&g, field, nrhs, Gather::new(&g, &a_data));
        wrapper.initial_read().unwrap();
        let f0 = wrapper.f0().clone();

        // pull the whole translated stream in awkward chunk sizes
        let mut e: MatPoly<Fp64> = MatPoly::new(field, m, m + n, len + 8);
        e.zero_pad(len + 8);
        let mut total: usize = 0;
        loop {
            let want: usize = 3.min(len + 8 - total);
            let got: usize = wrapper.read(&mut e, total, total + want).unwrap();
            total += got;
            if got < want {
                break;
            }
        }

        // the stream stops where the longest lookback can no longer be
        // satisfied, uniformly for all columns
        assert_eq!(total, len - f0.t0 - (nrhs < n) as usize);

        for j in 0..m + n {
            let (ka, ja) = f0.column_data_from_a(j);
            for i in 0..m {
                for k in 0..total {
                    let want: u64 = if k + ka < len { a_data.coeff(i, ja, k + ka) } else { 0 };
                    assert_eq!(e.coeff(i, j, k), want, "entry ({}, {}) degree {}", i, j, k);
                }
            }
        }
    }
}
