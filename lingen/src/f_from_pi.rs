use arith::Field;
use grid::{Comm, Grid};
use tracing::info;

use crate::{CoeffRead, CoeffWrite, Error, F0, MatPoly, Result, StreamInfo, iceildiv};

/// Which generator column feeds an output column, and the degree shift its
/// reversed data is read at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolDesc {
    pub j: usize,
    pub shift: usize,
}

/// Rebuilds the solution stream F from the (reversed) generator stream.
///
/// Several generator columns can contribute to one output column, so the
/// window copies accumulate instead of overwriting. The degree-0
/// contribution of the rhs-designated rows is extracted separately and
/// decides the final ordering of the solution columns.
pub struct FFromPi<'g, F: Field, C: Comm, P: CoeffRead<F>> {
    f0: F0,
    pi: P,
    grid: &'g Grid<C>,
    sols: Vec<SolDesc>,
    cache: MatPoly<F>,
    cache_k0: usize,
    cache_k1: usize,
    tail: MatPoly<F>,
    rhs: MatPoly<F>,
}

impl<'g, F: Field, C: Comm, P: CoeffRead<F>> FFromPi<'g, F, C, P> {
    /// `delta` bounds the degree of each generator column, `lucky` marks
    /// the columns the outer driver considers usable; both come from the
    /// generator computation. Needs exactly `n` usable columns.
    pub fn new(
        grid: &'g Grid<C>,
        mut pi: P,
        f0: F0,
        delta: &[usize],
        lucky: &[i64],
    ) -> Result<FFromPi<'g, F, C, P>> {
        let (m, n, nrhs, t0) = (f0.m, f0.n, f0.nrhs, f0.t0);
        assert_eq!(pi.nrows(), m + n);
        assert_eq!(pi.ncols(), m + n);
        let field: F = pi.field().clone();

        let g_len: usize = pi.guessed_length();
        let mut sols: Vec<SolDesc> = Vec::new();
        let mut lookback_needed: usize = 0;
        for j in 0..m + n {
            if lucky[j] <= 0 {
                continue;
            }
            assert!(delta[j] >= t0);
            assert!(delta[j] < g_len);
            let shift: usize = g_len - 1 - delta[j];
            sols.push(SolDesc { j, shift });
            if shift + 1 >= lookback_needed {
                lookback_needed = shift + 1;
            }
        }
        lookback_needed += t0;

        if sols.len() != n {
            return Err(Error::TooFewSolutions {
                found: sols.len(),
                needed: n,
            });
        }

        let lookback_needed: usize = F::SIMD * iceildiv(lookback_needed, F::SIMD);
        let mut cache: MatPoly<F> = MatPoly::new(field.clone(), m + n, m + n, 0);
        if grid.is_root() {
            cache.zero_pad(lookback_needed);
        }
        pi.read(&mut cache, 0, lookback_needed)?;

        let mut this: FFromPi<'g, F, C, P> = FFromPi {
            tail: MatPoly::new(field.clone(), n, n, 0),
            rhs: MatPoly::new(field, nrhs, n, 1),
            f0,
            pi,
            grid,
            sols,
            cache,
            cache_k0: 0,
            cache_k1: lookback_needed,
        };

        if grid.is_root() {
            this.rhs = this.recompute_rhs();
            this.reorder_solutions();
        }
        let mut flat: Vec<u64> = this
            .sols
            .iter()
            .flat_map(|s| [s.j as u64, s.shift as u64])
            .collect();
        grid.world().bcast_u64s(0, &mut flat);
        for (s, chunk) in this.sols.iter_mut().zip(flat.chunks_exact(2)) {
            *s = SolDesc {
                j: chunk[0] as usize,
                shift: chunk[1] as usize,
            };
        }
        // same extraction again, now against the final column order
        if grid.is_root() {
            this.rhs = this.recompute_rhs();
        }
        Ok(this)
    }

    pub fn sols(&self) -> &[SolDesc] {
        &self.sols
    }

    pub fn rhs(&self) -> &MatPoly<F> {
        &self.rhs
    }

    /// For generator row `ipi` contributing to output column `jf`: the
    /// output row it lands in and the shift its reversed data is read at.
    /// Degree alignment comes from the bootstrap descriptor, never
    /// re-derived here.
    pub fn get_shift_ij(&self, ipi: usize, jf: usize) -> (usize, usize) {
        let shift: usize = self.sols[jf].shift;
        let (ka, ia) = self.f0.column_data_from_a_prime(ipi);
        let kf: usize = self.f0.t0 - ka;
        (ia, shift + kf + (ia < self.f0.nrhs) as usize)
    }

    /// The right-hand-side block: degree-0 contributions, which are the
    /// leading coefficients of the matching generator columns.
    fn recompute_rhs(&self) -> MatPoly<F> {
        let (m, n, nrhs) = (self.f0.m, self.f0.n, self.f0.nrhs);
        let field: F = self.cache.field().clone();
        let mut rhs: MatPoly<F> = MatPoly::new(field.clone(), nrhs, n, 1);
        rhs.zero_pad(1);
        for jf in 0..n {
            let jpi: usize = self.sols[jf].j;
            for ipi in 0..m + n {
                let (ia, s) = self.get_shift_ij(ipi, jf);
                if ia >= nrhs {
                    continue;
                }
                let s: usize = s - 1;
                let v = self.cache.coeff(ipi, jpi, s);
                let cur = rhs.coeff(ia, jf, 0);
                *rhs.coeff_mut(ia, jf, 0) = field.add(cur, v);
            }
        }
        rhs
    }

    /// Promotes the solution columns touching the most rhs rows. Only the
    /// descriptors move; the payload never does.
    fn reorder_solutions(&mut self) {
        let (n, nrhs) = (self.f0.n, self.f0.nrhs);
        let field: F = self.cache.field().clone();
        let mut sol_score: Vec<(usize, usize)> = Vec::new();
        for jf in 0..n {
            let zeros: usize = (0..nrhs)
                .filter(|&ia| field.is_zero(self.rhs.coeff(ia, jf, 0)))
                .count();
            sol_score.push((zeros, jf));
        }
        sol_score.sort();
        if nrhs > 0 && !sol_score.is_empty() && self.grid.is_root() {
            info!("reordered solutions:");
            for &(zeros, jf) in &sol_score {
                info!(
                    " {} (col {} in the generator, weight {} on rhs vectors)",
                    jf,
                    self.sols[jf].j,
                    nrhs - zeros
                );
            }
        }
        let sols2: Vec<SolDesc> = sol_score.iter().map(|&(_, jf)| self.sols[jf]).collect();
        self.sols = sols2;
    }

    pub fn write_rhs<O: CoeffWrite<F>>(&mut self, srhs: &mut O) -> Result<()> {
        if self.f0.nrhs > 0 {
            let nn: usize = srhs.write(&self.rhs, 0, 1)?;
            if nn < 1 {
                return Err(Error::ShortWrite);
            }
        }
        Ok(())
    }
}

impl<'g, F: Field, C: Comm, P: CoeffRead<F>> StreamInfo<F> for FFromPi<'g, F, C, P> {
    fn field(&self) -> &F {
        self.cache.field()
    }

    fn nrows(&self) -> usize {
        self.f0.n
    }

    fn ncols(&self) -> usize {
        self.f0.n
    }

    fn guessed_length(&self) -> usize {
        self.pi.guessed_length()
    }
}

impl<'g, F: Field, C: Comm, P: CoeffRead<F>> CoeffRead<F> for FFromPi<'g, F, C, P> {
    fn read(&mut self, dst: &mut MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        assert_eq!(k0 % F::SIMD, 0);
        assert_eq!(k1 % F::SIMD, 0);
        let (m, n, nrhs, t0) = (self.f0.m, self.f0.n, self.f0.nrhs, self.f0.t0);
        let field: F = self.cache.field().clone();

        let mut produced: usize = 0;

        if self.cache_k1 != self.cache_k0 {
            let f0_lookback: usize = t0 + (nrhs < n) as usize;
            let lookback: usize = self.cache_k1 - self.cache_k0;
            assert!(lookback + 1 >= f0_lookback);

            let mut nk: u64 = 0;
            if self.grid.is_root() {
                nk = (k1.min(dst.size()) - k0) as u64;
                assert_eq!(nk as usize % F::SIMD, 0);
                assert_eq!(self.cache.size(), lookback);
                self.cache.zero_pad(lookback + nk as usize);
            }
            let nk: usize = self.grid.world().bcast_u64(0, nk) as usize;
            assert_eq!(nk % F::SIMD, 0);

            let mut nread: usize = self.pi.read(&mut self.cache, lookback, lookback + nk)?;
            if self.grid.is_root() {
                self.cache.set_size(lookback + nread);
            }
            self.cache_k1 += nread;

            // a misaligned count can only happen on the final short read,
            // and the cache is torn down on that path anyway
            nread -= nread % F::SIMD;

            if self.grid.is_root() && nread > 0 {
                for jf in 0..n {
                    let jpi: usize = self.sols[jf].j;
                    for ipi in 0..m + n {
                        let (ia, s) = self.get_shift_ij(ipi, jf);
                        // the reversed generator column contributes to
                        // entry (ia, jf), shifted right by s
                        field.vec_add(
                            &mut dst.part_head_mut(ia, jf, k0)[..nread],
                            &self.cache.part_head(ipi, jpi, s)[..nread],
                        );
                    }
                }
            }

            produced = nread;

            if nread + k0 < k1 {
                // the generator stream is over: drain the cache
                let cache_avail: usize = self.cache_k1 - self.cache_k0;
                let mut max_tail: usize = 0;
                for jf in 0..n {
                    for ipi in 0..m + n {
                        let (_, s) = self.get_shift_ij(ipi, jf);
                        if nread + s < cache_avail {
                            let pr: usize = cache_avail - (nread + s);
                            if pr >= max_tail {
                                max_tail = pr;
                            }
                        }
                    }
                }

                if self.grid.is_root() {
                    self.tail.zero_pad(max_tail);
                    let mut k: usize = nread;
                    while k < nread + max_tail {
                        for jf in 0..n {
                            let jpi: usize = self.sols[jf].j;
                            for ipi in 0..m + n {
                                let (ia, s) = self.get_shift_ij(ipi, jf);
                                if k + s >= cache_avail {
                                    continue;
                                }
                                let v = self.cache.coeff(ipi, jpi, k + s);
                                let cur = self.tail.coeff(ia, jf, k - nread);
                                *self.tail.coeff_mut(ia, jf, k - nread) = field.add(cur, v);
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
    use arith::{Field, Fp64};
    use grid::Grid;
    use sampling::source::Source;

    use super::FFromPi;
    use crate::{CoeffRead, F0, GatherReverse, MatPoly};

    const P: u64 = 0xffffffff00000001;

    fn setup(
        seed: u8,
        g_len: usize,
    ) -> (Fp64, F0, MatPoly<Fp64>, Vec<usize>, Vec<i64>) {
        let field: Fp64 = Fp64::new(P).unwrap();
        let (m, n, nrhs) = (2usize, 2usize, 1usize);
        let mut f0: F0 = F0::new(m, n, nrhs);
        f0.t0 = 2;
        f0.fdesc = vec![[0, 0], [1, 1]];

        let mut pi: MatPoly<Fp64> = MatPoly::new(field, m + n, m + n, g_len);
        pi.zero_pad(g_len);
        let mut source: Source = Source::new([seed; 32]);
        pi.fill_random(0, g_len, &mut source);

        // two usable columns with slightly uneven degree bounds
        let delta: Vec<usize> = vec![g_len - 1, g_len - 2, g_len - 1, g_len - 1];
        let lucky: Vec<i64> = vec![1, 1, 0, -1];
        (field, f0, pi, delta, lucky)
    }

    #[test]
    fn rhs_is_the_degree_zero_contribution() {
        let g = Grid::solo();
        let (field, f0, pi, delta, lucky) = setup(51, 12);
        let g_len: usize = pi.size();
        let wrapper =
            FFromPi::new(&g, GatherReverse::new(&g, &pi), f0.clone(), &delta, &lucky).unwrap();

        for jf in 0..f0.n {
            let jpi: usize = wrapper.sols()[jf].j;
            let mut want: u64 = 0;
            for ipi in 0..f0.m + f0.n {
                let (ia, s) = wrapper.get_shift_ij(ipi, jf);
                if ia >= f0.nrhs {
                    continue;
                }
                // reversed generator coefficient s-1 is pi[g_len - s]
                want = field.add(want, pi.coeff(ipi, jpi, g_len - s));
            }
            assert_eq!(wrapper.rhs().coeff(0, jf, 0), want);
        }
    }

    #[test]
    fn reordering_permutes_descriptors_only() {
        let g = Grid::solo();
        let (_, f0, pi, delta, lucky) = setup(52, 12);
        let wrapper =
            FFromPi::new(&g, GatherReverse::new(&g, &pi), f0, &delta, &lucky).unwrap();
        let mut js: Vec<usize> = wrapper.sols().iter().map(|s| s.j).collect();
        js.sort();
        assert_eq!(js, vec![0, 1]);
    }

    #[test]
    fn write_rhs_emits_one_coefficient() {
        let g = Grid::solo();
        let (field, f0, pi, delta, lucky) = setup(54, 12);
        let mut wrapper =
            FFromPi::new(&g, GatherReverse::new(&g, &pi), f0, &delta, &lucky).unwrap();

        let mut sink: MatPoly<Fp64> = MatPoly::new(field, 1, 2, 0);
        {
            let mut out = crate::Scatter::new(&g, &mut sink);
            wrapper.write_rhs(&mut out).unwrap();
        }
        assert_eq!(sink.size(), 1);
        for jf in 0..2 {
            assert_eq!(sink.coeff(0, jf, 0), wrapper.rhs().coeff(0, jf, 0));
        }
    }

    #[test]
    fn chunked_reads_accumulate_the_same_stream() {
        let g = Grid::solo();
        let g_len: usize = 12;

        let read_all = |chunk: usize| -> (Vec<u64>, usize) {
            let (_, f0, pi, delta, lucky) = setup(53, g_len);
            let field: Fp64 = Fp64::new(P).unwrap();
            let mut wrapper =
                FFromPi::new(&g, GatherReverse::new(&g, &pi), f0, &delta, &lucky).unwrap();
            let cap: usize = g_len + 8;
            let mut f: MatPoly<Fp64> = MatPoly::new(field, 2, 2, cap);
            f.zero_pad(cap);
            let mut total: usize = 0;
            loop {
                let want: usize = chunk.min(cap - total);
                let got: usize = wrapper.read(&mut f, total, total + want).unwrap();
                total += got;
                if got < want {
                    break;
                }
            }
            let mut flat: Vec<u64> = Vec::new();
            for i in 0..2 {
                for j in 0..2 {
                    flat.extend_from_slice(&f.part(i, j)[..total]);
                }
            }
            (flat, total)
        };

        let (big, len_big) = read_all(64);
        let (small, len_small) = read_all(3);
        assert!(len_big > 0);
        assert_eq!(len_big, len_small);
        assert_eq!(big, small);
    }
}
