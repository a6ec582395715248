use arith::Field;
use grid::{Comm, Grid};

use crate::{Error, MatPoly, Result};

/// Progress of the rank-revealing prefix search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Still collecting candidate columns.
    Accumulating,
    /// The last inspected column increased the rank.
    CandidateFound,
    /// A full-rank set of columns has been fixed.
    Converged,
    /// The column budget ran out before full rank was reached.
    Failed,
}

/// Where the usable linear-independence information begins in the raw
/// stream: the shift `t0` and, per required independent column, the
/// (degree, column) pair it was found at. Fixed once by the bootstrap,
/// immutable afterwards, and consumed by both stream transforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct F0 {
    pub m: usize,
    pub n: usize,
    pub nrhs: usize,
    pub t0: usize,
    pub fdesc: Vec<[usize; 2]>,
}

impl F0 {
    pub fn new(m: usize, n: usize, nrhs: usize) -> F0 {
        assert!(nrhs <= n);
        F0 {
            m,
            n,
            nrhs,
            t0: 0,
            fdesc: Vec::new(),
        }
    }

    /// For column `je` of the internal sequence, the (degree, column) of
    /// the shifted raw stream it reads from. The first n columns are the
    /// identity block at degree `t0`; the rest follow the recorded
    /// selection.
    pub fn column_data_from_a_prime(&self, je: usize) -> (usize, usize) {
        if je < self.n {
            (self.t0, je)
        } else {
            let [ka, ja] = self.fdesc[je - self.n];
            (ka, ja)
        }
    }

    /// Same, against the raw stream itself: right-hand-side columns are
    /// not degree-shifted, the others read one degree further.
    pub fn column_data_from_a(&self, je: usize) -> (usize, usize) {
        let (ka, ja) = self.column_data_from_a_prime(je);
        (ka + (ja >= self.nrhs) as usize, ja)
    }

    /// Re-synchronizes every field from `root`; the selection list travels
    /// as a flat run of pairs.
    pub fn share<C: Comm>(&mut self, comm_grid: &Grid<C>, root: usize) {
        let comm: &C = comm_grid.world();
        let mut meta: [u64; 5] = [
            self.nrhs as u64,
            self.m as u64,
            self.n as u64,
            self.t0 as u64,
            self.fdesc.len() as u64,
        ];
        comm.bcast_u64s(root, &mut meta);
        self.nrhs = meta[0] as usize;
        self.m = meta[1] as usize;
        self.n = meta[2] as usize;
        self.t0 = meta[3] as usize;
        let fsize: usize = meta[4] as usize;
        if comm.rank() != root {
            self.fdesc.resize(fsize, [0, 0]);
        }
        if fsize > 0 {
            let mut flat: Vec<u64> = self
                .fdesc
                .iter()
                .flat_map(|&[a, b]| [a as u64, b as u64])
                .collect();
            comm.bcast_u64s(root, &mut flat);
            for (pair, chunk) in self.fdesc.iter_mut().zip(flat.chunks_exact(2)) {
                *pair = [chunk[0] as usize, chunk[1] as usize];
            }
        }
    }
}

/// Gaussian elimination of column `r = pivots.len()` of the square scratch
/// matrix against the previously confirmed pivot columns, degree-0
/// coefficients only. Pivot column `v` is normalized to carry -1 at row
/// `pivots[v]`. Returns true (and records the new pivot row) when the
/// reduced column is nonzero.
pub(crate) fn reduce_column_mod_previous<F: Field>(
    field: &F,
    m_mat: &mut MatPoly<F>,
    pivots: &mut Vec<usize>,
) -> bool {
    let m: usize = m_mat.nrows();
    let r: usize = pivots.len();
    for v in 0..r {
        let u: usize = pivots[v];
        let factor = m_mat.coeff(u, r, 0);
        if field.is_zero(factor) {
            continue;
        }
        for i in 0..m {
            if i == u {
                continue;
            }
            let t = field.mul(m_mat.coeff(i, v, 0), factor);
            let cur = m_mat.coeff(i, r, 0);
            *m_mat.coeff_mut(i, r, 0) = field.add(cur, t);
        }
        *m_mat.coeff_mut(u, r, 0) = field.zero();
    }
    for u in 0..m {
        if !field.is_zero(m_mat.coeff(u, r, 0)) {
            pivots.push(u);
            return true;
        }
    }
    false
}

/// Scales the freshly confirmed column so its pivot becomes -1. A
/// non-invertible pivot surfaces the non-unit rather than panicking.
pub(crate) fn normalize_column<F: Field>(
    field: &F,
    m_mat: &mut MatPoly<F>,
    pivots: &[usize],
) -> Result<()> {
    let r: usize = pivots.len() - 1;
    let u: usize = *pivots.last().unwrap();
    let pivot = m_mat.coeff(u, r, 0);
    let inv = match field.inv(pivot) {
        Some(x) => x,
        None => {
            return Err(Error::FactorOfModulus {
                factor: format!("{:?}", pivot),
            });
        }
    };
    let scale = field.neg(inv);
    for i in 0..m_mat.nrows() {
        let cur = m_mat.coeff(i, r, 0);
        *m_mat.coeff_mut(i, r, 0) = field.mul(cur, scale);
    }
    Ok(())
}
