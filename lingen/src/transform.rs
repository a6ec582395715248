use arith::{Convolve, Field};
use grid::{Comm, Grid};
use itertools::iproduct;
use tracing::warn;

use crate::{Error, GridMatPoly, MatPoly, Result, TreeStats};

/// Expected allocation-size triple and byte budget for one multiply.
///
/// When the actual transform sizes exceed the expected ones the call
/// corrects the triple in place and runs with the budget lifted, so the
/// caller's next attempt at this spot starts from accurate numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulHint {
    pub alloc_sizes: [usize; 3],
    pub ram: usize,
}

impl MulHint {
    pub fn new(alloc_sizes: [usize; 3], ram: usize) -> MulHint {
        MulHint { alloc_sizes, ram }
    }
}

/// Byte-accounted allocation guard for one multiply attempt. Process-local,
/// but the decisions taken against it derive from broadcast-identical
/// inputs, so every worker follows the same code path.
struct MemoryPool {
    limit: usize,
    used: usize,
}

impl MemoryPool {
    fn new(limit: usize) -> MemoryPool {
        MemoryPool { limit, used: 0 }
    }

    fn take(&mut self, bytes: usize) -> Result<()> {
        if self.used.saturating_add(bytes) > self.limit {
            return Err(Error::BudgetExceeded {
                needed: self.used.saturating_add(bytes),
                available: self.limit,
            });
        }
        self.used += bytes;
        Ok(())
    }
}

/// Transform-domain image of a matrix of polynomials: one transform buffer
/// of `tlen` elements per entry.
pub struct MatTransform<F: Convolve> {
    nrows: usize,
    ncols: usize,
    tlen: usize,
    data: Vec<F::Elt>,
}

impl<F: Convolve> MatTransform<F> {
    fn alloc(
        field: &F,
        tlen: usize,
        nrows: usize,
        ncols: usize,
        pool: &mut MemoryPool,
    ) -> Result<MatTransform<F>> {
        pool.take(nrows * ncols * tlen * size_of::<F::Elt>())?;
        Ok(MatTransform {
            nrows,
            ncols,
            tlen,
            data: vec![field.zero(); nrows * ncols * tlen],
        })
    }

    fn entry(&self, i: usize, j: usize) -> &[F::Elt] {
        let idx: usize = (i * self.ncols + j) * self.tlen;
        &self.data[idx..idx + self.tlen]
    }

    fn entry_mut(&mut self, i: usize, j: usize) -> &mut [F::Elt] {
        let idx: usize = (i * self.ncols + j) * self.tlen;
        &mut self.data[idx..idx + self.tlen]
    }

    fn dft_entry(&mut self, field: &F, plan: &F::Plan, i: usize, j: usize, src: &[F::Elt]) {
        field.dft(plan, self.entry_mut(i, j), src);
    }

    fn dft_from(&mut self, field: &F, plan: &F::Plan, a: &MatPoly<F>) {
        for (i, j) in iproduct!(0..self.nrows, 0..self.ncols) {
            self.dft_entry(field, plan, i, j, a.part(i, j));
        }
    }

    fn idft_to(&self, field: &F, plan: &F::Plan, dst: &mut MatPoly<F>, k0: usize, len: usize) {
        for (i, j) in iproduct!(0..self.nrows, 0..self.ncols) {
            field.idft(plan, &mut dst.part_head_mut(i, j, 0)[..len], self.entry(i, j), k0);
        }
    }

    fn pack(&self, field: &F) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::with_capacity(self.data.len() * field.elt_bytes());
        field.pack(&self.data, &mut out);
        out
    }

    fn unpack_from(&mut self, field: &F, bytes: &[u8]) {
        field
            .unpack(bytes, &mut self.data)
            .expect("transform exchange buffer sized by construction");
    }

    /// Places a peer's packed cell at column offset `l0`.
    fn place_block(&mut self, field: &F, bytes: &[u8], l0: usize, rows: usize, cols: usize) {
        let nb: usize = self.tlen * field.elt_bytes();
        for (i, lc) in iproduct!(0..rows, 0..cols) {
            let off: usize = (i * cols + lc) * nb;
            field
                .unpack(&bytes[off..off + nb], self.entry_mut(i, l0 + lc))
                .expect("transform exchange buffer sized by construction");
        }
    }
}

fn mul_window(la: usize, lb: usize) -> (usize, usize) {
    if la == 0 || lb == 0 { (0, 0) } else { (0, la + lb - 1) }
}

fn mp_window(la: usize, lb: usize) -> (usize, usize) {
    assert!(la >= 1 && lb >= la, "middle product needs 1 <= |a| <= |b|");
    (la - 1, lb - la + 1)
}

fn run_with_budget<F: Convolve>(
    op: &'static str,
    field: &F,
    plan: &F::Plan,
    hint: Option<&mut MulHint>,
    mut attempt: impl FnMut(usize) -> Result<u64>,
) -> Result<u64> {
    let sizes: [usize; 3] = field.alloc_sizes(plan);
    let mut ram: usize = usize::MAX;
    if let Some(h) = hint {
        if sizes.iter().zip(h.alloc_sizes.iter()).any(|(s, e)| s > e) {
            warn!(
                op,
                expected = ?h.alloc_sizes,
                actual = ?sizes,
                "transform sizes exceed the expected allocation, adjusting memory"
            );
            h.alloc_sizes = sizes;
        } else {
            ram = h.ram;
        }
    }
    match attempt(ram) {
        Ok(t) => Ok(t),
        Err(Error::BudgetExceeded { needed, available }) => {
            warn!(op, needed, available, "memory pool exhausted, retrying with the budget lifted");
            attempt(usize::MAX)
        }
        Err(e) => Err(e),
    }
}

fn convolve_local<F: Convolve>(
    field: &F,
    c: &mut MatPoly<F>,
    a: &MatPoly<F>,
    b: &MatPoly<F>,
    plan: &F::Plan,
    out_k0: usize,
    out_len: usize,
    ram: usize,
) -> Result<u64> {
    let (m, kdim, n) = (a.nrows(), a.ncols(), b.ncols());
    c.reset(out_len);
    if out_len == 0 {
        return Ok(0);
    }
    let tlen: usize = field.transform_len(plan);
    let elt: usize = size_of::<F::Elt>();
    let mut pool: MemoryPool = MemoryPool::new(ram);

    let cache_all: bool = (m * kdim + kdim * n + m * n) * tlen * elt <= ram;
    let mut acc: MatTransform<F> = MatTransform::alloc(field, tlen, m, n, &mut pool)?;
    if cache_all {
        let mut ta: MatTransform<F> = MatTransform::alloc(field, tlen, m, kdim, &mut pool)?;
        ta.dft_from(field, plan, a);
        let mut tb: MatTransform<F> = MatTransform::alloc(field, tlen, kdim, n, &mut pool)?;
        tb.dft_from(field, plan, b);
        for (i, j) in iproduct!(0..m, 0..n) {
            for l in 0..kdim {
                field.mul_add(plan, acc.entry_mut(i, j), ta.entry(i, l), tb.entry(l, j));
            }
        }
    } else {
        // stream one inner index at a time, recomputing transforms
        let mut acol: MatTransform<F> = MatTransform::alloc(field, tlen, m, 1, &mut pool)?;
        let mut brow: MatTransform<F> = MatTransform::alloc(field, tlen, 1, n, &mut pool)?;
        for l in 0..kdim {
            for i in 0..m {
                acol.dft_entry(field, plan, i, 0, a.part(i, l));
            }
            for j in 0..n {
                brow.dft_entry(field, plan, 0, j, b.part(l, j));
            }
            for (i, j) in iproduct!(0..m, 0..n) {
                field.mul_add(plan, acc.entry_mut(i, j), acol.entry(i, 0), brow.entry(0, j));
            }
        }
    }
    acc.idft_to(field, plan, c, out_k0, out_len);
    Ok(pool.used as u64)
}

/// Dense product `c = a * b` through cached transforms.
pub fn mul<F: Convolve>(
    stats: &mut TreeStats,
    c: &mut MatPoly<F>,
    a: &MatPoly<F>,
    b: &MatPoly<F>,
    hint: Option<&mut MulHint>,
) -> Result<()> {
    assert_eq!(a.ncols(), b.nrows());
    assert_eq!(c.nrows(), a.nrows());
    assert_eq!(c.ncols(), b.ncols());
    let (out_k0, out_len) = mul_window(a.size(), b.size());
    let field: F = a.field().clone();
    let plan: F::Plan = field.plan(a.size(), b.size());
    let tbytes: u64 = run_with_budget("MUL", &field, &plan, hint, |ram| {
        convolve_local(&field, c, a, b, &plan, out_k0, out_len, ram)
    })?;
    stats.record("MUL", (a.nrows() * b.ncols() * out_len) as u64, tbytes);
    Ok(())
}

/// Middle product: the degree window `[|a|-1, |b|)` of `a * b`, the
/// truncation step of the recursive generator computation.
pub fn mp<F: Convolve>(
    stats: &mut TreeStats,
    c: &mut MatPoly<F>,
    a: &MatPoly<F>,
    b: &MatPoly<F>,
    hint: Option<&mut MulHint>,
) -> Result<()> {
    assert_eq!(a.ncols(), b.nrows());
    assert_eq!(c.nrows(), a.nrows());
    assert_eq!(c.ncols(), b.ncols());
    let (out_k0, out_len) = mp_window(a.size(), b.size());
    let field: F = a.field().clone();
    let plan: F::Plan = field.plan(a.size(), b.size());
    let tbytes: u64 = run_with_budget("MP", &field, &plan, hint, |ram| {
        convolve_local(&field, c, a, b, &plan, out_k0, out_len, ram)
    })?;
    stats.record("MP", (a.nrows() * b.ncols() * out_len) as u64, tbytes);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn convolve_grid<F: Convolve, C: Comm>(
    field: &F,
    comm_grid: &Grid<C>,
    c: &mut GridMatPoly<F>,
    a: &GridMatPoly<F>,
    b: &GridMatPoly<F>,
    plan: &F::Plan,
    out_k0: usize,
    out_len: usize,
    ram: usize,
) -> Result<u64> {
    let kdim: usize = a.ncols();
    let (cr_a, cc_a) = (a.cell_rows(), a.cell_cols());
    let (cr_b, cc_b) = (b.cell_rows(), b.cell_cols());
    c.reset(out_len);
    if out_len == 0 {
        return Ok(0);
    }
    let tlen: usize = field.transform_len(plan);
    let elt: usize = size_of::<F::Elt>();
    let mut pool: MemoryPool = MemoryPool::new(ram);

    let mut acc: MatTransform<F> = MatTransform::alloc(field, tlen, cr_a, cc_b, &mut pool)?;
    let cached: usize = cr_a * cc_a + cr_b * cc_b + cr_a * kdim + kdim * cc_b;
    let cache_all: bool = (cached + cr_a * cc_b) * tlen * elt <= ram;

    if cache_all {
        // every worker transforms its own cells, then one allgather per
        // operand replicates what the output cell needs
        let mut ta: MatTransform<F> = MatTransform::alloc(field, tlen, cr_a, cc_a, &mut pool)?;
        ta.dft_from(field, plan, a.my_cell());
        let mut arow: MatTransform<F> = MatTransform::alloc(field, tlen, cr_a, kdim, &mut pool)?;
        let gathered_a: Vec<u8> = comm_grid.row().allgather(&ta.pack(field));
        let stride_a: usize = cr_a * cc_a * tlen * field.elt_bytes();
        for r in 0..comm_grid.ncols() {
            arow.place_block(field, &gathered_a[r * stride_a..(r + 1) * stride_a], r * cc_a, cr_a, cc_a);
        }

        let mut tb: MatTransform<F> = MatTransform::alloc(field, tlen, cr_b, cc_b, &mut pool)?;
        tb.dft_from(field, plan, b.my_cell());
        let mut bcol: MatTransform<F> = MatTransform::alloc(field, tlen, kdim, cc_b, &mut pool)?;
        let gathered_b: Vec<u8> = comm_grid.col().allgather(&tb.pack(field));
        let stride_b: usize = cr_b * cc_b * tlen * field.elt_bytes();
        for r in 0..comm_grid.nrows() {
            let block: &[u8] = &gathered_b[r * stride_b..(r + 1) * stride_b];
            let nb: usize = tlen * field.elt_bytes();
            for (i, j) in iproduct!(0..cr_b, 0..cc_b) {
                let off: usize = (i * cc_b + j) * nb;
                field
                    .unpack(&block[off..off + nb], bcol.entry_mut(r * cr_b + i, j))
                    .expect("transform exchange buffer sized by construction");
            }
        }

        for (i, j) in iproduct!(0..cr_a, 0..cc_b) {
            for l in 0..kdim {
                field.mul_add(plan, acc.entry_mut(i, j), arow.entry(i, l), bcol.entry(l, j));
            }
        }
    } else {
        // stream one inner index at a time: the owner broadcasts its
        // transforms along its row/column, nothing is kept
        let mut acol: MatTransform<F> = MatTransform::alloc(field, tlen, cr_a, 1, &mut pool)?;
        let mut brow: MatTransform<F> = MatTransform::alloc(field, tlen, 1, cc_b, &mut pool)?;
        for l in 0..kdim {
            let aowner: usize = l / cc_a;
            if comm_grid.row().rank() == aowner {
                for i in 0..cr_a {
                    acol.dft_entry(field, plan, i, 0, a.my_cell().part(i, l - aowner * cc_a));
                }
            }
            let mut bytes_a: Vec<u8> = acol.pack(field);
            comm_grid.row().bcast_bytes(aowner, &mut bytes_a);
            acol.unpack_from(field, &bytes_a);

            let bowner: usize = l / cr_b;
            if comm_grid.col().rank() == bowner {
                for j in 0..cc_b {
                    brow.dft_entry(field, plan, 0, j, b.my_cell().part(l - bowner * cr_b, j));
                }
            }
            let mut bytes_b: Vec<u8> = brow.pack(field);
            comm_grid.col().bcast_bytes(bowner, &mut bytes_b);
            brow.unpack_from(field, &bytes_b);

            for (i, j) in iproduct!(0..cr_a, 0..cc_b) {
                field.mul_add(plan, acc.entry_mut(i, j), acol.entry(i, 0), brow.entry(0, j));
            }
        }
    }
    acc.idft_to(field, plan, c.my_cell_mut(), out_k0, out_len);
    Ok(pool.used as u64)
}

fn grid_preconditions<F: Convolve, C: Comm>(
    comm_grid: &Grid<C>,
    c: &GridMatPoly<F>,
    a: &GridMatPoly<F>,
    b: &GridMatPoly<F>,
) {
    assert!(comm_grid.is_square(), "collective multiply needs a square mesh");
    let shape: (usize, usize) = (comm_grid.nrows(), comm_grid.ncols());
    assert_eq!(a.mesh_shape(), shape, "operand mesh shape mismatch");
    assert_eq!(b.mesh_shape(), shape, "operand mesh shape mismatch");
    assert_eq!(c.mesh_shape(), shape, "operand mesh shape mismatch");
    assert_eq!(a.ncols(), b.nrows());
    assert_eq!(c.nrows(), a.nrows());
    assert_eq!(c.ncols(), b.ncols());
}

/// Collective dense product over the mesh. All workers must call with
/// identical size metadata and hints.
pub fn mul_grid<F: Convolve, C: Comm>(
    stats: &mut TreeStats,
    comm_grid: &Grid<C>,
    c: &mut GridMatPoly<F>,
    a: &GridMatPoly<F>,
    b: &GridMatPoly<F>,
    hint: Option<&mut MulHint>,
) -> Result<()> {
    grid_preconditions(comm_grid, c, a, b);
    let (out_k0, out_len) = mul_window(a.size(), b.size());
    let field: F = a.field().clone();
    let plan: F::Plan = field.plan(a.size(), b.size());
    let tbytes: u64 = run_with_budget("MUL", &field, &plan, hint, |ram| {
        convolve_grid(&field, comm_grid, c, a, b, &plan, out_k0, out_len, ram)
    })?;
    stats.record("MUL", (a.nrows() * b.ncols() * out_len) as u64, tbytes);
    Ok(())
}

/// Collective middle product over the mesh.
pub fn mp_grid<F: Convolve, C: Comm>(
    stats: &mut TreeStats,
    comm_grid: &Grid<C>,
    c: &mut GridMatPoly<F>,
    a: &GridMatPoly<F>,
    b: &GridMatPoly<F>,
    hint: Option<&mut MulHint>,
) -> Result<()> {
    grid_preconditions(comm_grid, c, a, b);
    let (out_k0, out_len) = mp_window(a.size(), b.size());
    let field: F = a.field().clone();
    let plan: F::Plan = field.plan(a.size(), b.size());
    let tbytes: u64 = run_with_budget("MP", &field, &plan, hint, |ram| {
        convolve_grid(&field, comm_grid, c, a, b, &plan, out_k0, out_len, ram)
    })?;
    stats.record("MP", (a.nrows() * b.ncols() * out_len) as u64, tbytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use arith::Fp64;
    use sampling::source::Source;

    use super::{MulHint, mp, mul};
    use crate::{MatPoly, TreeStats};

    const P: u64 = 0xffffffff00000001;

    fn random_matpoly(field: Fp64, m: usize, n: usize, len: usize, seed: u8) -> MatPoly<Fp64> {
        let mut a: MatPoly<Fp64> = MatPoly::new(field, m, n, len);
        a.zero_pad(len);
        let mut source: Source = Source::new([seed; 32]);
        a.fill_random(0, len, &mut source);
        a
    }

    #[test]
    fn cached_mul_matches_basecase() {
        let field: Fp64 = Fp64::new(P).unwrap();
        let a: MatPoly<Fp64> = random_matpoly(field, 2, 3, 7, 1);
        let b: MatPoly<Fp64> = random_matpoly(field, 3, 2, 5, 2);
        let want: MatPoly<Fp64> = MatPoly::mul_basecase(&a, &b);

        let mut stats: TreeStats = TreeStats::new();
        let mut c: MatPoly<Fp64> = MatPoly::new(field, 2, 2, 0);
        mul(&mut stats, &mut c, &a, &b, None).unwrap();

        assert_eq!(c.size(), 11);
        for i in 0..2 {
            for j in 0..2 {
                assert_eq!(c.part(i, j), want.part(i, j));
            }
        }
        assert_eq!(stats.get("MUL").unwrap().calls, 1);
    }

    #[test]
    fn tight_budgets_still_produce_the_product() {
        let field: Fp64 = Fp64::new(P).unwrap();
        let a: MatPoly<Fp64> = random_matpoly(field, 3, 3, 9, 3);
        let b: MatPoly<Fp64> = random_matpoly(field, 3, 3, 9, 4);
        let want: MatPoly<Fp64> = MatPoly::mul_basecase(&a, &b);

        // 5000 bytes fits the streamed path but not the cached one;
        // 1 byte forces the retry with the budget lifted
        for ram in [5000usize, 1] {
            let mut stats: TreeStats = TreeStats::new();
            let mut hint: MulHint = MulHint::new([usize::MAX; 3], ram);
            let mut c: MatPoly<Fp64> = MatPoly::new(field, 3, 3, 0);
            mul(&mut stats, &mut c, &a, &b, Some(&mut hint)).unwrap();

            for i in 0..3 {
                for j in 0..3 {
                    assert_eq!(c.part(i, j), want.part(i, j), "ram = {}", ram);
                }
            }
        }
    }

    #[test]
    fn undersized_hint_is_corrected_in_place() {
        let field: Fp64 = Fp64::new(P).unwrap();
        let a: MatPoly<Fp64> = random_matpoly(field, 1, 1, 8, 5);
        let b: MatPoly<Fp64> = random_matpoly(field, 1, 1, 8, 6);

        let mut stats: TreeStats = TreeStats::new();
        let mut hint: MulHint = MulHint::new([1, 1, 1], usize::MAX);
        let mut c: MatPoly<Fp64> = MatPoly::new(field, 1, 1, 0);
        mul(&mut stats, &mut c, &a, &b, Some(&mut hint)).unwrap();

        let want: MatPoly<Fp64> = MatPoly::mul_basecase(&a, &b);
        assert_eq!(c.part(0, 0), want.part(0, 0));
        assert_ne!(hint.alloc_sizes, [1, 1, 1]);
    }

    #[test]
    fn characteristic_two_scenario_for_any_budget() {
        let field: Fp64 = Fp64::new(2).unwrap();
        let mut a: MatPoly<Fp64> = MatPoly::new(field, 1, 1, 3);
        a.zero_pad(3);
        *a.coeff_mut(0, 0, 0) = 1;
        *a.coeff_mut(0, 0, 2) = 1;
        let mut b: MatPoly<Fp64> = MatPoly::new(field, 1, 1, 2);
        b.zero_pad(2);
        *b.coeff_mut(0, 0, 0) = 1;
        *b.coeff_mut(0, 0, 1) = 1;

        for ram in [1usize, 1 << 10, usize::MAX] {
            let mut stats: TreeStats = TreeStats::new();
            let mut hint: MulHint = MulHint::new([usize::MAX; 3], ram);
            let mut c: MatPoly<Fp64> = MatPoly::new(field, 1, 1, 0);
            mul(&mut stats, &mut c, &a, &b, Some(&mut hint)).unwrap();
            assert_eq!(c.part(0, 0), &[1, 1, 1, 1]);
        }
    }

    #[test]
    fn middle_product_window() {
        let field: Fp64 = Fp64::new(P).unwrap();
        let a: MatPoly<Fp64> = random_matpoly(field, 2, 2, 3, 7);
        let b: MatPoly<Fp64> = random_matpoly(field, 2, 2, 8, 8);
        let full: MatPoly<Fp64> = MatPoly::mul_basecase(&a, &b);

        let mut stats: TreeStats = TreeStats::new();
        let mut c: MatPoly<Fp64> = MatPoly::new(field, 2, 2, 0);
        mp(&mut stats, &mut c, &a, &b, None).unwrap();

        assert_eq!(c.size(), 6);
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..6 {
                    assert_eq!(c.coeff(i, j, k), full.coeff(i, j, k + 2));
                }
            }
        }
    }
}
