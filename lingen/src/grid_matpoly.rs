use arith::Field;
use grid::{Comm, Grid};

use crate::MatPoly;

/// One matrix-polynomial sharded over a p×q worker mesh.
///
/// Each worker owns the cell covering its block of rows and columns. Size
/// metadata (`size`, cache window bounds held by the wrappers) is kept
/// identical at every worker through explicit broadcasts; payload-level
/// operations on a `MatPoly` argument are meaningful only at the root.
#[derive(Debug)]
pub struct GridMatPoly<F: Field> {
    field: F,
    nrows: usize,
    ncols: usize,
    size: usize,
    mesh_rows: usize,
    mesh_cols: usize,
    cell: MatPoly<F>,
}

impl<F: Field> GridMatPoly<F> {
    pub fn new<C: Comm>(
        comm_grid: &Grid<C>,
        field: F,
        nrows: usize,
        ncols: usize,
        len: usize,
    ) -> GridMatPoly<F> {
        let p: usize = comm_grid.nrows();
        let q: usize = comm_grid.ncols();
        assert_eq!(nrows % p, 0, "rows {} not divisible by mesh rows {}", nrows, p);
        assert_eq!(ncols % q, 0, "cols {} not divisible by mesh cols {}", ncols, q);
        GridMatPoly {
            cell: MatPoly::new(field.clone(), nrows / p, ncols / q, len),
            field,
            nrows,
            ncols,
            size: 0,
            mesh_rows: p,
            mesh_cols: q,
        }
    }

    pub fn field(&self) -> &F {
        &self.field
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn mesh_shape(&self) -> (usize, usize) {
        (self.mesh_rows, self.mesh_cols)
    }

    pub fn cell_rows(&self) -> usize {
        self.nrows / self.mesh_rows
    }

    pub fn cell_cols(&self) -> usize {
        self.ncols / self.mesh_cols
    }

    pub fn my_cell(&self) -> &MatPoly<F> {
        &self.cell
    }

    pub fn my_cell_mut(&mut self) -> &mut MatPoly<F> {
        &mut self.cell
    }

    pub fn zero_pad(&mut self, new_size: usize) {
        self.cell.zero_pad(new_size);
        self.size = new_size;
    }

    pub fn set_size(&mut self, size: usize) {
        self.cell.set_size(size);
        self.size = size;
    }

    pub fn truncate(&mut self, size: usize) {
        self.cell.truncate(size);
        self.size = size;
    }

    pub fn reset(&mut self, len: usize) {
        self.cell.reset(len);
        self.size = len;
    }

    /// Re-synchronizes the size metadata from the root.
    pub fn share<C: Comm>(&mut self, comm_grid: &Grid<C>) {
        self.size = comm_grid.world().bcast_u64(0, self.size as u64) as usize;
        if self.cell.size() != self.size {
            self.cell.set_size(self.size);
        }
    }

    /// Collective: distributes coefficients `[src_k0, src_k0 + nk)` of the
    /// root-only `src` into every worker's cell, landing at `dst_k0`. Cells
    /// must already be padded to `dst_k0 + nk`.
    pub fn scatter_partial<C: Comm>(
        &mut self,
        comm_grid: &Grid<C>,
        src: &MatPoly<F>,
        src_k0: usize,
        dst_k0: usize,
        nk: usize,
    ) {
        assert_eq!((self.mesh_rows, self.mesh_cols), (comm_grid.nrows(), comm_grid.ncols()));
        let nb: usize = self.field.elt_bytes();
        let mut buf: Vec<u8> = vec![0u8; self.nrows * self.ncols * nk * nb];
        if comm_grid.is_root() {
            assert_eq!(self.nrows, src.nrows());
            assert_eq!(self.ncols, src.ncols());
            let mut packed: Vec<u8> = Vec::with_capacity(buf.len());
            for i in 0..self.nrows {
                for j in 0..self.ncols {
                    self.field.pack(&src.part_head(i, j, src_k0)[..nk], &mut packed);
                }
            }
            buf.copy_from_slice(&packed);
        }
        comm_grid.world().bcast_bytes(0, &mut buf);

        let (cr, cc) = (self.cell_rows(), self.cell_cols());
        let (i0, j0) = (comm_grid.irank() * cr, comm_grid.jrank() * cc);
        let run: usize = nk * nb;
        for i in 0..cr {
            for j in 0..cc {
                let off: usize = ((i0 + i) * self.ncols + (j0 + j)) * run;
                let field: F = self.field.clone();
                field
                    .unpack(&buf[off..off + run], &mut self.cell.part_head_mut(i, j, dst_k0)[..nk])
                    .expect("scatter buffer sized above");
            }
        }
    }

    /// Collective: collects coefficients `[src_k0, src_k0 + nk)` of every
    /// worker's cell into the root-only `dst` at `dst_k0`. Non-root `dst`
    /// contents are unspecified.
    pub fn gather_partial<C: Comm>(
        &self,
        comm_grid: &Grid<C>,
        dst: &mut MatPoly<F>,
        dst_k0: usize,
        src_k0: usize,
        nk: usize,
    ) {
        assert_eq!((self.mesh_rows, self.mesh_cols), (comm_grid.nrows(), comm_grid.ncols()));
        let nb: usize = self.field.elt_bytes();
        let (cr, cc) = (self.cell_rows(), self.cell_cols());
        let mut contrib: Vec<u8> = Vec::with_capacity(cr * cc * nk * nb);
        for i in 0..cr {
            for j in 0..cc {
                self.field.pack(&self.cell.part_head(i, j, src_k0)[..nk], &mut contrib);
            }
        }
        let gathered: Vec<u8> = comm_grid.world().allgather(&contrib);

        if comm_grid.is_root() {
            assert_eq!(self.nrows, dst.nrows());
            assert_eq!(self.ncols, dst.ncols());
            let run: usize = nk * nb;
            let per_worker: usize = cr * cc * run;
            for rank in 0..comm_grid.nrows() * comm_grid.ncols() {
                let (i0, j0) = (
                    rank / comm_grid.ncols() * cr,
                    rank % comm_grid.ncols() * cc,
                );
                for i in 0..cr {
                    for j in 0..cc {
                        let off: usize = rank * per_worker + (i * cc + j) * run;
                        let field: F = self.field.clone();
                        field
                            .unpack(
                                &gathered[off..off + run],
                                &mut dst.part_head_mut(i0 + i, j0 + j, dst_k0)[..nk],
                            )
                            .expect("gather buffer sized above");
                    }
                }
            }
        }
    }
}
