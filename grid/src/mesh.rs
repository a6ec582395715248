use crate::{Comm, LocalComm, SoloComm, local_comms};

/// A p×q mesh of workers with row and column sub-communicators.
///
/// Worker (i, j) has world rank `i*q + j`; rank 0 is the root, the only
/// worker that touches files and takes scalar decisions. Everything a
/// non-root worker needs to know arrives through explicit broadcasts.
#[derive(Debug)]
pub struct Grid<C: Comm> {
    world: C,
    row: C,
    col: C,
    nrows: usize,
    ncols: usize,
}

impl<C: Comm> Grid<C> {
    pub fn new(world: C, row: C, col: C, nrows: usize, ncols: usize) -> Grid<C> {
        assert_eq!(world.size(), nrows * ncols);
        assert_eq!(row.size(), ncols);
        assert_eq!(col.size(), nrows);
        assert_eq!(row.rank(), world.rank() % ncols);
        assert_eq!(col.rank(), world.rank() / ncols);
        Grid {
            world,
            row,
            col,
            nrows,
            ncols,
        }
    }

    pub fn world(&self) -> &C {
        &self.world
    }

    /// Communicator of this worker's mesh row.
    pub fn row(&self) -> &C {
        &self.row
    }

    /// Communicator of this worker's mesh column.
    pub fn col(&self) -> &C {
        &self.col
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn is_root(&self) -> bool {
        self.world.rank() == 0
    }

    /// Row index of this worker in the mesh.
    pub fn irank(&self) -> usize {
        self.world.rank() / self.ncols
    }

    /// Column index of this worker in the mesh.
    pub fn jrank(&self) -> usize {
        self.world.rank() % self.ncols
    }

    pub fn is_square(&self) -> bool {
        self.nrows == self.ncols
    }

    pub fn same_shape(&self, other: &Grid<C>) -> bool {
        self.nrows == other.nrows && self.ncols == other.ncols
    }
}

impl Grid<SoloComm> {
    /// The degenerate 1×1 mesh every single-process code path runs on.
    pub fn solo() -> Grid<SoloComm> {
        Grid::new(SoloComm, SoloComm, SoloComm, 1, 1)
    }
}

/// Runs `f` once per worker of a p×q shared-memory mesh, one thread each,
/// and returns the per-worker results in rank order.
pub fn spawn_grid<T, F>(p: usize, q: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(Grid<LocalComm>) -> T + Sync,
{
    let mut world_it = local_comms(p * q).into_iter();
    let mut row_its: Vec<_> = (0..p).map(|_| local_comms(q).into_iter()).collect();
    let mut col_its: Vec<_> = (0..q).map(|_| local_comms(p).into_iter()).collect();

    let mut grids: Vec<Grid<LocalComm>> = Vec::with_capacity(p * q);
    for i in 0..p {
        for j in 0..q {
            grids.push(Grid::new(
                world_it.next().unwrap(),
                row_its[i].next().unwrap(),
                col_its[j].next().unwrap(),
                p,
                q,
            ));
        }
    }

    std::thread::scope(|s| {
        let f = &f;
        let handles: Vec<_> = grids.into_iter().map(|g| s.spawn(move || f(g))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}
