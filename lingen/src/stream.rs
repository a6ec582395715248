use arith::Field;

use crate::{MatPoly, Result, iceildiv};

/// Target byte volume of one I/O window.
pub const IO_BLOCK_SIZE: usize = 1 << 20;

pub(crate) fn window_from_matsize<F: Field>(avg: f64, block: usize) -> usize {
    let nmats: usize = ((block as f64 / avg).ceil() as usize).max(1);
    F::SIMD * iceildiv(nmats, F::SIMD)
}

/// Sizing and progress metadata common to both stream directions.
pub trait StreamInfo<F: Field> {
    fn field(&self) -> &F;
    fn nrows(&self) -> usize;
    fn ncols(&self) -> usize;

    /// Average bytes of one matrix coefficient on the wire; only drives
    /// window sizing and progress reporting.
    fn average_matsize(&self) -> f64 {
        (self.nrows() * self.ncols() * self.field().elt_bytes()) as f64
    }

    /// Window the endpoint would like to move per call, always a multiple
    /// of the packing width.
    fn preferred_window(&self) -> usize {
        window_from_matsize::<F>(self.average_matsize(), IO_BLOCK_SIZE)
    }

    /// Total length estimate, for progress reporting only. `usize::MAX`
    /// when the endpoint has no idea.
    fn guessed_length(&self) -> usize {
        usize::MAX
    }
}

/// Input side of the stream protocol.
pub trait CoeffRead<F: Field>: StreamInfo<F> {
    /// Produces coefficients for degrees `[k0, k1)` into `dst` starting at
    /// offset `k0`, returning how many were produced. A count short of
    /// `k1 - k0` signals end of stream and the caller must not request
    /// further data. Collective: the count is identical at every worker,
    /// and `dst` payload is only meaningful at the root unless the
    /// endpoint is collective by construction.
    fn read(&mut self, dst: &mut MatPoly<F>, k0: usize, k1: usize) -> Result<usize>;
}

/// Output side of the stream protocol.
pub trait CoeffWrite<F: Field>: StreamInfo<F> {
    /// Consumes coefficients `[k0, k1)` from `src`, returning how many were
    /// written. A short count is a fatal I/O condition; there is no
    /// partial-write recovery.
    fn write(&mut self, src: &MatPoly<F>, k0: usize, k1: usize) -> Result<usize>;
}
