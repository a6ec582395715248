use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use arith::Field;
use grid::{Comm, Grid};
use sampling::source::Source;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::{
    CoeffRead, CoeffWrite, Error, GridMatPoly, MatPoly, Result, StreamInfo, iceildiv,
    matpoly_read, matpoly_write, matpoly_write_split,
};

const ASCII_DIGITS_PER_BYTE: f64 = 2.41;

/// Coefficient stream backed by an on-disk file, ASCII or packed binary.
/// Only the root holds the descriptor; counts and the length guess are
/// broadcast so every worker's bookkeeping agrees.
#[derive(Debug)]
pub struct FileInput<'g, F: Field, C: Comm> {
    field: F,
    grid: &'g Grid<C>,
    nrows: usize,
    ncols: usize,
    path: PathBuf,
    ascii: bool,
    guessed: usize,
    reader: Option<BufReader<File>>,
}

impl<'g, F: Field, C: Comm> FileInput<'g, F, C> {
    pub fn open(
        grid: &'g Grid<C>,
        field: F,
        nrows: usize,
        ncols: usize,
        path: impl AsRef<Path>,
        ascii: bool,
        length_hint: Option<usize>,
    ) -> Result<FileInput<'g, F, C>> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let mut reader: Option<BufReader<File>> = None;
        let mut guessed: u64 = 0;
        if grid.is_root() {
            let f: File = File::open(&path)?;
            let filesize: u64 = f.metadata()?.len();
            let matsize: u64 = (nrows * ncols * field.elt_bytes()) as u64;
            guessed = match length_hint {
                Some(hint) => hint as u64,
                None if !ascii => {
                    if filesize % matsize != 0 {
                        return Err(Error::BadFileSize {
                            path,
                            bytes: filesize,
                            matsize,
                        });
                    }
                    filesize / matsize
                }
                None => {
                    let avg: f64 =
                        (nrows * ncols) as f64 * (field.elt_bytes() as f64 * ASCII_DIGITS_PER_BYTE + 1.0);
                    let expected: f64 = filesize as f64 / avg;
                    info!("expect roughly {:.2} items in the sequence", expected);
                    // the first coefficient is always lighter
                    1 + expected as u64
                }
            };
            reader = Some(BufReader::new(f));
        }
        let guessed: usize = grid.world().bcast_u64(0, guessed) as usize;
        Ok(FileInput {
            field,
            grid,
            nrows,
            ncols,
            path,
            ascii,
            guessed,
            reader,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<'g, F: Field, C: Comm> StreamInfo<F> for FileInput<'g, F, C> {
    fn field(&self) -> &F {
        &self.field
    }

    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn average_matsize(&self) -> f64 {
        if self.ascii {
            (self.nrows * self.ncols) as f64
                * (self.field.elt_bytes() as f64 * ASCII_DIGITS_PER_BYTE + 1.0)
        } else {
            (self.nrows * self.ncols * self.field.elt_bytes()) as f64
        }
    }

    fn guessed_length(&self) -> usize {
        self.guessed
    }
}

impl<'g, F: Field, C: Comm> CoeffRead<F> for FileInput<'g, F, C> {
    fn read(&mut self, dst: &mut MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        let mut nread: u64 = 0;
        if let Some(reader) = self.reader.as_mut() {
            nread = matpoly_read(&self.field, reader, dst, k0, k1, self.ascii)? as u64;
        }
        Ok(self.grid.world().bcast_u64(0, nread) as usize)
    }
}

/// Pseudo-random coefficients up to a fixed total length; the payload is
/// produced at the root only, as with any root-only input.
pub struct RandomInput<'g, F: Field, C: Comm> {
    field: F,
    grid: &'g Grid<C>,
    nrows: usize,
    ncols: usize,
    length: usize,
    next_k: usize,
    source: Source,
}

impl<'g, F: Field, C: Comm> RandomInput<'g, F, C> {
    pub fn new(
        grid: &'g Grid<C>,
        field: F,
        nrows: usize,
        ncols: usize,
        length: usize,
        seed: [u8; 32],
    ) -> RandomInput<'g, F, C> {
        RandomInput {
            field,
            grid,
            nrows,
            ncols,
            length,
            next_k: 0,
            source: Source::new(seed),
        }
    }
}

impl<'g, F: Field, C: Comm> StreamInfo<F> for RandomInput<'g, F, C> {
    fn field(&self) -> &F {
        &self.field
    }

    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn guessed_length(&self) -> usize {
        self.length
    }
}

impl<'g, F: Field, C: Comm> CoeffRead<F> for RandomInput<'g, F, C> {
    fn read(&mut self, dst: &mut MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        let nk: usize = self.length.min(self.next_k + (k1 - k0)) - self.next_k;
        if self.grid.is_root() {
            dst.fill_random(k0, k0 + nk, &mut self.source);
        }
        self.next_k += nk;
        Ok(nk)
    }
}

/// Appends written windows to a root-only in-memory matrix-polynomial.
pub struct Scatter<'m, 'g, F: Field, C: Comm> {
    dst: &'m mut MatPoly<F>,
    grid: &'g Grid<C>,
    next_k: usize,
    window: Option<usize>,
}

impl<'m, 'g, F: Field, C: Comm> Scatter<'m, 'g, F, C> {
    pub fn new(grid: &'g Grid<C>, dst: &'m mut MatPoly<F>) -> Scatter<'m, 'g, F, C> {
        Scatter {
            dst,
            grid,
            next_k: 0,
            window: None,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = Some(window);
        self
    }
}

impl<'m, 'g, F: Field, C: Comm> StreamInfo<F> for Scatter<'m, 'g, F, C> {
    fn field(&self) -> &F {
        self.dst.field()
    }

    fn nrows(&self) -> usize {
        self.dst.nrows()
    }

    fn ncols(&self) -> usize {
        self.dst.ncols()
    }

    fn preferred_window(&self) -> usize {
        self.window
            .unwrap_or_else(|| crate::window_from_matsize::<F>(self.average_matsize(), crate::IO_BLOCK_SIZE))
    }
}

impl<'m, 'g, F: Field, C: Comm> CoeffWrite<F> for Scatter<'m, 'g, F, C> {
    fn write(&mut self, src: &MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        assert_eq!(k0 % F::SIMD, 0);
        assert_eq!(self.next_k % F::SIMD, 0);
        let mut nk: u64 = 0;
        if self.grid.is_root() {
            assert!(k1 <= src.size());
            nk = (k1.min(src.size()) - k0) as u64;
        }
        let nk: usize = self.grid.world().bcast_u64(0, nk) as usize;
        if self.grid.is_root() {
            self.dst.zero_pad(self.next_k + nk);
            for i in 0..self.dst.nrows() {
                for j in 0..self.dst.ncols() {
                    let run: &[F::Elt] = &src.part_head(i, j, k0)[..nk];
                    self.dst.part_head_mut(i, j, self.next_k)[..nk].copy_from_slice(run);
                }
            }
        }
        self.next_k += nk;
        Ok(nk)
    }
}

/// Appends written windows into every worker's shard of a grid-sharded
/// matrix-polynomial; collective by construction.
pub struct ScatterGrid<'m, 'g, F: Field, C: Comm> {
    dst: &'m mut GridMatPoly<F>,
    grid: &'g Grid<C>,
    next_k: usize,
}

impl<'m, 'g, F: Field, C: Comm> ScatterGrid<'m, 'g, F, C> {
    pub fn new(grid: &'g Grid<C>, dst: &'m mut GridMatPoly<F>) -> ScatterGrid<'m, 'g, F, C> {
        ScatterGrid {
            dst,
            grid,
            next_k: 0,
        }
    }
}

impl<'m, 'g, F: Field, C: Comm> StreamInfo<F> for ScatterGrid<'m, 'g, F, C> {
    fn field(&self) -> &F {
        self.dst.field()
    }

    fn nrows(&self) -> usize {
        self.dst.nrows()
    }

    fn ncols(&self) -> usize {
        self.dst.ncols()
    }
}

impl<'m, 'g, F: Field, C: Comm> CoeffWrite<F> for ScatterGrid<'m, 'g, F, C> {
    fn write(&mut self, src: &MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        assert_eq!(k0 % F::SIMD, 0);
        assert_eq!(self.next_k % F::SIMD, 0);
        let mut nk: u64 = 0;
        if self.grid.is_root() {
            assert!(k1 <= src.size());
            nk = (k1.min(src.size()) - k0) as u64;
        }
        let nk: usize = self.grid.world().bcast_u64(0, nk) as usize;
        self.dst.zero_pad(self.next_k + nk);
        self.dst.scatter_partial(self.grid, src, k0, self.next_k, nk);
        self.next_k += nk;
        Ok(nk)
    }
}

/// Reads successive windows out of a root-only in-memory matrix-polynomial.
pub struct Gather<'m, 'g, F: Field, C: Comm> {
    src: &'m MatPoly<F>,
    grid: &'g Grid<C>,
    next_k: usize,
    window: Option<usize>,
}

impl<'m, 'g, F: Field, C: Comm> Gather<'m, 'g, F, C> {
    pub fn new(grid: &'g Grid<C>, src: &'m MatPoly<F>) -> Gather<'m, 'g, F, C> {
        Gather {
            src,
            grid,
            next_k: 0,
            window: None,
        }
    }

    pub fn with_window(mut self, window: usize) -> Self {
        self.window = Some(window);
        self
    }
}

impl<'m, 'g, F: Field, C: Comm> StreamInfo<F> for Gather<'m, 'g, F, C> {
    fn field(&self) -> &F {
        self.src.field()
    }

    fn nrows(&self) -> usize {
        self.src.nrows()
    }

    fn ncols(&self) -> usize {
        self.src.ncols()
    }

    fn preferred_window(&self) -> usize {
        self.window
            .unwrap_or_else(|| crate::window_from_matsize::<F>(self.average_matsize(), crate::IO_BLOCK_SIZE))
    }

    fn guessed_length(&self) -> usize {
        self.src.size()
    }
}

impl<'m, 'g, F: Field, C: Comm> CoeffRead<F> for Gather<'m, 'g, F, C> {
    fn read(&mut self, dst: &mut MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        assert_eq!(k0 % F::SIMD, 0);
        assert_eq!(k1 % F::SIMD, 0);
        assert_eq!(self.next_k % F::SIMD, 0);
        let mut nk: u64 = 0;
        if self.grid.is_root() {
            assert!(k1 <= dst.size());
            let want: usize = k1.min(dst.size()) - k0;
            nk = want.min(self.src.size() - self.next_k) as u64;
            for i in 0..self.src.nrows() {
                for j in 0..self.src.ncols() {
                    let run: &[F::Elt] = &self.src.part_head(i, j, self.next_k)[..nk as usize];
                    dst.part_head_mut(i, j, k0)[..nk as usize].copy_from_slice(run);
                }
            }
        }
        let nk: usize = self.grid.world().bcast_u64(0, nk) as usize;
        self.next_k += nk;
        Ok(nk)
    }
}

/// Reads successive windows out of a grid-sharded matrix-polynomial;
/// collective by construction, payload lands at the root.
pub struct GatherGrid<'m, 'g, F: Field, C: Comm> {
    src: &'m GridMatPoly<F>,
    grid: &'g Grid<C>,
    next_k: usize,
}

impl<'m, 'g, F: Field, C: Comm> GatherGrid<'m, 'g, F, C> {
    pub fn new(grid: &'g Grid<C>, src: &'m GridMatPoly<F>) -> GatherGrid<'m, 'g, F, C> {
        GatherGrid {
            src,
            grid,
            next_k: 0,
        }
    }
}

impl<'m, 'g, F: Field, C: Comm> StreamInfo<F> for GatherGrid<'m, 'g, F, C> {
    fn field(&self) -> &F {
        self.src.field()
    }

    fn nrows(&self) -> usize {
        self.src.nrows()
    }

    fn ncols(&self) -> usize {
        self.src.ncols()
    }

    fn guessed_length(&self) -> usize {
        self.src.size()
    }
}

impl<'m, 'g, F: Field, C: Comm> CoeffRead<F> for GatherGrid<'m, 'g, F, C> {
    fn read(&mut self, dst: &mut MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        assert_eq!(k0 % F::SIMD, 0);
        assert_eq!(k1 % F::SIMD, 0);
        assert_eq!(self.next_k % F::SIMD, 0);
        let mut nk: u64 = 0;
        if self.grid.is_root() {
            assert!(k1 <= dst.size());
            let want: usize = k1.min(dst.size()) - k0;
            nk = want.min(self.src.size() - self.next_k) as u64;
        }
        let nk: usize = self.grid.world().bcast_u64(0, nk) as usize;
        self.src.gather_partial(self.grid, dst, k0, self.next_k, nk);
        self.next_k += nk;
        Ok(nk)
    }
}

/// Copies one window reversed around `src.size()`; degrees past the far end
/// come out as zeros.
fn reverse_window<F: Field>(
    dst: &mut MatPoly<F>,
    k0: usize,
    nk: usize,
    src: &MatPoly<F>,
    next_k: usize,
) {
    let d: usize = src.size();
    let field: F = src.field().clone();
    for i in 0..src.nrows() {
        for j in 0..src.ncols() {
            for t in 0..nk {
                *dst.coeff_mut(i, j, k0 + t) = if next_k + t < d {
                    src.coeff(i, j, d - 1 - next_k - t)
                } else {
                    field.zero()
                };
            }
        }
    }
}

/// Reads the generator back to front: coefficient `k` of the stream is
/// coefficient `size - 1 - k` of the source.
pub struct GatherReverse<'m, 'g, F: Field, C: Comm> {
    src: &'m MatPoly<F>,
    grid: &'g Grid<C>,
    next_k: usize,
}

impl<'m, 'g, F: Field, C: Comm> GatherReverse<'m, 'g, F, C> {
    pub fn new(grid: &'g Grid<C>, src: &'m MatPoly<F>) -> GatherReverse<'m, 'g, F, C> {
        GatherReverse {
            src,
            grid,
            next_k: 0,
        }
    }
}

impl<'m, 'g, F: Field, C: Comm> StreamInfo<F> for GatherReverse<'m, 'g, F, C> {
    fn field(&self) -> &F {
        self.src.field()
    }

    fn nrows(&self) -> usize {
        self.src.nrows()
    }

    fn ncols(&self) -> usize {
        self.src.ncols()
    }

    fn guessed_length(&self) -> usize {
        self.src.size()
    }
}

impl<'m, 'g, F: Field, C: Comm> CoeffRead<F> for GatherReverse<'m, 'g, F, C> {
    fn read(&mut self, dst: &mut MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        assert_eq!(k0 % F::SIMD, 0);
        assert_eq!(k1 % F::SIMD, 0);
        assert_eq!(self.next_k % F::SIMD, 0);
        let mut nk: u64 = 0;
        if self.grid.is_root() {
            assert!(k1 <= dst.size());
            let want: usize = k1.min(dst.size()) - k0;
            nk = want.min(self.src.size() - self.next_k) as u64;
            reverse_window(dst, k0, nk as usize, self.src, self.next_k);
        }
        let nk: usize = self.grid.world().bcast_u64(0, nk) as usize;
        self.next_k += nk;
        Ok(nk)
    }
}

/// Reversed read over a grid-sharded generator: the needed window is
/// gathered to the root, then reversed there.
pub struct GatherReverseGrid<'m, 'g, F: Field, C: Comm> {
    src: &'m GridMatPoly<F>,
    grid: &'g Grid<C>,
    next_k: usize,
}

impl<'m, 'g, F: Field, C: Comm> GatherReverseGrid<'m, 'g, F, C> {
    pub fn new(grid: &'g Grid<C>, src: &'m GridMatPoly<F>) -> GatherReverseGrid<'m, 'g, F, C> {
        GatherReverseGrid {
            src,
            grid,
            next_k: 0,
        }
    }
}

impl<'m, 'g, F: Field, C: Comm> StreamInfo<F> for GatherReverseGrid<'m, 'g, F, C> {
    fn field(&self) -> &F {
        self.src.field()
    }

    fn nrows(&self) -> usize {
        self.src.nrows()
    }

    fn ncols(&self) -> usize {
        self.src.ncols()
    }

    fn guessed_length(&self) -> usize {
        self.src.size()
    }
}

impl<'m, 'g, F: Field, C: Comm> CoeffRead<F> for GatherReverseGrid<'m, 'g, F, C> {
    fn read(&mut self, dst: &mut MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        assert_eq!(k0 % F::SIMD, 0);
        assert_eq!(k1 % F::SIMD, 0);
        let mut nk: u64 = 0;
        if self.grid.is_root() {
            assert!(k1 <= dst.size());
            let want: usize = k1.min(dst.size()) - k0;
            nk = want.min(self.src.size() - self.next_k) as u64;
        }
        let nk: usize = self.grid.world().bcast_u64(0, nk) as usize;

        // window of the source the reversal needs, identical at all ranks
        // since the size metadata is shared
        let d: usize = self.src.size();
        let rk1: usize = d.saturating_sub(self.next_k);
        let rk0: usize = rk1.saturating_sub(nk);
        let n_rk: usize = rk1 - rk0;
        let field: F = self.src.field().clone();
        let mut tpi: MatPoly<F> =
            MatPoly::new(field, self.src.nrows(), self.src.ncols(), F::SIMD * iceildiv(n_rk, F::SIMD));
        tpi.zero_pad(F::SIMD * iceildiv(n_rk, F::SIMD));
        self.src.gather_partial(self.grid, &mut tpi, 0, rk0, n_rk);

        if self.grid.is_root() {
            tpi.set_size(n_rk);
            reverse_window(dst, k0, nk, &tpi, 0);
        }
        self.next_k += nk;
        Ok(nk)
    }
}

/// Writes a single on-disk file, opened lazily at the first window.
pub struct FileOutput<'g, F: Field, C: Comm> {
    field: F,
    grid: &'g Grid<C>,
    nrows: usize,
    ncols: usize,
    path: PathBuf,
    ascii: bool,
    writer: Option<BufWriter<File>>,
    done_open: bool,
}

impl<'g, F: Field, C: Comm> FileOutput<'g, F, C> {
    pub fn new(
        grid: &'g Grid<C>,
        field: F,
        nrows: usize,
        ncols: usize,
        path: impl AsRef<Path>,
        ascii: bool,
    ) -> FileOutput<'g, F, C> {
        FileOutput {
            field,
            grid,
            nrows,
            ncols,
            path: path.as_ref().to_path_buf(),
            ascii,
            writer: None,
            done_open: false,
        }
    }

    fn open_file(&mut self) -> Result<()> {
        if self.grid.is_root() {
            self.writer = Some(BufWriter::new(File::create(&self.path)?));
        }
        self.done_open = true;
        Ok(())
    }
}

impl<'g, F: Field, C: Comm> StreamInfo<F> for FileOutput<'g, F, C> {
    fn field(&self) -> &F {
        &self.field
    }

    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }

    fn average_matsize(&self) -> f64 {
        if self.ascii {
            (self.nrows * self.ncols) as f64
                * (self.field.elt_bytes() as f64 * ASCII_DIGITS_PER_BYTE + 1.0)
        } else {
            (self.nrows * self.ncols * self.field.elt_bytes()) as f64
        }
    }
}

impl<'g, F: Field, C: Comm> CoeffWrite<F> for FileOutput<'g, F, C> {
    fn write(&mut self, src: &MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        if !self.done_open {
            self.open_file()?;
        }
        let mut nk: u64 = 0;
        if let Some(writer) = self.writer.as_mut() {
            nk = matpoly_write(&self.field, writer, src, k0, k1, self.ascii)? as u64;
        }
        Ok(self.grid.world().bcast_u64(0, nk) as usize)
    }
}

/// Writes one file per splitwidth×splitwidth sub-block of rows and columns.
/// The pattern's four `{}` placeholders receive the row and column ranges.
pub struct SplitFileOutput<'g, F: Field, C: Comm> {
    field: F,
    grid: &'g Grid<C>,
    nrows: usize,
    ncols: usize,
    pattern: String,
    ascii: bool,
    splitwidth: usize,
    writers: Vec<BufWriter<File>>,
    done_open: bool,
}

impl<'g, F: Field, C: Comm> SplitFileOutput<'g, F, C> {
    pub fn new(
        grid: &'g Grid<C>,
        field: F,
        nrows: usize,
        ncols: usize,
        pattern: impl Into<String>,
        ascii: bool,
    ) -> SplitFileOutput<'g, F, C> {
        SplitFileOutput {
            field,
            grid,
            nrows,
            ncols,
            pattern: pattern.into(),
            ascii,
            splitwidth: F::SIMD.max(1),
            writers: Vec::new(),
            done_open: false,
        }
    }

    fn open_files(&mut self) -> Result<()> {
        assert!(!self.done_open);
        if self.grid.is_root() {
            for i in (0..self.nrows).step_by(self.splitwidth) {
                for j in (0..self.ncols).step_by(self.splitwidth) {
                    let name: String = format_pattern(
                        &self.pattern,
                        [i, i + self.splitwidth, j, j + self.splitwidth],
                    );
                    self.writers.push(BufWriter::new(File::create(&name)?));
                }
            }
        }
        self.done_open = true;
        Ok(())
    }
}

fn format_pattern(pattern: &str, values: [usize; 4]) -> String {
    let mut out: String = pattern.to_string();
    for v in values {
        if let Some(pos) = out.find("{}") {
            out.replace_range(pos..pos + 2, &v.to_string());
        }
    }
    out
}

impl<'g, F: Field, C: Comm> StreamInfo<F> for SplitFileOutput<'g, F, C> {
    fn field(&self) -> &F {
        &self.field
    }

    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }
}

impl<'g, F: Field, C: Comm> CoeffWrite<F> for SplitFileOutput<'g, F, C> {
    fn write(&mut self, src: &MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        if !self.done_open {
            self.open_files()?;
        }
        let mut nk: u64 = 0;
        if self.grid.is_root() {
            nk = matpoly_write_split(
                &self.field,
                &mut self.writers,
                src,
                k0,
                k1,
                self.ascii,
                self.splitwidth,
            )? as u64;
        }
        Ok(self.grid.world().bcast_u64(0, nk) as usize)
    }
}

/// Output endpoint that persists nothing and accumulates a digest of
/// everything written, for result verification.
pub struct ChecksumOutput<'g, F: Field, C: Comm> {
    field: F,
    grid: &'g Grid<C>,
    nrows: usize,
    ncols: usize,
    who: String,
    hasher: Sha256,
    written: u64,
}

impl<'g, F: Field, C: Comm> ChecksumOutput<'g, F, C> {
    pub fn new(
        grid: &'g Grid<C>,
        field: F,
        nrows: usize,
        ncols: usize,
        who: impl Into<String>,
    ) -> ChecksumOutput<'g, F, C> {
        ChecksumOutput {
            field,
            grid,
            nrows,
            ncols,
            who: who.into(),
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Hex digest of everything written so far.
    pub fn hex_digest(&self) -> String {
        let digest = self.hasher.clone().finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl<'g, F: Field, C: Comm> Drop for ChecksumOutput<'g, F, C> {
    fn drop(&mut self) {
        if self.written > 0 && self.grid.is_root() {
            info!("checksum({}): {}", self.who, self.hex_digest());
        }
    }
}

impl<'g, F: Field, C: Comm> StreamInfo<F> for ChecksumOutput<'g, F, C> {
    fn field(&self) -> &F {
        &self.field
    }

    fn nrows(&self) -> usize {
        self.nrows
    }

    fn ncols(&self) -> usize {
        self.ncols
    }
}

impl<'g, F: Field, C: Comm> CoeffWrite<F> for ChecksumOutput<'g, F, C> {
    fn write(&mut self, src: &MatPoly<F>, k0: usize, k1: usize) -> Result<usize> {
        assert_eq!(k0 % F::SIMD, 0);
        let mut buf: Vec<u8> = Vec::new();
        if self.grid.is_root() {
            for i in 0..src.nrows() {
                for j in 0..src.ncols() {
                    buf.clear();
                    self.field.pack(&src.part_head(i, j, k0)[..k1 - k0], &mut buf);
                    self.hasher.update(&buf);
                }
            }
        }
        self.written += (self.nrows * self.ncols * (k1 - k0) * self.field.elt_bytes()) as u64;
        Ok(k1 - k0)
    }
}
