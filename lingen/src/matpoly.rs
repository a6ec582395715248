use std::io;

use arith::Field;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sampling::source::Source;

use crate::iceildiv;

/// Dense matrix of coefficient sequences over a field.
///
/// Entry (i, j) is a polynomial stored contiguously with `alloc` reserved
/// coefficients, of which the first `size` are in use. Coefficients at
/// index `size` and beyond are logically zero; [`MatPoly::zero_pad`] is the
/// only way to extend `size`, and it zero-fills what it exposes.
#[derive(Debug)]
pub struct MatPoly<F: Field> {
    field: F,
    nrows: usize,
    ncols: usize,
    size: usize,
    alloc: usize,
    data: Vec<F::Elt>,
}

impl<F: Field> MatPoly<F> {
    pub fn new(field: F, nrows: usize, ncols: usize, len: usize) -> MatPoly<F> {
        let alloc: usize = F::SIMD * iceildiv(len, F::SIMD);
        let zero = field.zero();
        MatPoly {
            data: vec![zero; nrows * ncols * alloc],
            field,
            nrows,
            ncols,
            size: 0,
            alloc,
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

    pub fn alloc(&self) -> usize {
        self.alloc
    }

    #[inline]
    fn entry_index(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.nrows && j < self.ncols);
        (i * self.ncols + j) * self.alloc
    }

    pub fn coeff(&self, i: usize, j: usize, k: usize) -> F::Elt {
        debug_assert!(k < self.alloc);
        self.data[self.entry_index(i, j) + k]
    }

    pub fn coeff_mut(&mut self, i: usize, j: usize, k: usize) -> &mut F::Elt {
        debug_assert!(k < self.alloc);
        let idx: usize = self.entry_index(i, j) + k;
        &mut self.data[idx]
    }

    /// Coefficients `[0, size)` of entry (i, j).
    pub fn part(&self, i: usize, j: usize) -> &[F::Elt] {
        let idx: usize = self.entry_index(i, j);
        &self.data[idx..idx + self.size]
    }

    /// Coefficients of entry (i, j) from degree `k` up to the allocation
    /// limit; the caller bounds the run it actually touches.
    pub fn part_head(&self, i: usize, j: usize, k: usize) -> &[F::Elt] {
        debug_assert!(k <= self.alloc);
        let idx: usize = self.entry_index(i, j);
        &self.data[idx + k..idx + self.alloc]
    }

    pub fn part_head_mut(&mut self, i: usize, j: usize, k: usize) -> &mut [F::Elt] {
        debug_assert!(k <= self.alloc);
        let idx: usize = self.entry_index(i, j);
        &mut self.data[idx + k..idx + self.alloc]
    }

    fn realloc(&mut self, new_alloc: usize) {
        let new_alloc: usize = F::SIMD * iceildiv(new_alloc, F::SIMD);
        let zero = self.field.zero();
        let mut data: Vec<F::Elt> = vec![zero; self.nrows * self.ncols * new_alloc];
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                let src: usize = (i * self.ncols + j) * self.alloc;
                let dst: usize = (i * self.ncols + j) * new_alloc;
                let keep: usize = self.size.min(new_alloc);
                data[dst..dst + keep].copy_from_slice(&self.data[src..src + keep]);
            }
        }
        self.data = data;
        self.alloc = new_alloc;
    }

    /// Extends the used length to `new_size`, zero-filling the exposed
    /// coefficients. Shrinking is not allowed here; use
    /// [`MatPoly::truncate`].
    pub fn zero_pad(&mut self, new_size: usize) {
        assert!(
            new_size >= self.size,
            "zero_pad cannot shrink: {} < {}",
            new_size,
            self.size
        );
        if new_size > self.alloc {
            self.realloc(new_size.max(2 * self.alloc));
        }
        let zero = self.field.zero();
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                let idx: usize = (i * self.ncols + j) * self.alloc;
                self.data[idx + self.size..idx + new_size].fill(zero);
            }
        }
        self.size = new_size;
    }

    /// Adjusts the used length without touching payload; `size` may only
    /// move within what a prior `zero_pad` exposed.
    pub fn set_size(&mut self, size: usize) {
        assert!(size <= self.alloc);
        self.size = size;
    }

    pub fn truncate(&mut self, size: usize) {
        assert!(size <= self.size);
        self.size = size;
    }

    /// Resets to an empty polynomial and re-exposes `len` zero coefficients.
    pub fn reset(&mut self, len: usize) {
        self.size = 0;
        self.zero_pad(len);
    }

    pub fn clear(&mut self) {
        self.size = 0;
    }

    /// Copies coefficient `ksrc` of column `jsrc` of `src` into coefficient
    /// `kdst` of column `jdst`, all rows at once.
    pub fn extract_column(
        &mut self,
        jdst: usize,
        kdst: usize,
        src: &MatPoly<F>,
        jsrc: usize,
        ksrc: usize,
    ) {
        assert_eq!(self.nrows, src.nrows);
        for i in 0..self.nrows {
            *self.coeff_mut(i, jdst, kdst) = src.coeff(i, jsrc, ksrc);
        }
    }

    /// Drops the first `k` coefficients of every entry, shifting the rest
    /// down. Used to advance lookahead caches.
    pub fn rshift(&mut self, k: usize) {
        assert!(k <= self.size);
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                let idx: usize = self.entry_index(i, j);
                self.data.copy_within(idx + k..idx + self.size, idx);
            }
        }
        self.size -= k;
    }

    /// The used length once trailing all-zero coefficients are stripped.
    pub fn get_true_nonzero_size(&self) -> usize {
        for k in (0..self.size).rev() {
            for i in 0..self.nrows {
                for j in 0..self.ncols {
                    if !self.field.is_zero(self.coeff(i, j, k)) {
                        return k + 1;
                    }
                }
            }
        }
        0
    }

    pub fn fill_random(&mut self, k0: usize, k1: usize, source: &mut Source) {
        assert!(k1 <= self.size);
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                for k in k0..k1 {
                    *self.coeff_mut(i, j, k) = self.field.sample(source);
                }
            }
        }
    }

    /// Schoolbook product, the reference the cached multiply must agree
    /// with.
    pub fn mul_basecase(a: &MatPoly<F>, b: &MatPoly<F>) -> MatPoly<F> {
        assert_eq!(a.ncols, b.nrows);
        let field: F = a.field.clone();
        let csize: usize = if a.size == 0 || b.size == 0 {
            0
        } else {
            a.size + b.size - 1
        };
        let mut c: MatPoly<F> = MatPoly::new(field.clone(), a.nrows, b.ncols, csize);
        c.zero_pad(csize);
        for i in 0..a.nrows {
            for j in 0..b.ncols {
                for l in 0..a.ncols {
                    for ka in 0..a.size {
                        let x = a.coeff(i, l, ka);
                        if field.is_zero(x) {
                            continue;
                        }
                        for kb in 0..b.size {
                            let t = field.mul(x, b.coeff(l, j, kb));
                            let cur = c.coeff(i, j, ka + kb);
                            *c.coeff_mut(i, j, ka + kb) = field.add(cur, t);
                        }
                    }
                }
            }
        }
        c
    }
}

pub trait WriterTo {
    fn write_to<W: io::Write>(&self, writer: &mut W) -> io::Result<()>;
}

pub trait ReaderFrom {
    fn read_from<R: io::Read>(&mut self, reader: &mut R) -> io::Result<()>;
}

impl<F: Field> WriterTo for MatPoly<F> {
    fn write_to<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.nrows as u64)?;
        writer.write_u64::<LittleEndian>(self.ncols as u64)?;
        writer.write_u64::<LittleEndian>(self.size as u64)?;
        let mut buf: Vec<u8> = Vec::new();
        for i in 0..self.nrows {
            for j in 0..self.ncols {
                buf.clear();
                self.field.pack(self.part(i, j), &mut buf);
                writer.write_all(&buf)?;
            }
        }
        Ok(())
    }
}

impl<F: Field> ReaderFrom for MatPoly<F> {
    fn read_from<R: io::Read>(&mut self, reader: &mut R) -> io::Result<()> {
        let nrows: usize = reader.read_u64::<LittleEndian>()? as usize;
        let ncols: usize = reader.read_u64::<LittleEndian>()? as usize;
        let size: usize = reader.read_u64::<LittleEndian>()? as usize;
        if nrows != self.nrows || ncols != self.ncols {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "dimension mismatch: have {}x{}, stream says {}x{}",
                    self.nrows, self.ncols, nrows, ncols
                ),
            ));
        }
        self.clear();
        self.zero_pad(size);
        let nb: usize = self.field.elt_bytes();
        let mut buf: Vec<u8> = vec![0u8; size * nb];
        for i in 0..nrows {
            for j in 0..ncols {
                reader.read_exact(&mut buf)?;
                let field: F = self.field.clone();
                field.unpack(&buf, &mut self.part_head_mut(i, j, 0)[..size])?;
            }
        }
        Ok(())
    }
}
