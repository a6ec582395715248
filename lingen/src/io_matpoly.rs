use std::io::{self, BufRead, Write};

use arith::Field;

use crate::MatPoly;

/// Reads up to `k1 - k0` coefficients from `reader` into `dst` starting at
/// degree `k0`, returning how many complete coefficients were read. Clean
/// end of input mid-window yields a short count; a truncated coefficient is
/// an error.
pub fn matpoly_read<F: Field, R: BufRead>(
    field: &F,
    reader: &mut R,
    dst: &mut MatPoly<F>,
    k0: usize,
    k1: usize,
    ascii: bool,
) -> io::Result<usize> {
    let (m, n) = (dst.nrows(), dst.ncols());
    let nb: usize = m * n * field.elt_bytes();
    let mut buf: Vec<u8> = vec![0u8; nb];
    let mut elts: Vec<F::Elt> = vec![field.zero(); m * n];
    for k in k0..k1 {
        if ascii {
            for (idx, e) in elts.iter_mut().enumerate() {
                match read_token(reader)? {
                    None => {
                        if idx == 0 {
                            return Ok(k - k0);
                        }
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "input ends inside a coefficient",
                        ));
                    }
                    Some(tok) => {
                        *e = field.parse_elt(&tok).ok_or_else(|| {
                            io::Error::new(
                                io::ErrorKind::InvalidData,
                                format!("bad field element {:?}", tok),
                            )
                        })?;
                    }
                }
            }
        } else {
            match read_full(reader, &mut buf)? {
                0 => return Ok(k - k0),
                got if got == nb => field.unpack(&buf, &mut elts)?,
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "input ends inside a coefficient",
                    ));
                }
            }
        }
        for i in 0..m {
            for j in 0..n {
                *dst.coeff_mut(i, j, k) = elts[i * n + j];
            }
        }
    }
    Ok(k1 - k0)
}

/// Writes coefficients `[k0, k1)` of `src`, one coefficient at a time, row
/// major within a coefficient.
pub fn matpoly_write<F: Field, W: Write>(
    field: &F,
    writer: &mut W,
    src: &MatPoly<F>,
    k0: usize,
    k1: usize,
    ascii: bool,
) -> io::Result<usize> {
    let (m, n) = (src.nrows(), src.ncols());
    let mut buf: Vec<u8> = Vec::new();
    for k in k0..k1 {
        if ascii {
            for i in 0..m {
                let line: String = (0..n)
                    .map(|j| field.format_elt(src.coeff(i, j, k)))
                    .collect::<Vec<String>>()
                    .join(" ");
                writeln!(writer, "{}", line)?;
            }
        } else {
            buf.clear();
            for i in 0..m {
                for j in 0..n {
                    field.pack(&[src.coeff(i, j, k)], &mut buf);
                }
            }
            writer.write_all(&buf)?;
        }
    }
    Ok(k1 - k0)
}

/// One file per `splitwidth`×`splitwidth` sub-block of rows and columns,
/// in block-row-major file order.
pub fn matpoly_write_split<F: Field, W: Write>(
    field: &F,
    writers: &mut [W],
    src: &MatPoly<F>,
    k0: usize,
    k1: usize,
    ascii: bool,
    splitwidth: usize,
) -> io::Result<usize> {
    let (m, n) = (src.nrows(), src.ncols());
    let nbj: usize = n.div_ceil(splitwidth);
    for k in k0..k1 {
        for (fi, i0) in (0..m).step_by(splitwidth).enumerate() {
            for (fj, j0) in (0..n).step_by(splitwidth).enumerate() {
                let w: &mut W = &mut writers[fi * nbj + fj];
                for i in i0..(i0 + splitwidth).min(m) {
                    if ascii {
                        let line: String = (j0..(j0 + splitwidth).min(n))
                            .map(|j| field.format_elt(src.coeff(i, j, k)))
                            .collect::<Vec<String>>()
                            .join(" ");
                        writeln!(w, "{}", line)?;
                    } else {
                        let mut buf: Vec<u8> = Vec::new();
                        for j in j0..(j0 + splitwidth).min(n) {
                            field.pack(&[src.coeff(i, j, k)], &mut buf);
                        }
                        w.write_all(&buf)?;
                    }
                }
            }
        }
    }
    Ok(k1 - k0)
}

/// Reads exactly `buf.len()` bytes unless input ends first; returns how
/// many bytes were read.
fn read_full<R: BufRead>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut got: usize = 0;
    while got < buf.len() {
        match reader.read(&mut buf[got..])? {
            0 => break,
            nread => got += nread,
        }
    }
    Ok(got)
}

/// Next whitespace-delimited token, or `None` at end of input.
fn read_token<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut token: Vec<u8> = Vec::new();
    loop {
        let available: &[u8] = reader.fill_buf()?;
        if available.is_empty() {
            break;
        }
        let mut used: usize = 0;
        for &byte in available {
            if byte.is_ascii_whitespace() {
                if !token.is_empty() {
                    used += 1;
                    break;
                }
                used += 1;
            } else {
                token.push(byte);
                used += 1;
            }
        }
        let done: bool = !token.is_empty()
            && (used < available.len() || available[used - 1].is_ascii_whitespace());
        reader.consume(used);
        if done {
            break;
        }
    }
    if token.is_empty() {
        Ok(None)
    } else {
        Ok(Some(String::from_utf8_lossy(&token).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use arith::{Field, Fp64};
    use sampling::source::Source;

    use super::{matpoly_read, matpoly_write, matpoly_write_split};
    use crate::MatPoly;

    const P: u64 = 0xffffffff00000001;

    fn sample(field: Fp64, len: usize) -> MatPoly<Fp64> {
        let mut m: MatPoly<Fp64> = MatPoly::new(field, 2, 2, len);
        m.zero_pad(len);
        let mut source: Source = Source::new([11u8; 32]);
        m.fill_random(0, len, &mut source);
        m
    }

    #[test]
    fn both_encodings_round_trip() {
        let field: Fp64 = Fp64::new(P).unwrap();
        let src: MatPoly<Fp64> = sample(field, 5);
        for ascii in [false, true] {
            let mut bytes: Vec<u8> = Vec::new();
            assert_eq!(matpoly_write(&field, &mut bytes, &src, 0, 5, ascii).unwrap(), 5);

            let mut back: MatPoly<Fp64> = MatPoly::new(field, 2, 2, 5);
            back.zero_pad(5);
            let got: usize =
                matpoly_read(&field, &mut Cursor::new(&bytes), &mut back, 0, 5, ascii).unwrap();
            assert_eq!(got, 5);
            for i in 0..2 {
                for j in 0..2 {
                    assert_eq!(back.part(i, j), src.part(i, j));
                }
            }
        }
    }

    #[test]
    fn short_input_reports_partial_window() {
        let field: Fp64 = Fp64::new(P).unwrap();
        let src: MatPoly<Fp64> = sample(field, 3);
        for ascii in [false, true] {
            let mut bytes: Vec<u8> = Vec::new();
            matpoly_write(&field, &mut bytes, &src, 0, 3, ascii).unwrap();

            let mut back: MatPoly<Fp64> = MatPoly::new(field, 2, 2, 8);
            back.zero_pad(8);
            let got: usize =
                matpoly_read(&field, &mut Cursor::new(&bytes), &mut back, 0, 8, ascii).unwrap();
            assert_eq!(got, 3);
        }
    }

    #[test]
    fn split_write_covers_every_entry() {
        let field: Fp64 = Fp64::new(P).unwrap();
        let src: MatPoly<Fp64> = sample(field, 2);
        let mut files: Vec<Vec<u8>> = vec![Vec::new(); 4];
        matpoly_write_split(&field, &mut files, &src, 0, 2, false, 1).unwrap();
        let nb: usize = field.elt_bytes();
        for (fi, file) in files.iter().enumerate() {
            assert_eq!(file.len(), 2 * nb);
            let (i, j) = (fi / 2, fi % 2);
            let mut got: Vec<u64> = vec![0; 2];
            field.unpack(&file[..nb], &mut got[..1]).unwrap();
            field.unpack(&file[nb..], &mut got[1..]).unwrap();
            assert_eq!(got, vec![src.coeff(i, j, 0), src.coeff(i, j, 1)]);
        }
    }
}
