use std::fmt;
use std::io;

use sampling::source::Source;

/// Scalar and bulk arithmetic over a finite field.
///
/// The field object is cheap to clone and is carried by every container
/// that holds coefficients, so that kernels never need a side channel to
/// find their arithmetic.
pub trait Field: Clone + Send + Sync + 'static {
    type Elt: Copy + PartialEq + Eq + fmt::Debug + Send + Sync + 'static;

    /// Packing width: every stream window boundary must be a multiple of
    /// this many coefficients.
    const SIMD: usize;

    fn zero(&self) -> Self::Elt;
    fn one(&self) -> Self::Elt;
    fn add(&self, a: Self::Elt, b: Self::Elt) -> Self::Elt;
    fn sub(&self, a: Self::Elt, b: Self::Elt) -> Self::Elt;
    fn mul(&self, a: Self::Elt, b: Self::Elt) -> Self::Elt;
    fn neg(&self, a: Self::Elt) -> Self::Elt;
    fn is_zero(&self, a: Self::Elt) -> bool;

    /// Multiplicative inverse, or `None` when `a` is not a unit. Callers
    /// decide whether a non-unit is an error or just a rejected candidate.
    fn inv(&self, a: Self::Elt) -> Option<Self::Elt>;

    /// Packed size of one element on disk and on the wire.
    fn elt_bytes(&self) -> usize;

    fn vec_zero(&self, dst: &mut [Self::Elt]) {
        dst.fill(self.zero());
    }

    fn vec_set(&self, dst: &mut [Self::Elt], src: &[Self::Elt]) {
        dst.copy_from_slice(src);
    }

    fn vec_add(&self, dst: &mut [Self::Elt], src: &[Self::Elt]) {
        for (d, s) in dst.iter_mut().zip(src.iter()) {
            *d = self.add(*d, *s);
        }
    }

    /// Appends the packed encoding of `src` to `out`.
    fn pack(&self, src: &[Self::Elt], out: &mut Vec<u8>);

    /// Decodes `dst.len()` packed elements from `bytes`.
    fn unpack(&self, bytes: &[u8], dst: &mut [Self::Elt]) -> io::Result<()>;

    fn format_elt(&self, a: Self::Elt) -> String;

    fn parse_elt(&self, s: &str) -> Option<Self::Elt>;

    fn sample(&self, source: &mut Source) -> Self::Elt;
}

/// Transform-domain multiplication contract the cache is built on.
///
/// A plan fixes the transform geometry for one product of operand lengths
/// `(la, lb)`; its allocation-size triple is what the memory budget is
/// charged against. `idft` takes an arbitrary output window so that the
/// same kernel serves full products and middle products.
pub trait Convolve: Field {
    type Plan: Clone + Send + Sync;

    fn plan(&self, la: usize, lb: usize) -> Self::Plan;

    /// Transform buffer length, in elements, for one polynomial.
    fn transform_len(&self, plan: &Self::Plan) -> usize;

    /// (forward, pointwise-product, inverse) allocation sizes in bytes.
    fn alloc_sizes(&self, plan: &Self::Plan) -> [usize; 3];

    /// Forward transform of `src` (zero-padded) into `dst`, whose length
    /// must be `transform_len(plan)`.
    fn dft(&self, plan: &Self::Plan, dst: &mut [Self::Elt], src: &[Self::Elt]);

    /// `acc += a * b` in the transform domain.
    fn mul_add(&self, plan: &Self::Plan, acc: &mut [Self::Elt], a: &[Self::Elt], b: &[Self::Elt]);

    /// Writes product coefficients `[k0, k0 + dst.len())` into `dst`,
    /// zero-filling past the end of the product.
    fn idft(&self, plan: &Self::Plan, dst: &mut [Self::Elt], src: &[Self::Elt], k0: usize);
}

#[derive(thiserror::Error, Debug)]
pub enum ModulusError {
    #[error("modulus {0} is too small")]
    TooSmall(u64),
    #[error("modulus {0} is not prime")]
    NotPrime(u64),
}
