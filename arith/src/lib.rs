mod field;
mod fp64;
mod ntt;

pub use field::*;
pub use fp64::*;
pub use ntt::*;
