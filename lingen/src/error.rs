use std::path::PathBuf;

/// Failure conditions of the streaming pipeline.
///
/// Dimension disagreements, misaligned windows and mismatched mesh shapes
/// are caller bugs and assert instead; they must fail identically at every
/// worker. `BudgetExceeded` is the one recoverable variant: the multiply
/// driver catches it once, relaxes the budget and retries.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("short write to output stream")]
    ShortWrite,

    #[error("{path}: {bytes} bytes is not a multiple of the {matsize}-byte coefficient size")]
    BadFileSize {
        path: PathBuf,
        bytes: u64,
        matsize: u64,
    },

    #[error(
        "insufficient data: found {found} independent columns out of {needed} \
         after consuming {consumed} coefficients"
    )]
    InsufficientData {
        needed: usize,
        found: usize,
        consumed: usize,
    },

    #[error("transform cache budget exceeded: need {needed} bytes, {available} available")]
    BudgetExceeded { needed: usize, available: usize },

    #[error("cannot rebuild the solution columns: found {found} usable columns, need {needed}")]
    TooFewSolutions { found: usize, needed: usize },

    #[error("found a factor of the modulus: {factor}")]
    FactorOfModulus { factor: String },
}

pub type Result<T> = std::result::Result<T, Error>;
