//! Crate-level error type

use crate::config::{ConfigError, SubstitutionError};
use crate::runtime::{AssembleError, CommandError, ProvisionError};

/// Any fatal failure of a run or setup invocation
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Substitution(#[from] SubstitutionError),

    #[error(transparent)]
    Assemble(#[from] AssembleError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

pub type Result<T> = std::result::Result<T, Error>;
