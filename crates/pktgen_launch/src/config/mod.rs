//! Configuration units, variable substitution and unit discovery

mod config_unit;
mod discovery;
mod substitution;

pub use config_unit::*;
pub use discovery::*;
pub use substitution::*;
