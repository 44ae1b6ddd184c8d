//! Host provisioning, command assembly and process execution

pub mod arguments;
pub mod command;
pub mod context;
pub mod launcher;
pub mod provision;
pub mod resolver;

pub use arguments::*;
pub use command::*;
pub use context::*;
pub use launcher::*;
pub use provision::*;
pub use resolver::*;
