//! DPDK application launcher
//!
//! Turns declarative `.cfg` units into a complete command line for a DPDK
//! application such as Pktgen, and prepares the host before the first run:
//! huge pages on every NUMA socket, the UIO/VFIO driver module and the
//! binding of network devices to that driver.
//!
//! # Overview
//!
//! - `run` resolves the application binary and assembles its arguments in
//!   a fixed order: `exec` prefix, `LD_LIBRARY_PATH`, binary, EAL flags,
//!   `--`, application flags
//! - `setup` reserves huge pages, reloads the driver module and binds the
//!   listed devices
//! - `list` prints every unit found under the search root
//!
//! Values may reference `%(sdk)s`, `%(target)s`, `%(pktgen_sdk)s` and
//! `%(app_name)s`; `sdk` and `target` come from `RTE_SDK` and `RTE_TARGET`.
//!
//! # Example Unit
//!
//! ```yaml
//! description: "A Pktgen default simple configuration"
//!
//! setup:
//!   exec: [sudo, -E]
//!   devices: ["81:00.0", "81:00.1"]
//!   uio: igb_uio
//!
//! run:
//!   exec: [sudo, -E]
//!   app_name: pktgen
//!   app_path:
//!     - "./app/%(target)s/%(app_name)s"
//!     - "%(sdk)s/%(target)s/app/%(app_name)s"
//!   cores: "14,15-22"
//!   nrank: 4
//!   proc: auto
//!   log: 7
//!   prefix: pg
//!   opts: [-T, -P]
//!   map: ["[15:16].0", "[17:18].1"]
//!   theme: themes/black-yellow.theme
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod runtime;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use cli::{Invocation, LaunchArgs};
pub use config::{
    find_unit, list_units, ConfigError, ConfigUnit, OptionGroup, OptionValue, SubstitutionError,
    UnitListing, UnitSummary, VariableNamespace,
};
pub use error::{Error, Result};
pub use runtime::{
    ArgumentAssembler, ArgumentVector, AssembleError, CommandError, CommandOutcome,
    CommandRunner, LaunchContext, LaunchOutcome, LaunchState, Launcher, PathResolver,
    Privilege, ProvisionError, ProvisionReport, Provisioner, ProvisioningPlan, SystemCommand,
    SystemRunner,
};
