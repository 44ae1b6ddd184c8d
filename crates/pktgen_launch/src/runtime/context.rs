//! Per-invocation settings shared by the launcher and the provisioner

use crate::config::VariableNamespace;
use crate::runtime::command::Privilege;
use std::path::PathBuf;

/// Default root of the sysfs tree read for NUMA nodes
pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

/// Settings for one invocation, passed explicitly into every component
#[derive(Debug, Clone)]
pub struct LaunchContext {
    /// Print extra diagnostics
    pub verbose: bool,
    /// Build and print the command line without executing it
    pub norun: bool,
    /// Variables from the environment; `app_name` is bound per unit
    pub namespace: VariableNamespace,
    /// Directory relative `app_path` candidates are checked against and the
    /// application is started in
    pub work_dir: PathBuf,
    /// Root of the sysfs tree
    pub sysfs_root: PathBuf,
    /// How privileged commands are issued
    pub privilege: Privilege,
}

impl LaunchContext {
    pub fn new(namespace: VariableNamespace) -> Self {
        Self {
            verbose: false,
            norun: false,
            namespace,
            work_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            privilege: Privilege::detect(),
        }
    }

    /// Namespace with the unit's `app_name` bound, when it declares one
    pub fn namespace_for(&self, app_name: Option<String>) -> VariableNamespace {
        match app_name {
            Some(name) => self.namespace.clone().with_var("app_name", name),
            None => self.namespace.clone(),
        }
    }
}
