//! Variable namespace and `%(name)s` substitution

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Regex for placeholders: `%(name)s`, `%name` or the `%%` escape
static PLACEHOLDER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%(?:\((\w+)\)s|([A-Za-z_]\w*)|%)").unwrap());

/// Environment variable holding the DPDK SDK root
pub const SDK_ENV: &str = "RTE_SDK";
/// Environment variable holding the DPDK build target triple
pub const TARGET_ENV: &str = "RTE_TARGET";
/// Environment variable holding an out-of-tree Pktgen checkout
pub const PKTGEN_SDK_ENV: &str = "PKTGEN_SDK";
/// Value bound to `pktgen_sdk` when `PKTGEN_SDK` is unset
pub const UNSET_SENTINEL: &str = "none";

/// Variables available to option values and path templates.
///
/// Built once at startup and never mutated afterwards; binding the unit's
/// `app_name` produces a new namespace instead of changing this one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableNamespace {
    vars: HashMap<String, String>,
}

impl VariableNamespace {
    /// Create an empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the SDK variables from the process environment
    pub fn from_env() -> Result<Self, SubstitutionError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the namespace from an arbitrary variable lookup.
    ///
    /// `RTE_SDK` and `RTE_TARGET` are required and must be non-empty,
    /// `PKTGEN_SDK` falls back to [`UNSET_SENTINEL`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SubstitutionError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| SubstitutionError::EnvVarMissing(name.to_string()))
        };

        let sdk = required(SDK_ENV)?;
        let target = required(TARGET_ENV)?;
        let pktgen_sdk = lookup(PKTGEN_SDK_ENV)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| UNSET_SENTINEL.to_string());

        Ok(Self::new()
            .with_var("sdk", sdk)
            .with_var("target", target)
            .with_var("pktgen_sdk", pktgen_sdk))
    }

    /// Add a variable
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Substitute all placeholders in a string
    pub fn substitute(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut error: Option<SubstitutionError> = None;

        let result = PLACEHOLDER_PATTERN.replace_all(input, |caps: &Captures| {
            if error.is_some() {
                return String::new();
            }

            match self.resolve_capture(caps) {
                Ok(value) => value,
                Err(e) => {
                    error = Some(e);
                    String::new()
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        Ok(result.into_owned())
    }

    /// Substitute every element of a sequence, keeping its order
    pub fn substitute_all(&self, values: &[String]) -> Result<Vec<String>, SubstitutionError> {
        values.iter().map(|v| self.substitute(v)).collect()
    }

    fn resolve_capture(&self, caps: &Captures) -> Result<String, SubstitutionError> {
        let name = caps.get(1).or_else(|| caps.get(2));
        match name {
            Some(name) => self
                .get(name.as_str())
                .map(str::to_string)
                .ok_or_else(|| SubstitutionError::UndefinedVariable(name.as_str().to_string())),
            // `%%`
            None => Ok("%".to_string()),
        }
    }
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Set the {0} environment variable")]
    EnvVarMissing(String),
}
