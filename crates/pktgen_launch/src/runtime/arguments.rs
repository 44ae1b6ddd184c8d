//! Argument vector assembly for the `run` group
//!
//! The vector is built in fixed sections:
//!
//! ```text
//! [exec...] [LD_LIBRARY_PATH=...] <app> [platform flags...] -- [app flags...]
//! ```
//!
//! Every declared value is one token. Values are substituted but never split
//! on whitespace.

use crate::config::{OptionGroup, SubstitutionError, VariableNamespace};
use crate::runtime::resolver::{PathResolver, ResolveError};
use std::fmt;

/// Token separating platform options from application options
pub const SEPARATOR: &str = "--";

/// Base of the synthesized `LD_LIBRARY_PATH` token
pub const LD_PATH_BASE: &str = "%(sdk)s/%(target)s/lib";

/// Platform (EAL) options in emission order
pub const PLATFORM_OPTIONS: &[(&str, &str)] = &[
    ("cores", "-l"),
    ("nrank", "-n"),
    ("proc", "--proc-type"),
    ("log", "--log-level"),
    ("prefix", "--file-prefix"),
    ("blacklist", "-b"),
    ("whitelist", "-w"),
    ("vdev", "--vdev"),
    ("plugin", "-d"),
];

/// Application options in emission order; `None` means unflagged
pub const APP_OPTIONS: &[(&str, Option<&str>)] = &[
    ("opts", None),
    ("map", Some("-m")),
    ("pcap", Some("-s")),
    ("theme", Some("-f")),
    ("loadfile", Some("-f")),
    ("logfile", Some("-l")),
];

/// Ordered tokens of the final invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentVector(Vec<String>);

impl ArgumentVector {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }

    /// Index of the platform/application separator
    pub fn separator_index(&self) -> Option<usize> {
        self.0.iter().position(|t| t == SEPARATOR)
    }

    /// Index of a token, searching from the start
    pub fn position(&self, token: &str) -> Option<usize> {
        self.0.iter().position(|t| t == token)
    }
}

impl fmt::Display for ArgumentVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

/// Argument vector with the application binary still unresolved
#[derive(Debug, Clone)]
pub struct ArgumentPlan {
    pub app_name: String,
    /// `exec` and `LD_LIBRARY_PATH` tokens
    pub prefix: Vec<String>,
    /// Unsubstituted `app_path` templates, in search order
    pub app_path: Vec<String>,
    /// Everything after the binary, separator included
    pub options: Vec<String>,
}

impl ArgumentPlan {
    /// Resolve the binary and produce the final vector
    pub fn resolve(self, resolver: &PathResolver<'_>) -> Result<ArgumentVector, AssembleError> {
        let binary = resolver.resolve(&self.app_path).map_err(|e| match e {
            ResolveError::NotFound { attempted } => AssembleError::BinaryNotFound {
                app_name: self.app_name.clone(),
                attempted,
            },
            ResolveError::Substitution(e) => AssembleError::Substitution {
                context: "run.app_path".to_string(),
                source: e,
            },
        })?;

        let mut tokens = self.prefix;
        tokens.push(binary.to_string_lossy().into_owned());
        tokens.extend(self.options);
        Ok(ArgumentVector(tokens))
    }
}

/// Builds the argument vector from a `run` group
pub struct ArgumentAssembler<'a> {
    group: &'a OptionGroup,
    namespace: &'a VariableNamespace,
}

impl<'a> ArgumentAssembler<'a> {
    pub fn new(group: &'a OptionGroup, namespace: &'a VariableNamespace) -> Self {
        Self { group, namespace }
    }

    /// Build every section except the binary path
    pub fn plan(&self) -> Result<ArgumentPlan, AssembleError> {
        let app_name = self
            .group
            .first("app_name")
            .ok_or(AssembleError::MissingRequiredField("app_name"))?;
        let app_path = self
            .group
            .normalize("app_path")
            .ok_or(AssembleError::MissingRequiredField("app_path"))?;

        let mut prefix = self.values("exec")?.unwrap_or_default();
        if let Some(entries) = self.values("ld_path")? {
            let base = self.substitute("ld_path", LD_PATH_BASE)?;
            let joined = std::iter::once(base)
                .chain(entries)
                .collect::<Vec<_>>()
                .join(":");
            prefix.push(format!("LD_LIBRARY_PATH={}", joined));
        }

        let mut options = Vec::new();
        for (key, flag) in PLATFORM_OPTIONS {
            self.push_flagged(&mut options, key, Some(*flag))?;
        }
        options.push(SEPARATOR.to_string());
        for (key, flag) in APP_OPTIONS {
            self.push_flagged(&mut options, key, *flag)?;
        }

        Ok(ArgumentPlan {
            app_name,
            prefix,
            app_path,
            options,
        })
    }

    /// Build the plan and resolve the binary in one step
    pub fn assemble(&self, resolver: &PathResolver<'_>) -> Result<ArgumentVector, AssembleError> {
        self.plan()?.resolve(resolver)
    }

    fn push_flagged(
        &self,
        tokens: &mut Vec<String>,
        key: &str,
        flag: Option<&str>,
    ) -> Result<(), AssembleError> {
        for value in self.values(key)?.unwrap_or_default() {
            if let Some(flag) = flag {
                tokens.push(flag.to_string());
            }
            tokens.push(value);
        }
        Ok(())
    }

    fn values(&self, key: &str) -> Result<Option<Vec<String>>, AssembleError> {
        self.group
            .substituted(key, self.namespace)
            .map_err(|e| AssembleError::Substitution {
                context: format!("run.{}", key),
                source: e,
            })
    }

    fn substitute(&self, key: &str, value: &str) -> Result<String, AssembleError> {
        self.namespace
            .substitute(value)
            .map_err(|e| AssembleError::Substitution {
                context: format!("run.{}", key),
                source: e,
            })
    }
}

/// Errors that can occur while assembling arguments
#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("'{0}' is missing from the run group")]
    MissingRequiredField(&'static str),

    #[error("Substitution failed in {context}: {source}")]
    Substitution {
        context: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Unable to locate application {app_name} (tried: {})", .attempted.join(", "))]
    BinaryNotFound {
        app_name: String,
        attempted: Vec<String>,
    },
}
