//! First-match path resolution over ordered templates

use crate::config::{SubstitutionError, VariableNamespace};
use std::path::{Path, PathBuf};

/// Resolves path templates against a namespace and the filesystem
#[derive(Debug, Clone)]
pub struct PathResolver<'a> {
    namespace: &'a VariableNamespace,
    base_dir: &'a Path,
}

impl<'a> PathResolver<'a> {
    /// Relative candidates are checked against `base_dir`
    pub fn new(namespace: &'a VariableNamespace, base_dir: &'a Path) -> Self {
        Self {
            namespace,
            base_dir,
        }
    }

    /// Return the first candidate that exists, after substitution.
    ///
    /// Later candidates are never checked once one matches. The returned
    /// path is the substituted template itself, not joined to the base
    /// directory.
    pub fn resolve<S: AsRef<str>>(&self, candidates: &[S]) -> Result<PathBuf, ResolveError> {
        let mut attempted = Vec::with_capacity(candidates.len());

        for template in candidates {
            let candidate = self.namespace.substitute(template.as_ref())?;
            log::debug!("Trying {}", candidate);

            if self.base_dir.join(&candidate).exists() {
                log::info!("Found {}", candidate);
                return Ok(PathBuf::from(candidate));
            }
            attempted.push(candidate);
        }

        Err(ResolveError::NotFound { attempted })
    }
}

/// Errors that can occur while resolving a path
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Substitution(#[from] SubstitutionError),

    #[error("no candidate exists (tried: {})", .attempted.join(", "))]
    NotFound { attempted: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, rel: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "").unwrap();
    }

    #[test]
    fn test_first_match_wins() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a/pktgen");
        touch(dir.path(), "b/pktgen");
        let ns = VariableNamespace::new().with_var("app_name", "pktgen");
        let resolver = PathResolver::new(&ns, dir.path());

        let found = resolver.resolve(&["a/%(app_name)s", "b/%(app_name)s"]).unwrap();
        assert_eq!(found, PathBuf::from("a/pktgen"));
    }

    #[test]
    fn test_falls_through_to_later_candidate() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b/pktgen");
        let ns = VariableNamespace::new().with_var("app_name", "pktgen");
        let resolver = PathResolver::new(&ns, dir.path());

        let found = resolver.resolve(&["a/%(app_name)s", "b/%(app_name)s"]).unwrap();
        assert_eq!(found, PathBuf::from("b/pktgen"));
    }

    #[test]
    fn test_not_found_lists_all_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let ns = VariableNamespace::new().with_var("app_name", "pktgen");
        let resolver = PathResolver::new(&ns, dir.path());

        let err = resolver
            .resolve(&["a/%(app_name)s", "b/%(app_name)s"])
            .unwrap_err();
        match err {
            ResolveError::NotFound { attempted } => {
                assert_eq!(attempted, vec!["a/pktgen", "b/pktgen"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_absolute_candidate_ignores_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "tools/devbind.py");
        let abs = dir.path().join("tools/devbind.py");
        let ns = VariableNamespace::new();
        let base = Path::new("/nonexistent");
        let resolver = PathResolver::new(&ns, base);

        let found = resolver.resolve(&[abs.to_string_lossy()]).unwrap();
        assert_eq!(found, abs);
    }

    #[test]
    fn test_undefined_variable_propagates() {
        let ns = VariableNamespace::new();
        let resolver = PathResolver::new(&ns, Path::new("."));

        let err = resolver.resolve(&["%(sdk)s/tools/bind.py"]).unwrap_err();
        assert!(matches!(err, ResolveError::Substitution(_)));
    }
}
