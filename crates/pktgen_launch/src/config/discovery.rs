//! Listing of configuration units under a directory tree

use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::config_unit::{is_unit_file, unit_name, ConfigError, ConfigUnit};

/// One listed configuration unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSummary {
    pub name: String,
    pub description: String,
    pub path: PathBuf,
}

/// A unit that failed to load and was left out of the listing
#[derive(Debug)]
pub struct SkippedUnit {
    pub name: String,
    pub error: ConfigError,
}

/// Result of walking a configuration tree
#[derive(Debug, Default)]
pub struct UnitListing {
    pub units: Vec<UnitSummary>,
    pub skipped: Vec<SkippedUnit>,
}

/// Walk `root` once and load every `.cfg` file found.
///
/// Units that fail to load are logged and recorded in `skipped`; they never
/// abort the listing.
pub fn list_units(root: &Path) -> UnitListing {
    let mut listing = UnitListing::default();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("Skipping unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_unit_file(entry.path()) {
            continue;
        }

        let name = unit_name(entry.path());
        match ConfigUnit::load(entry.path()) {
            Ok(unit) => listing.units.push(UnitSummary {
                name,
                description: unit.description().to_string(),
                path: entry.into_path(),
            }),
            Err(error) => {
                log::warn!("{}: {}, skipping", name, error);
                listing.skipped.push(SkippedUnit { name, error });
            }
        }
    }

    listing
}

impl fmt::Display for UnitListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Configurations:")?;
        writeln!(f, "   {:<16} - {}", "Name", "Description")?;
        writeln!(f, "   {:<16}   {}", "----", "-----------")?;
        for unit in &self.units {
            writeln!(f, "   {:<16} - {}", unit.name, unit.description)?;
        }
        Ok(())
    }
}
