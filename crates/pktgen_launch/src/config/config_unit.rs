//! Configuration unit schema and loading

use indexmap::IndexMap;
use serde::de::{self, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::substitution::{SubstitutionError, VariableNamespace};

/// File extension of configuration units
pub const CONFIG_EXTENSION: &str = "cfg";

/// Keys recognized in the `run` group
pub const RUN_KEYS: &[&str] = &[
    "app_name",
    "app_path",
    "exec",
    "ld_path",
    "cores",
    "nrank",
    "proc",
    "log",
    "prefix",
    "blacklist",
    "whitelist",
    "vdev",
    "plugin",
    "opts",
    "map",
    "pcap",
    "theme",
    "loadfile",
    "logfile",
    "description",
];

/// Keys recognized in the `setup` group
pub const SETUP_KEYS: &[&str] = &["exec", "opts", "uio", "devices", "hugepages", "description"];

/// A single string or an ordered sequence of strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Single(String),
    Sequence(Vec<String>),
}

impl OptionValue {
    /// Canonical form: always an ordered sequence
    pub fn normalize(&self) -> Vec<String> {
        match self {
            OptionValue::Single(value) => vec![value.clone()],
            OptionValue::Sequence(values) => values.clone(),
        }
    }

    fn is_empty(&self) -> bool {
        matches!(self, OptionValue::Sequence(values) if values.is_empty())
    }

    fn is_single(&self) -> bool {
        matches!(self, OptionValue::Single(_))
    }
}

/// Typed read of an option value.
///
/// Plain scalars arrive already typed by the YAML parser, so `0x3` is seen
/// as 3 here. [`ConfigUnit::from_yaml`] re-reads every single value as a
/// string afterwards; the text below only decides the shape.
impl<'de> Deserialize<'de> for OptionValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OptionValueVisitor;

        impl<'de> Visitor<'de> for OptionValueVisitor {
            type Value = OptionValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or a sequence of strings")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<OptionValue, E> {
                Ok(OptionValue::Single(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<OptionValue, E> {
                Ok(OptionValue::Single(v))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<OptionValue, E> {
                Ok(OptionValue::Single(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<OptionValue, E> {
                Ok(OptionValue::Single(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<OptionValue, E> {
                Ok(OptionValue::Single(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<OptionValue, E> {
                Ok(OptionValue::Single(v.to_string()))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<OptionValue, A::Error> {
                // Elements go through deserialize_string so plain scalars keep their text
                let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(value) = seq.next_element::<String>()? {
                    values.push(value);
                }
                Ok(OptionValue::Sequence(values))
            }
        }

        deserializer.deserialize_any(OptionValueVisitor)
    }
}

/// Named option group (`run` or `setup`), in document order
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct OptionGroup {
    options: IndexMap<String, OptionValue>,
}

impl OptionGroup {
    /// Check whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }

    /// Raw value for a key
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.options.get(key)
    }

    /// Normalized value for a key; `None` means the option is not present
    pub fn normalize(&self, key: &str) -> Option<Vec<String>> {
        self.options.get(key).map(OptionValue::normalize)
    }

    /// Normalized value with every element substituted
    pub fn substituted(
        &self,
        key: &str,
        namespace: &VariableNamespace,
    ) -> Result<Option<Vec<String>>, SubstitutionError> {
        self.normalize(key)
            .map(|values| namespace.substitute_all(&values))
            .transpose()
    }

    /// First element of a key, used for single-valued options like `app_name`
    pub fn first(&self, key: &str) -> Option<String> {
        self.normalize(key).and_then(|values| values.into_iter().next())
    }

    /// Iterate over keys in document order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }

    fn has_single(&self) -> bool {
        self.options.values().any(OptionValue::is_single)
    }

    /// Replace single values with their text as written in the document
    fn keep_text(&mut self, texts: IndexMap<String, String>) {
        for (key, text) in texts {
            if let Some(value) = self.options.get_mut(&key) {
                *value = OptionValue::Single(text);
            }
        }
    }

    fn validate(&self, group: &str, allowed: &[&str]) -> Result<(), String> {
        for (key, value) in &self.options {
            if !allowed.contains(&key.as_str()) {
                return Err(format!("unknown key '{}' in '{}' group", key, group));
            }
            if value.is_empty() {
                return Err(format!("'{}.{}' must not be an empty sequence", group, key));
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, OptionValue)> for OptionGroup {
    fn from_iter<I: IntoIterator<Item = (String, OptionValue)>>(iter: I) -> Self {
        Self {
            options: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UnitDocument {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    run: OptionGroup,
    #[serde(default)]
    setup: OptionGroup,
}

/// Second pass over a unit that reads each single-valued option with
/// `deserialize_string`, which yields the scalar exactly as written
struct DeclaredText<'a> {
    run: &'a OptionGroup,
    setup: &'a OptionGroup,
}

type GroupTexts = IndexMap<String, String>;

impl<'de> DeserializeSeed<'de> for DeclaredText<'_> {
    type Value = (GroupTexts, GroupTexts);

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for DeclaredText<'_> {
    type Value = (GroupTexts, GroupTexts);

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a configuration unit")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut run = GroupTexts::new();
        let mut setup = GroupTexts::new();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "run" => run = map.next_value_seed(GroupText(self.run))?,
                "setup" => setup = map.next_value_seed(GroupText(self.setup))?,
                _ => {
                    map.next_value::<de::IgnoredAny>()?;
                }
            }
        }
        Ok((run, setup))
    }
}

struct GroupText<'a>(&'a OptionGroup);

impl<'de> DeserializeSeed<'de> for GroupText<'_> {
    type Value = GroupTexts;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for GroupText<'_> {
    type Value = GroupTexts;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an option group")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut texts = GroupTexts::new();
        while let Some(key) = map.next_key::<String>()? {
            if self.0.get(&key).is_some_and(OptionValue::is_single) {
                let text: String = map.next_value()?;
                texts.insert(key, text);
            } else {
                map.next_value::<de::IgnoredAny>()?;
            }
        }
        Ok(texts)
    }
}

/// A loaded configuration unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigUnit {
    /// File the unit was loaded from
    pub path: PathBuf,
    /// Options for launching the application
    pub run: OptionGroup,
    /// Options for preparing the host
    pub setup: OptionGroup,
    description: String,
}

impl ConfigUnit {
    /// Load a configuration unit from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(path, &content)
    }

    /// Parse a configuration unit from a YAML string
    pub fn from_yaml(path: impl Into<PathBuf>, content: &str) -> Result<Self, ConfigError> {
        let path = path.into();
        let parse_error = |e| ConfigError::Parse {
            path: path.clone(),
            source: e,
        };
        let mut document: UnitDocument = serde_yaml::from_str(content).map_err(parse_error)?;

        if document.run.has_single() || document.setup.has_single() {
            let (run, setup) = DeclaredText {
                run: &document.run,
                setup: &document.setup,
            }
            .deserialize(serde_yaml::Deserializer::from_str(content))
            .map_err(parse_error)?;
            document.run.keep_text(run);
            document.setup.keep_text(setup);
        }

        let invalid = |message: String| ConfigError::Invalid {
            path: path.clone(),
            message,
        };
        document.run.validate("run", RUN_KEYS).map_err(invalid)?;
        document.setup.validate("setup", SETUP_KEYS).map_err(invalid)?;

        let description = document
            .description
            .or_else(|| document.run.first("description"))
            .or_else(|| document.setup.first("description"))
            .unwrap_or_default();

        Ok(Self {
            path,
            run: document.run,
            setup: document.setup,
            description,
        })
    }

    /// Unit description, empty when the unit declares none
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Unit name: the file name without the `.cfg` extension
    pub fn name(&self) -> String {
        unit_name(&self.path)
    }
}

/// Name of a unit file without its extension
pub fn unit_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Check whether a path carries the configuration unit extension
pub fn is_unit_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == CONFIG_EXTENSION)
}

/// Locate a unit by name under `search_root`.
///
/// The `.cfg` extension is optional. A name that already points at an
/// existing file is used as-is; otherwise the tree is walked in file-name
/// order and the first file with a matching name wins.
pub fn find_unit(search_root: &Path, name: &str) -> Result<PathBuf, ConfigError> {
    let direct = Path::new(name);
    if direct.components().count() > 1 && direct.is_file() {
        return Ok(direct.to_path_buf());
    }

    let file_name = if is_unit_file(direct) {
        name.to_string()
    } else {
        format!("{}.{}", name, CONFIG_EXTENSION)
    };

    WalkDir::new(search_root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file() && entry.file_name() == file_name.as_str())
        .map(|entry| entry.into_path())
        .ok_or_else(|| ConfigError::NotFound(search_root.join(file_name)))
}

/// Errors that can occur when loading a configuration unit
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file {} does not exist", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid config file '{}': {message}", .path.display())]
    Invalid { path: PathBuf, message: String },
}

impl ConfigError {
    /// True for any failure after the file was found
    pub fn is_load_error(&self) -> bool {
        !matches!(self, ConfigError::NotFound(_))
    }
}
