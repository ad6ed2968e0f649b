//! Locating and parsing data files, plus the name tables the registry
//! loader resolves cross-file references through.
//!
//! A data file is addressed by base name. Exactly one of `{base}.ron`,
//! `{base}.toml` or `{base}.json` may exist in a directory.

use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Why a data directory could not be turned into registry or config values.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// The same base name exists in more than one format.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A recipe names a material or machine that was never defined.
    #[error("unresolved {expected_kind} reference '{name}' in {file}")]
    UnresolvedRef {
        file: PathBuf,
        name: String,
        expected_kind: &'static str,
    },

    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    #[error(transparent)]
    Registry(#[from] millflow_core::registry::RegistryError),

    /// Parsed, but outside what the calculator accepts.
    #[error("invalid value for '{field}' in {file}: {detail}")]
    InvalidValue {
        file: PathBuf,
        field: &'static str,
        detail: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn parse_error(path: &Path, detail: impl ToString) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

impl Format {
    /// Probe order when locating a file by base name.
    const ALL: [Format; 3] = [Format::Ron, Format::Toml, Format::Json];

    pub fn extension(self) -> &'static str {
        match self {
            Format::Ron => "ron",
            Format::Toml => "toml",
            Format::Json => "json",
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, DataLoadError> {
        let ext = path.extension().and_then(|e| e.to_str());
        Self::ALL
            .into_iter()
            .find(|f| Some(f.extension()) == ext)
            .ok_or_else(|| DataLoadError::UnsupportedFormat {
                file: path.to_path_buf(),
            })
    }

    fn parse<T: DeserializeOwned>(self, content: &str, path: &Path) -> Result<T, DataLoadError> {
        match self {
            Format::Ron => ron::from_str(content).map_err(|e| parse_error(path, e)),
            Format::Toml => toml::from_str(content).map_err(|e| parse_error(path, e)),
            Format::Json => serde_json::from_str(content).map_err(|e| parse_error(path, e)),
        }
    }
}

// ---------------------------------------------------------------------------
// DataFile
// ---------------------------------------------------------------------------

/// One data file on disk together with the format its extension implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub path: PathBuf,
    pub format: Format,
}

impl DataFile {
    pub fn open(path: &Path) -> Result<Self, DataLoadError> {
        Ok(Self {
            path: path.to_path_buf(),
            format: Format::from_path(path)?,
        })
    }

    /// The `base` file in `dir`, if any.
    pub fn locate(dir: &Path, base: &str) -> Result<Option<Self>, DataLoadError> {
        let mut found: Option<Self> = None;
        for format in Format::ALL {
            let path = dir.join(format!("{base}.{}", format.extension()));
            if !path.exists() {
                continue;
            }
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing.path,
                    b: path,
                });
            }
            found = Some(Self { path, format });
        }
        Ok(found)
    }

    pub fn require(dir: &Path, base: &str) -> Result<Self, DataLoadError> {
        Self::locate(dir, base)?.ok_or_else(|| DataLoadError::MissingRequired {
            file: base.to_string(),
            dir: dir.to_path_buf(),
        })
    }

    pub fn read<T: DeserializeOwned>(&self) -> Result<T, DataLoadError> {
        let content = std::fs::read_to_string(&self.path)?;
        self.format.parse(&content, &self.path)
    }

    /// Read a list of records. RON and JSON files hold a bare list; TOML
    /// has no top-level arrays, so the list sits under `key`.
    pub fn read_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, DataLoadError> {
        if self.format != Format::Toml {
            return self.read();
        }
        let mut table: toml::Table = self.read()?;
        let list = table
            .remove(key)
            .ok_or_else(|| parse_error(&self.path, format!("missing key '{key}' in TOML file")))?;
        list.try_into()
            .map_err(|e: toml::de::Error| parse_error(&self.path, e))
    }
}

// ---------------------------------------------------------------------------
// Name tables
// ---------------------------------------------------------------------------

/// Names defined in one data file, mapped to the ids they were registered
/// under.
#[derive(Debug)]
pub struct NameTable<V> {
    kind: &'static str,
    ids: HashMap<String, V>,
}

impl<V: Copy> NameTable<V> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            ids: HashMap::new(),
        }
    }

    /// Fails when `name` is already taken.
    pub fn claim(&self, name: &str, file: &Path) -> Result<(), DataLoadError> {
        if self.ids.contains_key(name) {
            return Err(DataLoadError::DuplicateName {
                file: file.to_path_buf(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, name: String, id: V) {
        self.ids.insert(name, id);
    }

    pub fn resolve(&self, name: &str, file: &Path) -> Result<V, DataLoadError> {
        self.ids.get(name).copied().ok_or_else(|| DataLoadError::UnresolvedRef {
            file: file.to_path_buf(),
            name: name.to_string(),
            expected_kind: self.kind,
        })
    }
}
