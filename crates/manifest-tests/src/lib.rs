use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Workspace root, two levels above this crate.
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../..")
}

pub fn config_path(rel: &str) -> PathBuf { workspace_root().join("config").join(rel) }

/// Parses every document of a multi-document YAML file.
pub fn load_documents<T: DeserializeOwned>(rel: &str) -> Result<Vec<T>> {
    let path = config_path(rel);
    let s = fs::read_to_string(&path).with_context(|| path.display().to_string())?;
    serde_yaml::Deserializer::from_str(&s)
        .map(|doc| T::deserialize(doc).with_context(|| format!("parse {}", path.display())))
        .collect()
}

pub fn load<T: DeserializeOwned>(rel: &str) -> Result<T> {
    load_documents(rel)?.into_iter().next().with_context(|| format!("{rel} is empty"))
}
