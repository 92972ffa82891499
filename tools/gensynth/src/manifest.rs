//! Rule manifest loading.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gensynth_core::RuleDef;
use serde::Deserialize;

/// A TOML file listing every rule of one build configuration.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default)]
    pub allow_missing_dependencies: bool,
    #[serde(default, rename = "rule")]
    pub rules: Vec<RuleDef>,
}

fn default_out_dir() -> PathBuf {
    PathBuf::from("out")
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("failed to parse manifest: {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
