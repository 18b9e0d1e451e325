use crate::manifest::AndroidManifest;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use zip::CompressionMethod;

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Stored,
    Deflated,
}

impl Compression {
    pub fn compression_method(self) -> CompressionMethod {
        match self {
            Self::Stored => CompressionMethod::Stored,
            Self::Deflated => CompressionMethod::Deflated,
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "stored" => Self::Stored,
            "deflated" => Self::Deflated,
            _ => anyhow::bail!("unknown compression `{}`", s),
        })
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    pub manifest: AndroidManifest,
    /// Class declared by the dex image. A leading `.` is resolved against the package.
    pub main_class: String,
    pub compression: Compression,
    /// Alignment of stored entries, 1 disables.
    pub alignment: u16,
    /// Emit end-element and end-namespace chunks.
    pub balanced_xml: bool,
    pub created_by: String,
    pub built_by: String,
    pub installer: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            manifest: AndroidManifest::default(),
            main_class: ".MainActivity".into(),
            compression: Compression::Stored,
            alignment: 4,
            balanced_xml: true,
            created_by: "1.0 (camapk)".into(),
            built_by: "camapk".into(),
            installer: vec!["pmca-console".into(), "install".into(), "-f".into()],
        }
    }
}

impl BuildConfig {
    /// Loads a yaml config. A missing file yields the defaults.
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("{} not found, using defaults", path.display());
            return Ok(Default::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_yaml(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.manifest.validate()?;
        anyhow::ensure!(
            self.alignment > 0 && self.alignment.is_power_of_two(),
            "alignment {} is not a power of two",
            self.alignment
        );
        anyhow::ensure!(!self.installer.is_empty(), "installer command is empty");
        Ok(())
    }

    /// Fully qualified name of the placeholder class.
    pub fn main_class(&self) -> String {
        self.manifest.resolve_class(&self.main_class)
    }
}
