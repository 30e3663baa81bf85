//! Optional `filestage.toml` settings.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use color_eyre::eyre::{Context, Result};
use filestage_core::EngineConfig;
use filestage_ops::{Decision, FixedDecision};
use serde::{Deserialize, Serialize};

/// What to do when an item fails with a recoverable error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Prompt on the terminal.
    #[default]
    Ask,
    /// Skip the failing item and continue.
    Skip,
    /// Abort the run and roll back.
    Cancel,
}

impl ErrorPolicy {
    /// The fixed answer for this policy, or `None` when the user is asked.
    pub fn fixed_decision(self) -> Option<FixedDecision> {
        match self {
            Self::Ask => None,
            Self::Skip => Some(FixedDecision(Decision::Skip)),
            Self::Cancel => Some(FixedDecision(Decision::CancelAll)),
        }
    }
}

/// Contents of `filestage.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub on_error: ErrorPolicy,
}

impl Settings {
    /// Default location, `<config dir>/filestage/filestage.toml`.
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("filestage").join("filestage.toml"))
    }

    /// Load settings from `explicit`, or from the default location if it
    /// exists. A missing default file yields the defaults; a broken one is an
    /// error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::config_path() {
                Some(path) if path.is_file() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings = Self::parse(&content)
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        tracing::debug!(path = %path.display(), ?settings, "Loaded settings");
        Ok(settings)
    }

    fn parse(content: &str) -> Result<Self> {
        let settings: Self = toml::from_str(content)?;
        if settings.engine.chunk_size == 0 {
            color_eyre::eyre::bail!("engine.chunk_size must be greater than zero");
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_file_gives_defaults() {
        assert_eq!(Settings::parse("").unwrap(), Settings::default());
    }

    #[test]
    fn test_partial_engine_table() {
        let settings = Settings::parse(
            r#"
            on_error = "skip"

            [engine]
            max_retries = 3
            "#,
        )
        .unwrap();

        assert_eq!(settings.on_error, ErrorPolicy::Skip);
        assert_eq!(settings.engine.max_retries, Some(3));
        assert_eq!(settings.engine.chunk_size, EngineConfig::default().chunk_size);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert!(Settings::parse("[engine]\nchunk_size = 0\n").is_err());
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let temp = TempDir::new().unwrap();
        assert!(Settings::load(Some(&temp.path().join("nope.toml"))).is_err());

        let path = temp.path().join("filestage.toml");
        std::fs::write(&path, "on_error = \"cancel\"\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.on_error, ErrorPolicy::Cancel);
    }
}
