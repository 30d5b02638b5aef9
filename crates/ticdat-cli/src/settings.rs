use std::path::Path;

use serde::{Deserialize, Serialize};
use ticdat_core::{ExceptionHandling, Keep, Verbosity};

use crate::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    Csv,
    Json,
}

impl DataFormat {
    /// Directories hold CSV files; anything else is read as JSON.
    pub fn detect(path: &Path) -> Self {
        if path.is_dir() || path.extension().is_none() {
            DataFormat::Csv
        } else {
            DataFormat::Json
        }
    }
}

/// Defaults for command options, loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub max_failures: Option<usize>,
    pub verbosity: Verbosity,
    pub exception_handling: ExceptionHandling,
    pub keep: Keep,
    pub format: Option<DataFormat>,
    pub propagate: bool,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_failures: None,
            verbosity: Verbosity::High,
            exception_handling: ExceptionHandling::Propagate,
            keep: Keep::First,
            format: None,
            propagate: false,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

pub fn load_settings(path: Option<&Path>) -> Result<Settings, CliError> {
    let Some(path) = path else {
        return Ok(Settings::default());
    };
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = toml::from_str(&content)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_gives_defaults() {
        let settings = load_settings(None).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticdat.toml");
        std::fs::write(
            &path,
            "max_failures = 10\nverbosity = \"low\"\nformat = \"json\"\nkeep = \"none\"\n",
        )
        .unwrap();

        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.max_failures, Some(10));
        assert_eq!(settings.verbosity, Verbosity::Low);
        assert_eq!(settings.format, Some(DataFormat::Json));
        assert_eq!(settings.keep, Keep::None);
        assert!(!settings.propagate);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticdat.toml");
        std::fs::write(&path, "max_failure = 10\n").unwrap();
        assert!(matches!(load_settings(Some(&path)), Err(CliError::Settings(_))));
    }
}
