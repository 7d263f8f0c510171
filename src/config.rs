use std::{env, fs, path::{Path, PathBuf}};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::operand::DEFAULT_PRECISION;

/// Interpreter settings. Every field has a default, so a config file only
/// needs the ones it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Log each tree as it is evaluated
    pub verbose: bool,
    /// Decimal places when a real becomes a string
    pub precision: usize,
    /// Directories whose `.vl` and `.vela` files are loaded at startup
    pub source_directories: Vec<PathBuf>,
    pub standard_library: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            precision: DEFAULT_PRECISION,
            source_directories: vec![],
            standard_library: true,
        }
    }
}

impl InterpreterConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// `VELA_PRECISION` and `VELA_SOURCE_DIRS` override the file
    pub fn with_env_overrides(mut self) -> anyhow::Result<Self> {
        if let Ok(precision) = env::var("VELA_PRECISION") {
            self.precision = precision.trim().parse()
                .with_context(|| format!("VELA_PRECISION must be a number of decimal places, got '{}'", precision))?;
        }
        if let Some(directories) = env::var_os("VELA_SOURCE_DIRS") {
            self.source_directories.extend(env::split_paths(&directories));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: InterpreterConfig = serde_json::from_str(r#"{ "precision": 3 }"#).unwrap();
        assert_eq!(config, InterpreterConfig { precision: 3, ..Default::default() });
        assert!(config.standard_library);
    }

    #[test]
    fn round_trips_through_json() {
        let config = InterpreterConfig {
            verbose: true,
            source_directories: vec![PathBuf::from("lib/vela")],
            ..Default::default()
        };
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<InterpreterConfig>(&text).unwrap(), config);
    }
}
