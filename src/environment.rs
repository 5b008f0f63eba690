//! Defines the application run mode.
//! By given the run mode you can also load the deployment description
//!
//! # Example:
//!
//! ```rust
//! use std::str::FromStr;
//! use lokstra::environment::RunMode;
//!
//! let mode = RunMode::from_str("dev").expect("parse");
//! assert!(mode.wants_autogen());
//! ```

use std::path::Path;
use std::str::FromStr;

use fs_err as fs;
use serde::{Deserialize, Serialize};
use serde_variant::to_variant_name;

use crate::topology::DeploymentSpec;

const ENV_VAR: &str = "LOKSTRA_ENV";
const DEBUG_VAR: &str = "LOKSTRA_DEBUG";
const DEFAULT_FOLDER: &str = "config";

/// Application run mode. `dev` enables the autogen phase; `debug`
/// additionally asks the tooling to restart on code change; `prod` skips
/// autogen entirely.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum RunMode {
    #[serde(rename = "prod")]
    Prod,
    #[serde(rename = "dev")]
    Dev,
    #[serde(rename = "debug")]
    Debug,
}

impl RunMode {
    /// Detect the run mode: the `LOKSTRA_ENV` variable wins; otherwise
    /// `LOKSTRA_DEBUG=1` selects debug, an executable under `target/debug`
    /// selects dev, and anything else is prod.
    #[must_use]
    pub fn detect() -> Self {
        if let Ok(value) = std::env::var(ENV_VAR) {
            if let Ok(mode) = Self::from_str(&value) {
                return mode;
            }
        }
        if std::env::var(DEBUG_VAR).map(|v| v == "1").unwrap_or(false) {
            return Self::Debug;
        }
        let exe = std::env::current_exe()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        if exe.contains("target/debug") || exe.contains("target\\debug") {
            return Self::Dev;
        }
        Self::Prod
    }

    /// Whether this mode runs the offline autogen phase before serving.
    #[must_use]
    pub fn wants_autogen(self) -> bool {
        matches!(self, Self::Dev | Self::Debug)
    }

    /// Load the deployment description from the default `config/` folder.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or not valid YAML.
    pub fn load(self) -> crate::Result<DeploymentSpec> {
        self.load_from_folder(Path::new(DEFAULT_FOLDER))
    }

    /// Load `{folder}/{mode}.yaml` as a deployment description.
    ///
    /// # Errors
    ///
    /// Returns an error when the file is missing or not valid YAML.
    pub fn load_from_folder(self, path: &Path) -> crate::Result<DeploymentSpec> {
        let file = path.join(format!("{self}.yaml"));
        let raw = fs::read_to_string(&file)?;
        DeploymentSpec::from_yaml_str(&raw)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        to_variant_name(self).expect("only enum supported").fmt(f)
    }
}

impl FromStr for RunMode {
    type Err = &'static str;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "prod" | "production" => Ok(Self::Prod),
            "dev" | "development" => Ok(Self::Dev),
            "debug" => Ok(Self::Debug),
            _ => Err("error parsing run mode: expected one of \"prod\", \"dev\", \"debug\""),
        }
    }
}
