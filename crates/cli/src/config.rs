use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tally_import::SourceProfile;

/// Overrides `database_path` from the config file.
pub const DATABASE_ENV: &str = "TALLY_DATABASE";

const CONFIG_FILE: &str = "config.toml";
const DATABASE_FILE: &str = "tally.db";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "tally", "Tally")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database_path: Option<PathBuf>,
    pub default_source: String,
    pub sources: HashMap<String, SourceProfile>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: None,
            default_source: "default".to_string(),
            sources: HashMap::new(),
        }
    }
}

impl Settings {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config")
    }

    /// Reads `explicit` when given (it must exist), otherwise the platform
    /// config file if there is one, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match project_dirs() {
                Some(dirs) => dirs.config_dir().join(CONFIG_FILE),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit.is_some() {
                bail!("Config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings = Self::from_toml(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        tracing::debug!(path = %path.display(), sources = settings.sources.len(), "Loaded config");
        Ok(settings)
    }

    /// Database location: `env_override`, then the config value, then the
    /// platform data directory.
    pub fn database_path(&self, env_override: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(path) = env_override.filter(|p| !p.as_os_str().is_empty()) {
            return Ok(path);
        }
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let dirs = project_dirs().context("Could not determine a data directory")?;
        Ok(dirs.data_dir().join(DATABASE_FILE))
    }

    /// The named source profile, or the configured default. An unknown name
    /// is an error unless it is the built-in `default`.
    pub fn profile(&self, name: Option<&str>) -> Result<SourceProfile> {
        let name = name.unwrap_or(&self.default_source);
        let mut profile = match self.sources.get(name) {
            Some(profile) => profile.clone(),
            None if name == "default" => SourceProfile::default(),
            None => bail!("Unknown source profile '{name}'"),
        };
        profile.name = name.to_string();
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_import::SignConvention;

    const SAMPLE: &str = r#"
database_path = "/tmp/ledger.db"
default_source = "chase"

[sources.chase]
sign_convention = "negative_is_expense"

[sources.euro]
delimiter = ";"
"#;

    #[test]
    fn parses_sources() {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        let chase = settings.profile(None).unwrap();
        assert_eq!(chase.name, "chase");
        assert_eq!(chase.sign_convention, SignConvention::NegativeIsExpense);
        assert_eq!(chase.delimiter, ",");

        let euro = settings.profile(Some("euro")).unwrap();
        assert_eq!(euro.delimiter, ";");
        assert_eq!(euro.sign_convention, SignConvention::NegativeIsIncome);
    }

    #[test]
    fn unknown_profile_is_error() {
        let settings = Settings::default();
        assert!(settings.profile(Some("nope")).is_err());
        assert_eq!(settings.profile(None).unwrap().name, "default");
    }

    #[test]
    fn env_override_wins() {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        assert_eq!(
            settings.database_path(Some(PathBuf::from("/srv/other.db"))).unwrap(),
            PathBuf::from("/srv/other.db")
        );
        assert_eq!(
            settings.database_path(None).unwrap(),
            PathBuf::from("/tmp/ledger.db")
        );
        assert_eq!(
            settings.database_path(Some(PathBuf::new())).unwrap(),
            PathBuf::from("/tmp/ledger.db")
        );
    }

    #[test]
    fn load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.default_source, "chase");
        assert!(Settings::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn malformed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "default_source = [").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
    }
}
