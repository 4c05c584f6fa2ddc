//! Settings and deployment file loading.
//!
//! This module finds `cirrus.yaml`, loads it with environment overrides,
//! loads deployment files, and resolves template and binding file names
//! against the configured lookup directories.

use crate::error::{ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::settings::{CirrusConfig, DeploymentFile};

/// Settings file names searched for in the working directory.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["cirrus.yaml", "cirrus.yml", ".cirrus.yaml"];

/// Extensions tried when resolving parameter and tag file names.
const BINDING_FILE_EXTENSIONS: &[&str] = &["", ".json", ".yaml", ".yml"];

/// Loader for settings and deployment files.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads settings from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<CirrusConfig> {
        let path = self.resolve(path.as_ref());
        info!("Loading settings from: {}", path.display());

        let content = read_file(&path)?;
        self.parse_yaml(&content, Some(&path))
    }

    /// Parses settings from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<CirrusConfig> {
        debug!("Parsing settings");
        if content.trim().is_empty() {
            return Ok(CirrusConfig::default());
        }
        serde_yaml::from_str(content).map_err(|e| {
            ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            }
            .into()
        })
    }

    /// Finds and loads settings, the `.env` file next to them, and
    /// environment overrides.
    ///
    /// Without a settings file the built-in defaults apply.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path does not exist, or if a file
    /// cannot be parsed.
    pub fn load(&self, explicit: Option<&Path>) -> Result<(CirrusConfig, Option<PathBuf>)> {
        let cwd = self.base_path.clone().unwrap_or_else(|| PathBuf::from("."));
        let found = find_config_file(explicit, &cwd)?;

        let mut config = match &found {
            Some(path) => {
                let dir = path.parent().map_or_else(|| cwd.clone(), Path::to_path_buf);
                load_dotenv(&dir)?;
                self.load_file(path)?
            }
            None => {
                debug!("No settings file found, using defaults");
                load_dotenv(&cwd)?;
                CirrusConfig::default()
            }
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok((config, found))
    }

    /// Loads a deployment file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_deployment(&self, path: impl AsRef<Path>) -> Result<DeploymentFile> {
        let path = self.resolve(path.as_ref());
        info!("Loading deployment from: {}", path.display());

        let content = read_file(&path)?;
        serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::parse(format!("YAML parse error: {e}"), path.display().to_string()).into()
        })
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_path {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Applies `CIRRUS_*` overrides read through `lookup`.
///
/// # Errors
///
/// Returns an error if `CIRRUS_CHANGESET_TIMEOUT` is not a number of seconds.
pub fn apply_env_overrides<F>(config: &mut CirrusConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(region) = lookup("CIRRUS_REGION") {
        debug!("Overriding aws.region from environment");
        config.aws.region = Some(region);
    }

    if let Some(profile) = lookup("CIRRUS_PROFILE") {
        debug!("Overriding aws.profile from environment");
        config.aws.profile = Some(profile);
    }

    if let Some(timeout) = lookup("CIRRUS_CHANGESET_TIMEOUT") {
        debug!("Overriding changeset.timeout_secs from environment");
        config.changeset.timeout_secs = timeout.trim().parse().map_err(|_| {
            ConfigError::validation(
                format!("CIRRUS_CHANGESET_TIMEOUT must be a number of seconds, got '{timeout}'"),
                "changeset.timeout_secs",
            )
        })?;
    }

    Ok(())
}

/// Loads the `.env` file in `dir`, if present.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be loaded.
pub fn load_dotenv(dir: &Path) -> Result<()> {
    let env_path = dir.join(".env");

    if env_path.exists() {
        info!("Loading environment from: {}", env_path.display());
        dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to load .env file: {e}"),
            location: Some(env_path.display().to_string()),
        })?;
    } else {
        debug!(".env file not found at: {}", env_path.display());
    }

    Ok(())
}

/// Finds the settings file.
///
/// An explicit path must exist. Otherwise the working directory, the
/// user config directory and the home directory are searched, in order.
///
/// # Errors
///
/// Returns an error if `explicit` does not exist.
pub fn find_config_file(explicit: Option<&Path>, cwd: &Path) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }

    let mut candidates: Vec<PathBuf> = DEFAULT_CONFIG_FILES.iter().map(|f| cwd.join(f)).collect();
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("cirrus").join("cirrus.yaml"));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".cirrus.yaml"));
    }

    let found = candidates.into_iter().find(|p| p.is_file());
    if let Some(path) = &found {
        info!("Found settings file: {}", path.display());
    }
    Ok(found)
}

/// Resolves a template name or path.
///
/// An existing path is used as is; otherwise `name` plus each extension
/// is tried inside `directory`.
///
/// # Errors
///
/// Returns `FileNotFound` if nothing matches.
pub fn resolve_template(name: &str, directory: &Path, extensions: &[String]) -> Result<PathBuf> {
    resolve_named(name, directory, extensions.iter().map(String::as_str))
}

/// Resolves a parameter or tag file name, as [`resolve_template`] does.
///
/// # Errors
///
/// Returns `FileNotFound` if nothing matches.
pub fn resolve_binding_file(name: &str, directory: &Path) -> Result<PathBuf> {
    resolve_named(name, directory, BINDING_FILE_EXTENSIONS.iter().copied())
}

fn resolve_named<'a>(
    name: &str,
    directory: &Path,
    extensions: impl Iterator<Item = &'a str>,
) -> Result<PathBuf> {
    let direct = PathBuf::from(name);
    if direct.is_file() {
        return Ok(direct);
    }
    for ext in extensions {
        let candidate = directory.join(format!("{name}{ext}"));
        if candidate.is_file() {
            debug!("Resolved {name} to {}", candidate.display());
            return Ok(candidate);
        }
    }
    Err(ConfigError::FileNotFound {
        path: directory.join(name),
    }
    .into())
}

fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }
        .into());
    }
    std::fs::read_to_string(path).map_err(|e| {
        ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_settings() {
        let yaml = r"
aws:
  region: eu-west-1
  profile: deploy
changeset:
  name_format: release-%Y%m%d
  timeout_secs: 600
events:
  poll_interval_ms: 2000
exports:
  concurrency: 4
retry:
  throttle_pause_ms: 1000
templates:
  directory: cfn
  extensions: ['', '.yaml']
prechecks:
  commands:
    - cfn-lint $TEMPLATEPATH
  stop_on_failure: true
";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.changeset.name_format, "release-%Y%m%d");
        assert_eq!(config.changeset.poll_initial_ms, 2000);
        assert_eq!(config.exports.concurrency, 4);
        assert_eq!(config.templates.directory, PathBuf::from("cfn"));
        assert!(config.prechecks.stop_on_failure);
    }

    #[test]
    fn test_empty_settings_file() {
        let config = ConfigParser::new().parse_yaml("\n", None).unwrap();
        assert_eq!(config, CirrusConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CIRRUS_REGION", "ap-south-1"),
            ("CIRRUS_CHANGESET_TIMEOUT", "90"),
        ]
        .into_iter()
        .collect();
        let mut config = CirrusConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.aws.region.as_deref(), Some("ap-south-1"));
        assert_eq!(config.aws.profile, None);
        assert_eq!(config.changeset.timeout_secs, 90);
    }

    #[test]
    fn test_bad_timeout_override() {
        let mut config = CirrusConfig::default();
        let result = apply_env_overrides(&mut config, |k| {
            (k == "CIRRUS_CHANGESET_TIMEOUT").then(|| String::from("soon"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_find_in_working_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".cirrus.yaml"), "{}").unwrap();
        std::fs::write(dir.path().join("cirrus.yml"), "{}").unwrap();

        let found = find_config_file(None, dir.path()).unwrap();
        assert_eq!(found, Some(dir.path().join("cirrus.yml")));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(find_config_file(Some(&missing), dir.path()).is_err());
    }

    #[test]
    fn test_load_with_base_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cirrus.yaml"), "exports:\n  concurrency: 2\n").unwrap();

        let parser = ConfigParser::new().with_base_path(dir.path());
        let (config, found) = parser.load(Some(&dir.path().join("cirrus.yaml"))).unwrap();
        assert_eq!(config.exports.concurrency, 2);
        assert!(found.is_some());
    }

    #[test]
    fn test_load_deployment_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("web.yaml"),
            "stack: web\ntemplate: web\nparameters:\n  Env: prod\ncapabilities: [CAPABILITY_IAM]\n",
        )
        .unwrap();

        let file = ConfigParser::new()
            .with_base_path(dir.path())
            .load_deployment("web.yaml")
            .unwrap();
        assert_eq!(file.stack, "web");
        assert_eq!(file.template.as_deref(), Some("web"));
        assert_eq!(file.capabilities, vec!["CAPABILITY_IAM"]);
        assert!(!file.use_previous_template);
    }

    #[test]
    fn test_resolve_template_by_name() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("web.yml"), "Resources: {}").unwrap();

        let extensions: Vec<String> = vec![String::new(), String::from(".yaml"), String::from(".yml")];
        let path = resolve_template("web", dir.path(), &extensions).unwrap();
        assert_eq!(path, dir.path().join("web.yml"));
        assert!(resolve_template("api", dir.path(), &extensions).is_err());
    }

    #[test]
    fn test_resolve_binding_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("prod.json"), "{}").unwrap();
        let path = resolve_binding_file("prod", dir.path()).unwrap();
        assert_eq!(path, dir.path().join("prod.json"));
    }
}
