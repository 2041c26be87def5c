//! Settings resolution: command-line flags override `MARIONETTE_*`
//! environment variables, which override an optional `marionette.toml`,
//! which overrides platform defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[cfg(windows)]
const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: char = ':';

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not locate environment '{environment}' in the environment path.")]
    EnvironmentNotFound { environment: String },
    #[error("cannot read manifest directory '{}': {source}.", path.display())]
    UnreadableManifestDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("manifest '{}' does not exist.", path.display())]
    MissingManifest { path: PathBuf },
}

/// Resolved compiler settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub code_directory: PathBuf,
    pub environment: String,
    pub environment_path: Vec<PathBuf>,
    pub module_path: Vec<PathBuf>,
    pub base_module_path: Vec<PathBuf>,
    pub manifest: Option<PathBuf>,
    pub facts: Option<PathBuf>,
}

/// Raw option values before defaulting, as collected from flags and the
/// environment.
#[derive(Debug, Default, Clone)]
pub struct SettingsInput {
    pub code_directory: Option<String>,
    pub environment: Option<String>,
    pub environment_path: Option<String>,
    pub module_path: Option<String>,
    pub base_module_path: Option<String>,
    pub manifest: Option<String>,
    pub facts: Option<String>,
}

impl SettingsInput {
    /// Fills unset options from `MARIONETTE_*` environment variables.
    pub fn with_environment(mut self) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        self.code_directory = self.code_directory.or_else(|| var("MARIONETTE_CODE_DIRECTORY"));
        self.environment = self.environment.or_else(|| var("MARIONETTE_ENVIRONMENT"));
        self.environment_path = self
            .environment_path
            .or_else(|| var("MARIONETTE_ENVIRONMENT_PATH"));
        self.module_path = self.module_path.or_else(|| var("MARIONETTE_MODULE_PATH"));
        self.base_module_path = self
            .base_module_path
            .or_else(|| var("MARIONETTE_BASE_MODULE_PATH"));
        self.manifest = self.manifest.or_else(|| var("MARIONETTE_MANIFEST"));
        self.facts = self.facts.or_else(|| var("MARIONETTE_FACTS"));
        self
    }

    /// Fills unset options from a `marionette.toml` in the working
    /// directory, when one exists.
    pub fn with_config_file(self) -> Self {
        match std::fs::read_to_string("marionette.toml") {
            Ok(text) => match toml::from_str::<ConfigFile>(&text) {
                Ok(config) => self.merge_config(config),
                Err(_) => self,
            },
            Err(_) => self,
        }
    }

    fn merge_config(mut self, config: ConfigFile) -> Self {
        self.code_directory = self.code_directory.or(config.code_directory);
        self.environment = self.environment.or(config.environment);
        self.environment_path = self.environment_path.or(config.environment_path);
        self.module_path = self.module_path.or(config.module_path);
        self.base_module_path = self.base_module_path.or(config.base_module_path);
        self.manifest = self.manifest.or(config.manifest);
        self.facts = self.facts.or(config.facts);
        self
    }

    pub fn resolve(self) -> Settings {
        let code_directory = self
            .code_directory
            .map(PathBuf::from)
            .unwrap_or_else(default_code_directory);
        let environment = self.environment.unwrap_or_else(|| "production".to_string());
        let environment_path = match self.environment_path {
            Some(list) => split_path_list(&list),
            None => vec![code_directory.join("environments")],
        };
        let module_path = self
            .module_path
            .map(|list| split_path_list(&list))
            .unwrap_or_else(|| vec![code_directory.join("modules")]);
        let base_module_path = self
            .base_module_path
            .map(|list| split_path_list(&list))
            .unwrap_or_default();
        Settings {
            code_directory,
            environment,
            environment_path,
            module_path,
            base_module_path,
            manifest: self.manifest.map(PathBuf::from),
            facts: self.facts.map(PathBuf::from),
        }
    }
}

/// The optional `marionette.toml` settings file.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    code_directory: Option<String>,
    environment: Option<String>,
    environment_path: Option<String>,
    module_path: Option<String>,
    base_module_path: Option<String>,
    manifest: Option<String>,
    facts: Option<String>,
}

/// Splits a `:`-separated (`;` on Windows) path list, dropping empty
/// entries.
pub fn split_path_list(list: &str) -> Vec<PathBuf> {
    list.split(PATH_LIST_SEPARATOR)
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// The platform default code directory: the global location for root or
/// users without a home directory, otherwise under the user's home.
pub fn default_code_directory() -> PathBuf {
    let is_root = std::env::var("USER").map(|user| user == "root").unwrap_or(false);
    match dirs::home_dir() {
        Some(home) if !is_root => home.join(".puppetlabs").join("etc").join("code"),
        _ => PathBuf::from("/etc/puppetlabs/code"),
    }
}

impl Settings {
    /// The directory of the configured environment.
    pub fn environment_directory(&self) -> Option<PathBuf> {
        self.environment_path
            .iter()
            .map(|root| root.join(&self.environment))
            .find(|candidate| candidate.is_dir())
    }

    /// Locates the manifests to compile: an explicit manifest file, a
    /// manifest directory, or the environment's `manifests` directory.
    pub fn manifests(&self) -> Result<Vec<PathBuf>, SettingsError> {
        let target = match &self.manifest {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => match self.environment_directory() {
                Some(env) => env.join(path),
                None => path.clone(),
            },
            None => match self.environment_directory() {
                Some(env) => env.join("manifests"),
                None => {
                    return Err(SettingsError::EnvironmentNotFound {
                        environment: self.environment.clone(),
                    })
                }
            },
        };
        manifests_in(&target)
    }
}

/// Expands a manifest path: files are taken as-is, directories contribute
/// their `.pp` files sorted by name.
pub fn manifests_in(target: &Path) -> Result<Vec<PathBuf>, SettingsError> {
    if target.is_file() {
        return Ok(vec![target.to_path_buf()]);
    }
    if target.is_dir() {
        let mut manifests: Vec<PathBuf> = std::fs::read_dir(target)
            .map_err(|source| SettingsError::UnreadableManifestDirectory {
                path: target.to_path_buf(),
                source,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "pp").unwrap_or(false))
            .collect();
        manifests.sort();
        return Ok(manifests);
    }
    Err(SettingsError::MissingManifest {
        path: target.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path_list() {
        #[cfg(not(windows))]
        assert_eq!(
            split_path_list("/a:/b::/c"),
            vec![
                PathBuf::from("/a"),
                PathBuf::from("/b"),
                PathBuf::from("/c")
            ]
        );
    }

    #[test]
    fn test_defaults() {
        let settings = SettingsInput::default().resolve();
        assert_eq!(settings.environment, "production");
        assert_eq!(
            settings.environment_path,
            vec![settings.code_directory.join("environments")]
        );
        assert!(settings.facts.is_none());
    }

    #[test]
    fn test_missing_manifest_error() {
        let err = manifests_in(Path::new("/nonexistent/site.pp")).unwrap_err();
        assert!(matches!(err, SettingsError::MissingManifest { .. }));
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_explicit_options_win() {
        let input = SettingsInput {
            code_directory: Some("/opt/code".to_string()),
            environment: Some("staging".to_string()),
            ..Default::default()
        };
        let settings = input.resolve();
        assert_eq!(settings.code_directory, PathBuf::from("/opt/code"));
        assert_eq!(settings.environment, "staging");
        assert_eq!(
            settings.module_path,
            vec![PathBuf::from("/opt/code/modules")]
        );
    }
}
