//! Engine configuration (`bundlemerge.toml`).
//!
//! Every field has a default, so a missing file, an empty file and a file
//! with only some sections are all valid. Unknown fields are rejected.
//!
//! ```toml
//! [merge]
//! ancestor_search_depth = 32
//!
//! [[merge.handlers]]
//! match = "*.cfg"
//! handler = "settings"
//!
//! [settings]
//! requirements_key = "versionRequirements"
//! path_list_keys = ["templatePath", "importPaths"]
//! path_list_delimiter = ";"
//!
//! [store]
//! device = "laptop"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};

use crate::handlers::{ContentHandler, HandlerRegistry, HandlerRule, NameRule, SettingsPolicy};
use crate::merge::BundleMerger;
use crate::merge::coordinator::DEFAULT_ANCESTOR_SEARCH_DEPTH;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleMergeConfig {
    /// Merge behaviour.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Reserved keys of `settings.ini`.
    #[serde(default)]
    pub settings: SettingsConfig,

    /// Bundle store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

// ---------------------------------------------------------------------------
// MergeConfig
// ---------------------------------------------------------------------------

/// Merge behaviour settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MergeConfig {
    /// Generations searched from each fork for a shared ancestor.
    #[serde(default = "default_ancestor_search_depth")]
    pub ancestor_search_depth: usize,

    /// Extra dispatch rules, checked before the built-in ones.
    #[serde(default)]
    pub handlers: Vec<HandlerRuleConfig>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            ancestor_search_depth: default_ancestor_search_depth(),
            handlers: Vec::new(),
        }
    }
}

const fn default_ancestor_search_depth() -> usize {
    DEFAULT_ANCESTOR_SEARCH_DEPTH
}

/// A `[[merge.handlers]]` entry.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandlerRuleConfig {
    /// Glob over file names (e.g. `"*.cfg"`, `"report-??.dat"`).
    #[serde(rename = "match", deserialize_with = "deserialize_glob")]
    pub match_glob: glob::Pattern,

    /// Handler for matching files.
    pub handler: ContentHandler,
}

fn deserialize_glob<'de, D>(deserializer: D) -> Result<glob::Pattern, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    glob::Pattern::new(&text)
        .map_err(|e| serde::de::Error::custom(format!("invalid pattern {text:?}: {e}")))
}

// ---------------------------------------------------------------------------
// SettingsConfig
// ---------------------------------------------------------------------------

/// Reserved `settings.ini` keys.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsConfig {
    /// Key merged as a union of version requirements.
    #[serde(default = "default_requirements_key")]
    pub requirements_key: String,

    /// Keys merged as delimited path lists.
    #[serde(default = "default_path_list_keys")]
    pub path_list_keys: Vec<String>,

    /// Path-list separator.
    #[serde(default = "default_path_list_delimiter")]
    pub path_list_delimiter: String,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            requirements_key: default_requirements_key(),
            path_list_keys: default_path_list_keys(),
            path_list_delimiter: default_path_list_delimiter(),
        }
    }
}

fn default_requirements_key() -> String {
    SettingsPolicy::default().requirements_key
}

fn default_path_list_keys() -> Vec<String> {
    SettingsPolicy::default().path_list_keys
}

fn default_path_list_delimiter() -> String {
    SettingsPolicy::default().path_list_delimiter
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Bundle store settings.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Device name stamped into IDs of bundles published from here.
    /// Lowercase letters and digits only.
    #[serde(default = "default_device")]
    pub device: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
        }
    }
}

fn default_device() -> String {
    "local".to_owned()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl BundleMergeConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML, unknown fields or an
    ///   invalid value, returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML, unknown fields or invalid values.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError {
            path: None,
            message,
        };
        if self.merge.ancestor_search_depth == 0 {
            return Err(invalid(
                "merge.ancestor_search_depth must be at least 1".to_owned(),
            ));
        }
        if self.settings.path_list_delimiter.is_empty() {
            return Err(invalid(
                "settings.path_list_delimiter must not be empty".to_owned(),
            ));
        }
        let device = &self.store.device;
        if device.is_empty()
            || !device
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(invalid(format!(
                "store.device {device:?} must be non-empty lowercase letters and digits"
            )));
        }
        Ok(())
    }

    /// The settings policy described by `[settings]`.
    #[must_use]
    pub fn settings_policy(&self) -> SettingsPolicy {
        SettingsPolicy {
            requirements_key: self.settings.requirements_key.clone(),
            path_list_keys: self.settings.path_list_keys.clone(),
            path_list_delimiter: self.settings.path_list_delimiter.clone(),
        }
    }

    /// The built-in dispatch table with `[[merge.handlers]]` in front.
    #[must_use]
    pub fn handler_registry(&self) -> HandlerRegistry {
        let rules: Vec<HandlerRule> = self
            .merge
            .handlers
            .iter()
            .map(|rule| HandlerRule {
                rule: NameRule::Glob(rule.match_glob.clone()),
                handler: rule.handler,
            })
            .collect();
        HandlerRegistry::standard()
            .with_leading_rules(rules)
            .with_settings(self.settings_policy())
    }

    /// A bundle merger configured from this file.
    #[must_use]
    pub fn merger(&self) -> BundleMerger {
        BundleMerger::new(self.handler_registry())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_fields() {
        let cfg = BundleMergeConfig::default();
        assert_eq!(cfg.merge.ancestor_search_depth, 64);
        assert!(cfg.merge.handlers.is_empty());
        assert_eq!(cfg.settings.requirements_key, "versionRequirements");
        assert_eq!(cfg.settings.path_list_keys, ["templatePath", "importPaths"]);
        assert_eq!(cfg.settings.path_list_delimiter, ";");
        assert_eq!(cfg.store.device, "local");
        assert_eq!(cfg.settings_policy(), SettingsPolicy::default());
    }

    #[test]
    fn parse_empty_string() {
        let cfg = BundleMergeConfig::parse("").unwrap();
        assert_eq!(cfg, BundleMergeConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[merge]
ancestor_search_depth = 8

[[merge.handlers]]
match = "*.cfg"
handler = "settings"

[[merge.handlers]]
match = "report-*.txt"
handler = "datafile"

[settings]
requirements_key = "needs"
path_list_keys = ["dirs"]
path_list_delimiter = ","

[store]
device = "laptop2"
"#;
        let cfg = BundleMergeConfig::parse(toml).unwrap();
        assert_eq!(cfg.merge.ancestor_search_depth, 8);
        assert_eq!(cfg.merge.handlers.len(), 2);
        assert_eq!(cfg.merge.handlers[0].match_glob.as_str(), "*.cfg");
        assert_eq!(cfg.merge.handlers[0].handler, ContentHandler::Settings);
        assert_eq!(cfg.merge.handlers[1].handler, ContentHandler::Datafile);
        assert_eq!(cfg.settings.requirements_key, "needs");
        assert_eq!(cfg.settings.path_list_keys, ["dirs"]);
        assert_eq!(cfg.settings.path_list_delimiter, ",");
        assert_eq!(cfg.store.device, "laptop2");
    }

    #[test]
    fn parse_partial_config_uses_defaults() {
        let cfg = BundleMergeConfig::parse("[settings]\npath_list_delimiter = \"|\"\n").unwrap();
        assert_eq!(cfg.settings.path_list_delimiter, "|");
        assert_eq!(cfg.settings.requirements_key, "versionRequirements");
        assert_eq!(cfg.merge, MergeConfig::default());
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        assert!(BundleMergeConfig::parse("[repo]\nbranch = \"main\"\n").is_err());
        assert!(BundleMergeConfig::parse("[merge]\ndepth = 3\n").is_err());
    }

    #[test]
    fn parse_rejects_invalid_values() {
        let err = BundleMergeConfig::parse("[[merge.handlers]]\nmatch = \"*\"\nhandler = \"binary\"\n")
            .unwrap_err();
        assert!(err.message.contains("line"), "{}", err.message);
        assert!(BundleMergeConfig::parse("[[merge.handlers]]\nmatch = \"[\"\nhandler = \"datafile\"\n").is_err());
        assert!(BundleMergeConfig::parse("[merge]\nancestor_search_depth = 0\n").is_err());
        assert!(BundleMergeConfig::parse("[store]\ndevice = \"My-PC\"\n").is_err());
        assert!(BundleMergeConfig::parse("[settings]\npath_list_delimiter = \"\"\n").is_err());
    }

    #[test]
    fn parse_includes_line_number_on_error() {
        let toml = "[merge]\n\nancestor_search_depth = \"deep\"\n";
        let err = BundleMergeConfig::parse(toml).unwrap_err();
        assert!(err.message.starts_with("line 3:"), "{}", err.message);
    }

    #[test]
    fn invalid_glob_is_reported_with_its_line() {
        let toml = "[merge]\nancestor_search_depth = 4\n\n[[merge.handlers]]\nmatch = \"[abc\"\nhandler = \"datafile\"\n";
        let err = BundleMergeConfig::parse(toml).unwrap_err();
        assert!(err.message.starts_with("line "), "{}", err.message);
        assert!(err.message.contains("invalid pattern \"[abc\""), "{}", err.message);
    }

    #[test]
    fn handler_registry_puts_config_rules_first() {
        let cfg = BundleMergeConfig::parse(
            "[[merge.handlers]]\nmatch = \"*.dat\"\nhandler = \"snapshot\"\n",
        )
        .unwrap();
        let registry = cfg.handler_registry();
        assert_eq!(registry.select("1.dat"), Some(ContentHandler::Snapshot));
        assert_eq!(registry.select("settings.ini"), Some(ContentHandler::Settings));
        assert_eq!(registry.select("notes.txt"), None);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = BundleMergeConfig::load(Path::new("/nonexistent/bundlemerge.toml")).unwrap();
        assert_eq!(cfg, BundleMergeConfig::default());
    }

    #[test]
    fn load_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundlemerge.toml");
        std::fs::write(&path, "[store]\ndevice = \"tablet\"\n").unwrap();
        let cfg = BundleMergeConfig::load(&path).unwrap();
        assert_eq!(cfg.store.device, "tablet");
    }

    #[test]
    fn load_invalid_file_shows_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid [[[toml").unwrap();
        let err = BundleMergeConfig::load(&path).unwrap_err();
        assert_eq!(err.path.as_deref(), Some(path.as_path()));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn config_error_display_without_path() {
        let err = ConfigError {
            path: None,
            message: "parse error".to_owned(),
        };
        assert_eq!(err.to_string(), "config error: parse error");
    }
}
