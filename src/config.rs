use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::categorize::{Categorizer, DEFAULT_CONVERTER_ANNOTATIONS, DEFAULT_MODEL_ANNOTATIONS};
use crate::cli::Cli;
use crate::decrypt::AesCbcCipher;
use crate::handler::{DecryptionSettings, SessionOptions};

pub const CONFIG_ENV: &str = "ENTITY_SCAN_CONFIG";
pub const KEY_ENV: &str = "ENTITY_SCAN_KEY";
pub const SEED_ENV: &str = "ENTITY_SCAN_SEED";

pub const DEFAULT_PROTECTED_PATH_MARKER: &str = "com/seassoon/";
pub const DEFAULT_SYNTHETIC_MARKER: &str = "$$";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    pub decryption: Option<DecryptionConfig>,
    pub threads: Option<usize>,
    pub model_annotations: Option<Vec<String>>,
    pub converter_annotations: Option<Vec<String>>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DecryptionConfig {
    #[serde(default = "default_protected_marker")]
    pub protected_path_marker: String,
    #[serde(default = "default_synthetic_marker")]
    pub synthetic_marker: String,
    /// Hex-encoded key bytes.
    pub decryption_key: String,
    #[serde(default)]
    pub key_derivation_seed: String,
}

impl std::fmt::Debug for DecryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptionConfig")
            .field("protected_path_marker", &self.protected_path_marker)
            .field("synthetic_marker", &self.synthetic_marker)
            .finish_non_exhaustive()
    }
}

fn default_protected_marker() -> String {
    DEFAULT_PROTECTED_PATH_MARKER.to_string()
}

fn default_synthetic_marker() -> String {
    DEFAULT_SYNTHETIC_MARKER.to_string()
}

impl DecryptionConfig {
    fn with_key(decryption_key: String) -> Self {
        Self {
            protected_path_marker: default_protected_marker(),
            synthetic_marker: default_synthetic_marker(),
            decryption_key,
            key_derivation_seed: String::new(),
        }
    }
}

impl ScanConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Applies `ENTITY_SCAN_KEY` / `ENTITY_SCAN_SEED` style overrides.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(KEY_ENV).filter(|k| !k.trim().is_empty()) {
            match self.decryption.as_mut() {
                Some(d) => d.decryption_key = key,
                None => self.decryption = Some(DecryptionConfig::with_key(key)),
            }
        }
        if let (Some(seed), Some(d)) = (lookup(SEED_ENV), self.decryption.as_mut()) {
            d.key_derivation_seed = seed;
        }
    }

    pub fn session_options(&self) -> Result<SessionOptions> {
        let decryption = match self.decryption.as_ref() {
            Some(d) => Some(DecryptionSettings {
                protected_path_marker: d.protected_path_marker.clone(),
                synthetic_marker: d.synthetic_marker.clone(),
                key: hex::decode(d.decryption_key.trim())
                    .context("decryption_key is not valid hex")?,
                key_derivation_seed: d.key_derivation_seed.clone(),
            }),
            None => None,
        };

        let model = self
            .model_annotations
            .clone()
            .unwrap_or_else(|| to_owned(DEFAULT_MODEL_ANNOTATIONS));
        let converter = self
            .converter_annotations
            .clone()
            .unwrap_or_else(|| to_owned(DEFAULT_CONVERTER_ANNOTATIONS));

        Ok(SessionOptions {
            decryption,
            decryptor: Arc::new(AesCbcCipher),
            categorizer: Categorizer::new(model, converter),
            threads: self.threads,
        })
    }
}

fn to_owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// `--config`, then `ENTITY_SCAN_CONFIG`, then the per-user default if it exists.
pub fn resolve_config_path(cli: &Cli) -> Option<PathBuf> {
    if let Some(p) = cli.config.clone() {
        return Some(p);
    }

    if let Ok(p) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(p));
    }

    default_config_path().filter(|p| p.exists())
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("entity-scan").join("config.json"))
}

pub fn load_config(cli: &Cli) -> Result<ScanConfig> {
    let mut config = match resolve_config_path(cli) {
        Some(path) => ScanConfig::from_file(&path)?,
        None => ScanConfig::default(),
    };
    config.apply_env(|name| env::var(name).ok());
    if cli.threads.is_some() {
        config.threads = cli.threads;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::handler::ScanSession;
    use std::collections::HashMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "entity_scan_config_test_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ))
    }

    #[test]
    fn from_file_fills_marker_defaults() -> Result<()> {
        let path = temp_path("config.json");
        std::fs::write(
            &path,
            r#"{
                "threads": 3,
                "decryption": {
                    "decryption_key": "21cfb3316afb9d00fbb8",
                    "key_derivation_seed": "suichaojar"
                }
            }"#,
        )?;

        let config = ScanConfig::from_file(&path)?;
        assert_eq!(config.threads, Some(3));
        let d = config.decryption.as_ref().unwrap();
        assert_eq!(d.protected_path_marker, "com/seassoon/");
        assert_eq!(d.synthetic_marker, "$$");

        let options = config.session_options()?;
        let settings = options.decryption.unwrap();
        assert_eq!(settings.key, vec![33, 207, 179, 49, 106, 251, 157, 0, 251, 184]);

        std::fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn from_file_rejects_unknown_keys() -> Result<()> {
        let path = temp_path("typo.json");
        std::fs::write(&path, r#"{ "thread": 3 }"#)?;
        let err = ScanConfig::from_file(&path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
        std::fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn env_key_enables_decryption_with_default_markers() {
        let env: HashMap<&str, &str> =
            HashMap::from([(KEY_ENV, "21cfb3316afb9d00fbb8"), (SEED_ENV, "seed")]);
        let mut config = ScanConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        let d = config.decryption.unwrap();
        assert_eq!(d.decryption_key, "21cfb3316afb9d00fbb8");
        assert_eq!(d.key_derivation_seed, "seed");
        assert_eq!(d.protected_path_marker, DEFAULT_PROTECTED_PATH_MARKER);
    }

    #[test]
    fn seed_without_key_is_ignored() {
        let mut config = ScanConfig::default();
        config.apply_env(|k| (k == SEED_ENV).then(|| "seed".to_string()));
        assert!(config.decryption.is_none());
    }

    #[test]
    fn bad_hex_is_reported_before_session() {
        let config = ScanConfig {
            decryption: Some(DecryptionConfig::with_key("zz".to_string())),
            ..ScanConfig::default()
        };
        let err = config.session_options().err().unwrap().to_string();
        assert!(err.contains("not valid hex"));
    }

    #[test]
    fn short_key_fails_session_construction() -> Result<()> {
        let mut d = DecryptionConfig::with_key("0102".to_string());
        d.key_derivation_seed = "seed".to_string();
        let config = ScanConfig {
            decryption: Some(d),
            ..ScanConfig::default()
        };
        let err = ScanSession::new(config.session_options()?).err().unwrap();
        assert!(matches!(err, ConfigError::InvalidKeyLength { actual: 2, .. }));
        Ok(())
    }

    #[test]
    fn debug_output_hides_key() {
        let d = DecryptionConfig::with_key("21cfb3316afb9d00fbb8".to_string());
        assert!(!format!("{d:?}").contains("21cf"));
    }
}
