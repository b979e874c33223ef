use crate::domain::catalog::config::CatalogConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_true() -> bool {
    true
}

fn default_tick_ms() -> u64 {
    50
}

/// Runtime knobs of the economy.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct EconomySettings {
    /// Redeem platform purchases the player did not start in this session.
    /// When false they are parked in the unprocessed list instead.
    #[serde(default = "default_true")]
    pub process_background_purchases: bool,
    /// Period of the purchase queue loop.
    #[serde(default = "default_tick_ms")]
    pub purchase_tick_ms: u64,
    /// Where owned non-consumable products are persisted. Nothing is written when unset.
    #[serde(default)]
    pub owned_products_path: Option<PathBuf>,
}

impl Default for EconomySettings {
    fn default() -> Self {
        Self {
            process_background_purchases: true,
            purchase_tick_ms: default_tick_ms(),
            owned_products_path: None,
        }
    }
}

impl EconomySettings {
    pub fn purchase_tick(&self) -> Duration {
        Duration::from_millis(self.purchase_tick_ms.max(1))
    }
}

/// Top-level authored document: optional settings plus the catalog templates.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
pub struct EconomyConfig {
    #[serde(default)]
    pub settings: EconomySettings,
    #[serde(flatten)]
    pub catalog: CatalogConfig,
}

impl EconomyConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default_when_absent() {
        let config = EconomyConfig::from_json(r#"{"currencies": [{"key": "coin"}]}"#).unwrap();
        assert_eq!(config.settings, EconomySettings::default());
        assert_eq!(config.catalog.currencies.len(), 1);
    }

    #[test]
    fn test_partial_settings_keep_other_defaults() {
        let config =
            EconomyConfig::from_json(r#"{"settings": {"process_background_purchases": false}}"#)
                .unwrap();
        assert!(!config.settings.process_background_purchases);
        assert_eq!(config.settings.purchase_tick_ms, 50);
    }

    #[test]
    fn test_malformed_document_is_a_serialization_error() {
        assert!(matches!(
            EconomyConfig::from_json("{"),
            Err(crate::error::EconomyError::Serialization(_))
        ));
    }
}
