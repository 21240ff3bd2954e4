//! Application settings and their persistence

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::crypto;
use crate::store::{KeyValueStore, StoreError};

/// Key under which the settings object lives in the store
pub const SETTINGS_KEY: &str = "armin_settings";

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const IMAGE_MODEL: &str = "gemini-2.5-flash-image";

/// Models offered by the settings editor: (id, label)
pub const AVAILABLE_MODELS: &[(&str, &str)] = &[
    ("gemini-3-flash-preview", "Gemini 3 Flash (recommended)"),
    ("gemini-3-pro-preview", "Gemini 3 Pro (advanced)"),
    ("gemini-2.0-flash-exp", "Gemini 2.0 Flash Exp"),
];

pub const DEFAULT_TEMPERATURE: f32 = 1.0;
pub const MIN_TEMPERATURE: f32 = 0.0;
pub const MAX_TEMPERATURE: f32 = 2.0;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Credential encryption failed: {0}")]
    Credential(String),
}

#[derive(Clone, PartialEq)]
pub struct Settings {
    pub model: String,
    /// Always within [`MIN_TEMPERATURE`, `MAX_TEMPERATURE`]
    pub temperature: f32,
    pub enable_search: bool,
    /// Plaintext in memory, sealed at rest
    pub api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            enable_search: true,
            api_key: None,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("enable_search", &self.enable_search)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Clamp into the accepted range; non-finite values fall back to the default.
pub fn clamp_temperature(value: f64) -> f32 {
    if !value.is_finite() {
        return DEFAULT_TEMPERATURE;
    }
    value.clamp(MIN_TEMPERATURE as f64, MAX_TEMPERATURE as f64) as f32
}

impl Settings {
    /// Lenient decode of a persisted settings object.
    ///
    /// Invalid fields are corrected rather than rejected: an out-of-range
    /// temperature is clamped, a missing or non-numeric one becomes 1.0.
    pub fn from_stored(raw: &str) -> Self {
        let object = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(object)) => object,
            Ok(_) | Err(_) => {
                warn!("Persisted settings are not a JSON object, using defaults");
                return Self::default();
            }
        };

        let model = object
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let temperature = match object.get("temperature").and_then(Value::as_f64) {
            Some(t) => clamp_temperature(t),
            None => DEFAULT_TEMPERATURE,
        };

        let enable_search = object
            .get("enableSearch")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let api_key = object
            .get("apiKey")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .and_then(|sealed| match crypto::open_credential(sealed) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(error = %e, "Stored credential could not be decrypted, ignoring it");
                    None
                }
            });

        Self {
            model,
            temperature,
            enable_search,
            api_key,
        }
    }

    /// Encode for persistence, sealing the credential
    pub fn to_stored(&self) -> Result<String, SettingsError> {
        let mut object = Map::new();
        object.insert("model".into(), Value::from(self.model.clone()));
        object.insert("temperature".into(), Value::from(self.temperature as f64));
        object.insert("enableSearch".into(), Value::from(self.enable_search));
        if let Some(key) = &self.api_key {
            let sealed = crypto::seal_credential(key).map_err(SettingsError::Credential)?;
            object.insert("apiKey".into(), Value::from(sealed));
        }
        Ok(Value::Object(object).to_string())
    }

    fn normalize(&mut self) {
        self.temperature = clamp_temperature(self.temperature as f64);
        if self.model.trim().is_empty() {
            self.model = DEFAULT_MODEL.to_string();
        }
        if self.api_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            self.api_key = None;
        }
    }
}

/// Single-writer owner of the live settings.
///
/// Readers hold a [`watch::Receiver`] and take snapshots; an exchange that
/// already captured a snapshot is unaffected by later mutations.
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    /// Read once from the store. A missing or unreadable entry yields defaults.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let settings = match store.get(SETTINGS_KEY) {
            Ok(Some(raw)) => Settings::from_stored(&raw),
            Ok(None) => Settings::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read persisted settings, using defaults");
                Settings::default()
            }
        };
        debug!(?settings, "Settings loaded");

        let (tx, _) = watch::channel(settings);
        Self { store, tx }
    }

    pub fn current(&self) -> Settings {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Apply a mutation, persist it, then publish it.
    ///
    /// Nothing is published when persistence fails.
    pub fn update(&self, mutate: impl FnOnce(&mut Settings)) -> Result<Settings, SettingsError> {
        let mut next = self.current();
        mutate(&mut next);
        next.normalize();

        self.store.set(SETTINGS_KEY, &next.to_stored()?)?;
        self.tx.send_replace(next.clone());
        debug!(settings = ?next, "Settings updated");
        Ok(next)
    }

    pub fn set_model(&self, model: impl Into<String>) -> Result<Settings, SettingsError> {
        let model = model.into();
        self.update(|s| s.model = model)
    }

    pub fn set_temperature(&self, temperature: f32) -> Result<Settings, SettingsError> {
        self.update(|s| s.temperature = temperature)
    }

    pub fn set_search(&self, enabled: bool) -> Result<Settings, SettingsError> {
        self.update(|s| s.enable_search = enabled)
    }

    pub fn set_api_key(&self, api_key: Option<String>) -> Result<Settings, SettingsError> {
        self.update(|s| s.api_key = api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_temperature_clamped_high() {
        let settings = Settings::from_stored(r#"{"model":"m","temperature":5.0,"enableSearch":false}"#);
        assert_eq!(settings.temperature, 2.0);
        assert_eq!(settings.model, "m");
        assert!(!settings.enable_search);
    }

    #[test]
    fn test_temperature_clamped_low() {
        let settings = Settings::from_stored(r#"{"temperature":-1.0}"#);
        assert_eq!(settings.temperature, 0.0);
    }

    #[test]
    fn test_temperature_missing_or_invalid_defaults() {
        assert_eq!(Settings::from_stored(r#"{"model":"m"}"#).temperature, 1.0);
        assert_eq!(Settings::from_stored(r#"{"temperature":"hot"}"#).temperature, 1.0);
        assert_eq!(Settings::from_stored(r#"{"temperature":null}"#).temperature, 1.0);
    }

    #[test]
    fn test_garbage_loads_defaults() {
        assert_eq!(Settings::from_stored("[1,2,3]"), Settings::default());
        assert_eq!(Settings::from_stored("{{{"), Settings::default());
    }

    #[test]
    fn test_stored_credential_is_sealed() {
        let settings = Settings {
            api_key: Some("AIza-secret".to_string()),
            ..Settings::default()
        };
        let raw = settings.to_stored().unwrap();
        assert!(!raw.contains("AIza-secret"));

        let loaded = Settings::from_stored(&raw);
        assert_eq!(loaded.api_key.as_deref(), Some("AIza-secret"));
    }

    #[test]
    fn test_undecryptable_credential_loads_as_absent() {
        let settings = Settings::from_stored(r#"{"apiKey":"AAAA"}"#);
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn test_debug_redacts_credential() {
        let settings = Settings {
            api_key: Some("AIza-secret".to_string()),
            ..Settings::default()
        };
        assert!(!format!("{:?}", settings).contains("AIza-secret"));
    }

    #[test]
    fn test_store_load_corrects_persisted_value() {
        let store = Arc::new(MemoryStore::with_value(SETTINGS_KEY, r#"{"temperature":9}"#));
        let settings = SettingsStore::load(store);
        assert_eq!(settings.current().temperature, 2.0);
    }

    #[test]
    fn test_update_persists_and_publishes() {
        let store = Arc::new(MemoryStore::new());
        let settings = SettingsStore::load(store.clone());
        let rx = settings.subscribe();

        settings.set_temperature(7.5).unwrap();
        settings.set_model("gemini-3-pro-preview").unwrap();

        assert_eq!(rx.borrow().temperature, 2.0);
        assert_eq!(rx.borrow().model, "gemini-3-pro-preview");

        let raw = store.get(SETTINGS_KEY).unwrap().unwrap();
        let reloaded = Settings::from_stored(&raw);
        assert_eq!(reloaded.temperature, 2.0);
        assert_eq!(reloaded.model, "gemini-3-pro-preview");
    }

    #[test]
    fn test_snapshot_unaffected_by_later_update() {
        let settings = SettingsStore::load(Arc::new(MemoryStore::new()));
        let snapshot = settings.current();
        settings.set_search(false).unwrap();
        assert!(snapshot.enable_search);
        assert!(!settings.current().enable_search);
    }

    #[test]
    fn test_blank_api_key_clears_credential() {
        let settings = SettingsStore::load(Arc::new(MemoryStore::new()));
        settings.set_api_key(Some("key".into())).unwrap();
        settings.set_api_key(Some("   ".into())).unwrap();
        assert!(settings.current().api_key.is_none());
    }
}
