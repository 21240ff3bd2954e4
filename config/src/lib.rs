pub mod crypto;
pub mod paths;
pub mod settings;
pub mod store;

pub use paths::PathManager;
pub use settings::{
    AVAILABLE_MODELS, DEFAULT_MODEL, IMAGE_MODEL, SETTINGS_KEY, Settings, SettingsError,
    SettingsStore,
};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, StoreError};

/// Environment variables consulted, in order, when no credential is set
pub const API_KEY_ENV_VARS: &[&str] = &["GEMINI_API_KEY", "API_KEY"];

/// Load environment variables from .env files.
/// First loads from ~/.env (home directory), then from ./.env (project directory).
/// Project directory values take precedence over home directory values.
/// Call this before parsing CLI args to ensure env vars are available.
pub fn load_env_file() {
    if let Some(home) = dirs::home_dir() {
        let home_env_path = home.join(".env");
        dotenv::from_path(home_env_path).ok();
    }

    dotenv::dotenv().ok();
}

/// Credential for backend calls: the user setting wins, then the environment.
pub fn resolve_api_key(settings: &Settings) -> Option<String> {
    resolve_api_key_with(settings, |name| std::env::var(name).ok())
}

pub fn resolve_api_key_with(
    settings: &Settings,
    env: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let non_blank = |key: &String| !key.trim().is_empty();

    settings
        .api_key
        .clone()
        .filter(non_blank)
        .or_else(|| {
            API_KEY_ENV_VARS
                .iter()
                .find_map(|name| env(name).filter(non_blank))
        })
}
