use directories::BaseDirs;
use std::path::PathBuf;
use std::sync::OnceLock;

static DATA_DIR_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

const APP_DIR: &str = "armin";

pub struct PathManager;

impl PathManager {
    /// Set a custom data directory (useful for sandboxes and embedded targets)
    pub fn set_data_dir(path: PathBuf) {
        let _ = DATA_DIR_OVERRIDE.set(path);
    }

    fn base_data_dir() -> Option<PathBuf> {
        if let Some(d) = DATA_DIR_OVERRIDE.get() {
            return Some(d.clone());
        }
        BaseDirs::new().map(|d| d.data_dir().join(APP_DIR))
    }

    pub fn data_dir() -> Option<PathBuf> {
        Self::base_data_dir()
    }

    pub fn config_dir() -> Option<PathBuf> {
        if DATA_DIR_OVERRIDE.get().is_some() {
            return Self::data_dir();
        }
        BaseDirs::new().map(|d| d.config_dir().join(APP_DIR))
    }

    /// Key-value store backing persisted settings
    pub fn store_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("store.json"))
    }

    pub fn logs_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            if DATA_DIR_OVERRIDE.get().is_none() {
                if let Some(home) = dirs::home_dir() {
                    return Some(home.join("Library/Logs/Armin"));
                }
            }
        }
        Self::data_dir().map(|d| d.join("logs"))
    }

    pub fn log_file_path() -> Option<PathBuf> {
        Self::logs_dir().map(|d| d.join("armin.log"))
    }

    /// Where exported lessons and images land when no directory is given
    pub fn exports_dir() -> Option<PathBuf> {
        Self::data_dir().map(|d| d.join("exports"))
    }

    pub fn ensure_dirs_exist() -> std::io::Result<()> {
        for dir in [
            Self::data_dir(),
            Self::config_dir(),
            Self::logs_dir(),
            Self::exports_dir(),
        ]
        .into_iter()
        .flatten()
        {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
