use std::path::PathBuf;

use crate::config::{CompressionSettings, Config, Lang, LiveConfig, Settings};
use crate::history::UploadHistory;
use crate::models::UploadRecord;

/// shared application state: live settings and the upload history
#[derive(Debug)]
pub struct AppState {
    pub config: LiveConfig,
    pub history: UploadHistory,
}

impl AppState {
    /// create a new app state from an initial settings value
    pub fn new(settings: Settings) -> Self {
        Self {
            config: LiveConfig::new(settings),
            history: UploadHistory::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Settings::from(config))
    }

    /// one consistent view of every setting a request needs
    pub fn settings(&self) -> Settings {
        self.config.snapshot()
    }

    pub fn save_dir(&self) -> Option<PathBuf> {
        self.settings().save_dir
    }

    pub fn compression_settings(&self) -> CompressionSettings {
        self.settings().compression
    }

    pub fn lang(&self) -> Lang {
        self.settings().lang
    }

    pub fn add_record(&self, record: UploadRecord) {
        self.history.add(record);
    }
}
