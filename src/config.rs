use std::path::PathBuf;
use std::sync::RwLock;

/// default jpeg quality when none is configured
pub const DEFAULT_IMAGE_QUALITY: i32 = 80;

/// quality bounds offered by the settings action
pub const MIN_SETTINGS_QUALITY: i32 = 30;
pub const MAX_SETTINGS_QUALITY: i32 = 95;

/// language of the served upload page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lang {
    #[default]
    Ja,
    En,
}

impl Lang {
    /// unknown or missing codes fall back to japanese
    pub fn parse(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" => Lang::En,
            _ => Lang::Ja,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Lang::Ja => "ja",
            Lang::En => "en",
        }
    }
}

/// image compression knobs, copied once per request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSettings {
    pub enabled: bool,
    pub quality: i32,
    pub keep_original: bool,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            quality: DEFAULT_IMAGE_QUALITY,
            keep_original: false,
        }
    }
}

/// application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// directory uploaded files are written to
    pub save_dir: PathBuf,
    /// language of the upload page
    pub lang: Lang,
    /// compression settings applied to image uploads
    pub compression: CompressionSettings,
    /// number of tokio worker threads
    pub worker_threads: usize,
}

impl Config {
    /// load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let save_dir = std::env::var("FILEBRIDGE_SAVE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_save_dir);

        Self {
            save_dir,
            lang: std::env::var("FILEBRIDGE_LANG")
                .map(|l| Lang::parse(&l))
                .unwrap_or_default(),
            compression: CompressionSettings {
                enabled: env_flag("FILEBRIDGE_COMPRESS_IMAGES"),
                quality: std::env::var("FILEBRIDGE_IMAGE_QUALITY")
                    .ok()
                    .and_then(|q| q.trim().parse().ok())
                    .filter(|q| *q != 0)
                    .unwrap_or(DEFAULT_IMAGE_QUALITY),
                keep_original: env_flag("FILEBRIDGE_KEEP_ORIGINAL"),
            },
            worker_threads: std::env::var("WORKER_THREADS")
                .ok()
                .and_then(|t| t.parse().ok())
                .filter(|t| *t > 0)
                .unwrap_or(8),
        }
    }
}

// ~/Downloads/FileBridge, or ./FileBridge when there is no home
fn default_save_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join("Downloads").join("FileBridge"))
        .unwrap_or_else(|| PathBuf::from("FileBridge"))
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// consistent view of the runtime settings at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub save_dir: Option<PathBuf>,
    pub lang: Lang,
    pub compression: CompressionSettings,
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            save_dir: Some(config.save_dir.clone()),
            lang: config.lang,
            compression: config.compression,
        }
    }
}

/// settings that the host may change while the server is running
#[derive(Debug)]
pub struct LiveConfig {
    inner: RwLock<Settings>,
}

impl LiveConfig {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub fn snapshot(&self) -> Settings {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_save_dir(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        tracing::info!("Save directory changed to {:?}", dir);
        self.update(|s| s.save_dir = Some(dir));
    }

    pub fn set_lang(&self, code: &str) {
        let lang = Lang::parse(code);
        self.update(|s| s.lang = lang);
    }

    /// quality is clamped to the range the settings screen offers
    pub fn set_compression(&self, enabled: bool, quality: i32, keep_original: bool) {
        let quality = quality.clamp(MIN_SETTINGS_QUALITY, MAX_SETTINGS_QUALITY);
        tracing::info!(
            "Compression settings changed: enabled={} quality={} keep_original={}",
            enabled,
            quality,
            keep_original
        );
        self.update(|s| {
            s.compression = CompressionSettings {
                enabled,
                quality,
                keep_original,
            }
        });
    }

    fn update(&self, apply: impl FnOnce(&mut Settings)) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        apply(&mut *guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            save_dir: Some(PathBuf::from("/tmp/fb")),
            lang: Lang::Ja,
            compression: CompressionSettings::default(),
        }
    }

    #[test]
    fn lang_falls_back_to_japanese() {
        assert_eq!(Lang::parse("en"), Lang::En);
        assert_eq!(Lang::parse("EN"), Lang::En);
        assert_eq!(Lang::parse("fr"), Lang::Ja);
        assert_eq!(Lang::parse(""), Lang::Ja);
    }

    #[test]
    fn compression_quality_is_clamped_by_settings_action() {
        let live = LiveConfig::new(settings());

        live.set_compression(true, 10, true);
        assert_eq!(live.snapshot().compression.quality, 30);

        live.set_compression(true, 100, false);
        let snap = live.snapshot();
        assert_eq!(snap.compression.quality, 95);
        assert!(snap.compression.enabled);
        assert!(!snap.compression.keep_original);
    }

    #[test]
    fn snapshot_is_detached_from_later_updates() {
        let live = LiveConfig::new(settings());
        let before = live.snapshot();

        live.set_save_dir("/tmp/elsewhere");
        live.set_lang("en");

        assert_eq!(before.save_dir, Some(PathBuf::from("/tmp/fb")));
        assert_eq!(before.lang, Lang::Ja);
        assert_eq!(live.snapshot().lang, Lang::En);
    }
}
