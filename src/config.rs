use crate::app_dirs::AppDirs;
use crate::cdp::PageSelectors;
use crate::round::RoundSettings;
use crate::supervisor::SupervisorSettings;
use crate::surface::Rgb;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Every tunable of the automation. Missing keys fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub round_duration_ms: u64,
    /// 0 disables the periodic page refresh.
    pub refresh_interval_ms: u64,
    pub page_load_delay_ms: u64,
    pub focus_settle_ms: u64,
    pub completion_settle_ms: u64,
    pub post_submit_ms: u64,
    pub restart_response_ms: u64,
    pub retry_wait_ms: u64,
    pub field_poll_ms: u64,
    pub word_poll_ms: u64,
    pub post_word_pause_ms: u64,
    pub supervisor_backoff_ms: u64,
    pub error_probability: f64,
    pub active_color: Rgb,
    pub selectors: PageSelectors,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            round_duration_ms: 15_000,
            refresh_interval_ms: 600_000,
            page_load_delay_ms: 3_000,
            focus_settle_ms: 600,
            completion_settle_ms: 10_000,
            post_submit_ms: 5_000,
            restart_response_ms: 1_000,
            retry_wait_ms: 2_000,
            field_poll_ms: 1_000,
            word_poll_ms: 500,
            post_word_pause_ms: 150,
            supervisor_backoff_ms: 5_000,
            error_probability: 0.02,
            active_color: Rgb::WHITE,
            selectors: PageSelectors::default(),
        }
    }
}

impl Config {
    /// Clamp values that would otherwise stall or panic the loop.
    pub fn validated(mut self) -> Self {
        if !(0.0..=1.0).contains(&self.error_probability) {
            warn!(
                error_probability = self.error_probability,
                "error probability outside [0, 1], clamping"
            );
            self.error_probability = if self.error_probability.is_nan() {
                0.0
            } else {
                self.error_probability.clamp(0.0, 1.0)
            };
        }
        // a zero poll would spin against the page without yielding
        self.field_poll_ms = self.field_poll_ms.max(1);
        self.word_poll_ms = self.word_poll_ms.max(1);
        self.retry_wait_ms = self.retry_wait_ms.max(1);
        self.supervisor_backoff_ms = self.supervisor_backoff_ms.max(1);
        self
    }
}

impl From<&Config> for RoundSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            round_duration: Duration::from_millis(cfg.round_duration_ms),
            focus_settle: Duration::from_millis(cfg.focus_settle_ms),
            completion_settle: Duration::from_millis(cfg.completion_settle_ms),
            post_submit: Duration::from_millis(cfg.post_submit_ms),
            restart_response: Duration::from_millis(cfg.restart_response_ms),
            retry_wait: Duration::from_millis(cfg.retry_wait_ms),
            field_poll: Duration::from_millis(cfg.field_poll_ms),
            word_poll: Duration::from_millis(cfg.word_poll_ms),
            post_word_pause: Duration::from_millis(cfg.post_word_pause_ms),
            error_probability: cfg.error_probability,
            active_color: cfg.active_color,
        }
    }
}

impl From<&Config> for SupervisorSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            page_load_delay: Duration::from_millis(cfg.page_load_delay_ms),
            backoff: Duration::from_millis(cfg.supervisor_backoff_ms),
            refresh_interval: (cfg.refresh_interval_ms > 0)
                .then(|| Duration::from_millis(cfg.refresh_interval_ms)),
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            path: AppDirs::config_path(),
        }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        let Ok(bytes) = fs::read(&self.path) else {
            return Config::default();
        };
        match serde_json::from_slice::<Config>(&bytes) {
            Ok(cfg) => cfg.validated(),
            Err(err) => {
                warn!(path = %self.path.display(), %err, "ignoring malformed config");
                Config::default()
            }
        }
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).map_err(std::io::Error::other)?;
        fs::write(&self.path, data)
    }
}
