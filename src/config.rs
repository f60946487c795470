use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::stream::StreamSettings;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8780";
const DEFAULT_AI_URL: &str = "http://127.0.0.1:8501";
const DEFAULT_AI_INTERVAL_MS: u64 = 500;
const DEFAULT_AI_VISIBILITY_MS: u64 = 1000;
const DEFAULT_MAX_FPS: u32 = 10;
const DEFAULT_FRESHNESS_SECS: u64 = 30;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 2;

#[derive(Debug, Deserialize, Default)]
struct StreamdConfigFile {
    api: Option<ApiConfigFile>,
    streams: Option<StreamTuningFile>,
    ai: Option<AiConfigFile>,
    cameras: Option<Vec<CameraConfigFile>>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamTuningFile {
    max_fps: Option<u32>,
    output_width: Option<u32>,
    output_height: Option<u32>,
    jpeg_quality: Option<u8>,
    freshness_secs: Option<u64>,
    queue_capacity: Option<usize>,
    backoff_base_secs: Option<u64>,
    backoff_cap_secs: Option<u64>,
    stop_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct AiConfigFile {
    enabled: Option<bool>,
    url: Option<String>,
    interval_ms: Option<u64>,
    visibility_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CameraConfigFile {
    id: String,
    name: Option<String>,
    url: String,
    #[serde(default)]
    detection: bool,
}

#[derive(Debug, Clone)]
pub struct StreamdConfig {
    pub api_addr: String,
    pub streams: StreamSettings,
    pub ai: AiSettings,
    pub cameras: Vec<CameraEntry>,
}

#[derive(Debug, Clone)]
pub struct AiSettings {
    pub enabled: bool,
    pub url: String,
    pub poll_interval: Duration,
    pub visibility: Duration,
}

#[derive(Debug, Clone)]
pub struct CameraEntry {
    pub id: String,
    pub name: String,
    pub url: String,
    pub detection: bool,
}

impl StreamdConfig {
    /// Config file path comes from `--config` or `STREAMD_CONFIG`; with
    /// neither set, defaults apply and no cameras are preconfigured.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("STREAMD_CONFIG").ok();
        let path = explicit_path
            .map(|p| p.to_path_buf())
            .or_else(|| env_path.map(std::path::PathBuf::from));
        let file_cfg = match path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamdConfigFile) -> Self {
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());

        let defaults = StreamSettings::default();
        let tuning = file.streams.unwrap_or_default();
        let streams = StreamSettings {
            max_fps: tuning.max_fps.unwrap_or(DEFAULT_MAX_FPS),
            output_width: tuning.output_width.unwrap_or(defaults.output_width),
            output_height: tuning.output_height.unwrap_or(defaults.output_height),
            jpeg_quality: tuning.jpeg_quality.unwrap_or(defaults.jpeg_quality),
            freshness: Duration::from_secs(
                tuning.freshness_secs.unwrap_or(DEFAULT_FRESHNESS_SECS),
            ),
            queue_capacity: tuning.queue_capacity.unwrap_or(defaults.queue_capacity),
            backoff_base: tuning
                .backoff_base_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_base),
            backoff_cap: tuning
                .backoff_cap_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.backoff_cap),
            stop_timeout: Duration::from_secs(
                tuning.stop_timeout_secs.unwrap_or(DEFAULT_STOP_TIMEOUT_SECS),
            ),
        };

        let ai_file = file.ai.unwrap_or_default();
        let ai = AiSettings {
            enabled: ai_file.enabled.unwrap_or(false),
            url: ai_file.url.unwrap_or_else(|| DEFAULT_AI_URL.to_string()),
            poll_interval: Duration::from_millis(
                ai_file.interval_ms.unwrap_or(DEFAULT_AI_INTERVAL_MS),
            ),
            visibility: Duration::from_millis(
                ai_file.visibility_ms.unwrap_or(DEFAULT_AI_VISIBILITY_MS),
            ),
        };

        let cameras = file
            .cameras
            .unwrap_or_default()
            .into_iter()
            .map(|camera| CameraEntry {
                name: camera.name.unwrap_or_else(|| camera.id.clone()),
                id: camera.id,
                url: camera.url,
                detection: camera.detection,
            })
            .collect();

        Self {
            api_addr,
            streams,
            ai,
            cameras,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("STREAMD_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(url) = std::env::var("STREAMD_AI_URL") {
            if !url.trim().is_empty() {
                self.ai.url = url;
                self.ai.enabled = true;
            }
        }
        if let Ok(fps) = std::env::var("STREAMD_MAX_FPS") {
            let parsed: u32 = fps
                .parse()
                .map_err(|_| anyhow!("STREAMD_MAX_FPS must be an integer"))?;
            self.streams.max_fps = parsed;
        }
        if let Ok(freshness) = std::env::var("STREAMD_FRESHNESS_SECS") {
            let seconds: u64 = freshness.parse().map_err(|_| {
                anyhow!("STREAMD_FRESHNESS_SECS must be an integer number of seconds")
            })?;
            self.streams.freshness = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.streams.max_fps == 0 {
            return Err(anyhow!("streams.max_fps must be greater than zero"));
        }
        if self.streams.jpeg_quality == 0 || self.streams.jpeg_quality > 100 {
            return Err(anyhow!("streams.jpeg_quality must be between 1 and 100"));
        }
        if self.streams.queue_capacity == 0 {
            return Err(anyhow!("streams.queue_capacity must be greater than zero"));
        }
        if self.streams.backoff_base.is_zero() {
            return Err(anyhow!("streams.backoff_base_secs must be greater than zero"));
        }
        if self.streams.backoff_cap < self.streams.backoff_base {
            return Err(anyhow!(
                "streams.backoff_cap_secs must be at least backoff_base_secs"
            ));
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.id.trim().is_empty() {
                return Err(anyhow!("camera ids must not be empty"));
            }
            if camera.url.trim().is_empty() {
                return Err(anyhow!("camera {} has an empty url", camera.id));
            }
            if !seen.insert(camera.id.as_str()) {
                return Err(anyhow!("duplicate camera id: {}", camera.id));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<StreamdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
