//! Detection collaborator integration.
//!
//! This core never performs inference. A background poller submits the
//! current latest frame of each detection-enabled camera to an external
//! AI server at a coarse fixed interval, and caches the returned
//! detections per camera. Serving paths overlay cached detections only
//! while they are younger than a short visibility window, so overlay
//! staleness is invisible to viewers without per-frame inference.
//!
//! The AI server is reached over HTTP: JPEG bytes in, a JSON list of
//! `{label, confidence, bbox}` out (some deployments nest the list under
//! a `detections` key; both shapes are accepted).

pub mod overlay;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::registry::StreamRegistry;
use crate::stream::CameraId;

/// How often the poller samples each detection-enabled camera.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long cached detections stay visible on served frames.
pub const DEFAULT_VISIBILITY_WINDOW: Duration = Duration::from_secs(1);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// One detected object, as returned by the AI server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    /// 0..1; some servers call this field `score`.
    #[serde(alias = "score")]
    pub confidence: f32,
    /// [x1, y1, x2, y2] in frame pixels.
    pub bbox: [f32; 4],
}

/// HTTP client for the external AI server.
pub struct DetectionClient {
    agent: ureq::Agent,
    base_url: String,
}

impl DetectionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build();
        Self {
            agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Submit one encoded frame and parse the detections.
    pub fn predict(&self, camera_id: &str, jpeg: &[u8]) -> Result<Vec<Detection>> {
        let url = format!("{}/predict", self.base_url);
        let response = self
            .agent
            .post(&url)
            .query("stream_id", camera_id)
            .set("Content-Type", "image/jpeg")
            .send_bytes(jpeg)
            .with_context(|| format!("submit frame for camera {}", camera_id))?;
        let value: serde_json::Value = response
            .into_json()
            .context("parse ai server response as json")?;
        parse_detections(value)
    }
}

/// Accept either a bare list or `{"detections": [...]}`. Malformed
/// entries are skipped, not fatal.
fn parse_detections(value: serde_json::Value) -> Result<Vec<Detection>> {
    let entries = match value {
        serde_json::Value::Array(entries) => entries,
        serde_json::Value::Object(mut map) => match map.remove("detections") {
            Some(serde_json::Value::Array(entries)) => entries,
            _ => return Err(anyhow!("ai response object has no detections list")),
        },
        other => return Err(anyhow!("unexpected ai response shape: {}", other)),
    };

    let mut detections = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<Detection>(entry) {
            Ok(det) => detections.push(det),
            Err(e) => log::debug!("skipping malformed detection: {}", e),
        }
    }
    Ok(detections)
}

struct CachedDetections {
    detections: Vec<Detection>,
    at: Instant,
}

/// Per-camera detection results with a bounded visibility window.
pub struct DetectionCache {
    inner: Mutex<HashMap<CameraId, CachedDetections>>,
    visibility: Duration,
}

impl DetectionCache {
    pub fn new(visibility: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            visibility,
        }
    }

    pub fn store(&self, camera_id: &str, detections: Vec<Detection>) {
        self.lock().insert(
            camera_id.to_string(),
            CachedDetections {
                detections,
                at: Instant::now(),
            },
        );
    }

    /// Cached detections for `camera_id` while still inside the visibility
    /// window; `None` once they have gone stale.
    pub fn fresh(&self, camera_id: &str) -> Option<Vec<Detection>> {
        let inner = self.lock();
        let cached = inner.get(camera_id)?;
        if cached.at.elapsed() > self.visibility {
            return None;
        }
        Some(cached.detections.clone())
    }

    pub fn clear(&self, camera_id: &str) {
        self.lock().remove(camera_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CameraId, CachedDetections>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for DetectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_VISIBILITY_WINDOW)
    }
}

/// Background poller feeding the detection cache.
pub struct DetectionWorker {
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl DetectionWorker {
    pub fn spawn(
        registry: Arc<StreamRegistry>,
        client: DetectionClient,
        cache: Arc<DetectionCache>,
        interval: Duration,
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("detect-poller".to_string())
            .spawn(move || run_poller(registry, client, cache, interval, shutdown_thread))
            .context("spawn detection poller")?;
        Ok(Self {
            shutdown,
            join: Some(join),
        })
    }

    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn run_poller(
    registry: Arc<StreamRegistry>,
    client: DetectionClient,
    cache: Arc<DetectionCache>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
) {
    // Rate-limit failure logging so a down AI server does not flood logs.
    let mut last_warn: Option<Instant> = None;

    while !shutdown.load(Ordering::SeqCst) {
        let started = Instant::now();
        for conn in registry.connections() {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            if !conn.detection_enabled() {
                continue;
            }
            // Detection consumes whatever the throttled loop last produced.
            let Some(frame) = conn.latest_frame() else {
                continue;
            };
            match client.predict(conn.camera_id(), frame.jpeg()) {
                Ok(detections) => {
                    log::debug!(
                        "camera {}: {} detections",
                        conn.camera_id(),
                        detections.len()
                    );
                    cache.store(conn.camera_id(), detections);
                }
                Err(e) => {
                    let warn_due = last_warn
                        .map(|at| at.elapsed() >= Duration::from_secs(60))
                        .unwrap_or(true);
                    if warn_due {
                        log::warn!("camera {}: ai prediction failed: {}", conn.camera_id(), e);
                        last_warn = Some(Instant::now());
                    } else {
                        log::debug!("camera {}: ai prediction failed: {}", conn.camera_id(), e);
                    }
                }
            }
        }

        let elapsed = started.elapsed();
        let remaining = interval.saturating_sub(elapsed);
        let deadline = Instant::now() + remaining;
        while !shutdown.load(Ordering::SeqCst) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50).min(left));
        }
    }
}
