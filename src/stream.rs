//! Per-camera stream connections.
//!
//! A `StreamConnection` owns one live connection to one camera. Its worker
//! thread runs the capture loop: open the source, throttle to the target
//! rate, resize and re-encode each accepted frame, publish to the
//! `FrameBuffer`, and drive the reconnect backoff on failure.
//!
//! The loop handles every failure locally; nothing propagates to callers
//! of `start()`, `stop()`, `latest_frame()`, or `status()`. Consumers see
//! a frozen or absent frame plus a status flag, never an error.
//!
//! Concurrency: one worker thread per connection, publication strictly
//! sequential within it. All sleeps (rate limiting, backoff) are sliced
//! so `stop()` completes within its bounded timeout even mid-backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::encode;
use crate::frame::{Frame, FrameBuffer, DEFAULT_FRESHNESS, DEFAULT_QUEUE_CAPACITY};
use crate::ingest::{self, FrameSource, SourceError};
use crate::reconnect::{ReconnectPolicy, ReconnectSnapshot, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP};

/// Opaque camera identifier, supplied by the caller.
pub type CameraId = String;

/// Number of consecutive read failures retried after a short fixed delay
/// before the exponential backoff takes over.
const FAST_RETRY_LIMIT: u32 = 3;
const FAST_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Granularity of interruptible sleeps inside the capture loop.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// A camera feed address plus its detection flag.
#[derive(Debug, Clone)]
pub struct StreamSource {
    pub url: String,
    pub detection_enabled: bool,
}

impl StreamSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            detection_enabled: false,
        }
    }

    pub fn with_detection(mut self, enabled: bool) -> Self {
        self.detection_enabled = enabled;
        self
    }
}

/// Capture-loop state, one per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Backoff,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Backoff => "backoff",
        }
    }
}

/// Tunables shared by every connection a registry creates.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// Maximum accepted frame rate, regardless of source rate.
    pub max_fps: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub jpeg_quality: u8,
    /// Maximum frame age before `latest_frame()` reports absence.
    pub freshness: Duration,
    pub queue_capacity: usize,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Upper bound on how long `stop()` waits for the worker to exit.
    pub stop_timeout: Duration,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            max_fps: 10,
            output_width: encode::OUTPUT_WIDTH,
            output_height: encode::OUTPUT_HEIGHT,
            jpeg_quality: encode::JPEG_QUALITY,
            freshness: DEFAULT_FRESHNESS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            stop_timeout: Duration::from_secs(2),
        }
    }
}

impl StreamSettings {
    fn frame_interval(&self) -> Duration {
        if self.max_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis((1000 / self.max_fps).max(1) as u64)
        }
    }
}

/// Read-only snapshot of a connection, safe to take at any time.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub running: bool,
    pub state: ConnectionState,
    pub healthy: bool,
    pub has_recent_frame: bool,
    pub last_frame_age_seconds: Option<f64>,
    pub queue_depth: usize,
    pub reconnect_attempts: u32,
}

/// Opens a `FrameSource` for a stream. Swappable so tests can inject
/// scripted sources.
pub type SourceFactory =
    Arc<dyn Fn(&StreamSource) -> Result<Box<dyn FrameSource>, SourceError> + Send + Sync>;

struct Shared {
    /// Worker loop is alive.
    running: AtomicBool,
    /// Stop flag of the current worker. Each `start()` installs a fresh
    /// flag so a worker detached by a timed-out `stop()` can never be
    /// revived by a later restart.
    stop_flag: Mutex<Arc<AtomicBool>>,
    state: Mutex<ConnectionState>,
    policy: Mutex<ReconnectPolicy>,
}

/// One live connection to one camera.
pub struct StreamConnection {
    camera_id: CameraId,
    source: Mutex<StreamSource>,
    settings: StreamSettings,
    buffer: Arc<FrameBuffer>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    factory: SourceFactory,
}

impl StreamConnection {
    pub fn new(camera_id: CameraId, source: StreamSource, settings: StreamSettings) -> Self {
        Self::with_factory(
            camera_id,
            source,
            settings,
            Arc::new(|source: &StreamSource| ingest::open_source(&source.url)),
        )
    }

    pub fn with_factory(
        camera_id: CameraId,
        source: StreamSource,
        settings: StreamSettings,
        factory: SourceFactory,
    ) -> Self {
        let buffer = Arc::new(FrameBuffer::with_settings(
            settings.queue_capacity,
            settings.freshness,
        ));
        let policy = ReconnectPolicy::with_limits(settings.backoff_base, settings.backoff_cap);
        Self {
            camera_id,
            source: Mutex::new(source),
            settings,
            buffer,
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                stop_flag: Mutex::new(Arc::new(AtomicBool::new(true))),
                state: Mutex::new(ConnectionState::Disconnected),
                policy: Mutex::new(policy),
            }),
            worker: Mutex::new(None),
            factory,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn source(&self) -> StreamSource {
        lock(&self.source).clone()
    }

    pub fn detection_enabled(&self) -> bool {
        lock(&self.source).detection_enabled
    }

    pub fn set_detection_enabled(&self, enabled: bool) {
        lock(&self.source).detection_enabled = enabled;
    }

    /// Replace the feed address. Takes effect on the next (re)connect.
    pub fn update_source(&self, source: StreamSource) {
        *lock(&self.source) = source;
    }

    /// Launch the capture loop if not already running. Idempotent; returns
    /// immediately.
    pub fn start(self: &Arc<Self>) {
        let mut worker = lock(&self.worker);
        if self.shared.running.load(Ordering::SeqCst) {
            log::debug!("camera {}: stream already running", self.camera_id);
            return;
        }
        // Reap a worker from a previous run that has already exited.
        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }

        let stop = Arc::new(AtomicBool::new(false));
        *lock(&self.shared.stop_flag) = stop.clone();
        self.shared.running.store(true, Ordering::SeqCst);
        let conn = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("stream-{}", self.camera_id))
            .spawn(move || conn.capture_loop(stop));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                log::info!("started camera stream {}", self.camera_id);
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                log::error!("camera {}: failed to spawn worker: {}", self.camera_id, e);
            }
        }
    }

    /// Signal loop termination and wait up to the bounded stop timeout.
    /// Idempotent. If the worker fails to exit in time the condition is
    /// logged and the thread is detached; status reports stopped either way.
    /// A detached worker releases its source handle as soon as its current
    /// bounded read returns, not at the moment `stop()` returns.
    pub fn stop(&self) {
        let mut worker = lock(&self.worker);
        lock(&self.shared.stop_flag).store(true, Ordering::SeqCst);

        if worker.is_none() && !self.shared.running.load(Ordering::SeqCst) {
            return;
        }

        let deadline = Instant::now() + self.settings.stop_timeout;
        while self.shared.running.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }

        if self.shared.running.load(Ordering::SeqCst) {
            log::error!(
                "camera {}: stop timed out after {:?}; detaching worker",
                self.camera_id,
                self.settings.stop_timeout
            );
            self.shared.running.store(false, Ordering::SeqCst);
            self.set_state(ConnectionState::Disconnected);
            worker.take();
        } else if let Some(handle) = worker.take() {
            let _ = handle.join();
        }
        log::info!("stopped camera stream {}", self.camera_id);
    }

    /// The most recent non-stale encoded frame, or `None`. Non-blocking.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.buffer.latest()
    }

    /// Shared frame cache, for consumers that drain the secondary queue.
    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.buffer
    }

    /// Non-blocking status snapshot. Performs no I/O.
    pub fn status(&self) -> StreamStatus {
        let running = self.shared.running.load(Ordering::SeqCst);
        let state = *lock(&self.shared.state);
        let last_frame_age = self.buffer.last_frame_age();
        let has_recent_frame = last_frame_age
            .map(|age| age <= self.buffer.freshness())
            .unwrap_or(false);
        StreamStatus {
            running,
            state,
            healthy: running && has_recent_frame,
            has_recent_frame,
            last_frame_age_seconds: last_frame_age.map(|age| age.as_secs_f64()),
            queue_depth: self.buffer.queue_depth(),
            reconnect_attempts: lock(&self.shared.policy).attempts(),
        }
    }

    pub fn reconnect_snapshot(&self) -> ReconnectSnapshot {
        lock(&self.shared.policy).snapshot()
    }

    fn set_state(&self, state: ConnectionState) {
        *lock(&self.shared.state) = state;
    }

    /// Sleep for `total`, waking early when this worker's stop is requested.
    fn sleep_interruptible(&self, stop: &AtomicBool, total: Duration) {
        let deadline = Instant::now() + total;
        while !stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    fn capture_loop(self: Arc<Self>, stop: Arc<AtomicBool>) {
        let mut read_failures = 0u32;

        while !stop.load(Ordering::SeqCst) {
            if !lock(&self.shared.policy).should_attempt(Instant::now()) {
                self.sleep_interruptible(&stop, SLEEP_SLICE);
                continue;
            }

            self.set_state(ConnectionState::Connecting);
            let source_cfg = self.source();
            let mut source = match self.open_connected(&source_cfg) {
                Ok(source) => source,
                Err(e) => {
                    let delay = {
                        let mut policy = lock(&self.shared.policy);
                        policy.record_failure(Instant::now());
                        policy.current_delay()
                    };
                    log::warn!(
                        "camera {}: {}; retrying in {:?}",
                        self.camera_id,
                        e,
                        delay
                    );
                    self.set_state(ConnectionState::Backoff);
                    self.sleep_interruptible(&stop, delay);
                    continue;
                }
            };

            lock(&self.shared.policy).record_success(Instant::now());
            self.set_state(ConnectionState::Streaming);
            log::info!(
                "camera {}: streaming from {}",
                self.camera_id,
                source_cfg.url
            );

            let failure = self.steady_state(&stop, source.as_mut(), &mut read_failures);
            // Release the source exactly once, on every exit path.
            source.close();

            let Some(err) = failure else {
                break;
            };

            let delay = if read_failures <= FAST_RETRY_LIMIT {
                FAST_RETRY_DELAY.min(self.settings.backoff_base)
            } else {
                let mut policy = lock(&self.shared.policy);
                policy.record_failure(Instant::now());
                policy.current_delay()
            };
            log::warn!(
                "camera {}: {}; reconnecting in {:?} (failure #{})",
                self.camera_id,
                err,
                delay,
                read_failures
            );
            self.set_state(ConnectionState::Backoff);
            self.sleep_interruptible(&stop, delay);
        }

        // A worker detached by a timed-out stop() must not clobber the
        // state of a replacement loop started after it was given up on.
        let current = lock(&self.shared.stop_flag).clone();
        if Arc::ptr_eq(&current, &stop) {
            self.set_state(ConnectionState::Disconnected);
            self.shared.running.store(false, Ordering::SeqCst);
        }
        log::debug!("camera {}: capture loop exited", self.camera_id);
    }

    fn open_connected(
        &self,
        source_cfg: &StreamSource,
    ) -> Result<Box<dyn FrameSource>, SourceError> {
        let mut source = (self.factory)(source_cfg)?;
        source.connect()?;
        Ok(source)
    }

    /// Read, throttle, encode, publish until shutdown or a read failure.
    /// Returns the failure, or `None` when exiting on shutdown.
    fn steady_state(
        &self,
        stop: &AtomicBool,
        source: &mut dyn FrameSource,
        read_failures: &mut u32,
    ) -> Option<SourceError> {
        let interval = self.settings.frame_interval();
        let mut last_accept: Option<Instant> = None;

        loop {
            if stop.load(Ordering::SeqCst) {
                return None;
            }

            if let Some(last) = last_accept {
                let since = last.elapsed();
                if since < interval {
                    std::thread::sleep(SLEEP_SLICE.min(interval - since));
                    continue;
                }
            }

            match source.read_frame() {
                Ok(raw) => {
                    *read_failures = 0;
                    last_accept = Some(Instant::now());
                    match encode::encode_frame(
                        &raw,
                        self.settings.output_width,
                        self.settings.output_height,
                        self.settings.jpeg_quality,
                    ) {
                        Ok(jpeg) => {
                            self.buffer.publish(Frame::new(
                                jpeg,
                                self.settings.output_width,
                                self.settings.output_height,
                            ));
                        }
                        Err(e) => {
                            // Encode failure drops the frame; the loop continues.
                            log::warn!("camera {}: dropping frame: {}", self.camera_id, e);
                        }
                    }
                }
                Err(e) => {
                    *read_failures += 1;
                    return Some(e);
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::RawImage;
    use std::sync::atomic::AtomicUsize;

    /// Scripted source: fails to open `open_failures` times, serves
    /// `undecodable_frames` frames with a broken pixel buffer, then serves
    /// tiny valid frames, optionally failing reads after
    /// `frames_before_error`.
    struct ScriptedSource {
        connects: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        open_failures: Arc<AtomicUsize>,
        undecodable_frames: Arc<AtomicUsize>,
        frames_before_error: Option<usize>,
        frames_served: usize,
    }

    impl FrameSource for ScriptedSource {
        fn connect(&mut self) -> Result<(), SourceError> {
            if self.open_failures.load(Ordering::SeqCst) > 0 {
                self.open_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(SourceError::open("scripted open failure"));
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn read_frame(&mut self) -> Result<RawImage, SourceError> {
            if let Some(limit) = self.frames_before_error {
                if self.frames_served >= limit {
                    return Err(SourceError::read("scripted read failure"));
                }
            }
            self.frames_served += 1;
            if self.undecodable_frames.load(Ordering::SeqCst) > 0 {
                self.undecodable_frames.fetch_sub(1, Ordering::SeqCst);
                // Pixel buffer too short for the claimed dimensions.
                return Ok(RawImage {
                    pixels: vec![128; 5],
                    width: 4,
                    height: 4,
                });
            }
            Ok(RawImage {
                pixels: vec![128; 4 * 4 * 3],
                width: 4,
                height: 4,
            })
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Script {
        connects: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        open_failures: Arc<AtomicUsize>,
        undecodable_frames: Arc<AtomicUsize>,
        frames_before_error: Option<usize>,
    }

    impl Script {
        fn new(open_failures: usize, frames_before_error: Option<usize>) -> Self {
            Self {
                connects: Arc::new(AtomicUsize::new(0)),
                closes: Arc::new(AtomicUsize::new(0)),
                open_failures: Arc::new(AtomicUsize::new(open_failures)),
                undecodable_frames: Arc::new(AtomicUsize::new(0)),
                frames_before_error,
            }
        }

        fn undecodable(self, frames: usize) -> Self {
            self.undecodable_frames.store(frames, Ordering::SeqCst);
            self
        }

        fn factory(&self) -> SourceFactory {
            let connects = self.connects.clone();
            let closes = self.closes.clone();
            let open_failures = self.open_failures.clone();
            let undecodable_frames = self.undecodable_frames.clone();
            let frames_before_error = self.frames_before_error;
            Arc::new(move |_source: &StreamSource| {
                Ok(Box::new(ScriptedSource {
                    connects: connects.clone(),
                    closes: closes.clone(),
                    open_failures: open_failures.clone(),
                    undecodable_frames: undecodable_frames.clone(),
                    frames_before_error,
                    frames_served: 0,
                }) as Box<dyn FrameSource>)
            })
        }
    }

    fn fast_settings() -> StreamSettings {
        StreamSettings {
            max_fps: 100,
            backoff_base: Duration::from_millis(20),
            backoff_cap: Duration::from_millis(200),
            stop_timeout: Duration::from_secs(2),
            ..StreamSettings::default()
        }
    }

    fn wait_for(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let end = Instant::now() + deadline;
        while Instant::now() < end {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn connection(script: &Script) -> Arc<StreamConnection> {
        Arc::new(StreamConnection::with_factory(
            "cam-1".to_string(),
            StreamSource::new("stub://cam-1"),
            fast_settings(),
            script.factory(),
        ))
    }

    #[test]
    fn start_is_idempotent() {
        let script = Script::new(0, None);
        let conn = connection(&script);

        conn.start();
        conn.start();
        assert!(wait_for(Duration::from_secs(2), || {
            conn.latest_frame().is_some()
        }));
        // Two starts without an intervening stop yield exactly one loop,
        // hence exactly one connect.
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
        conn.stop();
    }

    #[test]
    fn publishes_encoded_frames() {
        let script = Script::new(0, None);
        let conn = connection(&script);

        conn.start();
        assert!(wait_for(Duration::from_secs(2), || {
            conn.latest_frame().is_some()
        }));

        let frame = conn.latest_frame().expect("frame");
        assert!(frame.jpeg().starts_with(&[0xFF, 0xD8]));
        assert_eq!(frame.width, encode::OUTPUT_WIDTH);
        assert_eq!(frame.height, encode::OUTPUT_HEIGHT);

        let status = conn.status();
        assert!(status.running);
        assert!(status.has_recent_frame);
        assert_eq!(status.state, ConnectionState::Streaming);
        conn.stop();
    }

    #[test]
    fn stop_is_bounded_even_mid_backoff() {
        let script = Script::new(usize::MAX, None);
        let conn = Arc::new(StreamConnection::with_factory(
            "cam-1".to_string(),
            StreamSource::new("stub://cam-1"),
            StreamSettings {
                // Long enough that stop() lands mid-backoff-sleep.
                backoff_base: Duration::from_secs(30),
                backoff_cap: Duration::from_secs(30),
                stop_timeout: Duration::from_secs(2),
                ..StreamSettings::default()
            },
            script.factory(),
        ));

        conn.start();
        assert!(wait_for(Duration::from_secs(2), || {
            conn.status().state == ConnectionState::Backoff
        }));

        let stopped_at = Instant::now();
        conn.stop();
        assert!(stopped_at.elapsed() < Duration::from_secs(2));
        assert!(!conn.status().running);
    }

    #[test]
    fn stop_is_idempotent() {
        let script = Script::new(0, None);
        let conn = connection(&script);
        conn.start();
        conn.stop();
        conn.stop();
        assert!(!conn.status().running);
    }

    #[test]
    fn reconnects_after_open_failures_and_resets_backoff() {
        let script = Script::new(2, None);
        let conn = connection(&script);

        conn.start();
        assert!(wait_for(Duration::from_secs(5), || {
            conn.latest_frame().is_some()
        }));
        // Success resets the attempt count to zero.
        assert_eq!(conn.status().reconnect_attempts, 0);
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
        conn.stop();
    }

    #[test]
    fn source_released_once_per_connection() {
        let script = Script::new(0, Some(2));
        let conn = connection(&script);

        conn.start();
        // Each connection serves 2 frames then fails its read; the loop must
        // close each source exactly once before reconnecting.
        assert!(wait_for(Duration::from_secs(5), || {
            script.closes.load(Ordering::SeqCst) >= 2
        }));
        conn.stop();
        let connects = script.connects.load(Ordering::SeqCst);
        let closes = script.closes.load(Ordering::SeqCst);
        assert_eq!(connects, closes);
    }

    #[test]
    fn undecodable_frames_are_dropped_without_reconnecting() {
        let script = Script::new(0, None).undecodable(2);
        let conn = connection(&script);

        conn.start();
        // The first two reads yield frames the encoder rejects; the loop
        // must drop them and keep the same connection alive.
        assert!(wait_for(Duration::from_secs(2), || {
            conn.latest_frame().is_some()
        }));
        assert_eq!(script.undecodable_frames.load(Ordering::SeqCst), 0);
        assert_eq!(script.connects.load(Ordering::SeqCst), 1);
        assert_eq!(conn.status().reconnect_attempts, 0);
        assert_eq!(conn.status().state, ConnectionState::Streaming);
        conn.stop();
    }

    /// Source whose reads block far longer than the stop timeout.
    struct BlockingSource {
        connects: Arc<AtomicUsize>,
        block: Duration,
    }

    impl FrameSource for BlockingSource {
        fn connect(&mut self) -> Result<(), SourceError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn read_frame(&mut self) -> Result<RawImage, SourceError> {
            std::thread::sleep(self.block);
            Ok(RawImage {
                pixels: vec![128; 4 * 4 * 3],
                width: 4,
                height: 4,
            })
        }

        fn close(&mut self) {}
    }

    #[test]
    fn stop_timeout_detaches_worker_and_restart_runs_fresh_loop() {
        let connects = Arc::new(AtomicUsize::new(0));
        let factory_connects = connects.clone();
        let conn = Arc::new(StreamConnection::with_factory(
            "cam-1".to_string(),
            StreamSource::new("stub://cam-1"),
            StreamSettings {
                max_fps: 100,
                stop_timeout: Duration::from_millis(200),
                ..StreamSettings::default()
            },
            Arc::new(move |_source: &StreamSource| {
                Ok(Box::new(BlockingSource {
                    connects: factory_connects.clone(),
                    block: Duration::from_secs(8),
                }) as Box<dyn FrameSource>)
            }),
        ));

        conn.start();
        assert!(wait_for(Duration::from_secs(2), || {
            connects.load(Ordering::SeqCst) == 1
        }));

        // The worker is stuck inside read_frame; stop() must give up at
        // its bound, report stopped, and detach.
        let stopped_at = Instant::now();
        conn.stop();
        assert!(stopped_at.elapsed() < Duration::from_secs(1));
        assert!(!conn.status().running);
        assert_eq!(conn.status().state, ConnectionState::Disconnected);

        // A restart gets a fresh loop with its own stop flag; the detached
        // worker cannot mark the new loop stopped when it finally exits.
        conn.start();
        assert!(wait_for(Duration::from_secs(2), || {
            connects.load(Ordering::SeqCst) >= 2
        }));
        assert!(conn.status().running);
        conn.stop();
    }

    #[test]
    fn restart_after_stop_spawns_a_fresh_loop() {
        let script = Script::new(0, None);
        let conn = connection(&script);

        conn.start();
        assert!(wait_for(Duration::from_secs(2), || {
            conn.latest_frame().is_some()
        }));
        conn.stop();

        conn.start();
        assert!(wait_for(Duration::from_secs(2), || {
            conn.status().state == ConnectionState::Streaming
        }));
        assert_eq!(script.connects.load(Ordering::SeqCst), 2);
        conn.stop();
    }
}
