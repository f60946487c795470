//! Camera stream core.
//!
//! This crate ingests live video from networked cameras, keeps a small
//! freshness-bounded cache of the most recent frames per camera, and
//! serves those frames to HTTP viewers and detection consumers. Sources
//! are assumed unreliable: every stream runs a supervised capture loop
//! that reconnects with exponential backoff and reports health instead
//! of failing callers.
//!
//! # Module Structure
//!
//! - `frame`: encoded frames and the per-camera latest-frame cache
//! - `ingest`: frame sources (MJPEG over HTTP, RTSP, synthetic stub)
//! - `encode`: resize and JPEG-encode raw frames for serving
//! - `reconnect`: exponential backoff policy for flaky sources
//! - `stream`: the per-camera capture loop and its lifecycle
//! - `registry`: camera id to stream connection mapping
//! - `detect`: external AI server polling, caching, and overlays
//! - `api`: the HTTP surface (status, snapshots, multipart live streams)
//! - `config`: daemon configuration

pub mod api;
pub mod config;
pub mod detect;
pub mod encode;
pub mod frame;
pub mod ingest;
pub mod reconnect;
pub mod registry;
pub mod stream;

pub use detect::{Detection, DetectionCache, DetectionClient, DetectionWorker};
pub use frame::{Frame, FrameBuffer, DEFAULT_FRESHNESS, DEFAULT_QUEUE_CAPACITY};
pub use ingest::{open_source, FrameSource, RawImage, SourceError};
pub use reconnect::{ReconnectPolicy, ReconnectSnapshot, DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_CAP};
pub use registry::StreamRegistry;
pub use stream::{
    CameraId, ConnectionState, StreamConnection, StreamSettings, StreamSource, StreamStatus,
};
