//! Frame ingestion sources.
//!
//! This module provides the sources a stream connection reads from:
//! - `stub://` synthetic frames (tests, demos)
//! - HTTP MJPEG / JPEG snapshot streams (IP cameras, ESP32-class devices)
//! - RTSP via GStreamer (feature: rtsp-gstreamer)
//!
//! All sources produce decoded RGB images; resizing and JPEG re-encoding
//! happen downstream in the capture loop. Every source must bound its
//! connect and read times so a stalled socket can never wedge `stop()`.

use std::fmt;

pub mod mjpeg;
#[cfg(feature = "rtsp-gstreamer")]
pub mod rtsp;
pub mod stub;

pub use mjpeg::MjpegSource;
#[cfg(feature = "rtsp-gstreamer")]
pub use rtsp::RtspSource;
pub use stub::StubSource;

/// A decoded RGB8 image straight off a source.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Failure classes the capture loop reacts to. Open failures drive the
/// reconnect backoff; read failures get a bounded number of fast retries
/// first.
#[derive(Debug)]
pub enum SourceError {
    /// Source unreachable or format unsupported.
    Open(String),
    /// Connection was open but a read failed or timed out.
    Read(String),
}

impl SourceError {
    pub fn open(msg: impl fmt::Display) -> Self {
        SourceError::Open(msg.to_string())
    }

    pub fn read(msg: impl fmt::Display) -> Self {
        SourceError::Read(msg.to_string())
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Open(msg) => write!(f, "failed to open source: {}", msg),
            SourceError::Read(msg) => write!(f, "failed to read frame: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// One live connection to one camera feed.
///
/// `connect` and `read_frame` must be time-bounded. `close` releases the
/// underlying resource and is called exactly once by the capture loop on
/// every exit path; it must be safe to call on a half-open source.
pub trait FrameSource: Send {
    fn connect(&mut self) -> Result<(), SourceError>;
    fn read_frame(&mut self) -> Result<RawImage, SourceError>;
    fn close(&mut self);
}

/// Open the source for a feed address, dispatching on the URL scheme.
pub fn open_source(url: &str) -> Result<Box<dyn FrameSource>, SourceError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| SourceError::open(format!("invalid source url '{}': {}", url, e)))?;
    match parsed.scheme() {
        "stub" => Ok(Box::new(StubSource::new(url))),
        "http" | "https" => Ok(Box::new(MjpegSource::new(url))),
        "rtsp" => {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Box::new(RtspSource::new(url)?))
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                Err(SourceError::open(
                    "rtsp sources require the rtsp-gstreamer feature",
                ))
            }
        }
        other => Err(SourceError::open(format!(
            "unsupported source scheme '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatches_on_scheme() {
        assert!(open_source("stub://front_door").is_ok());
        assert!(open_source("http://127.0.0.1:81/stream").is_ok());
        assert!(matches!(
            open_source("ftp://nope"),
            Err(SourceError::Open(_))
        ));
        assert!(matches!(
            open_source("not a url"),
            Err(SourceError::Open(_))
        ));
    }
}
