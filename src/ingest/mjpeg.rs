//! HTTP MJPEG / JPEG snapshot source.
//!
//! IP cameras and ESP32-class devices commonly serve either a
//! `multipart/x-mixed-replace` MJPEG stream or a single-JPEG snapshot
//! endpoint. This source handles both: the Content-Type of the initial
//! response decides the mode.
//!
//! Connect and read are bounded by agent timeouts so a stalled camera
//! socket surfaces as a `Read` error instead of hanging the capture loop.

use std::io::Read;
use std::time::Duration;

use super::{FrameSource, RawImage, SourceError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

/// HTTP frame source for `http://` and `https://` feed addresses.
pub struct MjpegSource {
    url: String,
    agent: ureq::Agent,
    mode: Option<Mode>,
}

enum Mode {
    Stream(MjpegReader),
    Snapshot,
}

impl MjpegSource {
    pub fn new(url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(READ_TIMEOUT)
            .build();
        Self {
            url: url.to_string(),
            agent,
            mode: None,
        }
    }
}

impl FrameSource for MjpegSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| SourceError::open(format!("{}: {}", self.url, e)))?;

        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if content_type.contains("multipart") {
            self.mode = Some(Mode::Stream(MjpegReader::new(response.into_reader())));
        } else {
            self.mode = Some(Mode::Snapshot);
        }
        log::info!("connected to {}", self.url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawImage, SourceError> {
        let mode = self
            .mode
            .as_mut()
            .ok_or_else(|| SourceError::read("http source not connected"))?;

        let jpeg = match mode {
            Mode::Stream(reader) => reader.next_jpeg()?,
            Mode::Snapshot => fetch_snapshot(&self.agent, &self.url)?,
        };
        decode_jpeg(&jpeg)
    }

    fn close(&mut self) {
        self.mode = None;
    }
}

fn fetch_snapshot(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>, SourceError> {
    let response = agent
        .get(url)
        .call()
        .map_err(|e| SourceError::read(format!("snapshot fetch: {}", e)))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .map_err(|e| SourceError::read(format!("snapshot body: {}", e)))?;
    if bytes.is_empty() {
        return Err(SourceError::read("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<RawImage, SourceError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| SourceError::read(format!("decode jpeg: {}", e)))?;
    let rgb = image.into_rgb8();
    let (width, height) = rgb.dimensions();
    Ok(RawImage {
        pixels: rgb.into_raw(),
        width,
        height,
    })
}

/// Incremental scanner that extracts JPEG frames (SOI..EOI) from a
/// multipart byte stream without parsing part headers.
struct MjpegReader {
    reader: Box<dyn Read + Send + Sync + 'static>,
    buffer: Vec<u8>,
}

impl MjpegReader {
    fn new(reader: Box<dyn Read + Send + Sync + 'static>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn next_jpeg(&mut self) -> Result<Vec<u8>, SourceError> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|e| SourceError::read(format!("mjpeg chunk: {}", e)))?;
            if read == 0 {
                return Err(SourceError::read("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                // Runaway garbage with no JPEG markers; keep only the tail.
                let drain_len = self.buffer.len() - 2;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])
        .map(|p| start + 2 + p + 2)?;
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_jpeg_bounds_in_multipart_noise() {
        let mut data = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        data.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        data.extend_from_slice(b"\r\n--frame");

        let (start, end) = find_jpeg_bounds(&data).expect("bounds");
        assert_eq!(&data[start..start + 2], &[0xFF, 0xD8]);
        assert_eq!(&data[end - 2..end], &[0xFF, 0xD9]);
    }

    #[test]
    fn incomplete_frame_has_no_bounds() {
        let data = [0xFF, 0xD8, 1, 2, 3];
        assert!(find_jpeg_bounds(&data).is_none());
    }

    #[test]
    fn reading_before_connect_fails() {
        let mut source = MjpegSource::new("http://127.0.0.1:1/stream");
        assert!(matches!(source.read_frame(), Err(SourceError::Read(_))));
    }
}
