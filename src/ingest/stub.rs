//! Synthetic frame source for `stub://` URLs.
//!
//! Generates a slowly changing gradient so downstream consumers see
//! distinct frames without any camera hardware. Used by tests and demo
//! deployments.

use super::{FrameSource, RawImage, SourceError};

const STUB_WIDTH: u32 = 640;
const STUB_HEIGHT: u32 = 480;

/// Always-available synthetic source.
pub struct StubSource {
    url: String,
    connected: bool,
    frame_count: u64,
    scene_state: u8,
}

impl StubSource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            connected: false,
            frame_count: 0,
            scene_state: rand::random(),
        }
    }
}

impl FrameSource for StubSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        self.connected = true;
        log::info!("connected to {} (synthetic)", self.url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawImage, SourceError> {
        if !self.connected {
            return Err(SourceError::read("stub source not connected"));
        }
        self.frame_count += 1;

        // Shift the "scene" occasionally so successive frames differ.
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let pixel_count = (STUB_WIDTH * STUB_HEIGHT * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }

        Ok(RawImage {
            pixels,
            width: STUB_WIDTH,
            height: STUB_HEIGHT,
        })
    }

    fn close(&mut self) {
        self.connected = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_frames_after_connect() {
        let mut source = StubSource::new("stub://test");
        assert!(source.read_frame().is_err());

        source.connect().expect("connect");
        let frame = source.read_frame().expect("frame");
        assert_eq!(frame.width, STUB_WIDTH);
        assert_eq!(frame.height, STUB_HEIGHT);
        assert_eq!(frame.pixels.len(), (STUB_WIDTH * STUB_HEIGHT * 3) as usize);
    }

    #[test]
    fn successive_frames_differ() {
        let mut source = StubSource::new("stub://test");
        source.connect().expect("connect");
        let a = source.read_frame().expect("frame");
        let b = source.read_frame().expect("frame");
        assert_ne!(a.pixels, b.pixels);
    }

    #[test]
    fn close_releases_the_connection() {
        let mut source = StubSource::new("stub://test");
        source.connect().expect("connect");
        source.close();
        assert!(source.read_frame().is_err());
    }
}
