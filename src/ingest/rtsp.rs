//! RTSP source backed by GStreamer (feature: rtsp-gstreamer).
//!
//! Pipeline: rtspsrc ! decodebin ! videoconvert ! appsink (RGB), with the
//! appsink capped to one buffer and dropping so we always read the newest
//! decoded frame. Sample pulls are bounded so a dead camera shows up as a
//! read timeout rather than a hang.

use std::time::Duration;

use super::{FrameSource, RawImage, SourceError};

const PULL_TIMEOUT: Duration = Duration::from_secs(5);

/// GStreamer-backed RTSP frame source.
pub struct RtspSource {
    url: String,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    playing: bool,
}

impl RtspSource {
    pub fn new(url: &str) -> Result<Self, SourceError> {
        gstreamer::init().map_err(|e| SourceError::open(format!("gstreamer init: {}", e)))?;

        let description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            url
        );
        let pipeline = gstreamer::parse_launch(&description)
            .map_err(|e| SourceError::open(format!("build rtsp pipeline: {}", e)))?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| SourceError::open("rtsp pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| SourceError::open("appsink element missing from pipeline"))?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| SourceError::open("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            url: url.to_string(),
            pipeline,
            appsink,
            playing: false,
        })
    }

    fn poll_bus(&self) -> Result<(), SourceError> {
        let Some(bus) = self.pipeline.bus() else {
            return Ok(());
        };
        while let Some(message) = bus.timed_pop(gstreamer::ClockTime::ZERO) {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    return Err(SourceError::read(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    )));
                }
                MessageView::Eos(..) => {
                    return Err(SourceError::read("rtsp stream reached EOS"));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl FrameSource for RtspSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| SourceError::open(format!("set rtsp pipeline to Playing: {}", e)))?;
        self.playing = true;
        log::info!("connected to {}", self.url);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawImage, SourceError> {
        self.poll_bus()?;

        let timeout = gstreamer::ClockTime::from_mseconds(PULL_TIMEOUT.as_millis() as u64);
        let sample = self
            .appsink
            .try_pull_sample(timeout)
            .ok_or_else(|| SourceError::read("rtsp stream stalled"))?;

        sample_to_image(&sample)
    }

    fn close(&mut self) {
        if self.playing {
            if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
                log::warn!("failed to tear down rtsp pipeline for {}: {}", self.url, e);
            }
            self.playing = false;
        }
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn sample_to_image(sample: &gstreamer::Sample) -> Result<RawImage, SourceError> {
    let buffer = sample
        .buffer()
        .ok_or_else(|| SourceError::read("rtsp sample missing buffer"))?;
    let caps = sample
        .caps()
        .ok_or_else(|| SourceError::read("rtsp sample missing caps"))?;
    let info = gstreamer_video::VideoInfo::from_caps(caps)
        .map_err(|e| SourceError::read(format!("parse rtsp caps: {}", e)))?;

    let width = info.width();
    let height = info.height();
    let row_bytes = width as usize * 3;
    let stride = info.stride(0) as usize;

    let map = buffer
        .map_readable()
        .map_err(|e| SourceError::read(format!("map rtsp buffer: {}", e)))?;
    let data = map.as_slice();

    if stride == row_bytes {
        return Ok(RawImage {
            pixels: data.to_vec(),
            width,
            height,
        });
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .ok_or_else(|| SourceError::read("rtsp buffer row out of bounds"))?,
        );
    }

    Ok(RawImage {
        pixels,
        width,
        height,
    })
}
