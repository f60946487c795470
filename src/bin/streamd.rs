//! streamd - camera stream daemon
//!
//! This daemon:
//! 1. Loads configured cameras and starts a capture loop per camera
//! 2. Keeps a freshness-bounded latest-frame cache per camera
//! 3. Optionally polls an external AI server for detections
//! 4. Serves status, snapshots, and multipart live streams over HTTP
//! 5. Shuts every stream down cleanly on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use stream_kernel::{
    api::{ApiConfig, ApiServer},
    config::StreamdConfig,
    DetectionCache, DetectionClient, DetectionWorker, StreamRegistry, StreamSource,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the JSON config file.
    #[arg(long, env = "STREAMD_CONFIG")]
    config: Option<PathBuf>,
    /// Query a running daemon for stream status and exit.
    #[arg(long)]
    print_status: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = StreamdConfig::load(args.config.as_deref())?;

    if args.print_status {
        return print_status(&cfg.api_addr);
    }

    let registry = Arc::new(StreamRegistry::new(cfg.streams.clone()));
    for camera in &cfg.cameras {
        let source = StreamSource::new(camera.url.clone()).with_detection(camera.detection);
        registry.get_or_create(&camera.id, source);
        log::info!(
            "camera {} ({}): started, detection={}",
            camera.id,
            camera.name,
            camera.detection
        );
    }

    let detections = Arc::new(DetectionCache::new(cfg.ai.visibility));
    let detect_worker = if cfg.ai.enabled {
        let worker = DetectionWorker::spawn(
            registry.clone(),
            DetectionClient::new(cfg.ai.url.clone()),
            detections.clone(),
            cfg.ai.poll_interval,
        )?;
        log::info!("detection poller running against {}", cfg.ai.url);
        Some(worker)
    } else {
        None
    };

    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
        },
        registry.clone(),
        detections,
    )
    .spawn()?;
    log::info!("stream api listening on {}", api_handle.addr);

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_signal.store(true, Ordering::SeqCst);
    })?;

    log::info!("streamd running with {} camera(s)", cfg.cameras.len());

    let mut last_health_log = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        if last_health_log.elapsed() >= Duration::from_secs(30) {
            for (id, status) in registry.status_all() {
                log::info!(
                    "camera {}: state={} healthy={} frame_age={:?} attempts={}",
                    id,
                    status.state.as_str(),
                    status.healthy,
                    status.last_frame_age_seconds,
                    status.reconnect_attempts
                );
            }
            last_health_log = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down");
    if let Some(worker) = detect_worker {
        worker.stop();
    }
    api_handle.stop()?;
    registry.shutdown();
    log::info!("streamd stopped");
    Ok(())
}

fn print_status(api_addr: &str) -> Result<()> {
    let statuses: serde_json::Value = ureq::get(&format!("http://{}/streams", api_addr))
        .call()?
        .into_json()?;
    println!("{}", serde_json::to_string_pretty(&statuses)?);
    Ok(())
}
