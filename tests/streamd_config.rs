use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use stream_kernel::config::StreamdConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "STREAMD_CONFIG",
        "STREAMD_API_ADDR",
        "STREAMD_AI_URL",
        "STREAMD_MAX_FPS",
        "STREAMD_FRESHNESS_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "api": { "addr": "0.0.0.0:9100" },
        "streams": {
            "max_fps": 15,
            "output_width": 1280,
            "output_height": 720,
            "jpeg_quality": 80,
            "freshness_secs": 10,
            "queue_capacity": 5
        },
        "ai": {
            "enabled": true,
            "url": "http://ai-host:8501",
            "interval_ms": 250
        },
        "cameras": [
            { "id": "1", "name": "Front Door", "url": "rtsp://cam-1/stream", "detection": true },
            { "id": "2", "url": "http://cam-2/snapshot.jpg" }
        ]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("STREAMD_CONFIG", file.path());
    std::env::set_var("STREAMD_MAX_FPS", "20");
    std::env::set_var("STREAMD_FRESHNESS_SECS", "60");

    let cfg = StreamdConfig::load(None).expect("load config");

    assert_eq!(cfg.api_addr, "0.0.0.0:9100");
    assert_eq!(cfg.streams.max_fps, 20);
    assert_eq!(cfg.streams.output_width, 1280);
    assert_eq!(cfg.streams.output_height, 720);
    assert_eq!(cfg.streams.jpeg_quality, 80);
    assert_eq!(cfg.streams.freshness, Duration::from_secs(60));
    assert_eq!(cfg.streams.queue_capacity, 5);
    assert!(cfg.ai.enabled);
    assert_eq!(cfg.ai.url, "http://ai-host:8501");
    assert_eq!(cfg.ai.poll_interval, Duration::from_millis(250));

    assert_eq!(cfg.cameras.len(), 2);
    assert_eq!(cfg.cameras[0].name, "Front Door");
    assert!(cfg.cameras[0].detection);
    assert_eq!(cfg.cameras[1].name, "2");
    assert!(!cfg.cameras[1].detection);

    clear_env();
}

#[test]
fn defaults_apply_without_a_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = StreamdConfig::load(None).expect("load config");
    assert_eq!(cfg.streams.max_fps, 10);
    assert_eq!(cfg.streams.freshness, Duration::from_secs(30));
    assert_eq!(cfg.streams.queue_capacity, 3);
    assert_eq!(cfg.streams.backoff_base, Duration::from_secs(1));
    assert_eq!(cfg.streams.backoff_cap, Duration::from_secs(300));
    assert!(!cfg.ai.enabled);
    assert!(cfg.cameras.is_empty());

    clear_env();
}

#[test]
fn invalid_tuning_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{ "streams": { "jpeg_quality": 101 } }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("STREAMD_CONFIG", file.path());
    let err = StreamdConfig::load(None).expect_err("quality out of range");
    assert!(err.to_string().contains("jpeg_quality"));

    clear_env();
}

#[test]
fn duplicate_camera_ids_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "cameras": [
            { "id": "1", "url": "rtsp://a" },
            { "id": "1", "url": "rtsp://b" }
        ]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("STREAMD_CONFIG", file.path());
    let err = StreamdConfig::load(None).expect_err("duplicate ids");
    assert!(err.to_string().contains("duplicate camera id"));

    clear_env();
}
