//! HTTP API: status queries, snapshots, and MJPEG live streams.
//!
//! A small hand-rolled HTTP/1.1 server over `TcpListener`. The accept
//! loop hands each connection to its own thread so a long-lived multipart
//! stream never starves status queries from dashboards.
//!
//! Live streams use the fixed external contract:
//! `multipart/x-mixed-replace; boundary=frame`, each part headed by
//! `Content-Type: image/jpeg`.
//!
//! Authentication is out of scope here; deployments front this with the
//! web collaborator that owns sessions.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::detect::{overlay, DetectionCache};
use crate::encode;
use crate::registry::StreamRegistry;
use crate::stream::{StreamConnection, StreamSource};

const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Poll cadence of the multipart serving loop (~30 fps).
const LIVE_POLL_INTERVAL: Duration = Duration::from_millis(33);

/// Sleep when no fresh frame is available yet.
const LIVE_IDLE_SLEEP: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8780".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    registry: Arc<StreamRegistry>,
    detections: Arc<DetectionCache>,
}

impl ApiServer {
    pub fn new(
        cfg: ApiConfig,
        registry: Arc<StreamRegistry>,
        detections: Arc<DetectionCache>,
    ) -> Self {
        Self {
            cfg,
            registry,
            detections,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let registry = self.registry;
        let detections = self.detections;
        let join = std::thread::Builder::new()
            .name("stream-api".to_string())
            .spawn(move || run_api(listener, registry, detections, shutdown_thread))?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    registry: Arc<StreamRegistry>,
    detections: Arc<DetectionCache>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let registry = registry.clone();
                let detections = detections.clone();
                let shutdown = shutdown.clone();
                let spawned = std::thread::Builder::new()
                    .name("stream-api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &registry, &detections, &shutdown)
                        {
                            log::debug!("api request ended: {}", err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("failed to spawn api connection thread: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(err) => {
                log::error!("api accept failed: {}", err);
                break;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegisterStream {
    id: String,
    url: String,
    #[serde(default)]
    detection: bool,
}

fn handle_connection(
    mut stream: TcpStream,
    registry: &StreamRegistry,
    detections: &DetectionCache,
    shutdown: &AtomicBool,
) -> Result<()> {
    let request = read_request(&mut stream)?;
    let path = request.path.clone();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["health"]) => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", ["streams"]) => {
            let payload = serde_json::to_vec(&registry.status_all())?;
            write_response(&mut stream, 200, "application/json", &payload)
        }
        ("POST", ["streams"]) => {
            let register: RegisterStream = match serde_json::from_slice(&request.body) {
                Ok(register) => register,
                Err(e) => {
                    log::warn!("rejecting stream registration: {}", e);
                    return write_json_response(&mut stream, 400, r#"{"error":"invalid_body"}"#);
                }
            };
            let source = StreamSource::new(register.url).with_detection(register.detection);
            let conn = registry.get_or_create(&register.id, source);
            let payload = serde_json::to_vec(&conn.status())?;
            write_response(&mut stream, 201, "application/json", &payload)
        }
        ("DELETE", ["streams", id]) => {
            if registry.remove(id) {
                detections.clear(id);
                write_json_response(&mut stream, 200, r#"{"removed":true}"#)
            } else {
                write_json_response(&mut stream, 404, r#"{"error":"unknown_camera"}"#)
            }
        }
        ("GET", ["streams", id, "status"]) => match registry.get(id) {
            Some(conn) => {
                let payload = serde_json::to_vec(&conn.status())?;
                write_response(&mut stream, 200, "application/json", &payload)
            }
            None => write_json_response(&mut stream, 404, r#"{"error":"unknown_camera"}"#),
        },
        ("GET", ["streams", id, "snapshot"]) => match registry.get(id) {
            Some(conn) => match conn.latest_frame() {
                Some(frame) => write_response(&mut stream, 200, "image/jpeg", frame.jpeg()),
                None => write_json_response(&mut stream, 404, r#"{"error":"no_recent_frame"}"#),
            },
            None => write_json_response(&mut stream, 404, r#"{"error":"unknown_camera"}"#),
        },
        ("GET", ["streams", id, "detections"]) => match registry.get(id) {
            Some(_) => {
                let fresh = detections.fresh(id).unwrap_or_default();
                let payload = serde_json::to_vec(&fresh)?;
                write_response(&mut stream, 200, "application/json", &payload)
            }
            None => write_json_response(&mut stream, 404, r#"{"error":"unknown_camera"}"#),
        },
        ("GET", ["streams", id, "live"]) => match registry.get(id) {
            Some(conn) => serve_multipart(stream, &conn, detections, shutdown),
            None => write_json_response(&mut stream, 404, r#"{"error":"unknown_camera"}"#),
        },
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Stream frames until the client disconnects or the server shuts down.
fn serve_multipart(
    mut stream: TcpStream,
    conn: &Arc<StreamConnection>,
    detections: &DetectionCache,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;
    stream.write_all(
        b"HTTP/1.1 200 OK\r\n\
          Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
          Cache-Control: no-store\r\n\
          Connection: close\r\n\r\n",
    )?;

    let camera_id = conn.camera_id().to_string();
    log::debug!("camera {}: live stream client connected", camera_id);

    while !shutdown.load(Ordering::SeqCst) {
        let Some(frame) = conn.latest_frame() else {
            // With no frame there is no write to surface a disconnect, so
            // check liveness by reading; otherwise a gone client would pin
            // this thread until full server shutdown.
            if peer_closed(&mut stream) {
                break;
            }
            std::thread::sleep(LIVE_IDLE_SLEEP);
            continue;
        };

        // Overlay cached detections only while they are fresh; stale
        // overlays silently disappear from the stream.
        let payload = match conn
            .detection_enabled()
            .then(|| detections.fresh(&camera_id))
            .flatten()
        {
            Some(dets) if !dets.is_empty() => {
                overlay::render(frame.jpeg(), &dets, encode::JPEG_QUALITY)
                    .unwrap_or_else(|e| {
                        log::debug!("camera {}: overlay render failed: {}", camera_id, e);
                        frame.jpeg().to_vec()
                    })
            }
            _ => frame.jpeg().to_vec(),
        };

        let header = format!(
            "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            payload.len()
        );
        if stream.write_all(header.as_bytes()).is_err()
            || stream.write_all(&payload).is_err()
            || stream.write_all(b"\r\n").is_err()
        {
            break;
        }

        std::thread::sleep(LIVE_POLL_INTERVAL);
    }

    log::debug!("camera {}: live stream client disconnected", camera_id);
    Ok(())
}

/// Whether the peer has closed the connection. Live-stream clients send
/// nothing after their request, so a read yields either EOF (closed) or a
/// timeout (still connected).
fn peer_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 1];
    if stream
        .set_read_timeout(Some(Duration::from_millis(1)))
        .is_err()
    {
        return true;
    }
    match stream.read(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => !matches!(
            e.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ),
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break data
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .ok_or_else(|| anyhow!("connection closed before headers"))?;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
    };

    let header_text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    // Read the body when the request declares one.
    let content_length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    if content_length > MAX_REQUEST_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before body completed"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        201 => "HTTP/1.1 201 Created",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}
