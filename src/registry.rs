//! Camera registry.
//!
//! Maps camera identifiers to their stream connections. The registry owns
//! creation and removal; consumers never control connection lifecycle
//! directly. Map mutation is serialized under one registry-level lock;
//! connections are used outside that lock once obtained, so a slow stream
//! never stalls registry operations on other cameras.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::stream::{
    CameraId, SourceFactory, StreamConnection, StreamSettings, StreamSource, StreamStatus,
};

/// Registry of active camera streams.
pub struct StreamRegistry {
    streams: Mutex<HashMap<CameraId, Arc<StreamConnection>>>,
    settings: StreamSettings,
    factory: Option<SourceFactory>,
}

impl StreamRegistry {
    pub fn new(settings: StreamSettings) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            settings,
            factory: None,
        }
    }

    /// Registry whose connections use an injected source factory (tests).
    pub fn with_factory(settings: StreamSettings, factory: SourceFactory) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            settings,
            factory: Some(factory),
        }
    }

    /// Return the existing connection for `id`, or construct and start a
    /// new one. Creation is serialized under the map lock: concurrent
    /// callers racing on the same id get the same connection and exactly
    /// one capture loop.
    pub fn get_or_create(&self, id: &str, source: StreamSource) -> Arc<StreamConnection> {
        let mut streams = self.lock();
        if let Some(existing) = streams.get(id) {
            return existing.clone();
        }

        let conn = Arc::new(match &self.factory {
            Some(factory) => StreamConnection::with_factory(
                id.to_string(),
                source,
                self.settings.clone(),
                factory.clone(),
            ),
            None => StreamConnection::new(id.to_string(), source, self.settings.clone()),
        });
        conn.start();
        streams.insert(id.to_string(), conn.clone());
        conn
    }

    /// Look up a connection without creating one.
    pub fn get(&self, id: &str) -> Option<Arc<StreamConnection>> {
        self.lock().get(id).cloned()
    }

    /// Stop and discard the connection for `id`. Returns whether one
    /// existed. The stop itself runs outside the map lock.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.lock().remove(id);
        match removed {
            Some(conn) => {
                conn.stop();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn ids(&self) -> Vec<CameraId> {
        self.lock().keys().cloned().collect()
    }

    /// Snapshot of every registered connection, taken outside the map lock.
    pub fn connections(&self) -> Vec<Arc<StreamConnection>> {
        self.lock().values().cloned().collect()
    }

    /// Status snapshot for every camera.
    pub fn status_all(&self) -> HashMap<CameraId, StreamStatus> {
        self.connections()
            .into_iter()
            .map(|conn| (conn.camera_id().to_string(), conn.status()))
            .collect()
    }

    /// Stop every stream. Used on daemon shutdown.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        for (_, conn) in drained {
            conn.stop();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CameraId, Arc<StreamConnection>>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{FrameSource, RawImage, SourceError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct CountingSource {
        connects: Arc<AtomicUsize>,
    }

    impl FrameSource for CountingSource {
        fn connect(&mut self) -> Result<(), SourceError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn read_frame(&mut self) -> Result<RawImage, SourceError> {
            Ok(RawImage {
                pixels: vec![32; 4 * 4 * 3],
                width: 4,
                height: 4,
            })
        }

        fn close(&mut self) {}
    }

    fn counting_registry() -> (Arc<StreamRegistry>, Arc<AtomicUsize>) {
        let connects = Arc::new(AtomicUsize::new(0));
        let factory_connects = connects.clone();
        let registry = Arc::new(StreamRegistry::with_factory(
            StreamSettings {
                max_fps: 100,
                ..StreamSettings::default()
            },
            Arc::new(move |_source: &StreamSource| {
                Ok(Box::new(CountingSource {
                    connects: factory_connects.clone(),
                }) as Box<dyn FrameSource>)
            }),
        ));
        (registry, connects)
    }

    #[test]
    fn get_or_create_reuses_connections() {
        let (registry, _) = counting_registry();
        let a = registry.get_or_create("7", StreamSource::new("stub://a"));
        let b = registry.get_or_create("7", StreamSource::new("stub://a"));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.ids(), vec!["7".to_string()]);
        registry.shutdown();
    }

    #[test]
    fn concurrent_get_or_create_yields_one_capture_loop() {
        let (registry, connects) = counting_registry();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry.get_or_create("7", StreamSource::new("stub://a"))
                })
            })
            .collect();
        let conns: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("racer thread"))
            .collect();

        for conn in &conns[1..] {
            assert!(Arc::ptr_eq(&conns[0], conn));
        }

        // Give the single worker time to connect, then verify no sibling
        // loop ever dialed.
        let deadline = Instant::now() + Duration::from_secs(2);
        while connects.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(connects.load(Ordering::SeqCst), 1);
        registry.shutdown();
    }

    #[test]
    fn remove_stops_and_discards() {
        let (registry, _) = counting_registry();
        let conn = registry.get_or_create("3", StreamSource::new("stub://a"));
        assert!(registry.remove("3"));
        assert!(!conn.status().running);
        assert!(!registry.contains("3"));
        assert!(!registry.remove("3"));
    }

    #[test]
    fn status_all_snapshots_every_camera() {
        let (registry, _) = counting_registry();
        registry.get_or_create("1", StreamSource::new("stub://a"));
        registry.get_or_create("2", StreamSource::new("stub://b"));

        let statuses = registry.status_all();
        assert_eq!(statuses.len(), 2);
        assert!(statuses.contains_key("1"));
        assert!(statuses.contains_key("2"));
        registry.shutdown();
    }

    #[test]
    fn shutdown_stops_every_stream() {
        let (registry, _) = counting_registry();
        let a = registry.get_or_create("1", StreamSource::new("stub://a"));
        let b = registry.get_or_create("2", StreamSource::new("stub://b"));
        registry.shutdown();
        assert!(!a.status().running);
        assert!(!b.status().running);
        assert!(registry.ids().is_empty());
    }
}
