//! Two-tier [`CacheProvider`] (C4): a local `moka` tier always present,
//! an optional remote Redis tier behind the `remote-cache` feature, and
//! a circuit breaker guarding calls to the remote tier so a struggling
//! Redis instance degrades the cache to local-only instead of stalling
//! every request.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hybrid_retrieval_core::error::{EngineError, EngineResult};
use hybrid_retrieval_core::models::CacheMetrics;
use hybrid_retrieval_core::traits::CacheProvider;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::CacheConfig;

#[derive(Clone)]
struct StoredEntry {
    compressed: bool,
    data: Vec<u8>,
}

const CIRCUIT_CLOSED: u8 = 0;
const CIRCUIT_OPEN: u8 = 1;
const CIRCUIT_HALF_OPEN: u8 = 2;

/// Closed/Open/Half-Open breaker guarding the remote tier (§4.4).
struct CircuitBreaker {
    state: AtomicU8,
    failures: AtomicU32,
    threshold: u32,
    timeout: Duration,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(CIRCUIT_CLOSED),
            failures: AtomicU32::new(0),
            threshold: threshold.max(1),
            timeout,
            opened_at: Mutex::new(None),
        }
    }

    /// `true` if a remote call may proceed right now. Once Open's timeout
    /// has elapsed, exactly one caller wins the Open -> Half-Open
    /// transition via `compare_exchange` and is admitted as the probe;
    /// every other concurrent caller either sees `Closed` (not yet) or
    /// sees `HalfOpen`/a lost CAS (someone else is already probing) and
    /// is refused.
    fn allow(&self) -> bool {
        match self.state.load(Ordering::SeqCst) {
            CIRCUIT_CLOSED => true,
            CIRCUIT_HALF_OPEN => false,
            _ => {
                let elapsed = self
                    .opened_at
                    .lock()
                    .unwrap()
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed < self.timeout {
                    return false;
                }
                self.state
                    .compare_exchange(CIRCUIT_OPEN, CIRCUIT_HALF_OPEN, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            }
        }
    }

    fn on_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
        self.state.store(CIRCUIT_CLOSED, Ordering::SeqCst);
    }

    /// Returns `true` if this failure tripped the breaker open.
    fn on_failure(&self) -> bool {
        if self.state.load(Ordering::SeqCst) == CIRCUIT_HALF_OPEN {
            self.trip();
            return true;
        }
        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.threshold {
            self.trip();
            true
        } else {
            false
        }
    }

    fn trip(&self) {
        self.state.store(CIRCUIT_OPEN, Ordering::SeqCst);
        *self.opened_at.lock().unwrap() = Some(Instant::now());
    }
}

#[cfg(feature = "remote-cache")]
mod remote {
    use hybrid_retrieval_core::error::{EngineError, EngineResult};
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;

    pub struct RemoteTier {
        manager: ConnectionManager,
    }

    impl RemoteTier {
        pub async fn connect(url: &str) -> EngineResult<Self> {
            let client = redis::Client::open(url)
                .map_err(|e| EngineError::backend("redis", e.to_string()))?;
            let manager = client
                .get_connection_manager()
                .await
                .map_err(|e| EngineError::NotConnected {
                    backend: format!("redis: {e}"),
                })?;
            Ok(Self { manager })
        }

        pub async fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>> {
            let mut conn = self.manager.clone();
            conn.get(key)
                .await
                .map_err(|e| EngineError::backend("redis", e.to_string()))
        }

        pub async fn set(&self, key: &str, value: &[u8], ttl_seconds: Option<u64>) -> EngineResult<()> {
            let mut conn = self.manager.clone();
            match ttl_seconds {
                Some(ttl) if ttl > 0 => conn
                    .set_ex::<_, _, ()>(key, value, ttl)
                    .await
                    .map_err(|e| EngineError::backend("redis", e.to_string())),
                _ => conn
                    .set::<_, _, ()>(key, value)
                    .await
                    .map_err(|e| EngineError::backend("redis", e.to_string())),
            }
        }

        pub async fn delete(&self, key: &str) -> EngineResult<()> {
            let mut conn = self.manager.clone();
            conn.del::<_, ()>(key)
                .await
                .map_err(|e| EngineError::backend("redis", e.to_string()))
        }

        pub async fn exists(&self, key: &str) -> EngineResult<bool> {
            let mut conn = self.manager.clone();
            conn.exists(key)
                .await
                .map_err(|e| EngineError::backend("redis", e.to_string()))
        }

        pub async fn scan_namespace_keys(&self, pattern: &str) -> EngineResult<Vec<String>> {
            let mut conn = self.manager.clone();
            conn.keys(pattern)
                .await
                .map_err(|e| EngineError::backend("redis", e.to_string()))
        }
    }
}

#[cfg(feature = "remote-cache")]
use remote::RemoteTier;

pub struct CacheLayer {
    config: CacheConfig,
    local: Cache<String, StoredEntry>,
    #[cfg(feature = "remote-cache")]
    remote: Option<RemoteTier>,
    circuit: CircuitBreaker,
    metrics: Mutex<CacheMetrics>,
}

impl CacheLayer {
    pub async fn new(config: CacheConfig) -> EngineResult<Self> {
        let local = Cache::builder()
            .max_capacity(config.local_capacity_entries)
            .time_to_live(Duration::from_secs(config.default_ttl_seconds.max(1)))
            .build();

        #[cfg(feature = "remote-cache")]
        let remote = match &config.redis_url {
            Some(url) if config.mode != hybrid_retrieval_core::models::CacheMode::LocalOnly => {
                Some(RemoteTier::connect(url).await?)
            }
            _ => None,
        };
        #[cfg(not(feature = "remote-cache"))]
        if config.redis_url.is_some() {
            warn!("cache.redis_url is set but the remote-cache feature is not compiled in; running local-only");
        }

        let circuit = CircuitBreaker::new(
            config.circuit_breaker_threshold,
            Duration::from_secs(config.circuit_breaker_timeout_seconds),
        );

        Ok(Self {
            config,
            local,
            #[cfg(feature = "remote-cache")]
            remote,
            circuit,
            metrics: Mutex::new(CacheMetrics::default()),
        })
    }

    fn full_key(&self, key: &str, namespace: &str) -> String {
        let raw = format!("{}:{}:{}", self.config.key_prefix, namespace, key);
        if raw.len() <= self.config.max_key_len {
            raw
        } else {
            let mut hasher = Sha256::new();
            hasher.update(raw.as_bytes());
            let digest = hasher.finalize();
            format!("{}:{}:h{:x}", self.config.key_prefix, namespace, digest)
        }
    }

    fn encode(&self, value: &[u8]) -> StoredEntry {
        if value.len() >= self.config.compression_threshold_bytes {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            use std::io::Write;
            if encoder.write_all(value).is_ok() {
                if let Ok(compressed) = encoder.finish() {
                    if compressed.len() < value.len() {
                        return StoredEntry {
                            compressed: true,
                            data: compressed,
                        };
                    }
                }
            }
        }
        StoredEntry {
            compressed: false,
            data: value.to_vec(),
        }
    }

    fn decode(entry: &StoredEntry) -> EngineResult<Vec<u8>> {
        if !entry.compressed {
            return Ok(entry.data.clone());
        }
        use std::io::Read;
        let mut decoder = GzDecoder::new(entry.data.as_slice());
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| EngineError::Serialization {
                message: format!("decompressing cache entry: {e}"),
            })?;
        Ok(out)
    }

    fn wire_encode(entry: &StoredEntry) -> Vec<u8> {
        let mut out = Vec::with_capacity(entry.data.len() + 1);
        out.push(entry.compressed as u8);
        out.extend_from_slice(&entry.data);
        out
    }

    fn wire_decode(bytes: &[u8]) -> Option<StoredEntry> {
        let (&flag, rest) = bytes.split_first()?;
        Some(StoredEntry {
            compressed: flag != 0,
            data: rest.to_vec(),
        })
    }

    fn uses_remote(&self) -> bool {
        use hybrid_retrieval_core::models::CacheMode;
        !matches!(self.config.mode, CacheMode::LocalOnly)
    }

    fn uses_local(&self) -> bool {
        use hybrid_retrieval_core::models::CacheMode;
        !matches!(self.config.mode, CacheMode::RemoteOnly)
    }

    #[cfg(feature = "remote-cache")]
    async fn remote_get(&self, full_key: &str) -> Option<StoredEntry> {
        let remote = self.remote.as_ref()?;
        if !self.circuit.allow() {
            return None;
        }
        let start = Instant::now();
        match remote.get(full_key).await {
            Ok(Some(bytes)) => {
                self.circuit.on_success();
                self.record_read(start.elapsed(), bytes.len() as u64);
                Self::wire_decode(&bytes)
            }
            Ok(None) => {
                self.circuit.on_success();
                None
            }
            Err(e) => {
                let tripped = self.circuit.on_failure();
                self.record_error(tripped);
                debug!(error = %e, "remote cache get failed");
                None
            }
        }
    }

    #[cfg(not(feature = "remote-cache"))]
    async fn remote_get(&self, _full_key: &str) -> Option<StoredEntry> {
        None
    }

    #[cfg(feature = "remote-cache")]
    async fn remote_set(&self, full_key: &str, entry: &StoredEntry, ttl_seconds: Option<u64>) {
        let Some(remote) = self.remote.as_ref() else {
            return;
        };
        if !self.circuit.allow() {
            return;
        }
        let payload = Self::wire_encode(entry);
        let start = Instant::now();
        match remote.set(full_key, &payload, ttl_seconds).await {
            Ok(()) => {
                self.circuit.on_success();
                self.record_write(start.elapsed(), payload.len() as u64);
            }
            Err(e) => {
                let tripped = self.circuit.on_failure();
                self.record_error(tripped);
                warn!(error = %e, "remote cache set failed");
            }
        }
    }

    #[cfg(not(feature = "remote-cache"))]
    async fn remote_set(&self, _full_key: &str, _entry: &StoredEntry, _ttl_seconds: Option<u64>) {}

    #[cfg(feature = "remote-cache")]
    async fn remote_delete(&self, full_key: &str) {
        if let Some(remote) = self.remote.as_ref() {
            if self.circuit.allow() {
                if let Err(e) = remote.delete(full_key).await {
                    self.circuit.on_failure();
                    debug!(error = %e, "remote cache delete failed");
                } else {
                    self.circuit.on_success();
                }
            }
        }
    }

    #[cfg(not(feature = "remote-cache"))]
    async fn remote_delete(&self, _full_key: &str) {}

    fn record_read(&self, elapsed: Duration, bytes: u64) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.bytes_in += bytes;
        let n = (metrics.hits + metrics.misses).max(1) as f64;
        metrics.avg_read_ms = (metrics.avg_read_ms * (n - 1.0) + elapsed.as_secs_f64() * 1000.0) / n;
    }

    fn record_write(&self, elapsed: Duration, bytes: u64) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.bytes_out += bytes;
        let n = (metrics.hits + metrics.misses).max(1) as f64;
        metrics.avg_write_ms = (metrics.avg_write_ms * (n - 1.0) + elapsed.as_secs_f64() * 1000.0) / n;
    }

    fn record_error(&self, tripped: bool) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.errors += 1;
        if tripped {
            metrics.circuit_trips += 1;
        }
    }
}

#[async_trait::async_trait]
impl CacheProvider for CacheLayer {
    async fn get(&self, key: &str, namespace: &str) -> EngineResult<(Option<Vec<u8>>, bool)> {
        let full_key = self.full_key(key, namespace);

        if self.uses_local() {
            if let Some(entry) = self.local.get(&full_key).await {
                let mut metrics = self.metrics.lock().unwrap();
                metrics.hits += 1;
                drop(metrics);
                return Ok((Some(Self::decode(&entry)?), true));
            }
        }

        if self.uses_remote() {
            if let Some(entry) = self.remote_get(&full_key).await {
                if self.uses_local() {
                    self.local.insert(full_key.clone(), entry.clone()).await;
                }
                let mut metrics = self.metrics.lock().unwrap();
                metrics.hits += 1;
                drop(metrics);
                return Ok((Some(Self::decode(&entry)?), true));
            }
        }

        let mut metrics = self.metrics.lock().unwrap();
        metrics.misses += 1;
        Ok((None, false))
    }

    async fn set(
        &self,
        key: &str,
        value: &[u8],
        namespace: &str,
        ttl_seconds: Option<u64>,
    ) -> EngineResult<()> {
        let max_bytes = self.config.max_value_size_mb * 1024 * 1024;
        if value.len() > max_bytes {
            return Err(EngineError::OversizedValue {
                size: value.len(),
                limit: max_bytes,
            });
        }

        let full_key = self.full_key(key, namespace);
        let entry = self.encode(value);
        let ttl = ttl_seconds.or(Some(self.config.default_ttl_seconds));

        use hybrid_retrieval_core::models::CacheMode;
        match self.config.mode {
            CacheMode::LocalOnly => {
                self.insert_local(&full_key, entry, ttl).await;
            }
            CacheMode::RemoteOnly => {
                self.remote_set(&full_key, &entry, ttl).await;
            }
            CacheMode::Hybrid | CacheMode::WriteThrough => {
                self.insert_local(&full_key, entry.clone(), ttl).await;
                self.remote_set(&full_key, &entry, ttl).await;
            }
            CacheMode::WriteBack => {
                self.insert_local(&full_key, entry, ttl).await;
                debug!("write-back mode does not persist to remote synchronously without a background worker; treating as local write");
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &str, namespace: &str) -> EngineResult<()> {
        let full_key = self.full_key(key, namespace);
        if self.uses_local() {
            self.local.invalidate(&full_key).await;
        }
        if self.uses_remote() {
            self.remote_delete(&full_key).await;
        }
        Ok(())
    }

    async fn exists(&self, key: &str, namespace: &str) -> EngineResult<bool> {
        let full_key = self.full_key(key, namespace);
        if self.uses_local() && self.local.contains_key(&full_key) {
            return Ok(true);
        }
        if self.uses_remote() {
            return Ok(self.remote_get(&full_key).await.is_some());
        }
        Ok(false)
    }

    async fn clear_namespace(&self, namespace: &str) -> EngineResult<u64> {
        let prefix = format!("{}:{}:", self.config.key_prefix, namespace);
        let mut removed = 0u64;
        let keys: Vec<String> = self
            .local
            .iter()
            .map(|(k, _)| k.as_ref().clone())
            .filter(|k| k.starts_with(&prefix))
            .collect();
        for k in keys {
            self.local.invalidate(&k).await;
            removed += 1;
        }
        Ok(removed)
    }

    fn metrics(&self) -> CacheMetrics {
        let mut metrics = self.metrics.lock().unwrap().clone();
        let total_bytes = metrics.bytes_in + metrics.bytes_out;
        if total_bytes > 0 {
            metrics.effective_compression_ratio = metrics.bytes_out as f32 / total_bytes.max(1) as f32;
        }
        metrics
    }
}

impl CacheLayer {
    /// `moka`'s per-entry TTL is set at cache-construction time, not per
    /// insert, so expiry here is enforced only by the whole-cache default;
    /// the `ttl_seconds` argument is accepted for interface symmetry with
    /// the remote tier, which does apply it per key.
    async fn insert_local(&self, full_key: &str, entry: StoredEntry, _ttl_seconds: Option<u64>) {
        self.local.insert(full_key.to_string(), entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CacheConfig {
        CacheConfig {
            mode: hybrid_retrieval_core::models::CacheMode::LocalOnly,
            serialization_format: hybrid_retrieval_core::models::SerializationFormat::Json,
            default_ttl_seconds: 60,
            compression_threshold_bytes: 16,
            max_value_size_mb: 1,
            local_capacity_entries: 1000,
            key_prefix: "test".to_string(),
            max_key_len: 200,
            circuit_breaker_threshold: 2,
            circuit_breaker_timeout_seconds: 1,
            redis_url: None,
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = CacheLayer::new(test_config()).await.unwrap();
        cache.set("k", b"hello world", "ns", None).await.unwrap();
        let (value, found) = cache.get("k", "ns").await.unwrap();
        assert!(found);
        assert_eq!(value.unwrap(), b"hello world".to_vec());
    }

    #[tokio::test]
    async fn large_values_are_compressed_and_decompress_cleanly() {
        let cache = CacheLayer::new(test_config()).await.unwrap();
        let payload = "x".repeat(1000);
        cache.set("k", payload.as_bytes(), "ns", None).await.unwrap();
        let (value, found) = cache.get("k", "ns").await.unwrap();
        assert!(found);
        assert_eq!(value.unwrap(), payload.into_bytes());
    }

    #[tokio::test]
    async fn oversized_value_is_refused() {
        let cache = CacheLayer::new(test_config()).await.unwrap();
        let big = vec![0u8; 2 * 1024 * 1024];
        let err = cache.set("k", &big, "ns", None).await.unwrap_err();
        assert!(matches!(err, EngineError::OversizedValue { .. }));
    }

    #[tokio::test]
    async fn clear_namespace_only_removes_that_namespace() {
        let cache = CacheLayer::new(test_config()).await.unwrap();
        cache.set("a", b"1", "ns1", None).await.unwrap();
        cache.set("b", b"2", "ns2", None).await.unwrap();
        let removed = cache.clear_namespace("ns1").await.unwrap();
        assert_eq!(removed, 1);
        assert!(!cache.exists("a", "ns1").await.unwrap());
        assert!(cache.exists("b", "ns2").await.unwrap());
    }

    #[test]
    fn circuit_breaker_opens_after_threshold_and_half_opens_after_timeout() {
        let breaker = CircuitBreaker::new(2, Duration::from_millis(50));
        assert!(breaker.allow());
        breaker.on_failure();
        assert!(breaker.allow());
        let tripped = breaker.on_failure();
        assert!(tripped);
        assert!(!breaker.allow());
        std::thread::sleep(Duration::from_millis(60));
        assert!(breaker.allow());
    }

    // S5: after the timeout elapses, concurrent callers racing to probe
    // the remote tier admit exactly one of them.
    #[test]
    fn half_open_admits_a_single_probe_under_concurrency() {
        use std::sync::Arc;
        use std::thread;

        let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_millis(30)));
        breaker.on_failure();
        assert_eq!(breaker.state.load(Ordering::SeqCst), CIRCUIT_OPEN);
        std::thread::sleep(Duration::from_millis(40));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let breaker = breaker.clone();
                thread::spawn(move || breaker.allow())
            })
            .collect();
        let admitted = handles.into_iter().filter(|h| h.join().unwrap()).count();
        assert_eq!(admitted, 1);
    }
}
