//! Synthetic request workload
//!
//! Drives the cache pipeline from worker threads the way proxy workers
//! would: skewed key popularity, a few uncacheable requests, and a fake
//! backend that answers every miss.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use proxycache::cache::{CachePipeline, Decision, RequestInfo, RequestKey, ResponseInfo};

const HOSTS: [&str; 3] = ["www.example.com", "api.example.com", "static.example.com"];

/// Workload shape
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    pub workers: usize,
    /// Distinct paths per host
    pub key_space: u64,
    /// Popularity exponent; larger values concentrate on fewer keys
    pub skew: f64,
    /// Largest synthetic body
    pub body_bytes: usize,
    /// Sleep between requests per worker
    pub pause: Duration,
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            key_space: 10_000,
            skew: 2.0,
            body_bytes: 16 * 1024,
            pause: Duration::from_millis(1),
            seed: 0x5eed,
        }
    }
}

/// Request outcome counters
#[derive(Debug, Default)]
pub struct WorkloadStats {
    pub requests: AtomicU64,
    pub served: AtomicU64,
    pub fetched: AtomicU64,
    pub stored: AtomicU64,
    pub bypassed: AtomicU64,
}

impl WorkloadStats {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Running workload
#[derive(Debug)]
pub struct Workload {
    handles: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    stats: Arc<WorkloadStats>,
}

impl Workload {
    /// Start `config.workers` threads
    pub fn spawn(pipeline: CachePipeline, config: WorkloadConfig) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(WorkloadStats::default());

        let mut handles = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            let pipeline = pipeline.clone();
            let config = config.clone();
            let stop = Arc::clone(&stop);
            let stats = Arc::clone(&stats);
            let handle = std::thread::Builder::new()
                .name(format!("workload-{}", id))
                .spawn(move || run_worker(id as u64, &pipeline, &config, &stop, &stats))?;
            handles.push(handle);
        }

        info!(workers = config.workers, key_space = config.key_space, "Synthetic workload started");
        Ok(Self {
            handles,
            stop,
            stats,
        })
    }

    pub fn stats(&self) -> Arc<WorkloadStats> {
        Arc::clone(&self.stats)
    }

    /// Signal every worker and wait for them
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.handles {
            let _ = handle.join();
        }
        info!(
            requests = self.stats.requests(),
            served = self.stats.served.load(Ordering::Relaxed),
            stored = self.stats.stored.load(Ordering::Relaxed),
            "Synthetic workload stopped"
        );
    }
}

fn run_worker(
    id: u64,
    pipeline: &CachePipeline,
    config: &WorkloadConfig,
    stop: &AtomicBool,
    stats: &WorkloadStats,
) {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(id));
    debug!(worker = id, "worker started");

    while !stop.load(Ordering::Relaxed) {
        let u: f64 = rng.gen();
        let item = (config.key_space as f64 * u.powf(config.skew)) as u64;
        let host = HOSTS[(item % HOSTS.len() as u64) as usize];
        let path = format!("/item/{}", item);
        // Same parameters, random order: must map to one key
        let query = if rng.gen_bool(0.5) {
            format!("v={}&lang=en", item % 7)
        } else {
            format!("lang=en&v={}", item % 7)
        };
        let method = if rng.gen_bool(0.05) { "POST" } else { "GET" };
        let headers = if rng.gen_bool(0.02) {
            "Authorization: Bearer synthetic\r\n\r\n"
        } else {
            "Accept: */*\r\n\r\n"
        };

        let request = RequestInfo::new(
            RequestKey::new(method, "https", host, &path).with_query(&query),
        )
        .with_headers(headers);

        stats.requests.fetch_add(1, Ordering::Relaxed);
        match pipeline.lookup(&request) {
            Decision::Serve(_) => {
                stats.served.fetch_add(1, Ordering::Relaxed);
            }
            Decision::Fetch(fetch) => {
                stats.fetched.fetch_add(1, Ordering::Relaxed);
                let (info, body) = backend(&mut rng, item, config.body_bytes);
                if pipeline.complete(fetch, &info, body) {
                    stats.stored.fetch_add(1, Ordering::Relaxed);
                }
            }
            Decision::Bypass(_) => {
                stats.bypassed.fetch_add(1, Ordering::Relaxed);
            }
        }

        if !config.pause.is_zero() {
            std::thread::sleep(config.pause);
        }
    }
}

/// Fake origin: mostly 200s with a body sized per item
fn backend(rng: &mut StdRng, item: u64, max_body: usize) -> (ResponseInfo, Bytes) {
    let status = if rng.gen_bool(0.97) { 200 } else { 404 };
    let len = 1 + (item as usize * 131) % max_body.max(1);
    let body = Bytes::from(vec![b'a' + (item % 26) as u8; len]);

    let mut info = ResponseInfo::new(status, len as i64);
    info.content_type = Some("application/octet-stream".to_string());
    info.etag = Some(format!("\"{:x}\"", item));
    (info, body)
}
