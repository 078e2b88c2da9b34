//! Prometheus exporter for cache snapshots
//!
//! Counters are copied from engine snapshots on every scrape, so they are
//! exported as gauges; they reset when the engine is re-initialized.

use prometheus::{Encoder, Gauge, IntGauge, Opts, Registry, TextEncoder};

use crate::cache::MetricsSnapshot;
use crate::error::Result;

/// Default metric namespace
pub const DEFAULT_NAMESPACE: &str = "proxycache";

/// Registry of cache gauges fed from [`MetricsSnapshot`]s
pub struct CacheExporter {
    registry: Registry,
    hits: IntGauge,
    misses: IntGauge,
    evictions: IntGauge,
    expirations: IntGauge,
    inserts: IntGauge,
    bytes_used: IntGauge,
    max_bytes: IntGauge,
    entries: IntGauge,
    cached_bytes: IntGauge,
    missed_bytes: IntGauge,
    tracked_admissions: IntGauge,
    hit_rate: Gauge,
    byte_hit_rate: Gauge,
    max_shard_fill: Gauge,
}

impl std::fmt::Debug for CacheExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheExporter").finish_non_exhaustive()
    }
}

fn int_gauge(registry: &Registry, namespace: &str, name: &str, help: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, help).namespace(namespace))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn gauge(registry: &Registry, namespace: &str, name: &str, help: &str) -> Result<Gauge> {
    let gauge = Gauge::with_opts(Opts::new(name, help).namespace(namespace))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

#[inline]
fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl CacheExporter {
    /// Exporter under the default namespace
    pub fn new() -> Result<Self> {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    /// Exporter with every metric prefixed by `namespace_`
    pub fn with_namespace(namespace: &str) -> Result<Self> {
        let registry = Registry::new();
        let r = &registry;
        let ns = namespace;

        Ok(Self {
            hits: int_gauge(r, ns, "hits", "Cache lookups answered from cache")?,
            misses: int_gauge(r, ns, "misses", "Cache lookups that missed, including expired")?,
            evictions: int_gauge(r, ns, "evictions", "Entries evicted under byte pressure")?,
            expirations: int_gauge(r, ns, "expirations", "Expired entries dropped on lookup")?,
            inserts: int_gauge(r, ns, "inserts", "New entries stored")?,
            bytes_used: int_gauge(r, ns, "bytes_used", "Accounted bytes of live entries")?,
            max_bytes: int_gauge(r, ns, "max_bytes", "Configured byte budget")?,
            entries: int_gauge(r, ns, "entries", "Live entries")?,
            cached_bytes: int_gauge(r, ns, "cached_bytes", "Body bytes served from cache")?,
            missed_bytes: int_gauge(r, ns, "missed_bytes", "Body bytes fetched from backends")?,
            tracked_admissions: int_gauge(
                r,
                ns,
                "tracked_admissions",
                "Keys seen once and awaiting a second request",
            )?,
            hit_rate: gauge(r, ns, "hit_rate_percent", "Lookup hit rate")?,
            byte_hit_rate: gauge(r, ns, "byte_hit_rate_percent", "Share of bytes served from cache")?,
            max_shard_fill: gauge(
                r,
                ns,
                "max_shard_fill_percent",
                "Fullest shard relative to its budget",
            )?,
            registry,
        })
    }

    /// Copy a snapshot into the gauges
    pub fn refresh(&self, snapshot: &MetricsSnapshot) {
        let totals = &snapshot.totals;
        self.hits.set(clamp(totals.hits));
        self.misses.set(clamp(totals.misses));
        self.evictions.set(clamp(totals.evictions));
        self.expirations.set(clamp(totals.expirations));
        self.inserts.set(clamp(totals.inserts));
        self.bytes_used.set(clamp(totals.bytes_used));
        self.max_bytes.set(clamp(snapshot.max_bytes));
        self.entries.set(clamp(totals.entries));
        self.cached_bytes.set(clamp(totals.cached_bytes));
        self.missed_bytes.set(clamp(totals.missed_bytes));
        self.tracked_admissions
            .set(clamp(snapshot.tracked_admissions));
        self.hit_rate.set(snapshot.hit_rate);
        self.byte_hit_rate.set(snapshot.byte_hit_rate);
        self.max_shard_fill.set(snapshot.max_shard_fill);
    }

    /// Render the registry in the Prometheus text format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }

    /// Content type of [`encode`](Self::encode) output
    pub fn format_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

// =============================================================================
// Tests
// =============================================================================
