//! IP geolocation service.
//!
//! The MMDB reader itself lives behind [`GeoProvider`]; this module owns what
//! the engine actually depends on: an LRU cache with TTL'd negatives, batched
//! lookups that yield between chunks, and the location-key comparison used to
//! classify dual-stack IP switches.

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::utils::now_ts;

/// Negative lookups are cached for at least this long so unknown IPs do not
/// hammer the provider.
const NEGATIVE_TTL_SECONDS: i64 = 3600;
const POSITIVE_CACHE_CAPACITY: usize = 50_000;
const NEGATIVE_CACHE_CAPACITY: usize = 10_000;
const BATCH_CHUNK: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    V4,
    V6,
    Unknown,
}

pub fn ip_version(ip: &str) -> IpVersion {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => IpVersion::V4,
        Ok(IpAddr::V6(_)) => IpVersion::V6,
        Err(_) => IpVersion::Unknown,
    }
}

pub fn is_private_ip(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        Ok(IpAddr::V6(v6)) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpGeoInfo {
    pub ip: String,
    pub version: IpVersion,
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub city: String,
    pub isp: String,
    pub asn: String,
    pub success: bool,
}

impl IpGeoInfo {
    /// Location identity used to decide whether two IPs represent the same
    /// origin: `ASN:city:country_code`.
    pub fn location_key(&self) -> String {
        format!("{}:{}:{}", self.asn, self.city, self.country_code)
    }

    fn private(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            version: ip_version(ip),
            country: "Private".to_string(),
            country_code: "--".to_string(),
            region: String::new(),
            city: "Private Network".to_string(),
            isp: "Private".to_string(),
            asn: "Private".to_string(),
            success: true,
        }
    }

    fn unknown(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            version: ip_version(ip),
            country: String::new(),
            country_code: String::new(),
            region: String::new(),
            city: String::new(),
            isp: String::new(),
            asn: String::new(),
            success: false,
        }
    }
}

/// Two IPs form a dual-stack pair when they resolve to the same location key
/// and sit on opposite IP versions. Same-location v4/v6 flapping is normal
/// client behavior, not a risk signal.
pub fn is_dual_stack_pair(a: &IpGeoInfo, b: &IpGeoInfo) -> bool {
    if !a.success || !b.success {
        return false;
    }
    let versions_differ = matches!(
        (a.version, b.version),
        (IpVersion::V4, IpVersion::V6) | (IpVersion::V6, IpVersion::V4)
    );
    versions_differ && a.location_key() == b.location_key()
}

/// The MMDB-backed resolver, out of scope for this crate. Implementations
/// must be cheap to call concurrently.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn resolve(&self, ip: &str) -> Option<IpGeoInfo>;

    fn is_available(&self) -> bool {
        true
    }
}

/// Provider used when no GeoIP database is configured; every lookup is a
/// cached negative.
pub struct DisabledGeoProvider;

#[async_trait]
impl GeoProvider for DisabledGeoProvider {
    async fn resolve(&self, _ip: &str) -> Option<IpGeoInfo> {
        None
    }

    fn is_available(&self) -> bool {
        false
    }
}

pub struct GeoService {
    provider: Box<dyn GeoProvider>,
    // Reads are frequent but cheap; a plain mutex around the LRU keeps writes
    // serialized without holding anything across provider calls.
    positive: Mutex<LruCache<String, IpGeoInfo>>,
    negative: Mutex<LruCache<String, i64>>,
}

impl GeoService {
    pub fn new(provider: Box<dyn GeoProvider>) -> Self {
        Self {
            provider,
            positive: Mutex::new(LruCache::new(
                NonZeroUsize::new(POSITIVE_CACHE_CAPACITY).unwrap(),
            )),
            negative: Mutex::new(LruCache::new(
                NonZeroUsize::new(NEGATIVE_CACHE_CAPACITY).unwrap(),
            )),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Box::new(DisabledGeoProvider))
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_available()
    }

    pub async fn lookup(&self, ip: &str) -> IpGeoInfo {
        let ip = ip.trim();
        if ip.is_empty() {
            return IpGeoInfo::unknown(ip);
        }
        if is_private_ip(ip) {
            return IpGeoInfo::private(ip);
        }

        if let Some(hit) = self.positive.lock().unwrap().get(ip).cloned() {
            return hit;
        }
        if let Some(&until) = self.negative.lock().unwrap().get(ip)
            && until > now_ts()
        {
            return IpGeoInfo::unknown(ip);
        }

        match self.provider.resolve(ip).await {
            Some(info) if info.success => {
                self.positive.lock().unwrap().put(ip.to_string(), info.clone());
                info
            }
            _ => {
                self.negative
                    .lock()
                    .unwrap()
                    .put(ip.to_string(), now_ts() + NEGATIVE_TTL_SECONDS);
                IpGeoInfo::unknown(ip)
            }
        }
    }

    /// Resolve many IPs, yielding between chunks so a large batch cannot
    /// monopolize a worker.
    pub async fn lookup_batch(&self, ips: &[String]) -> HashMap<String, IpGeoInfo> {
        let mut out = HashMap::with_capacity(ips.len());
        for chunk in ips.chunks(BATCH_CHUNK) {
            for ip in chunk {
                if out.contains_key(ip.as_str()) {
                    continue;
                }
                out.insert(ip.clone(), self.lookup(ip).await);
            }
            tokio::task::yield_now().await;
        }
        out
    }
}

/// Fixed-map provider for tests and small static deployments.
pub struct StaticGeoProvider {
    entries: HashMap<String, IpGeoInfo>,
}

impl StaticGeoProvider {
    pub fn new(entries: Vec<IpGeoInfo>) -> Self {
        Self { entries: entries.into_iter().map(|e| (e.ip.clone(), e)).collect() }
    }
}

#[async_trait]
impl GeoProvider for StaticGeoProvider {
    async fn resolve(&self, ip: &str) -> Option<IpGeoInfo> {
        self.entries.get(ip).cloned()
    }
}

/// Build a resolvable geo record, mostly for tests.
pub fn geo_record(ip: &str, asn: &str, city: &str, country_code: &str) -> IpGeoInfo {
    IpGeoInfo {
        ip: ip.to_string(),
        version: ip_version(ip),
        country: country_code.to_string(),
        country_code: country_code.to_string(),
        region: String::new(),
        city: city.to_string(),
        isp: asn.to_string(),
        asn: asn.to_string(),
        success: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use std::sync::Arc;

    struct CountingProvider {
        calls: Arc<AtomicU32>,
        known: HashMap<String, IpGeoInfo>,
    }

    #[async_trait]
    impl GeoProvider for CountingProvider {
        async fn resolve(&self, ip: &str) -> Option<IpGeoInfo> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.known.get(ip).cloned()
        }
    }

    #[test]
    fn version_detection() {
        assert_eq!(ip_version("1.2.3.4"), IpVersion::V4);
        assert_eq!(ip_version("2001:db8::1"), IpVersion::V6);
        assert_eq!(ip_version("not-an-ip"), IpVersion::Unknown);
    }

    #[test]
    fn private_ranges() {
        assert!(is_private_ip("10.0.0.1"));
        assert!(is_private_ip("192.168.1.1"));
        assert!(is_private_ip("127.0.0.1"));
        assert!(is_private_ip("::1"));
        assert!(!is_private_ip("8.8.8.8"));
    }

    #[test]
    fn dual_stack_requires_same_location_and_mixed_versions() {
        let v4 = geo_record("1.2.3.4", "AS100", "Berlin", "DE");
        let v6 = geo_record("2001:db8::1", "AS100", "Berlin", "DE");
        let other = geo_record("9.9.9.9", "AS999", "Zurich", "CH");
        let v4b = geo_record("1.2.3.5", "AS100", "Berlin", "DE");

        assert!(is_dual_stack_pair(&v4, &v6));
        assert!(is_dual_stack_pair(&v6, &v4));
        assert!(!is_dual_stack_pair(&v4, &other));
        // Same location but same version: not dual-stack.
        assert!(!is_dual_stack_pair(&v4, &v4b));
        // Failed lookups never form a pair.
        assert!(!is_dual_stack_pair(&v4, &IpGeoInfo::unknown("2001:db8::2")));
    }

    #[tokio::test]
    async fn negative_lookups_are_cached() {
        let calls = Arc::new(AtomicU32::new(0));
        let provider = CountingProvider { calls: Arc::clone(&calls), known: HashMap::new() };
        let service = GeoService::new(Box::new(provider));

        assert!(!service.lookup("8.8.8.8").await.success);
        assert!(!service.lookup("8.8.8.8").await.success);
        // Second lookup served from the negative cache.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn positive_lookups_are_cached() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut known = HashMap::new();
        known.insert("8.8.8.8".to_string(), geo_record("8.8.8.8", "AS15169", "Mountain View", "US"));
        let provider = CountingProvider { calls: Arc::clone(&calls), known };
        let service = GeoService::new(Box::new(provider));

        assert!(service.lookup("8.8.8.8").await.success);
        assert!(service.lookup("8.8.8.8").await.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Private IPs short-circuit before the provider.
        assert_eq!(service.lookup("192.168.0.1").await.country, "Private");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_lookup_dedupes() {
        let service = GeoService::disabled();
        let ips = vec!["1.1.1.1".to_string(), "1.1.1.1".to_string(), "2.2.2.2".to_string()];
        let out = service.lookup_batch(&ips).await;
        assert_eq!(out.len(), 2);
    }
}
