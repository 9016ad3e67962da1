use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use sha2::{Digest, Sha256};

use super::extension::{CertStatusRequestType, OcspStatusRequest};
use crate::{Config, Error};

/// A DER encoded OCSP response as returned by a responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcspResponse {
    pub bytes: Vec<u8>,
    /// `nextUpdate` of the response, if the responder gave one.
    pub next_update: Option<SystemTime>,
}

/// Talks to the OCSP responder for a certificate.
///
/// Called from the worker threads of [`StatusResponseManager`].
pub trait ResponseFetcher: Send + Sync {
    fn fetch(
        &self,
        cert: &[u8],
        issuer: &[u8],
        request: &OcspStatusRequest,
    ) -> Result<OcspResponse, Error>;
}

type CacheKey = [u8; 32];

fn cache_key(cert: &[u8], issuer: &[u8]) -> CacheKey {
    let mut hasher = Sha256::new();
    hasher.update((cert.len() as u32).to_be_bytes());
    hasher.update(cert);
    hasher.update(issuer);
    hasher.finalize().into()
}

struct CacheEntry {
    bytes: Vec<u8>,
    expires: Instant,
    last_used: u64,
}

/// Bounded, lifetime limited cache of OCSP responses.
struct ResponseCache {
    entries: HashMap<CacheKey, CacheEntry>,
    max_size: usize,
    lifetime: Duration,
    tick: u64,
}

impl ResponseCache {
    fn new(max_size: usize, lifetime: Duration) -> Self {
        ResponseCache {
            entries: HashMap::new(),
            max_size,
            lifetime,
            tick: 0,
        }
    }

    fn get(&mut self, key: &CacheKey, now: Instant) -> Option<Vec<u8>> {
        let expired = self.entries.get(key)?.expires <= now;
        if expired {
            trace!("Evict expired OCSP response");
            self.entries.remove(key);
            return None;
        }

        self.tick += 1;
        let entry = self.entries.get_mut(key)?;
        entry.last_used = self.tick;
        Some(entry.bytes.clone())
    }

    fn insert(&mut self, key: CacheKey, response: &OcspResponse, now: Instant) {
        if self.max_size == 0 {
            return;
        }

        let mut lifetime = self.lifetime;
        if let Some(next_update) = response.next_update {
            match next_update.duration_since(SystemTime::now()) {
                Ok(until) => lifetime = lifetime.min(until),
                Err(_) => {
                    debug!("OCSP response past nextUpdate, not caching");
                    return;
                }
            }
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.evict_lru();
        }

        self.tick += 1;
        self.entries.insert(
            key,
            CacheEntry {
                bytes: response.bytes.clone(),
                expires: now + lifetime,
                last_used: self.tick,
            },
        );
    }

    fn evict_lru(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used)
            .map(|(k, _)| *k);
        if let Some(k) = oldest {
            self.entries.remove(&k);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn lock(cache: &Mutex<ResponseCache>) -> MutexGuard<'_, ResponseCache> {
    // A panicking fetcher must not take the cache down with it.
    cache.lock().unwrap_or_else(|e| e.into_inner())
}

struct Job {
    key: CacheKey,
    cert: Vec<u8>,
    issuer: Vec<u8>,
    request: OcspStatusRequest,
    cacheable: bool,
    reply: Sender<(Vec<u8>, Option<Vec<u8>>)>,
}

/// Fetches and caches OCSP responses for certificate status stapling.
///
/// Cache misses are handed to a pool of `status_worker_threads` workers.
/// [`get`](Self::get) waits for them up to the given delay. Responses that
/// arrive late still land in the cache for the next handshake.
pub struct StatusResponseManager {
    ignore_extensions: bool,
    default_timeout: Duration,
    cache: Arc<Mutex<ResponseCache>>,
    jobs: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    fetches: Arc<AtomicUsize>,
}

impl StatusResponseManager {
    pub fn new(config: &Config, fetcher: Arc<dyn ResponseFetcher>) -> Self {
        let cache = Arc::new(Mutex::new(ResponseCache::new(
            config.status_cache_size(),
            config.status_cache_lifetime(),
        )));
        let fetches = Arc::new(AtomicUsize::new(0));

        let (jobs, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..config.status_worker_threads())
            .map(|_| {
                let rx = rx.clone();
                let cache = cache.clone();
                let fetcher = fetcher.clone();
                let fetches = fetches.clone();
                thread::spawn(move || worker(rx, cache, fetcher, fetches))
            })
            .collect();

        StatusResponseManager {
            ignore_extensions: config.status_ignore_extensions(),
            default_timeout: config.status_response_timeout(),
            cache,
            jobs: Some(jobs),
            workers,
            fetches,
        }
    }

    /// Collect OCSP responses for `chain`, keyed by certificate.
    ///
    /// `ocsp` covers the end-entity certificate, `ocsp_multi` every
    /// certificate whose issuer is also in the chain. Certificates without
    /// an answer within `delay` are missing from the map.
    pub fn get(
        &self,
        status_type: CertStatusRequestType,
        request: &OcspStatusRequest,
        chain: &[Vec<u8>],
        delay: Duration,
    ) -> HashMap<Vec<u8>, Vec<u8>> {
        let mut responses = HashMap::new();

        let count = match status_type {
            CertStatusRequestType::Ocsp => 1,
            CertStatusRequestType::OcspMulti => chain.len().saturating_sub(1),
            CertStatusRequestType::Unknown(t) => {
                debug!("No stapling for status type {}", t);
                return responses;
            }
        };
        if chain.len() < 2 {
            debug!("No issuer in chain, nothing to staple");
            return responses;
        }

        let cacheable = self.ignore_extensions || !request.has_extensions();
        let (reply, results) = mpsc::channel();
        let mut pending = 0;

        for pair in chain.windows(2).take(count) {
            let (cert, issuer) = (&pair[0], &pair[1]);
            let key = cache_key(cert, issuer);

            if cacheable {
                if let Some(bytes) = lock(&self.cache).get(&key, Instant::now()) {
                    trace!("OCSP response from cache");
                    responses.insert(cert.clone(), bytes);
                    continue;
                }
            }

            let Some(jobs) = &self.jobs else {
                break;
            };
            let job = Job {
                key,
                cert: cert.clone(),
                issuer: issuer.clone(),
                request: request.clone(),
                cacheable,
                reply: reply.clone(),
            };
            if jobs.send(job).is_err() {
                warn!("OCSP workers gone");
                break;
            }
            pending += 1;
        }
        drop(reply);

        let deadline = Instant::now() + delay;
        while pending > 0 {
            let left = deadline.saturating_duration_since(Instant::now());
            match results.recv_timeout(left) {
                Ok((cert, Some(bytes))) => {
                    responses.insert(cert, bytes);
                    pending -= 1;
                }
                Ok((_, None)) => pending -= 1,
                Err(RecvTimeoutError::Timeout) => {
                    debug!("{} OCSP fetches did not finish in {:?}", pending, delay);
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        responses
    }

    /// [`get`](Self::get) with the configured `status_response_timeout`.
    pub fn staple(
        &self,
        status_type: CertStatusRequestType,
        request: &OcspStatusRequest,
        chain: &[Vec<u8>],
    ) -> HashMap<Vec<u8>, Vec<u8>> {
        self.get(status_type, request, chain, self.default_timeout)
    }

    /// Number of responder round trips so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Number of responses currently cached.
    pub fn cache_len(&self) -> usize {
        lock(&self.cache).len()
    }
}

/// Whether `responses` allow a CertificateStatus message.
///
/// `ocsp` needs the end-entity response. `ocsp_multi` needs at least one.
pub fn can_staple(
    status_type: CertStatusRequestType,
    responses: &HashMap<Vec<u8>, Vec<u8>>,
    chain: &[Vec<u8>],
) -> bool {
    match status_type {
        CertStatusRequestType::Ocsp => chain
            .first()
            .and_then(|ee| responses.get(ee))
            .map(|r| !r.is_empty())
            .unwrap_or(false),
        CertStatusRequestType::OcspMulti => responses.values().any(|r| !r.is_empty()),
        CertStatusRequestType::Unknown(_) => false,
    }
}

fn worker(
    rx: Arc<Mutex<Receiver<Job>>>,
    cache: Arc<Mutex<ResponseCache>>,
    fetcher: Arc<dyn ResponseFetcher>,
    fetches: Arc<AtomicUsize>,
) {
    loop {
        let job = match rx.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        let Ok(job) = job else {
            break;
        };

        fetches.fetch_add(1, Ordering::Relaxed);
        let result = match fetcher.fetch(&job.cert, &job.issuer, &job.request) {
            Ok(response) => {
                if job.cacheable {
                    lock(&cache).insert(job.key, &response, Instant::now());
                }
                Some(response.bytes)
            }
            Err(e) => {
                warn!("OCSP fetch failed: {}", e);
                None
            }
        };

        // The requester may have stopped waiting.
        let _ = job.reply.send((job.cert, result));
    }
}

impl Drop for StatusResponseManager {
    fn drop(&mut self) {
        self.jobs.take();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

impl fmt::Debug for StatusResponseManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusResponseManager")
            .field("workers", &self.workers.len())
            .field("cached", &self.cache_len())
            .finish()
    }
}
