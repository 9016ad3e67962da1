use std::time::Duration;

use crate::Error;

/// Largest TLS record on the wire: header and maximal explicit IV (261),
/// fragment (16384), padding (256) and MAC (48).
pub const MAX_TLS_PACKET_SIZE: usize = 16_709;

/// Largest plaintext fragment (2^14).
pub const MAX_FRAGMENT_SIZE: usize = 16_384;

/// Record layer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    max_packet_size: usize,
    mtu: usize,
    min_mtu: usize,
    enable_sslv2_hello: bool,
    cbc_split: bool,
    max_queue_rx: usize,
    max_queue_tx: usize,
    allow_unsafe_renegotiation: bool,
    status_cache_size: usize,
    status_cache_lifetime: Duration,
    status_response_timeout: Duration,
    status_ignore_extensions: bool,
    status_worker_threads: usize,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            max_packet_size: MAX_TLS_PACKET_SIZE,
            mtu: 1150,
            min_mtu: 256,
            enable_sslv2_hello: false,
            cbc_split: true,
            max_queue_rx: 30,
            max_queue_tx: 10,
            allow_unsafe_renegotiation: false,
            status_cache_size: 256,
            status_cache_lifetime: Duration::from_secs(3600),
            status_response_timeout: Duration::from_millis(5000),
            status_ignore_extensions: false,
            status_worker_threads: 8,
            rng_seed: None,
        }
    }

    /// Largest TLS record we produce or accept.
    #[inline(always)]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Max transmission unit.
    ///
    /// The largest DTLS datagram we will produce before retransmission
    /// back-off kicks in.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Floor for the halving of the DTLS packet size on repeated retransmits.
    #[inline(always)]
    pub fn min_mtu(&self) -> usize {
        self.min_mtu
    }

    /// Accept an initial ClientHello in SSLv2 framing.
    #[inline(always)]
    pub fn enable_sslv2_hello(&self) -> bool {
        self.enable_sslv2_hello
    }

    /// Split application writes 1/n-1 for CBC suites at TLS 1.0 and below.
    #[inline(always)]
    pub fn cbc_split(&self) -> bool {
        self.cbc_split
    }

    /// Max amount of incoming DTLS records to buffer before rejecting more input.
    #[inline(always)]
    pub fn max_queue_rx(&self) -> usize {
        self.max_queue_rx
    }

    /// Max amount of outgoing packets to buffer.
    #[inline(always)]
    pub fn max_queue_tx(&self) -> usize {
        self.max_queue_tx
    }

    /// Renegotiate even if the peer does not support secure renegotiation.
    #[inline(always)]
    pub fn allow_unsafe_renegotiation(&self) -> bool {
        self.allow_unsafe_renegotiation
    }

    /// Number of OCSP responses kept by the status response cache.
    #[inline(always)]
    pub fn status_cache_size(&self) -> usize {
        self.status_cache_size
    }

    /// Longest time a cached OCSP response is served.
    #[inline(always)]
    pub fn status_cache_lifetime(&self) -> Duration {
        self.status_cache_lifetime
    }

    /// How long a server waits for fetched OCSP responses during a handshake.
    #[inline(always)]
    pub fn status_response_timeout(&self) -> Duration {
        self.status_response_timeout
    }

    /// Ignore request extensions (nonces) when consulting the status cache.
    #[inline(always)]
    pub fn status_ignore_extensions(&self) -> bool {
        self.status_ignore_extensions
    }

    /// Worker threads fetching OCSP responses.
    #[inline(always)]
    pub fn status_worker_threads(&self) -> usize {
        self.status_worker_threads
    }

    /// Seed for explicit IVs. Only for tests.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    max_packet_size: usize,
    mtu: usize,
    min_mtu: usize,
    enable_sslv2_hello: bool,
    cbc_split: bool,
    max_queue_rx: usize,
    max_queue_tx: usize,
    allow_unsafe_renegotiation: bool,
    status_cache_size: usize,
    status_cache_lifetime: Duration,
    status_response_timeout: Duration,
    status_ignore_extensions: bool,
    status_worker_threads: usize,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Set the largest TLS record size.
    ///
    /// Defaults to 16709.
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Set the max transmission unit (MTU) for DTLS.
    ///
    /// Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the floor for retransmission MTU back-off.
    ///
    /// Defaults to 256.
    pub fn min_mtu(mut self, min_mtu: usize) -> Self {
        self.min_mtu = min_mtu;
        self
    }

    /// Accept SSLv2 framed ClientHello messages.
    ///
    /// Defaults to false.
    pub fn enable_sslv2_hello(mut self, enable: bool) -> Self {
        self.enable_sslv2_hello = enable;
        self
    }

    /// Enable the 1/n-1 record split for CBC at TLS 1.0.
    ///
    /// Defaults to true.
    pub fn cbc_split(mut self, enable: bool) -> Self {
        self.cbc_split = enable;
        self
    }

    /// Set the max amount of incoming DTLS records to buffer.
    ///
    /// Defaults to 30.
    pub fn max_queue_rx(mut self, max_queue_rx: usize) -> Self {
        self.max_queue_rx = max_queue_rx;
        self
    }

    /// Set the max amount of outgoing packets to buffer.
    ///
    /// Defaults to 10.
    pub fn max_queue_tx(mut self, max_queue_tx: usize) -> Self {
        self.max_queue_tx = max_queue_tx;
        self
    }

    /// Allow renegotiation with peers lacking RFC 5746 support.
    ///
    /// Defaults to false.
    pub fn allow_unsafe_renegotiation(mut self, allow: bool) -> Self {
        self.allow_unsafe_renegotiation = allow;
        self
    }

    /// Set the number of cached OCSP responses. 0 disables caching.
    ///
    /// Defaults to 256.
    pub fn status_cache_size(mut self, size: usize) -> Self {
        self.status_cache_size = size;
        self
    }

    /// Set the max lifetime of a cached OCSP response.
    ///
    /// Defaults to 1 hour.
    pub fn status_cache_lifetime(mut self, lifetime: Duration) -> Self {
        self.status_cache_lifetime = lifetime;
        self
    }

    /// Set how long to wait for OCSP fetches.
    ///
    /// Defaults to 5 seconds.
    pub fn status_response_timeout(mut self, timeout: Duration) -> Self {
        self.status_response_timeout = timeout;
        self
    }

    /// Ignore request extensions when using the status cache.
    ///
    /// Defaults to false.
    pub fn status_ignore_extensions(mut self, ignore: bool) -> Self {
        self.status_ignore_extensions = ignore;
        self
    }

    /// Set the number of OCSP fetch workers.
    ///
    /// Defaults to 8.
    pub fn status_worker_threads(mut self, threads: usize) -> Self {
        self.status_worker_threads = threads;
        self
    }

    /// Seed the random source for deterministic output in tests.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the configuration.
    ///
    /// Fails with [`Error::ConfigError`] for inconsistent sizes.
    pub fn build(self) -> Result<Config, Error> {
        if self.min_mtu < 256 {
            return Err(Error::ConfigError(format!(
                "min_mtu must be at least 256: {}",
                self.min_mtu
            )));
        }
        if self.mtu < self.min_mtu {
            return Err(Error::ConfigError(format!(
                "mtu {} below min_mtu {}",
                self.mtu, self.min_mtu
            )));
        }
        if self.max_packet_size < self.min_mtu || self.max_packet_size > MAX_TLS_PACKET_SIZE {
            return Err(Error::ConfigError(format!(
                "max_packet_size out of range: {}",
                self.max_packet_size
            )));
        }
        if self.status_worker_threads == 0 {
            return Err(Error::ConfigError(
                "status_worker_threads must be positive".into(),
            ));
        }

        Ok(Config {
            max_packet_size: self.max_packet_size,
            mtu: self.mtu,
            min_mtu: self.min_mtu,
            enable_sslv2_hello: self.enable_sslv2_hello,
            cbc_split: self.cbc_split,
            max_queue_rx: self.max_queue_rx,
            max_queue_tx: self.max_queue_tx,
            allow_unsafe_renegotiation: self.allow_unsafe_renegotiation,
            status_cache_size: self.status_cache_size,
            status_cache_lifetime: self.status_cache_lifetime,
            status_response_timeout: self.status_response_timeout,
            status_ignore_extensions: self.status_ignore_extensions,
            status_worker_threads: self.status_worker_threads,
            rng_seed: self.rng_seed,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}
