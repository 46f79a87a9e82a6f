//! Runtime configuration.
//!
//! Plain structs with library defaults, builder-style setters, and
//! runtime environment overrides via `from_env()`.
//!
//! Environment variables (all optional):
//! - `SEINE_ADDR` - IPv4 bind address
//! - `SEINE_PORT` - bind port
//! - `SEINE_MAX_EVENTS` - max readiness events per wait call
//! - `SEINE_WORKERS` - worker pool size
//! - `SEINE_COMPLETION_CAP` - completion queue capacity
//! - `SEINE_CONTEXT_BLOCKS` - context slab block count

use std::net::Ipv4Addr;
use std::str::FromStr;

/// Parse an environment variable, ignoring unset or malformed values.
pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Passive socket configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// IPv4 bind address.
    pub addr: Ipv4Addr,
    /// Bind port. 0 lets the OS pick (the bound port is reported back).
    pub port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            addr: Ipv4Addr::new(127, 0, 0, 1),
            port: 8864,
        }
    }
}

impl ListenerConfig {
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(addr) = env_parse("SEINE_ADDR") {
            cfg.addr = addr;
        }
        if let Some(port) = env_parse("SEINE_PORT") {
            cfg.port = port;
        }
        cfg
    }
}

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Max readiness events consumed per poller wait call.
    pub max_events: usize,
    /// Fixed worker pool size.
    pub workers: usize,
    /// Completion queue capacity — the backpressure bound between
    /// dispatch and recycling.
    pub completion_capacity: usize,
    /// Context slab block count (one slot per simultaneous connection
    /// before heap fallback kicks in).
    pub context_blocks: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let max_events = 64;
        Self {
            max_events,
            workers: default_workers(),
            completion_capacity: max_events * 2,
            context_blocks: max_events,
        }
    }
}

/// Default pool sizing: nproc/2, clamped to [2, 8].
fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (cpus / 2).clamp(2, 8)
}

impl DispatcherConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_parse("SEINE_MAX_EVENTS") {
            cfg.max_events = n;
        }
        if let Some(n) = env_parse("SEINE_WORKERS") {
            cfg.workers = n;
        }
        if let Some(n) = env_parse("SEINE_COMPLETION_CAP") {
            cfg.completion_capacity = n;
        }
        if let Some(n) = env_parse("SEINE_CONTEXT_BLOCKS") {
            cfg.context_blocks = n;
        }
        cfg
    }

    pub fn max_events(mut self, n: usize) -> Self {
        self.max_events = n;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn completion_capacity(mut self, n: usize) -> Self {
        self.completion_capacity = n;
        self
    }

    pub fn context_blocks(mut self, n: usize) -> Self {
        self.context_blocks = n;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = DispatcherConfig::default();
        assert!(cfg.workers >= 2);
        assert_eq!(cfg.completion_capacity, cfg.max_events * 2);
        assert_eq!(cfg.context_blocks, cfg.max_events);
    }

    #[test]
    fn builder_overrides() {
        let cfg = DispatcherConfig::default().max_events(10).workers(2);
        assert_eq!(cfg.max_events, 10);
        assert_eq!(cfg.workers, 2);
    }

    #[test]
    fn listener_default_is_loopback() {
        let cfg = ListenerConfig::default();
        assert_eq!(cfg.addr, Ipv4Addr::new(127, 0, 0, 1));
    }
}
