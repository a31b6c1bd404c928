//! Built-in chain links.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use super::{Connection, Next, ServerService};
use crate::config::ServiceProperties;
use crate::error::{ContainerError, ContainerResult};

/// Bounds the number of connections in flight; excess connections are refused.
///
/// The limit comes from the constructor and may be overridden at `init` by
/// the `MaxConnections` property.
#[derive(Debug)]
pub struct ConcurrencyLimit {
    limit: AtomicUsize,
    in_flight: AtomicUsize,
    rejected: AtomicU64,
}

impl ConcurrencyLimit {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            in_flight: AtomicUsize::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

struct Permit<'a>(&'a AtomicUsize);

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ServerService for ConcurrencyLimit {
    fn name(&self) -> &str {
        "concurrency-limit"
    }

    fn init(&self, props: &ServiceProperties) -> ContainerResult<()> {
        if let Some(limit) = props.get_usize("MaxConnections")? {
            if limit == 0 {
                return Err(ContainerError::InvalidConfig("MaxConnections must be at least 1".into()));
            }
            self.limit.store(limit, Ordering::Relaxed);
        }
        Ok(())
    }

    fn service(&self, conn: &mut dyn Connection, next: Next<'_>) -> ContainerResult<()> {
        let limit = self.limit();
        let admitted = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < limit).then_some(n + 1))
            .is_ok();
        if !admitted {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(ContainerError::ServiceRejected {
                service: self.name().to_string(),
                reason: format!("{} connections already in flight", limit),
            });
        }
        let _permit = Permit(&self.in_flight);
        next.run(conn)
    }
}

/// Admits only connections whose peer address is on an allow-list.
///
/// Configure with [`HostFilter::allow`] or the `OnlyFrom` property: a list of
/// IP addresses separated by spaces or commas, where `localhost` stands for
/// both loopback addresses and `*` admits everyone. Connections without a
/// peer address are refused unless `*` is listed.
///
/// # Examples
///
/// ```
/// use ferrous_container::chain::{HostFilter, ServerService};
/// use ferrous_container::ServiceProperties;
///
/// let filter = HostFilter::new();
/// let mut props = ServiceProperties::new();
/// props.set("OnlyFrom", "localhost, 10.0.0.7");
/// filter.init(&props).unwrap();
///
/// assert!(filter.permits(Some("127.0.0.1".parse().unwrap())));
/// assert!(filter.permits(Some("10.0.0.7".parse().unwrap())));
/// assert!(!filter.permits(Some("10.0.0.8".parse().unwrap())));
/// assert!(!filter.permits(None));
/// ```
#[derive(Debug, Default)]
pub struct HostFilter {
    allowed: RwLock<Vec<IpAddr>>,
    any: AtomicBool,
}

impl HostFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(self, addr: IpAddr) -> Self {
        self.allowed.write().push(addr);
        self
    }

    pub fn allow_any(self) -> Self {
        self.any.store(true, Ordering::Relaxed);
        self
    }

    pub fn permits(&self, peer: Option<IpAddr>) -> bool {
        if self.any.load(Ordering::Relaxed) {
            return true;
        }
        // Dual-stack listeners report IPv4 peers as ::ffff:a.b.c.d.
        match peer.map(|addr| addr.to_canonical()) {
            Some(addr) => self.allowed.read().iter().any(|a| a.to_canonical() == addr),
            None => false,
        }
    }

    fn parse_list(list: &str) -> ContainerResult<(Vec<IpAddr>, bool)> {
        let mut addrs = Vec::new();
        let mut any = false;
        for token in list.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
            match token {
                "*" => any = true,
                "localhost" => {
                    addrs.push(IpAddr::from([127, 0, 0, 1]));
                    addrs.push(IpAddr::from([0u16, 0, 0, 0, 0, 0, 0, 1]));
                }
                other => addrs.push(
                    other
                        .parse()
                        .map_err(|_| ContainerError::InvalidConfig(format!("OnlyFrom: '{}' is not an IP address", other)))?,
                ),
            }
        }
        Ok((addrs, any))
    }
}

impl ServerService for HostFilter {
    fn name(&self) -> &str {
        "host-filter"
    }

    fn init(&self, props: &ServiceProperties) -> ContainerResult<()> {
        if let Some(list) = props.get("OnlyFrom") {
            let (addrs, any) = Self::parse_list(list)?;
            self.allowed.write().extend(addrs);
            if any {
                self.any.store(true, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn service(&self, conn: &mut dyn Connection, next: Next<'_>) -> ContainerResult<()> {
        let peer = conn.peer_addr().map(|a| a.ip());
        if !self.permits(peer) {
            tracing::warn!(peer = ?peer, "connection refused by host filter");
            return Err(ContainerError::ServiceRejected {
                service: self.name().to_string(),
                reason: match peer {
                    Some(ip) => format!("host {} is not permitted", ip),
                    None => "peer address unknown".to_string(),
                },
            });
        }
        next.run(conn)
    }
}

/// Opens a tracing span per connection and logs its duration and result.
#[derive(Debug, Default)]
pub struct AccessLog {
    served: AtomicU64,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections that reached this link.
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }
}

impl ServerService for AccessLog {
    fn name(&self) -> &str {
        "access-log"
    }

    fn service(&self, conn: &mut dyn Connection, next: Next<'_>) -> ContainerResult<()> {
        let number = self.served.fetch_add(1, Ordering::Relaxed) + 1;
        let peer = conn.peer_addr();
        let span = tracing::info_span!("connection", number, peer = ?peer);
        let _entered = span.enter();

        let start = Instant::now();
        let result = next.run(conn);
        match &result {
            Ok(()) => tracing::info!(elapsed = ?start.elapsed(), "connection served"),
            Err(err) => tracing::warn!(elapsed = ?start.elapsed(), error = %err, "connection failed"),
        }
        result
    }
}
