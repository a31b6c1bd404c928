//! Connection-level service chain.
//!
//! A [`ServiceChain`] is an ordered list of [`ServerService`] links in front of
//! a terminal [`ConnectionHandler`]. Each link may inspect the connection,
//! refuse it, or pass it on with [`Next::run`]. The chain owns the lifecycle of
//! its links: `init` once, then any number of `start`/`stop` rounds.

use std::fmt;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};

use parking_lot::Mutex;

mod links;

pub use links::{AccessLog, ConcurrencyLimit, HostFilter};

use crate::config::ServiceProperties;
use crate::error::{ContainerError, ContainerResult};

/// A bidirectional byte stream delivered by a listener.
pub trait Connection: Read + Write + Send {
    /// Remote address, when the transport has one.
    fn peer_addr(&self) -> Option<SocketAddr>;
}

impl Connection for TcpStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        TcpStream::peer_addr(self).ok()
    }
}

/// Final consumer of a connection that passed every link.
pub trait ConnectionHandler: Send + Sync {
    fn handle(&self, conn: &mut dyn Connection) -> ContainerResult<()>;
}

impl<F> ConnectionHandler for F
where
    F: Fn(&mut dyn Connection) -> ContainerResult<()> + Send + Sync,
{
    fn handle(&self, conn: &mut dyn Connection) -> ContainerResult<()> {
        self(conn)
    }
}

/// One link of a service chain.
///
/// Lifecycle methods default to no-ops and `service` defaults to passing the
/// connection straight on.
///
/// # Examples
///
/// ```
/// use ferrous_container::chain::{Connection, Next, ServerService};
/// use ferrous_container::ContainerResult;
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// #[derive(Default)]
/// struct CountConnections {
///     seen: AtomicU64,
/// }
///
/// impl ServerService for CountConnections {
///     fn name(&self) -> &str {
///         "count"
///     }
///
///     fn service(&self, conn: &mut dyn Connection, next: Next<'_>) -> ContainerResult<()> {
///         self.seen.fetch_add(1, Ordering::Relaxed);
///         next.run(conn)
///     }
/// }
/// ```
pub trait ServerService: Send + Sync {
    fn name(&self) -> &str;

    /// Reads settings. Called once, before the first `start`.
    fn init(&self, props: &ServiceProperties) -> ContainerResult<()> {
        let _ = props;
        Ok(())
    }

    fn start(&self) -> ContainerResult<()> {
        Ok(())
    }

    fn stop(&self) -> ContainerResult<()> {
        Ok(())
    }

    fn service(&self, conn: &mut dyn Connection, next: Next<'_>) -> ContainerResult<()> {
        next.run(conn)
    }
}

/// The remainder of the chain after the current link.
pub struct Next<'a> {
    links: &'a [Box<dyn ServerService>],
    terminal: &'a dyn ConnectionHandler,
}

impl<'a> Next<'a> {
    /// Hands the connection to the next link, or to the terminal handler.
    pub fn run(self, conn: &mut dyn Connection) -> ContainerResult<()> {
        match self.links.split_first() {
            Some((link, rest)) => link.service(conn, Next { links: rest, terminal: self.terminal }),
            None => self.terminal.handle(conn),
        }
    }

    /// Links still ahead, the terminal excluded.
    pub fn remaining(&self) -> usize {
        self.links.len()
    }
}

/// Lifecycle state of a [`ServiceChain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Created,
    Initialized,
    Started,
    Stopped,
}

/// Ordered links in front of a terminal handler.
///
/// `start` runs links outermost first; `stop` runs them innermost first.
///
/// # Examples
///
/// ```
/// use ferrous_container::chain::{AccessLog, ChainState, ConcurrencyLimit, Connection, ServiceChain};
/// use ferrous_container::{ContainerResult, ServiceProperties};
/// use std::io::{Read, Write};
///
/// let chain = ServiceChain::new("echo", |conn: &mut dyn Connection| -> ContainerResult<()> {
///     let mut buf = [0u8; 64];
///     let n = conn.read(&mut buf)?;
///     conn.write_all(&buf[..n])?;
///     Ok(())
/// })
/// .link(AccessLog::new())
/// .link(ConcurrencyLimit::new(8));
///
/// chain.init(&ServiceProperties::new()).unwrap();
/// chain.start().unwrap();
/// assert_eq!(chain.state(), ChainState::Started);
/// chain.stop().unwrap();
/// ```
pub struct ServiceChain {
    name: String,
    links: Vec<Box<dyn ServerService>>,
    terminal: Box<dyn ConnectionHandler>,
    state: Mutex<ChainState>,
}

impl ServiceChain {
    pub fn new<H: ConnectionHandler + 'static>(name: impl Into<String>, terminal: H) -> Self {
        Self {
            name: name.into(),
            links: Vec::new(),
            terminal: Box::new(terminal),
            state: Mutex::new(ChainState::Created),
        }
    }

    /// Appends a link; links added later sit closer to the terminal.
    pub fn link<S: ServerService + 'static>(mut self, service: S) -> Self {
        self.links.push(Box::new(service));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChainState {
        *self.state.lock()
    }

    /// Link names, outermost first.
    pub fn link_names(&self) -> Vec<&str> {
        self.links.iter().map(|l| l.name()).collect()
    }

    /// Initializes every link in order. Only valid once, from `Created`.
    ///
    /// If a link fails the chain stays `Created` and the error is returned.
    pub fn init(&self, props: &ServiceProperties) -> ContainerResult<()> {
        let mut state = self.state.lock();
        if *state != ChainState::Created {
            return Err(ContainerError::IllegalState(format!(
                "service chain {} already initialized ({:?})",
                self.name, *state
            )));
        }
        for link in &self.links {
            link.init(props)?;
        }
        *state = ChainState::Initialized;
        tracing::info!(chain = %self.name, links = self.links.len(), "service chain initialized");
        Ok(())
    }

    /// Starts links outermost first. From `Initialized` or `Stopped`.
    ///
    /// On failure the links already started are stopped in reverse order and
    /// the chain keeps its previous state.
    pub fn start(&self) -> ContainerResult<()> {
        let mut state = self.state.lock();
        match *state {
            ChainState::Initialized | ChainState::Stopped => {}
            other => {
                return Err(ContainerError::IllegalState(format!(
                    "cannot start service chain {} from {:?}",
                    self.name, other
                )))
            }
        }
        for (index, link) in self.links.iter().enumerate() {
            if let Err(err) = link.start() {
                tracing::warn!(chain = %self.name, link = link.name(), error = %err, "link failed to start");
                for started in self.links[..index].iter().rev() {
                    if let Err(stop_err) = started.stop() {
                        tracing::warn!(chain = %self.name, link = started.name(), error = %stop_err, "link failed to stop");
                    }
                }
                return Err(err);
            }
        }
        *state = ChainState::Started;
        tracing::info!(chain = %self.name, "service chain started");
        Ok(())
    }

    /// Stops links innermost first. Every link is attempted; the first error is returned.
    ///
    /// Stopping a stopped chain does nothing.
    pub fn stop(&self) -> ContainerResult<()> {
        let mut state = self.state.lock();
        match *state {
            ChainState::Started => {}
            ChainState::Stopped => return Ok(()),
            other => {
                return Err(ContainerError::IllegalState(format!(
                    "cannot stop service chain {} from {:?}",
                    self.name, other
                )))
            }
        }
        let mut first_err = None;
        for link in self.links.iter().rev() {
            if let Err(err) = link.stop() {
                tracing::warn!(chain = %self.name, link = link.name(), error = %err, "link failed to stop");
                first_err.get_or_insert(err);
            }
        }
        *state = ChainState::Stopped;
        tracing::info!(chain = %self.name, "service chain stopped");
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Passes a connection through the chain. Only valid while `Started`.
    pub fn service(&self, conn: &mut dyn Connection) -> ContainerResult<()> {
        let state = self.state();
        if state != ChainState::Started {
            return Err(ContainerError::IllegalState(format!(
                "service chain {} is not started ({:?})",
                self.name, state
            )));
        }
        Next { links: &self.links, terminal: self.terminal.as_ref() }.run(conn)
    }
}

impl fmt::Debug for ServiceChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceChain")
            .field("name", &self.name)
            .field("links", &self.link_names())
            .field("state", &self.state())
            .finish()
    }
}
