//! Error types for the component container.

use std::fmt;
use std::time::Duration;

use crate::key::{ComponentId, MethodSignature};

/// Classification of a fault raised by a component method.
///
/// Application faults are part of a component's business contract and leave
/// the instance usable. System faults indicate the instance may hold corrupted
/// state; pooled instances that raise them are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum FaultClass {
    /// Business-level failure; the instance is returned healthy.
    Application,
    /// Container-level failure; the instance is discarded.
    System,
}

/// A failure raised by a component method.
///
/// # Examples
///
/// ```rust
/// use ferrous_container::Fault;
///
/// let fault = Fault::application("InsufficientFunds", "balance is 12, requested 40");
/// assert!(!fault.is_system());
/// assert_eq!(fault.name(), "InsufficientFunds");
///
/// let crash = Fault::system("ConnectionLost", "socket closed mid-transaction");
/// assert!(crash.is_system());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    name: String,
    message: String,
    system: bool,
}

impl Fault {
    /// Creates an application-level fault.
    pub fn application(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into(), system: false }
    }

    /// Creates a system-level fault.
    pub fn system(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { name: name.into(), message: message.into(), system: true }
    }

    /// The fault's name, used for application-fault declarations.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable detail.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the raiser flagged this fault as system-level.
    pub fn is_system(&self) -> bool {
        self.system
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Container errors
///
/// Represents every failure a caller of the container can observe. Nothing is
/// swallowed internally; each variant reaches the invoking caller.
///
/// # Examples
///
/// ```rust
/// use ferrous_container::{ContainerError, ComponentId};
/// use std::time::Duration;
///
/// let exhausted = ContainerError::PoolExhausted {
///     component: Some(ComponentId::from("calculator")),
///     waited: Duration::from_millis(250),
/// };
/// assert!(exhausted.is_retryable());
/// println!("Error: {}", exhausted);
///
/// let missing = ContainerError::NoSuchComponent(ComponentId::from("ghost"));
/// assert!(!missing.is_retryable());
/// ```
#[derive(Debug, Clone)]
pub enum ContainerError {
    /// Checkout timed out with no instance available
    PoolExhausted {
        component: Option<ComponentId>,
        waited: Duration,
    },
    /// Construction callback failed
    Instantiation {
        component: Option<ComponentId>,
        reason: String,
    },
    /// Invocation target is not registered
    NoSuchComponent(ComponentId),
    /// Component has no method with the requested signature
    NoSuchMethod {
        component: ComponentId,
        method: MethodSignature,
    },
    /// Target method raised a fault
    InvocationFault {
        component: ComponentId,
        method: MethodSignature,
        fault: Fault,
        class: FaultClass,
    },
    /// Request-scoped component invoked without a request cache
    NoRequestScope(ComponentId),
    /// A pre/post invocation hook refused the call
    HookRejected {
        hook: String,
        reason: String,
    },
    /// The pool or container is closing
    ShuttingDown,
    /// Configuration values are inconsistent
    InvalidConfig(String),
    /// Operation is not permitted in the current lifecycle state
    IllegalState(String),
    /// A service chain link refused the connection
    ServiceRejected {
        service: String,
        reason: String,
    },
    /// I/O failure while servicing a connection
    Io(String),
}

impl ContainerError {
    /// Returns true for capacity failures a caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ContainerError::PoolExhausted { .. } | ContainerError::ServiceRejected { .. })
    }

    /// Returns the fault class for invocation faults.
    pub fn fault_class(&self) -> Option<FaultClass> {
        match self {
            ContainerError::InvocationFault { class, .. } => Some(*class),
            _ => None,
        }
    }

    pub(crate) fn with_component(self, id: &ComponentId) -> Self {
        match self {
            ContainerError::PoolExhausted { component: None, waited } => {
                ContainerError::PoolExhausted { component: Some(id.clone()), waited }
            }
            ContainerError::Instantiation { component: None, reason } => {
                ContainerError::Instantiation { component: Some(id.clone()), reason }
            }
            other => other,
        }
    }
}

fn component_label(component: &Option<ComponentId>) -> &str {
    component.as_ref().map(|c| c.as_str()).unwrap_or("<pool>")
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerError::PoolExhausted { component, waited } => write!(
                f,
                "Pool exhausted for {}: no instance available after {:?}",
                component_label(component),
                waited
            ),
            ContainerError::Instantiation { component, reason } => {
                write!(f, "Failed to instantiate {}: {}", component_label(component), reason)
            }
            ContainerError::NoSuchComponent(id) => write!(f, "Component not found: {}", id),
            ContainerError::NoSuchMethod { component, method } => {
                write!(f, "Method not found: {}.{}", component, method)
            }
            ContainerError::InvocationFault { component, method, fault, class } => {
                let kind = match class {
                    FaultClass::Application => "application",
                    FaultClass::System => "system",
                };
                write!(f, "{} fault in {}.{}: {}", kind, component, method, fault)
            }
            ContainerError::NoRequestScope(id) => {
                write!(f, "Request-scoped component {} invoked outside a request", id)
            }
            ContainerError::HookRejected { hook, reason } => {
                write!(f, "Invocation rejected by hook {}: {}", hook, reason)
            }
            ContainerError::ShuttingDown => write!(f, "Container is shutting down"),
            ContainerError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            ContainerError::IllegalState(msg) => write!(f, "Illegal state: {}", msg),
            ContainerError::ServiceRejected { service, reason } => {
                write!(f, "Connection rejected by {}: {}", service, reason)
            }
            ContainerError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ContainerError {}

impl From<std::io::Error> for ContainerError {
    fn from(err: std::io::Error) -> Self {
        ContainerError::Io(err.to_string())
    }
}

/// Result type for container operations
///
/// A convenience alias for `Result<T, ContainerError>` used throughout the crate.
pub type ContainerResult<T> = Result<T, ContainerError>;
