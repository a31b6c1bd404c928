//! # ferrous-container
//!
//! A managed component container for Rust: pooled, request-scoped and
//! singleton component instances behind a single invocation dispatcher.
//!
//! ## Features
//!
//! - **Bounded instance pools**: strict or overdraft pooling, access timeouts,
//!   minimum floors, idle and age eviction, flush with replacement
//! - **Request caches**: one instance per request, disposed in reverse order
//!   when the request ends
//! - **Hook-aware dispatch**: `before` hooks in order, `after` hooks in
//!   reverse, fault classification into application and system faults
//! - **Service chains**: connection-level links with an ordered lifecycle
//! - **Configuration**: typed pool settings from code, string properties,
//!   environment variables or JSON
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_container::{CallContext, ComponentCollection, Fault, unpack};
//!
//! struct Account {
//!     balance: i64,
//! }
//!
//! let mut components = ComponentCollection::new();
//! components
//!     .add_pooled("account", || Ok(Account { balance: 100 }))
//!     .method("withdraw", |account: &mut Account, args| {
//!         let amount: i64 = unpack(args)?;
//!         if amount > account.balance {
//!             return Err(Fault::application("InsufficientFunds", "balance too low"));
//!         }
//!         account.balance -= amount;
//!         Ok(Box::new(account.balance))
//!     })
//!     .application_fault("InsufficientFunds");
//!
//! let container = components.build().unwrap();
//! let left: i64 = container.call("account", "withdraw", 40i64, &CallContext::new()).unwrap();
//! assert_eq!(left, 60);
//!
//! let err = container.call::<_, i64>("account", "withdraw", 500i64, &CallContext::new()).unwrap_err();
//! assert_eq!(err.fault_class(), Some(ferrous_container::FaultClass::Application));
//! ```
//!
//! ## Component Lifetimes
//!
//! - **Pooled**: interchangeable instances, each serving one call at a time
//! - **Request**: one instance per [`ThreadCorrelatedCache`]
//! - **Singleton**: one instance per container, calls serialized
//!
//! ## Standalone Pools
//!
//! ```rust
//! use ferrous_container::{InstancePool, PoolConfig};
//! use std::time::Duration;
//!
//! let config = PoolConfig {
//!     max_size: 2,
//!     access_timeout: Duration::from_millis(50),
//!     ..PoolConfig::default()
//! };
//! let pool = InstancePool::from_fn(config, || Ok(Vec::<u8>::with_capacity(1024))).unwrap();
//!
//! let a = pool.checkout().unwrap();
//! let b = pool.checkout().unwrap();
//! assert!(pool.checkout().unwrap_err().is_retryable());
//!
//! drop(a);
//! let c = pool.checkout().unwrap();
//! assert_eq!(pool.stats().instances_active, 2);
//! # drop((b, c));
//! ```

// Module declarations
pub mod chain;
pub mod collection;
pub mod config;
pub mod descriptors;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod key;
pub mod lifetime;
pub mod metrics;
pub mod pool;
pub mod request;
pub mod traits;

// Internal modules
mod internal;
mod registration;

// Re-exports
pub use collection::{ComponentCollection, ComponentModule, RegistrationBuilder};
pub use config::{ConfigSource, ConfigValue, ContainerConfig, EnvironmentConfigSource, PoolConfig, ServiceProperties};
pub use descriptors::{ComponentDescriptor, ManagedInstance};
pub use dispatch::{CallContext, Container, FaultClassifier};
pub use error::{ContainerError, ContainerResult, Fault, FaultClass};
pub use hooks::{HookToken, InvocationHook, InvocationInfo, LoggingHook, Outcome};
pub use key::{ComponentId, MethodSignature};
pub use lifetime::Lifetime;
pub use metrics::InvocationStats;
pub use pool::{DiscardReason, InstancePool, InstanceSupplier, Lease, PoolStats, SweepReport};
pub use registration::{unpack, Payload};
pub use request::{DisposalHandle, ScopedCacheEntry, ThreadCorrelatedCache};
pub use traits::Dispose;
