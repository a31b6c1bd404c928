//! Pre/post invocation hooks.
//!
//! Hooks see every dispatched call. `before` runs in registration order and
//! may refuse the call; `after` runs in reverse order with the call's outcome
//! and the token its own `before` returned.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ContainerError, ContainerResult, FaultClass};
use crate::key::{ComponentId, MethodSignature};
use crate::lifetime::Lifetime;

/// What a hook knows about the call in flight.
#[derive(Debug, Clone)]
pub struct InvocationInfo<'a> {
    pub component: &'a ComponentId,
    pub method: &'a MethodSignature,
    pub lifetime: Lifetime,
    /// Caller identity, from the call context or the configured default
    pub principal: Option<&'a str>,
    /// Monotonic per-container call number
    pub call_id: u64,
}

/// State a hook carries from `before` to `after`.
#[derive(Default)]
pub struct HookToken(Option<Box<dyn Any + Send>>);

impl HookToken {
    /// A token carrying nothing.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new<T: Any + Send>(value: T) -> Self {
        Self(Some(Box::new(value)))
    }

    pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_ref().and_then(|v| v.downcast_ref())
    }

    pub fn into_inner<T: Any>(self) -> Option<T> {
        self.0.and_then(|v| v.downcast::<T>().ok()).map(|v| *v)
    }
}

impl fmt::Debug for HookToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HookToken").field(&self.0.is_some()).finish()
    }
}

/// How a call ended, as reported to `after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Target returned normally
    Success,
    /// Target raised a fault of the given class
    Fault(FaultClass),
    /// Call never reached the target: a later hook refused it or no instance was available
    Aborted,
}

/// Cross-cutting behaviour around every invocation.
///
/// # Examples
///
/// ```
/// use ferrous_container::{InvocationHook, InvocationInfo, HookToken, Outcome, ContainerResult, ContainerError};
///
/// struct RequireCaller;
///
/// impl InvocationHook for RequireCaller {
///     fn name(&self) -> &str {
///         "require-caller"
///     }
///
///     fn before(&self, info: &InvocationInfo) -> ContainerResult<HookToken> {
///         match info.principal {
///             Some(_) => Ok(HookToken::none()),
///             None => Err(ContainerError::HookRejected {
///                 hook: self.name().to_string(),
///                 reason: "anonymous call".into(),
///             }),
///         }
///     }
/// }
/// ```
pub trait InvocationHook: Send + Sync {
    /// Name used in errors and logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called before the target. An error aborts the call.
    fn before(&self, info: &InvocationInfo) -> ContainerResult<HookToken> {
        let _ = info;
        Ok(HookToken::none())
    }

    /// Called after the target, or after a later failure aborted the call.
    fn after(&self, info: &InvocationInfo, token: HookToken, outcome: &Outcome) -> ContainerResult<()> {
        let _ = (info, token, outcome);
        Ok(())
    }
}

/// Hooks started for one call, unwound in reverse.
pub(crate) struct Started {
    tokens: Vec<(usize, HookToken)>,
}

/// Ordered hook collection.
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    hooks: Vec<Arc<dyn InvocationHook>>,
}

impl Hooks {
    pub(crate) fn push(&mut self, hook: Arc<dyn InvocationHook>) {
        self.hooks.push(hook);
    }

    pub(crate) fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Runs `before` on every hook. On refusal, the hooks already started see
    /// `Outcome::Aborted` and the refusal is returned.
    pub(crate) fn before(&self, info: &InvocationInfo) -> ContainerResult<Started> {
        let mut started = Started { tokens: Vec::with_capacity(self.hooks.len()) };
        for (index, hook) in self.hooks.iter().enumerate() {
            match hook.before(info) {
                Ok(token) => started.tokens.push((index, token)),
                Err(err) => {
                    let err = match err {
                        rejected @ ContainerError::HookRejected { .. } => rejected,
                        other => ContainerError::HookRejected {
                            hook: hook.name().to_string(),
                            reason: other.to_string(),
                        },
                    };
                    // Abort notifications cannot override the refusal.
                    let _ = self.after(info, started, &Outcome::Aborted);
                    return Err(err);
                }
            }
        }
        Ok(started)
    }

    /// Runs `after` on started hooks in reverse; every hook runs, the first error is returned.
    pub(crate) fn after(&self, info: &InvocationInfo, started: Started, outcome: &Outcome) -> ContainerResult<()> {
        let mut first_err = None;
        for (index, token) in started.tokens.into_iter().rev() {
            let hook = &self.hooks[index];
            if let Err(err) = hook.after(info, token, outcome) {
                tracing::warn!(hook = hook.name(), component = %info.component, error = %err, "after-hook failed");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Tracing-based hook that logs every call and its duration.
///
/// # Examples
///
/// ```
/// use ferrous_container::{ComponentCollection, LoggingHook};
/// use std::sync::Arc;
///
/// let mut components = ComponentCollection::new();
/// components.add_hook(Arc::new(LoggingHook::new()));
/// ```
#[derive(Debug, Default)]
pub struct LoggingHook {
    _private: (),
}

impl LoggingHook {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InvocationHook for LoggingHook {
    fn name(&self) -> &str {
        "logging"
    }

    fn before(&self, info: &InvocationInfo) -> ContainerResult<HookToken> {
        tracing::debug!(
            call_id = info.call_id,
            component = %info.component,
            method = %info.method,
            lifetime = info.lifetime.label(),
            principal = info.principal.unwrap_or("-"),
            "invoking"
        );
        Ok(HookToken::new(Instant::now()))
    }

    fn after(&self, info: &InvocationInfo, token: HookToken, outcome: &Outcome) -> ContainerResult<()> {
        let elapsed = token.into_inner::<Instant>().map(|start| start.elapsed());
        match outcome {
            Outcome::Success => tracing::debug!(call_id = info.call_id, ?elapsed, "invocation completed"),
            Outcome::Fault(class) => {
                tracing::info!(call_id = info.call_id, ?class, ?elapsed, "invocation faulted")
            }
            Outcome::Aborted => tracing::info!(call_id = info.call_id, "invocation aborted"),
        }
        Ok(())
    }
}
