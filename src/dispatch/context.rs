//! Per-call context.

use crate::request::ThreadCorrelatedCache;

/// Caller-supplied context for one invocation.
///
/// Carries the caller's principal and, for request-scoped components, the
/// request cache of the current unit of work. Both are optional: a missing
/// principal falls back to the container's configured default.
///
/// # Examples
///
/// ```
/// use ferrous_container::{CallContext, ThreadCorrelatedCache};
///
/// let request = ThreadCorrelatedCache::new();
/// let ctx = CallContext::new()
///     .with_principal("alice")
///     .with_request(&request);
///
/// assert_eq!(ctx.principal(), Some("alice"));
/// assert!(ctx.request().is_some());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext<'a> {
    principal: Option<&'a str>,
    request: Option<&'a ThreadCorrelatedCache>,
}

impl<'a> CallContext<'a> {
    /// Context with no principal and no request.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_principal(mut self, principal: &'a str) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_request(mut self, request: &'a ThreadCorrelatedCache) -> Self {
        self.request = Some(request);
        self
    }

    pub fn principal(&self) -> Option<&'a str> {
        self.principal
    }

    pub fn request(&self) -> Option<&'a ThreadCorrelatedCache> {
        self.request
    }
}
