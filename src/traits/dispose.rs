//! Disposal traits for resource cleanup.

/// Structured teardown for component instances.
///
/// Register it with `RegistrationBuilder::disposable` and the container calls
/// `dispose` exactly once when the instance is destroyed: on eviction from a
/// pool, unhealthy checkin, request end, or container shutdown.
///
/// # Examples
///
/// ```
/// use ferrous_container::{ComponentCollection, Dispose};
///
/// struct Ledger {
///     pending: Vec<u64>,
/// }
///
/// impl Dispose for Ledger {
///     fn dispose(&mut self) {
///         println!("dropping {} pending entries", self.pending.len());
///         self.pending.clear();
///     }
/// }
///
/// let mut components = ComponentCollection::new();
/// components
///     .add_request_scoped("ledger", || Ok(Ledger { pending: Vec::new() }))
///     .disposable();
/// ```
pub trait Dispose: 'static {
    /// Release resources held by the instance.
    fn dispose(&mut self);
}
