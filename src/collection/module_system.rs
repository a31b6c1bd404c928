//! Component modules for grouped registration.

use crate::collection::ComponentCollection;
use crate::error::ContainerResult;

/// A bundle of related registrations.
///
/// # Example
///
/// ```rust
/// use ferrous_container::{ComponentCollection, ComponentModule, ContainerResult, unpack};
///
/// struct Accounts { balance: i64 }
/// struct Audit;
///
/// struct BankingModule { opening_balance: i64 }
///
/// impl ComponentModule for BankingModule {
///     fn register_components(self, components: &mut ComponentCollection) -> ContainerResult<()> {
///         let opening = self.opening_balance;
///         components
///             .add_request_scoped("accounts", move || Ok(Accounts { balance: opening }))
///             .method("deposit", |a: &mut Accounts, args| {
///                 a.balance += unpack::<i64>(args)?;
///                 Ok(Box::new(a.balance))
///             });
///         components.add_singleton("audit", || Ok(Audit));
///         Ok(())
///     }
/// }
///
/// # fn main() -> ContainerResult<()> {
/// let mut components = ComponentCollection::new();
/// components.add_module(BankingModule { opening_balance: 100 })?;
/// assert_eq!(components.len(), 2);
/// # Ok(())
/// # }
/// ```
pub trait ComponentModule {
    /// Registers this module's components.
    fn register_components(self, components: &mut ComponentCollection) -> ContainerResult<()>;
}

impl ComponentCollection {
    /// Applies a module in place.
    pub fn add_module<M: ComponentModule>(&mut self, module: M) -> ContainerResult<&mut Self> {
        module.register_components(self)?;
        Ok(self)
    }
}
