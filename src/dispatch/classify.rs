//! Fault classification.

use std::collections::HashSet;

use crate::error::{Fault, FaultClass};

/// Decides whether a fault is an application or a system fault.
///
/// Returning `None` defers to the component's declared application faults and
/// then to the container default.
///
/// Closures work as classifiers:
///
/// ```
/// use ferrous_container::{ComponentCollection, Fault, FaultClass};
///
/// struct Gateway;
///
/// let mut components = ComponentCollection::new();
/// components
///     .add_pooled("gateway", || Ok(Gateway))
///     .fault_classifier(|fault: &Fault| {
///         fault.name().starts_with("Timeout").then_some(FaultClass::System)
///     });
/// ```
pub trait FaultClassifier: Send + Sync {
    fn classify(&self, fault: &Fault) -> Option<FaultClass>;
}

impl<F> FaultClassifier for F
where
    F: Fn(&Fault) -> Option<FaultClass> + Send + Sync,
{
    fn classify(&self, fault: &Fault) -> Option<FaultClass> {
        self(fault)
    }
}

/// Classification rules for one component.
///
/// Order: custom classifier, then declared application fault names, then the
/// fault's own system flag, then `default`.
pub(crate) struct Classification<'a> {
    pub(crate) custom: Option<&'a dyn FaultClassifier>,
    pub(crate) declared: &'a HashSet<String>,
    pub(crate) default: FaultClass,
}

impl Classification<'_> {
    pub(crate) fn classify(&self, fault: &Fault) -> FaultClass {
        if let Some(class) = self.custom.and_then(|c| c.classify(fault)) {
            return class;
        }
        if self.declared.contains(fault.name()) {
            return FaultClass::Application;
        }
        if fault.is_system() {
            return FaultClass::System;
        }
        self.default
    }
}
