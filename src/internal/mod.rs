//! Internal implementation details.

pub(crate) mod dispose_bag;
pub(crate) mod panic;

pub(crate) use dispose_bag::DisposeBag;
pub(crate) use panic::catch_panic;
