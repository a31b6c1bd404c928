//! Core traits implemented by components.

mod dispose;

pub use dispose::Dispose;
