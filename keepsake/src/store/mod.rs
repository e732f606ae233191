//! Synchronized client-side state.

mod collection;
mod sync;

pub use collection::*;
pub use sync::*;
