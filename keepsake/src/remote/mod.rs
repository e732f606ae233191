//! Backend access: the store/feed traits, the HTTP client and the
//! in-process backend.

mod http;
mod local;
pub mod traits;

pub use http::*;
pub use local::*;
pub use traits::*;
