//! Client-side core of a memory journal.
//!
//! Three pieces: the calendar heatmap layout engine ([`grid`]), the
//! synchronized memory store ([`store`]) that reconciles local mutations
//! with a remote backend and its change feed, and the photo normalization
//! pipeline ([`photo`]). Hosts embed a [`SyncStore`], render it through
//! [`projector::project`], and stay passive otherwise.

pub mod config;
pub mod error;
pub mod grid;
pub mod models;
pub mod photo;
pub mod projector;
pub mod remote;
pub mod store;

pub use config::Config;
pub use error::{KeepsakeError, Result};
pub use grid::{compute_grid, window_grid, CalendarGrid, GridCache};
pub use models::{
    ChangeEvent, FeedMessage, FrameStyle, Memory, MemoryDraft, MemoryPatch, PhotoEffect,
    PhotoInput,
};
pub use photo::{NormalizedPhoto, PhotoPipeline};
pub use projector::{project, GridProjection, ProjectedCell};
pub use remote::{
    ChangeFeed, FeedSubscription, HttpChangeFeed, HttpRemoteStore, LocalBackend, RemoteStore,
};
pub use store::{MemoryCollection, SyncStore};
