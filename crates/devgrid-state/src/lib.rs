//! devgrid-state — embedded state store for devgrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for workspaces, workspace builds, templates, template versions,
//! users and lifecycle claims.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Builds use the composite key `{workspace_id}:{build_number:010}` so the
//! latest build is the last entry of a prefix range.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks and across scheduler instances.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
