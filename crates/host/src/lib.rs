//! Plugin host for the tether handle table.
//!
//! Binds loadable extensions and plugins to identities in a
//! [`HandleSystem`](tether_handles::HandleSystem), names them in diagnostics,
//! offers plugins for eviction when the table is exhausted, and exposes an
//! operator console.

mod config;
mod console;
mod error;
mod host;
mod owners;

pub use config::HostConfig;
pub use error::{HostError, Result};
pub use host::Host;
pub use owners::{OwnerKind, OwnerRecord, OwnerRegistry, Owners};
