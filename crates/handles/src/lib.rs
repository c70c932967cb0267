//! Handle table for a plugin host.
//!
//! Every object that crosses a trust boundary between the core, loadable
//! extensions and untrusted plugins is named by an opaque [`HandleId`] rather
//! than a pointer. The [`HandleSystem`] issues, checks and releases those
//! handles:
//!
//! - handles carry a serial, so a stale handle never resolves to an object
//!   that later reused its slot
//! - every handle has a registered [`HandleType`], optionally a subtype of a
//!   base type, with its own access policy and destruction hook
//! - owners (core, extensions, plugins) are themselves identity handles;
//!   destroying an identity releases everything it owns
//! - clones share a master's object through a refcount
//! - when the table fills up, the plugin holding the most handles is reported
//!   and evicted through an [`OwnerDirectory`]
//!
//! # Example
//!
//! ```
//! use tether_handles::{DropDispatch, HandleLimits, HandleSecurity, HandleSystem, TypeDef};
//!
//! let mut handles = HandleSystem::new(HandleLimits::default()).unwrap();
//! let core = handles.core_identity();
//! let ty = handles
//! 	.create_type(TypeDef::new(DropDispatch).named("Counter").creator(core))
//! 	.unwrap();
//!
//! let counter = handles.create_handle(ty, 7u32, Some(core), Some(core)).unwrap();
//! let security = HandleSecurity::of(core);
//! assert_eq!(handles.read_as::<u32>(counter, ty, &security), Ok(&7));
//!
//! handles.free(counter, &security).unwrap();
//! assert!(handles.read(counter, Some(ty), &security).is_err());
//! ```

mod access;
mod config;
mod dispatch;
mod dump;
mod error;
mod id;
mod leak;
mod system;
mod table;
mod types;

pub use access::{ACCESS_VERSION, AccessRight, HandleAccess, HandleSecurity, Restrict, TypeAccess};
pub use config::HandleLimits;
pub use dispatch::{DropDispatch, HandleDispatch, HandleObject};
pub use error::{ConfigError, HandleError, Result};
pub use id::{
	HANDLE_BITS, HandleId, HandleType, IdentityToken, MAX_BASE_TYPES, MAX_HANDLE_INDEX, MAX_SERIALS,
	MAX_SUBTYPES, SERIAL_BITS, TYPE_STRIDE,
};
pub use leak::{LeakCandidate, LeakReport, OwnerDirectory};
pub use system::HandleSystem;
pub use types::{TypeDef, type_check};
