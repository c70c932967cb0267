//! Registry of loaded extensions and plugins.
//!
//! Every owner is bound to one identity in the handle table. The registry is
//! shared between the [`Host`](crate::Host) and the handle system, which
//! consults it for owner names and for leak recovery.

use std::cell::RefCell;
use std::rc::Rc;

use tether_handles::{HandleSystem, IdentityToken, LeakCandidate, OwnerDirectory};
use tracing::warn;

/// What kind of component an owner is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKind {
	Core,
	Extension,
	/// Untrusted; the only kind evicted on a leak.
	Plugin,
}

impl OwnerKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Core => "core",
			Self::Extension => "extension",
			Self::Plugin => "plugin",
		}
	}
}

/// A loaded owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerRecord {
	/// Console id, stable for the owner's lifetime and never reused.
	pub id: u32,
	pub kind: OwnerKind,
	pub filename: String,
	pub identity: IdentityToken,
}

/// Owners in load order.
#[derive(Debug, Default)]
pub struct Owners {
	records: Vec<OwnerRecord>,
	next_id: u32,
}

impl Owners {
	/// Registers an owner and returns its id.
	pub fn insert(&mut self, kind: OwnerKind, filename: &str, identity: IdentityToken) -> u32 {
		let id = self.next_id;
		self.next_id += 1;
		self.records.push(OwnerRecord {
			id,
			kind,
			filename: filename.to_string(),
			identity,
		});
		id
	}

	pub fn remove(&mut self, id: u32) -> Option<OwnerRecord> {
		let position = self.records.iter().position(|record| record.id == id)?;
		Some(self.records.remove(position))
	}

	/// Drops every record. Ids are still never reused.
	pub fn clear(&mut self) {
		self.records.clear();
	}

	pub fn get(&self, id: u32) -> Option<&OwnerRecord> {
		self.records.iter().find(|record| record.id == id)
	}

	pub fn by_identity(&self, identity: IdentityToken) -> Option<&OwnerRecord> {
		self.records.iter().find(|record| record.identity == identity)
	}

	pub fn by_filename(&self, filename: &str) -> Option<&OwnerRecord> {
		self.records.iter().find(|record| record.filename == filename)
	}

	pub fn iter(&self) -> impl Iterator<Item = &OwnerRecord> {
		self.records.iter()
	}

	pub fn of_kind(&self, kind: OwnerKind) -> impl Iterator<Item = &OwnerRecord> {
		self.records.iter().filter(move |record| record.kind == kind)
	}
}

/// Shared handle on [`Owners`], installed into the handle system as its
/// [`OwnerDirectory`].
#[derive(Debug, Clone, Default)]
pub struct OwnerRegistry(Rc<RefCell<Owners>>);

impl OwnerRegistry {
	pub fn with<R>(&self, f: impl FnOnce(&Owners) -> R) -> R {
		f(&self.0.borrow())
	}

	pub fn with_mut<R>(&self, f: impl FnOnce(&mut Owners) -> R) -> R {
		f(&mut self.0.borrow_mut())
	}
}

impl OwnerDirectory for OwnerRegistry {
	fn leak_candidates(&self) -> Vec<LeakCandidate> {
		self.with(|owners| {
			owners
				.of_kind(OwnerKind::Plugin)
				.map(|record| LeakCandidate {
					identity: record.identity,
					label: record.filename.clone(),
				})
				.collect()
		})
	}

	fn describe(&self, owner: IdentityToken) -> Option<String> {
		self.with(|owners| owners.by_identity(owner).map(|record| record.filename.clone()))
	}

	fn force_unload(&mut self, handles: &mut HandleSystem, owner: IdentityToken) -> bool {
		// Released before destroying: destruction hooks may look owners up.
		let record = self.with_mut(|owners| {
			let id = owners
				.by_identity(owner)
				.filter(|record| record.kind == OwnerKind::Plugin)?
				.id;
			owners.remove(id)
		});
		let Some(record) = record else {
			return false;
		};

		match handles.destroy_identity(record.identity) {
			Ok(()) => {
				warn!(id = record.id, file = %record.filename, "plugin force-unloaded");
				true
			}
			Err(error) => {
				warn!(id = record.id, file = %record.filename, %error, "force unload failed");
				false
			}
		}
	}
}
