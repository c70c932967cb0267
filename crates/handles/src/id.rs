//! Public identifiers: handles, type ids and identity tokens.

use std::fmt;

/// Number of low bits of a [`HandleId`] that carry the slot index.
pub const HANDLE_BITS: u32 = 20;
/// Number of high bits of a [`HandleId`] that carry the serial.
pub const SERIAL_BITS: u32 = 32 - HANDLE_BITS;
/// Largest index a [`HandleId`] can address.
pub const MAX_HANDLE_INDEX: u32 = (1 << HANDLE_BITS) - 1;
/// Serials wrap back to 1 when they reach this value.
pub const MAX_SERIALS: u32 = 1 << SERIAL_BITS;

const INDEX_MASK: u32 = MAX_HANDLE_INDEX;

/// Mask selecting the subtype slot inside a base type's block.
pub const SUBTYPE_MASK: u32 = 0xF;
/// Most subtypes a single base type can have.
pub const MAX_SUBTYPES: u32 = SUBTYPE_MASK;
/// Distance between two consecutive base type ids.
pub const TYPE_STRIDE: u32 = MAX_SUBTYPES + 1;
/// Most base type blocks a type table may be configured with.
pub const MAX_BASE_TYPES: u32 = 1 << 12;

/// Opaque `(serial, index)` pair naming a live object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u32);

impl HandleId {
	pub(crate) const fn new(serial: u32, index: u32) -> Self {
		Self((serial << HANDLE_BITS) | (index & INDEX_MASK))
	}

	/// Reconstructs a handle from its wire representation.
	pub const fn from_raw(raw: u32) -> Self {
		Self(raw)
	}

	/// Returns the wire representation.
	pub const fn raw(self) -> u32 {
		self.0
	}

	/// Slot index encoded in the handle.
	pub const fn index(self) -> u32 {
		self.0 & INDEX_MASK
	}

	/// Serial encoded in the handle.
	pub const fn serial(self) -> u32 {
		self.0 >> HANDLE_BITS
	}
}

impl fmt::Debug for HandleId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "HandleId({}#{})", self.index(), self.serial())
	}
}

impl fmt::Display for HandleId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "0x{:08x}", self.0)
	}
}

/// Registered kind of object a handle may point to.
///
/// Base types are multiples of [`TYPE_STRIDE`]; the ids directly after a base
/// type are reserved for its subtypes. Id 0 is never valid.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleType(u32);

impl HandleType {
	/// Reconstructs a type id from its raw value.
	pub const fn from_raw(raw: u32) -> Self {
		Self(raw)
	}

	/// Returns the raw value.
	pub const fn raw(self) -> u32 {
		self.0
	}

	/// Returns true if this id lives inside a base type's subtype block.
	pub const fn is_subtype(self) -> bool {
		self.0 & SUBTYPE_MASK != 0
	}

	/// The base type this id belongs to (itself for base types).
	pub const fn base(self) -> Self {
		Self(self.0 & !SUBTYPE_MASK)
	}

	pub(crate) const fn slot(self) -> usize {
		self.0 as usize
	}
}

impl fmt::Debug for HandleType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_subtype() {
			write!(f, "HandleType({}+{})", self.base().0, self.0 & SUBTYPE_MASK)
		} else {
			write!(f, "HandleType({})", self.0)
		}
	}
}

/// Logical owner of handles (core, an extension, a plugin).
///
/// Backed by an identity-kind slot in the handle table, so a token goes stale
/// the same way an ordinary handle does once its owner is destroyed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct IdentityToken(HandleId);

impl IdentityToken {
	pub(crate) const fn new(handle: HandleId) -> Self {
		Self(handle)
	}

	/// The identity's own handle.
	pub const fn handle(self) -> HandleId {
		self.0
	}
}

impl fmt::Display for IdentityToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ident:{}", self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn handle_id_packs_serial_above_index() {
		let id = HandleId::new(3, 42);
		assert_eq!(id.index(), 42);
		assert_eq!(id.serial(), 3);
		assert_eq!(id.raw(), (3 << HANDLE_BITS) | 42);
		assert_eq!(id.to_string(), "0x0030002a");
	}

	#[test]
	fn subtype_ids_share_their_base() {
		let base = HandleType::from_raw(32);
		let child = HandleType::from_raw(35);
		assert!(!base.is_subtype());
		assert!(child.is_subtype());
		assert_eq!(child.base(), base);
		assert_eq!(base.base(), base);
	}
}
