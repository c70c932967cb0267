//! Type registry: descriptors, subtype blocks and the name index.
//!
//! # Id layout
//!
//! The table is split into blocks of [`TYPE_STRIDE`] descriptors. Block 0 is
//! reserved so that id 0 stays invalid; every other block belongs to one base
//! type (the first descriptor) and its subtypes (the rest). Base ids are
//! recycled through a free stack; subtype ids go back to their parent's block.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::access::{ACCESS_VERSION, HandleAccess, TypeAccess};
use crate::dispatch::HandleDispatch;
use crate::error::{HandleError, Result};
use crate::id::{HandleType, IdentityToken, TYPE_STRIDE};

/// Registration request for [`HandleSystem::create_type`](crate::HandleSystem::create_type).
#[derive(Clone)]
pub struct TypeDef {
	pub name: Option<String>,
	pub dispatch: Rc<dyn HandleDispatch>,
	pub parent: Option<HandleType>,
	/// Explicit type policy. Defaults to [`TypeAccess::owned_by`] the creator.
	pub type_access: Option<TypeAccess>,
	/// Explicit handle policy. Defaults to [`HandleAccess::default`].
	pub handle_access: Option<HandleAccess>,
	pub creator: Option<IdentityToken>,
}

impl TypeDef {
	/// Anonymous base type using `dispatch`.
	pub fn new(dispatch: impl HandleDispatch + 'static) -> Self {
		Self::shared(Rc::new(dispatch))
	}

	/// Like [`TypeDef::new`] for a dispatch shared between several types.
	pub fn shared(dispatch: Rc<dyn HandleDispatch>) -> Self {
		Self {
			name: None,
			dispatch,
			parent: None,
			type_access: None,
			handle_access: None,
			creator: None,
		}
	}

	pub fn named(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn parent(mut self, parent: HandleType) -> Self {
		self.parent = Some(parent);
		self
	}

	pub fn type_access(mut self, access: TypeAccess) -> Self {
		self.type_access = Some(access);
		self
	}

	pub fn handle_access(mut self, access: HandleAccess) -> Self {
		self.handle_access = Some(access);
		self
	}

	pub fn creator(mut self, creator: IdentityToken) -> Self {
		self.creator = Some(creator);
		self
	}
}

impl std::fmt::Debug for TypeDef {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TypeDef")
			.field("name", &self.name)
			.field("parent", &self.parent)
			.field("type_access", &self.type_access)
			.field("handle_access", &self.handle_access)
			.field("creator", &self.creator)
			.finish_non_exhaustive()
	}
}

/// Returns true if a handle of type `actual` may be read as `expected`.
///
/// A handle is compatible with its own type, and a subtype handle is also
/// compatible with its base. Sibling subtypes never match, and a base handle
/// is never readable as one of its subtypes.
pub fn type_check(actual: HandleType, expected: HandleType) -> bool {
	actual == expected || (actual.is_subtype() && actual.base() == expected)
}

#[derive(Default)]
pub(crate) struct TypeSlot {
	pub dispatch: Option<Rc<dyn HandleDispatch>>,
	pub name: Option<String>,
	pub children: u32,
	pub type_access: TypeAccess,
	pub handle_access: HandleAccess,
	/// Live handles of this type, clones and identities included.
	pub opened: usize,
	/// Set while the type is being removed; no new handles may be created.
	pub removing: bool,
}

impl TypeSlot {
	pub fn is_live(&self) -> bool {
		self.dispatch.is_some()
	}

	pub fn display_name(&self) -> &str {
		self.name.as_deref().unwrap_or("ANON")
	}
}

pub(crate) struct TypeTable {
	slots: Vec<TypeSlot>,
	by_name: FxHashMap<String, HandleType>,
	free: Vec<HandleType>,
	tail: u32,
	max_subtypes: u32,
}

impl TypeTable {
	pub fn new(max_types: u32, max_subtypes: u32) -> Self {
		let len = ((max_types + 1) * TYPE_STRIDE) as usize;
		let mut slots = Vec::with_capacity(len);
		slots.resize_with(len, TypeSlot::default);
		Self {
			slots,
			by_name: FxHashMap::default(),
			free: Vec::new(),
			tail: 0,
			max_subtypes,
		}
	}

	/// Descriptor for `ty` if the id is in range, live or not.
	pub fn slot(&self, ty: HandleType) -> Option<&TypeSlot> {
		if ty.raw() == 0 {
			return None;
		}
		self.slots.get(ty.slot())
	}

	/// Descriptor for `ty` if it is registered.
	pub fn live(&self, ty: HandleType) -> Option<&TypeSlot> {
		self.slot(ty).filter(|slot| slot.is_live())
	}

	/// Like [`live`](Self::live), but refuses types being removed.
	pub fn open_for_create(&self, ty: HandleType) -> Option<&TypeSlot> {
		self.live(ty).filter(|slot| !slot.removing)
	}

	pub fn begin_removal(&mut self, ty: HandleType) {
		if let Some(slot) = self.slots.get_mut(ty.slot()) {
			slot.removing = true;
		}
	}

	pub fn find(&self, name: &str) -> Option<HandleType> {
		self.by_name.get(name).copied()
	}

	pub fn dispatch(&self, ty: HandleType) -> Option<Rc<dyn HandleDispatch>> {
		self.slot(ty).and_then(|slot| slot.dispatch.clone())
	}

	pub fn set_owner(&mut self, ty: HandleType, owner: Option<IdentityToken>) -> bool {
		match self.slots.get_mut(ty.slot()) {
			Some(slot) if ty.raw() != 0 && slot.is_live() => {
				slot.type_access.owner = owner;
				true
			}
			_ => false,
		}
	}

	pub fn open(&mut self, ty: HandleType) {
		self.slots[ty.slot()].opened += 1;
	}

	pub fn close(&mut self, ty: HandleType) {
		let slot = &mut self.slots[ty.slot()];
		slot.opened = slot.opened.saturating_sub(1);
	}

	/// Registered subtypes of the base type `ty`.
	pub fn children(&self, ty: HandleType) -> Vec<HandleType> {
		(1..=self.max_subtypes)
			.map(|i| HandleType::from_raw(ty.raw() + i))
			.filter(|child| self.live(*child).is_some())
			.collect()
	}

	/// Registered base types in id order.
	pub fn bases(&self) -> Vec<HandleType> {
		(1..=self.tail / TYPE_STRIDE)
			.map(|block| HandleType::from_raw(block * TYPE_STRIDE))
			.filter(|ty| self.live(*ty).is_some())
			.collect()
	}

	/// Validates `def` and claims a descriptor for it.
	pub fn create(&mut self, def: TypeDef) -> Result<HandleType> {
		if def.type_access.is_some_and(|a| a.version > ACCESS_VERSION)
			|| def.handle_access.is_some_and(|a| a.version > ACCESS_VERSION)
		{
			return Err(HandleError::Version);
		}

		if let Some(parent) = def.parent {
			if parent.is_subtype() {
				return Err(HandleError::NoInherit);
			}
			let slot = self.open_for_create(parent).ok_or(HandleError::Parameter)?;
			if !slot.type_access.inherit && slot.type_access.owner != def.creator {
				return Err(HandleError::Access);
			}
		}

		let name = def.name.filter(|name| !name.is_empty());
		if let Some(name) = &name
			&& self.by_name.contains_key(name)
		{
			return Err(HandleError::Parameter);
		}

		let ty = match def.parent {
			Some(parent) => self.claim_subtype(parent)?,
			None => self.claim_base()?,
		};

		let slot = &mut self.slots[ty.slot()];
		slot.dispatch = Some(def.dispatch);
		slot.opened = 0;
		slot.children = 0;
		slot.removing = false;
		slot.type_access = def
			.type_access
			.unwrap_or_else(|| TypeAccess::owned_by(def.creator));
		slot.handle_access = def.handle_access.unwrap_or_default();
		if let Some(name) = name {
			self.by_name.insert(name.clone(), ty);
			slot.name = Some(name);
		}

		Ok(ty)
	}

	fn claim_subtype(&mut self, parent: HandleType) -> Result<HandleType> {
		if self.slots[parent.slot()].children >= self.max_subtypes {
			return Err(HandleError::Limit);
		}
		let ty = (1..=self.max_subtypes)
			.map(|i| HandleType::from_raw(parent.raw() + i))
			.find(|child| !self.slots[child.slot()].is_live())
			.ok_or(HandleError::Limit)?;
		self.slots[parent.slot()].children += 1;
		Ok(ty)
	}

	fn claim_base(&mut self) -> Result<HandleType> {
		if let Some(ty) = self.free.pop() {
			return Ok(ty);
		}
		let next = self.tail + TYPE_STRIDE;
		if next as usize >= self.slots.len() {
			return Err(HandleError::Limit);
		}
		self.tail = next;
		Ok(HandleType::from_raw(next))
	}

	/// Unregisters `ty`. Its handles must already be gone.
	pub fn invalidate(&mut self, ty: HandleType) {
		let slot = &mut self.slots[ty.slot()];
		slot.dispatch = None;
		slot.children = 0;
		slot.opened = 0;
		slot.removing = false;
		if let Some(name) = slot.name.take() {
			self.by_name.remove(&name);
		}

		if ty.is_subtype() {
			let parent = &mut self.slots[ty.base().slot()];
			parent.children = parent.children.saturating_sub(1);
		} else {
			self.free.push(ty);
		}
	}
}

#[cfg(test)]
mod tests;
