//! Index-based slot storage for handles.
//!
//! # Layout
//!
//! Slot 0 is a permanent placeholder so that a zero index never decodes to a
//! live handle. Slots above the high-water mark do not exist yet; freed slots
//! are recycled through a LIFO stack of indices.
//!
//! Each slot doubles as a node of an intrusive ownership chain (see
//! [`chain`]). Identity slots use `prev`/`next` as the head/tail of the chain
//! of handles they own.

use chrono::{DateTime, Local};

use crate::access::HandleAccess;
use crate::dispatch::HandleObject;
use crate::error::{HandleError, Result};
use crate::id::{HandleId, HandleType, IdentityToken, MAX_SERIALS};

mod chain;


/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
	/// On the free stack (or never used).
	Free,
	/// Ordinary live handle.
	Used,
	/// Master freed by its owner but still referenced by clones.
	Freed,
	/// Owner identity; heads an ownership chain.
	Identity,
}

/// Handle accounting kept on identity slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct OwnerUsage {
	pub owned: usize,
	pub warned: bool,
}

pub(crate) struct Slot {
	pub state: SlotState,
	pub serial: u32,
	pub ty: HandleType,
	pub owner: Option<IdentityToken>,
	pub refcount: u32,
	/// Master slot when this slot is a clone.
	pub clone_of: Option<u32>,
	pub prev: Option<u32>,
	pub next: Option<u32>,
	/// Per-handle override of the type's handle access.
	pub access: Option<HandleAccess>,
	pub object: Option<HandleObject>,
	pub created: DateTime<Local>,
	pub destroying: bool,
	pub usage: OwnerUsage,
}

impl Slot {
	fn vacant() -> Self {
		Self {
			state: SlotState::Free,
			serial: 0,
			ty: HandleType::from_raw(0),
			owner: None,
			refcount: 0,
			clone_of: None,
			prev: None,
			next: None,
			access: None,
			object: None,
			created: Local::now(),
			destroying: false,
			usage: OwnerUsage::default(),
		}
	}

	pub fn is_live(&self) -> bool {
		self.state != SlotState::Free
	}
}

/// Growable slot arena with a hard capacity.
pub(crate) struct SlotTable {
	slots: Vec<Slot>,
	free: Vec<u32>,
	serial: u32,
	capacity: u32,
}

impl SlotTable {
	pub fn new(capacity: u32) -> Self {
		Self {
			slots: vec![Slot::vacant()],
			free: Vec::new(),
			serial: 0,
			capacity,
		}
	}

	/// Highest index ever handed out.
	pub fn high_water(&self) -> u32 {
		(self.slots.len() - 1) as u32
	}

	/// Number of slots currently on the free stack.
	pub fn free_count(&self) -> usize {
		self.free.len()
	}

	/// Takes a free index, growing the table when the free stack is empty.
	pub fn try_alloc(&mut self) -> Result<u32> {
		if let Some(index) = self.free.pop() {
			return Ok(index);
		}
		if self.high_water() >= self.capacity {
			return Err(HandleError::Limit);
		}
		self.slots.push(Slot::vacant());
		Ok(self.high_water())
	}

	/// Next serial, wrapping before the encoding overflows and skipping 0.
	pub fn next_serial(&mut self) -> u32 {
		self.serial += 1;
		if self.serial >= MAX_SERIALS {
			self.serial = 1;
		}
		self.serial
	}

	/// Resets `index` and pushes it onto the free stack.
	pub fn release(&mut self, index: u32) {
		let slot = &mut self.slots[index as usize];
		slot.state = SlotState::Free;
		slot.owner = None;
		slot.refcount = 0;
		slot.clone_of = None;
		slot.prev = None;
		slot.next = None;
		slot.access = None;
		slot.object = None;
		slot.destroying = false;
		slot.usage = OwnerUsage::default();
		self.free.push(index);
	}

	/// Bounds-checked access by raw index.
	pub fn get(&self, index: u32) -> Option<&Slot> {
		if index == 0 {
			return None;
		}
		self.slots.get(index as usize)
	}

	/// Resolves `handle` to its slot index, checking range, liveness and
	/// serial. `Freed` masters are rejected unless `allow_freed` is set.
	pub fn decode(&self, handle: HandleId, allow_freed: bool) -> Result<u32> {
		let index = handle.index();
		let slot = self.get(index).ok_or(HandleError::Index)?;

		match slot.state {
			SlotState::Free => return Err(HandleError::Freed),
			SlotState::Freed if !allow_freed => return Err(HandleError::Freed),
			_ => {}
		}
		if slot.serial != handle.serial() {
			return Err(HandleError::Changed);
		}
		Ok(index)
	}

	/// Resolves `token` to the index of its live identity slot.
	pub fn identity_index(&self, token: IdentityToken) -> Result<u32> {
		let index = self
			.decode(token.handle(), false)
			.map_err(|_| HandleError::Identity)?;
		if self[index].state != SlotState::Identity {
			return Err(HandleError::Identity);
		}
		Ok(index)
	}

	/// Iterates `(index, slot)` over every slot below the high-water mark.
	pub fn iter(&self) -> impl Iterator<Item = (u32, &Slot)> + '_ {
		self.slots
			.iter()
			.enumerate()
			.skip(1)
			.map(|(i, slot)| (i as u32, slot))
	}
}

impl std::ops::Index<u32> for SlotTable {
	type Output = Slot;

	fn index(&self, index: u32) -> &Slot {
		&self.slots[index as usize]
	}
}

impl std::ops::IndexMut<u32> for SlotTable {
	fn index_mut(&mut self, index: u32) -> &mut Slot {
		&mut self.slots[index as usize]
	}
}
