//! The handle system: allocation, lookup, release, cloning and identities.
//!
//! # Invariants
//!
//! - A handle resolves only while its slot is live and its serial matches.
//! - A clone always points at the true master; clones of clones are flattened.
//! - A master's object is destroyed exactly once, when its refcount hits zero.
//! - A slot is pushed back onto the free stack only after its destruction hook
//!   returned, and a slot being destroyed is never freed a second time.
//! - Destroying an identity frees every handle linked into its chain before
//!   the identity slot itself.

use std::any::Any;
use std::rc::Rc;

use chrono::Local;
use tracing::{debug, trace, warn};

use crate::access::{ACCESS_VERSION, AccessRight, HandleAccess, HandleSecurity, TypeAccess, permits};
use crate::config::HandleLimits;
use crate::dispatch::{HandleDispatch, HandleObject};
use crate::error::{ConfigError, HandleError, Result};
use crate::id::{HandleId, HandleType, IdentityToken};
use crate::leak::{LeakReport, OwnerDirectory};
use crate::table::{SlotState, SlotTable};
use crate::types::{TypeDef, TypeTable, type_check};

/// Identity slots carry no object, so destruction has nothing to release.
struct IdentityDispatch;

impl HandleDispatch for IdentityDispatch {
	fn on_destroy(&self, _handles: &mut HandleSystem, _ty: HandleType, _object: HandleObject) {}
}

/// Process-wide handle and type tables.
///
/// Single threaded: every operation runs to completion on the caller's thread.
/// Destruction hooks receive `&mut HandleSystem` and may re-enter any
/// operation.
pub struct HandleSystem {
	pub(crate) table: SlotTable,
	pub(crate) types: TypeTable,
	pub(crate) limits: HandleLimits,
	pub(crate) directory: Option<Box<dyn OwnerDirectory>>,
	pub(crate) last_leak: Option<LeakReport>,
	identity_dispatch: Rc<dyn HandleDispatch>,
	identity_type: HandleType,
	root: IdentityToken,
	core: IdentityToken,
}

impl HandleSystem {
	/// Builds empty tables sized by `limits` and registers the root and core
	/// identities.
	pub fn new(limits: HandleLimits) -> std::result::Result<Self, ConfigError> {
		limits.validate()?;

		let mut types = TypeTable::new(limits.max_types, limits.max_subtypes);
		let identity_dispatch: Rc<dyn HandleDispatch> = Rc::new(IdentityDispatch);
		let identity_type = types.create(
			TypeDef::shared(identity_dispatch.clone())
				.named("Identity")
				.type_access(TypeAccess::default()),
		)?;

		let placeholder = IdentityToken::new(HandleId::from_raw(0));
		let mut handles = Self {
			table: SlotTable::new(limits.max_handles),
			types,
			limits,
			directory: None,
			last_leak: None,
			identity_dispatch,
			identity_type,
			root: placeholder,
			core: placeholder,
		};

		let (_, root) = handles.make_prim(identity_type, None, SlotState::Identity)?;
		handles.root = IdentityToken::new(root);
		handles.types.set_owner(identity_type, Some(handles.root));

		let core_type = handles.create_identity_type("CORE")?;
		handles.core = handles.create_identity(core_type)?;

		debug!(root = %handles.root, core = %handles.core, "handle system initialised");
		Ok(handles)
	}

	/// Limits this system was built with.
	pub fn limits(&self) -> &HandleLimits {
		&self.limits
	}

	/// Identity with authority over every identity slot.
	pub fn root_identity(&self) -> IdentityToken {
		self.root
	}

	/// Identity of the host core; default owner of fast clones.
	pub fn core_identity(&self) -> IdentityToken {
		self.core
	}

	/// Base type every identity type derives from.
	pub fn identity_type(&self) -> HandleType {
		self.identity_type
	}

	/// Installs the collaborator consulted for owner names and leak recovery.
	pub fn set_owner_directory(&mut self, directory: Box<dyn OwnerDirectory>) {
		self.directory = Some(directory);
	}

	/// Report produced by the most recent leak recovery, if any.
	pub fn last_leak_report(&self) -> Option<&LeakReport> {
		self.last_leak.as_ref()
	}

	// ---------------------------------------------------------------------
	// Types
	// ---------------------------------------------------------------------

	/// Registers a handle type.
	pub fn create_type(&mut self, def: TypeDef) -> Result<HandleType> {
		let name = def.name.clone();
		let parent = def.parent;
		let ty = self.types.create(def)?;
		debug!(?ty, ?name, ?parent, "handle type registered");
		Ok(ty)
	}

	/// Looks up a named type.
	pub fn find_type(&self, name: &str) -> Option<HandleType> {
		self.types.find(name)
	}

	/// Returns true if a handle of type `actual` may be read as `expected`.
	pub fn type_check(&self, actual: HandleType, expected: HandleType) -> bool {
		type_check(actual, expected)
	}

	/// Name of a registered type.
	pub fn type_name(&self, ty: HandleType) -> Option<&str> {
		self.types.live(ty).and_then(|slot| slot.name.as_deref())
	}

	/// Number of live handles of `ty`, clones included.
	pub fn live_handles_of(&self, ty: HandleType) -> usize {
		self.types.live(ty).map_or(0, |slot| slot.opened)
	}

	/// Reassigns the security owner of a registered type.
	pub fn set_type_owner(&mut self, ty: HandleType, owner: Option<IdentityToken>) -> bool {
		self.types.set_owner(ty, owner)
	}

	/// Unregisters `ty`, its subtypes and every handle still using them.
	///
	/// Returns false when `ty` is not registered or is owned by another
	/// identity than `requester`.
	pub fn remove_type(&mut self, ty: HandleType, requester: Option<IdentityToken>) -> bool {
		let Some(slot) = self.types.live(ty) else {
			return false;
		};
		if slot
			.type_access
			.owner
			.is_some_and(|owner| Some(owner) != requester)
		{
			return false;
		}

		// Hooks may re-enter; nothing new of `ty` may outlive its id.
		self.types.begin_removal(ty);
		if !ty.is_subtype() {
			for child in self.types.children(ty) {
				let owner = self
					.types
					.live(child)
					.and_then(|slot| slot.type_access.owner);
				self.remove_type(child, owner);
			}
		}

		if self.live_handles_of(ty) > 0 {
			// Clones first: releasing them settles every master's refcount,
			// so each master below is destroyed exactly once.
			let clones = self.slots_of(ty, true);
			self.force_free(ty, &clones);
			let masters = self.slots_of(ty, false);
			self.force_free(ty, &masters);
		}

		self.types.invalidate(ty);
		debug!(?ty, "handle type removed");
		true
	}

	fn slots_of(&self, ty: HandleType, clones: bool) -> Vec<(u32, u32)> {
		self.table
			.iter()
			.filter(|(_, slot)| slot.is_live() && slot.ty == ty)
			.filter(|(_, slot)| slot.clone_of.is_some() == clones)
			.map(|(index, slot)| (index, slot.serial))
			.collect()
	}

	fn force_free(&mut self, ty: HandleType, slots: &[(u32, u32)]) {
		for &(index, serial) in slots {
			let slot = &self.table[index];
			if slot.is_live() && slot.serial == serial && slot.ty == ty {
				self.free_slot(index);
			}
		}
	}

	// ---------------------------------------------------------------------
	// Handles
	// ---------------------------------------------------------------------

	/// Creates a handle of `ty` owned by `owner`, with `ident` proving the
	/// right to create the type.
	pub fn create_handle<T: Any>(
		&mut self,
		ty: HandleType,
		object: T,
		owner: Option<IdentityToken>,
		ident: Option<IdentityToken>,
	) -> Result<HandleId> {
		let security = HandleSecurity::new(owner, ident);
		self.create_handle_ex(ty, object, &security, None)
	}

	/// Creates a handle with an optional per-handle access override.
	pub fn create_handle_ex<T: Any>(
		&mut self,
		ty: HandleType,
		object: T,
		security: &HandleSecurity,
		access: Option<HandleAccess>,
	) -> Result<HandleId> {
		self.create_handle_int(ty, Some(Box::new(object)), security, access, false)
	}

	fn create_handle_int(
		&mut self,
		ty: HandleType,
		object: Option<HandleObject>,
		security: &HandleSecurity,
		access: Option<HandleAccess>,
		identity: bool,
	) -> Result<HandleId> {
		let slot = self.types.open_for_create(ty).ok_or(HandleError::Parameter)?;
		if access.is_some_and(|a| a.version > ACCESS_VERSION) {
			return Err(HandleError::Version);
		}

		let type_access = slot.type_access;
		if !type_access.create
			&& (type_access.owner.is_none() || type_access.owner != security.identity)
		{
			return Err(HandleError::Access);
		}

		let state = if identity {
			SlotState::Identity
		} else {
			SlotState::Used
		};
		let (index, handle) = self.make_prim(ty, security.owner, state)?;
		let slot = &mut self.table[index];
		slot.access = access;
		slot.object = object;

		trace!(%handle, ?ty, owner = ?security.owner, "handle created");
		Ok(handle)
	}

	/// Claims a slot and links it to `owner`. No type or security checks.
	fn make_prim(
		&mut self,
		ty: HandleType,
		owner: Option<IdentityToken>,
		state: SlotState,
	) -> Result<(u32, HandleId)> {
		if let Some(owner) = owner {
			self.table.identity_index(owner)?;
		}

		let index = match self.table.try_alloc() {
			Ok(index) => index,
			Err(HandleError::Limit) => {
				if !self.recover_from_leak() {
					return Err(HandleError::Limit);
				}
				self.table.try_alloc()?
			}
			Err(err) => return Err(err),
		};

		// Leak recovery may have unloaded the requested owner.
		let owner_index = match owner.map(|owner| self.table.identity_index(owner)).transpose() {
			Ok(owner_index) => owner_index,
			Err(err) => {
				self.table.release(index);
				return Err(err);
			}
		};

		let serial = self.table.next_serial();
		let slot = &mut self.table[index];
		slot.state = state;
		slot.serial = serial;
		slot.ty = ty;
		slot.refcount = 1;
		slot.owner = if state == SlotState::Identity { None } else { owner };
		slot.created = Local::now();
		self.types.open(ty);

		if state != SlotState::Identity
			&& let (Some(owner), Some(owner_index)) = (owner, owner_index)
		{
			self.table.link(owner_index, index);
			self.note_usage(owner, owner_index);
		}

		Ok((index, HandleId::new(serial, index)))
	}

	fn note_usage(&mut self, owner: IdentityToken, owner_index: u32) {
		let threshold = self.limits.warn_usage;
		let usage = &mut self.table[owner_index].usage;
		if usage.warned || usage.owned < threshold {
			return;
		}
		usage.warned = true;

		let name = self
			.directory
			.as_ref()
			.and_then(|directory| directory.describe(owner))
			.unwrap_or_else(|| "<unknown>".to_string());
		warn!(owner = %name, threshold, "owner is using more handles than expected");
	}

	/// Decodes `handle`, refusing identity slots unless `identity` is root.
	fn lookup(&self, handle: HandleId, identity: Option<IdentityToken>, allow_freed: bool) -> Result<u32> {
		let index = self.table.decode(handle, allow_freed)?;
		if self.table[index].state == SlotState::Identity && identity != Some(self.root) {
			return Err(HandleError::Identity);
		}
		Ok(index)
	}

	fn check_access(&self, index: u32, right: AccessRight, security: &HandleSecurity) -> bool {
		let slot = &self.table[index];
		let Some(ty) = self.types.slot(slot.ty) else {
			return false;
		};
		let access = slot.access.unwrap_or(ty.handle_access);
		permits(access.get(right), ty.type_access.owner, slot.owner, security)
	}

	/// Validates a read and returns the index of the slot holding the object.
	fn read_index(
		&self,
		handle: HandleId,
		expected: Option<HandleType>,
		security: &HandleSecurity,
	) -> Result<u32> {
		let index = self.lookup(handle, security.identity, false)?;
		let slot = &self.table[index];
		if slot.destroying {
			return Err(HandleError::Freed);
		}

		let compatible = match expected {
			Some(expected) => type_check(slot.ty, expected),
			None => !slot.ty.is_subtype(),
		};
		if !compatible {
			return Err(HandleError::Type);
		}

		if !self.check_access(index, AccessRight::Read, security) {
			return Err(HandleError::Access);
		}

		Ok(slot.clone_of.unwrap_or(index))
	}

	/// Returns the object behind `handle`.
	///
	/// With `expected = None` the type check is skipped for base-type
	/// handles; subtype handles always need an expected type.
	pub fn read(
		&self,
		handle: HandleId,
		expected: Option<HandleType>,
		security: &HandleSecurity,
	) -> Result<&dyn Any> {
		let master = self.read_index(handle, expected, security)?;
		self.table[master]
			.object
			.as_deref()
			.ok_or(HandleError::Parameter)
	}

	/// Like [`read`](Self::read), downcasting the object to `T`.
	pub fn read_as<T: Any>(
		&self,
		handle: HandleId,
		expected: HandleType,
		security: &HandleSecurity,
	) -> Result<&T> {
		self.read(handle, Some(expected), security)?
			.downcast_ref()
			.ok_or(HandleError::Type)
	}

	/// Mutable variant of [`read_as`](Self::read_as).
	pub fn read_as_mut<T: Any>(
		&mut self,
		handle: HandleId,
		expected: HandleType,
		security: &HandleSecurity,
	) -> Result<&mut T> {
		let master = self.read_index(handle, Some(expected), security)?;
		self.table[master]
			.object
			.as_deref_mut()
			.ok_or(HandleError::Parameter)?
			.downcast_mut()
			.ok_or(HandleError::Type)
	}

	/// Releases `handle`.
	///
	/// Clones drop their master's refcount; masters still referenced by
	/// clones are detached from their owner and kept until the last clone
	/// goes; identities release everything they own.
	pub fn free(&mut self, handle: HandleId, security: &HandleSecurity) -> Result<()> {
		let index = self.lookup(handle, security.identity, false)?;
		if self.table[index].destroying {
			return Ok(());
		}
		if !self.check_access(index, AccessRight::Delete, security) {
			return Err(HandleError::Access);
		}

		trace!(%handle, "handle freed");
		self.free_slot(index);
		Ok(())
	}

	pub(crate) fn free_slot(&mut self, index: u32) {
		let slot = &self.table[index];
		if slot.destroying {
			return;
		}

		if let Some(master) = slot.clone_of {
			self.table[index].destroying = true;
			self.release_slot(index);

			let master_slot = &mut self.table[master];
			master_slot.refcount = master_slot.refcount.saturating_sub(1);
			if master_slot.refcount == 0 {
				self.destroy_master(master);
			}
		} else if slot.state == SlotState::Identity {
			self.table[index].destroying = true;
			self.release_slot(index);
		} else {
			let slot = &mut self.table[index];
			slot.refcount = slot.refcount.saturating_sub(1);
			if slot.refcount == 0 {
				self.destroy_master(index);
			} else {
				slot.state = SlotState::Freed;
				self.unlink_from_owner(index);
			}
		}
	}

	fn destroy_master(&mut self, index: u32) {
		let slot = &mut self.table[index];
		slot.destroying = true;
		let ty = slot.ty;
		if let Some(object) = slot.object.take()
			&& let Some(dispatch) = self.types.dispatch(ty)
		{
			dispatch.on_destroy(self, ty, object);
		}
		self.release_slot(index);
	}

	/// Bookkeeping half of a free: unlinks the slot, drains an identity's
	/// chain, and returns the index to the free stack.
	fn release_slot(&mut self, index: u32) {
		if self.table[index].state == SlotState::Identity {
			while let Some(member) = self.table.chain_head(index) {
				if self.table[member].destroying {
					// Already being torn down further up the stack.
					self.table.unlink(index, member);
					self.table[member].owner = None;
				} else {
					self.free_slot(member);
				}
			}
		} else {
			self.unlink_from_owner(index);
		}

		let ty = self.table[index].ty;
		self.types.close(ty);
		self.table.release(index);
	}

	fn unlink_from_owner(&mut self, index: u32) {
		let Some(owner) = self.table[index].owner.take() else {
			return;
		};
		match self.table.identity_index(owner) {
			Ok(owner_index) => self.table.unlink(owner_index, index),
			Err(_) => {
				let slot = &mut self.table[index];
				slot.prev = None;
				slot.next = None;
			}
		}
	}

	/// Creates a second handle to the object behind `handle`, owned by
	/// `new_owner`. Cloning a clone clones its master.
	pub fn clone_handle(
		&mut self,
		handle: HandleId,
		new_owner: Option<IdentityToken>,
		security: &HandleSecurity,
	) -> Result<HandleId> {
		let index = self.lookup(handle, security.identity, false)?;
		let slot = &self.table[index];
		if slot.state == SlotState::Identity {
			return Err(HandleError::Identity);
		}
		if slot.destroying {
			return Err(HandleError::Freed);
		}
		if !self.check_access(index, AccessRight::Clone, security) {
			return Err(HandleError::Access);
		}

		let master = slot.clone_of.unwrap_or(index);
		self.clone_prim(master, new_owner)
	}

	/// Clones without security checks, giving the clone to the core identity.
	///
	/// For subsystems handing out a second reference to their own object.
	pub fn fast_clone(&mut self, handle: HandleId) -> Result<HandleId> {
		let index = self.lookup(handle, Some(self.root), false)?;
		let slot = &self.table[index];
		if slot.state == SlotState::Identity {
			return Err(HandleError::Identity);
		}
		let master = slot.clone_of.unwrap_or(index);
		self.clone_prim(master, Some(self.core))
	}

	fn clone_prim(&mut self, master: u32, new_owner: Option<IdentityToken>) -> Result<HandleId> {
		let (ty, serial, access) = {
			let slot = &self.table[master];
			(slot.ty, slot.serial, slot.access)
		};
		if self.types.open_for_create(ty).is_none() {
			return Err(HandleError::Parameter);
		}
		let (index, handle) = self.make_prim(ty, new_owner, SlotState::Used)?;

		// Leak recovery inside make_prim may have destroyed the master.
		let master_slot = &self.table[master];
		if master_slot.serial != serial
			|| !matches!(master_slot.state, SlotState::Used | SlotState::Freed)
			|| master_slot.destroying
		{
			self.free_slot(index);
			return Err(HandleError::Freed);
		}

		self.table[index].access = access;
		self.table[index].clone_of = Some(master);
		self.table[master].refcount += 1;

		trace!(%handle, master, owner = ?new_owner, "handle cloned");
		Ok(handle)
	}

	// ---------------------------------------------------------------------
	// Identities
	// ---------------------------------------------------------------------

	/// Registers a new kind of identity (for example "PLUGIN").
	pub fn create_identity_type(&mut self, name: &str) -> Result<HandleType> {
		let def = TypeDef::shared(self.identity_dispatch.clone())
			.named(name)
			.parent(self.identity_type)
			.creator(self.root);
		self.create_type(def)
	}

	/// Looks up an identity type by name.
	pub fn find_identity_type(&self, name: &str) -> Option<HandleType> {
		self.find_type(name).filter(|ty| self.is_identity_type(*ty))
	}

	/// Removes an identity type, destroying every identity of that kind.
	pub fn destroy_identity_type(&mut self, ty: HandleType) -> bool {
		self.is_identity_type(ty) && self.remove_type(ty, Some(self.root))
	}

	fn is_identity_type(&self, ty: HandleType) -> bool {
		ty.is_subtype() && ty.base() == self.identity_type
	}

	/// Mints an identity of kind `ty`.
	pub fn create_identity(&mut self, ty: HandleType) -> Result<IdentityToken> {
		if !self.is_identity_type(ty) {
			return Err(HandleError::Parameter);
		}
		let security = HandleSecurity::of(self.root);
		let handle = self.create_handle_int(ty, None, &security, None, true)?;
		let token = IdentityToken::new(handle);
		debug!(%token, ?ty, "identity created");
		Ok(token)
	}

	/// Destroys `token`, freeing every handle it still owns.
	pub fn destroy_identity(&mut self, token: IdentityToken) -> Result<()> {
		if token == self.root {
			return Err(HandleError::Parameter);
		}
		self.table.identity_index(token)?;
		let security = HandleSecurity::of(self.root);
		let owned = self.owned_count(token).unwrap_or(0);
		self.free(token.handle(), &security)?;
		debug!(%token, owned, "identity destroyed");
		Ok(())
	}

	/// Returns true while `token` names a live identity.
	pub fn is_identity_live(&self, token: IdentityToken) -> bool {
		self.table.identity_index(token).is_ok()
	}

	/// Number of handles currently linked to `token`.
	pub fn owned_count(&self, token: IdentityToken) -> Result<usize> {
		let index = self.table.identity_index(token)?;
		Ok(self.table[index].usage.owned)
	}

	/// Handles currently linked to `token`, in creation order.
	pub fn owned_handles(&self, token: IdentityToken) -> Result<Vec<HandleId>> {
		let index = self.table.identity_index(token)?;
		Ok(self
			.table
			.chain(index)
			.map(|member| HandleId::new(self.table[member].serial, member))
			.collect())
	}

	// ---------------------------------------------------------------------
	// Diagnostics
	// ---------------------------------------------------------------------

	/// Number of live slots: ordinary handles, referenced masters and
	/// identities.
	pub fn live_count(&self) -> usize {
		self.table.iter().filter(|(_, slot)| slot.is_live()).count()
	}

	/// Refcount of the slot behind `handle`, also for masters only kept alive
	/// by clones.
	pub fn refcount(&self, handle: HandleId) -> Result<u32> {
		let index = self.table.decode(handle, true)?;
		Ok(self.table[index].refcount)
	}

	/// Master handle of a clone, or `None` if `handle` owns its object.
	pub fn clone_parent(&self, handle: HandleId) -> Result<Option<HandleId>> {
		let index = self.table.decode(handle, true)?;
		Ok(self.table[index]
			.clone_of
			.map(|master| HandleId::new(self.table[master].serial, master)))
	}

	/// Owner of `handle`, if any.
	pub fn owner_of(&self, handle: HandleId) -> Result<Option<IdentityToken>> {
		let index = self.table.decode(handle, true)?;
		Ok(self.table[index].owner)
	}

	/// Display label for an owner, as used in dumps.
	pub fn owner_label(&self, owner: Option<IdentityToken>) -> String {
		match owner {
			None => "NONE".to_string(),
			Some(owner) if owner == self.core => "CORE".to_string(),
			Some(owner) => self
				.directory
				.as_ref()
				.and_then(|directory| directory.describe(owner))
				.unwrap_or_else(|| "UNKNOWN".to_string()),
		}
	}

	/// Removes every registered type, destroying all remaining objects.
	///
	/// Ordinary types go first so their destruction hooks still see live
	/// identities; identity types go last. The system is empty afterwards.
	pub fn teardown(&mut self) {
		let identity_type = self.identity_type;
		for ty in self.types.bases() {
			if ty == identity_type {
				continue;
			}
			let owner = self.types.live(ty).and_then(|slot| slot.type_access.owner);
			self.remove_type(ty, owner);
		}
		self.remove_type(identity_type, Some(self.root));
		debug!("handle system torn down");
	}
}

impl std::fmt::Debug for HandleSystem {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HandleSystem")
			.field("high_water", &self.table.high_water())
			.field("free", &self.table.free_count())
			.field("root", &self.root)
			.field("core", &self.core)
			.finish_non_exhaustive()
	}
}
