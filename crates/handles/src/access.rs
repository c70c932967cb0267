//! Access policy records for types and handles.

use crate::id::IdentityToken;

/// Version of the access record layout understood by this table.
///
/// Records built by a newer collaborator are rejected with
/// [`HandleError::Version`](crate::HandleError::Version).
pub const ACCESS_VERSION: u32 = 5;

bitflags::bitflags! {
	/// Restrictions applied to a single [`AccessRight`].
	///
	/// An empty set means anyone may exercise the right.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct Restrict: u8 {
		/// Only the type's owning identity may exercise the right.
		const IDENTITY = 1 << 0;
		/// Only the handle's owner may exercise the right.
		const OWNER = 1 << 1;
	}
}

/// Per-handle operations guarded by [`HandleAccess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessRight {
	Read,
	Delete,
	Clone,
}

/// Who may create handles of a type and derive subtypes from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeAccess {
	pub version: u32,
	/// Owning identity of the type. Always allowed to create and inherit.
	pub owner: Option<IdentityToken>,
	/// Anyone may create handles of this type.
	pub create: bool,
	/// Anyone may register subtypes of this type.
	pub inherit: bool,
}

impl Default for TypeAccess {
	fn default() -> Self {
		Self {
			version: ACCESS_VERSION,
			owner: None,
			create: false,
			inherit: false,
		}
	}
}

impl TypeAccess {
	/// Default record owned by `owner`.
	pub fn owned_by(owner: Option<IdentityToken>) -> Self {
		Self {
			owner,
			..Self::default()
		}
	}
}

/// Restrictions on reading, deleting and cloning individual handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleAccess {
	pub version: u32,
	pub read: Restrict,
	pub delete: Restrict,
	pub clone: Restrict,
}

impl Default for HandleAccess {
	fn default() -> Self {
		Self {
			version: ACCESS_VERSION,
			read: Restrict::IDENTITY,
			delete: Restrict::OWNER,
			clone: Restrict::empty(),
		}
	}
}

impl HandleAccess {
	/// A record with no restrictions at all.
	pub fn unrestricted() -> Self {
		Self {
			read: Restrict::empty(),
			delete: Restrict::empty(),
			..Self::default()
		}
	}

	/// Restrictions for `right`.
	pub const fn get(&self, right: AccessRight) -> Restrict {
		match right {
			AccessRight::Read => self.read,
			AccessRight::Delete => self.delete,
			AccessRight::Clone => self.clone,
		}
	}
}

/// Requester credentials passed to every checked operation.
///
/// `owner` is compared against a handle's owner, `identity` against the
/// owning identity of the handle's type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleSecurity {
	pub owner: Option<IdentityToken>,
	pub identity: Option<IdentityToken>,
}

impl HandleSecurity {
	pub const fn new(owner: Option<IdentityToken>, identity: Option<IdentityToken>) -> Self {
		Self { owner, identity }
	}

	/// Credentials acting as `token` for both roles.
	pub const fn of(token: IdentityToken) -> Self {
		Self {
			owner: Some(token),
			identity: Some(token),
		}
	}

	/// Anonymous credentials; pass only unrestricted checks.
	pub const fn none() -> Self {
		Self {
			owner: None,
			identity: None,
		}
	}
}

/// Evaluates `restrict` for a handle owned by `handle_owner` whose type is
/// owned by `type_owner`.
pub(crate) fn permits(
	restrict: Restrict,
	type_owner: Option<IdentityToken>,
	handle_owner: Option<IdentityToken>,
	security: &HandleSecurity,
) -> bool {
	if restrict.contains(Restrict::IDENTITY) {
		match type_owner {
			Some(owner) if security.identity == Some(owner) => {}
			_ => return false,
		}
	}

	if restrict.contains(Restrict::OWNER)
		&& let Some(owner) = handle_owner
		&& security.owner != Some(owner)
	{
		return false;
	}

	true
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::id::HandleId;

	fn token(n: u32) -> IdentityToken {
		IdentityToken::new(HandleId::new(1, n))
	}

	#[test]
	fn defaults_restrict_read_and_delete_only() {
		let access = HandleAccess::default();
		assert_eq!(access.get(AccessRight::Read), Restrict::IDENTITY);
		assert_eq!(access.get(AccessRight::Delete), Restrict::OWNER);
		assert!(access.get(AccessRight::Clone).is_empty());

		let ty = TypeAccess::default();
		assert!(!ty.create);
		assert!(!ty.inherit);
		assert_eq!(ty.owner, None);
	}

	#[test]
	fn identity_restriction_needs_a_type_owner() {
		let sec = HandleSecurity::of(token(1));
		assert!(!permits(Restrict::IDENTITY, None, None, &sec));
		assert!(permits(Restrict::IDENTITY, Some(token(1)), None, &sec));
		assert!(!permits(Restrict::IDENTITY, Some(token(2)), None, &sec));
	}

	#[test]
	fn owner_restriction_passes_for_unowned_handles() {
		let sec = HandleSecurity::none();
		assert!(permits(Restrict::OWNER, None, None, &sec));
		assert!(!permits(Restrict::OWNER, None, Some(token(3)), &sec));
		assert!(permits(
			Restrict::OWNER,
			None,
			Some(token(3)),
			&HandleSecurity::new(Some(token(3)), None)
		));
	}
}
