//! Error types for handle and type operations.

use thiserror::Error;

/// Failure codes returned by every handle table operation.
///
/// The variants fall into four groups that callers are expected to treat
/// differently:
///
/// - caller input: [`Parameter`](Self::Parameter), [`Version`](Self::Version)
/// - stale references: [`Index`](Self::Index), [`Freed`](Self::Freed),
///   [`Changed`](Self::Changed), [`Type`](Self::Type)
/// - policy: [`Access`](Self::Access), [`Identity`](Self::Identity),
///   [`NoInherit`](Self::NoInherit)
/// - capacity: [`Limit`](Self::Limit), surfaced only after leak recovery failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum HandleError {
	/// The encoded index is zero or beyond the table's high-water mark.
	#[error("handle index out of range")]
	Index,
	/// The slot is not live.
	#[error("handle has been freed")]
	Freed,
	/// The slot was reused for another object since the handle was issued.
	#[error("handle serial does not match (stale handle)")]
	Changed,
	/// The handle's type is not compatible with the expected type.
	#[error("handle type mismatch")]
	Type,
	/// The requester lacks the access right for this operation.
	#[error("access denied")]
	Access,
	/// An identity token is invalid, or an identity handle was used where it
	/// is not allowed.
	#[error("identity mismatch")]
	Identity,
	/// An argument was invalid.
	#[error("invalid parameter")]
	Parameter,
	/// An access record declares a newer version than this table understands.
	#[error("unsupported access record version")]
	Version,
	/// A fixed capacity was exhausted.
	#[error("handle or type limit exceeded")]
	Limit,
	/// The parent type cannot be inherited from.
	#[error("type cannot be inherited")]
	NoInherit,
}

impl HandleError {
	/// Returns true for errors meaning the handle is permanently unusable.
	pub const fn is_stale(self) -> bool {
		matches!(self, Self::Index | Self::Freed | Self::Changed | Self::Type)
	}

	/// Returns true for policy rejections on a handle that is still live.
	pub const fn is_denied(self) -> bool {
		matches!(self, Self::Access | Self::Identity | Self::NoInherit)
	}
}

/// Result type for handle operations.
pub type Result<T> = std::result::Result<T, HandleError>;

/// Errors raised while loading [`HandleLimits`](crate::HandleLimits).
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The TOML document could not be parsed.
	#[error("failed to parse limits: {0}")]
	Toml(#[from] toml::de::Error),

	/// A limit is outside the range the encoding supports.
	#[error("invalid limit `{field}`: {reason}")]
	Invalid {
		/// Name of the offending field.
		field: &'static str,
		/// Why the value was rejected.
		reason: String,
	},

	/// The root and core identities could not be registered.
	#[error("failed to initialise handle system: {0}")]
	Bootstrap(#[from] HandleError),
}
