//! Capacity limits for the handle and type tables.

use serde::Deserialize;

use crate::error::ConfigError;
use crate::id::{MAX_BASE_TYPES, MAX_HANDLE_INDEX, MAX_SUBTYPES};

/// Fixed capacities and diagnostic thresholds of a [`HandleSystem`](crate::HandleSystem).
///
/// Loaded from TOML; omitted fields take the defaults below.
///
/// ```toml
/// max_handles = 4096
/// max_types = 64
/// warn_usage = 1000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandleLimits {
	/// Hard cap on handle slots, identities included.
	pub max_handles: u32,
	/// Number of base type blocks.
	pub max_types: u32,
	/// Subtypes allowed under one base type.
	pub max_subtypes: u32,
	/// Owned-handle count at which an owner is warned about once.
	pub warn_usage: usize,
	/// strftime pattern used for creation times in reports.
	pub timestamp_format: String,
}

impl Default for HandleLimits {
	fn default() -> Self {
		Self {
			max_handles: MAX_HANDLE_INDEX,
			max_types: 1 << 9,
			max_subtypes: MAX_SUBTYPES,
			warn_usage: 100_000,
			timestamp_format: "%m/%d/%Y - %H:%M:%S".to_string(),
		}
	}
}

impl HandleLimits {
	/// Parses limits from a TOML document and validates them.
	pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
		let limits: Self = toml::from_str(source)?;
		limits.validate()?;
		Ok(limits)
	}

	/// Checks that every limit fits the handle and type id encodings.
	pub fn validate(&self) -> Result<(), ConfigError> {
		// The root and core identities always occupy two slots and the
		// identity type occupies one type block.
		if self.max_handles < 2 || self.max_handles > MAX_HANDLE_INDEX {
			return Err(ConfigError::Invalid {
				field: "max_handles",
				reason: format!("must be within 2..={MAX_HANDLE_INDEX}"),
			});
		}
		if self.max_types < 2 || self.max_types > MAX_BASE_TYPES {
			return Err(ConfigError::Invalid {
				field: "max_types",
				reason: format!("must be within 2..={MAX_BASE_TYPES}"),
			});
		}
		if self.max_subtypes == 0 || self.max_subtypes > MAX_SUBTYPES {
			return Err(ConfigError::Invalid {
				field: "max_subtypes",
				reason: format!("must be within 1..={MAX_SUBTYPES}"),
			});
		}
		Ok(())
	}
}
