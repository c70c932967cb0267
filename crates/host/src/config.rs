//! Host configuration.

use std::path::Path;

use serde::Deserialize;
use tether_handles::HandleLimits;

use crate::error::{HostError, Result};

/// Settings for a [`Host`](crate::Host), usually read from `tether.toml`.
///
/// ```toml
/// extensions = ["timers.ext"]
/// plugins = ["admin.smx", "stats.smx"]
///
/// [handles]
/// max_handles = 65536
/// warn_usage = 5000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
	/// Handle table limits.
	pub handles: HandleLimits,
	/// Extensions loaded at startup, in order.
	pub extensions: Vec<String>,
	/// Plugins loaded at startup, in order.
	pub plugins: Vec<String>,
}

impl HostConfig {
	pub fn from_toml_str(source: &str) -> Result<Self> {
		let config: Self = toml::from_str(source)?;
		config.handles.validate()?;
		Ok(config)
	}

	/// Reads and validates a config file.
	pub fn load(path: &Path) -> Result<Self> {
		let source = std::fs::read_to_string(path).map_err(|error| HostError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::from_toml_str(&source)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn empty_config_uses_default_limits() {
		let config = HostConfig::from_toml_str("").unwrap();
		assert_eq!(config.handles, HandleLimits::default());
		assert!(config.plugins.is_empty());
	}

	#[test]
	fn nested_limits_are_parsed_and_checked() {
		let config = HostConfig::from_toml_str(
			"plugins = [\"a.smx\"]\n[handles]\nmax_handles = 64\n",
		)
		.unwrap();
		assert_eq!(config.handles.max_handles, 64);
		assert_eq!(config.plugins, vec!["a.smx"]);

		let err = HostConfig::from_toml_str("[handles]\nmax_subtypes = 40\n").unwrap_err();
		assert!(matches!(err, HostError::Limits(_)));
	}

	#[test]
	fn load_reads_a_file_and_reports_its_path() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(file, "extensions = [\"core.ext\"]\n").unwrap();
		let config = HostConfig::load(file.path()).unwrap();
		assert_eq!(config.extensions, vec!["core.ext"]);

		let missing = file.path().with_extension("gone");
		match HostConfig::load(&missing) {
			Err(HostError::Io { path, .. }) => assert_eq!(path, missing),
			other => panic!("expected an io error, got {other:?}"),
		}
	}

	#[test]
	fn unknown_keys_are_rejected() {
		let err = HostConfig::from_toml_str("plugin = []\n").unwrap_err();
		assert!(matches!(err, HostError::Toml(_)));
	}
}
