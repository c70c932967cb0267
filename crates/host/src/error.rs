//! Error types for the host shell.

use std::path::PathBuf;

use tether_handles::{ConfigError, HandleError};
use thiserror::Error;

/// Errors surfaced by [`Host`](crate::Host) operations and console commands.
#[derive(Debug, Error)]
pub enum HostError {
	/// A handle table operation failed.
	#[error("handle error: {0}")]
	Handles(#[from] HandleError),

	/// The handle limits were rejected.
	#[error(transparent)]
	Limits(#[from] ConfigError),

	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// The host configuration is not valid TOML or has unknown keys.
	#[error("failed to parse host config: {0}")]
	Toml(#[from] toml::de::Error),

	/// An owner with this file name is already loaded.
	#[error("\"{0}\" is already loaded")]
	AlreadyLoaded(String),

	/// No owner is registered under this id.
	#[error("no owner with id {0}")]
	NotLoaded(u32),

	/// The core owner lives as long as the host.
	#[error("the core cannot be unloaded")]
	CoreUnload,

	/// A console line could not be parsed.
	#[error("{0}")]
	Command(String),
}

/// Result type for host operations.
pub type Result<T> = std::result::Result<T, HostError>;
