use tether_handles::{HandleSystem, HandleType, IdentityToken};
use tracing::{debug, info};

use crate::config::HostConfig;
use crate::console;
use crate::error::{HostError, Result};
use crate::owners::{OwnerKind, OwnerRecord, OwnerRegistry, Owners};

/// A running host: the handle table plus the owners bound to it.
pub struct Host {
	handles: HandleSystem,
	owners: OwnerRegistry,
	config: HostConfig,
	extension_type: HandleType,
	plugin_type: HandleType,
	stopped: bool,
}

impl Host {
	/// Builds the handle table, registers the core owner, and loads the
	/// extensions and plugins listed in `config`.
	pub fn new(config: HostConfig) -> Result<Self> {
		let mut handles = HandleSystem::new(config.handles.clone())?;
		let extension_type = handles.create_identity_type("EXTENSION")?;
		let plugin_type = handles.create_identity_type("PLUGIN")?;

		let owners = OwnerRegistry::default();
		let core = handles.core_identity();
		owners.with_mut(|owners| owners.insert(OwnerKind::Core, "CORE", core));
		handles.set_owner_directory(Box::new(owners.clone()));

		let mut host = Self {
			handles,
			owners,
			config,
			extension_type,
			plugin_type,
			stopped: false,
		};
		for filename in host.config.extensions.clone() {
			host.load_extension(&filename)?;
		}
		for filename in host.config.plugins.clone() {
			host.load_plugin(&filename)?;
		}
		info!(
			extensions = host.config.extensions.len(),
			plugins = host.config.plugins.len(),
			"host started"
		);
		Ok(host)
	}

	pub fn config(&self) -> &HostConfig {
		&self.config
	}

	pub fn handles(&self) -> &HandleSystem {
		&self.handles
	}

	pub fn handles_mut(&mut self) -> &mut HandleSystem {
		&mut self.handles
	}

	pub fn owners(&self) -> &OwnerRegistry {
		&self.owners
	}

	/// Loads a trusted extension and returns its id.
	pub fn load_extension(&mut self, filename: &str) -> Result<u32> {
		self.load(OwnerKind::Extension, filename)
	}

	/// Loads a plugin and returns its id.
	pub fn load_plugin(&mut self, filename: &str) -> Result<u32> {
		self.load(OwnerKind::Plugin, filename)
	}

	fn load(&mut self, kind: OwnerKind, filename: &str) -> Result<u32> {
		if self.owners.with(|owners| owners.by_filename(filename).is_some()) {
			return Err(HostError::AlreadyLoaded(filename.to_string()));
		}

		let ty = match kind {
			OwnerKind::Extension => self.extension_type,
			_ => self.plugin_type,
		};
		let identity = self.handles.create_identity(ty)?;
		let id = self
			.owners
			.with_mut(|owners| owners.insert(kind, filename, identity));
		info!(id, kind = kind.as_str(), file = filename, %identity, "loaded");
		Ok(id)
	}

	/// Unloads owner `id`, destroying its identity and every handle it owns.
	pub fn unload(&mut self, id: u32) -> Result<OwnerRecord> {
		match self.owners.with(|owners| owners.get(id).map(|record| record.kind)) {
			None => return Err(HostError::NotLoaded(id)),
			Some(OwnerKind::Core) => return Err(HostError::CoreUnload),
			Some(_) => {}
		}

		let record = self
			.owners
			.with_mut(|owners| owners.remove(id))
			.ok_or(HostError::NotLoaded(id))?;
		let owned = self.handles.owned_count(record.identity).unwrap_or(0);
		self.handles.destroy_identity(record.identity)?;
		info!(id, file = %record.filename, owned, "unloaded");
		Ok(record)
	}

	pub fn find_by_identity(&self, identity: IdentityToken) -> Option<OwnerRecord> {
		self.owners
			.with(|owners| owners.by_identity(identity).cloned())
	}

	/// Identity of a loaded owner.
	pub fn identity_of(&self, id: u32) -> Option<IdentityToken> {
		self.owners
			.with(|owners| owners.get(id).map(|record| record.identity))
	}

	/// Runs one console line and returns its output.
	pub fn console(&mut self, line: &str) -> Result<Vec<String>> {
		console::run(self, line)
	}

	/// Unloads plugins, then extensions, both newest first, and tears the
	/// handle table down. Later calls do nothing.
	pub fn shutdown(&mut self) {
		if self.stopped {
			return;
		}
		self.stopped = true;

		for kind in [OwnerKind::Plugin, OwnerKind::Extension] {
			let ids: Vec<u32> = self
				.owners
				.with(|owners| owners.of_kind(kind).map(|record| record.id).collect());
			for id in ids.into_iter().rev() {
				if let Err(error) = self.unload(id) {
					debug!(id, %error, "owner already gone at shutdown");
				}
			}
		}
		self.handles.teardown();
		// The core identity died with the table.
		self.owners.with_mut(Owners::clear);
		info!("host stopped");
	}
}

impl std::fmt::Debug for Host {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Host")
			.field("handles", &self.handles)
			.field("owners", &self.owners)
			.finish_non_exhaustive()
	}
}
