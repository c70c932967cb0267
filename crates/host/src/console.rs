//! Operator console commands.

use clap::{Parser, Subcommand};

use crate::error::{HostError, Result};
use crate::host::Host;
use crate::owners::OwnerKind;

#[derive(Parser, Debug)]
#[command(name = "tether", no_binary_name = true, disable_version_flag = true)]
struct ConsoleLine {
	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Inspect the handle table
	Handles {
		#[command(subcommand)]
		action: HandlesAction,
	},
	/// Manage plugins
	Plugins {
		#[command(subcommand)]
		action: PluginsAction,
	},
}

#[derive(Subcommand, Debug)]
enum HandlesAction {
	/// List every live handle
	Dump,
	/// Show per-owner handle counts
	Stats,
}

#[derive(Subcommand, Debug)]
enum PluginsAction {
	/// List loaded plugins
	List,
	/// Load a plugin
	Load {
		/// Plugin file name
		filename: String,
	},
	/// Unload a plugin by id
	Unload {
		/// Id shown by `plugins list`
		id: u32,
	},
}

/// Parses and runs one console line against `host`.
pub(crate) fn run(host: &mut Host, line: &str) -> Result<Vec<String>> {
	let words = line.split_whitespace();
	let parsed = ConsoleLine::try_parse_from(words)
		.map_err(|error| HostError::Command(error.render().to_string().trim_end().to_string()))?;

	match parsed.command {
		Command::Handles { action: HandlesAction::Dump } => Ok(host.handles().dump_lines()),
		Command::Handles { action: HandlesAction::Stats } => Ok(stats(host)),
		Command::Plugins { action: PluginsAction::List } => Ok(list_plugins(host)),
		Command::Plugins {
			action: PluginsAction::Load { filename },
		} => {
			let id = host.load_plugin(&filename)?;
			Ok(vec![format!("Loaded plugin \"{filename}\" as [{id:02}].")])
		}
		Command::Plugins {
			action: PluginsAction::Unload { id },
		} => {
			let kind = host
				.owners()
				.with(|owners| owners.get(id).map(|record| record.kind));
			if kind != Some(OwnerKind::Plugin) {
				return Err(HostError::NotLoaded(id));
			}
			let record = host.unload(id)?;
			Ok(vec![format!("Plugin \"{}\" unloaded.", record.filename)])
		}
	}
}

fn list_plugins(host: &Host) -> Vec<String> {
	host.owners().with(|owners| {
		let lines: Vec<String> = owners
			.of_kind(OwnerKind::Plugin)
			.map(|record| format!("[{:02}] {}", record.id, record.filename))
			.collect();
		if lines.is_empty() {
			vec!["No plugins loaded.".to_string()]
		} else {
			lines
		}
	})
}

fn stats(host: &Host) -> Vec<String> {
	let handles = host.handles();
	let mut lines = vec![format!("Live slots: {}", handles.live_count())];
	host.owners().with(|owners| {
		for record in owners.iter() {
			let owned = handles.owned_count(record.identity).unwrap_or(0);
			lines.push(format!(
				"[{:02}] {:<10} {:<24} {owned}",
				record.id,
				record.kind.as_str(),
				record.filename
			));
		}
	});
	if let Some(leak) = handles.last_leak_report() {
		lines.push(format!(
			"Last leak: \"{}\" unloaded with {} handles",
			leak.label, leak.total
		));
	}
	lines
}
