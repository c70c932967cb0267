//! Leak diagnosis and recovery.
//!
//! When the slot table is exhausted, the owner holding the most ordinary
//! handles is reported and force-unloaded so the allocation can be retried
//! once. Only owners the [`OwnerDirectory`] offers as candidates (loaded
//! plugins, in practice) are ever evicted.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use rustc_hash::FxHashMap;
use tracing::error;

use crate::HandleSystem;
use crate::id::{HandleType, IdentityToken};
use crate::table::SlotState;

/// Host-side view of the components that own handles.
pub trait OwnerDirectory {
	/// Owners that may be evicted to recover from a leak, in enumeration
	/// order.
	fn leak_candidates(&self) -> Vec<LeakCandidate>;

	/// Human readable name of `owner` (a file name, typically).
	fn describe(&self, owner: IdentityToken) -> Option<String>;

	/// Unloads `owner`, destroying its identity. Returns true on success.
	fn force_unload(&mut self, handles: &mut HandleSystem, owner: IdentityToken) -> bool;
}

/// An owner eligible for eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakCandidate {
	pub identity: IdentityToken,
	pub label: String,
}

/// Summary of the handles held by an evicted owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakReport {
	pub owner: IdentityToken,
	pub label: String,
	/// Ordinary handles held by the owner.
	pub total: usize,
	/// Handle counts per type name, in type id order.
	pub per_type: Vec<(String, usize)>,
	pub oldest: Option<DateTime<Local>>,
	pub newest: Option<DateTime<Local>>,
	/// Sum of the size hooks of the owner's master handles.
	pub approx_bytes: usize,
}

impl LeakReport {
	/// Renders the report the way it is logged.
	pub fn lines(&self, timestamp_format: &str) -> Vec<String> {
		const RULE: &str =
			"--------------------------------------------------------------------------";

		let mut lines = vec![
			format!("MEMORY LEAK DETECTED IN PLUGIN (file \"{}\")", self.label),
			format!("Unloading plugin to free {} handles.", self.total),
			"Contact the author(s) of this plugin to correct this error.".to_string(),
			RULE.to_string(),
		];
		lines.extend(
			self.per_type
				.iter()
				.map(|(name, count)| format!("Type\t{name:<20.20}|\tCount\t{count}")),
		);
		lines.push(RULE.to_string());

		let stamp = |time: Option<DateTime<Local>>| {
			time.map_or_else(|| "INVALID".to_string(), |t| format_timestamp(t, timestamp_format))
		};
		lines.push(format!("Oldest Living Handle: created at {}", stamp(self.oldest)));
		lines.push(format!("Newest Living Handle: created at {}", stamp(self.newest)));
		lines.push(format!(
			"-- Approximately {} bytes of memory are in use by ({}) Handles.",
			self.approx_bytes, self.total
		));
		lines
	}
}

/// Formats `time` with a strftime pattern, or `INVALID` if the pattern is
/// malformed.
pub(crate) fn format_timestamp(time: DateTime<Local>, pattern: &str) -> String {
	use std::fmt::Write;

	let mut out = String::new();
	if write!(out, "{}", time.format(pattern)).is_err() {
		return "INVALID".to_string();
	}
	out
}

impl HandleSystem {
	/// Evicts the heaviest candidate owner. Returns true if the caller should
	/// retry its allocation.
	pub(crate) fn recover_from_leak(&mut self) -> bool {
		// Taken out for the duration so the directory can borrow the system
		// mutably; nested exhaustion during the unload fails fast.
		let Some(mut directory) = self.directory.take() else {
			return false;
		};
		let recovered = self.evict_heaviest(directory.as_mut());
		if self.directory.is_none() {
			self.directory = Some(directory);
		}
		recovered
	}

	fn evict_heaviest(&mut self, directory: &mut dyn OwnerDirectory) -> bool {
		let counts = self.counts_by_owner();

		let mut heaviest: Option<(LeakCandidate, usize)> = None;
		for candidate in directory.leak_candidates() {
			let count = counts.get(&candidate.identity).copied().unwrap_or(0);
			if count > heaviest.as_ref().map_or(0, |(_, best)| *best) {
				heaviest = Some((candidate, count));
			}
		}
		let Some((victim, _)) = heaviest else {
			return false;
		};

		let report = self.leak_report(victim.identity, victim.label);
		for line in report.lines(&self.limits.timestamp_format) {
			error!(target: "tether::leak", "{line}");
		}
		self.last_leak = Some(report);

		directory.force_unload(self, victim.identity)
	}

	fn counts_by_owner(&self) -> FxHashMap<IdentityToken, usize> {
		let mut counts = FxHashMap::default();
		for (_, slot) in self.table.iter() {
			if slot.state == SlotState::Used
				&& let Some(owner) = slot.owner
			{
				*counts.entry(owner).or_insert(0) += 1;
			}
		}
		counts
	}

	/// Summarises the ordinary handles owned by `owner`.
	pub fn leak_report(&self, owner: IdentityToken, label: String) -> LeakReport {
		let mut per_type: BTreeMap<HandleType, usize> = BTreeMap::new();
		let mut report = LeakReport {
			owner,
			label,
			total: 0,
			per_type: Vec::new(),
			oldest: None,
			newest: None,
			approx_bytes: 0,
		};

		for (_, slot) in self.table.iter() {
			if slot.state != SlotState::Used || slot.owner != Some(owner) {
				continue;
			}

			*per_type.entry(slot.ty).or_insert(0) += 1;
			report.total += 1;
			if report.oldest.is_none_or(|oldest| slot.created < oldest) {
				report.oldest = Some(slot.created);
			}
			if report.newest.is_none_or(|newest| slot.created > newest) {
				report.newest = Some(slot.created);
			}

			if slot.clone_of.is_some() {
				continue;
			}
			if let Some(dispatch) = self.types.dispatch(slot.ty)
				&& let Some(size) = dispatch.approx_size(slot.ty, slot.object.as_deref())
			{
				report.approx_bytes += size;
			}
		}

		report.per_type = per_type
			.into_iter()
			.map(|(ty, count)| {
				let name = self
					.types
					.slot(ty)
					.map_or("ANON", |slot| slot.display_name())
					.to_string();
				(name, count)
			})
			.collect();
		report
	}
}
