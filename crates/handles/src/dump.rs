//! Operator listing of live handles.

use crate::HandleSystem;
use crate::id::HandleId;
use crate::leak::format_timestamp;
use crate::table::SlotState;

impl HandleSystem {
	/// Reports every live ordinary handle to `reporter`, one line each,
	/// framed by a header and a memory total.
	pub fn dump(&self, reporter: &mut dyn FnMut(&str)) {
		reporter(&format!(
			"{:<10.10}\t{:<20.20}\t{:<20.20}\t{:<10.10}\t{:<30.30}",
			"Handle", "Owner", "Type", "Memory", "Time Created"
		));
		reporter(&"-".repeat(93));

		let format = self.limits.timestamp_format.as_str();
		let mut total = 0usize;
		for (index, slot) in self.table.iter() {
			if slot.state != SlotState::Used {
				continue;
			}

			let handle = HandleId::new(slot.serial, index);
			let owner = self.owner_label(slot.owner);
			let ty = self.types.slot(slot.ty);
			let type_name = ty.map_or("ANON", |ty| ty.display_name());

			// A clone shares its master's memory; only the master counts it.
			let size = if slot.clone_of.is_some() {
				Some(0)
			} else {
				self.types
					.dispatch(slot.ty)
					.and_then(|dispatch| dispatch.approx_size(slot.ty, slot.object.as_deref()))
			};
			let memory = match size {
				Some(size) => {
					total += size;
					size.to_string()
				}
				None => "-1".to_string(),
			};

			reporter(&format!(
				"{handle}\t{owner:<20.20}\t{type_name:<20.20}\t{memory:<10.10}\t{:<30.30}",
				format_timestamp(slot.created, format)
			));
		}

		reporter(&format!(
			"-- Approximately {total} bytes of memory are in use by Handles."
		));
	}

	/// Collects [`dump`](Self::dump) output into owned lines.
	pub fn dump_lines(&self) -> Vec<String> {
		let mut lines = Vec::new();
		self.dump(&mut |line| lines.push(line.to_string()));
		lines
	}
}

#[cfg(test)]
mod tests {
	use std::any::Any;

	use pretty_assertions::assert_eq;

	use crate::{
		HandleDispatch, HandleLimits, HandleObject, HandleSecurity, HandleSystem, HandleType, TypeAccess,
		TypeDef,
	};

	struct Buffers;

	impl HandleDispatch for Buffers {
		fn on_destroy(&self, _: &mut HandleSystem, _: HandleType, _: HandleObject) {}

		fn approx_size(&self, _: HandleType, object: Option<&dyn Any>) -> Option<usize> {
			object?.downcast_ref::<Vec<u8>>().map(Vec::len)
		}
	}

	fn columns(line: &str) -> Vec<String> {
		line.split('\t').map(|c| c.trim_end().to_string()).collect()
	}

	#[test]
	fn lists_used_handles_with_owner_type_and_size() {
		let mut handles = HandleSystem::new(HandleLimits::default()).unwrap();
		let core = handles.core_identity();
		let ty = handles
			.create_type(TypeDef::new(Buffers).named("Buffer").type_access(TypeAccess {
				create: true,
				..TypeAccess::owned_by(Some(core))
			}))
			.unwrap();

		let owned = handles.create_handle(ty, vec![0u8; 48], Some(core), None).unwrap();
		let loose = handles.create_handle(ty, vec![0u8; 2], None, None).unwrap();
		let clone = handles
			.clone_handle(owned, None, &HandleSecurity::none())
			.unwrap();

		let lines = handles.dump_lines();
		assert_eq!(lines.len(), 6);
		assert_eq!(
			columns(&lines[0]),
			vec!["Handle", "Owner", "Type", "Memory", "Time Created"]
		);
		assert_eq!(columns(&lines[2])[..4].to_vec(), vec![owned.to_string(), "CORE".into(), "Buffer".into(), "48".into()]);
		assert_eq!(columns(&lines[3])[..4].to_vec(), vec![loose.to_string(), "NONE".into(), "Buffer".into(), "2".into()]);
		assert_eq!(columns(&lines[4])[..4].to_vec(), vec![clone.to_string(), "NONE".into(), "Buffer".into(), "0".into()]);
		assert_eq!(lines[5], "-- Approximately 50 bytes of memory are in use by Handles.");
	}

	#[test]
	fn unknown_sizes_and_bad_formats_are_marked() {
		let limits = HandleLimits {
			timestamp_format: "%Q".to_string(),
			..HandleLimits::default()
		};
		let mut handles = HandleSystem::new(limits).unwrap();
		let ty = handles
			.create_type(TypeDef::new(Buffers).type_access(TypeAccess {
				create: true,
				..TypeAccess::default()
			}))
			.unwrap();
		handles.create_handle(ty, "not a buffer", None, None).unwrap();

		let lines = handles.dump_lines();
		let row = columns(&lines[2]);
		assert_eq!(row[1..].to_vec(), vec!["NONE", "ANON", "-1", "INVALID"]);
		assert_eq!(lines[3], "-- Approximately 0 bytes of memory are in use by Handles.");
	}
}
