use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use tether_handles::{
	HandleDispatch, HandleError, HandleLimits, HandleObject, HandleSecurity, HandleSystem, HandleType,
	TypeAccess, TypeDef,
};
use tether_host::{Host, HostConfig, HostError, OwnerKind};

/// Records the labels of destroyed objects.
#[derive(Clone, Default)]
struct Closed(Rc<RefCell<Vec<String>>>);

impl HandleDispatch for Closed {
	fn on_destroy(&self, _handles: &mut HandleSystem, _ty: HandleType, object: HandleObject) {
		if let Ok(label) = object.downcast::<String>() {
			self.0.borrow_mut().push(*label);
		}
	}
}

fn small_host(max_handles: u32) -> Host {
	Host::new(HostConfig {
		handles: HandleLimits {
			max_handles,
			..HandleLimits::default()
		},
		..HostConfig::default()
	})
	.unwrap()
}

/// Registers a "File" type that plugins may create handles of.
fn file_type(host: &mut Host, closed: &Closed) -> HandleType {
	let core = host.handles().core_identity();
	host.handles_mut()
		.create_type(TypeDef::new(closed.clone()).named("File").type_access(TypeAccess {
			create: true,
			..TypeAccess::owned_by(Some(core))
		}))
		.unwrap()
}

fn open(host: &mut Host, ty: HandleType, plugin: u32, label: &str) -> tether_handles::HandleId {
	let identity = host.identity_of(plugin).unwrap();
	host.handles_mut()
		.create_handle(ty, label.to_string(), Some(identity), None)
		.unwrap()
}

#[test]
fn unloading_a_plugin_closes_its_handles() {
	let mut host = small_host(64);
	let closed = Closed::default();
	let ty = file_type(&mut host, &closed);
	let a = host.load_plugin("a.smx").unwrap();
	let b = host.load_plugin("b.smx").unwrap();

	open(&mut host, ty, a, "a1");
	let shared = open(&mut host, ty, a, "a2");
	open(&mut host, ty, b, "b1");
	let b_identity = host.identity_of(b).unwrap();
	host.handles_mut()
		.clone_handle(shared, Some(b_identity), &HandleSecurity::none())
		.unwrap();

	let record = host.unload(a).unwrap();
	assert_eq!(record.filename, "a.smx");
	assert_eq!(*closed.0.borrow(), vec!["a1"]);
	assert_eq!(host.handles().owned_count(b_identity), Ok(2));

	host.unload(b).unwrap();
	let mut all = closed.0.borrow().clone();
	all.sort();
	assert_eq!(all, vec!["a1", "a2", "b1"]);
	assert_eq!(host.handles().live_handles_of(ty), 0);
}

#[test]
fn duplicate_and_unknown_owners_are_rejected() {
	let mut host = small_host(64);
	let id = host.load_plugin("a.smx").unwrap();
	assert!(matches!(
		host.load_extension("a.smx"),
		Err(HostError::AlreadyLoaded(name)) if name == "a.smx"
	));
	assert!(matches!(host.unload(id + 10), Err(HostError::NotLoaded(_))));
	assert!(matches!(host.unload(0), Err(HostError::CoreUnload)));

	host.unload(id).unwrap();
	assert!(matches!(host.unload(id), Err(HostError::NotLoaded(_))));
	assert!(host.load_plugin("a.smx").is_ok());
}

#[test]
fn identities_map_back_to_owner_records() {
	let mut host = small_host(64);
	let ext = host.load_extension("timers.ext").unwrap();
	let identity = host.identity_of(ext).unwrap();
	let record = host.find_by_identity(identity).unwrap();
	assert_eq!(record.kind, OwnerKind::Extension);
	assert_eq!(record.filename, "timers.ext");

	let core = host.handles().core_identity();
	assert_eq!(host.find_by_identity(core).unwrap().kind, OwnerKind::Core);
}

#[test]
fn exhaustion_evicts_the_leaking_plugin_only() {
	// root, core, one extension, two plugins, then 2 + 6 handles
	let mut host = small_host(13);
	let closed = Closed::default();
	let ty = file_type(&mut host, &closed);
	let ext = host.load_extension("trusted.ext").unwrap();
	let modest = host.load_plugin("modest.smx").unwrap();
	let leaky = host.load_plugin("leaky.smx").unwrap();
	for i in 0..2 {
		open(&mut host, ty, modest, &format!("modest{i}"));
	}
	for i in 0..6 {
		open(&mut host, ty, leaky, &format!("leaky{i}"));
	}

	open(&mut host, ty, ext, "after");

	assert_eq!(closed.0.borrow().len(), 6);
	assert_eq!(
		host.console("plugins list").unwrap(),
		vec![format!("[{modest:02}] modest.smx")]
	);
	assert!(host.identity_of(leaky).is_none());
	let report = host.handles().last_leak_report().unwrap();
	assert_eq!(report.label, "leaky.smx");
	assert_eq!(report.total, 6);

	let stats = host.console("handles stats").unwrap();
	assert_eq!(
		stats.last().unwrap(),
		"Last leak: \"leaky.smx\" unloaded with 6 handles"
	);
}

#[test]
fn extensions_are_never_evicted() {
	let mut host = small_host(5);
	let closed = Closed::default();
	let ty = file_type(&mut host, &closed);
	let ext = host.load_extension("greedy.ext").unwrap();
	open(&mut host, ty, ext, "one");
	open(&mut host, ty, ext, "two");

	let identity = host.identity_of(ext).unwrap();
	let err = host
		.handles_mut()
		.create_handle(ty, "three".to_string(), Some(identity), None)
		.unwrap_err();
	assert_eq!(err, HandleError::Limit);
	assert!(closed.0.borrow().is_empty());
}

#[test]
fn console_dump_names_owners_by_file() {
	let mut host = small_host(64);
	let closed = Closed::default();
	let ty = file_type(&mut host, &closed);
	let plugin = host.load_plugin("admin.smx").unwrap();
	let handle = open(&mut host, ty, plugin, "log");

	let lines = host.console("handles dump").unwrap();
	assert_eq!(lines.len(), 4);
	assert!(lines[0].starts_with("Handle"));
	let row: Vec<&str> = lines[2].split('\t').map(str::trim_end).collect();
	assert_eq!(row[..3].to_vec(), vec![handle.to_string().as_str(), "admin.smx", "File"]);
	assert_eq!(
		lines[3],
		"-- Approximately 0 bytes of memory are in use by Handles."
	);
}

#[test]
fn console_manages_plugins() {
	let mut host = small_host(64);
	assert_eq!(host.console("plugins list").unwrap(), vec!["No plugins loaded."]);

	let loaded = host.console("plugins load stats.smx").unwrap();
	assert_eq!(loaded, vec!["Loaded plugin \"stats.smx\" as [01]."]);
	assert_eq!(host.console("plugins list").unwrap(), vec!["[01] stats.smx"]);

	assert!(matches!(
		host.console("plugins unload 0"),
		Err(HostError::NotLoaded(0))
	));
	assert_eq!(
		host.console("plugins unload 1").unwrap(),
		vec!["Plugin \"stats.smx\" unloaded."]
	);
	assert!(matches!(
		host.console("plugins frobnicate"),
		Err(HostError::Command(_))
	));
}

#[test]
fn shutdown_releases_everything() {
	let mut host = small_host(64);
	let closed = Closed::default();
	let ty = file_type(&mut host, &closed);
	let ext = host.load_extension("store.ext").unwrap();
	let plugin = host.load_plugin("user.smx").unwrap();
	open(&mut host, ty, ext, "ext");
	open(&mut host, ty, plugin, "plugin");
	let core = host.handles().core_identity();
	host.handles_mut()
		.create_handle(ty, "core".to_string(), Some(core), None)
		.unwrap();

	host.shutdown();
	assert_eq!(*closed.0.borrow(), vec!["plugin", "ext", "core"]);
	assert_eq!(host.handles().live_count(), 0);
}

#[test]
fn shutdown_twice_is_a_no_op() {
	let mut host = small_host(64);
	let closed = Closed::default();
	let ty = file_type(&mut host, &closed);
	let plugin = host.load_plugin("user.smx").unwrap();
	open(&mut host, ty, plugin, "plugin");
	let core = host.handles().core_identity();

	host.shutdown();
	host.shutdown();
	assert_eq!(*closed.0.borrow(), vec!["plugin"]);
	assert_eq!(host.handles().live_count(), 0);
	assert!(host.find_by_identity(core).is_none());
	assert_eq!(host.console("handles stats").unwrap(), vec!["Live slots: 0"]);
}

#[test]
fn host_starts_from_a_config_file() {
	let mut file = tempfile::NamedTempFile::new().unwrap();
	write!(
		file,
		"extensions = [\"base.ext\"]\nplugins = [\"one.smx\", \"two.smx\"]\n\n[handles]\nmax_handles = 128\n"
	)
	.unwrap();

	let config = HostConfig::load(file.path()).unwrap();
	let mut host = Host::new(config).unwrap();
	assert_eq!(host.handles().limits().max_handles, 128);
	assert_eq!(
		host.console("plugins list").unwrap(),
		vec!["[02] one.smx", "[03] two.smx"]
	);

	let missing = HostConfig::load(&file.path().with_extension("missing"));
	assert!(matches!(missing, Err(HostError::Io { .. })));
}
