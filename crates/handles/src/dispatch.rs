//! Per-type destruction and size hooks.

use std::any::Any;

use crate::HandleSystem;
use crate::id::HandleType;

/// Object stored behind a master handle.
pub type HandleObject = Box<dyn Any>;

/// Callbacks a collaborator registers together with a handle type.
///
/// The table never inspects objects itself; it hands them back through this
/// trait when the last reference disappears.
pub trait HandleDispatch {
	/// Releases `object`, whose last handle of type `ty` was just freed.
	///
	/// The hook may call back into `handles` (for example to free child
	/// handles). The slot being destroyed is already guarded: freeing it again
	/// is a silent no-op and reading it reports
	/// [`HandleError::Freed`](crate::HandleError::Freed).
	fn on_destroy(&self, handles: &mut HandleSystem, ty: HandleType, object: HandleObject);

	/// Approximate memory held by `object`, if known.
	fn approx_size(&self, _ty: HandleType, _object: Option<&dyn Any>) -> Option<usize> {
		None
	}
}

/// Dispatch that simply drops the object.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropDispatch;

impl HandleDispatch for DropDispatch {
	fn on_destroy(&self, _handles: &mut HandleSystem, _ty: HandleType, object: HandleObject) {
		drop(object);
	}
}
