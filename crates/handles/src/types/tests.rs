use rstest::rstest;

use super::*;
use crate::dispatch::DropDispatch;
use crate::id::HandleId;

fn token(n: u32) -> IdentityToken {
	IdentityToken::new(HandleId::new(1, n))
}

fn def() -> TypeDef {
	TypeDef::new(DropDispatch)
}

#[test]
fn base_types_are_spaced_by_stride() {
	let mut table = TypeTable::new(4, 15);
	let a = table.create(def()).unwrap();
	let b = table.create(def()).unwrap();
	assert_eq!(a.raw(), TYPE_STRIDE);
	assert_eq!(b.raw(), 2 * TYPE_STRIDE);
	assert_eq!(table.bases(), vec![a, b]);
}

#[test]
fn subtypes_fill_the_parent_block() {
	let mut table = TypeTable::new(4, 15);
	let owner = token(1);
	let base = table.create(def().creator(owner)).unwrap();
	let first = table.create(def().parent(base).creator(owner)).unwrap();
	let second = table.create(def().parent(base).creator(owner)).unwrap();

	assert_eq!(first.raw(), base.raw() + 1);
	assert_eq!(second.raw(), base.raw() + 2);
	assert_eq!(first.base(), base);
	assert_eq!(table.live(base).unwrap().children, 2);
	assert_eq!(table.children(base), vec![first, second]);
}

#[test]
fn subtype_block_exhaustion_is_a_limit() {
	let mut table = TypeTable::new(4, 2);
	let owner = token(1);
	let base = table.create(def().creator(owner)).unwrap();
	table.create(def().parent(base).creator(owner)).unwrap();
	table.create(def().parent(base).creator(owner)).unwrap();
	assert_eq!(
		table.create(def().parent(base).creator(owner)).unwrap_err(),
		HandleError::Limit
	);
}

#[test]
fn base_type_exhaustion_is_a_limit() {
	let mut table = TypeTable::new(2, 15);
	table.create(def()).unwrap();
	table.create(def()).unwrap();
	assert_eq!(table.create(def()).unwrap_err(), HandleError::Limit);
}

#[test]
fn inheritance_requires_permission_or_ownership() {
	let mut table = TypeTable::new(4, 15);
	let base = table.create(def().creator(token(1))).unwrap();

	assert_eq!(
		table.create(def().parent(base).creator(token(2))).unwrap_err(),
		HandleError::Access
	);
	assert_eq!(
		table.create(def().parent(base)).unwrap_err(),
		HandleError::Access
	);

	let open = table
		.create(def().type_access(TypeAccess {
			inherit: true,
			..TypeAccess::owned_by(Some(token(1)))
		}))
		.unwrap();
	assert!(table.create(def().parent(open).creator(token(2))).is_ok());
}

#[test]
fn subtypes_cannot_be_parents() {
	let mut table = TypeTable::new(4, 15);
	let base = table.create(def()).unwrap();
	let child = table.create(def().parent(base)).unwrap();
	assert_eq!(
		table.create(def().parent(child)).unwrap_err(),
		HandleError::NoInherit
	);
	assert_eq!(
		table
			.create(def().parent(HandleType::from_raw(3 * TYPE_STRIDE)))
			.unwrap_err(),
		HandleError::Parameter
	);
}

#[test]
fn names_are_unique_and_indexed() {
	let mut table = TypeTable::new(4, 15);
	let widget = table.create(def().named("Widget")).unwrap();
	assert_eq!(table.find("Widget"), Some(widget));
	assert_eq!(
		table.create(def().named("Widget")).unwrap_err(),
		HandleError::Parameter
	);

	let anon = table.create(def().named("")).unwrap();
	assert!(table.live(anon).unwrap().name.is_none());
	assert_eq!(table.live(anon).unwrap().display_name(), "ANON");
}

#[test]
fn newer_access_records_are_rejected() {
	let mut table = TypeTable::new(4, 15);
	let access = HandleAccess {
		version: ACCESS_VERSION + 1,
		..HandleAccess::default()
	};
	assert_eq!(
		table.create(def().handle_access(access)).unwrap_err(),
		HandleError::Version
	);
}

#[test]
fn defaults_make_the_creator_owner() {
	let mut table = TypeTable::new(4, 15);
	let ty = table.create(def().creator(token(5))).unwrap();
	let slot = table.live(ty).unwrap();
	assert_eq!(slot.type_access.owner, Some(token(5)));
	assert!(!slot.type_access.create);
	assert_eq!(slot.handle_access, HandleAccess::default());
}

#[test]
fn invalidated_ids_are_recycled() {
	let mut table = TypeTable::new(4, 15);
	let a = table.create(def().named("a")).unwrap();
	let child = table.create(def().parent(a)).unwrap();

	table.invalidate(child);
	assert_eq!(table.live(a).unwrap().children, 0);

	table.invalidate(a);
	assert!(table.live(a).is_none());
	assert_eq!(table.find("a"), None);
	assert_eq!(table.create(def()).unwrap(), a);
}

#[rstest]
#[case(16, 16, true)]
#[case(17, 16, true)]
#[case(17, 17, true)]
#[case(17, 18, false)]
#[case(16, 17, false)]
#[case(16, 32, false)]
#[case(33, 16, false)]
fn compatibility(#[case] actual: u32, #[case] expected: u32, #[case] ok: bool) {
	assert_eq!(
		type_check(HandleType::from_raw(actual), HandleType::from_raw(expected)),
		ok
	);
}
