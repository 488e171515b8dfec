mod common;

use common::{int32, string, TestHarness};
use hybrid_rt::{
    host::{NativeSig, NativeTypeKind},
    metadata::{memory::TypeDefinitionBuilder, TypeRef},
    types::{members::MethodQuery, TypeInfo},
    TypeLoadError,
};

fn shapes(harness: &TestHarness) {
    harness.load(
        "Game",
        vec![
            TypeDefinitionBuilder::interface("Game", "IFoo")
                .abstract_method("Run", vec![], None)
                .abstract_method("Stop", vec![int32()], None)
                .build(),
            TypeDefinitionBuilder::class("Game", "Shape")
                .method("Write", vec![int32()], None)
                .method("Write", vec![string()], None)
                .method("Write", vec![int32(), int32()], Some(int32()))
                .method("Area", vec![], Some(TypeRef::named("System.Double")))
                .method("Describe", vec![], Some(string()))
                .constructor(vec![])
                .constructor(vec![int32()])
                .static_constructor()
                .build(),
            TypeDefinitionBuilder::class("Game", "Circle")
                .base(TypeRef::named("Game.Shape"))
                .implements(TypeRef::named("Game.IFoo"))
                .method("Area", vec![], Some(TypeRef::named("System.Double")))
                .method("Game.IFoo.Run", vec![], None)
                .method("Stop", vec![int32()], None)
                .build(),
            TypeDefinitionBuilder::class("Game", "Ring")
                .base(TypeRef::named("Game.Circle"))
                .build(),
            TypeDefinitionBuilder::class("Game", "Twice")
                .method("Dup", vec![int32()], None)
                .method("Dup", vec![int32()], None)
                .build(),
        ],
    );
}

#[test]
fn test_overloads_resolve_by_parameters() {
    let harness = TestHarness::new();
    shapes(&harness);
    let registry = &harness.registry;
    let shape = harness.model("Game.Shape");
    let int = harness.ty("System.Int32");
    let string = harness.ty("System.String");

    let by_int = shape
        .find_method(registry, &MethodQuery::new("Write", &[int]))
        .unwrap()
        .unwrap();
    let by_string = shape
        .find_method(registry, &MethodQuery::new("Write", &[string]))
        .unwrap()
        .unwrap();
    let by_pair = shape
        .find_method(registry, &MethodQuery::new("Write", &[int, int]))
        .unwrap()
        .unwrap();
    assert_ne!(by_int, by_string);
    assert_ne!(by_int, by_pair);
    assert_eq!(by_string.parameters()[0].resolved(), Some(string));
    assert_eq!(by_pair.return_type().and_then(|r| r.resolved()), Some(int));

    // Repeated lookups hand back the same entry.
    let again = shape
        .find_method(registry, &MethodQuery::new("Write", &[int]))
        .unwrap()
        .unwrap();
    assert_eq!(again, by_int);

    let pair_query = [int, int];
    assert!(shape
        .find_method(
            registry,
            &MethodQuery::new("Write", &pair_query).with_return_type(string)
        )
        .unwrap()
        .is_none());
    assert!(shape
        .find_method(registry, &MethodQuery::new("Write", &[]))
        .unwrap()
        .is_none());
}

#[test]
fn test_identical_overloads_are_ambiguous() {
    let harness = TestHarness::new();
    shapes(&harness);
    let twice = harness.model("Game.Twice");
    let int = harness.ty("System.Int32");
    match twice.find_method(&harness.registry, &MethodQuery::new("Dup", &[int])) {
        Err(TypeLoadError::AmbiguousMatch {
            type_name,
            candidates,
            ..
        }) => {
            assert_eq!(type_name, "Game.Twice");
            assert_eq!(candidates.len(), 2);
        }
        other => panic!("expected an ambiguous match, got {other:?}"),
    }
}

#[test]
fn test_methods_found_through_base() {
    let harness = TestHarness::new();
    shapes(&harness);
    let registry = &harness.registry;
    let ring = harness.model("Game.Ring");
    let shape = harness.ty("Game.Shape");

    let describe = ring
        .find_method(registry, &MethodQuery::new("Describe", &[]))
        .unwrap()
        .unwrap();
    assert_eq!(describe.declaring_type(), shape);
    assert!(ring
        .find_method(registry, &MethodQuery::new("Describe", &[]).declared_only())
        .unwrap()
        .is_none());

    // The nearest declaration shadows the base one.
    let area = ring
        .find_method(registry, &MethodQuery::new("Area", &[]))
        .unwrap()
        .unwrap();
    assert_eq!(area.declaring_type(), harness.ty("Game.Circle"));
}

#[test]
fn test_virtual_dispatch_walks_ancestors() {
    let harness = TestHarness::new();
    shapes(&harness);
    let registry = &harness.registry;
    let shape = harness.model("Game.Shape");
    let ring = harness.model("Game.Ring");

    let area = shape
        .find_method(registry, &MethodQuery::new("Area", &[]))
        .unwrap()
        .unwrap();
    assert!(area.is_virtual());
    let resolved = ring.find_virtual_method(registry, &area).unwrap().unwrap();
    assert_eq!(resolved.declaring_type(), harness.ty("Game.Circle"));

    let describe = shape
        .find_method(registry, &MethodQuery::new("Describe", &[]))
        .unwrap()
        .unwrap();
    assert_eq!(ring.find_virtual_method(registry, &describe).unwrap(), Some(describe));
}

#[test]
fn test_interface_methods_use_explicit_names() {
    let harness = TestHarness::new();
    shapes(&harness);
    let registry = &harness.registry;
    let foo = harness.model("Game.IFoo");
    let ring = harness.model("Game.Ring");
    let int = harness.ty("System.Int32");

    let run = foo
        .find_method(registry, &MethodQuery::new("Run", &[]))
        .unwrap()
        .unwrap();
    assert!(!run.has_body());
    let implementation = ring.find_virtual_method(registry, &run).unwrap().unwrap();
    assert_eq!(implementation.name(), "Game.IFoo.Run");
    assert_eq!(implementation.declaring_type(), harness.ty("Game.Circle"));

    let stop = foo
        .find_method(registry, &MethodQuery::new("Stop", &[int]))
        .unwrap()
        .unwrap();
    let implementation = ring.find_virtual_method(registry, &stop).unwrap().unwrap();
    assert_eq!(implementation.name(), "Stop");
    assert!(ring.can_assign_to(registry, foo.handle()).unwrap());
}

#[test]
fn test_constructors_are_indexed_separately() {
    let harness = TestHarness::new();
    shapes(&harness);
    let registry = &harness.registry;
    let shape = harness.model("Game.Shape");
    let int = harness.ty("System.Int32");

    let constructors = shape.constructors(registry).unwrap();
    assert_eq!(constructors.len(), 2);
    assert!(constructors.iter().all(|c| c.is_constructor() && !c.is_static()));
    let by_int = shape.find_constructor(registry, &[int]).unwrap().unwrap();
    assert_eq!(by_int.parameters().len(), 1);
    assert!(shape
        .find_constructor(registry, &[harness.ty("System.String")])
        .unwrap()
        .is_none());

    let initializer = shape
        .as_interpreted()
        .unwrap()
        .static_constructor(registry)
        .unwrap()
        .unwrap();
    assert!(initializer.is_static());
    assert!(!shape.methods(registry).unwrap().contains(&initializer));
}

#[test]
fn test_native_methods_and_generic_methods() {
    let harness = TestHarness::new();
    let int = harness.native_id("System.Int32");
    let pool = harness
        .host
        .define("Engine.Pool", NativeTypeKind::Class)
        .method("Add", vec![int.into()], None)
        .static_method("Create", vec![], None)
        .generic_method(
            "Take",
            &["T"],
            vec![NativeSig::Array(Box::new(NativeSig::MethodParameter(0)), 1)],
            Some(NativeSig::MethodParameter(0)),
        )
        .constructor(vec![])
        .build();
    let registry = &harness.registry;
    let model = registry.get(registry.resolve_native(pool).unwrap()).unwrap();
    let int = harness.ty("System.Int32");

    let add = model
        .find_method(registry, &MethodQuery::new("Add", &[int]))
        .unwrap()
        .unwrap();
    assert!(add.is_virtual());
    let create = model
        .find_method(registry, &MethodQuery::new("Create", &[]))
        .unwrap()
        .unwrap();
    assert!(create.is_static());
    assert_eq!(model.constructors(registry).unwrap().len(), 1);

    let ints = registry.make_array_type(int, 1).unwrap();
    let take = model
        .find_method(
            registry,
            &MethodQuery::new("Take", &[ints]).with_generic_arguments(&[int]),
        )
        .unwrap()
        .unwrap();
    assert_eq!(take.return_type().and_then(|r| r.resolved()), Some(int));
    assert_eq!(take.definition().unwrap().generic_instance_count(), 1);
}

#[test]
fn test_first_structural_template_wins() {
    let harness = TestHarness::new();
    harness.load(
        "Game",
        vec![TypeDefinitionBuilder::class("Game", "Factory")
            .generic_method("Make", &["T"], vec![TypeRef::parameter("T")], None)
            .generic_method("Make", &["T"], vec![TypeRef::parameter("T")], Some(int32()))
            .build()],
    );
    let registry = &harness.registry;
    let factory = harness.model("Game.Factory");
    let string = harness.ty("System.String");
    let declared = factory.methods(registry).unwrap();

    let made = factory
        .find_method(
            registry,
            &MethodQuery::new("Make", &[string]).with_generic_arguments(&[string]),
        )
        .unwrap()
        .unwrap();
    assert_eq!(made.definition(), Some(declared[0].clone()));
    assert_eq!(made.return_type(), None);
}
