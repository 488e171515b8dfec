mod common;

use common::{int32, string, TestHarness};
use hybrid_rt::{
    host::{FieldAccessor, NativeSig, NativeTypeKind, Visibility},
    metadata::{memory::TypeDefinitionBuilder, TypeRef},
    types::{members::FieldBinding, TypeInfo},
    value::{DefaultValue, Instance, Value},
};
use std::sync::{Arc, Mutex};

fn hierarchy(harness: &TestHarness) {
    harness.load(
        "Game",
        vec![
            TypeDefinitionBuilder::class("Game", "Entity")
                .field("id", int32())
                .field("name", string())
                .static_field("count", int32())
                .build(),
            TypeDefinitionBuilder::class("Game", "Actor")
                .base(TypeRef::named("Game.Entity"))
                .field("speed", int32())
                .field("target", TypeRef::named("Game.Entity"))
                .build(),
            TypeDefinitionBuilder::class("Game", "Hero")
                .base(TypeRef::named("Game.Actor"))
                .field("level", int32())
                .build(),
        ],
    );
}

#[test]
fn test_instance_ordinals_follow_base_chain() {
    let harness = TestHarness::new();
    hierarchy(&harness);
    let registry = &harness.registry;

    let entity = harness.model("Game.Entity");
    let actor = harness.model("Game.Actor");
    let hero = harness.model("Game.Hero");
    assert_eq!(entity.total_field_count(registry).unwrap(), 2);
    assert_eq!(actor.total_field_count(registry).unwrap(), 4);
    assert_eq!(hero.total_field_count(registry).unwrap(), 5);
    assert_eq!(
        actor.as_interpreted().unwrap().field_start_index(registry).unwrap(),
        2
    );

    let ordinals: Vec<_> = actor
        .fields(registry)
        .unwrap()
        .iter()
        .filter(|f| !f.is_static())
        .map(|f| (f.name().to_string(), f.ordinal()))
        .collect();
    assert_eq!(
        ordinals,
        vec![
            ("speed".to_string(), Some(2)),
            ("target".to_string(), Some(3))
        ]
    );
    let level = hero.get_field_by_name(registry, "level").unwrap().unwrap();
    assert_eq!(level.ordinal(), Some(4));

    let count = entity.get_field_by_name(registry, "count").unwrap().unwrap();
    assert!(count.is_static());
    assert_eq!(count.ordinal(), None);
}

#[test]
fn test_fields_found_by_token_through_base() {
    let harness = TestHarness::new();
    hierarchy(&harness);
    let registry = &harness.registry;

    let entity = harness.model("Game.Entity");
    let hero = harness.model("Game.Hero");
    let id = entity.get_field_by_name(registry, "id").unwrap().unwrap();
    let inherited = hero.get_field(registry, id.token()).unwrap().unwrap();
    assert_eq!(inherited, id);
    assert_eq!(inherited.declaring_type(), entity.handle());
    assert!(hero.get_field_by_name(registry, "missing").unwrap().is_none());
}

#[test]
fn test_interpreted_instance_round_trip() {
    let harness = TestHarness::new();
    hierarchy(&harness);
    let registry = &harness.registry;

    let hero = harness.ty("Game.Hero");
    let object = registry.instantiate(hero).unwrap();
    let instance = object.downcast_ref::<Instance>().unwrap();
    assert_eq!(instance.type_handle(), hero);
    assert_eq!(instance.len(), 5);

    let model = registry.get(hero).unwrap();
    let id = model.get_field_by_name(registry, "id").unwrap().unwrap();
    let target = model.get_field_by_name(registry, "target").unwrap().unwrap();
    assert_eq!(id.get_value(registry, Some(&object)).unwrap(), Value::Int32(0));
    assert!(target.get_value(registry, Some(&object)).unwrap().is_null());

    id.set_value(registry, Some(&object), Value::Int32(7)).unwrap();
    assert_eq!(id.get_value(registry, Some(&object)).unwrap(), Value::Int32(7));
}

#[test]
fn test_native_point_round_trip() {
    let harness = TestHarness::new();
    let int = harness.native_id("System.Int32");
    let point = harness
        .host
        .define("Geometry.Point", NativeTypeKind::ValueType)
        .field("x", int)
        .field("y", int)
        .build();
    let registry = &harness.registry;

    let handle = registry.resolve_native(point).unwrap();
    let model = registry.get(handle).unwrap();
    assert!(model.is_value_type());
    assert_eq!(model.total_field_count(registry).unwrap(), 2);
    assert_eq!(model.default_value(registry).unwrap(), DefaultValue::ValueType(handle));

    let x = model.get_field_by_name(registry, "x").unwrap().unwrap();
    assert_eq!(model.get_field(registry, x.token()).unwrap(), Some(x.clone()));
    let object = registry.instantiate(handle).unwrap();
    assert_eq!(x.get_value(registry, Some(&object)).unwrap(), Value::Int32(0));
    x.set_value(registry, Some(&object), Value::Int32(12)).unwrap();
    assert_eq!(x.get_value(registry, Some(&object)).unwrap(), Value::Int32(12));

    let y = model.get_field_by_name(registry, "y").unwrap().unwrap();
    assert_eq!(y.get_value(registry, Some(&object)).unwrap(), Value::Int32(0));
}

#[test]
fn test_private_native_fields_are_hidden() {
    let harness = TestHarness::new();
    let int = harness.native_id("System.Int32");
    let counter = harness
        .host
        .define("Engine.Counter", NativeTypeKind::Class)
        .field("value", int)
        .member_field("_secret", int.into(), false, Visibility::Private)
        .member_field("_step", int.into(), false, Visibility::Family)
        .build();
    let registry = &harness.registry;
    let model = registry.get(registry.resolve_native(counter).unwrap()).unwrap();
    let names: Vec<_> = model
        .fields(registry)
        .unwrap()
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    assert_eq!(names, vec!["value", "_step"]);
}

#[test]
fn test_value_type_binder_exposes_dense_ordinals() {
    let harness = TestHarness::new();
    let int = harness.native_id("System.Int32");
    let bound = harness
        .host
        .define("Engine.Color", NativeTypeKind::ValueType)
        .field("r", int)
        .member_field("_packed", int.into(), false, Visibility::Private)
        .static_field("White", int)
        .field("g", int)
        .build();
    let unbound = harness
        .host
        .define("Engine.Size", NativeTypeKind::ValueType)
        .field("w", int)
        .member_field("_h", int.into(), false, Visibility::Private)
        .build();
    let registry = &harness.registry;
    registry.register_value_type_binder(bound);

    let color = registry.get(registry.resolve_native(bound).unwrap()).unwrap();
    let ordinals: Vec<_> = color
        .fields(registry)
        .unwrap()
        .iter()
        .map(|f| (f.name().to_string(), f.ordinal()))
        .collect();
    assert_eq!(
        ordinals,
        vec![
            ("r".to_string(), Some(0)),
            ("_packed".to_string(), Some(1)),
            ("White".to_string(), None),
            ("g".to_string(), Some(2)),
        ]
    );
    let layout = color.value_layout(registry).unwrap().unwrap();
    assert_eq!(layout.field_count, 4);

    let size = registry.get(registry.resolve_native(unbound).unwrap()).unwrap();
    let fields = size.fields(registry).unwrap();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].ordinal(), None);
    assert_eq!(size.value_layout(registry).unwrap(), None);
}

#[test]
fn test_field_accessor_override() {
    let harness = TestHarness::new();
    let int = harness.native_id("System.Int32");
    let transform = harness
        .host
        .define("Engine.Transform", NativeTypeKind::Class)
        .field("depth", int)
        .build();
    let depth = harness.host.field_named(transform, "depth").unwrap();
    let written = Arc::new(Mutex::new(None));
    let sink = written.clone();
    harness.registry.register_field_accessor(
        depth,
        FieldAccessor::new(
            |_| Ok(Value::Int32(99)),
            move |_, value| {
                *sink.lock().unwrap() = Some(value);
                Ok(())
            },
        ),
    );
    let registry = &harness.registry;

    let handle = registry.resolve_native(transform).unwrap();
    let field = registry
        .get(handle)
        .unwrap()
        .get_field_by_name(registry, "depth")
        .unwrap()
        .unwrap();
    assert!(matches!(field.binding(), FieldBinding::Accessor { .. }));

    let object = registry.instantiate(handle).unwrap();
    assert_eq!(field.get_value(registry, Some(&object)).unwrap(), Value::Int32(99));
    field.set_value(registry, Some(&object), Value::Int32(3)).unwrap();
    assert_eq!(*written.lock().unwrap(), Some(Value::Int32(3)));
}

#[test]
fn test_value_type_fields_are_materialized() {
    let harness = TestHarness::new();
    harness.load(
        "Game",
        vec![
            TypeDefinitionBuilder::value_type("Game", "Vec2")
                .field("x", TypeRef::named("System.Single"))
                .field("y", TypeRef::named("System.Single"))
                .build(),
            TypeDefinitionBuilder::class("Game", "Body")
                .field("position", TypeRef::named("Game.Vec2"))
                .field("mass", TypeRef::named("System.Double"))
                .build(),
        ],
    );
    let registry = &harness.registry;
    let vec2 = harness.ty("Game.Vec2");
    let body = registry.instantiate(harness.ty("Game.Body")).unwrap();
    let body = body.downcast_ref::<Instance>().unwrap();

    let position = body.get(0).unwrap();
    let position = position.as_object().unwrap().downcast_ref::<Instance>().unwrap();
    assert_eq!(position.type_handle(), vec2);
    assert_eq!(position.get(0), Some(Value::Float32(0.0)));
    assert_eq!(body.get(1), Some(Value::Float64(0.0)));
}

#[test]
fn test_enum_underlying_type() {
    let harness = TestHarness::new();
    harness.load(
        "Game",
        vec![
            TypeDefinitionBuilder::enumeration("Game", "Mode", int32()).build(),
            TypeDefinitionBuilder::enumeration("Game", "Flags", TypeRef::named("System.Int64"))
                .base(TypeRef::named("System.Enum"))
                .build(),
        ],
    );
    let registry = &harness.registry;
    let mode = harness.model("Game.Mode");
    assert!(mode.is_enum());
    assert!(mode.is_value_type());
    assert_eq!(
        mode.enum_underlying_type(registry).unwrap(),
        Some(harness.ty("System.Int32"))
    );
    assert_eq!(mode.default_value(registry).unwrap(), DefaultValue::Integer);
    assert!(mode.can_assign_to(registry, harness.ty("System.Enum")).unwrap());

    let flags = harness.model("Game.Flags");
    assert_eq!(flags.base_type(registry).unwrap(), None);
    assert_eq!(flags.default_value(registry).unwrap(), DefaultValue::Long);
}

#[test]
fn test_native_sig_fields_use_canonical_composites() {
    let harness = TestHarness::new();
    let int = harness.native_id("System.Int32");
    let buffer = harness
        .host
        .define("Engine.Buffer", NativeTypeKind::Class)
        .field("data", NativeSig::Array(Box::new(int.into()), 1))
        .build();
    let registry = &harness.registry;
    let model = registry.get(registry.resolve_native(buffer).unwrap()).unwrap();
    let data = model.get_field_by_name(registry, "data").unwrap().unwrap();
    let ints = registry.make_array_type(harness.ty("System.Int32"), 1).unwrap();
    assert_eq!(data.field_type().resolved(), Some(ints));
}

#[test]
fn test_field_values_can_be_rooted_in_an_arena() {
    use gc_arena::{Arena, Rootable};

    type ValueArena = Arena<Rootable![Vec<Value>]>;

    let harness = TestHarness::new();
    hierarchy(&harness);
    let registry = &harness.registry;
    let hero = registry.instantiate(harness.ty("Game.Hero")).unwrap();
    let level = harness
        .model("Game.Hero")
        .get_field_by_name(registry, "level")
        .unwrap()
        .unwrap();
    level
        .set_value(registry, Some(&hero), Value::Int32(9))
        .unwrap();

    let mut arena = ValueArena::new(|_mc| vec![Value::Object(hero.clone()), Value::Int32(3)]);
    arena.collect_all();
    arena.mutate_root(|_mc, roots| {
        let Value::Object(rooted) = &roots[0] else {
            panic!("expected an object root, got {:?}", roots[0]);
        };
        assert_eq!(*rooted, hero);
        assert_eq!(
            level.get_value(registry, Some(rooted)).unwrap(),
            Value::Int32(9)
        );
        assert_eq!(roots[1], Value::Int32(3));
    });
}
