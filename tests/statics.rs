mod common;

use common::{int32, TestHarness};
use hybrid_rt::{
    metadata::{memory::TypeDefinitionBuilder, TypeRef},
    resolve::RegistryOptions,
    types::{
        members::{FieldEntry, MethodEntry},
        statics::INIT_STATE_INITIALIZED,
        TypeInfo,
    },
    value::Value,
    TypeLoadError, TypeRegistry,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

fn counters(harness: &TestHarness) {
    harness.load(
        "Game",
        vec![
            TypeDefinitionBuilder::class("Game", "Counter")
                .static_field("count", int32())
                .static_constructor()
                .build(),
            TypeDefinitionBuilder::class("Game", "Plain")
                .static_field("count", int32())
                .build(),
            TypeDefinitionBuilder::class("Game", "Box")
                .generic_parameters(&["T"])
                .static_field("created", int32())
                .static_field("last", TypeRef::parameter("T"))
                .static_constructor()
                .build(),
        ],
    );
}

fn static_field(registry: &TypeRegistry, method: &MethodEntry, name: &str) -> FieldEntry {
    registry
        .get(method.declaring_type())
        .unwrap()
        .get_field_by_name(registry, name)
        .unwrap()
        .unwrap()
}

#[test]
fn test_initializer_runs_once_and_sees_defaults() {
    let harness = TestHarness::new();
    counters(&harness);
    let runs = Arc::new(AtomicUsize::new(0));
    let observed = Arc::new(Mutex::new(None));
    let (runs_in, observed_in) = (runs.clone(), observed.clone());
    harness.registry.set_invoker(Arc::new(
        move |registry: &TypeRegistry, method: &MethodEntry| -> Result<(), String> {
            runs_in.fetch_add(1, Ordering::SeqCst);
            let count = static_field(registry, method, "count");
            // Reentrant access proceeds with the storage as it stands.
            let seen = count.get_value(registry, None).map_err(|e| e.to_string())?;
            *observed_in.lock().unwrap() = Some(seen);
            count
                .set_value(registry, None, Value::Int32(42))
                .map_err(|e| e.to_string())
        },
    ));
    let registry = &harness.registry;
    let counter = harness.model("Game.Counter");
    let count = counter.get_field_by_name(registry, "count").unwrap().unwrap();

    assert_eq!(count.get_value(registry, None).unwrap(), Value::Int32(42));
    assert_eq!(count.get_value(registry, None).unwrap(), Value::Int32(42));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(*observed.lock().unwrap(), Some(Value::Int32(0)));

    let storage = registry.static_storage(counter.handle()).unwrap();
    assert_eq!(storage.init_state(), INIT_STATE_INITIALIZED);
    assert_eq!(storage.len(), 1);
}

#[test]
fn test_types_without_initializer_use_defaults() {
    let harness = TestHarness::new();
    counters(&harness);
    let registry = &harness.registry;
    let plain = harness.model("Game.Plain");
    let count = plain.get_field_by_name(registry, "count").unwrap().unwrap();
    assert_eq!(count.get_value(registry, None).unwrap(), Value::Int32(0));
    count.set_value(registry, None, Value::Int32(3)).unwrap();
    assert_eq!(count.get_value(registry, None).unwrap(), Value::Int32(3));
}

#[test]
fn test_suppressed_initializers_never_run() {
    let harness = TestHarness::with_options(
        RegistryOptions::default().with_suppress_static_constructors(true),
    );
    counters(&harness);
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_in = runs.clone();
    harness.registry.set_invoker(Arc::new(
        move |_: &TypeRegistry, _: &MethodEntry| -> Result<(), String> {
            runs_in.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    ));
    let registry = &harness.registry;
    let count = harness
        .model("Game.Counter")
        .get_field_by_name(registry, "count")
        .unwrap()
        .unwrap();
    assert_eq!(count.get_value(registry, None).unwrap(), Value::Int32(0));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_initializer_failure_is_sticky() {
    let harness = TestHarness::new();
    counters(&harness);
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_in = runs.clone();
    harness.registry.set_invoker(Arc::new(
        move |_: &TypeRegistry, _: &MethodEntry| -> Result<(), String> {
            runs_in.fetch_add(1, Ordering::SeqCst);
            Err("boom".to_string())
        },
    ));
    let registry = &harness.registry;
    let counter = harness.ty("Game.Counter");
    let expected = TypeLoadError::StaticInitializer {
        type_name: "Game.Counter".to_string(),
        reason: "boom".to_string(),
    };
    for _ in 0..2 {
        match registry.static_storage(counter) {
            Err(e) => assert_eq!(e, expected),
            Ok(_) => panic!("a failed initializer must not be retried"),
        }
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_first_access_runs_initializer_once() {
    let harness = TestHarness::new();
    counters(&harness);
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_in = runs.clone();
    harness.registry.set_invoker(Arc::new(
        move |registry: &TypeRegistry, method: &MethodEntry| -> Result<(), String> {
            runs_in.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(20));
            static_field(registry, method, "count")
                .set_value(registry, None, Value::Int32(7))
                .map_err(|e| e.to_string())
        },
    ));
    let registry = &harness.registry;
    let counter = harness.model("Game.Counter");
    let count = counter.get_field_by_name(registry, "count").unwrap().unwrap();

    let seen: Vec<Value> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..8)
            .map(|_| s.spawn(|| count.get_value(registry, None).unwrap()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    // Waiters only return once the initializer has finished.
    assert!(seen.iter().all(|v| *v == Value::Int32(7)));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_each_closed_generic_has_its_own_statics() {
    let harness = TestHarness::new();
    counters(&harness);
    let initialized = Arc::new(Mutex::new(vec![]));
    let initialized_in = initialized.clone();
    harness.registry.set_invoker(Arc::new(
        move |registry: &TypeRegistry, method: &MethodEntry| -> Result<(), String> {
            initialized_in
                .lock()
                .unwrap()
                .push(registry.type_name(method.declaring_type()));
            Ok(())
        },
    ));
    let registry = &harness.registry;
    let boxed = harness.ty("Game.Box");
    let ints = registry
        .make_generic_instance(boxed, &[harness.ty("System.Int32")])
        .unwrap();
    let strings = registry
        .make_generic_instance(boxed, &[harness.ty("System.String")])
        .unwrap();

    let created_int = registry
        .get(ints)
        .unwrap()
        .get_field_by_name(registry, "created")
        .unwrap()
        .unwrap();
    let created_string = registry
        .get(strings)
        .unwrap()
        .get_field_by_name(registry, "created")
        .unwrap()
        .unwrap();
    created_int.set_value(registry, None, Value::Int32(5)).unwrap();
    assert_eq!(created_int.get_value(registry, None).unwrap(), Value::Int32(5));
    assert_eq!(created_string.get_value(registry, None).unwrap(), Value::Int32(0));

    let last = registry
        .get(strings)
        .unwrap()
        .get_field_by_name(registry, "last")
        .unwrap()
        .unwrap();
    assert!(last.get_value(registry, None).unwrap().is_null());

    assert_eq!(
        *initialized.lock().unwrap(),
        vec![
            "Game.Box<System.Int32>".to_string(),
            "Game.Box<System.String>".to_string()
        ]
    );
    assert!(matches!(
        registry.static_storage(boxed),
        Err(TypeLoadError::Instantiation { .. })
    ));
    assert!(matches!(
        registry.static_storage(harness.ty("System.Int32")),
        Err(TypeLoadError::Instantiation { .. })
    ));
}
