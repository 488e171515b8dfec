#![allow(dead_code)]

use hybrid_rt::{
    host::{memory::MemoryHost, NativeReflection, NativeTypeId},
    metadata::{memory::MemoryModule, ModuleId, TypeDefinition, TypeRef},
    resolve::{RegistryOptions, TypeRegistry},
    types::{TypeHandle, TypeModel},
};
use std::sync::Arc;

pub struct TestHarness {
    pub host: Arc<MemoryHost>,
    pub registry: TypeRegistry,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(RegistryOptions::default())
    }

    pub fn with_options(options: RegistryOptions) -> Self {
        let host = Arc::new(MemoryHost::with_core_types());
        let registry = TypeRegistry::with_options(host.clone() as Arc<dyn NativeReflection>, options);
        Self { host, registry }
    }

    pub fn load(&self, name: &str, definitions: Vec<TypeDefinition>) -> ModuleId {
        let mut module = MemoryModule::new(name);
        for definition in definitions {
            module.define(definition);
        }
        self.registry.load_module(Arc::new(module))
    }

    pub fn native_id(&self, name: &str) -> NativeTypeId {
        self.host
            .type_named(name)
            .unwrap_or_else(|| panic!("native type {name} is not defined"))
    }

    pub fn ty(&self, name: &str) -> TypeHandle {
        self.registry
            .find_type(name)
            .unwrap()
            .unwrap_or_else(|| panic!("type {name} is not defined"))
    }

    pub fn model(&self, name: &str) -> Arc<TypeModel> {
        self.registry.get(self.ty(name)).unwrap()
    }
}

pub fn int32() -> TypeRef {
    TypeRef::named("System.Int32")
}

pub fn string() -> TypeRef {
    TypeRef::named("System.String")
}

pub fn object() -> TypeRef {
    TypeRef::named("System.Object")
}
