//! The type registry.
//!
//! Owns the arena of canonical type models and every index that leads into
//! it: native ids, module definitions, array and by-ref constructions and the
//! cross-binding adaptor table. All lookups are safe to race; the first
//! model registered for a key wins and every caller observes that handle.
use crate::{
    error::{Result, TypeLoadError},
    host::{FieldAccessor, NativeFieldId, NativeReflection, NativeTypeId},
    metadata::{ModuleId, ModuleMetadata, TypeDefId, TypeRef},
    types::{
        adaptor::AdaptorType,
        generics::{array_name, generic_name, GenericArguments, GenericContext, Signature},
        interpreted::{InterpretedType, TypeScope},
        members::MethodEntry,
        native::NativeType,
        statics::StaticStorage,
        TypeHandle, TypeInfo, TypeModel,
    },
    utils::sync::{Arc, AtomicU32, AtomicU64, Ordering, RwLock},
    value::{DefaultValue, ObjectRef, Value},
};
use dashmap::{mapref::entry::Entry, DashMap};
use gc_arena::{unsafe_empty_collect, Collect};
use std::hash::Hash;
use tracing::{debug, info};

/// Runs method bodies on behalf of the registry. Only static initializers
/// are ever invoked.
pub trait MethodInvoker: Send + Sync {
    fn invoke(&self, registry: &TypeRegistry, method: &MethodEntry) -> Result<(), String>;
}

impl<F> MethodInvoker for F
where
    F: Fn(&TypeRegistry, &MethodEntry) -> Result<(), String> + Send + Sync,
{
    fn invoke(&self, registry: &TypeRegistry, method: &MethodEntry) -> Result<(), String> {
        self(registry, method)
    }
}

#[derive(Clone, Debug)]
pub struct RegistryOptions {
    /// Leave static initializers unrun; statics keep their defaults.
    pub suppress_static_constructors: bool,
    pub record_stats: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            suppress_static_constructors: false,
            record_stats: true,
        }
    }
}

impl RegistryOptions {
    pub fn with_suppress_static_constructors(mut self, suppress: bool) -> Self {
        self.suppress_static_constructors = suppress;
        self
    }

    pub fn with_record_stats(mut self, record: bool) -> Self {
        self.record_stats = record;
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub type_count: usize,
    pub allocated_type_indices: u32,
    pub type_cache_hits: u64,
    pub type_cache_misses: u64,
    pub generic_cache_hits: u64,
    pub generic_cache_misses: u64,
    pub adaptor_count: usize,
}

pub struct TypeRegistry {
    host: Arc<dyn NativeReflection>,
    options: RegistryOptions,
    invoker: RwLock<Option<Arc<dyn MethodInvoker>>>,
    types: DashMap<u32, Arc<TypeModel>>,
    next_type_index: AtomicU32,
    modules: RwLock<Vec<Arc<dyn ModuleMetadata>>>,
    module_types: DashMap<String, (ModuleId, TypeDefId)>,
    native_types: DashMap<NativeTypeId, TypeHandle>,
    definitions: DashMap<(ModuleId, TypeDefId), TypeHandle>,
    arrays: DashMap<(TypeHandle, u32), TypeHandle>,
    by_refs: DashMap<TypeHandle, TypeHandle>,
    adaptors: DashMap<TypeHandle, TypeHandle>,
    field_accessors: DashMap<NativeFieldId, FieldAccessor>,
    value_type_binders: DashMap<NativeTypeId, ()>,
    pub type_cache_hits: AtomicU64,
    pub type_cache_misses: AtomicU64,
    pub generic_cache_hits: AtomicU64,
    pub generic_cache_misses: AtomicU64,
}
unsafe_empty_collect!(TypeRegistry);

impl TypeRegistry {
    pub fn new(host: Arc<dyn NativeReflection>) -> Self {
        Self::with_options(host, RegistryOptions::default())
    }

    pub fn with_options(host: Arc<dyn NativeReflection>, options: RegistryOptions) -> Self {
        Self {
            host,
            options,
            invoker: RwLock::new(None),
            types: DashMap::new(),
            next_type_index: AtomicU32::new(0),
            modules: RwLock::new(vec![]),
            module_types: DashMap::new(),
            native_types: DashMap::new(),
            definitions: DashMap::new(),
            arrays: DashMap::new(),
            by_refs: DashMap::new(),
            adaptors: DashMap::new(),
            field_accessors: DashMap::new(),
            value_type_binders: DashMap::new(),
            type_cache_hits: AtomicU64::new(0),
            type_cache_misses: AtomicU64::new(0),
            generic_cache_hits: AtomicU64::new(0),
            generic_cache_misses: AtomicU64::new(0),
        }
    }

    pub fn host(&self) -> &dyn NativeReflection {
        &*self.host
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    pub fn set_invoker(&self, invoker: Arc<dyn MethodInvoker>) {
        *self.invoker.write() = Some(invoker);
    }

    pub(crate) fn invoke(&self, method: &MethodEntry) -> Result<(), String> {
        let invoker = self.invoker.read().clone();
        match invoker {
            Some(invoker) => invoker.invoke(self, method),
            None => Ok(()),
        }
    }

    pub fn get(&self, handle: TypeHandle) -> Result<Arc<TypeModel>> {
        self.types
            .get(&handle.0)
            .map(|m| m.value().clone())
            .ok_or(TypeLoadError::InvalidHandle(handle.0))
    }

    /// The handle registered under a dense type index.
    pub fn type_by_index(&self, index: u32) -> Option<TypeHandle> {
        self.types.contains_key(&index).then_some(TypeHandle(index))
    }

    pub fn type_name(&self, handle: TypeHandle) -> String {
        match self.types.get(&handle.0) {
            Some(m) => m.full_name().to_string(),
            None => handle.to_string(),
        }
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Allocates the next type index and stores the model built for it.
    pub(crate) fn insert_model(&self, build: impl FnOnce(TypeHandle) -> TypeModel) -> TypeHandle {
        let handle = TypeHandle(self.next_type_index.fetch_add(1, Ordering::AcqRel));
        let model = build(handle);
        debug!("registered {:?}", model);
        self.types.insert(handle.0, Arc::new(model));
        handle
    }

    /// Returns the handle cached under `key`, or registers the model built
    /// by `build`. The key's shard stays locked while building, so racing
    /// callers all observe the winner's handle.
    fn intern<K: Eq + Hash>(
        &self,
        index: &DashMap<K, TypeHandle>,
        key: K,
        build: impl FnOnce(TypeHandle) -> TypeModel,
    ) -> TypeHandle {
        if let Some(found) = index.get(&key) {
            self.record_type_lookup(true);
            return *found;
        }
        match index.entry(key) {
            Entry::Occupied(e) => {
                self.record_type_lookup(true);
                *e.get()
            }
            Entry::Vacant(e) => {
                self.record_type_lookup(false);
                *e.insert(self.insert_model(build))
            }
        }
    }

    fn record_type_lookup(&self, hit: bool) {
        if !self.options.record_stats {
            return;
        }
        match hit {
            true => self.type_cache_hits.fetch_add(1, Ordering::Relaxed),
            false => self.type_cache_misses.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub(crate) fn record_generic_lookup(&self, hit: bool) {
        if !self.options.record_stats {
            return;
        }
        match hit {
            true => self.generic_cache_hits.fetch_add(1, Ordering::Relaxed),
            false => self.generic_cache_misses.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            type_count: self.types.len(),
            allocated_type_indices: self.next_type_index.load(Ordering::Acquire),
            type_cache_hits: self.type_cache_hits.load(Ordering::Relaxed),
            type_cache_misses: self.type_cache_misses.load(Ordering::Relaxed),
            generic_cache_hits: self.generic_cache_hits.load(Ordering::Relaxed),
            generic_cache_misses: self.generic_cache_misses.load(Ordering::Relaxed),
            adaptor_count: self.adaptors.len(),
        }
    }

    pub fn load_module(&self, module: Arc<dyn ModuleMetadata>) -> ModuleId {
        let mut modules = self.modules.write();
        let id = ModuleId(modules.len() as u32);
        let mut count = 0;
        for def_id in module.type_definitions() {
            if let Some(def) = module.type_definition(def_id) {
                self.module_types.insert(def.full_name(), (id, def_id));
                count += 1;
            }
        }
        info!("loaded module {} with {count} types", module.name());
        modules.push(module);
        id
    }

    pub fn module(&self, id: ModuleId) -> Option<Arc<dyn ModuleMetadata>> {
        self.modules.read().get(id.0 as usize).cloned()
    }

    /// The canonical model of a type defined in a loaded module.
    pub fn resolve_definition(&self, module: ModuleId, id: TypeDefId) -> Result<TypeHandle> {
        if let Some(found) = self.definitions.get(&(module, id)) {
            self.record_type_lookup(true);
            return Ok(*found);
        }
        let metadata = self
            .module(module)
            .ok_or_else(|| TypeLoadError::MissingMetadata {
                module: format!("module {}", module.0),
                descriptor: id.0,
            })?;
        let definition =
            metadata
                .type_definition(id)
                .ok_or_else(|| TypeLoadError::MissingMetadata {
                    module: metadata.name().to_string(),
                    descriptor: id.0,
                })?;
        Ok(self.intern(&self.definitions, (module, id), |handle| {
            InterpretedType::new_definition(handle, module, id, definition).into()
        }))
    }

    /// The canonical model of a native type.
    pub fn resolve_native(&self, id: NativeTypeId) -> Result<TypeHandle> {
        if let Some(found) = self.native_types.get(&id) {
            self.record_type_lookup(true);
            return Ok(*found);
        }
        let info = self
            .host
            .describe(id)
            .ok_or_else(|| TypeLoadError::TypeNotFound(format!("native type {}", id.0)))?;
        // Types the model refers to are resolved before the shard is locked.
        let element = info.element.map(|e| self.resolve_native(e)).transpose()?;
        let generic_definition = info
            .generic_definition
            .map(|d| self.resolve_native(d))
            .transpose()?;
        let generic_arguments = match info.generic_arguments.is_empty() {
            true => None,
            false => Some(GenericArguments::positional(
                &info
                    .generic_arguments
                    .iter()
                    .map(|a| self.resolve_native(*a))
                    .collect::<Result<Vec<_>>>()?,
            )),
        };
        let full_name = info.full_name.clone();
        Ok(self.intern(&self.native_types, id, |handle| {
            NativeType::new(
                handle,
                id,
                full_name,
                info,
                element,
                generic_definition,
                generic_arguments,
            )
            .into()
        }))
    }

    /// Looks a type up by full name, preferring loaded modules over the host.
    pub fn find_type(&self, name: &str) -> Result<Option<TypeHandle>> {
        let defined = self.module_types.get(name).map(|e| *e.value());
        if let Some((module, id)) = defined {
            return self.resolve_definition(module, id).map(Some);
        }
        match self.host.find_type(name) {
            Some(id) => self.resolve_native(id).map(Some),
            None => Ok(None),
        }
    }

    /// Resolves a closed type reference from a module.
    pub fn resolve_type_ref(&self, module: ModuleId, r: &TypeRef) -> Result<TypeHandle> {
        let owner = self
            .module(module)
            .map(|m| m.name().to_string())
            .unwrap_or_default();
        let scope = TypeScope {
            module,
            owner: &owner,
            type_parameters: &[],
            type_arguments: None,
            method_parameters: &[],
        };
        let signature = scope.resolve(self, r)?;
        signature
            .resolved()
            .ok_or_else(|| TypeLoadError::UnboundGenericParameter {
                type_name: owner.clone(),
                parameter: signature.display(self),
            })
    }

    /// Binds `signature` against the generic arguments of `context`. `None`
    /// when parameters remain unbound.
    pub fn resolve_generic_type(
        &self,
        signature: &Signature,
        context: TypeHandle,
    ) -> Result<Option<TypeHandle>> {
        let model = self.get(context)?;
        let resolved =
            signature.substitute(self, GenericContext::for_type(model.generic_arguments()))?;
        Ok(resolved.resolved())
    }

    pub fn make_generic_instance(
        &self,
        definition: TypeHandle,
        arguments: &[TypeHandle],
    ) -> Result<TypeHandle> {
        self.get(definition)?.make_generic_instance(self, arguments)
    }

    pub fn make_array_type(&self, element: TypeHandle, rank: u32) -> Result<TypeHandle> {
        if let Some(found) = self.arrays.get(&(element, rank)) {
            self.record_type_lookup(true);
            return Ok(*found);
        }
        let model = self.get(element)?;
        let Some(native) = model.as_native() else {
            let name = array_name(model.full_name(), rank);
            return Ok(self.intern(&self.arrays, (element, rank), |handle| {
                InterpretedType::new_array(handle, name, element, rank).into()
            }));
        };
        let id = self
            .host
            .make_array_type(native.native_id(), rank)
            .map_err(|reason| TypeLoadError::Instantiation {
                type_name: array_name(model.full_name(), rank),
                reason,
            })?;
        let handle = self.resolve_native(id)?;
        Ok(*self.arrays.entry((element, rank)).or_insert(handle))
    }

    pub fn make_by_ref_type(&self, element: TypeHandle) -> Result<TypeHandle> {
        if let Some(found) = self.by_refs.get(&element) {
            self.record_type_lookup(true);
            return Ok(*found);
        }
        let model = self.get(element)?;
        let Some(native) = model.as_native() else {
            let name = format!("{}&", model.full_name());
            return Ok(self.intern(&self.by_refs, element, |handle| {
                InterpretedType::new_by_ref(handle, name, element).into()
            }));
        };
        let id = self
            .host
            .make_by_ref_type(native.native_id())
            .map_err(|reason| TypeLoadError::Instantiation {
                type_name: format!("{}&", model.full_name()),
                reason,
            })?;
        let handle = self.resolve_native(id)?;
        Ok(*self.by_refs.entry(element).or_insert(handle))
    }

    /// Maps generic arguments to the native types handed to the host.
    /// Interpreted arguments are passed as their first native ancestor (or
    /// `System.Object`).
    pub(crate) fn host_generic_arguments(
        &self,
        arguments: &[TypeHandle],
    ) -> Result<Vec<NativeTypeId>> {
        let mut host_arguments = Vec::with_capacity(arguments.len());
        for argument in arguments {
            let model = self.get(*argument)?;
            host_arguments.push(match model.as_native() {
                Some(native) => native.native_id(),
                None => self.native_surrogate(&model)?,
            });
        }
        Ok(host_arguments)
    }

    /// Closes a native generic definition over `host_arguments` and models
    /// the result with the real arguments.
    pub(crate) fn close_native_generic(
        &self,
        definition: TypeHandle,
        definition_id: NativeTypeId,
        definition_name: &str,
        arguments: &[TypeHandle],
        host_arguments: &[NativeTypeId],
    ) -> Result<TypeHandle> {
        let argument_names: Vec<_> = arguments.iter().map(|a| self.type_name(*a)).collect();
        let closed = self
            .host
            .make_generic_type(definition_id, host_arguments)
            .map_err(|reason| TypeLoadError::GenericInstantiation {
                type_name: definition_name.to_string(),
                arguments: argument_names.clone(),
                reason,
            })?;
        let mut all_native = true;
        for argument in arguments {
            all_native &= self.get(*argument)?.as_native().is_some();
        }
        if all_native {
            return self.resolve_native(closed);
        }

        let info = self
            .host
            .describe(closed)
            .ok_or_else(|| TypeLoadError::TypeNotFound(format!("native type {}", closed.0)))?;
        let full_name = generic_name(definition_name, argument_names);
        let arguments = GenericArguments::positional(arguments);
        Ok(self.insert_model(|handle| {
            NativeType::new(
                handle,
                closed,
                full_name,
                info,
                None,
                Some(definition),
                Some(arguments),
            )
            .into()
        }))
    }

    fn native_surrogate(&self, model: &TypeModel) -> Result<NativeTypeId> {
        let ancestor = match model.as_interpreted() {
            Some(interpreted) => interpreted.settled_native_ancestor(self)?,
            None => model.first_native_ancestor(self)?,
        };
        if let Some(ancestor) = ancestor {
            if let Some(adaptor) = self.get(ancestor)?.as_adaptor() {
                return Ok(adaptor.adaptor_id());
            }
        }
        self.host
            .find_type("System.Object")
            .ok_or_else(|| TypeLoadError::TypeNotFound("System.Object".to_string()))
    }

    /// Registers `adaptor_class` as the stand-in for `native` whenever an
    /// interpreted type derives from or implements it.
    pub fn register_adaptor(
        &self,
        native: NativeTypeId,
        adaptor_class: NativeTypeId,
    ) -> Result<TypeHandle> {
        let native = self.resolve_native(native)?;
        let model = self.get(native)?;
        let class = self.host.describe(adaptor_class).ok_or_else(|| {
            TypeLoadError::TypeNotFound(format!("native type {}", adaptor_class.0))
        })?;
        match self.adaptors.entry(native) {
            Entry::Occupied(_) => Err(TypeLoadError::DuplicateAdaptor(
                model.full_name().to_string(),
            )),
            Entry::Vacant(e) => {
                let handle = self.insert_model(|handle| {
                    AdaptorType::new(handle, class.full_name, adaptor_class, native, &*model)
                        .into()
                });
                info!("adaptor {} bound to {}", self.type_name(handle), model.full_name());
                Ok(*e.insert(handle))
            }
        }
    }

    pub fn adaptor_for(&self, native: TypeHandle) -> Option<TypeHandle> {
        self.adaptors.get(&native).map(|a| *a)
    }

    /// Snapshot of (adapted native type, adaptor) pairs.
    pub fn adaptors(&self) -> Vec<(TypeHandle, TypeHandle)> {
        self.adaptors.iter().map(|e| (*e.key(), *e.value())).collect()
    }

    /// Overrides access to a native field. Must precede the first member
    /// lookup on the declaring type.
    pub fn register_field_accessor(&self, field: NativeFieldId, accessor: FieldAccessor) {
        self.field_accessors.insert(field, accessor);
    }

    pub(crate) fn field_accessor(&self, field: NativeFieldId) -> Option<FieldAccessor> {
        self.field_accessors.get(&field).map(|a| a.clone())
    }

    /// Marks a native value type as having an inline layout, exposing all of
    /// its instance fields with dense ordinals. Must precede the first
    /// member lookup on the type.
    pub fn register_value_type_binder(&self, ty: NativeTypeId) {
        self.value_type_binders.insert(ty, ());
    }

    pub fn has_value_type_binder(&self, ty: NativeTypeId) -> bool {
        self.value_type_binders.contains_key(&ty)
    }

    /// Static storage of an interpreted type; the first access runs its
    /// static initializer.
    pub fn static_storage(&self, ty: TypeHandle) -> Result<Arc<StaticStorage>> {
        let model = self.get(ty)?;
        match model.as_interpreted() {
            Some(interpreted) => interpreted.static_storage(self),
            None => Err(TypeLoadError::Instantiation {
                type_name: model.full_name().to_string(),
                reason: "static storage of native types belongs to the host".to_string(),
            }),
        }
    }

    /// Creates a default-initialized object of `ty`.
    pub fn instantiate(&self, ty: TypeHandle) -> Result<ObjectRef> {
        let model = self.get(ty)?;
        match &*model {
            TypeModel::NativeType(native) => self
                .host
                .create_default_instance(native.native_id())
                .map_err(|reason| TypeLoadError::Instantiation {
                    type_name: model.full_name().to_string(),
                    reason,
                }),
            TypeModel::InterpretedType(interpreted) => interpreted.create_instance(self),
            TypeModel::AdaptorType(_) => Err(TypeLoadError::Instantiation {
                type_name: model.full_name().to_string(),
                reason: "adaptors are never instantiated".to_string(),
            }),
        }
    }

    pub fn materialize(&self, default: DefaultValue) -> Result<Value> {
        match default {
            DefaultValue::ValueType(ty) => Ok(Value::Object(self.instantiate(ty)?)),
            scalar => Ok(scalar.scalar().unwrap_or_default()),
        }
    }
}
