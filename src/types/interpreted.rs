//! Models of types defined in portable modules.
//!
//! Member indexes are built from module metadata on first use. Base types
//! and interfaces that resolve to native types are replaced by their
//! registered cross-binding adaptors.
use crate::{
    error::{Result, TypeLoadError},
    host::WellKnownType,
    metadata::{FieldToken, ModuleId, TypeDefId, TypeDefinition, TypeKind, TypeRef},
    resolve::TypeRegistry,
    types::{
        find_override,
        generics::{generic_name, GenericArguments, GenericContext, GenericInstanceCache, Signature},
        layout::ValueLayout,
        members::{
            select_overload, FieldBinding, FieldData, FieldEntry, MethodData, MethodEntry,
            MethodQuery, MethodSource,
        },
        statics::{StaticInitResult, StaticStorage},
        TypeHandle, TypeInfo, TypeModel,
    },
    utils::sync::{Arc, BuildOnce},
    value::{DefaultValue, Instance, ObjectRef, Value},
};
use std::{cell::RefCell, collections::HashMap};
use tracing::{debug, trace, warn};

/// Resolves module type references for members of one type.
pub(crate) struct TypeScope<'a> {
    pub module: ModuleId,
    pub owner: &'a str,
    pub type_parameters: &'a [String],
    pub type_arguments: Option<&'a GenericArguments>,
    pub method_parameters: &'a [String],
}

impl TypeScope<'_> {
    /// Resolves `r`, binding every parameter the scope has arguments for.
    pub(crate) fn resolve(&self, registry: &TypeRegistry, r: &TypeRef) -> Result<Signature> {
        self.open(registry, r)?
            .substitute(registry, GenericContext::for_type(self.type_arguments))
    }

    fn open(&self, registry: &TypeRegistry, r: &TypeRef) -> Result<Signature> {
        Ok(match r {
            TypeRef::Defined(id) => Signature::Type(registry.resolve_definition(self.module, *id)?),
            TypeRef::Named(name) => Signature::Type(
                registry
                    .find_type(name)?
                    .ok_or_else(|| TypeLoadError::TypeNotFound(name.clone()))?,
            ),
            TypeRef::GenericParameter(name) => {
                if let Some(position) = self.method_parameters.iter().position(|p| p == name) {
                    Signature::MethodParameter {
                        name: name.clone(),
                        position,
                    }
                } else if let Some(position) = self.type_parameters.iter().position(|p| p == name)
                {
                    Signature::TypeParameter {
                        name: name.clone(),
                        position,
                    }
                } else {
                    return Err(TypeLoadError::UnboundGenericParameter {
                        type_name: self.owner.to_string(),
                        parameter: name.clone(),
                    });
                }
            }
            TypeRef::Array(inner, rank) => {
                Signature::Array(Box::new(self.open(registry, inner)?), *rank)
            }
            TypeRef::ByRef(inner) => Signature::ByRef(Box::new(self.open(registry, inner)?)),
            TypeRef::GenericInstance {
                definition,
                arguments,
            } => match self.open(registry, definition)? {
                Signature::Type(definition) => Signature::Generic {
                    definition,
                    arguments: arguments
                        .iter()
                        .map(|a| self.open(registry, a))
                        .collect::<Result<_>>()?,
                },
                other => {
                    return Err(TypeLoadError::UnboundGenericParameter {
                        type_name: self.owner.to_string(),
                        parameter: other.display(registry),
                    })
                }
            },
        })
    }
}

enum Shape {
    Definition {
        module: ModuleId,
        id: TypeDefId,
        definition: Arc<TypeDefinition>,
    },
    Array {
        element: TypeHandle,
        rank: u32,
    },
    ByRef {
        element: TypeHandle,
    },
}

#[derive(Clone, Copy, Default)]
struct Ancestry {
    base: Option<TypeHandle>,
    /// The adaptor standing in for the first native class in the chain.
    first_native_base: Option<TypeHandle>,
    is_delegate: bool,
}

#[derive(Default)]
struct InterfaceSet {
    interfaces: Vec<TypeHandle>,
    first_native_interface: Option<TypeHandle>,
}

#[derive(Default)]
struct FieldIndex {
    instance: Vec<FieldEntry>,
    statics: Vec<FieldEntry>,
    by_token: HashMap<FieldToken, FieldEntry>,
    by_name: HashMap<String, FieldEntry>,
    field_start: usize,
}

#[derive(Default)]
struct MethodIndex {
    methods: Vec<MethodEntry>,
    constructors: Vec<MethodEntry>,
    static_constructor: Option<MethodEntry>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ancestry,
    Interfaces,
}

thread_local! {
    /// Ancestries and interface sets being built on this thread, innermost last.
    static RESOLVING: RefCell<Vec<(TypeHandle, Phase)>> = const { RefCell::new(Vec::new()) };
}

/// Marks one type's ancestry or interface set as under construction until
/// dropped.
struct Resolving {
    handle: TypeHandle,
    phase: Phase,
}

impl Resolving {
    /// Fails with the chain of types leading back to `handle` if it is
    /// already under construction.
    fn enter(handle: TypeHandle, phase: Phase) -> std::result::Result<Self, Vec<TypeHandle>> {
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(start) = stack.iter().position(|e| *e == (handle, phase)) {
                let mut cycle: Vec<_> = stack[start..]
                    .iter()
                    .filter(|(_, p)| *p == phase)
                    .map(|(h, _)| *h)
                    .collect();
                cycle.push(handle);
                return Err(cycle);
            }
            stack.push((handle, phase));
            Ok(Self { handle, phase })
        })
    }

    fn is_active(handle: TypeHandle, phase: Phase) -> bool {
        RESOLVING.with(|stack| stack.borrow().contains(&(handle, phase)))
    }
}

impl Drop for Resolving {
    fn drop(&mut self) {
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(i) = stack.iter().rposition(|e| *e == (self.handle, self.phase)) {
                stack.remove(i);
            }
        });
    }
}

pub struct InterpretedType {
    handle: TypeHandle,
    full_name: String,
    shape: Shape,
    generic_arguments: Option<GenericArguments>,
    generic_definition: Option<TypeHandle>,
    generic_parameters: Vec<String>,
    ancestry: BuildOnce<Ancestry>,
    interfaces: BuildOnce<InterfaceSet>,
    fields: BuildOnce<FieldIndex>,
    methods: BuildOnce<MethodIndex>,
    generic_instances: GenericInstanceCache<TypeHandle>,
    statics: BuildOnce<Arc<StaticStorage>>,
    layout: BuildOnce<Option<ValueLayout>>,
}

impl InterpretedType {
    fn with_shape(
        handle: TypeHandle,
        full_name: String,
        shape: Shape,
        generic_arguments: Option<GenericArguments>,
        generic_definition: Option<TypeHandle>,
    ) -> Self {
        let generic_parameters = match &shape {
            Shape::Definition { definition, .. } => definition.generic_parameters.clone(),
            _ => vec![],
        };
        Self {
            handle,
            full_name,
            shape,
            generic_arguments,
            generic_definition,
            generic_parameters,
            ancestry: BuildOnce::new(),
            interfaces: BuildOnce::new(),
            fields: BuildOnce::new(),
            methods: BuildOnce::new(),
            generic_instances: GenericInstanceCache::new(),
            statics: BuildOnce::new(),
            layout: BuildOnce::new(),
        }
    }

    pub(crate) fn new_definition(
        handle: TypeHandle,
        module: ModuleId,
        id: TypeDefId,
        definition: Arc<TypeDefinition>,
    ) -> Self {
        let full_name = definition.full_name();
        Self::with_shape(
            handle,
            full_name,
            Shape::Definition {
                module,
                id,
                definition,
            },
            None,
            None,
        )
    }

    pub(crate) fn new_array(
        handle: TypeHandle,
        full_name: String,
        element: TypeHandle,
        rank: u32,
    ) -> Self {
        Self::with_shape(handle, full_name, Shape::Array { element, rank }, None, None)
    }

    pub(crate) fn new_by_ref(handle: TypeHandle, full_name: String, element: TypeHandle) -> Self {
        Self::with_shape(handle, full_name, Shape::ByRef { element }, None, None)
    }

    pub fn module(&self) -> Option<ModuleId> {
        match &self.shape {
            Shape::Definition { module, .. } => Some(*module),
            _ => None,
        }
    }

    pub fn definition(&self) -> Option<&Arc<TypeDefinition>> {
        match &self.shape {
            Shape::Definition { definition, .. } => Some(definition),
            _ => None,
        }
    }

    pub(crate) fn layout_cache(&self) -> &BuildOnce<Option<ValueLayout>> {
        &self.layout
    }

    pub fn generic_instance_count(&self) -> usize {
        self.generic_instances.len()
    }

    fn scope<'a>(&'a self, method_parameters: &'a [String]) -> Option<TypeScope<'a>> {
        match &self.shape {
            Shape::Definition { module, .. } => Some(TypeScope {
                module: *module,
                owner: &self.full_name,
                type_parameters: &self.generic_parameters,
                type_arguments: self.generic_arguments.as_ref(),
                method_parameters,
            }),
            _ => None,
        }
    }

    fn resolving(&self, registry: &TypeRegistry, phase: Phase) -> Result<Resolving> {
        Resolving::enter(self.handle, phase).map_err(|cycle| TypeLoadError::InheritanceCycle {
            type_name: self.full_name.clone(),
            path: cycle.into_iter().map(|t| registry.type_name(t)).collect(),
        })
    }

    fn ancestry(&self, registry: &TypeRegistry) -> Result<Ancestry> {
        self.ancestry
            .get_or_try_build(|| {
                let _resolving = self.resolving(registry, Phase::Ancestry)?;
                self.resolve_ancestry(registry)
            })
            .copied()
    }

    fn resolve_ancestry(&self, registry: &TypeRegistry) -> Result<Ancestry> {
        let (Shape::Definition { definition, .. }, Some(scope)) = (&self.shape, self.scope(&[]))
        else {
            return Ok(Ancestry::default());
        };
        let Some(base_ref) = &definition.base else {
            return Ok(Ancestry::default());
        };

        if let Some(adaptor) = self.self_referential_bridge(registry, &scope, base_ref)? {
            return Ok(Ancestry {
                base: Some(adaptor),
                first_native_base: Some(adaptor),
                is_delegate: false,
            });
        }

        let base = match scope.resolve(registry, base_ref)? {
            Signature::Type(base) => base,
            // The open definition of a generic type derives from the open
            // definition of its generic base; native ones are never adapted.
            Signature::Generic { definition, .. } => {
                if registry.get(definition)?.as_native().is_some() {
                    return Ok(Ancestry {
                        base: Some(definition),
                        ..Ancestry::default()
                    });
                }
                definition
            }
            other => {
                return Err(TypeLoadError::UnboundGenericParameter {
                    type_name: self.full_name.clone(),
                    parameter: other.display(registry),
                })
            }
        };
        let model = registry.get(base)?;
        Ok(match &*model {
            TypeModel::NativeType(native) => match native.info().well_known {
                Some(WellKnownType::Object | WellKnownType::ValueType | WellKnownType::Enum) => {
                    Ancestry::default()
                }
                Some(WellKnownType::Delegate | WellKnownType::MulticastDelegate) => Ancestry {
                    is_delegate: true,
                    ..Ancestry::default()
                },
                None => {
                    let adaptor = registry.adaptor_for(base).ok_or_else(|| {
                        TypeLoadError::MissingAdaptor {
                            type_name: self.full_name.clone(),
                            native: native.full_name().to_string(),
                        }
                    })?;
                    Ancestry {
                        base: Some(adaptor),
                        first_native_base: Some(adaptor),
                        is_delegate: native.info().is_delegate,
                    }
                }
            },
            TypeModel::InterpretedType(interpreted) => {
                let inherited = interpreted.ancestry(registry)?;
                Ancestry {
                    base: Some(base),
                    first_native_base: inherited.first_native_base,
                    is_delegate: inherited.is_delegate,
                }
            }
            TypeModel::AdaptorType(_) => Ancestry {
                base: Some(base),
                first_native_base: Some(base),
                is_delegate: model.is_delegate(registry)?,
            },
        })
    }

    fn refers_to_self(&self, r: &TypeRef) -> bool {
        match (&self.shape, r) {
            (Shape::Definition { id, .. }, TypeRef::Defined(other)) => id == other,
            (Shape::Definition { definition, .. }, TypeRef::Named(name)) => {
                self.generic_arguments.is_none() && *name == definition.full_name()
            }
            _ => false,
        }
    }

    /// The adaptor bridging `r` when it closes a native generic over this
    /// type itself.
    fn self_referential_bridge(
        &self,
        registry: &TypeRegistry,
        scope: &TypeScope<'_>,
        r: &TypeRef,
    ) -> Result<Option<TypeHandle>> {
        let TypeRef::GenericInstance {
            definition: generic,
            arguments,
        } = r
        else {
            return Ok(None);
        };
        let self_slots: Vec<bool> = arguments.iter().map(|a| self.refers_to_self(a)).collect();
        if !self_slots.contains(&true) {
            return Ok(None);
        }
        let Signature::Type(generic) = scope.resolve(registry, generic)? else {
            return Ok(None);
        };
        if registry.get(generic)?.as_native().is_none() {
            return Ok(None);
        }
        self.self_referential_adaptor(registry, scope, generic, arguments, &self_slots)
            .map(Some)
    }

    /// Handles `class T : NativeBase<T>` and `class T : INative<T>`.
    /// Resolving the argument would need this type's own ancestry, so
    /// instead the registered adaptors are searched for a closure of the
    /// native definition whose self slots hold the adaptor's own class.
    fn self_referential_adaptor(
        &self,
        registry: &TypeRegistry,
        scope: &TypeScope<'_>,
        generic: TypeHandle,
        arguments: &[TypeRef],
        self_slots: &[bool],
    ) -> Result<TypeHandle> {
        let mut expected = Vec::with_capacity(arguments.len());
        for (argument, is_self) in arguments.iter().zip(self_slots) {
            expected.push(match is_self {
                true => None,
                false => scope.resolve(registry, argument)?.resolved(),
            });
        }
        for (native, adaptor) in registry.adaptors() {
            let native_model = registry.get(native)?;
            if native_model.generic_definition() != Some(generic) {
                continue;
            }
            let Some(actual) = native_model.generic_arguments() else {
                continue;
            };
            let actual = actual.types();
            let marker = match registry.get(adaptor)?.as_adaptor() {
                Some(a) => registry.resolve_native(a.adaptor_id())?,
                None => continue,
            };
            let matches = actual.len() == expected.len()
                && actual.iter().zip(&expected).all(|(a, e)| match e {
                    None => *a == marker,
                    Some(e) => a == e,
                });
            if matches {
                trace!(
                    "{} binds self-referential base through {}",
                    self.full_name,
                    registry.type_name(adaptor)
                );
                return Ok(adaptor);
            }
        }
        Err(TypeLoadError::MissingAdaptor {
            type_name: self.full_name.clone(),
            native: generic_name(
                &registry.type_name(generic),
                arguments.iter().map(|a| a.to_string()),
            ),
        })
    }

    fn interface_set(&self, registry: &TypeRegistry) -> Result<&InterfaceSet> {
        self.interfaces.get_or_try_build(|| {
            let _resolving = self.resolving(registry, Phase::Interfaces)?;
            self.resolve_interfaces(registry)
        })
    }

    /// Only the first native ancestor is bridged. Native interfaces after it,
    /// including those after a bridge inherited from an interpreted base,
    /// are kept as bare native types.
    fn resolve_interfaces(&self, registry: &TypeRegistry) -> Result<InterfaceSet> {
        let (Shape::Definition { definition, .. }, Some(scope)) = (&self.shape, self.scope(&[]))
        else {
            return Ok(InterfaceSet::default());
        };
        let ancestry = self.ancestry(registry)?;
        let inherited = match ancestry.base {
            Some(base) => match registry.get(base)?.as_interpreted() {
                Some(base) => base.interface_set(registry)?.first_native_interface,
                None => None,
            },
            None => None,
        };
        let mut bridge = ancestry.first_native_base.or(inherited);
        let mut set = InterfaceSet::default();
        for interface_ref in &definition.interfaces {
            if bridge.is_none() {
                let adaptor = self.self_referential_bridge(registry, &scope, interface_ref)?;
                if let Some(adaptor) = adaptor {
                    bridge = Some(adaptor);
                    set.first_native_interface = Some(adaptor);
                    set.interfaces.push(adaptor);
                    continue;
                }
            }
            let interface = match scope.resolve(registry, interface_ref)? {
                Signature::Type(i) => i,
                Signature::Generic { definition, .. } => {
                    set.interfaces.push(definition);
                    continue;
                }
                other => {
                    return Err(TypeLoadError::UnboundGenericParameter {
                        type_name: self.full_name.clone(),
                        parameter: other.display(registry),
                    })
                }
            };
            let model = registry.get(interface)?;
            let Some(native) = model.as_native() else {
                set.interfaces.push(interface);
                continue;
            };
            if bridge.is_some() {
                set.interfaces.push(interface);
                continue;
            }
            let adaptor = registry.adaptor_for(interface).ok_or_else(|| {
                TypeLoadError::MissingAdaptor {
                    type_name: self.full_name.clone(),
                    native: native.full_name().to_string(),
                }
            })?;
            trace!(
                "{} bridges {} through {}",
                self.full_name,
                native.full_name(),
                registry.type_name(adaptor)
            );
            bridge = Some(adaptor);
            set.first_native_interface = Some(adaptor);
            set.interfaces.push(adaptor);
        }
        if set.first_native_interface.is_none() {
            set.first_native_interface = inherited;
        }
        Ok(set)
    }

    /// The base type when it is itself interpreted.
    pub(crate) fn interpreted_base(&self, registry: &TypeRegistry) -> Result<Option<TypeHandle>> {
        match self.ancestry(registry)?.base {
            Some(base) if registry.get(base)?.as_interpreted().is_some() => Ok(Some(base)),
            _ => Ok(None),
        }
    }

    pub fn first_native_base(&self, registry: &TypeRegistry) -> Result<Option<TypeHandle>> {
        Ok(self.ancestry(registry)?.first_native_base)
    }

    pub fn first_native_interface(&self, registry: &TypeRegistry) -> Result<Option<TypeHandle>> {
        Ok(self.interface_set(registry)?.first_native_interface)
    }

    /// The first native ancestor as far as it is known without re-entering
    /// an ancestry or interface set this thread is still building.
    pub(crate) fn settled_native_ancestor(
        &self,
        registry: &TypeRegistry,
    ) -> Result<Option<TypeHandle>> {
        if Resolving::is_active(self.handle, Phase::Ancestry) {
            return Ok(None);
        }
        if let Some(base) = self.first_native_base(registry)? {
            return Ok(Some(base));
        }
        if Resolving::is_active(self.handle, Phase::Interfaces) {
            return Ok(None);
        }
        self.first_native_interface(registry)
    }

    fn field_index(&self, registry: &TypeRegistry) -> Result<&FieldIndex> {
        self.fields.get_or_try_build(|| -> Result<FieldIndex> {
            let (Shape::Definition { definition, .. }, Some(scope)) = (&self.shape, self.scope(&[]))
            else {
                return Ok(FieldIndex::default());
            };
            trace!("indexing fields of {}", self.full_name);
            let field_start = match self.interpreted_base(registry)? {
                Some(base) => registry.get(base)?.total_field_count(registry)?,
                None => 0,
            };
            let has_statics = !self.is_generic_definition();
            let mut index = FieldIndex {
                field_start,
                ..FieldIndex::default()
            };
            for field in &definition.fields {
                if field.is_static && !has_statics {
                    continue;
                }
                let (ordinal, slot) = if field.is_static {
                    (None, index.statics.len())
                } else {
                    let ordinal = field_start + index.instance.len();
                    (Some(ordinal), ordinal)
                };
                let entry = FieldEntry::new(FieldData {
                    name: field.name.clone(),
                    declaring_type: self.handle,
                    field_type: scope.resolve(registry, &field.field_type)?,
                    token: field.token,
                    is_static: field.is_static,
                    ordinal,
                    binding: FieldBinding::Slot(slot),
                });
                index.by_token.insert(field.token, entry.clone());
                index.by_name.insert(field.name.clone(), entry.clone());
                if field.is_static {
                    index.statics.push(entry);
                } else {
                    index.instance.push(entry);
                }
            }
            Ok(index)
        })
    }

    pub(crate) fn instance_fields(&self, registry: &TypeRegistry) -> Result<Vec<FieldEntry>> {
        Ok(self.field_index(registry)?.instance.clone())
    }

    pub fn static_fields(&self, registry: &TypeRegistry) -> Result<Vec<FieldEntry>> {
        Ok(self.field_index(registry)?.statics.clone())
    }

    /// The first ordinal of this type's own instance fields.
    pub fn field_start_index(&self, registry: &TypeRegistry) -> Result<usize> {
        Ok(self.field_index(registry)?.field_start)
    }

    fn method_index(&self, registry: &TypeRegistry) -> Result<&MethodIndex> {
        self.methods.get_or_try_build(|| -> Result<MethodIndex> {
            let Shape::Definition {
                module, definition, ..
            } = &self.shape
            else {
                return Ok(MethodIndex::default());
            };
            trace!("indexing methods of {}", self.full_name);
            let mut index = MethodIndex::default();
            for method in &definition.methods {
                let Some(scope) = self.scope(&method.generic_parameters) else {
                    break;
                };
                let mut data = MethodData::new(
                    method.name.clone(),
                    self.handle,
                    MethodSource::Interpreted {
                        module: *module,
                        token: method.token,
                    },
                );
                data.parameters = method
                    .parameters
                    .iter()
                    .map(|p| scope.resolve(registry, p))
                    .collect::<Result<_>>()?;
                data.return_type = match &method.return_type {
                    Some(r) => Some(scope.resolve(registry, r)?),
                    None => None,
                };
                data.generic_parameters = method.generic_parameters.clone();
                data.is_static = method.is_static;
                data.is_constructor = method.is_constructor;
                data.is_virtual = !method.is_static && !method.is_constructor;
                data.has_body = method.has_body;
                let entry = MethodEntry::new(data);
                if method.is_static_constructor() {
                    index.static_constructor = Some(entry);
                } else if method.is_constructor {
                    index.constructors.push(entry);
                } else {
                    index.methods.push(entry);
                }
            }
            Ok(index)
        })
    }

    pub fn static_constructor(&self, registry: &TypeRegistry) -> Result<Option<MethodEntry>> {
        Ok(self.method_index(registry)?.static_constructor.clone())
    }

    /// Static storage of a closed type, running the static initializer on
    /// first access.
    pub fn static_storage(&self, registry: &TypeRegistry) -> Result<Arc<StaticStorage>> {
        if self.is_generic_definition() || self.definition().is_none() {
            return Err(TypeLoadError::Instantiation {
                type_name: self.full_name.clone(),
                reason: "type has no static storage".to_string(),
            });
        }
        let storage = self
            .statics
            .get_or_try_build(|| -> Result<Arc<StaticStorage>> {
                let values = self
                    .field_index(registry)?
                    .statics
                    .iter()
                    .map(|f| default_for(registry, f.field_type()))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(StaticStorage::new(values)))
            })?
            .clone();

        let initializer = match registry.options().suppress_static_constructors {
            true => None,
            false => self.static_constructor(registry)?,
        };
        loop {
            match storage.begin(initializer.is_some()) {
                StaticInitResult::Initialized | StaticInitResult::Recursive => return Ok(storage),
                StaticInitResult::Waiting => storage.wait_for_init(),
                StaticInitResult::Failed => {
                    return Err(TypeLoadError::StaticInitializer {
                        type_name: self.full_name.clone(),
                        reason: storage.failure().unwrap_or_default(),
                    })
                }
                StaticInitResult::Execute => {
                    let Some(initializer) = &initializer else {
                        storage.mark_initialized();
                        return Ok(storage);
                    };
                    debug!("running static initializer of {}", self.full_name);
                    return match registry.invoke(initializer) {
                        Ok(()) => {
                            storage.mark_initialized();
                            Ok(storage)
                        }
                        Err(reason) => {
                            warn!("static initializer of {} failed: {reason}", self.full_name);
                            storage.mark_failed(reason.clone());
                            Err(TypeLoadError::StaticInitializer {
                                type_name: self.full_name.clone(),
                                reason,
                            })
                        }
                    };
                }
            }
        }
    }

    /// Creates an object with every instance slot, inherited ones included,
    /// at its default.
    pub(crate) fn create_instance(&self, registry: &TypeRegistry) -> Result<ObjectRef> {
        if self.is_generic_definition() || self.is_interface() || self.definition().is_none() {
            return Err(TypeLoadError::Instantiation {
                type_name: self.full_name.clone(),
                reason: "type cannot be instantiated".to_string(),
            });
        }
        if self.is_value_type() {
            self.value_layout(registry)?;
        }
        let mut slots = vec![Value::Null; self.total_field_count(registry)?];
        let mut current = Some(self.handle);
        while let Some(handle) = current {
            let model = registry.get(handle)?;
            let Some(interpreted) = model.as_interpreted() else {
                break;
            };
            for field in &interpreted.field_index(registry)?.instance {
                if let Some(slot) = field.ordinal().and_then(|o| slots.get_mut(o)) {
                    *slot = default_for(registry, field.field_type())?;
                }
            }
            current = interpreted.interpreted_base(registry)?;
        }
        Ok(ObjectRef::new(Instance::new(self.handle, slots)))
    }

    fn base_model(&self, registry: &TypeRegistry) -> Result<Option<Arc<TypeModel>>> {
        match self.ancestry(registry)?.base {
            Some(base) => Ok(Some(registry.get(base)?)),
            None => Ok(None),
        }
    }
}

fn default_for(registry: &TypeRegistry, field_type: &Signature) -> Result<Value> {
    match field_type.resolved() {
        Some(t) => {
            let default = registry.get(t)?.default_value(registry)?;
            registry.materialize(default)
        }
        None => Ok(Value::Null),
    }
}

impl TypeInfo for InterpretedType {
    fn handle(&self) -> TypeHandle {
        self.handle
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn is_value_type(&self) -> bool {
        self.definition().is_some_and(|d| d.is_value_type())
    }

    fn is_interface(&self) -> bool {
        self.definition().is_some_and(|d| d.kind == TypeKind::Interface)
    }

    fn is_enum(&self) -> bool {
        self.definition().is_some_and(|d| d.kind == TypeKind::Enum)
    }

    fn is_primitive(&self) -> bool {
        false
    }

    fn array_rank(&self) -> u32 {
        match &self.shape {
            Shape::Array { rank, .. } => *rank,
            _ => 0,
        }
    }

    fn is_by_ref(&self) -> bool {
        matches!(self.shape, Shape::ByRef { .. })
    }

    fn element_type(&self) -> Option<TypeHandle> {
        match &self.shape {
            Shape::Array { element, .. } | Shape::ByRef { element } => Some(*element),
            Shape::Definition { .. } => None,
        }
    }

    fn generic_arguments(&self) -> Option<&GenericArguments> {
        self.generic_arguments.as_ref()
    }

    fn generic_definition(&self) -> Option<TypeHandle> {
        self.generic_definition
    }

    fn generic_parameters(&self) -> &[String] {
        &self.generic_parameters
    }

    fn is_delegate(&self, registry: &TypeRegistry) -> Result<bool> {
        Ok(self.ancestry(registry)?.is_delegate)
    }

    fn base_type(&self, registry: &TypeRegistry) -> Result<Option<TypeHandle>> {
        Ok(self.ancestry(registry)?.base)
    }

    fn interfaces(&self, registry: &TypeRegistry) -> Result<Vec<TypeHandle>> {
        Ok(self.interface_set(registry)?.interfaces.clone())
    }

    fn default_value(&self, registry: &TypeRegistry) -> Result<DefaultValue> {
        if self.is_enum() {
            return match self.enum_underlying_type(registry)? {
                Some(underlying) => registry.get(underlying)?.default_value(registry),
                None => Ok(DefaultValue::Integer),
            };
        }
        if self.is_value_type() && !self.is_generic_definition() {
            return Ok(DefaultValue::ValueType(self.handle));
        }
        Ok(DefaultValue::Null)
    }

    fn fields(&self, registry: &TypeRegistry) -> Result<Vec<FieldEntry>> {
        let index = self.field_index(registry)?;
        Ok(index.instance.iter().chain(&index.statics).cloned().collect())
    }

    fn get_field(&self, registry: &TypeRegistry, token: FieldToken) -> Result<Option<FieldEntry>> {
        if let Some(field) = self.field_index(registry)?.by_token.get(&token) {
            return Ok(Some(field.clone()));
        }
        match self.base_model(registry)? {
            Some(base) => base.get_field(registry, token),
            None => Ok(None),
        }
    }

    fn get_field_by_name(&self, registry: &TypeRegistry, name: &str) -> Result<Option<FieldEntry>> {
        if let Some(field) = self.field_index(registry)?.by_name.get(name) {
            return Ok(Some(field.clone()));
        }
        match self.base_model(registry)? {
            Some(base) => base.get_field_by_name(registry, name),
            None => Ok(None),
        }
    }

    fn total_field_count(&self, registry: &TypeRegistry) -> Result<usize> {
        let index = self.field_index(registry)?;
        Ok(index.field_start + index.instance.len())
    }

    fn methods(&self, registry: &TypeRegistry) -> Result<Vec<MethodEntry>> {
        Ok(self.method_index(registry)?.methods.clone())
    }

    fn find_method(
        &self,
        registry: &TypeRegistry,
        query: &MethodQuery<'_>,
    ) -> Result<Option<MethodEntry>> {
        let found = select_overload(
            registry,
            &self.full_name,
            &self.method_index(registry)?.methods,
            query,
            self.generic_arguments.as_ref(),
        )?;
        if found.is_some() || query.declared_only {
            return Ok(found);
        }
        match self.base_model(registry)? {
            Some(base) => base.find_method(registry, query),
            None => Ok(None),
        }
    }

    fn find_virtual_method(
        &self,
        registry: &TypeRegistry,
        method: &MethodEntry,
    ) -> Result<Option<MethodEntry>> {
        Ok(find_override(registry, self.handle, method)?.or_else(|| Some(method.clone())))
    }

    fn constructors(&self, registry: &TypeRegistry) -> Result<Vec<MethodEntry>> {
        Ok(self.method_index(registry)?.constructors.clone())
    }

    fn find_constructor(
        &self,
        registry: &TypeRegistry,
        parameters: &[TypeHandle],
    ) -> Result<Option<MethodEntry>> {
        select_overload(
            registry,
            &self.full_name,
            &self.method_index(registry)?.constructors,
            &MethodQuery::new(".ctor", parameters),
            self.generic_arguments.as_ref(),
        )
    }

    fn make_generic_instance(
        &self,
        registry: &TypeRegistry,
        arguments: &[TypeHandle],
    ) -> Result<TypeHandle> {
        let (
            Shape::Definition {
                module,
                id,
                definition,
            },
            true,
        ) = (&self.shape, self.is_generic_definition())
        else {
            return Err(TypeLoadError::GenericInstantiation {
                type_name: self.full_name.clone(),
                arguments: arguments.iter().map(|a| registry.type_name(*a)).collect(),
                reason: "not a generic type definition".to_string(),
            });
        };
        if arguments.len() != self.generic_parameters.len() {
            return Err(TypeLoadError::GenericArgumentCount {
                type_name: self.full_name.clone(),
                expected: self.generic_parameters.len(),
                actual: arguments.len(),
            });
        }
        self.generic_instances.get_or_insert(registry, arguments, || {
            let full_name = generic_name(
                &self.full_name,
                arguments.iter().map(|a| registry.type_name(*a)),
            );
            let generic_arguments = GenericArguments::named(&self.generic_parameters, arguments);
            let shape = Shape::Definition {
                module: *module,
                id: *id,
                definition: definition.clone(),
            };
            let handle = registry.insert_model(|handle| {
                InterpretedType::with_shape(
                    handle,
                    full_name,
                    shape,
                    Some(generic_arguments),
                    Some(self.handle),
                )
                .into()
            });
            debug!("built generic instance {}", registry.type_name(handle));
            Ok(handle)
        })
    }

    fn can_assign_to(&self, registry: &TypeRegistry, target: TypeHandle) -> Result<bool> {
        if target == self.handle {
            return Ok(true);
        }
        let target_model = registry.get(target)?;
        if let Some(native) = target_model.as_native() {
            match native.info().well_known {
                Some(WellKnownType::Object) => return Ok(true),
                Some(WellKnownType::ValueType) if self.is_value_type() => return Ok(true),
                Some(WellKnownType::Enum) if self.is_enum() => return Ok(true),
                Some(WellKnownType::Delegate | WellKnownType::MulticastDelegate)
                    if self.is_delegate(registry)? =>
                {
                    return Ok(true)
                }
                _ => {}
            }
        }
        if let Shape::Array { element, rank } = &self.shape {
            return match target_model.element_type() {
                Some(target_element) if target_model.array_rank() == *rank => {
                    registry.get(*element)?.can_assign_to(registry, target_element)
                }
                _ => Ok(false),
            };
        }
        for interface in self.interfaces(registry)? {
            if interface == target || registry.get(interface)?.can_assign_to(registry, target)? {
                return Ok(true);
            }
        }
        match self.base_model(registry)? {
            Some(base) => base.can_assign_to(registry, target),
            None => Ok(false),
        }
    }

    fn first_native_ancestor(&self, registry: &TypeRegistry) -> Result<Option<TypeHandle>> {
        match self.first_native_base(registry)? {
            Some(base) => Ok(Some(base)),
            None => self.first_native_interface(registry),
        }
    }

    fn enum_underlying_type(&self, registry: &TypeRegistry) -> Result<Option<TypeHandle>> {
        if !self.is_enum() {
            return Ok(None);
        }
        Ok(self
            .field_index(registry)?
            .instance
            .first()
            .and_then(|f| f.field_type().resolved()))
    }
}
