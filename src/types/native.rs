//! Models of host-native types.
//!
//! Everything beyond the descriptor itself is derived lazily through the
//! native reflection facility and memoized with [`BuildOnce`]; two threads
//! racing on the same index both build it and one result is dropped.
use crate::{
    error::{Result, TypeLoadError},
    host::{NativeSig, NativeTypeId, NativeTypeInfo, NativeTypeKind, Visibility},
    metadata::FieldToken,
    resolve::TypeRegistry,
    types::{
        find_override,
        generics::{GenericArguments, GenericContext, GenericInstanceCache, Signature},
        layout::ValueLayout,
        members::{
            select_overload, FieldBinding, FieldData, FieldEntry, MethodData, MethodEntry,
            MethodQuery, MethodSource,
        },
        TypeHandle, TypeInfo, TypeModel,
    },
    utils::sync::{Arc, BuildOnce},
    value::DefaultValue,
};
use std::collections::HashMap;
use tracing::trace;

#[derive(Default)]
struct FieldIndex {
    declared: Vec<FieldEntry>,
    by_token: HashMap<FieldToken, usize>,
    by_name: HashMap<String, usize>,
    instance_count: usize,
}

impl FieldIndex {
    fn push(&mut self, entry: FieldEntry) {
        let i = self.declared.len();
        self.by_token.insert(entry.token(), i);
        self.by_name.insert(entry.name().to_string(), i);
        if !entry.is_static() {
            self.instance_count += 1;
        }
        self.declared.push(entry);
    }
}

pub struct NativeType {
    handle: TypeHandle,
    id: NativeTypeId,
    full_name: String,
    info: NativeTypeInfo,
    element: Option<TypeHandle>,
    generic_definition: Option<TypeHandle>,
    generic_arguments: Option<GenericArguments>,
    base: BuildOnce<Option<TypeHandle>>,
    interfaces: BuildOnce<Vec<TypeHandle>>,
    fields: BuildOnce<FieldIndex>,
    methods: BuildOnce<Vec<MethodEntry>>,
    constructors: BuildOnce<Vec<MethodEntry>>,
    generic_instances: GenericInstanceCache<TypeHandle>,
    layout: BuildOnce<Option<ValueLayout>>,
}

impl NativeType {
    /// `element`, `generic_definition` and `generic_arguments` are the
    /// descriptor's references, already resolved to handles.
    pub(crate) fn new(
        handle: TypeHandle,
        id: NativeTypeId,
        full_name: String,
        info: NativeTypeInfo,
        element: Option<TypeHandle>,
        generic_definition: Option<TypeHandle>,
        generic_arguments: Option<GenericArguments>,
    ) -> Self {
        Self {
            handle,
            id,
            full_name,
            info,
            element,
            generic_definition,
            generic_arguments,
            base: BuildOnce::new(),
            interfaces: BuildOnce::new(),
            fields: BuildOnce::new(),
            methods: BuildOnce::new(),
            constructors: BuildOnce::new(),
            generic_instances: GenericInstanceCache::new(),
            layout: BuildOnce::new(),
        }
    }

    pub fn native_id(&self) -> NativeTypeId {
        self.id
    }

    pub fn info(&self) -> &NativeTypeInfo {
        &self.info
    }

    pub(crate) fn layout_cache(&self) -> &BuildOnce<Option<ValueLayout>> {
        &self.layout
    }

    pub fn generic_instance_count(&self) -> usize {
        self.generic_instances.len()
    }

    fn field_index(&self, registry: &TypeRegistry) -> Result<&FieldIndex> {
        self.fields.get_or_try_build(|| -> Result<FieldIndex> {
            trace!("indexing fields of {}", self.full_name);
            // A layout binder exposes every field with a dense ordinal;
            // otherwise only the public and family surface is visible.
            let bound = registry.has_value_type_binder(self.id);
            let mut index = FieldIndex::default();
            let mut ordinal = 0;
            for field in registry.host().fields(self.id) {
                if field.visibility == Visibility::Private && !bound {
                    continue;
                }
                let binding = match registry.field_accessor(field.id) {
                    Some(accessor) => FieldBinding::Accessor {
                        field: field.id,
                        accessor,
                    },
                    None => FieldBinding::Native(field.id),
                };
                let field_ordinal = (bound && !field.is_static).then(|| {
                    ordinal += 1;
                    ordinal - 1
                });
                index.push(FieldEntry::new(FieldData {
                    field_type: self.signature(registry, &field.field_type, &[])?,
                    name: field.name,
                    declaring_type: self.handle,
                    token: FieldToken(field.id.0),
                    is_static: field.is_static,
                    ordinal: field_ordinal,
                    binding,
                }));
            }
            Ok(index)
        })
    }

    /// Instance fields declared on this type, in enumeration order.
    pub(crate) fn instance_fields(&self, registry: &TypeRegistry) -> Result<Vec<FieldEntry>> {
        Ok(self
            .field_index(registry)?
            .declared
            .iter()
            .filter(|f| !f.is_static())
            .cloned()
            .collect())
    }

    fn method_index(&self, registry: &TypeRegistry) -> Result<&Vec<MethodEntry>> {
        self.methods.get_or_try_build(|| {
            trace!("indexing methods of {}", self.full_name);
            registry
                .host()
                .methods(self.id)
                .into_iter()
                .filter(|m| m.visibility != Visibility::Private)
                .map(|m| -> Result<MethodEntry> {
                    let mut data = MethodData::new(m.name, self.handle, MethodSource::Native(m.id));
                    data.parameters = m
                        .parameters
                        .iter()
                        .map(|p| self.signature(registry, p, &m.generic_parameters))
                        .collect::<Result<_>>()?;
                    data.return_type = match &m.return_type {
                        Some(r) => Some(self.signature(registry, r, &m.generic_parameters)?),
                        None => None,
                    };
                    data.generic_parameters = m.generic_parameters;
                    data.is_static = m.is_static;
                    data.is_virtual = m.is_virtual;
                    Ok(MethodEntry::new(data))
                })
                .collect()
        })
    }

    fn constructor_index(&self, registry: &TypeRegistry) -> Result<&Vec<MethodEntry>> {
        self.constructors.get_or_try_build(|| {
            registry
                .host()
                .constructors(self.id)
                .into_iter()
                .filter(|m| m.visibility != Visibility::Private)
                .map(|m| -> Result<MethodEntry> {
                    let mut data = MethodData::new(".ctor", self.handle, MethodSource::Native(m.id));
                    data.parameters = m
                        .parameters
                        .iter()
                        .map(|p| self.signature(registry, p, &[]))
                        .collect::<Result<_>>()?;
                    data.is_constructor = true;
                    Ok(MethodEntry::new(data))
                })
                .collect()
        })
    }

    /// Converts a native signature, collapsing closed composites into
    /// canonical handles.
    fn signature(
        &self,
        registry: &TypeRegistry,
        sig: &NativeSig,
        method_parameters: &[String],
    ) -> Result<Signature> {
        let open = self.open_signature(registry, sig, method_parameters)?;
        open.substitute(registry, GenericContext::default())
    }

    fn open_signature(
        &self,
        registry: &TypeRegistry,
        sig: &NativeSig,
        method_parameters: &[String],
    ) -> Result<Signature> {
        Ok(match sig {
            NativeSig::Type(id) => Signature::Type(registry.resolve_native(*id)?),
            NativeSig::TypeParameter(i) => match self.generic_arguments.as_ref() {
                Some(args) if *i < args.len() => Signature::Type(args.types()[*i]),
                _ => Signature::TypeParameter {
                    name: self
                        .info
                        .generic_parameters
                        .get(*i)
                        .cloned()
                        .unwrap_or_else(|| format!("!{i}")),
                    position: *i,
                },
            },
            NativeSig::MethodParameter(i) => Signature::MethodParameter {
                name: method_parameters
                    .get(*i)
                    .cloned()
                    .unwrap_or_else(|| format!("!!{i}")),
                position: *i,
            },
            NativeSig::Array(inner, rank) => Signature::Array(
                Box::new(self.open_signature(registry, inner, method_parameters)?),
                *rank,
            ),
            NativeSig::ByRef(inner) => Signature::ByRef(Box::new(self.open_signature(
                registry,
                inner,
                method_parameters,
            )?)),
            NativeSig::Generic {
                definition,
                arguments,
            } => Signature::Generic {
                definition: registry.resolve_native(*definition)?,
                arguments: arguments
                    .iter()
                    .map(|a| self.open_signature(registry, a, method_parameters))
                    .collect::<Result<_>>()?,
            },
        })
    }

    fn base_model(&self, registry: &TypeRegistry) -> Result<Option<Arc<TypeModel>>> {
        match self.base_type(registry)? {
            Some(base) => Ok(Some(registry.get(base)?)),
            None => Ok(None),
        }
    }
}

impl TypeInfo for NativeType {
    fn handle(&self) -> TypeHandle {
        self.handle
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn is_value_type(&self) -> bool {
        self.info.is_value_type()
    }

    fn is_interface(&self) -> bool {
        self.info.kind == NativeTypeKind::Interface
    }

    fn is_enum(&self) -> bool {
        self.info.kind == NativeTypeKind::Enum
    }

    fn is_primitive(&self) -> bool {
        self.info.primitive.is_some()
    }

    fn array_rank(&self) -> u32 {
        self.info.array_rank
    }

    fn is_by_ref(&self) -> bool {
        self.info.is_by_ref
    }

    fn element_type(&self) -> Option<TypeHandle> {
        self.element
    }

    fn generic_arguments(&self) -> Option<&GenericArguments> {
        self.generic_arguments.as_ref()
    }

    fn generic_definition(&self) -> Option<TypeHandle> {
        self.generic_definition
    }

    fn generic_parameters(&self) -> &[String] {
        &self.info.generic_parameters
    }

    fn is_delegate(&self, _registry: &TypeRegistry) -> Result<bool> {
        Ok(self.info.is_delegate)
    }

    fn base_type(&self, registry: &TypeRegistry) -> Result<Option<TypeHandle>> {
        self.base
            .get_or_try_build(|| self.info.base.map(|b| registry.resolve_native(b)).transpose())
            .copied()
    }

    fn interfaces(&self, registry: &TypeRegistry) -> Result<Vec<TypeHandle>> {
        self.interfaces
            .get_or_try_build(|| {
                self.info
                    .interfaces
                    .iter()
                    .map(|i| registry.resolve_native(*i))
                    .collect()
            })
            .cloned()
    }

    fn default_value(&self, registry: &TypeRegistry) -> Result<DefaultValue> {
        if let Some(primitive) = self.info.primitive {
            return Ok(primitive.default_value());
        }
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
        Ok(self.field_index(registry)?.declared.clone())
    }

    fn get_field(&self, registry: &TypeRegistry, token: FieldToken) -> Result<Option<FieldEntry>> {
        let index = self.field_index(registry)?;
        if let Some(i) = index.by_token.get(&token) {
            return Ok(Some(index.declared[*i].clone()));
        }
        match self.base_model(registry)? {
            Some(base) => base.get_field(registry, token),
            None => Ok(None),
        }
    }

    fn get_field_by_name(&self, registry: &TypeRegistry, name: &str) -> Result<Option<FieldEntry>> {
        let index = self.field_index(registry)?;
        if let Some(i) = index.by_name.get(name) {
            return Ok(Some(index.declared[*i].clone()));
        }
        match self.base_model(registry)? {
            Some(base) => base.get_field_by_name(registry, name),
            None => Ok(None),
        }
    }

    fn total_field_count(&self, registry: &TypeRegistry) -> Result<usize> {
        let own = self.field_index(registry)?.instance_count;
        match self.base_model(registry)? {
            Some(base) => Ok(own + base.total_field_count(registry)?),
            None => Ok(own),
        }
    }

    fn methods(&self, registry: &TypeRegistry) -> Result<Vec<MethodEntry>> {
        Ok(self.method_index(registry)?.clone())
    }

    fn find_method(
        &self,
        registry: &TypeRegistry,
        query: &MethodQuery<'_>,
    ) -> Result<Option<MethodEntry>> {
        let found = select_overload(
            registry,
            &self.full_name,
            self.method_index(registry)?,
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
        Ok(self.constructor_index(registry)?.clone())
    }

    fn find_constructor(
        &self,
        registry: &TypeRegistry,
        parameters: &[TypeHandle],
    ) -> Result<Option<MethodEntry>> {
        select_overload(
            registry,
            &self.full_name,
            self.constructor_index(registry)?,
            &MethodQuery::new(".ctor", parameters),
            self.generic_arguments.as_ref(),
        )
    }

    fn make_generic_instance(
        &self,
        registry: &TypeRegistry,
        arguments: &[TypeHandle],
    ) -> Result<TypeHandle> {
        if !self.is_generic_definition() {
            return Err(TypeLoadError::GenericInstantiation {
                type_name: self.full_name.clone(),
                arguments: arguments.iter().map(|a| registry.type_name(*a)).collect(),
                reason: "not a generic type definition".to_string(),
            });
        }
        if arguments.len() != self.info.generic_parameters.len() {
            return Err(TypeLoadError::GenericArgumentCount {
                type_name: self.full_name.clone(),
                expected: self.info.generic_parameters.len(),
                actual: arguments.len(),
            });
        }
        if let Some(found) = self.generic_instances.find(arguments) {
            registry.record_generic_lookup(true);
            return Ok(found);
        }
        // Surrogates may resolve ancestry that instantiates this definition
        // again, so they must be known before the cache lock is taken.
        let host_arguments = registry.host_generic_arguments(arguments)?;
        self.generic_instances.get_or_insert(registry, arguments, || {
            registry.close_native_generic(
                self.handle,
                self.id,
                &self.full_name,
                arguments,
                &host_arguments,
            )
        })
    }

    fn can_assign_to(&self, registry: &TypeRegistry, target: TypeHandle) -> Result<bool> {
        if target == self.handle {
            return Ok(true);
        }
        let target = registry.get(target)?;
        Ok(match &*target {
            TypeModel::NativeType(n) => registry.host().is_assignable_from(n.id, self.id),
            _ => false,
        })
    }

    fn first_native_ancestor(&self, _registry: &TypeRegistry) -> Result<Option<TypeHandle>> {
        Ok(Some(self.handle))
    }

    fn enum_underlying_type(&self, registry: &TypeRegistry) -> Result<Option<TypeHandle>> {
        if !self.is_enum() {
            return Ok(None);
        }
        Ok(self
            .instance_fields(registry)?
            .first()
            .and_then(|f| f.field_type().resolved()))
    }
}
