use crate::{
    error::{Result, TypeLoadError},
    host::{FieldAccessor, NativeFieldId, NativeMethodId},
    metadata::{FieldToken, MethodToken, ModuleId},
    resolve::TypeRegistry,
    types::{
        generics::{generic_name, GenericArguments, GenericContext, GenericInstanceCache, Signature},
        TypeHandle, TypeInfo,
    },
    utils::sync::{Arc, Weak},
    value::{Instance, ObjectRef, Value},
};
use gc_arena::{unsafe_empty_collect, Collect};
use std::fmt::{Debug, Formatter};
use tracing::debug;

#[derive(Clone, Debug)]
pub enum FieldBinding {
    /// A slot in an interpreted [`Instance`], or in the declaring type's
    /// static storage for static fields.
    Slot(usize),
    Native(NativeFieldId),
    /// A native field with host-registered thunks.
    Accessor {
        field: NativeFieldId,
        accessor: FieldAccessor,
    },
}

pub struct FieldData {
    pub name: String,
    pub declaring_type: TypeHandle,
    pub field_type: Signature,
    pub token: FieldToken,
    pub is_static: bool,
    /// Position in the flattened instance layout.
    pub ordinal: Option<usize>,
    pub binding: FieldBinding,
}

#[derive(Clone)]
pub struct FieldEntry(Arc<FieldData>);
unsafe_empty_collect!(FieldEntry);

impl FieldEntry {
    pub fn new(data: FieldData) -> Self {
        Self(Arc::new(data))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn declaring_type(&self) -> TypeHandle {
        self.0.declaring_type
    }

    pub fn field_type(&self) -> &Signature {
        &self.0.field_type
    }

    pub fn token(&self) -> FieldToken {
        self.0.token
    }

    pub fn is_static(&self) -> bool {
        self.0.is_static
    }

    pub fn ordinal(&self) -> Option<usize> {
        self.0.ordinal
    }

    pub fn binding(&self) -> &FieldBinding {
        &self.0.binding
    }

    fn access_error(&self, registry: &TypeRegistry, reason: impl Into<String>) -> TypeLoadError {
        TypeLoadError::FieldAccess {
            type_name: registry.type_name(self.0.declaring_type),
            field: self.0.name.clone(),
            reason: reason.into(),
        }
    }

    fn instance<'a>(
        &self,
        registry: &TypeRegistry,
        target: Option<&'a ObjectRef>,
    ) -> Result<&'a Instance> {
        target
            .and_then(|t| t.downcast_ref::<Instance>())
            .ok_or_else(|| self.access_error(registry, "target is not an interpreted instance"))
    }

    /// Reads the field. `target` is ignored for static fields; reading a
    /// static field of an interpreted type runs its static initializer first.
    pub fn get_value(&self, registry: &TypeRegistry, target: Option<&ObjectRef>) -> Result<Value> {
        let target = if self.0.is_static { None } else { target };
        match &self.0.binding {
            FieldBinding::Slot(slot) if self.0.is_static => registry
                .static_storage(self.0.declaring_type)?
                .get(*slot)
                .ok_or_else(|| self.access_error(registry, "static slot out of range")),
            FieldBinding::Slot(slot) => self
                .instance(registry, target)?
                .get(*slot)
                .ok_or_else(|| self.access_error(registry, "slot out of range")),
            FieldBinding::Native(field) => registry
                .host()
                .get_field_value(*field, target)
                .map_err(|e| self.access_error(registry, e)),
            FieldBinding::Accessor { field, accessor } => {
                let value = match &accessor.getter {
                    Some(getter) => getter(target),
                    None => registry.host().get_field_value(*field, target),
                };
                value.map_err(|e| self.access_error(registry, e))
            }
        }
    }

    pub fn set_value(
        &self,
        registry: &TypeRegistry,
        target: Option<&ObjectRef>,
        value: Value,
    ) -> Result<()> {
        let target = if self.0.is_static { None } else { target };
        let stored = match &self.0.binding {
            FieldBinding::Slot(slot) if self.0.is_static => {
                registry.static_storage(self.0.declaring_type)?.set(*slot, value)
            }
            FieldBinding::Slot(slot) => self.instance(registry, target)?.set(*slot, value),
            FieldBinding::Native(field) => {
                return registry
                    .host()
                    .set_field_value(*field, target, value)
                    .map_err(|e| self.access_error(registry, e));
            }
            FieldBinding::Accessor { field, accessor } => {
                let result = match &accessor.setter {
                    Some(setter) => setter(target, value),
                    None => registry.host().set_field_value(*field, target, value),
                };
                return result.map_err(|e| self.access_error(registry, e));
            }
        };
        if stored {
            Ok(())
        } else {
            Err(self.access_error(registry, "slot out of range"))
        }
    }
}

impl PartialEq for FieldEntry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for FieldEntry {}

impl Debug for FieldEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0.is_static {
            write!(f, "static ")?;
        }
        write!(f, "{:?} {}::{}", self.0.field_type, self.0.declaring_type, self.0.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodSource {
    Native(NativeMethodId),
    Interpreted { module: ModuleId, token: MethodToken },
}

pub struct MethodData {
    pub name: String,
    pub declaring_type: TypeHandle,
    pub parameters: Vec<Signature>,
    /// `None` for `void` and for constructors.
    pub return_type: Option<Signature>,
    pub generic_parameters: Vec<String>,
    pub generic_arguments: Option<Arc<[TypeHandle]>>,
    pub is_static: bool,
    pub is_constructor: bool,
    pub is_virtual: bool,
    pub has_body: bool,
    pub source: MethodSource,
    definition: Option<Weak<MethodData>>,
    instances: GenericInstanceCache<MethodEntry>,
}

impl MethodData {
    pub fn new(name: impl Into<String>, declaring_type: TypeHandle, source: MethodSource) -> Self {
        Self {
            name: name.into(),
            declaring_type,
            parameters: vec![],
            return_type: None,
            generic_parameters: vec![],
            generic_arguments: None,
            is_static: false,
            is_constructor: false,
            is_virtual: false,
            has_body: true,
            source,
            definition: None,
            instances: GenericInstanceCache::new(),
        }
    }
}

/// A resolved method or constructor. Equality is identity.
#[derive(Clone)]
pub struct MethodEntry(Arc<MethodData>);
unsafe_empty_collect!(MethodEntry);

impl MethodEntry {
    pub fn new(data: MethodData) -> Self {
        Self(Arc::new(data))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn declaring_type(&self) -> TypeHandle {
        self.0.declaring_type
    }

    pub fn parameters(&self) -> &[Signature] {
        &self.0.parameters
    }

    pub fn return_type(&self) -> Option<&Signature> {
        self.0.return_type.as_ref()
    }

    pub fn generic_parameter_count(&self) -> usize {
        self.0.generic_parameters.len()
    }

    pub fn generic_arguments(&self) -> Option<&[TypeHandle]> {
        self.0.generic_arguments.as_deref()
    }

    pub fn is_generic_definition(&self) -> bool {
        !self.0.generic_parameters.is_empty() && self.0.generic_arguments.is_none()
    }

    pub fn is_static(&self) -> bool {
        self.0.is_static
    }

    pub fn is_constructor(&self) -> bool {
        self.0.is_constructor
    }

    pub fn is_virtual(&self) -> bool {
        self.0.is_virtual
    }

    pub fn has_body(&self) -> bool {
        self.0.has_body
    }

    pub fn source(&self) -> MethodSource {
        self.0.source
    }

    /// The generic method definition this entry was instantiated from.
    pub fn definition(&self) -> Option<MethodEntry> {
        self.0
            .definition
            .as_ref()
            .and_then(Weak::upgrade)
            .map(MethodEntry)
    }

    pub fn generic_instance_count(&self) -> usize {
        self.0.instances.len()
    }

    /// Closes a generic method definition over `arguments`, reusing an
    /// existing instance with identical arguments.
    pub fn make_generic_method(
        &self,
        registry: &TypeRegistry,
        arguments: &[TypeHandle],
    ) -> Result<MethodEntry> {
        if !self.is_generic_definition() {
            return Err(TypeLoadError::GenericInstantiation {
                type_name: format!("{}::{}", registry.type_name(self.0.declaring_type), self.0.name),
                arguments: arguments.iter().map(|a| registry.type_name(*a)).collect(),
                reason: "not a generic method definition".to_string(),
            });
        }
        if arguments.len() != self.0.generic_parameters.len() {
            return Err(TypeLoadError::GenericArgumentCount {
                type_name: format!("{}::{}", registry.type_name(self.0.declaring_type), self.0.name),
                expected: self.0.generic_parameters.len(),
                actual: arguments.len(),
            });
        }
        self.0.instances.get_or_insert(registry, arguments, || {
            let declaring = registry.get(self.0.declaring_type)?;
            let ctx = GenericContext::for_type(declaring.generic_arguments())
                .with_method_arguments(arguments);
            let parameters = self
                .0
                .parameters
                .iter()
                .map(|p| p.substitute(registry, ctx))
                .collect::<Result<Vec<_>>>()?;
            let return_type = match &self.0.return_type {
                Some(r) => Some(r.substitute(registry, ctx)?),
                None => None,
            };
            let instance = MethodEntry::new(MethodData {
                name: self.0.name.clone(),
                declaring_type: self.0.declaring_type,
                parameters,
                return_type,
                generic_parameters: self.0.generic_parameters.clone(),
                generic_arguments: Some(arguments.into()),
                is_static: self.0.is_static,
                is_constructor: self.0.is_constructor,
                is_virtual: self.0.is_virtual,
                has_body: self.0.has_body,
                source: self.0.source,
                definition: Some(Arc::downgrade(&self.0)),
                instances: GenericInstanceCache::new(),
            });
            debug!("built generic method {}", instance.display(registry));
            Ok(instance)
        })
    }

    pub fn display(&self, registry: &TypeRegistry) -> String {
        let mut name = format!("{}::{}", registry.type_name(self.0.declaring_type), self.0.name);
        match &self.0.generic_arguments {
            Some(args) => {
                name = generic_name(&name, args.iter().map(|a| registry.type_name(*a)));
            }
            None if !self.0.generic_parameters.is_empty() => {
                name = generic_name(&name, self.0.generic_parameters.iter().cloned());
            }
            None => {}
        }
        let params: Vec<_> = self.0.parameters.iter().map(|p| p.display(registry)).collect();
        format!("{name}({})", params.join(", "))
    }

    fn matches_exactly(&self, query: &MethodQuery<'_>) -> bool {
        if self.0.generic_arguments.as_deref() != query.generic_arguments {
            return false;
        }
        let params_match = self
            .0
            .parameters
            .iter()
            .zip(query.parameters)
            .all(|(sig, arg)| sig.resolved() == Some(*arg));
        params_match
            && query
                .return_type
                .map_or(true, |r| self.return_type().and_then(Signature::resolved) == Some(r))
    }

    fn matches_structurally(
        &self,
        registry: &TypeRegistry,
        query: &MethodQuery<'_>,
        type_arguments: Option<&GenericArguments>,
        method_arguments: &[TypeHandle],
    ) -> Result<bool> {
        let ctx = GenericContext::for_type(type_arguments).with_method_arguments(method_arguments);
        for (sig, arg) in self.0.parameters.iter().zip(query.parameters) {
            if !sig.matches(registry, *arg, ctx)? {
                return Ok(false);
            }
        }
        match (query.return_type, &self.0.return_type) {
            (None, _) => Ok(true),
            (Some(r), Some(sig)) => sig.matches(registry, r, ctx),
            (Some(_), None) => Ok(false),
        }
    }
}

impl PartialEq for MethodEntry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for MethodEntry {}

impl Debug for MethodEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.0.declaring_type, self.0.name)?;
        f.debug_list().entries(self.0.parameters.iter()).finish()
    }
}

/// What the interpreter knows about a call site.
#[derive(Clone, Copy, Debug)]
pub struct MethodQuery<'a> {
    pub name: &'a str,
    pub parameters: &'a [TypeHandle],
    pub generic_arguments: Option<&'a [TypeHandle]>,
    pub return_type: Option<TypeHandle>,
    /// Skip the base-type fallback.
    pub declared_only: bool,
}

impl<'a> MethodQuery<'a> {
    pub fn new(name: &'a str, parameters: &'a [TypeHandle]) -> Self {
        Self {
            name,
            parameters,
            generic_arguments: None,
            return_type: None,
            declared_only: false,
        }
    }

    pub fn with_generic_arguments(mut self, arguments: &'a [TypeHandle]) -> Self {
        self.generic_arguments = Some(arguments);
        self
    }

    pub fn with_return_type(mut self, return_type: TypeHandle) -> Self {
        self.return_type = Some(return_type);
        self
    }

    pub fn declared_only(mut self) -> Self {
        self.declared_only = true;
        self
    }

    pub fn renamed<'b>(&self, name: &'b str) -> MethodQuery<'b>
    where
        'a: 'b,
    {
        MethodQuery { name, ..*self }
    }

    pub fn display(&self, registry: &TypeRegistry) -> String {
        let mut name = self.name.to_string();
        if let Some(args) = self.generic_arguments {
            name = generic_name(&name, args.iter().map(|a| registry.type_name(*a)));
        }
        let params: Vec<_> = self.parameters.iter().map(|p| registry.type_name(*p)).collect();
        format!("{name}({})", params.join(", "))
    }
}

/// Picks the overload `query` names among `candidates`.
///
/// Exact matches win. With explicit generic arguments and no exact match,
/// the first generic definition, in enumeration order, whose parameters
/// match structurally is instantiated; its cache returns any instance
/// already built with the same arguments. More than one exact match is
/// ambiguous.
pub(crate) fn select_overload(
    registry: &TypeRegistry,
    type_name: &str,
    candidates: &[MethodEntry],
    query: &MethodQuery<'_>,
    type_arguments: Option<&GenericArguments>,
) -> Result<Option<MethodEntry>> {
    let mut exact = vec![];
    let mut template = None;
    for method in candidates {
        if method.name() != query.name || method.parameters().len() != query.parameters.len() {
            continue;
        }
        if method.is_generic_definition() {
            if let Some(arguments) = query.generic_arguments {
                if template.is_none()
                    && method.generic_parameter_count() == arguments.len()
                    && method.matches_structurally(registry, query, type_arguments, arguments)?
                {
                    template = Some(method.clone());
                }
            }
            continue;
        }
        if method.matches_exactly(query) {
            exact.push(method.clone());
        }
    }

    match exact.len() {
        0 => match (template, query.generic_arguments) {
            (Some(t), Some(arguments)) => Ok(Some(t.make_generic_method(registry, arguments)?)),
            _ => Ok(None),
        },
        1 => Ok(exact.pop()),
        _ => Err(TypeLoadError::AmbiguousMatch {
            type_name: type_name.to_string(),
            signature: query.display(registry),
            candidates: exact.iter().map(|m| m.display(registry)).collect(),
        }),
    }
}
