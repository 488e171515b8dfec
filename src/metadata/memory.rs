//! An in-memory module reader.
//!
//! Embedders that produce descriptors some other way (or tests) assemble
//! [`TypeDefinition`]s with [`TypeDefinitionBuilder`] and publish them through
//! a [`MemoryModule`].
use super::{
    FieldDefinition, FieldToken, MethodDefinition, MethodToken, ModuleMetadata, TypeDefId,
    TypeDefinition, TypeKind, TypeRef,
};
use crate::utils::sync::Arc;

const FIELD_TOKEN_BASE: u64 = 0x0400_0000;
const METHOD_TOKEN_BASE: u32 = 0x0600_0000;

#[derive(Debug, Default)]
pub struct MemoryModule {
    name: String,
    types: Vec<Arc<TypeDefinition>>,
    next_field: u64,
    next_method: u32,
}

impl MemoryModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Adds a definition, assigning module-unique field and method tokens.
    pub fn define(&mut self, mut definition: TypeDefinition) -> TypeDefId {
        for f in &mut definition.fields {
            self.next_field += 1;
            f.token = FieldToken(FIELD_TOKEN_BASE + self.next_field);
        }
        for m in &mut definition.methods {
            self.next_method += 1;
            m.token = MethodToken(METHOD_TOKEN_BASE + self.next_method);
        }
        let id = TypeDefId(self.types.len() as u32);
        self.types.push(Arc::new(definition));
        id
    }

    pub fn type_id(&self, full_name: &str) -> Option<TypeDefId> {
        self.types
            .iter()
            .position(|t| t.full_name() == full_name)
            .map(|i| TypeDefId(i as u32))
    }
}

impl ModuleMetadata for MemoryModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_definitions(&self) -> Vec<TypeDefId> {
        (0..self.types.len() as u32).map(TypeDefId).collect()
    }

    fn type_definition(&self, id: TypeDefId) -> Option<Arc<TypeDefinition>> {
        self.types.get(id.0 as usize).cloned()
    }
}

pub struct TypeDefinitionBuilder {
    definition: TypeDefinition,
}

impl TypeDefinitionBuilder {
    pub fn new(namespace: &str, name: &str, kind: TypeKind) -> Self {
        Self {
            definition: TypeDefinition {
                namespace: namespace.to_string(),
                name: name.to_string(),
                kind,
                ..TypeDefinition::default()
            },
        }
    }

    pub fn class(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, TypeKind::Class)
    }

    pub fn value_type(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, TypeKind::ValueType)
    }

    pub fn interface(namespace: &str, name: &str) -> Self {
        Self::new(namespace, name, TypeKind::Interface)
    }

    /// An enum backed by `underlying`, stored in its `value__` field.
    pub fn enumeration(namespace: &str, name: &str, underlying: TypeRef) -> Self {
        Self::new(namespace, name, TypeKind::Enum).field("value__", underlying)
    }

    pub fn generic_parameters(mut self, names: &[&str]) -> Self {
        self.definition.generic_parameters = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn base(mut self, base: TypeRef) -> Self {
        self.definition.base = Some(base);
        self
    }

    pub fn implements(mut self, interface: TypeRef) -> Self {
        self.definition.interfaces.push(interface);
        self
    }

    pub fn field(self, name: &str, field_type: TypeRef) -> Self {
        self.push_field(name, field_type, false)
    }

    pub fn static_field(self, name: &str, field_type: TypeRef) -> Self {
        self.push_field(name, field_type, true)
    }

    fn push_field(mut self, name: &str, field_type: TypeRef, is_static: bool) -> Self {
        self.definition.fields.push(FieldDefinition {
            name: name.to_string(),
            field_type,
            is_static,
            token: FieldToken(0),
        });
        self
    }

    pub fn method(self, name: &str, parameters: Vec<TypeRef>, return_type: Option<TypeRef>) -> Self {
        self.push_method(MethodDefinition {
            name: name.to_string(),
            parameters,
            return_type,
            generic_parameters: vec![],
            is_static: false,
            is_constructor: false,
            has_body: true,
            token: MethodToken(0),
        })
    }

    pub fn static_method(
        self,
        name: &str,
        parameters: Vec<TypeRef>,
        return_type: Option<TypeRef>,
    ) -> Self {
        self.push_method(MethodDefinition {
            name: name.to_string(),
            parameters,
            return_type,
            generic_parameters: vec![],
            is_static: true,
            is_constructor: false,
            has_body: true,
            token: MethodToken(0),
        })
    }

    pub fn abstract_method(
        self,
        name: &str,
        parameters: Vec<TypeRef>,
        return_type: Option<TypeRef>,
    ) -> Self {
        self.push_method(MethodDefinition {
            name: name.to_string(),
            parameters,
            return_type,
            generic_parameters: vec![],
            is_static: false,
            is_constructor: false,
            has_body: false,
            token: MethodToken(0),
        })
    }

    pub fn generic_method(
        self,
        name: &str,
        generic_parameters: &[&str],
        parameters: Vec<TypeRef>,
        return_type: Option<TypeRef>,
    ) -> Self {
        self.push_method(MethodDefinition {
            name: name.to_string(),
            parameters,
            return_type,
            generic_parameters: generic_parameters.iter().map(|g| g.to_string()).collect(),
            is_static: false,
            is_constructor: false,
            has_body: true,
            token: MethodToken(0),
        })
    }

    pub fn constructor(self, parameters: Vec<TypeRef>) -> Self {
        self.push_method(MethodDefinition {
            name: ".ctor".to_string(),
            parameters,
            return_type: None,
            generic_parameters: vec![],
            is_static: false,
            is_constructor: true,
            has_body: true,
            token: MethodToken(0),
        })
    }

    pub fn static_constructor(self) -> Self {
        self.push_method(MethodDefinition {
            name: ".cctor".to_string(),
            parameters: vec![],
            return_type: None,
            generic_parameters: vec![],
            is_static: true,
            is_constructor: true,
            has_body: true,
            token: MethodToken(0),
        })
    }

    fn push_method(mut self, method: MethodDefinition) -> Self {
        self.definition.methods.push(method);
        self
    }

    pub fn build(self) -> TypeDefinition {
        self.definition
    }
}
