//! An in-memory native reflection facility.
//!
//! `MemoryHost` stands in for a platform reflection API: native types are
//! declared up front with [`NativeTypeBuilder`], generic closures, arrays and
//! by-refs are materialized on demand, and objects keep their field values in
//! a map.
use super::{
    NativeField, NativeFieldId, NativeMethod, NativeMethodId, NativeReflection, NativeSig,
    NativeTypeId, NativeTypeInfo, NativeTypeKind, PrimitiveKind, Visibility, WellKnownType,
};
use crate::{
    utils::sync::{Mutex, RwLock},
    value::{ObjectRef, Value},
};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GenericConstraint {
    ValueType,
    ReferenceType,
}

struct HostType {
    info: NativeTypeInfo,
    fields: Vec<NativeFieldId>,
    methods: Vec<NativeMethod>,
    constructors: Vec<NativeMethod>,
    constraints: Vec<Option<GenericConstraint>>,
}

#[derive(Default)]
struct State {
    types: Vec<HostType>,
    by_name: HashMap<String, NativeTypeId>,
    fields: Vec<(NativeTypeId, NativeField)>,
    generic_instances: HashMap<(NativeTypeId, Vec<NativeTypeId>), NativeTypeId>,
    arrays: HashMap<(NativeTypeId, u32), NativeTypeId>,
    by_refs: HashMap<NativeTypeId, NativeTypeId>,
    next_method: u64,
}

impl State {
    fn get(&self, id: NativeTypeId) -> Option<&HostType> {
        self.types.get(id.0 as usize)
    }

    fn name_of(&self, id: NativeTypeId) -> String {
        self.get(id)
            .map(|t| t.info.full_name.clone())
            .unwrap_or_else(|| format!("<native {}>", id.0))
    }

    fn push(&mut self, ty: HostType) -> NativeTypeId {
        let id = NativeTypeId(self.types.len() as u64);
        self.by_name.insert(ty.info.full_name.clone(), id);
        self.types.push(ty);
        id
    }

    fn push_field(
        &mut self,
        owner: NativeTypeId,
        name: String,
        field_type: NativeSig,
        is_static: bool,
        visibility: Visibility,
    ) -> NativeFieldId {
        let id = NativeFieldId(self.fields.len() as u64);
        self.fields.push((
            owner,
            NativeField {
                id,
                name,
                field_type,
                is_static,
                visibility,
            },
        ));
        id
    }

    fn next_method_id(&mut self) -> NativeMethodId {
        self.next_method += 1;
        NativeMethodId(self.next_method)
    }

    fn close(&mut self, sig: &NativeSig, args: &[NativeTypeId]) -> Result<NativeSig, String> {
        Ok(match sig {
            NativeSig::TypeParameter(i) => match args.get(*i) {
                Some(a) => NativeSig::Type(*a),
                None => return Err(format!("type parameter !{i} out of range")),
            },
            NativeSig::Type(_) | NativeSig::MethodParameter(_) => sig.clone(),
            NativeSig::Array(inner, rank) => match self.close(inner, args)? {
                NativeSig::Type(e) => NativeSig::Type(self.array_of(e, *rank)?),
                other => NativeSig::Array(Box::new(other), *rank),
            },
            NativeSig::ByRef(inner) => match self.close(inner, args)? {
                NativeSig::Type(e) => NativeSig::Type(self.by_ref_of(e)?),
                other => NativeSig::ByRef(Box::new(other)),
            },
            NativeSig::Generic {
                definition,
                arguments,
            } => {
                let closed = arguments
                    .iter()
                    .map(|a| self.close(a, args))
                    .collect::<Result<Vec<_>, _>>()?;
                let ids: Option<Vec<_>> = closed
                    .iter()
                    .map(|c| match c {
                        NativeSig::Type(id) => Some(*id),
                        _ => None,
                    })
                    .collect();
                match ids {
                    Some(ids) => NativeSig::Type(self.instantiate(*definition, &ids)?),
                    None => NativeSig::Generic {
                        definition: *definition,
                        arguments: closed,
                    },
                }
            }
        })
    }

    fn instantiate(
        &mut self,
        definition: NativeTypeId,
        args: &[NativeTypeId],
    ) -> Result<NativeTypeId, String> {
        let key = (definition, args.to_vec());
        if let Some(id) = self.generic_instances.get(&key) {
            return Ok(*id);
        }
        let def = self
            .get(definition)
            .ok_or_else(|| format!("unknown native type {}", definition.0))?;
        if !def.info.is_generic_definition() {
            return Err(format!("{} is not a generic definition", def.info.full_name));
        }
        if def.info.generic_parameters.len() != args.len() {
            return Err(format!(
                "{} expects {} type arguments",
                def.info.full_name,
                def.info.generic_parameters.len()
            ));
        }
        for (i, constraint) in def.constraints.iter().enumerate() {
            let Some(constraint) = constraint else {
                continue;
            };
            let arg = self
                .get(args[i])
                .ok_or_else(|| format!("unknown native type {}", args[i].0))?;
            let ok = match constraint {
                GenericConstraint::ValueType => arg.info.is_value_type(),
                GenericConstraint::ReferenceType => !arg.info.is_value_type(),
            };
            if !ok {
                return Err(format!(
                    "{} violates the {constraint:?} constraint on {}",
                    arg.info.full_name, def.info.generic_parameters[i]
                ));
            }
        }

        let mut info = def.info.clone();
        let field_ids = def.fields.clone();
        let methods = def.methods.clone();
        let constructors = def.constructors.clone();
        let names: Vec<_> = args.iter().map(|a| self.name_of(*a)).collect();
        info.full_name = format!("{}<{}>", info.full_name, names.join(", "));
        info.generic_definition = Some(definition);
        info.generic_arguments = args.to_vec();

        let id = self.push(HostType {
            info,
            fields: vec![],
            methods: vec![],
            constructors: vec![],
            constraints: vec![],
        });
        self.generic_instances.insert(key, id);

        let mut closed_fields = Vec::with_capacity(field_ids.len());
        for f in field_ids {
            let (_, field) = self.fields[f.0 as usize].clone();
            let field_type = self.close(&field.field_type, args)?;
            closed_fields.push(self.push_field(
                id,
                field.name,
                field_type,
                field.is_static,
                field.visibility,
            ));
        }
        let mut closed_methods = Vec::with_capacity(methods.len());
        for m in methods {
            closed_methods.push(self.close_method(m, args)?);
        }
        let mut closed_ctors = Vec::with_capacity(constructors.len());
        for m in constructors {
            closed_ctors.push(self.close_method(m, args)?);
        }
        let ty = &mut self.types[id.0 as usize];
        ty.fields = closed_fields;
        ty.methods = closed_methods;
        ty.constructors = closed_ctors;
        Ok(id)
    }

    fn close_method(
        &mut self,
        method: NativeMethod,
        args: &[NativeTypeId],
    ) -> Result<NativeMethod, String> {
        let parameters = method
            .parameters
            .iter()
            .map(|p| self.close(p, args))
            .collect::<Result<Vec<_>, _>>()?;
        let return_type = match &method.return_type {
            Some(r) => Some(self.close(r, args)?),
            None => None,
        };
        Ok(NativeMethod {
            id: self.next_method_id(),
            parameters,
            return_type,
            ..method
        })
    }

    fn array_of(&mut self, element: NativeTypeId, rank: u32) -> Result<NativeTypeId, String> {
        if let Some(id) = self.arrays.get(&(element, rank)) {
            return Ok(*id);
        }
        if rank == 0 {
            return Err("array rank must be at least 1".to_string());
        }
        let name = format!(
            "{}[{}]",
            self.name_of(element),
            ",".repeat(rank as usize - 1)
        );
        let mut info = NativeTypeInfo::new(name, NativeTypeKind::Class);
        info.base = self.by_name.get("System.Array").copied();
        info.element = Some(element);
        info.array_rank = rank;
        let id = self.push(HostType {
            info,
            fields: vec![],
            methods: vec![],
            constructors: vec![],
            constraints: vec![],
        });
        self.arrays.insert((element, rank), id);
        Ok(id)
    }

    fn by_ref_of(&mut self, element: NativeTypeId) -> Result<NativeTypeId, String> {
        if let Some(id) = self.by_refs.get(&element) {
            return Ok(*id);
        }
        let mut info =
            NativeTypeInfo::new(format!("{}&", self.name_of(element)), NativeTypeKind::Class);
        info.element = Some(element);
        info.is_by_ref = true;
        let id = self.push(HostType {
            info,
            fields: vec![],
            methods: vec![],
            constructors: vec![],
            constraints: vec![],
        });
        self.by_refs.insert(element, id);
        Ok(id)
    }

    /// Instance fields of `ty` and its ancestors, base-first.
    fn instance_fields(&self, ty: NativeTypeId) -> Vec<&NativeField> {
        let mut chain = vec![];
        let mut current = Some(ty);
        while let Some(id) = current {
            let Some(t) = self.get(id) else { break };
            chain.push(t);
            current = t.info.base;
        }
        chain
            .iter()
            .rev()
            .flat_map(|t| t.fields.iter())
            .map(|f| &self.fields[f.0 as usize].1)
            .filter(|f| !f.is_static)
            .collect()
    }

    fn default_for(&self, sig: &NativeSig) -> Value {
        match sig {
            NativeSig::Type(id) => self
                .get(*id)
                .and_then(|t| t.info.primitive)
                .and_then(|p| p.default_value().scalar())
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

/// An object created by [`MemoryHost`].
pub struct MemoryObject {
    ty: NativeTypeId,
    slots: Mutex<HashMap<NativeFieldId, Value>>,
}

impl MemoryObject {
    pub fn type_id(&self) -> NativeTypeId {
        self.ty
    }
}

#[derive(Default)]
pub struct MemoryHost {
    state: RwLock<State>,
    statics: Mutex<HashMap<NativeFieldId, Value>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// A host preloaded with the `System` root and primitive types.
    pub fn with_core_types() -> Self {
        let host = Self::new();
        let object = host
            .define("System.Object", NativeTypeKind::Class)
            .well_known(WellKnownType::Object)
            .build();
        let value_type = host
            .define("System.ValueType", NativeTypeKind::Class)
            .base(object)
            .well_known(WellKnownType::ValueType)
            .abstract_type()
            .build();
        host.define("System.Enum", NativeTypeKind::Class)
            .base(value_type)
            .well_known(WellKnownType::Enum)
            .abstract_type()
            .build();
        let delegate = host
            .define("System.Delegate", NativeTypeKind::Class)
            .base(object)
            .well_known(WellKnownType::Delegate)
            .abstract_type()
            .build();
        host.define("System.MulticastDelegate", NativeTypeKind::Class)
            .base(delegate)
            .well_known(WellKnownType::MulticastDelegate)
            .abstract_type()
            .build();
        host.define("System.Array", NativeTypeKind::Class)
            .base(object)
            .abstract_type()
            .build();
        host.define("System.String", NativeTypeKind::Class)
            .base(object)
            .build();
        host.define("System.Void", NativeTypeKind::ValueType).build();
        use PrimitiveKind::*;
        for (name, kind) in [
            ("System.Boolean", Boolean),
            ("System.Char", Char),
            ("System.SByte", Int8),
            ("System.Byte", UInt8),
            ("System.Int16", Int16),
            ("System.UInt16", UInt16),
            ("System.Int32", Int32),
            ("System.UInt32", UInt32),
            ("System.Int64", Int64),
            ("System.UInt64", UInt64),
            ("System.Single", Float32),
            ("System.Double", Float64),
            ("System.IntPtr", IntPtr),
            ("System.UIntPtr", UIntPtr),
        ] {
            host.define(name, NativeTypeKind::ValueType)
                .primitive(kind)
                .build();
        }
        host
    }

    pub fn define(&self, full_name: &str, kind: NativeTypeKind) -> NativeTypeBuilder<'_> {
        NativeTypeBuilder {
            host: self,
            info: NativeTypeInfo::new(full_name, kind),
            fields: vec![],
            methods: vec![],
            constructors: vec![],
            constraints: vec![],
        }
    }

    pub fn type_named(&self, full_name: &str) -> Option<NativeTypeId> {
        self.state.read().by_name.get(full_name).copied()
    }

    pub fn field_named(&self, ty: NativeTypeId, name: &str) -> Option<NativeFieldId> {
        let state = self.state.read();
        state
            .get(ty)?
            .fields
            .iter()
            .copied()
            .find(|f| state.fields[f.0 as usize].1.name == name)
    }
}

pub struct NativeTypeBuilder<'a> {
    host: &'a MemoryHost,
    info: NativeTypeInfo,
    fields: Vec<(String, NativeSig, bool, Visibility)>,
    methods: Vec<NativeMethod>,
    constructors: Vec<NativeMethod>,
    constraints: Vec<Option<GenericConstraint>>,
}

impl NativeTypeBuilder<'_> {
    pub fn base(mut self, base: NativeTypeId) -> Self {
        self.info.base = Some(base);
        self
    }

    pub fn implements(mut self, interface: NativeTypeId) -> Self {
        self.info.interfaces.push(interface);
        self
    }

    pub fn well_known(mut self, kind: WellKnownType) -> Self {
        self.info.well_known = Some(kind);
        self
    }

    pub fn primitive(mut self, kind: PrimitiveKind) -> Self {
        self.info.primitive = Some(kind);
        self
    }

    pub fn delegate(mut self) -> Self {
        self.info.is_delegate = true;
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.info.is_abstract = true;
        self
    }

    pub fn generic_parameters(mut self, names: &[&str]) -> Self {
        self.info.generic_parameters = names.iter().map(|n| n.to_string()).collect();
        self.constraints = vec![None; names.len()];
        self
    }

    pub fn constraint(mut self, parameter: usize, constraint: GenericConstraint) -> Self {
        if let Some(slot) = self.constraints.get_mut(parameter) {
            *slot = Some(constraint);
        }
        self
    }

    pub fn field(self, name: &str, field_type: impl Into<NativeSig>) -> Self {
        self.member_field(name, field_type.into(), false, Visibility::Public)
    }

    pub fn static_field(self, name: &str, field_type: impl Into<NativeSig>) -> Self {
        self.member_field(name, field_type.into(), true, Visibility::Public)
    }

    pub fn member_field(
        mut self,
        name: &str,
        field_type: NativeSig,
        is_static: bool,
        visibility: Visibility,
    ) -> Self {
        self.fields
            .push((name.to_string(), field_type, is_static, visibility));
        self
    }

    pub fn method(
        self,
        name: &str,
        parameters: Vec<NativeSig>,
        return_type: Option<NativeSig>,
    ) -> Self {
        self.member_method(name, &[], parameters, return_type, false, true)
    }

    pub fn static_method(
        self,
        name: &str,
        parameters: Vec<NativeSig>,
        return_type: Option<NativeSig>,
    ) -> Self {
        self.member_method(name, &[], parameters, return_type, true, false)
    }

    pub fn generic_method(
        self,
        name: &str,
        generic_parameters: &[&str],
        parameters: Vec<NativeSig>,
        return_type: Option<NativeSig>,
    ) -> Self {
        self.member_method(name, generic_parameters, parameters, return_type, false, true)
    }

    fn member_method(
        mut self,
        name: &str,
        generic_parameters: &[&str],
        parameters: Vec<NativeSig>,
        return_type: Option<NativeSig>,
        is_static: bool,
        is_virtual: bool,
    ) -> Self {
        self.methods.push(NativeMethod {
            id: NativeMethodId(0),
            name: name.to_string(),
            parameters,
            return_type,
            generic_parameters: generic_parameters.iter().map(|g| g.to_string()).collect(),
            is_static,
            is_virtual,
            visibility: Visibility::Public,
        });
        self
    }

    pub fn constructor(mut self, parameters: Vec<NativeSig>) -> Self {
        self.constructors.push(NativeMethod {
            id: NativeMethodId(0),
            name: ".ctor".to_string(),
            parameters,
            return_type: None,
            generic_parameters: vec![],
            is_static: false,
            is_virtual: false,
            visibility: Visibility::Public,
        });
        self
    }

    /// Registers the type. Classes, value types and enums without an
    /// explicit base derive from the matching `System` root when it exists.
    pub fn build(mut self) -> NativeTypeId {
        let host = self.host;
        let mut state = host.state.write();
        if self.info.base.is_none() && self.info.well_known != Some(WellKnownType::Object) {
            let root = match self.info.kind {
                NativeTypeKind::Class => Some("System.Object"),
                NativeTypeKind::ValueType => Some("System.ValueType"),
                NativeTypeKind::Enum => Some("System.Enum"),
                NativeTypeKind::Interface => None,
            };
            self.info.base = root.and_then(|r| state.by_name.get(r).copied());
        }
        let id = state.push(HostType {
            info: self.info,
            fields: vec![],
            methods: vec![],
            constructors: vec![],
            constraints: self.constraints,
        });
        let fields = self
            .fields
            .into_iter()
            .map(|(name, sig, is_static, vis)| state.push_field(id, name, sig, is_static, vis))
            .collect();
        let methods = self
            .methods
            .into_iter()
            .map(|m| NativeMethod {
                id: state.next_method_id(),
                ..m
            })
            .collect();
        let constructors = self
            .constructors
            .into_iter()
            .map(|m| NativeMethod {
                id: state.next_method_id(),
                ..m
            })
            .collect();
        let ty = &mut state.types[id.0 as usize];
        ty.fields = fields;
        ty.methods = methods;
        ty.constructors = constructors;
        id
    }
}

impl NativeReflection for MemoryHost {
    fn describe(&self, ty: NativeTypeId) -> Option<NativeTypeInfo> {
        self.state.read().get(ty).map(|t| t.info.clone())
    }

    fn find_type(&self, full_name: &str) -> Option<NativeTypeId> {
        self.type_named(full_name)
    }

    fn fields(&self, ty: NativeTypeId) -> Vec<NativeField> {
        let state = self.state.read();
        match state.get(ty) {
            Some(t) => t
                .fields
                .iter()
                .map(|f| state.fields[f.0 as usize].1.clone())
                .collect(),
            None => vec![],
        }
    }

    fn methods(&self, ty: NativeTypeId) -> Vec<NativeMethod> {
        self.state
            .read()
            .get(ty)
            .map(|t| t.methods.clone())
            .unwrap_or_default()
    }

    fn constructors(&self, ty: NativeTypeId) -> Vec<NativeMethod> {
        self.state
            .read()
            .get(ty)
            .map(|t| t.constructors.clone())
            .unwrap_or_default()
    }

    fn make_generic_type(
        &self,
        definition: NativeTypeId,
        arguments: &[NativeTypeId],
    ) -> Result<NativeTypeId, String> {
        self.state.write().instantiate(definition, arguments)
    }

    fn make_array_type(&self, element: NativeTypeId, rank: u32) -> Result<NativeTypeId, String> {
        self.state.write().array_of(element, rank)
    }

    fn make_by_ref_type(&self, element: NativeTypeId) -> Result<NativeTypeId, String> {
        self.state.write().by_ref_of(element)
    }

    fn is_assignable_from(&self, target: NativeTypeId, source: NativeTypeId) -> bool {
        let state = self.state.read();
        let Some(t) = state.get(target) else {
            return false;
        };
        if t.info.well_known == Some(WellKnownType::Object) {
            return true;
        }
        let mut pending = vec![source];
        while let Some(id) = pending.pop() {
            if id == target {
                return true;
            }
            if let Some(s) = state.get(id) {
                pending.extend(s.info.base);
                pending.extend(s.info.interfaces.iter().copied());
            }
        }
        false
    }

    fn create_default_instance(&self, ty: NativeTypeId) -> Result<ObjectRef, String> {
        let state = self.state.read();
        let t = state
            .get(ty)
            .ok_or_else(|| format!("unknown native type {}", ty.0))?;
        if t.info.kind == NativeTypeKind::Interface || t.info.is_abstract {
            return Err(format!("{} is abstract", t.info.full_name));
        }
        if t.info.is_generic_definition() {
            return Err(format!("{} is an open generic type", t.info.full_name));
        }
        let slots = state
            .instance_fields(ty)
            .into_iter()
            .map(|f| (f.id, state.default_for(&f.field_type)))
            .collect();
        Ok(ObjectRef::new(MemoryObject {
            ty,
            slots: Mutex::new(slots),
        }))
    }

    fn get_field_value(
        &self,
        field: NativeFieldId,
        target: Option<&ObjectRef>,
    ) -> Result<Value, String> {
        let state = self.state.read();
        let (_, f) = state
            .fields
            .get(field.0 as usize)
            .ok_or_else(|| format!("unknown native field {}", field.0))?;
        if f.is_static {
            return Ok(self
                .statics
                .lock()
                .get(&field)
                .cloned()
                .unwrap_or_else(|| state.default_for(&f.field_type)));
        }
        let object = target
            .and_then(|t| t.downcast_ref::<MemoryObject>())
            .ok_or_else(|| format!("field {} requires a native instance", f.name))?;
        let slots = object.slots.lock();
        slots
            .get(&field)
            .cloned()
            .ok_or_else(|| format!("field {} is not defined on the target", f.name))
    }

    fn set_field_value(
        &self,
        field: NativeFieldId,
        target: Option<&ObjectRef>,
        value: Value,
    ) -> Result<(), String> {
        let state = self.state.read();
        let (_, f) = state
            .fields
            .get(field.0 as usize)
            .ok_or_else(|| format!("unknown native field {}", field.0))?;
        if f.is_static {
            self.statics.lock().insert(field, value);
            return Ok(());
        }
        let object = target
            .and_then(|t| t.downcast_ref::<MemoryObject>())
            .ok_or_else(|| format!("field {} requires a native instance", f.name))?;
        let mut slots = object.slots.lock();
        match slots.get_mut(&field) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(format!("field {} is not defined on the target", f.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_types_have_roots() {
        let host = MemoryHost::with_core_types();
        let object = host.type_named("System.Object").unwrap();
        let int = host.type_named("System.Int32").unwrap();
        let value_type = host.type_named("System.ValueType").unwrap();
        assert_eq!(host.describe(int).unwrap().base, Some(value_type));
        assert_eq!(host.describe(object).unwrap().base, None);
        assert!(host.is_assignable_from(object, int));
        assert!(!host.is_assignable_from(int, object));
    }

    #[test]
    fn test_generic_closure_is_cached_and_substituted() {
        let host = MemoryHost::with_core_types();
        let int = host.type_named("System.Int32").unwrap();
        let list = host
            .define("System.Collections.Generic.List", NativeTypeKind::Class)
            .generic_parameters(&["T"])
            .field("_items", NativeSig::Array(Box::new(NativeSig::TypeParameter(0)), 1))
            .method("Add", vec![NativeSig::TypeParameter(0)], None)
            .build();
        let a = host.make_generic_type(list, &[int]).unwrap();
        let b = host.make_generic_type(list, &[int]).unwrap();
        assert_eq!(a, b);
        let info = host.describe(a).unwrap();
        assert_eq!(info.full_name, "System.Collections.Generic.List<System.Int32>");
        let int_array = host.make_array_type(int, 1).unwrap();
        assert_eq!(host.fields(a)[0].field_type, NativeSig::Type(int_array));
        assert_eq!(host.methods(a)[0].parameters, vec![NativeSig::Type(int)]);
    }

    #[test]
    fn test_constraint_violation_is_refused() {
        let host = MemoryHost::with_core_types();
        let string = host.type_named("System.String").unwrap();
        let nullable = host
            .define("System.Nullable", NativeTypeKind::ValueType)
            .generic_parameters(&["T"])
            .constraint(0, GenericConstraint::ValueType)
            .build();
        assert!(host.make_generic_type(nullable, &[string]).is_err());
    }

    #[test]
    fn test_instance_field_round_trip() {
        let host = MemoryHost::with_core_types();
        let int = host.type_named("System.Int32").unwrap();
        let point = host
            .define("Geometry.Point", NativeTypeKind::ValueType)
            .field("x", int)
            .field("y", int)
            .build();
        let x = host.field_named(point, "x").unwrap();
        let obj = host.create_default_instance(point).unwrap();
        assert_eq!(host.get_field_value(x, Some(&obj)), Ok(Value::Int32(0)));
        host.set_field_value(x, Some(&obj), Value::Int32(9)).unwrap();
        assert_eq!(host.get_field_value(x, Some(&obj)), Ok(Value::Int32(9)));
        assert!(host.get_field_value(x, None).is_err());
    }
}
