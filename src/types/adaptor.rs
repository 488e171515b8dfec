//! Cross-binding adaptors.
//!
//! An adaptor stands in for a native base class or interface in the ancestry
//! of interpreted types. It presents the adapted native type's member surface
//! and assignability, but it is never instantiated itself: objects whose
//! ancestry passes through an adaptor are interpreted instances.
use crate::{
    error::{Result, TypeLoadError},
    host::NativeTypeId,
    metadata::FieldToken,
    resolve::TypeRegistry,
    types::{
        generics::GenericArguments,
        members::{FieldEntry, MethodEntry, MethodQuery},
        TypeHandle, TypeInfo,
    },
    value::DefaultValue,
};

pub struct AdaptorType {
    handle: TypeHandle,
    full_name: String,
    /// The adaptor class that marks this binding.
    adaptor_id: NativeTypeId,
    /// The adapted native type.
    native: TypeHandle,
    is_interface: bool,
    generic_arguments: Option<GenericArguments>,
    generic_definition: Option<TypeHandle>,
    generic_parameters: Vec<String>,
}

impl AdaptorType {
    pub(crate) fn new(
        handle: TypeHandle,
        full_name: String,
        adaptor_id: NativeTypeId,
        native: TypeHandle,
        adapted: &dyn TypeInfo,
    ) -> Self {
        Self {
            handle,
            full_name,
            adaptor_id,
            native,
            is_interface: adapted.is_interface(),
            generic_arguments: adapted.generic_arguments().cloned(),
            generic_definition: adapted.generic_definition(),
            generic_parameters: adapted.generic_parameters().to_vec(),
        }
    }

    pub fn adaptor_id(&self) -> NativeTypeId {
        self.adaptor_id
    }

    /// The native base class or interface this adaptor stands in for.
    pub fn adapted_type(&self) -> TypeHandle {
        self.native
    }
}

impl TypeInfo for AdaptorType {
    fn handle(&self) -> TypeHandle {
        self.handle
    }

    fn full_name(&self) -> &str {
        &self.full_name
    }

    fn is_value_type(&self) -> bool {
        false
    }

    fn is_interface(&self) -> bool {
        self.is_interface
    }

    fn is_enum(&self) -> bool {
        false
    }

    fn is_primitive(&self) -> bool {
        false
    }

    fn array_rank(&self) -> u32 {
        0
    }

    fn is_by_ref(&self) -> bool {
        false
    }

    fn element_type(&self) -> Option<TypeHandle> {
        None
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
        registry.get(self.native)?.is_delegate(registry)
    }

    fn base_type(&self, _registry: &TypeRegistry) -> Result<Option<TypeHandle>> {
        Ok(Some(self.native))
    }

    fn interfaces(&self, registry: &TypeRegistry) -> Result<Vec<TypeHandle>> {
        registry.get(self.native)?.interfaces(registry)
    }

    fn default_value(&self, _registry: &TypeRegistry) -> Result<DefaultValue> {
        Ok(DefaultValue::Null)
    }

    fn fields(&self, registry: &TypeRegistry) -> Result<Vec<FieldEntry>> {
        registry.get(self.native)?.fields(registry)
    }

    fn get_field(&self, registry: &TypeRegistry, token: FieldToken) -> Result<Option<FieldEntry>> {
        registry.get(self.native)?.get_field(registry, token)
    }

    fn get_field_by_name(&self, registry: &TypeRegistry, name: &str) -> Result<Option<FieldEntry>> {
        registry.get(self.native)?.get_field_by_name(registry, name)
    }

    fn total_field_count(&self, registry: &TypeRegistry) -> Result<usize> {
        registry.get(self.native)?.total_field_count(registry)
    }

    fn methods(&self, registry: &TypeRegistry) -> Result<Vec<MethodEntry>> {
        registry.get(self.native)?.methods(registry)
    }

    fn find_method(
        &self,
        registry: &TypeRegistry,
        query: &MethodQuery<'_>,
    ) -> Result<Option<MethodEntry>> {
        registry.get(self.native)?.find_method(registry, query)
    }

    fn find_virtual_method(
        &self,
        registry: &TypeRegistry,
        method: &MethodEntry,
    ) -> Result<Option<MethodEntry>> {
        registry.get(self.native)?.find_virtual_method(registry, method)
    }

    fn constructors(&self, registry: &TypeRegistry) -> Result<Vec<MethodEntry>> {
        registry.get(self.native)?.constructors(registry)
    }

    fn find_constructor(
        &self,
        registry: &TypeRegistry,
        parameters: &[TypeHandle],
    ) -> Result<Option<MethodEntry>> {
        registry.get(self.native)?.find_constructor(registry, parameters)
    }

    fn make_generic_instance(
        &self,
        registry: &TypeRegistry,
        arguments: &[TypeHandle],
    ) -> Result<TypeHandle> {
        Err(TypeLoadError::GenericInstantiation {
            type_name: self.full_name.clone(),
            arguments: arguments.iter().map(|a| registry.type_name(*a)).collect(),
            reason: "adaptors are bound to a closed native type".to_string(),
        })
    }

    fn can_assign_to(&self, registry: &TypeRegistry, target: TypeHandle) -> Result<bool> {
        if target == self.handle {
            return Ok(true);
        }
        registry.get(self.native)?.can_assign_to(registry, target)
    }

    fn first_native_ancestor(&self, _registry: &TypeRegistry) -> Result<Option<TypeHandle>> {
        Ok(Some(self.handle))
    }

    fn enum_underlying_type(&self, _registry: &TypeRegistry) -> Result<Option<TypeHandle>> {
        Ok(None)
    }
}
