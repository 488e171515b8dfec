//! Flattened value-type layouts.
//!
//! A value type stored inline occupies one header slot plus one slot per
//! scalar or reference field; nested value types with a known layout are
//! flattened into their container.
use crate::{
    error::{Result, TypeLoadError},
    resolve::TypeRegistry,
    types::{generics::Signature, TypeHandle, TypeInfo, TypeModel},
};
use gc_arena::{unsafe_empty_collect, Collect};

pub trait HasLayout {
    fn size(&self) -> usize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValueLayout {
    /// Total slots, header included.
    pub field_count: usize,
    /// Slots holding references or opaque native values.
    pub managed_count: usize,
}
unsafe_empty_collect!(ValueLayout);

impl ValueLayout {
    const HEADER: Self = Self {
        field_count: 1,
        managed_count: 0,
    };
    const SCALAR: Self = Self {
        field_count: 1,
        managed_count: 0,
    };
    const MANAGED: Self = Self {
        field_count: 1,
        managed_count: 1,
    };

    fn append(&mut self, other: ValueLayout) {
        self.field_count += other.field_count;
        self.managed_count += other.managed_count;
    }

    /// Appends a base type's block without its header.
    fn append_base(&mut self, base: ValueLayout) {
        self.field_count += base.field_count - 1;
        self.managed_count += base.managed_count;
    }
}

impl HasLayout for ValueLayout {
    fn size(&self) -> usize {
        self.field_count
    }
}

/// Computes (or returns the cached) layout of a value type. Reference types,
/// adaptors and native value types without a registered binder have none.
pub(crate) fn value_layout(registry: &TypeRegistry, ty: TypeHandle) -> Result<Option<ValueLayout>> {
    compute(registry, ty, &mut vec![])
}

fn compute(
    registry: &TypeRegistry,
    ty: TypeHandle,
    visiting: &mut Vec<TypeHandle>,
) -> Result<Option<ValueLayout>> {
    let model = registry.get(ty)?;
    let cache = match &*model {
        TypeModel::NativeType(n) => n.layout_cache(),
        TypeModel::InterpretedType(i) => i.layout_cache(),
        TypeModel::AdaptorType(_) => return Ok(None),
    };
    if let Some(layout) = cache.get() {
        return Ok(*layout);
    }
    if !model.is_value_type() {
        return Ok(None);
    }
    if let Some(start) = visiting.iter().position(|t| *t == ty) {
        let mut path: Vec<_> = visiting[start..]
            .iter()
            .map(|t| registry.type_name(*t))
            .collect();
        path.push(model.full_name().to_string());
        return Err(TypeLoadError::LayoutCycle {
            type_name: model.full_name().to_string(),
            path,
        });
    }

    visiting.push(ty);
    let built = build(registry, &model, visiting);
    visiting.pop();
    let layout = built?;
    tracing::trace!("value layout of {}: {:?}", model.full_name(), layout);
    Ok(*cache.get_or_build(|| layout))
}

fn build(
    registry: &TypeRegistry,
    model: &TypeModel,
    visiting: &mut Vec<TypeHandle>,
) -> Result<Option<ValueLayout>> {
    let mut layout = ValueLayout::HEADER;
    let fields = match model {
        TypeModel::NativeType(n) => {
            if !registry.has_value_type_binder(n.native_id()) {
                return Ok(None);
            }
            n.instance_fields(registry)?
        }
        TypeModel::InterpretedType(i) => {
            if let Some(base) = i.interpreted_base(registry)? {
                if let Some(base_layout) = compute(registry, base, visiting)? {
                    layout.append_base(base_layout);
                }
            }
            i.instance_fields(registry)?
        }
        TypeModel::AdaptorType(_) => return Ok(None),
    };
    for field in fields {
        layout.append(slot(registry, field.field_type(), visiting)?);
    }
    Ok(Some(layout))
}

fn slot(
    registry: &TypeRegistry,
    field_type: &Signature,
    visiting: &mut Vec<TypeHandle>,
) -> Result<ValueLayout> {
    let Some(ty) = field_type.resolved() else {
        return Ok(ValueLayout::MANAGED);
    };
    let model = registry.get(ty)?;
    if model.is_primitive() || model.is_enum() {
        return Ok(ValueLayout::SCALAR);
    }
    if !model.is_value_type() {
        return Ok(ValueLayout::MANAGED);
    }
    Ok(compute(registry, ty, visiting)?.unwrap_or(ValueLayout::MANAGED))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_base_drops_header() {
        let mut layout = ValueLayout::HEADER;
        layout.append(ValueLayout::MANAGED);
        let mut derived = ValueLayout::HEADER;
        derived.append_base(layout);
        derived.append(ValueLayout::SCALAR);
        assert_eq!(
            derived,
            ValueLayout {
                field_count: 3,
                managed_count: 1
            }
        );
        assert_eq!(derived.size(), 3);
    }
}
