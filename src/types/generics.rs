use crate::{
    error::Result,
    resolve::TypeRegistry,
    types::{TypeHandle, TypeInfo},
    utils::{
        sync::{Arc, RwLock},
        DebugStr,
    },
};
use gc_arena::{unsafe_empty_collect, Collect};
use std::fmt::{Debug, Formatter};

/// The arguments of a closed generic type, keyed by parameter name.
///
/// Instances built from positional data use the synthetic keys `!0`, `!1`,
/// ... instead of names; [`find`](Self::find) accepts either.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct GenericArguments(Arc<[(String, TypeHandle)]>);
unsafe_empty_collect!(GenericArguments);

impl GenericArguments {
    pub fn new(arguments: Vec<(String, TypeHandle)>) -> Self {
        Self(arguments.into())
    }

    pub fn named(names: &[String], types: &[TypeHandle]) -> Self {
        Self::new(names.iter().cloned().zip(types.iter().copied()).collect())
    }

    pub fn positional(types: &[TypeHandle]) -> Self {
        Self::new(
            types
                .iter()
                .enumerate()
                .map(|(i, t)| (positional_key(i), *t))
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn types(&self) -> Vec<TypeHandle> {
        self.0.iter().map(|(_, t)| *t).collect()
    }

    pub fn get(&self, key: &str) -> Option<TypeHandle> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, t)| *t)
    }

    /// Looks a parameter up by name, falling back to its declaration
    /// position.
    pub fn find(&self, name: &str, position: Option<usize>) -> Option<TypeHandle> {
        self.get(name)
            .or_else(|| position.and_then(|p| self.get(&positional_key(p))))
    }

    pub fn same_types(&self, types: &[TypeHandle]) -> bool {
        self.0.len() == types.len() && self.0.iter().zip(types).all(|((_, a), b)| a == b)
    }
}

impl Debug for GenericArguments {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|(k, t)| DebugStr(format!("{k}: {t}"))))
            .finish()
    }
}

pub(crate) fn positional_key(position: usize) -> String {
    format!("!{position}")
}

/// The generic arguments in scope while matching or closing a signature.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenericContext<'a> {
    pub type_arguments: Option<&'a GenericArguments>,
    pub method_arguments: &'a [TypeHandle],
}

impl<'a> GenericContext<'a> {
    pub fn for_type(type_arguments: Option<&'a GenericArguments>) -> Self {
        Self {
            type_arguments,
            method_arguments: &[],
        }
    }

    pub fn with_method_arguments(self, method_arguments: &'a [TypeHandle]) -> Self {
        Self {
            method_arguments,
            ..self
        }
    }
}

/// A member's declared type, possibly mentioning unbound generic parameters.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Signature {
    Type(TypeHandle),
    TypeParameter { name: String, position: usize },
    MethodParameter { name: String, position: usize },
    Array(Box<Signature>, u32),
    ByRef(Box<Signature>),
    Generic {
        definition: TypeHandle,
        arguments: Vec<Signature>,
    },
}
unsafe_empty_collect!(Signature);

impl Signature {
    pub fn resolved(&self) -> Option<TypeHandle> {
        match self {
            Signature::Type(t) => Some(*t),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved().is_none()
    }

    /// Structural match of a declared parameter against a concrete argument
    /// type. Array rank, by-ref-ness and generic nesting must agree exactly.
    pub fn matches(
        &self,
        registry: &TypeRegistry,
        candidate: TypeHandle,
        ctx: GenericContext<'_>,
    ) -> Result<bool> {
        Ok(match self {
            Signature::Type(t) => *t == candidate,
            Signature::MethodParameter { position, .. } => {
                ctx.method_arguments.get(*position) == Some(&candidate)
            }
            Signature::TypeParameter { name, position } => ctx
                .type_arguments
                .and_then(|a| a.find(name, Some(*position)))
                == Some(candidate),
            Signature::Array(inner, rank) => {
                let model = registry.get(candidate)?;
                match model.element_type() {
                    Some(element) if model.array_rank() == *rank => {
                        inner.matches(registry, element, ctx)?
                    }
                    _ => false,
                }
            }
            Signature::ByRef(inner) => {
                let model = registry.get(candidate)?;
                match model.element_type() {
                    Some(element) if model.is_by_ref() => inner.matches(registry, element, ctx)?,
                    _ => false,
                }
            }
            Signature::Generic {
                definition,
                arguments,
            } => {
                let model = registry.get(candidate)?;
                if model.generic_definition() != Some(*definition) {
                    return Ok(false);
                }
                let Some(actual) = model.generic_arguments() else {
                    return Ok(false);
                };
                let actual = actual.types();
                if actual.len() != arguments.len() {
                    return Ok(false);
                }
                for (sig, arg) in arguments.iter().zip(actual) {
                    if !sig.matches(registry, arg, ctx)? {
                        return Ok(false);
                    }
                }
                true
            }
        })
    }

    /// Substitutes every parameter the context can bind. Fully bound
    /// composites collapse into canonical array, by-ref and generic instance
    /// types.
    pub fn substitute(&self, registry: &TypeRegistry, ctx: GenericContext<'_>) -> Result<Signature> {
        Ok(match self {
            Signature::Type(_) => self.clone(),
            Signature::TypeParameter { name, position } => {
                match ctx.type_arguments.and_then(|a| a.find(name, Some(*position))) {
                    Some(t) => Signature::Type(t),
                    None => self.clone(),
                }
            }
            Signature::MethodParameter { position, .. } => {
                match ctx.method_arguments.get(*position) {
                    Some(t) => Signature::Type(*t),
                    None => self.clone(),
                }
            }
            Signature::Array(inner, rank) => match inner.substitute(registry, ctx)? {
                Signature::Type(e) => Signature::Type(registry.make_array_type(e, *rank)?),
                other => Signature::Array(Box::new(other), *rank),
            },
            Signature::ByRef(inner) => match inner.substitute(registry, ctx)? {
                Signature::Type(e) => Signature::Type(registry.make_by_ref_type(e)?),
                other => Signature::ByRef(Box::new(other)),
            },
            Signature::Generic {
                definition,
                arguments,
            } => {
                let arguments = arguments
                    .iter()
                    .map(|a| a.substitute(registry, ctx))
                    .collect::<Result<Vec<_>>>()?;
                match arguments.iter().map(Signature::resolved).collect::<Option<Vec<_>>>() {
                    Some(closed) => {
                        Signature::Type(registry.make_generic_instance(*definition, &closed)?)
                    }
                    None => Signature::Generic {
                        definition: *definition,
                        arguments,
                    },
                }
            }
        })
    }

    pub fn display(&self, registry: &TypeRegistry) -> String {
        match self {
            Signature::Type(t) => registry.type_name(*t),
            Signature::TypeParameter { name, .. } | Signature::MethodParameter { name, .. } => {
                name.clone()
            }
            Signature::Array(inner, rank) => array_name(&inner.display(registry), *rank),
            Signature::ByRef(inner) => format!("{}&", inner.display(registry)),
            Signature::Generic {
                definition,
                arguments,
            } => generic_name(
                &registry.type_name(*definition),
                arguments.iter().map(|a| a.display(registry)),
            ),
        }
    }
}

pub(crate) fn array_name(element: &str, rank: u32) -> String {
    format!("{element}[{}]", ",".repeat(rank.saturating_sub(1) as usize))
}

pub(crate) fn generic_name(definition: &str, arguments: impl IntoIterator<Item = String>) -> String {
    let arguments: Vec<_> = arguments.into_iter().collect();
    format!("{definition}<{}>", arguments.join(", "))
}

/// Already-built instances of one generic definition.
///
/// Keys are compared by argument identity, which is sound only because
/// every argument is a canonical registry handle. Lookup is a linear scan;
/// a definition rarely has more than a handful of instantiations.
pub struct GenericInstanceCache<T> {
    instances: RwLock<Vec<(Arc<[TypeHandle]>, T)>>,
}

impl<T: Clone> GenericInstanceCache<T> {
    pub fn new() -> Self {
        Self {
            instances: RwLock::new(vec![]),
        }
    }

    pub fn find(&self, arguments: &[TypeHandle]) -> Option<T> {
        self.instances
            .read()
            .iter()
            .find(|(key, _)| &key[..] == arguments)
            .map(|(_, v)| v.clone())
    }

    /// Returns the cached instance or builds and records a new one.
    ///
    /// The builder runs under the cache's write lock; it must not
    /// instantiate the same definition again.
    pub fn get_or_insert(
        &self,
        registry: &TypeRegistry,
        arguments: &[TypeHandle],
        build: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        if let Some(found) = self.find(arguments) {
            registry.record_generic_lookup(true);
            return Ok(found);
        }
        let mut instances = self.instances.write();
        if let Some((_, v)) = instances.iter().find(|(key, _)| &key[..] == arguments) {
            registry.record_generic_lookup(true);
            return Ok(v.clone());
        }
        registry.record_generic_lookup(false);
        let built = build()?;
        instances.push((arguments.into(), built.clone()));
        Ok(built)
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<T> {
        self.instances.read().iter().map(|(_, v)| v.clone()).collect()
    }
}

impl<T: Clone> Default for GenericInstanceCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for GenericInstanceCache<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "GenericInstanceCache({} instances)", self.instances.read().len())
    }
}
