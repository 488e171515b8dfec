//! A hybrid type system for an embedded bytecode interpreter.
//!
//! Types come from two worlds: *native* types described by the host through
//! [`host::NativeReflection`], and *interpreted* types defined in portable
//! modules read through [`metadata::ModuleMetadata`]. The
//! [`resolve::TypeRegistry`] builds one canonical [`types::TypeModel`] per
//! type, hands out stable [`types::TypeHandle`]s, closes generic definitions
//! on demand and splices registered cross-binding adaptors into the ancestry
//! of interpreted types that extend native ones.
//!
//! ```
//! use hybrid_rt::{
//!     host::memory::MemoryHost,
//!     metadata::{memory::{MemoryModule, TypeDefinitionBuilder}, TypeRef},
//!     resolve::TypeRegistry,
//!     types::TypeInfo,
//! };
//! use std::sync::Arc;
//!
//! let registry = TypeRegistry::new(Arc::new(MemoryHost::with_core_types()));
//! let mut module = MemoryModule::new("Game");
//! module.define(
//!     TypeDefinitionBuilder::value_type("Game", "Point")
//!         .field("X", TypeRef::named("System.Int32"))
//!         .field("Y", TypeRef::named("System.Int32"))
//!         .build(),
//! );
//! registry.load_module(Arc::new(module));
//!
//! let point = registry.find_type("Game.Point").unwrap().unwrap();
//! assert_eq!(registry.get(point).unwrap().total_field_count(&registry).unwrap(), 2);
//! ```
pub mod error;
pub mod host;
pub mod metadata;
pub mod resolve;
pub mod types;
pub mod utils;
pub mod value;

pub use error::{Result, TypeLoadError};
pub use resolve::{MethodInvoker, RegistryOptions, RegistryStats, TypeRegistry};
pub use types::{TypeHandle, TypeInfo, TypeModel};
