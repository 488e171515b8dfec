use thiserror::Error;

/// Failures raised while resolving types and members.
///
/// Every variant names the offending type so the interpreter can report it
/// without walking back through bytecode offsets.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeLoadError {
    #[error("Type not found: {0}")]
    TypeNotFound(String),
    #[error("Module {module} cannot supply metadata for type descriptor {descriptor}")]
    MissingMetadata { module: String, descriptor: u32 },
    #[error("Cannot find adaptor for {native} (required by {type_name})")]
    MissingAdaptor { type_name: String, native: String },
    #[error("Cross-binding adaptor for {0} is already registered")]
    DuplicateAdaptor(String),
    #[error("Circular inheritance in {type_name}: {}", path.join(" -> "))]
    InheritanceCycle { type_name: String, path: Vec<String> },
    #[error("Value type layout cycle in {type_name}: {}", path.join(" -> "))]
    LayoutCycle { type_name: String, path: Vec<String> },
    #[error("Static initializer of {type_name} failed: {reason}")]
    StaticInitializer { type_name: String, reason: String },
    #[error("Ambiguous match for {type_name}::{signature}: {}", candidates.join(", "))]
    AmbiguousMatch {
        type_name: String,
        signature: String,
        candidates: Vec<String>,
    },
    #[error("Generic instantiation failed: {type_name}<{}>: {reason}", arguments.join(", "))]
    GenericInstantiation {
        type_name: String,
        arguments: Vec<String>,
        reason: String,
    },
    #[error("Generic argument count mismatch for {type_name}: expected {expected}, got {actual}")]
    GenericArgumentCount {
        type_name: String,
        expected: usize,
        actual: usize,
    },
    #[error("Unbound generic parameter {parameter} in {type_name}")]
    UnboundGenericParameter { type_name: String, parameter: String },
    #[error("Cannot instantiate {type_name}: {reason}")]
    Instantiation { type_name: String, reason: String },
    #[error("Field access failed on {type_name}::{field}: {reason}")]
    FieldAccess {
        type_name: String,
        field: String,
        reason: String,
    },
    #[error("Invalid type handle {0}")]
    InvalidHandle(u32),
}

pub type Result<T, E = TypeLoadError> = std::result::Result<T, E>;
