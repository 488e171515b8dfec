//! Utility types and functions used throughout the codebase.
use std::fmt::{Debug, Formatter};

pub mod sync;

/// Prints its contents verbatim under `{:?}`.
pub struct DebugStr(pub String);

impl Debug for DebugStr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn join_type_name(namespace: &str, name: &str) -> String {
    if namespace.is_empty() {
        name.to_string()
    } else {
        format!("{namespace}.{name}")
    }
}
