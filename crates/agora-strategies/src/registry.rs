//! Strategy identifier registry.
//!
//! Maps the external, versioned strategy identifiers carried by submissions to
//! the closed [`ExecutionStrategyType`] set and back. Construction rejects
//! duplicate names and duplicate types, so the inverse map always exists.

use std::collections::{HashMap, HashSet};

use agora_common::ExecutionStrategyType;
use thiserror::Error;

use agora_common::ExecutionStrategyType as T;

/// Identifiers understood by this worker.
pub const STANDARD_STRATEGIES: &[(&str, ExecutionStrategyType)] = &[
    ("python-code", T::PythonExecuteAndCheck),
    ("python-unit-tests", T::PythonUnitTests),
    ("python-code-against-unit-tests", T::PythonCodeExecuteAgainstUnitTests),
    ("python-project-tests", T::PythonProjectTests),
    ("python-project-unit-tests", T::PythonProjectUnitTests),
    ("javascript-code", T::NodeJsPreprocessExecuteAndCheck),
    ("javascript-js-dom-unit-tests", T::NodeJsPreprocessExecuteAndRunJsDomUnitTests),
    ("cpp-code", T::CPlusPlusCompileExecuteAndCheckExecutionStrategy),
    ("plaintext", T::CheckOnly),
    ("postgres-prepare-db-and-run-queries", T::PostgresPrepareDatabaseAndRunQueries),
    ("postgres-run-queries-and-check-db", T::PostgresRunQueriesAndCheckDatabase),
    (
        "postgres-run-skeleton-run-queries-and-check-db",
        T::PostgresRunSkeletonRunQueriesAndCheckDatabase,
    ),
];

/// Types that may be delegated to a remote worker.
pub const REMOTE_WHITELIST: &[ExecutionStrategyType] = &[
    T::CompileExecuteAndCheck,
    T::DotNetCoreCompileExecuteAndCheck,
    T::PythonExecuteAndCheck,
    T::JavaPreprocessCompileExecuteAndCheck,
    T::CPlusPlusCompileExecuteAndCheckExecutionStrategy,
    T::PhpCliExecuteAndCheck,
    T::NodeJsPreprocessExecuteAndCheck,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Strategy identifier registered twice: {0}")]
    DuplicateName(String),
    #[error("Strategy type {ty} registered under both {first} and {second}")]
    DuplicateType {
        ty: ExecutionStrategyType,
        first: String,
        second: String,
    },
    #[error("NotFound cannot be registered (identifier {0})")]
    ReservedType(String),
}

/// Bijective name <-> type registry plus the remote-capable subset.
#[derive(Debug, Clone)]
pub struct StrategyRegistry {
    by_name: HashMap<String, ExecutionStrategyType>,
    by_type: HashMap<ExecutionStrategyType, String>,
    remote_capable: HashSet<ExecutionStrategyType>,
}

impl StrategyRegistry {
    /// Build a registry from `(identifier, type)` pairs.
    pub fn new(entries: &[(&str, ExecutionStrategyType)]) -> Result<Self, RegistryError> {
        let mut by_name = HashMap::new();
        let mut by_type: HashMap<ExecutionStrategyType, String> = HashMap::new();

        for &(name, ty) in entries {
            if !ty.is_found() {
                return Err(RegistryError::ReservedType(name.to_string()));
            }
            if by_name.insert(name.to_string(), ty).is_some() {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
            if let Some(first) = by_type.insert(ty, name.to_string()) {
                return Err(RegistryError::DuplicateType {
                    ty,
                    first,
                    second: name.to_string(),
                });
            }
        }

        let remote_capable = REMOTE_WHITELIST
            .iter()
            .copied()
            .filter(|ty| by_type.contains_key(ty))
            .collect();

        Ok(Self {
            by_name,
            by_type,
            remote_capable,
        })
    }

    /// Registry over [`STANDARD_STRATEGIES`].
    pub fn standard() -> Self {
        Self::new(STANDARD_STRATEGIES).expect("standard strategy table must be a bijection")
    }

    /// Resolve an identifier. Unknown identifiers yield `NotFound`.
    pub fn resolve(&self, name: &str) -> ExecutionStrategyType {
        self.by_name
            .get(name)
            .copied()
            .unwrap_or(ExecutionStrategyType::NotFound)
    }

    /// Identifier registered for a type
    pub fn name_of(&self, ty: ExecutionStrategyType) -> Option<&str> {
        self.by_type.get(&ty).map(String::as_str)
    }

    pub fn is_remote_capable(&self, ty: ExecutionStrategyType) -> bool {
        self.remote_capable.contains(&ty)
    }

    /// List all registered identifiers.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
