//! Error types shared across the engine.
//!
//! Responsibilities:
//! - Define the single error enum every controller and backend returns.
//! - Keep a stable machine-readable kind string for transaction results.
//!
//! Validation and transition errors are raised before any state is staged,
//! so a rejected operation never leaves partial writes behind.

use thiserror::Error;

use crate::asset::ScopeType;

pub type EngineResult<T> = Result<T, EngineError>;

/// Error type for all engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Payload or definition failed a structural check before any write.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested status change is not in the entity's transition table.
    #[error("Invalid transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    /// Referenced entity does not exist in the store.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Parameter resolution hit an asset that holds no committed value yet.
    #[error("Asset {asset_id} is not resolvable in status {status}")]
    UnresolvedAsset { asset_id: String, status: String },

    /// Dotted-path navigation left the asset's value or schema.
    #[error("Field path '{path}' not found on asset {asset_id}")]
    FieldNotFound { asset_id: String, path: String },

    /// Target scope already holds a different asset under the same name.
    #[error("Scope {scope_type}:{scope_id} already has an asset named '{name}' ({existing_id})")]
    ScopeConflict {
        scope_type: ScopeType,
        scope_id: String,
        name: String,
        existing_id: String,
    },

    /// Tool outputs did not line up with the step's declared result mapping.
    #[error("Output mapping error: {0}")]
    OutputMapping(String),

    /// A tool handler returned an error while executing a step.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Storage backend failure. Aborts the batch; prior state is intact.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Stable kind tag carried on failed transaction results.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::NotFound { .. } => "not_found",
            EngineError::UnresolvedAsset { .. } => "unresolved_asset",
            EngineError::FieldNotFound { .. } => "field_not_found",
            EngineError::ScopeConflict { .. } => "scope_conflict",
            EngineError::OutputMapping(_) => "output_mapping",
            EngineError::Execution(_) => "execution",
            EngineError::Storage(_) => "storage",
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(format!("IO error: {}", e))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(format!("Serialization error: {}", e))
    }
}
