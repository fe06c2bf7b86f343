//! Asset data model.
//!
//! An asset is a named, typed artifact produced or consumed by the workflow.
//! Its id never changes; moving an asset between nesting levels rewrites the
//! scope binding only. The value is opaque JSON shaped by a small schema
//! model (scalars, objects with named fields, arrays of either).

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::types::{AssetId, StateTransition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    String,
    Number,
    Boolean,
    Object,
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchemaType::String => "string",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Object => "object",
        };
        write!(f, "{}", s)
    }
}

/// Shape of an asset value. `fields` is only meaningful for objects; a
/// fieldless object schema accepts any JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSchema {
    #[serde(rename = "type")]
    pub type_tag: SchemaType,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_array: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<HashMap<String, AssetSchema>>,
}

impl AssetSchema {
    pub fn string() -> Self {
        Self {
            type_tag: SchemaType::String,
            is_array: false,
            fields: None,
        }
    }

    pub fn number() -> Self {
        Self {
            type_tag: SchemaType::Number,
            is_array: false,
            fields: None,
        }
    }

    pub fn boolean() -> Self {
        Self {
            type_tag: SchemaType::Boolean,
            is_array: false,
            fields: None,
        }
    }

    pub fn object(fields: impl IntoIterator<Item = (String, AssetSchema)>) -> Self {
        Self {
            type_tag: SchemaType::Object,
            is_array: false,
            fields: Some(fields.into_iter().collect()),
        }
    }

    /// Any JSON object, fields unchecked.
    pub fn freeform_object() -> Self {
        Self {
            type_tag: SchemaType::Object,
            is_array: false,
            fields: None,
        }
    }

    pub fn array_of(mut inner: AssetSchema) -> Self {
        inner.is_array = true;
        inner
    }

    pub fn validate(&self) -> EngineResult<()> {
        if let Some(fields) = &self.fields {
            if self.type_tag != SchemaType::Object {
                return Err(EngineError::Validation(format!(
                    "field schemas are only allowed on object type, got {}",
                    self.type_tag
                )));
            }
            for (name, schema) in fields {
                if name.is_empty() {
                    return Err(EngineError::Validation(
                        "schema field name must not be empty".to_string(),
                    ));
                }
                schema.validate()?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetStatus {
    /// Declared, value not produced yet.
    Pending,
    /// Value committed and resolvable.
    Ready,
    /// A running step is currently producing the value.
    InProgress,
    /// Placeholder created at implementation proposal, before execution.
    Proposed,
    /// Production failed; a recovery hop may reset this to Pending.
    Error,
}

impl fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetStatus::Pending => "PENDING",
            AssetStatus::Ready => "READY",
            AssetStatus::InProgress => "IN_PROGRESS",
            AssetStatus::Proposed => "PROPOSED",
            AssetStatus::Error => "ERROR",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    Input,
    Output,
    Intermediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Mission,
    Hop,
    ToolStep,
}

impl fmt::Display for ScopeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScopeType::Mission => "mission",
            ScopeType::Hop => "hop",
            ScopeType::ToolStep => "tool_step",
        };
        write!(f, "{}", s)
    }
}

/// The single nesting level an asset is bound to. Exactly one binding at a
/// time; promotion rewrites it in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetScope {
    pub scope_type: ScopeType,
    pub scope_id: String,
}

impl AssetScope {
    pub fn mission(id: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::Mission,
            scope_id: id.into(),
        }
    }

    pub fn hop(id: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::Hop,
            scope_id: id.into(),
        }
    }

    pub fn tool_step(id: impl Into<String>) -> Self {
        Self {
            scope_type: ScopeType::ToolStep,
            scope_id: id.into(),
        }
    }
}

impl fmt::Display for AssetScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scope_type, self.scope_id)
    }
}

/// Declared shape of an asset before it exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: AssetSchema,
    pub role: AssetRole,
}

impl AssetDefinition {
    pub fn new(name: impl Into<String>, schema: AssetSchema, role: AssetRole) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema,
            role,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.name.trim().is_empty() {
            return Err(EngineError::Validation(
                "asset name must not be empty".to_string(),
            ));
        }
        self.schema.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub asset_id: AssetId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: AssetSchema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    /// Sha-256 over the committed value, set together with it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub status: AssetStatus,
    pub role: AssetRole,
    pub scope: AssetScope,
    #[serde(default)]
    pub transitions: Vec<StateTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(def: AssetDefinition, scope: AssetScope) -> Self {
        let now = Utc::now();
        Self {
            asset_id: format!("asset-{}", Uuid::new_v4()),
            name: def.name,
            description: def.description,
            schema: def.schema,
            value: None,
            content_hash: None,
            status: AssetStatus::Pending,
            role: def.role,
            scope,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a status change. Asset statuses are driven by the workflow
    /// controllers, not by a transition table of their own.
    pub fn mark(&mut self, status: AssetStatus, reason: Option<String>) {
        if self.status == status {
            return;
        }
        self.transitions.push(StateTransition::new(
            self.status.to_string(),
            status.to_string(),
            reason,
        ));
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Store a produced value and make the asset resolvable.
    pub fn commit_value(&mut self, value: serde_json::Value) {
        self.content_hash = Some(hash_value(&value));
        self.value = Some(value);
        self.mark(AssetStatus::Ready, None);
        self.updated_at = Utc::now();
    }

    pub fn is_resolvable(&self) -> bool {
        self.status == AssetStatus::Ready && self.value.is_some()
    }

    /// Navigate the committed value with a dotted path. An absent or empty
    /// path returns the whole value.
    pub fn resolve_field(&self, path: Option<&str>) -> EngineResult<serde_json::Value> {
        let value = self
            .value
            .as_ref()
            .ok_or_else(|| EngineError::UnresolvedAsset {
                asset_id: self.asset_id.clone(),
                status: self.status.to_string(),
            })?;
        let path = match path {
            Some(p) if !p.is_empty() => p,
            _ => return Ok(value.clone()),
        };

        let mut current = value;
        for segment in path.split('.') {
            current = current
                .as_object()
                .and_then(|map| map.get(segment))
                .ok_or_else(|| EngineError::FieldNotFound {
                    asset_id: self.asset_id.clone(),
                    path: path.to_string(),
                })?;
        }
        Ok(current.clone())
    }
}

/// Deterministic fingerprint of a JSON value. serde_json keeps object keys
/// sorted, so semantically equal objects hash equal.
pub fn hash_value(value: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ready_asset(value: serde_json::Value) -> Asset {
        let mut asset = Asset::new(
            AssetDefinition::new("doc", AssetSchema::freeform_object(), AssetRole::Intermediate),
            AssetScope::hop("hop-1"),
        );
        asset.commit_value(value);
        asset
    }

    #[test]
    fn test_schema_fields_only_on_objects() {
        let bad = AssetSchema {
            type_tag: SchemaType::Number,
            is_array: false,
            fields: Some(HashMap::from([("x".to_string(), AssetSchema::string())])),
        };
        assert!(bad.validate().is_err());

        let good = AssetSchema::object([("x".to_string(), AssetSchema::string())]);
        good.validate().unwrap();
    }

    #[test]
    fn test_resolve_field_paths() {
        let asset = ready_asset(json!({"user": {"name": "ada", "age": 36}, "ok": true}));

        assert_eq!(asset.resolve_field(Some("user.name")).unwrap(), json!("ada"));
        assert_eq!(asset.resolve_field(Some("ok")).unwrap(), json!(true));
        assert_eq!(
            asset.resolve_field(None).unwrap(),
            json!({"user": {"name": "ada", "age": 36}, "ok": true})
        );

        let err = asset.resolve_field(Some("user.email")).unwrap_err();
        assert_eq!(err.kind(), "field_not_found");
    }

    #[test]
    fn test_resolve_without_value_is_rejected() {
        let asset = Asset::new(
            AssetDefinition::new("doc", AssetSchema::string(), AssetRole::Input),
            AssetScope::mission("mission-1"),
        );
        let err = asset.resolve_field(None).unwrap_err();
        assert_eq!(err.kind(), "unresolved_asset");
    }

    #[test]
    fn test_value_hash_ignores_key_insertion_order() {
        let a = hash_value(&json!({"a": 1, "b": 2}));
        let b = hash_value(&json!({"b": 2, "a": 1}));
        assert_eq!(a, b);
        assert_ne!(a, hash_value(&json!({"a": 1, "b": 3})));
    }

    #[test]
    fn test_commit_value_marks_ready_and_hashes() {
        let mut asset = Asset::new(
            AssetDefinition::new("n", AssetSchema::number(), AssetRole::Output),
            AssetScope::mission("mission-1"),
        );
        assert_eq!(asset.status, AssetStatus::Pending);

        asset.commit_value(json!(42));
        assert_eq!(asset.status, AssetStatus::Ready);
        assert!(asset.is_resolvable());
        assert_eq!(asset.content_hash.as_deref(), Some(hash_value(&json!(42)).as_str()));
        assert_eq!(asset.transitions.len(), 1);
        assert_eq!(asset.transitions[0].to, "READY");
    }
}
