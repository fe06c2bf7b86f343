//! Asset store operations.
//!
//! Responsibilities:
//! - Create assets into a scope, with validation up front.
//! - Promote an asset to another scope without changing its identity.
//! - Reset failed production targets so a recovery hop can re-produce them.
//!
//! All functions stage into a `StateTxn`; nothing touches storage until the
//! coordinator commits.

use serde_json::Value;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::storage::StateTxn;
use crate::types::StateTransition;

use super::{Asset, AssetDefinition, AssetScope, AssetStatus};

/// Create an asset bound to `scope`. With a value it is born Ready,
/// otherwise Pending. Rejects a duplicate name in the target scope.
pub async fn create_asset(
    txn: &mut StateTxn<'_>,
    def: AssetDefinition,
    scope: AssetScope,
    value: Option<Value>,
) -> EngineResult<Asset> {
    def.validate()?;
    check_name_free(txn, &scope, &def.name, None).await?;

    let mut asset = Asset::new(def, scope);
    if let Some(value) = value {
        asset.commit_value(value);
    }
    debug!("[AssetStore] Created asset {} in {}", asset.asset_id, asset.scope);
    txn.stage_asset(asset.clone());
    Ok(asset)
}

/// Create a Proposed placeholder for an output that a step will produce
/// later. Placeholders let later steps reference the asset by id before any
/// value exists.
pub async fn create_placeholder(
    txn: &mut StateTxn<'_>,
    def: AssetDefinition,
    scope: AssetScope,
) -> EngineResult<Asset> {
    def.validate()?;
    check_name_free(txn, &scope, &def.name, None).await?;

    let mut asset = Asset::new(def, scope);
    asset.mark(AssetStatus::Proposed, None);
    txn.stage_asset(asset.clone());
    Ok(asset)
}

/// Rebind an asset from one scope to another. The id, schema, value and
/// content hash are untouched; afterwards the asset is visible in exactly
/// the target scope.
pub async fn promote_asset(
    txn: &mut StateTxn<'_>,
    asset_id: &str,
    from: &AssetScope,
    to: &AssetScope,
) -> EngineResult<Asset> {
    let mut asset = txn.require_asset(asset_id).await?;
    if asset.scope != *from {
        return Err(EngineError::Validation(format!(
            "asset {} is bound to {}, expected {}",
            asset_id, asset.scope, from
        )));
    }
    if from == to {
        return Ok(asset);
    }
    check_name_free(txn, to, &asset.name, Some(asset_id)).await?;

    asset.transitions.push(StateTransition::new(
        asset.scope.to_string(),
        to.to_string(),
        Some("scope promotion".to_string()),
    ));
    asset.scope = to.clone();
    asset.updated_at = chrono::Utc::now();
    debug!("[AssetStore] Promoted asset {} from {} to {}", asset_id, from, to);
    txn.stage_asset(asset.clone());
    Ok(asset)
}

/// Return a failed or half-produced asset to Pending so another hop can
/// produce it. Ready assets are left alone.
pub async fn reset_for_recovery(txn: &mut StateTxn<'_>, asset_id: &str) -> EngineResult<()> {
    let mut asset = txn.require_asset(asset_id).await?;
    if matches!(asset.status, AssetStatus::InProgress | AssetStatus::Error) {
        asset.mark(AssetStatus::Pending, Some("producing hop cancelled".to_string()));
        txn.stage_asset(asset);
    }
    Ok(())
}

async fn check_name_free(
    txn: &StateTxn<'_>,
    scope: &AssetScope,
    name: &str,
    allow_id: Option<&str>,
) -> EngineResult<()> {
    if let Some(existing) = txn.find_asset_by_name(scope, name).await? {
        if allow_id != Some(existing.asset_id.as_str()) {
            return Err(EngineError::ScopeConflict {
                scope_type: scope.scope_type,
                scope_id: scope.scope_id.clone(),
                name: name.to_string(),
                existing_id: existing.asset_id,
            });
        }
    }
    Ok(())
}
