//! Scope resolution.
//!
//! A hop's working set is the only cross-scope visibility the engine grants:
//! assets bound to the hop itself, mission assets imported through the hop's
//! input mapping, and the mission asset named by an existing-asset output
//! spec. Everything a step references must come from this set.

use std::collections::HashMap;

use crate::error::EngineResult;
use crate::storage::StateTxn;
use crate::types::{AssetId, Hop};

use super::{Asset, AssetScope};

pub struct ScopeView {
    assets: HashMap<AssetId, Asset>,
}

impl ScopeView {
    pub async fn for_hop(txn: &StateTxn<'_>, hop: &Hop) -> EngineResult<Self> {
        let mut assets = HashMap::new();
        for asset in txn
            .assets_in_scope(&AssetScope::hop(hop.hop_id.as_str()))
            .await?
        {
            assets.insert(asset.asset_id.clone(), asset);
        }
        for asset_id in hop.input_mapping.values() {
            let asset = txn.require_asset(asset_id).await?;
            assets.insert(asset.asset_id.clone(), asset);
        }
        if let Some(asset_id) = hop.output_spec.existing_asset_id() {
            let asset = txn.require_asset(asset_id).await?;
            assets.insert(asset.asset_id.clone(), asset);
        }
        Ok(Self { assets })
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.assets.contains_key(asset_id)
    }

    pub fn get(&self, asset_id: &str) -> Option<&Asset> {
        self.assets.get(asset_id)
    }

    /// Make a just-created asset referencable by later steps of the same
    /// proposal before anything is committed.
    pub fn insert(&mut self, asset: Asset) {
        self.assets.insert(asset.asset_id.clone(), asset);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
