//! Staged view over a StateStore.
//!
//! Controllers mutate a `StateTxn` instead of the store: writes are staged
//! in overlay maps, reads see staged entities first (read-your-writes), and
//! the coordinator commits the whole overlay as a single `WriteBatch`. A
//! rejected transaction simply drops the overlay; nothing reaches storage.

use std::collections::HashMap;

use itertools::Itertools;

use crate::asset::{Asset, AssetScope};
use crate::error::{EngineError, EngineResult};
use crate::types::{AssetId, Hop, HopId, Mission, MissionId, StepId, ToolStep};

use super::{StateStore, WriteBatch, WriteOp};

pub struct StateTxn<'a> {
    store: &'a dyn StateStore,
    missions: HashMap<MissionId, Mission>,
    hops: HashMap<HopId, Hop>,
    steps: HashMap<StepId, ToolStep>,
    assets: HashMap<AssetId, Asset>,
}

impl<'a> StateTxn<'a> {
    pub fn new(store: &'a dyn StateStore) -> Self {
        Self {
            store,
            missions: HashMap::new(),
            hops: HashMap::new(),
            steps: HashMap::new(),
            assets: HashMap::new(),
        }
    }

    // --- reads -------------------------------------------------------------

    pub async fn get_mission(&self, id: &str) -> EngineResult<Option<Mission>> {
        if let Some(m) = self.missions.get(id) {
            return Ok(Some(m.clone()));
        }
        self.store.get_mission(id).await
    }

    pub async fn get_hop(&self, id: &str) -> EngineResult<Option<Hop>> {
        if let Some(h) = self.hops.get(id) {
            return Ok(Some(h.clone()));
        }
        self.store.get_hop(id).await
    }

    pub async fn get_step(&self, id: &str) -> EngineResult<Option<ToolStep>> {
        if let Some(s) = self.steps.get(id) {
            return Ok(Some(s.clone()));
        }
        self.store.get_step(id).await
    }

    pub async fn get_asset(&self, id: &str) -> EngineResult<Option<Asset>> {
        if let Some(a) = self.assets.get(id) {
            return Ok(Some(a.clone()));
        }
        self.store.get_asset(id).await
    }

    pub async fn require_mission(&self, id: &str) -> EngineResult<Mission> {
        self.get_mission(id)
            .await?
            .ok_or_else(|| EngineError::not_found("mission", id))
    }

    pub async fn require_hop(&self, id: &str) -> EngineResult<Hop> {
        self.get_hop(id)
            .await?
            .ok_or_else(|| EngineError::not_found("hop", id))
    }

    pub async fn require_step(&self, id: &str) -> EngineResult<ToolStep> {
        self.get_step(id)
            .await?
            .ok_or_else(|| EngineError::not_found("tool_step", id))
    }

    pub async fn require_asset(&self, id: &str) -> EngineResult<Asset> {
        self.get_asset(id)
            .await?
            .ok_or_else(|| EngineError::not_found("asset", id))
    }

    /// Steps of one hop with staged versions folded in, ordered by sequence.
    pub async fn steps_for_hop(&self, hop_id: &str) -> EngineResult<Vec<ToolStep>> {
        let mut merged: HashMap<StepId, ToolStep> = self
            .store
            .steps_for_hop(hop_id)
            .await?
            .into_iter()
            .map(|s| (s.step_id.clone(), s))
            .collect();
        for (id, step) in &self.steps {
            if step.hop_id == hop_id {
                merged.insert(id.clone(), step.clone());
            }
        }
        Ok(merged
            .into_values()
            .sorted_by_key(|s| s.sequence_order)
            .collect())
    }

    /// Assets bound to exactly this scope, staged bindings folded in. An
    /// asset staged with a different scope disappears from its old one.
    pub async fn assets_in_scope(&self, scope: &AssetScope) -> EngineResult<Vec<Asset>> {
        let mut merged: HashMap<AssetId, Asset> = self
            .store
            .assets_in_scope(scope)
            .await?
            .into_iter()
            .map(|a| (a.asset_id.clone(), a))
            .collect();
        for (id, asset) in &self.assets {
            if asset.scope == *scope {
                merged.insert(id.clone(), asset.clone());
            } else {
                merged.remove(id);
            }
        }
        Ok(merged
            .into_values()
            .sorted_by_key(|a| a.created_at)
            .collect())
    }

    pub async fn find_asset_by_name(
        &self,
        scope: &AssetScope,
        name: &str,
    ) -> EngineResult<Option<Asset>> {
        Ok(self
            .assets_in_scope(scope)
            .await?
            .into_iter()
            .find(|a| a.name == name))
    }

    // --- writes ------------------------------------------------------------

    pub fn stage_mission(&mut self, mission: Mission) {
        self.missions.insert(mission.mission_id.clone(), mission);
    }

    pub fn stage_hop(&mut self, hop: Hop) {
        self.hops.insert(hop.hop_id.clone(), hop);
    }

    pub fn stage_step(&mut self, step: ToolStep) {
        self.steps.insert(step.step_id.clone(), step);
    }

    pub fn stage_asset(&mut self, asset: Asset) {
        self.assets.insert(asset.asset_id.clone(), asset);
    }

    pub fn is_empty(&self) -> bool {
        self.missions.is_empty()
            && self.hops.is_empty()
            && self.steps.is_empty()
            && self.assets.is_empty()
    }

    /// Drain the overlay into one batch. Entity order inside a group is
    /// id-sorted so file backends write deterministically.
    pub fn into_batch(self) -> WriteBatch {
        let mut batch = WriteBatch::new();
        for (_, m) in self.missions.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            batch.push(WriteOp::PutMission(m));
        }
        for (_, h) in self.hops.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            batch.push(WriteOp::PutHop(h));
        }
        for (_, s) in self.steps.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            batch.push(WriteOp::PutStep(s));
        }
        for (_, a) in self.assets.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
            batch.push(WriteOp::PutAsset(a));
        }
        batch
    }
}
