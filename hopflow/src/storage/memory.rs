//! In-memory implementation of the StateStore trait.
//!
//! Default backend for tests and embedded use. All state lives in one
//! RwLock'd arena; `apply` takes the write lock once, so readers never see
//! a half-applied batch.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{EntityMaps, StateStore, WriteBatch};
use crate::asset::{Asset, AssetScope};
use crate::error::EngineResult;
use crate::types::{Hop, Mission, ToolStep};

#[derive(Default)]
pub struct InMemoryStateStore {
    state: RwLock<EntityMaps>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_mission(&self, id: &str) -> EngineResult<Option<Mission>> {
        Ok(self.state.read().await.missions.get(id).cloned())
    }

    async fn get_hop(&self, id: &str) -> EngineResult<Option<Hop>> {
        Ok(self.state.read().await.hops.get(id).cloned())
    }

    async fn get_step(&self, id: &str) -> EngineResult<Option<ToolStep>> {
        Ok(self.state.read().await.steps.get(id).cloned())
    }

    async fn get_asset(&self, id: &str) -> EngineResult<Option<Asset>> {
        Ok(self.state.read().await.assets.get(id).cloned())
    }

    async fn list_missions(&self) -> EngineResult<Vec<Mission>> {
        Ok(self.state.read().await.missions_sorted())
    }

    async fn hops_for_mission(&self, mission_id: &str) -> EngineResult<Vec<Hop>> {
        Ok(self.state.read().await.hops_for_mission(mission_id))
    }

    async fn steps_for_hop(&self, hop_id: &str) -> EngineResult<Vec<ToolStep>> {
        Ok(self.state.read().await.steps_for_hop(hop_id))
    }

    async fn assets_in_scope(&self, scope: &AssetScope) -> EngineResult<Vec<Asset>> {
        Ok(self.state.read().await.assets_in_scope(scope))
    }

    async fn apply(&self, batch: WriteBatch) -> EngineResult<()> {
        self.state.write().await.apply_batch(batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::WriteOp;
    use super::*;
    use crate::types::Mission;

    #[tokio::test]
    async fn test_apply_batch_is_visible_as_a_unit() {
        let store = InMemoryStateStore::new();
        let mission = Mission::new("m".into(), "goal".into());
        let id = mission.mission_id.clone();

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutMission(mission));
        store.apply(batch).await.unwrap();

        assert!(store.get_mission(&id).await.unwrap().is_some());
        assert_eq!(store.list_missions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_entity() {
        let store = InMemoryStateStore::new();
        let mission = Mission::new("m".into(), "goal".into());
        let id = mission.mission_id.clone();

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::PutMission(mission));
        store.apply(batch).await.unwrap();

        let mut batch = WriteBatch::new();
        batch.push(WriteOp::DeleteMission(id.clone()));
        store.apply(batch).await.unwrap();

        assert!(store.get_mission(&id).await.unwrap().is_none());
    }
}
