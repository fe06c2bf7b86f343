//! Engine façade.
//!
//! `MissionEngine` wires storage, the tool registry and the coordinator
//! together and is the object embedders hold: one mutation surface
//! (`update_state`), a read-only query surface and a convenience driver
//! that runs a hop's steps to the end.

use std::collections::HashMap;
use std::sync::Arc;

use crate::asset::{Asset, AssetScope, ScopeType};
use crate::config::EngineConfig;
use crate::coordinator::{StateCoordinator, StateTransaction, TransactionResult};
use crate::error::{EngineError, EngineResult};
use crate::observer::TransitionObserver;
use crate::runner::StepRunner;
use crate::storage::{StateStore, StorageFactory};
use crate::tools::ToolRegistry;
use crate::types::{AssetId, Hop, Mission, ToolStep};

pub struct MissionEngine {
    store: Arc<dyn StateStore>,
    registry: Arc<ToolRegistry>,
    coordinator: Arc<StateCoordinator>,
}

impl MissionEngine {
    /// Build an engine from config, with the given registry of tools. The
    /// registry is constructed by the embedder at startup and injected;
    /// there is no global tool state.
    pub fn new(config: &EngineConfig, registry: Arc<ToolRegistry>) -> EngineResult<Self> {
        let store = StorageFactory::create(&config.storage)?;
        Ok(Self::with_store(store, registry))
    }

    pub fn with_store(store: Arc<dyn StateStore>, registry: Arc<ToolRegistry>) -> Self {
        let coordinator = Arc::new(StateCoordinator::new(store.clone(), registry.clone()));
        Self {
            store,
            registry,
            coordinator,
        }
    }

    /// In-memory engine with an empty registry. The default for tests and
    /// small embeddings.
    pub fn in_memory() -> Self {
        Self::with_store(
            Arc::new(crate::storage::InMemoryStateStore::new()),
            Arc::new(ToolRegistry::new()),
        )
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<StateCoordinator> {
        &self.coordinator
    }

    pub async fn add_observer(&self, observer: Arc<dyn TransitionObserver>) {
        self.coordinator.add_observer(observer).await;
    }

    // --- mutation surface ---------------------------------------------------

    pub async fn update_state(&self, transaction: StateTransaction) -> TransactionResult {
        self.coordinator.update_state(transaction).await
    }

    /// Run the mission's executing hop to the end: invoke each executing
    /// step's tool and feed the outcomes back through `update_state`.
    /// Returns the mission as it stands afterwards.
    pub async fn run_mission(&self, mission_id: &str) -> EngineResult<Mission> {
        let runner = StepRunner::new(self.coordinator.clone(), self.registry.clone());
        runner.drive(mission_id).await?;
        self.require_mission(mission_id).await
    }

    // --- query surface (read-only) ------------------------------------------

    pub async fn get_mission(&self, mission_id: &str) -> EngineResult<Option<Mission>> {
        self.store.get_mission(mission_id).await
    }

    pub async fn require_mission(&self, mission_id: &str) -> EngineResult<Mission> {
        self.get_mission(mission_id)
            .await?
            .ok_or_else(|| EngineError::not_found("mission", mission_id))
    }

    pub async fn get_hop(&self, hop_id: &str) -> EngineResult<Option<Hop>> {
        self.store.get_hop(hop_id).await
    }

    pub async fn get_step(&self, step_id: &str) -> EngineResult<Option<ToolStep>> {
        self.store.get_step(step_id).await
    }

    pub async fn get_asset(&self, asset_id: &str) -> EngineResult<Option<Asset>> {
        self.store.get_asset(asset_id).await
    }

    pub async fn list_missions(&self) -> EngineResult<Vec<Mission>> {
        self.store.list_missions().await
    }

    pub async fn list_hops(&self, mission_id: &str) -> EngineResult<Vec<Hop>> {
        self.store.hops_for_mission(mission_id).await
    }

    pub async fn list_steps(&self, hop_id: &str) -> EngineResult<Vec<ToolStep>> {
        self.store.steps_for_hop(hop_id).await
    }

    /// Working set at one scope, keyed by asset id.
    pub async fn get_assets_by_scope(
        &self,
        scope_type: ScopeType,
        scope_id: &str,
    ) -> EngineResult<HashMap<AssetId, Asset>> {
        let scope = AssetScope {
            scope_type,
            scope_id: scope_id.to_string(),
        };
        Ok(self
            .store
            .assets_in_scope(&scope)
            .await?
            .into_iter()
            .map(|a| (a.asset_id.clone(), a))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::StateTransaction;
    use crate::storage::StorageConfig;
    use crate::types::MissionDefinition;

    fn mission_def() -> MissionDefinition {
        MissionDefinition {
            name: "m".into(),
            goal: "goal".into(),
            success_criteria: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_engine_from_default_config() {
        let engine =
            MissionEngine::new(&EngineConfig::default(), Arc::new(ToolRegistry::new())).unwrap();
        let result = engine
            .update_state(StateTransaction::ProposeMission {
                definition: mission_def(),
            })
            .await;
        assert!(result.success);
        assert_eq!(engine.list_missions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_engine_from_file_config_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            storage: StorageConfig::File {
                path: dir.path().to_path_buf(),
            },
        };

        let mission_id = {
            let engine =
                MissionEngine::new(&config, Arc::new(ToolRegistry::new())).unwrap();
            let result = engine
                .update_state(StateTransaction::ProposeMission {
                    definition: mission_def(),
                })
                .await;
            result.mission_id.unwrap()
        };

        let engine = MissionEngine::new(&config, Arc::new(ToolRegistry::new())).unwrap();
        assert!(engine.get_mission(&mission_id).await.unwrap().is_some());
    }
}
