//! Persistence layer.
//!
//! Responsibilities:
//! - Define the storage-agnostic `StateStore` trait the engine talks to.
//! - Provide in-memory and file-backed implementations plus a config-driven
//!   factory.
//! - Carry every mutation of one transaction in a `WriteBatch` so `apply`
//!   lands it as a unit with respect to concurrent readers.

pub mod file;
pub mod memory;
pub mod txn;

pub use file::FileStateStore;
pub use memory::InMemoryStateStore;
pub use txn::StateTxn;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetScope};
use crate::error::EngineResult;
use crate::types::{AssetId, Hop, HopId, Mission, MissionId, StepId, ToolStep};

/// One staged mutation. Batches are applied in order; later ops win.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    PutMission(Mission),
    PutHop(Hop),
    PutStep(ToolStep),
    PutAsset(Asset),
    DeleteMission(MissionId),
    DeleteHop(HopId),
    DeleteStep(StepId),
    DeleteAsset(AssetId),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Storage-agnostic persistence API.
///
/// Backends must be Send + Sync so the engine can share them behind an Arc.
/// `apply` is the only mutator; a failed apply must leave the previously
/// visible state readable.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_mission(&self, id: &str) -> EngineResult<Option<Mission>>;
    async fn get_hop(&self, id: &str) -> EngineResult<Option<Hop>>;
    async fn get_step(&self, id: &str) -> EngineResult<Option<ToolStep>>;
    async fn get_asset(&self, id: &str) -> EngineResult<Option<Asset>>;

    async fn list_missions(&self) -> EngineResult<Vec<Mission>>;
    /// Hops of one mission, ordered by sequence.
    async fn hops_for_mission(&self, mission_id: &str) -> EngineResult<Vec<Hop>>;
    /// Steps of one hop, ordered by sequence.
    async fn steps_for_hop(&self, hop_id: &str) -> EngineResult<Vec<ToolStep>>;
    /// Assets currently bound to exactly this scope.
    async fn assets_in_scope(&self, scope: &AssetScope) -> EngineResult<Vec<Asset>>;

    async fn apply(&self, batch: WriteBatch) -> EngineResult<()>;
}

/// Hash-map arena shared by both backends. Entities reference each other by
/// id only; nothing is embedded.
#[derive(Debug, Clone, Default)]
pub(crate) struct EntityMaps {
    pub missions: HashMap<MissionId, Mission>,
    pub hops: HashMap<HopId, Hop>,
    pub steps: HashMap<StepId, ToolStep>,
    pub assets: HashMap<AssetId, Asset>,
}

impl EntityMaps {
    pub fn apply_batch(&mut self, batch: WriteBatch) {
        for op in batch.ops {
            match op {
                WriteOp::PutMission(m) => {
                    self.missions.insert(m.mission_id.clone(), m);
                }
                WriteOp::PutHop(h) => {
                    self.hops.insert(h.hop_id.clone(), h);
                }
                WriteOp::PutStep(s) => {
                    self.steps.insert(s.step_id.clone(), s);
                }
                WriteOp::PutAsset(a) => {
                    self.assets.insert(a.asset_id.clone(), a);
                }
                WriteOp::DeleteMission(id) => {
                    self.missions.remove(&id);
                }
                WriteOp::DeleteHop(id) => {
                    self.hops.remove(&id);
                }
                WriteOp::DeleteStep(id) => {
                    self.steps.remove(&id);
                }
                WriteOp::DeleteAsset(id) => {
                    self.assets.remove(&id);
                }
            }
        }
    }

    pub fn missions_sorted(&self) -> Vec<Mission> {
        self.missions
            .values()
            .cloned()
            .sorted_by_key(|m| m.created_at)
            .collect()
    }

    pub fn hops_for_mission(&self, mission_id: &str) -> Vec<Hop> {
        self.hops
            .values()
            .filter(|h| h.mission_id == mission_id)
            .cloned()
            .sorted_by_key(|h| h.sequence_order)
            .collect()
    }

    pub fn steps_for_hop(&self, hop_id: &str) -> Vec<ToolStep> {
        self.steps
            .values()
            .filter(|s| s.hop_id == hop_id)
            .cloned()
            .sorted_by_key(|s| s.sequence_order)
            .collect()
    }

    pub fn assets_in_scope(&self, scope: &AssetScope) -> Vec<Asset> {
        self.assets
            .values()
            .filter(|a| a.scope == *scope)
            .cloned()
            .sorted_by_key(|a| a.created_at)
            .collect()
    }
}

/// Backend selection, loadable from config files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    #[default]
    InMemory,
    File {
        path: PathBuf,
    },
}

pub struct StorageFactory;

impl StorageFactory {
    pub fn create(config: &StorageConfig) -> EngineResult<Arc<dyn StateStore>> {
        match config {
            StorageConfig::InMemory => Ok(Arc::new(InMemoryStateStore::new())),
            StorageConfig::File { path } => Ok(Arc::new(FileStateStore::new(path.clone())?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_wire_format() {
        let cfg: StorageConfig = serde_json::from_str(r#"{"type":"in_memory"}"#).unwrap();
        assert_eq!(cfg, StorageConfig::InMemory);

        let cfg: StorageConfig =
            serde_json::from_str(r#"{"type":"file","path":"/tmp/hopflow"}"#).unwrap();
        assert_eq!(
            cfg,
            StorageConfig::File {
                path: PathBuf::from("/tmp/hopflow")
            }
        );
        assert_eq!(StorageConfig::default(), StorageConfig::InMemory);
    }
}
