//! File-based implementation of the StateStore trait.
//!
//! Each entity is stored as one JSON file under a per-kind subdirectory:
//!
//!   <base>/missions/<id>.json
//!   <base>/hops/<id>.json
//!   <base>/steps/<id>.json
//!   <base>/assets/<id>.json
//!
//! The full tree is loaded into an in-memory cache on open; reads are served
//! from the cache. `apply` serializes the whole batch up front and writes
//! files before committing the cache, so a failed apply leaves the in-process
//! view unchanged.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::warn;

use super::{EntityMaps, StateStore, WriteBatch, WriteOp};
use crate::asset::{Asset, AssetScope};
use crate::error::{EngineError, EngineResult};
use crate::types::{Hop, Mission, ToolStep};

const MISSIONS_DIR: &str = "missions";
const HOPS_DIR: &str = "hops";
const STEPS_DIR: &str = "steps";
const ASSETS_DIR: &str = "assets";

pub struct FileStateStore {
    base_path: PathBuf,
    cache: RwLock<EntityMaps>,
}

enum PlannedIo {
    Write(PathBuf, String),
    Delete(PathBuf),
}

impl FileStateStore {
    pub fn new(base_path: PathBuf) -> EngineResult<Self> {
        for dir in [MISSIONS_DIR, HOPS_DIR, STEPS_DIR, ASSETS_DIR] {
            let path = base_path.join(dir);
            if !path.exists() {
                std::fs::create_dir_all(&path).map_err(|e| {
                    EngineError::Storage(format!(
                        "Failed to create storage directory {}: {}",
                        path.display(),
                        e
                    ))
                })?;
            }
        }

        let cache = Self::load_all(&base_path);
        Ok(Self {
            base_path,
            cache: RwLock::new(cache),
        })
    }

    fn entity_path(&self, dir: &str, id: &str) -> PathBuf {
        self.base_path.join(dir).join(format!("{}.json", id))
    }

    /// Load every entity file into a fresh arena. Unreadable files are
    /// skipped with a warning so one corrupt entry does not block startup.
    fn load_all(base_path: &Path) -> EntityMaps {
        let mut maps = EntityMaps::default();
        Self::load_dir(base_path.join(MISSIONS_DIR), |m: Mission| {
            maps.missions.insert(m.mission_id.clone(), m);
        });
        Self::load_dir(base_path.join(HOPS_DIR), |h: Hop| {
            maps.hops.insert(h.hop_id.clone(), h);
        });
        Self::load_dir(base_path.join(STEPS_DIR), |s: ToolStep| {
            maps.steps.insert(s.step_id.clone(), s);
        });
        Self::load_dir(base_path.join(ASSETS_DIR), |a: Asset| {
            maps.assets.insert(a.asset_id.clone(), a);
        });
        maps
    }

    fn load_dir<T: DeserializeOwned>(dir: PathBuf, mut insert: impl FnMut(T)) {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.extension().map_or(false, |ext| ext == "json") {
                continue;
            }
            match Self::load_file(&path) {
                Ok(entity) => insert(entity),
                Err(e) => {
                    warn!("[StateStore] Skipping unreadable file {}: {}", path.display(), e);
                }
            }
        }
    }

    fn load_file<T: DeserializeOwned>(path: &Path) -> EngineResult<T> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Storage(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            EngineError::Storage(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    fn plan_io(&self, op: &WriteOp) -> EngineResult<PlannedIo> {
        let planned = match op {
            WriteOp::PutMission(m) => PlannedIo::Write(
                self.entity_path(MISSIONS_DIR, &m.mission_id),
                serde_json::to_string_pretty(m)?,
            ),
            WriteOp::PutHop(h) => PlannedIo::Write(
                self.entity_path(HOPS_DIR, &h.hop_id),
                serde_json::to_string_pretty(h)?,
            ),
            WriteOp::PutStep(s) => PlannedIo::Write(
                self.entity_path(STEPS_DIR, &s.step_id),
                serde_json::to_string_pretty(s)?,
            ),
            WriteOp::PutAsset(a) => PlannedIo::Write(
                self.entity_path(ASSETS_DIR, &a.asset_id),
                serde_json::to_string_pretty(a)?,
            ),
            WriteOp::DeleteMission(id) => PlannedIo::Delete(self.entity_path(MISSIONS_DIR, id)),
            WriteOp::DeleteHop(id) => PlannedIo::Delete(self.entity_path(HOPS_DIR, id)),
            WriteOp::DeleteStep(id) => PlannedIo::Delete(self.entity_path(STEPS_DIR, id)),
            WriteOp::DeleteAsset(id) => PlannedIo::Delete(self.entity_path(ASSETS_DIR, id)),
        };
        Ok(planned)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get_mission(&self, id: &str) -> EngineResult<Option<Mission>> {
        Ok(self.cache.read().await.missions.get(id).cloned())
    }

    async fn get_hop(&self, id: &str) -> EngineResult<Option<Hop>> {
        Ok(self.cache.read().await.hops.get(id).cloned())
    }

    async fn get_step(&self, id: &str) -> EngineResult<Option<ToolStep>> {
        Ok(self.cache.read().await.steps.get(id).cloned())
    }

    async fn get_asset(&self, id: &str) -> EngineResult<Option<Asset>> {
        Ok(self.cache.read().await.assets.get(id).cloned())
    }

    async fn list_missions(&self) -> EngineResult<Vec<Mission>> {
        Ok(self.cache.read().await.missions_sorted())
    }

    async fn hops_for_mission(&self, mission_id: &str) -> EngineResult<Vec<Hop>> {
        Ok(self.cache.read().await.hops_for_mission(mission_id))
    }

    async fn steps_for_hop(&self, hop_id: &str) -> EngineResult<Vec<ToolStep>> {
        Ok(self.cache.read().await.steps_for_hop(hop_id))
    }

    async fn assets_in_scope(&self, scope: &AssetScope) -> EngineResult<Vec<Asset>> {
        Ok(self.cache.read().await.assets_in_scope(scope))
    }

    async fn apply(&self, batch: WriteBatch) -> EngineResult<()> {
        // Serialize everything before touching disk or cache.
        let mut planned = Vec::with_capacity(batch.ops.len());
        for op in &batch.ops {
            planned.push(self.plan_io(op)?);
        }

        let mut cache = self.cache.write().await;
        for io in planned {
            match io {
                PlannedIo::Write(path, content) => {
                    std::fs::write(&path, content).map_err(|e| {
                        EngineError::Storage(format!(
                            "Failed to write {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                }
                PlannedIo::Delete(path) => {
                    if path.exists() {
                        std::fs::remove_file(&path).map_err(|e| {
                            EngineError::Storage(format!(
                                "Failed to delete {}: {}",
                                path.display(),
                                e
                            ))
                        })?;
                    }
                }
            }
        }
        cache.apply_batch(batch);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetDefinition, AssetRole, AssetSchema};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let mission = Mission::new("persisted".into(), "goal".into());
        let mission_id = mission.mission_id.clone();

        {
            let store = FileStateStore::new(dir.path().to_path_buf()).unwrap();
            let mut batch = WriteBatch::new();
            batch.push(WriteOp::PutMission(mission));
            store.apply(batch).await.unwrap();
        }

        let reopened = FileStateStore::new(dir.path().to_path_buf()).unwrap();
        let loaded = reopened.get_mission(&mission_id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "persisted");
    }

    #[tokio::test]
    async fn test_scope_query_after_reload() {
        let dir = tempdir().unwrap();
        let mut asset = Asset::new(
            AssetDefinition::new("report", AssetSchema::string(), AssetRole::Output),
            AssetScope::mission("mission-1"),
        );
        asset.commit_value(serde_json::json!("done"));
        let asset_id = asset.asset_id.clone();

        {
            let store = FileStateStore::new(dir.path().to_path_buf()).unwrap();
            let mut batch = WriteBatch::new();
            batch.push(WriteOp::PutAsset(asset));
            store.apply(batch).await.unwrap();
        }

        let reopened = FileStateStore::new(dir.path().to_path_buf()).unwrap();
        let in_scope = reopened
            .assets_in_scope(&AssetScope::mission("mission-1"))
            .await
            .unwrap();
        assert_eq!(in_scope.len(), 1);
        assert_eq!(in_scope[0].asset_id, asset_id);
        assert!(reopened
            .assets_in_scope(&AssetScope::mission("mission-2"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_skipped() {
        let dir = tempdir().unwrap();
        {
            let _store = FileStateStore::new(dir.path().to_path_buf()).unwrap();
        }
        std::fs::write(dir.path().join(MISSIONS_DIR).join("broken.json"), "{ not json").unwrap();

        let store = FileStateStore::new(dir.path().to_path_buf()).unwrap();
        assert!(store.list_missions().await.unwrap().is_empty());
    }
}
