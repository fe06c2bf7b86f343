//! State transition coordinator.
//!
//! The single mutation surface of the engine. Every transaction type maps to
//! a fixed sequence of controller calls staged on one `StateTxn` and applied
//! to storage as one batch: all of it commits or none of it does. This is
//! also the only place where hop completion is allowed to touch the mission
//! (history, completion evaluation) and where cancellation cascades across
//! entity levels.
//!
//! Transactions on the same mission are serialized through a per-mission
//! async mutex; independent missions proceed in parallel. Observers are
//! notified after commit, outside the exclusive section.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::hop::{self, HopProgress};
use crate::mission;
use crate::observer::{TransactionRecord, TransitionObserver};
use crate::step;
use crate::storage::{StateStore, StateTxn};
use crate::tools::{ToolOutputs, ToolRegistry};
use crate::types::{
    AssetId, HopDefinition, HopId, HopStatus, MissionDefinition, MissionId, MissionStatus, StepId,
    StepStatus, ToolStepDefinition,
};

/// One atomic state change request. Wire format is `{type, payload}` so
/// routers and agents can submit these as plain JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum StateTransaction {
    ProposeMission {
        definition: MissionDefinition,
    },
    AcceptMission {
        mission_id: MissionId,
    },
    ProposeHopPlan {
        mission_id: MissionId,
        definition: HopDefinition,
    },
    AcceptHopPlan {
        hop_id: HopId,
    },
    ProposeHopImpl {
        hop_id: HopId,
        steps: Vec<ToolStepDefinition>,
    },
    AcceptHopImpl {
        hop_id: HopId,
    },
    ExecuteHop {
        hop_id: HopId,
    },
    /// Report the outcome of one tool call. `error` set means the call
    /// failed; the failure cascades step -> hop -> mission in this same
    /// transaction.
    CompleteToolStep {
        step_id: StepId,
        #[serde(default)]
        outputs: ToolOutputs,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Explicit hop completion for hops whose steps are all done, including
    /// the zero-step case.
    CompleteHop {
        hop_id: HopId,
    },
    CancelHop {
        hop_id: HopId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    CancelMission {
        mission_id: MissionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    FailMission {
        mission_id: MissionId,
        reason: String,
    },
}

impl StateTransaction {
    pub fn kind(&self) -> &'static str {
        match self {
            StateTransaction::ProposeMission { .. } => "propose_mission",
            StateTransaction::AcceptMission { .. } => "accept_mission",
            StateTransaction::ProposeHopPlan { .. } => "propose_hop_plan",
            StateTransaction::AcceptHopPlan { .. } => "accept_hop_plan",
            StateTransaction::ProposeHopImpl { .. } => "propose_hop_impl",
            StateTransaction::AcceptHopImpl { .. } => "accept_hop_impl",
            StateTransaction::ExecuteHop { .. } => "execute_hop",
            StateTransaction::CompleteToolStep { .. } => "complete_tool_step",
            StateTransaction::CompleteHop { .. } => "complete_hop",
            StateTransaction::CancelHop { .. } => "cancel_hop",
            StateTransaction::CancelMission { .. } => "cancel_mission",
            StateTransaction::FailMission { .. } => "fail_mission",
        }
    }
}

/// Outcome of one `update_state` call. Carries enough metadata that callers
/// can react without re-querying.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionResult {
    pub success: bool,
    pub message: String,
    /// Stable error kind tag when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mission_id: Option<MissionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hop_id: Option<HopId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<StepId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_asset_ids: Vec<AssetId>,
    /// The step that moved into execution as part of this transaction, if
    /// any. Drivers use this to know what to run next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_step_id: Option<StepId>,
    #[serde(default)]
    pub hop_completed: bool,
    #[serde(default)]
    pub mission_completed: bool,
}

impl TransactionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn rejected(error: &EngineError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            error: Some(error.kind().to_string()),
            ..Default::default()
        }
    }

    fn with_mission(mut self, id: impl Into<MissionId>) -> Self {
        self.mission_id = Some(id.into());
        self
    }

    fn with_hop(mut self, id: impl Into<HopId>) -> Self {
        self.hop_id = Some(id.into());
        self
    }

    fn with_step(mut self, id: impl Into<StepId>) -> Self {
        self.step_id = Some(id.into());
        self
    }
}

pub struct StateCoordinator {
    store: Arc<dyn StateStore>,
    registry: Arc<ToolRegistry>,
    observers: RwLock<Vec<Arc<dyn TransitionObserver>>>,
    mission_locks: Mutex<HashMap<MissionId, Arc<Mutex<()>>>>,
}

impl StateCoordinator {
    pub fn new(store: Arc<dyn StateStore>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            store,
            registry,
            observers: RwLock::new(Vec::new()),
            mission_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub async fn add_observer(&self, observer: Arc<dyn TransitionObserver>) {
        self.observers.write().await.push(observer);
    }

    /// The single entry point for every mutation. Resolves the owning
    /// mission, takes its exclusive section, stages the controller sequence
    /// for the transaction type and commits the whole overlay as one batch.
    /// Any error produces a failure result and commits nothing.
    pub async fn update_state(&self, transaction: StateTransaction) -> TransactionResult {
        let kind = transaction.kind();
        let mission_id = match self.owning_mission(&transaction).await {
            Ok(id) => id,
            Err(e) => {
                warn!("[Coordinator] {} rejected: {}", kind, e);
                return TransactionResult::rejected(&e);
            }
        };

        let _guard: Option<OwnedMutexGuard<()>> = match &mission_id {
            Some(id) => Some(self.lock_for(id).await.lock_owned().await),
            None => None,
        };

        let mut txn = StateTxn::new(self.store.as_ref());
        let result = match self.apply(&mut txn, transaction).await {
            Ok(result) => match self.store.apply(txn.into_batch()).await {
                Ok(()) => result,
                Err(e) => {
                    warn!("[Coordinator] {} failed to commit: {}", kind, e);
                    TransactionResult::rejected(&e)
                }
            },
            Err(e) => {
                info!("[Coordinator] {} rejected: {}", kind, e);
                TransactionResult::rejected(&e)
            }
        };
        drop(_guard);

        if result.success {
            let record = TransactionRecord::new(
                kind,
                result.mission_id.clone().or(mission_id),
                result.clone(),
            );
            for observer in self.observers.read().await.iter() {
                observer.on_transaction(&record).await;
            }
        }
        result
    }

    /// Which mission this transaction belongs to, for lock acquisition.
    /// ProposeMission creates the mission inside the transaction, so there is
    /// nothing to serialize against yet.
    async fn owning_mission(
        &self,
        transaction: &StateTransaction,
    ) -> EngineResult<Option<MissionId>> {
        use StateTransaction::*;
        let id = match transaction {
            ProposeMission { .. } => None,
            AcceptMission { mission_id }
            | ProposeHopPlan { mission_id, .. }
            | CancelMission { mission_id, .. }
            | FailMission { mission_id, .. } => Some(mission_id.clone()),
            AcceptHopPlan { hop_id }
            | ProposeHopImpl { hop_id, .. }
            | AcceptHopImpl { hop_id }
            | ExecuteHop { hop_id }
            | CompleteHop { hop_id }
            | CancelHop { hop_id, .. } => Some(self.mission_of_hop(hop_id).await?),
            CompleteToolStep { step_id, .. } => {
                let step = self
                    .store
                    .get_step(step_id)
                    .await?
                    .ok_or_else(|| EngineError::not_found("tool_step", step_id.clone()))?;
                Some(self.mission_of_hop(&step.hop_id).await?)
            }
        };
        Ok(id)
    }

    async fn mission_of_hop(&self, hop_id: &str) -> EngineResult<MissionId> {
        let hop = self
            .store
            .get_hop(hop_id)
            .await?
            .ok_or_else(|| EngineError::not_found("hop", hop_id))?;
        Ok(hop.mission_id)
    }

    async fn lock_for(&self, mission_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.mission_locks.lock().await;
        locks
            .entry(mission_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn apply(
        &self,
        txn: &mut StateTxn<'_>,
        transaction: StateTransaction,
    ) -> EngineResult<TransactionResult> {
        use StateTransaction::*;
        match transaction {
            ProposeMission { definition } => {
                let (mission, created) = mission::propose(txn, definition).await?;
                let mut result = TransactionResult::ok(format!(
                    "Mission '{}' proposed, awaiting approval",
                    mission.name
                ))
                .with_mission(mission.mission_id);
                result.created_asset_ids = created;
                Ok(result)
            }

            AcceptMission { mission_id } => {
                let mission = mission::accept(txn, &mission_id).await?;
                Ok(TransactionResult::ok("Mission accepted").with_mission(mission.mission_id))
            }

            ProposeHopPlan {
                mission_id,
                definition,
            } => {
                let mission = txn.require_mission(&mission_id).await?;
                let hop = hop::propose_plan(txn, &mission, definition).await?;
                mission::attach_hop(txn, &mission_id, &hop).await?;
                Ok(TransactionResult::ok(format!(
                    "Hop plan '{}' proposed",
                    hop.name
                ))
                .with_mission(mission_id)
                .with_hop(hop.hop_id))
            }

            AcceptHopPlan { hop_id } => {
                let hop = hop::accept_plan(txn, &hop_id).await?;
                Ok(TransactionResult::ok("Hop plan accepted")
                    .with_mission(hop.mission_id)
                    .with_hop(hop.hop_id))
            }

            ProposeHopImpl { hop_id, steps } => {
                let (hop, steps, placeholders) =
                    hop::propose_implementation(txn, &self.registry, &hop_id, steps).await?;
                let mut result = TransactionResult::ok(format!(
                    "Implementation proposed with {} steps",
                    steps.len()
                ))
                .with_mission(hop.mission_id)
                .with_hop(hop.hop_id);
                result.created_asset_ids = placeholders;
                Ok(result)
            }

            AcceptHopImpl { hop_id } => {
                let hop = hop::accept_implementation(txn, &hop_id).await?;
                Ok(TransactionResult::ok("Implementation accepted")
                    .with_mission(hop.mission_id)
                    .with_hop(hop.hop_id))
            }

            ExecuteHop { hop_id } => {
                let (hop, started) = hop::begin_execution(txn, &hop_id).await?;
                let mut result = TransactionResult::ok("Hop execution started")
                    .with_mission(hop.mission_id)
                    .with_hop(hop.hop_id);
                result.started_step_id = started.map(|s| s.step_id);
                Ok(result)
            }

            CompleteToolStep {
                step_id,
                outputs,
                error,
            } => self.complete_tool_step(txn, &step_id, outputs, error).await,

            CompleteHop { hop_id } => {
                let hop = txn.require_hop(&hop_id).await?;
                if hop.status == HopStatus::Completed {
                    let mission = txn.require_mission(&hop.mission_id).await?;
                    let mut result = TransactionResult::ok("Hop already completed")
                        .with_mission(hop.mission_id)
                        .with_hop(hop.hop_id);
                    result.hop_completed = true;
                    result.mission_completed = mission.status == MissionStatus::Completed;
                    return Ok(result);
                }
                let (hop, _output) = hop::complete(txn, &hop_id).await?;
                let (_, mission_completed) =
                    mission::complete_hop(txn, &hop.mission_id, &hop).await?;
                let mut result = TransactionResult::ok("Hop completed")
                    .with_mission(hop.mission_id)
                    .with_hop(hop.hop_id);
                result.hop_completed = true;
                result.mission_completed = mission_completed;
                Ok(result)
            }

            CancelHop { hop_id, reason } => {
                let hop = hop::cancel(txn, &hop_id, reason).await?;
                mission::complete_hop(txn, &hop.mission_id, &hop).await?;
                Ok(TransactionResult::ok(
                    "Hop cancelled, mission accepts a new hop",
                )
                .with_mission(hop.mission_id)
                .with_hop(hop.hop_id))
            }

            CancelMission { mission_id, reason } => {
                let mission = txn.require_mission(&mission_id).await?;
                if let Some(hop_id) = mission.current_hop_id.clone() {
                    let hop = txn.require_hop(&hop_id).await?;
                    if !hop.status.is_terminal() {
                        let hop = hop::cancel(txn, &hop_id, reason.clone()).await?;
                        mission::complete_hop(txn, &mission_id, &hop).await?;
                    }
                }
                let mission = mission::cancel(txn, &mission_id, reason).await?;
                Ok(TransactionResult::ok("Mission cancelled").with_mission(mission.mission_id))
            }

            FailMission { mission_id, reason } => {
                let mission = txn.require_mission(&mission_id).await?;
                if let Some(hop_id) = mission.current_hop_id.clone() {
                    let hop = txn.require_hop(&hop_id).await?;
                    if !hop.status.is_terminal() {
                        let hop = hop::fail(txn, &hop_id, &reason).await?;
                        mission::complete_hop(txn, &mission_id, &hop).await?;
                    }
                }
                let mission = mission::fail(txn, &mission_id, &reason).await?;
                Ok(TransactionResult::ok("Mission failed").with_mission(mission.mission_id))
            }
        }
    }

    /// Success applies the outputs, then either starts the next step or
    /// completes the hop and lets the mission react, all in one unit.
    /// Failure cascades downward-up: step Failed, hop Failed, mission
    /// Failed. A repeat on an already-Completed step is a no-op.
    async fn complete_tool_step(
        &self,
        txn: &mut StateTxn<'_>,
        step_id: &str,
        outputs: ToolOutputs,
        error: Option<String>,
    ) -> EngineResult<TransactionResult> {
        let existing = txn.require_step(step_id).await?;
        let hop = txn.require_hop(&existing.hop_id).await?;

        if existing.status == StepStatus::Completed {
            let mission = txn.require_mission(&hop.mission_id).await?;
            let mut result = TransactionResult::ok("Tool step already completed")
                .with_mission(hop.mission_id)
                .with_hop(hop.hop_id)
                .with_step(existing.step_id);
            result.hop_completed = hop.status == HopStatus::Completed;
            result.mission_completed = mission.status == MissionStatus::Completed;
            return Ok(result);
        }

        if let Some(message) = error {
            let step = step::fail_execution(txn, step_id, &message).await?;
            let hop = hop::fail(txn, &hop.hop_id, &message).await?;
            mission::complete_hop(txn, &hop.mission_id, &hop).await?;
            mission::fail(
                txn,
                &hop.mission_id,
                &format!("hop '{}' failed: {}", hop.name, message),
            )
            .await?;
            return Ok(TransactionResult::ok(format!(
                "Tool step failed: {}",
                message
            ))
            .with_mission(hop.mission_id)
            .with_hop(hop.hop_id)
            .with_step(step.step_id));
        }

        let (step, filled) = step::complete_execution(txn, step_id, &outputs).await?;
        let mut result = TransactionResult::ok("Tool step completed")
            .with_mission(hop.mission_id.clone())
            .with_hop(hop.hop_id.clone())
            .with_step(step.step_id);
        result.created_asset_ids = filled;

        match hop::evaluate_progress(txn, &hop.hop_id).await? {
            HopProgress::Advanced { started } => {
                result.started_step_id = Some(started.step_id);
            }
            HopProgress::Completed { hop, .. } => {
                let (_, mission_completed) =
                    mission::complete_hop(txn, &hop.mission_id, &hop).await?;
                result.hop_completed = true;
                result.mission_completed = mission_completed;
                result.message = if mission_completed {
                    "Tool step completed; hop and mission completed".to_string()
                } else {
                    "Tool step completed; hop completed".to_string()
                };
            }
        }
        Ok(result)
    }
}
