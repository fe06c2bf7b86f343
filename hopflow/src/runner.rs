//! Step runner.
//!
//! Drives one mission's executing hop: resolves the current step's
//! parameters against a store snapshot, invokes the registered tool handler
//! and reports the outcome through the coordinator. The tool call itself
//! runs outside the per-mission exclusive section, so a slow tool never
//! blocks other transactions on the same mission from being rejected
//! cleanly; the state machine only changes through `update_state`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::coordinator::{StateCoordinator, StateTransaction, TransactionResult};
use crate::error::{EngineError, EngineResult};
use crate::step;
use crate::storage::StateTxn;
use crate::tools::{ToolCall, ToolOutputs, ToolRegistry};
use crate::types::{StepStatus, ToolStep};

pub struct StepRunner {
    coordinator: Arc<StateCoordinator>,
    registry: Arc<ToolRegistry>,
}

impl StepRunner {
    pub fn new(coordinator: Arc<StateCoordinator>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            coordinator,
            registry,
        }
    }

    /// Run tool steps for `mission_id` until no step is executing: the hop
    /// completed, something failed, or the hop has no running step to begin
    /// with. Returns the transaction results in order.
    pub async fn drive(&self, mission_id: &str) -> EngineResult<Vec<TransactionResult>> {
        let mut results = Vec::new();
        loop {
            let Some(step) = self.executing_step(mission_id).await? else {
                break;
            };
            debug!(
                "[StepRunner] Running step {} (tool '{}')",
                step.step_id, step.tool_id
            );

            let transaction = match self.invoke(&step).await {
                Ok(outputs) => StateTransaction::CompleteToolStep {
                    step_id: step.step_id.clone(),
                    outputs,
                    error: None,
                },
                Err(e) => {
                    warn!("[StepRunner] Step {} failed: {}", step.step_id, e);
                    StateTransaction::CompleteToolStep {
                        step_id: step.step_id.clone(),
                        outputs: ToolOutputs::new(),
                        error: Some(e.to_string()),
                    }
                }
            };

            let result = self.coordinator.update_state(transaction).await;
            let proceed = result.success && result.started_step_id.is_some();
            results.push(result);
            if !proceed {
                break;
            }
        }
        Ok(results)
    }

    /// The currently executing step of the mission's current hop, if any.
    async fn executing_step(&self, mission_id: &str) -> EngineResult<Option<ToolStep>> {
        let store = self.coordinator.store();
        let Some(mission) = store.get_mission(mission_id).await? else {
            return Err(EngineError::not_found("mission", mission_id));
        };
        let Some(hop_id) = mission.current_hop_id else {
            return Ok(None);
        };
        let steps = store.steps_for_hop(&hop_id).await?;
        Ok(steps
            .into_iter()
            .find(|s| s.status == StepStatus::Executing))
    }

    /// Resolve parameters from a read snapshot and call the tool. Any error
    /// here (unresolvable asset, missing field, handler failure) is reported
    /// back as a step failure by the caller.
    async fn invoke(&self, step: &ToolStep) -> EngineResult<ToolOutputs> {
        let store = self.coordinator.store();
        let snapshot = StateTxn::new(store.as_ref());
        let hop = snapshot.require_hop(&step.hop_id).await?;
        let view = crate::asset::ScopeView::for_hop(&snapshot, &hop).await?;
        let params = step::resolve_parameters(step, &view)?;

        self.registry
            .execute(ToolCall::new(
                step.tool_id.clone(),
                step.step_id.clone(),
                params,
            ))
            .await
    }
}
