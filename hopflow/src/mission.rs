//! Mission controller.
//!
//! Responsibilities:
//! - Create a mission from its definition and bind declared input/output
//!   assets at mission scope.
//! - Gate acceptance on required inputs being Ready.
//! - Track the single current hop and the history of terminal hops.
//!
//! The mission controller never touches hops or steps directly; hop
//! consequences arrive here as already-terminal entities handed over by the
//! coordinator.

use tracing::{info, warn};

use crate::asset::{create_asset, AssetRole, AssetScope, AssetStatus};
use crate::error::{EngineError, EngineResult};
use crate::storage::StateTxn;
use crate::types::{AssetId, Hop, HopStatus, Mission, MissionDefinition, MissionStatus};

/// Create a mission in AwaitingApproval and bind its declared assets at
/// mission scope. Supplied input values make those inputs Ready immediately;
/// everything else starts Pending.
pub async fn propose(
    txn: &mut StateTxn<'_>,
    def: MissionDefinition,
) -> EngineResult<(Mission, Vec<AssetId>)> {
    if def.name.trim().is_empty() {
        return Err(EngineError::Validation(
            "mission name must not be empty".to_string(),
        ));
    }
    if def.goal.trim().is_empty() {
        return Err(EngineError::Validation(
            "mission goal must not be empty".to_string(),
        ));
    }
    for input in &def.inputs {
        input.definition.validate()?;
    }
    for output in &def.outputs {
        output.validate()?;
    }

    let mut mission =
        Mission::new(def.name, def.goal).with_success_criteria(def.success_criteria);
    let scope = AssetScope::mission(mission.mission_id.as_str());
    let mut created = Vec::new();

    for input in def.inputs {
        let mut asset_def = input.definition;
        asset_def.role = AssetRole::Input;
        let asset = create_asset(txn, asset_def, scope.clone(), input.value).await?;
        mission.input_asset_ids.push(asset.asset_id.clone());
        if input.required {
            mission.required_input_ids.push(asset.asset_id.clone());
        }
        created.push(asset.asset_id);
    }
    for output in def.outputs {
        let mut asset_def = output;
        asset_def.role = AssetRole::Output;
        let asset = create_asset(txn, asset_def, scope.clone(), None).await?;
        mission.output_asset_ids.push(asset.asset_id.clone());
        created.push(asset.asset_id);
    }

    info!(
        "[MissionController] Proposed mission {} with {} inputs, {} outputs",
        mission.mission_id,
        mission.input_asset_ids.len(),
        mission.output_asset_ids.len()
    );
    txn.stage_mission(mission.clone());
    Ok((mission, created))
}

/// AwaitingApproval -> InProgress. Every required input must be Ready; the
/// check runs before the transition so a rejection stages nothing.
pub async fn accept(txn: &mut StateTxn<'_>, mission_id: &str) -> EngineResult<Mission> {
    let mut mission = txn.require_mission(mission_id).await?;
    for asset_id in &mission.required_input_ids {
        let asset = txn.require_asset(asset_id).await?;
        if asset.status != AssetStatus::Ready {
            return Err(EngineError::Validation(format!(
                "required input '{}' ({}) is not ready: {}",
                asset.name, asset.asset_id, asset.status
            )));
        }
    }
    mission.transition_to(MissionStatus::InProgress, None)?;
    info!("[MissionController] Mission {} accepted", mission.mission_id);
    txn.stage_mission(mission.clone());
    Ok(mission)
}

/// Make `hop` the mission's current hop. At most one non-terminal hop may
/// exist per mission at a time.
pub async fn attach_hop(
    txn: &mut StateTxn<'_>,
    mission_id: &str,
    hop: &Hop,
) -> EngineResult<Mission> {
    let mut mission = txn.require_mission(mission_id).await?;
    if mission.status != MissionStatus::InProgress {
        return Err(EngineError::Validation(format!(
            "mission {} is not accepting hops in status {}",
            mission.mission_id, mission.status
        )));
    }
    if let Some(current_id) = &mission.current_hop_id {
        let current = txn.require_hop(current_id).await?;
        if !current.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                entity: "mission",
                id: mission.mission_id.clone(),
                from: format!("current hop {} ({})", current.hop_id, current.status),
                to: format!("attach hop {}", hop.hop_id),
            });
        }
    }
    mission.current_hop_id = Some(hop.hop_id.clone());
    mission.updated_at = chrono::Utc::now();
    txn.stage_mission(mission.clone());
    Ok(mission)
}

/// Move a now-terminal hop into history and clear the current slot. A
/// Completed final hop whose mission outputs are all Ready completes the
/// mission; any other terminal hop leaves it InProgress so a recovery hop
/// can be proposed. Returns the mission and whether it completed.
pub async fn complete_hop(
    txn: &mut StateTxn<'_>,
    mission_id: &str,
    hop: &Hop,
) -> EngineResult<(Mission, bool)> {
    let mut mission = txn.require_mission(mission_id).await?;
    if !hop.status.is_terminal() {
        return Err(EngineError::Validation(format!(
            "hop {} is not terminal ({}), cannot move to history",
            hop.hop_id, hop.status
        )));
    }
    if mission.hop_history.contains(&hop.hop_id) {
        return Ok((mission.clone(), mission.status == MissionStatus::Completed));
    }

    if mission.current_hop_id.as_deref() == Some(hop.hop_id.as_str()) {
        mission.current_hop_id = None;
    }
    mission.hop_history.push(hop.hop_id.clone());
    mission.updated_at = chrono::Utc::now();

    let mut completed = false;
    if hop.status == HopStatus::Completed && hop.is_final {
        let mut unready = Vec::new();
        for asset_id in &mission.output_asset_ids {
            let asset = txn.require_asset(asset_id).await?;
            if asset.status != AssetStatus::Ready {
                unready.push(asset_id.clone());
            }
        }
        if unready.is_empty() {
            mission.transition_to(MissionStatus::Completed, None)?;
            completed = true;
            info!("[MissionController] Mission {} completed", mission.mission_id);
        } else {
            warn!(
                "[MissionController] Final hop {} done but outputs not ready: {}",
                hop.hop_id,
                unready.join(", ")
            );
        }
    }

    txn.stage_mission(mission.clone());
    Ok((mission, completed))
}

/// Terminal failure. Any non-terminal mission state may fail.
pub async fn fail(txn: &mut StateTxn<'_>, mission_id: &str, reason: &str) -> EngineResult<Mission> {
    let mut mission = txn.require_mission(mission_id).await?;
    mission.error_message = Some(reason.to_string());
    mission.transition_to(MissionStatus::Failed, Some(reason.to_string()))?;
    warn!("[MissionController] Mission {} failed: {}", mission.mission_id, reason);
    txn.stage_mission(mission.clone());
    Ok(mission)
}

/// Terminal cancellation. The coordinator cancels the current hop first so
/// the cascade reaches the steps.
pub async fn cancel(
    txn: &mut StateTxn<'_>,
    mission_id: &str,
    reason: Option<String>,
) -> EngineResult<Mission> {
    let mut mission = txn.require_mission(mission_id).await?;
    if mission.status == MissionStatus::Cancelled {
        return Ok(mission);
    }
    mission.transition_to(MissionStatus::Cancelled, reason)?;
    info!("[MissionController] Mission {} cancelled", mission.mission_id);
    txn.stage_mission(mission.clone());
    Ok(mission)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{AssetDefinition, AssetSchema};
    use crate::storage::InMemoryStateStore;
    use crate::types::{HopDefinition, MissionInputDef, OutputSpec};
    use serde_json::json;
    use std::collections::HashMap;

    fn definition(with_input_value: bool) -> MissionDefinition {
        MissionDefinition {
            name: "research".into(),
            goal: "answer the question".into(),
            success_criteria: None,
            inputs: vec![MissionInputDef {
                definition: AssetDefinition::new("question", AssetSchema::string(), AssetRole::Input),
                value: with_input_value.then(|| json!("what is six times seven")),
                required: true,
            }],
            outputs: vec![AssetDefinition::new(
                "answer",
                AssetSchema::number(),
                AssetRole::Output,
            )],
        }
    }

    fn terminal_hop(mission: &Mission, status: HopStatus, is_final: bool) -> Hop {
        let target = mission.output_asset_ids[0].clone();
        let mut hop = Hop::new(
            mission.mission_id.clone(),
            1,
            HopDefinition {
                name: "stage".into(),
                description: None,
                goal: "produce".into(),
                success_criteria: None,
                input_mapping: HashMap::new(),
                output_spec: OutputSpec::ExistingAsset { asset_id: target },
                is_final,
            },
        );
        hop.status = status;
        hop
    }

    #[tokio::test]
    async fn test_propose_binds_inputs_and_outputs() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);

        let (mission, created) = propose(&mut txn, definition(true)).await.unwrap();
        assert_eq!(mission.status, MissionStatus::AwaitingApproval);
        assert_eq!(created.len(), 2);
        assert_eq!(mission.input_asset_ids.len(), 1);
        assert_eq!(mission.required_input_ids, mission.input_asset_ids);

        let input = txn.require_asset(&mission.input_asset_ids[0]).await.unwrap();
        assert_eq!(input.status, AssetStatus::Ready);
        assert_eq!(input.role, AssetRole::Input);

        let output = txn.require_asset(&mission.output_asset_ids[0]).await.unwrap();
        assert_eq!(output.status, AssetStatus::Pending);
        assert_eq!(output.role, AssetRole::Output);
    }

    #[tokio::test]
    async fn test_accept_blocks_on_unready_required_input() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);

        let (mission, _) = propose(&mut txn, definition(false)).await.unwrap();
        let err = accept(&mut txn, &mission.mission_id).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(
            txn.require_mission(&mission.mission_id).await.unwrap().status,
            MissionStatus::AwaitingApproval
        );

        // Optional inputs do not block.
        let mut optional = definition(false);
        optional.inputs[0].required = false;
        let (mission, _) = propose(&mut txn, optional).await.unwrap();
        let accepted = accept(&mut txn, &mission.mission_id).await.unwrap();
        assert_eq!(accepted.status, MissionStatus::InProgress);
    }

    #[tokio::test]
    async fn test_attach_hop_rejects_second_active_hop() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);

        let (mission, _) = propose(&mut txn, definition(true)).await.unwrap();
        accept(&mut txn, &mission.mission_id).await.unwrap();

        let mut active = terminal_hop(&mission, HopStatus::PlanStarted, false);
        active.status = HopStatus::PlanProposed;
        txn.stage_hop(active.clone());
        attach_hop(&mut txn, &mission.mission_id, &active).await.unwrap();

        let second = terminal_hop(&mission, HopStatus::PlanProposed, false);
        let err = attach_hop(&mut txn, &mission.mission_id, &second)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn test_complete_hop_final_requires_ready_outputs() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);

        let (mission, _) = propose(&mut txn, definition(true)).await.unwrap();
        accept(&mut txn, &mission.mission_id).await.unwrap();

        // Output still Pending: final hop lands in history, mission stays open.
        let hop = terminal_hop(&mission, HopStatus::Completed, true);
        txn.stage_hop(hop.clone());
        let (mission, completed) = complete_hop(&mut txn, &mission.mission_id, &hop)
            .await
            .unwrap();
        assert!(!completed);
        assert_eq!(mission.status, MissionStatus::InProgress);
        assert_eq!(mission.hop_history, vec![hop.hop_id.clone()]);
        assert!(mission.current_hop_id.is_none());

        // Fill the output; the next completed final hop finishes the mission.
        let mut output = txn.require_asset(&mission.output_asset_ids[0]).await.unwrap();
        output.commit_value(json!(42));
        txn.stage_asset(output);

        let hop2 = terminal_hop(&mission, HopStatus::Completed, true);
        txn.stage_hop(hop2.clone());
        let (mission, completed) = complete_hop(&mut txn, &mission.mission_id, &hop2)
            .await
            .unwrap();
        assert!(completed);
        assert_eq!(mission.status, MissionStatus::Completed);
    }

    #[tokio::test]
    async fn test_complete_hop_is_idempotent() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);

        let (mission, _) = propose(&mut txn, definition(true)).await.unwrap();
        accept(&mut txn, &mission.mission_id).await.unwrap();

        let hop = terminal_hop(&mission, HopStatus::Cancelled, false);
        txn.stage_hop(hop.clone());
        complete_hop(&mut txn, &mission.mission_id, &hop).await.unwrap();
        let (mission, _) = complete_hop(&mut txn, &mission.mission_id, &hop)
            .await
            .unwrap();
        assert_eq!(mission.hop_history.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_mission_accepts_no_transitions() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);

        let (mission, _) = propose(&mut txn, definition(true)).await.unwrap();
        accept(&mut txn, &mission.mission_id).await.unwrap();
        fail(&mut txn, &mission.mission_id, "tool exploded").await.unwrap();

        let err = cancel(&mut txn, &mission.mission_id, None).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
        let mission = txn.require_mission(&mission.mission_id).await.unwrap();
        assert_eq!(mission.status, MissionStatus::Failed);
        assert_eq!(mission.error_message.as_deref(), Some("tool exploded"));
    }
}
