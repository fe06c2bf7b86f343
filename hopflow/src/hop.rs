//! Hop controller.
//!
//! A hop is one plan/approve/implement/approve/execute stage of a mission.
//! This module owns the hop lifecycle and its steps; consequences for the
//! mission (history, completion) belong to the mission controller and are
//! sequenced by the coordinator.

use tracing::info;

use crate::asset::{promote_asset, reset_for_recovery, AssetScope, AssetStatus, ScopeView};
use crate::error::{EngineError, EngineResult};
use crate::step;
use crate::storage::StateTxn;
use crate::tools::ToolRegistry;
use crate::types::{
    AssetId, Hop, HopDefinition, HopStatus, Mission, OutputSpec, ResultMapping, ToolStep,
    ToolStepDefinition,
};

/// Outcome of re-evaluating a hop after one of its steps completed.
pub enum HopProgress {
    /// The next step in sequence has been moved into execution.
    Advanced { started: ToolStep },
    /// Every step is done; the hop resolved its output and completed.
    Completed { hop: Hop, output_asset_id: AssetId },
}

/// Validate a proposed plan against the mission's assets and stage the hop
/// in PlanProposed. The caller attaches it to the mission afterwards.
pub async fn propose_plan(
    txn: &mut StateTxn<'_>,
    mission: &Mission,
    def: HopDefinition,
) -> EngineResult<Hop> {
    if def.name.trim().is_empty() {
        return Err(EngineError::Validation(
            "hop name must not be empty".to_string(),
        ));
    }
    if def.goal.trim().is_empty() {
        return Err(EngineError::Validation(
            "hop goal must not be empty".to_string(),
        ));
    }

    let mission_scope = AssetScope::mission(mission.mission_id.as_str());
    for (local_name, asset_id) in &def.input_mapping {
        if local_name.trim().is_empty() {
            return Err(EngineError::Validation(
                "input mapping names must not be empty".to_string(),
            ));
        }
        let asset = txn.require_asset(asset_id).await?;
        if asset.scope != mission_scope {
            return Err(EngineError::Validation(format!(
                "input mapping '{}' references asset {} outside mission scope {}",
                local_name, asset_id, mission.mission_id
            )));
        }
    }

    match &def.output_spec {
        OutputSpec::ExistingAsset { asset_id } => {
            let asset = txn.require_asset(asset_id).await?;
            if asset.scope != mission_scope {
                return Err(EngineError::Validation(format!(
                    "output spec references asset {} outside mission scope {}",
                    asset_id, mission.mission_id
                )));
            }
        }
        OutputSpec::NewAsset { definition } => definition.validate()?,
    }

    // A final hop with unfinished mission outputs must produce one of them;
    // promoting a same-named new asset would only collide with the declared
    // output.
    if def.is_final {
        let mut outstanding = Vec::new();
        for asset_id in &mission.output_asset_ids {
            let asset = txn.require_asset(asset_id).await?;
            if asset.status != AssetStatus::Ready {
                outstanding.push(asset_id.clone());
            }
        }
        if !outstanding.is_empty() {
            match def.output_spec.existing_asset_id() {
                Some(target) if outstanding.contains(target) => {}
                _ => {
                    return Err(EngineError::Validation(format!(
                        "final hop must fill an outstanding mission output, one of: {}",
                        outstanding.join(", ")
                    )));
                }
            }
        }
    }

    let sequence_order = mission.hop_history.len() as u32 + 1;
    let mut hop = Hop::new(mission.mission_id.clone(), sequence_order, def);
    hop.transition_to(HopStatus::PlanProposed, None)?;
    info!("[HopController] Proposed plan {} for mission {}", hop.hop_id, mission.mission_id);
    txn.stage_hop(hop.clone());
    Ok(hop)
}

pub async fn accept_plan(txn: &mut StateTxn<'_>, hop_id: &str) -> EngineResult<Hop> {
    let mut hop = txn.require_hop(hop_id).await?;
    hop.transition_to(HopStatus::PlanAccepted, None)?;
    txn.stage_hop(hop.clone());
    Ok(hop)
}

/// Create the step sequence for an accepted plan. Each step is validated
/// against the registry and the working set, and new-asset results get
/// Proposed placeholders. An empty sequence is allowed; such a hop finishes
/// through an explicit completion.
pub async fn propose_implementation(
    txn: &mut StateTxn<'_>,
    registry: &ToolRegistry,
    hop_id: &str,
    step_defs: Vec<ToolStepDefinition>,
) -> EngineResult<(Hop, Vec<ToolStep>, Vec<AssetId>)> {
    let mut hop = txn.require_hop(hop_id).await?;
    if !hop.status.can_transition_to(&HopStatus::ImplProposed) {
        return Err(EngineError::InvalidTransition {
            entity: "hop",
            id: hop.hop_id.clone(),
            from: hop.status.to_string(),
            to: HopStatus::ImplProposed.to_string(),
        });
    }

    let mut view = ScopeView::for_hop(txn, &hop).await?;
    let mut steps = Vec::with_capacity(step_defs.len());
    let mut placeholder_ids = Vec::new();
    for def in step_defs {
        let created = step::create_tool_step(txn, registry, &mut hop, def, &mut view).await?;
        for mapping in created.result_mapping.values() {
            if let ResultMapping::NewAsset {
                asset_id: Some(id), ..
            } = mapping
            {
                placeholder_ids.push(id.clone());
            }
        }
        steps.push(created);
    }

    hop.transition_to(HopStatus::ImplProposed, None)?;
    info!(
        "[HopController] Proposed implementation for {} with {} steps",
        hop.hop_id,
        steps.len()
    );
    txn.stage_hop(hop.clone());
    Ok((hop, steps, placeholder_ids))
}

pub async fn accept_implementation(txn: &mut StateTxn<'_>, hop_id: &str) -> EngineResult<Hop> {
    let mut hop = txn.require_hop(hop_id).await?;
    hop.transition_to(HopStatus::ImplAccepted, None)?;
    txn.stage_hop(hop.clone());
    Ok(hop)
}

/// Move the hop into execution and start its first step, if any.
pub async fn begin_execution(
    txn: &mut StateTxn<'_>,
    hop_id: &str,
) -> EngineResult<(Hop, Option<ToolStep>)> {
    let mut hop = txn.require_hop(hop_id).await?;
    hop.transition_to(HopStatus::Executing, None)?;
    txn.stage_hop(hop.clone());

    let steps = txn.steps_for_hop(hop_id).await?;
    let started = match steps.first() {
        Some(first) => Some(step::begin_execution(txn, &first.step_id).await?),
        None => None,
    };
    Ok((hop, started))
}

/// After a step completed: either start the next step in sequence or, with
/// every step done, resolve the declared output and complete the hop.
pub async fn evaluate_progress(txn: &mut StateTxn<'_>, hop_id: &str) -> EngineResult<HopProgress> {
    let hop = txn.require_hop(hop_id).await?;
    let steps = txn.steps_for_hop(hop_id).await?;

    if let Some(next) = steps
        .iter()
        .find(|s| s.status == crate::types::StepStatus::Proposed)
    {
        let started = step::begin_execution(txn, &next.step_id).await?;
        return Ok(HopProgress::Advanced { started });
    }

    let (hop, output_asset_id) = resolve_output_and_complete(txn, hop).await?;
    Ok(HopProgress::Completed {
        hop,
        output_asset_id,
    })
}

/// Explicit completion for hops whose steps are all done, including the
/// zero-step case.
pub async fn complete(txn: &mut StateTxn<'_>, hop_id: &str) -> EngineResult<(Hop, AssetId)> {
    let hop = txn.require_hop(hop_id).await?;
    if hop.status != HopStatus::Executing {
        return Err(EngineError::InvalidTransition {
            entity: "hop",
            id: hop.hop_id.clone(),
            from: hop.status.to_string(),
            to: HopStatus::Completed.to_string(),
        });
    }
    let steps = txn.steps_for_hop(hop_id).await?;
    if let Some(unfinished) = steps
        .iter()
        .find(|s| s.status != crate::types::StepStatus::Completed)
    {
        return Err(EngineError::Validation(format!(
            "hop {} still has unfinished step {} ({})",
            hop_id, unfinished.step_id, unfinished.status
        )));
    }
    resolve_output_and_complete(txn, hop).await
}

async fn resolve_output_and_complete(
    txn: &mut StateTxn<'_>,
    mut hop: Hop,
) -> EngineResult<(Hop, AssetId)> {
    let output_asset_id = match hop.output_spec.clone() {
        OutputSpec::ExistingAsset { asset_id } => {
            let asset = txn.require_asset(&asset_id).await?;
            if asset.status != AssetStatus::Ready {
                return Err(EngineError::UnresolvedAsset {
                    asset_id: asset.asset_id.clone(),
                    status: asset.status.to_string(),
                });
            }
            asset_id
        }
        OutputSpec::NewAsset { definition } => {
            let hop_scope = AssetScope::hop(hop.hop_id.as_str());
            let produced = txn
                .find_asset_by_name(&hop_scope, &definition.name)
                .await?
                .ok_or_else(|| {
                    EngineError::OutputMapping(format!(
                        "hop {} produced no asset named '{}'",
                        hop.hop_id, definition.name
                    ))
                })?;
            if produced.status != AssetStatus::Ready {
                return Err(EngineError::UnresolvedAsset {
                    asset_id: produced.asset_id.clone(),
                    status: produced.status.to_string(),
                });
            }
            let promoted = promote_asset(
                txn,
                &produced.asset_id,
                &hop_scope,
                &AssetScope::mission(hop.mission_id.as_str()),
            )
            .await?;
            promoted.asset_id
        }
    };

    hop.transition_to(HopStatus::Completed, None)?;
    info!("[HopController] Hop {} completed, output asset {}", hop.hop_id, output_asset_id);
    txn.stage_hop(hop.clone());
    Ok((hop, output_asset_id))
}

/// Fail the hop after a step failure or an external abort. Remaining
/// non-terminal steps are cancelled; the failed step keeps its status.
pub async fn fail(txn: &mut StateTxn<'_>, hop_id: &str, reason: &str) -> EngineResult<Hop> {
    let mut hop = txn.require_hop(hop_id).await?;
    for s in txn.steps_for_hop(hop_id).await? {
        step::cancel(txn, &s.step_id, Some("hop failed".to_string())).await?;
    }
    hop.error_message = Some(reason.to_string());
    hop.transition_to(HopStatus::Failed, Some(reason.to_string()))?;
    txn.stage_hop(hop.clone());
    Ok(hop)
}

/// Cancel a hop mid-flight. Steps are cancelled and every mission-level
/// asset this hop was producing is returned to Pending so a recovery hop
/// can take over.
pub async fn cancel(
    txn: &mut StateTxn<'_>,
    hop_id: &str,
    reason: Option<String>,
) -> EngineResult<Hop> {
    let mut hop = txn.require_hop(hop_id).await?;
    if hop.status == HopStatus::Cancelled {
        return Ok(hop);
    }

    let steps = txn.steps_for_hop(hop_id).await?;
    for s in &steps {
        step::cancel(txn, &s.step_id, Some("hop cancelled".to_string())).await?;
    }

    let mut target_ids: Vec<AssetId> = Vec::new();
    for s in &steps {
        for mapping in s.result_mapping.values() {
            if let ResultMapping::ExistingAsset { asset_id } = mapping {
                target_ids.push(asset_id.clone());
            }
        }
    }
    if let Some(asset_id) = hop.output_spec.existing_asset_id() {
        target_ids.push(asset_id.clone());
    }
    target_ids.sort();
    target_ids.dedup();
    for asset_id in target_ids {
        reset_for_recovery(txn, &asset_id).await?;
    }

    hop.transition_to(HopStatus::Cancelled, reason)?;
    info!("[HopController] Hop {} cancelled", hop.hop_id);
    txn.stage_hop(hop.clone());
    Ok(hop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{create_asset, AssetDefinition, AssetRole, AssetSchema};
    use crate::storage::InMemoryStateStore;
    use std::collections::HashMap;

    fn base_def(output_spec: OutputSpec, is_final: bool) -> HopDefinition {
        HopDefinition {
            name: "stage".into(),
            description: None,
            goal: "do work".into(),
            success_criteria: None,
            input_mapping: HashMap::new(),
            output_spec,
            is_final,
        }
    }

    fn new_output_spec(name: &str) -> OutputSpec {
        OutputSpec::NewAsset {
            definition: AssetDefinition::new(name, AssetSchema::number(), AssetRole::Intermediate),
        }
    }

    #[tokio::test]
    async fn test_propose_plan_requires_mission_scoped_inputs() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);
        let mission = Mission::new("m".into(), "goal".into());

        let foreign = create_asset(
            &mut txn,
            AssetDefinition::new("x", AssetSchema::number(), AssetRole::Input),
            AssetScope::mission("mission-other"),
            None,
        )
        .await
        .unwrap();

        let mut def = base_def(new_output_spec("y"), false);
        def.input_mapping
            .insert("x".to_string(), foreign.asset_id.clone());

        let err = propose_plan(&mut txn, &mission, def).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_final_hop_must_target_outstanding_output() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);
        let mut mission = Mission::new("m".into(), "goal".into());

        let output = create_asset(
            &mut txn,
            AssetDefinition::new("answer", AssetSchema::number(), AssetRole::Output),
            AssetScope::mission(mission.mission_id.as_str()),
            None,
        )
        .await
        .unwrap();
        mission.output_asset_ids.push(output.asset_id.clone());

        // A brand-new asset cannot satisfy the declared output.
        let err = propose_plan(&mut txn, &mission, base_def(new_output_spec("answer"), true))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let def = base_def(
            OutputSpec::ExistingAsset {
                asset_id: output.asset_id.clone(),
            },
            true,
        );
        let hop = propose_plan(&mut txn, &mission, def).await.unwrap();
        assert_eq!(hop.status, HopStatus::PlanProposed);
        assert_eq!(hop.sequence_order, 1);
    }

    #[tokio::test]
    async fn test_zero_step_hop_completes_explicitly() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);
        let mission = Mission::new("m".into(), "goal".into());
        let registry = ToolRegistry::new();

        let target = create_asset(
            &mut txn,
            AssetDefinition::new("checked", AssetSchema::boolean(), AssetRole::Output),
            AssetScope::mission(mission.mission_id.as_str()),
            Some(serde_json::json!(true)),
        )
        .await
        .unwrap();

        let def = base_def(
            OutputSpec::ExistingAsset {
                asset_id: target.asset_id.clone(),
            },
            false,
        );
        let hop = propose_plan(&mut txn, &mission, def).await.unwrap();
        accept_plan(&mut txn, &hop.hop_id).await.unwrap();
        propose_implementation(&mut txn, &registry, &hop.hop_id, Vec::new())
            .await
            .unwrap();
        accept_implementation(&mut txn, &hop.hop_id).await.unwrap();
        let (_, started) = begin_execution(&mut txn, &hop.hop_id).await.unwrap();
        assert!(started.is_none());

        let (done, output_id) = complete(&mut txn, &hop.hop_id).await.unwrap();
        assert_eq!(done.status, HopStatus::Completed);
        assert_eq!(output_id, target.asset_id);
    }

    #[tokio::test]
    async fn test_complete_rejects_unready_existing_target() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);
        let mission = Mission::new("m".into(), "goal".into());
        let registry = ToolRegistry::new();

        let target = create_asset(
            &mut txn,
            AssetDefinition::new("pending", AssetSchema::number(), AssetRole::Output),
            AssetScope::mission(mission.mission_id.as_str()),
            None,
        )
        .await
        .unwrap();

        let def = base_def(
            OutputSpec::ExistingAsset {
                asset_id: target.asset_id.clone(),
            },
            false,
        );
        let hop = propose_plan(&mut txn, &mission, def).await.unwrap();
        accept_plan(&mut txn, &hop.hop_id).await.unwrap();
        propose_implementation(&mut txn, &registry, &hop.hop_id, Vec::new())
            .await
            .unwrap();
        accept_implementation(&mut txn, &hop.hop_id).await.unwrap();
        begin_execution(&mut txn, &hop.hop_id).await.unwrap();

        let err = complete(&mut txn, &hop.hop_id).await.unwrap_err();
        assert_eq!(err.kind(), "unresolved_asset");

        // The hop is still executing; nothing was finalized.
        assert_eq!(
            txn.require_hop(&hop.hop_id).await.unwrap().status,
            HopStatus::Executing
        );
    }
}
