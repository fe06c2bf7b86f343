//! Tool step controller.
//!
//! Responsibilities:
//! - Create steps from proposed definitions, validated against the tool
//!   registry and the hop's working set before anything is staged.
//! - Resolve parameter mappings into concrete values at execution time.
//! - Apply tool outcomes: fill result targets on success, mark them on
//!   failure.
//!
//! Steps never look upward; hop and mission consequences of a step outcome
//! belong to the hop controller and the coordinator.

use std::collections::HashMap;

use itertools::Itertools;
use serde_json::Value;
use tracing::debug;

use crate::asset::{create_placeholder, AssetScope, AssetStatus, ScopeView};
use crate::error::{EngineError, EngineResult};
use crate::storage::StateTxn;
use crate::tools::{ToolOutputs, ToolRegistry};
use crate::types::{
    AssetId, Hop, ParameterMapping, ResultMapping, StepStatus, ToolStep, ToolStepDefinition,
};

/// Validate a proposed step against the tool contract and the hop's working
/// set, materialize placeholders for its new-asset results, and stage it.
/// The placeholders are added to `view` so later steps of the same proposal
/// can reference them.
pub async fn create_tool_step(
    txn: &mut StateTxn<'_>,
    registry: &ToolRegistry,
    hop: &mut Hop,
    def: ToolStepDefinition,
    view: &mut ScopeView,
) -> EngineResult<ToolStep> {
    let tool_def = registry
        .definition(&def.tool_id)
        .await
        .ok_or_else(|| EngineError::Validation(format!("unknown tool '{}'", def.tool_id)))?;

    for parameter in &tool_def.parameters {
        if parameter.required && !def.parameter_mapping.contains_key(&parameter.name) {
            return Err(EngineError::Validation(format!(
                "required parameter '{}' of tool '{}' is not mapped",
                parameter.name, def.tool_id
            )));
        }
    }
    for (name, mapping) in def.parameter_mapping.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        if tool_def.parameter(name).is_none() {
            return Err(EngineError::Validation(format!(
                "tool '{}' declares no parameter named '{}'",
                def.tool_id, name
            )));
        }
        if let ParameterMapping::AssetField { asset_id, .. } = mapping {
            if !view.contains(asset_id) {
                return Err(EngineError::Validation(format!(
                    "parameter '{}' references asset {} outside the hop's working set",
                    name, asset_id
                )));
            }
        }
    }

    let ToolStepDefinition {
        tool_id,
        parameter_mapping,
        result_mapping,
    } = def;

    let mut bound_results = HashMap::new();
    for (output_name, mapping) in result_mapping.into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
        if tool_def.output(&output_name).is_none() {
            return Err(EngineError::Validation(format!(
                "tool '{}' declares no output named '{}'",
                tool_id, output_name
            )));
        }
        let bound = match mapping {
            ResultMapping::ExistingAsset { asset_id } => {
                if !view.contains(&asset_id) {
                    return Err(EngineError::Validation(format!(
                        "output '{}' targets asset {} outside the hop's working set",
                        output_name, asset_id
                    )));
                }
                ResultMapping::ExistingAsset { asset_id }
            }
            ResultMapping::NewAsset { definition, .. } => {
                let placeholder = create_placeholder(
                    txn,
                    definition.clone(),
                    AssetScope::hop(hop.hop_id.as_str()),
                )
                .await?;
                view.insert(placeholder.clone());
                ResultMapping::NewAsset {
                    definition,
                    asset_id: Some(placeholder.asset_id),
                }
            }
        };
        bound_results.insert(output_name, bound);
    }

    let sequence_order = hop.tool_step_ids.len() as u32 + 1;
    let step = ToolStep::new(
        hop.hop_id.clone(),
        sequence_order,
        ToolStepDefinition {
            tool_id,
            parameter_mapping,
            result_mapping: bound_results,
        },
    );
    hop.tool_step_ids.push(step.step_id.clone());
    txn.stage_step(step.clone());
    Ok(step)
}

/// Move a step into execution. Existing-asset result targets are marked
/// InProgress so observers can see what is being produced.
pub async fn begin_execution(txn: &mut StateTxn<'_>, step_id: &str) -> EngineResult<ToolStep> {
    let mut step = txn.require_step(step_id).await?;
    step.transition_to(StepStatus::Executing, None)?;

    for mapping in step.result_mapping.values() {
        if let ResultMapping::ExistingAsset { asset_id } = mapping {
            let mut asset = txn.require_asset(asset_id).await?;
            asset.mark(AssetStatus::InProgress, Some(format!("step {}", step.step_id)));
            txn.stage_asset(asset);
        }
    }
    txn.stage_step(step.clone());
    Ok(step)
}

/// Turn the step's parameter mappings into concrete values. Literals pass
/// through; asset fields require the asset Ready in the working set.
pub fn resolve_parameters(
    step: &ToolStep,
    view: &ScopeView,
) -> EngineResult<HashMap<String, Value>> {
    let mut params = HashMap::new();
    for (name, mapping) in &step.parameter_mapping {
        let value = match mapping {
            ParameterMapping::Literal { value } => value.clone(),
            ParameterMapping::AssetField { asset_id, path } => {
                let asset = view.get(asset_id).ok_or_else(|| {
                    EngineError::Validation(format!(
                        "parameter '{}' references asset {} outside the hop's working set",
                        name, asset_id
                    ))
                })?;
                if !asset.is_resolvable() {
                    return Err(EngineError::UnresolvedAsset {
                        asset_id: asset.asset_id.clone(),
                        status: asset.status.to_string(),
                    });
                }
                asset.resolve_field(path.as_deref())?
            }
        };
        params.insert(name.clone(), value);
    }
    Ok(params)
}

/// Apply the tool's outputs to the step's result mapping and complete the
/// step. Every mapped output must be present; extra outputs are dropped.
/// Returns the step and the ids of the assets that received values.
pub async fn complete_execution(
    txn: &mut StateTxn<'_>,
    step_id: &str,
    outputs: &ToolOutputs,
) -> EngineResult<(ToolStep, Vec<AssetId>)> {
    let mut step = txn.require_step(step_id).await?;
    if step.status != StepStatus::Executing {
        return Err(EngineError::InvalidTransition {
            entity: "tool_step",
            id: step.step_id.clone(),
            from: step.status.to_string(),
            to: StepStatus::Completed.to_string(),
        });
    }

    let mut filled = Vec::new();
    let mappings: Vec<(String, ResultMapping)> = step
        .result_mapping
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .sorted_by(|a, b| a.0.cmp(&b.0))
        .collect();
    for (output_name, mapping) in mappings {
        let value = outputs.get(&output_name).cloned().ok_or_else(|| {
            EngineError::OutputMapping(format!(
                "tool '{}' returned no output named '{}'",
                step.tool_id, output_name
            ))
        })?;
        let target_id = match mapping {
            ResultMapping::NewAsset {
                asset_id: Some(asset_id),
                ..
            } => asset_id,
            ResultMapping::NewAsset { asset_id: None, .. } => {
                return Err(EngineError::OutputMapping(format!(
                    "output '{}' has no bound placeholder asset",
                    output_name
                )));
            }
            ResultMapping::ExistingAsset { asset_id } => asset_id,
        };
        let mut asset = txn.require_asset(&target_id).await?;
        asset.commit_value(value);
        txn.stage_asset(asset);
        filled.push(target_id);
    }

    for name in outputs.keys() {
        if !step.result_mapping.contains_key(name) {
            debug!("[StepController] Dropping unmapped output '{}' of step {}", name, step_id);
        }
    }

    step.transition_to(StepStatus::Completed, None)?;
    txn.stage_step(step.clone());
    Ok((step, filled))
}

/// Record a tool failure. The step becomes terminal and its half-produced
/// targets are marked Error; escalation to the hop is the caller's job.
pub async fn fail_execution(
    txn: &mut StateTxn<'_>,
    step_id: &str,
    error: &str,
) -> EngineResult<ToolStep> {
    let mut step = txn.require_step(step_id).await?;
    step.transition_to(StepStatus::Failed, Some(error.to_string()))?;
    step.error_message = Some(error.to_string());

    for mapping in step.result_mapping.values() {
        if let ResultMapping::ExistingAsset { asset_id } = mapping {
            let mut asset = txn.require_asset(asset_id).await?;
            if asset.status == AssetStatus::InProgress {
                asset.mark(AssetStatus::Error, Some(error.to_string()));
                txn.stage_asset(asset);
            }
        }
    }
    txn.stage_step(step.clone());
    Ok(step)
}

/// Cancel a step that has not finished. Terminal steps are left untouched
/// so cascades stay idempotent.
pub async fn cancel(
    txn: &mut StateTxn<'_>,
    step_id: &str,
    reason: Option<String>,
) -> EngineResult<ToolStep> {
    let mut step = txn.require_step(step_id).await?;
    if step.status.is_terminal() {
        return Ok(step);
    }
    step.transition_to(StepStatus::Cancelled, reason)?;
    txn.stage_step(step.clone());
    Ok(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{create_asset, AssetDefinition, AssetRole, AssetSchema};
    use crate::storage::InMemoryStateStore;
    use crate::tools::{ToolDefinition, ToolOutput, ToolParameter};
    use crate::types::{HopDefinition, OutputSpec};
    use serde_json::json;

    async fn registry_with_adder() -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry
            .register_fn(
                ToolDefinition::new("adder", "Adder")
                    .with_parameter(ToolParameter::new("a", AssetSchema::number()))
                    .with_parameter(ToolParameter::new("b", AssetSchema::number()).optional())
                    .with_output(ToolOutput::new("sum", AssetSchema::number())),
                |_| async { Ok(HashMap::new()) },
            )
            .await
            .unwrap();
        registry
    }

    fn hop_with_new_output(mission_id: &str) -> Hop {
        Hop::new(
            mission_id.to_string(),
            1,
            HopDefinition {
                name: "stage".into(),
                description: None,
                goal: "add numbers".into(),
                success_criteria: None,
                input_mapping: HashMap::new(),
                output_spec: OutputSpec::NewAsset {
                    definition: AssetDefinition::new("sum", AssetSchema::number(), AssetRole::Output),
                },
                is_final: true,
            },
        )
    }

    fn new_asset_step(tool_id: &str) -> ToolStepDefinition {
        ToolStepDefinition {
            tool_id: tool_id.to_string(),
            parameter_mapping: HashMap::from([(
                "a".to_string(),
                ParameterMapping::Literal { value: json!(40) },
            )]),
            result_mapping: HashMap::from([(
                "sum".to_string(),
                ResultMapping::NewAsset {
                    definition: AssetDefinition::new("sum", AssetSchema::number(), AssetRole::Output),
                    asset_id: None,
                },
            )]),
        }
    }

    #[tokio::test]
    async fn test_create_step_binds_placeholder() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);
        let registry = registry_with_adder().await;
        let mut hop = hop_with_new_output("mission-1");
        let mut view = ScopeView::for_hop(&txn, &hop).await.unwrap();

        let step = create_tool_step(&mut txn, &registry, &mut hop, new_asset_step("adder"), &mut view)
            .await
            .unwrap();

        assert_eq!(step.sequence_order, 1);
        assert_eq!(hop.tool_step_ids, vec![step.step_id.clone()]);
        match step.result_mapping.get("sum").unwrap() {
            ResultMapping::NewAsset { asset_id: Some(id), .. } => {
                let placeholder = txn.require_asset(id).await.unwrap();
                assert_eq!(placeholder.status, AssetStatus::Proposed);
                assert_eq!(placeholder.scope, AssetScope::hop(hop.hop_id.as_str()));
                assert!(view.contains(id));
            }
            other => panic!("placeholder not bound: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_step_rejects_unknown_tool_and_params() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);
        let registry = registry_with_adder().await;
        let mut hop = hop_with_new_output("mission-1");
        let mut view = ScopeView::for_hop(&txn, &hop).await.unwrap();

        let err = create_tool_step(&mut txn, &registry, &mut hop, new_asset_step("ghost"), &mut view)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        // Required parameter 'a' unmapped.
        let mut missing = new_asset_step("adder");
        missing.parameter_mapping.clear();
        let err = create_tool_step(&mut txn, &registry, &mut hop, missing, &mut view)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        // Reference to an asset the hop cannot see.
        let mut invisible = new_asset_step("adder");
        invisible.parameter_mapping.insert(
            "b".to_string(),
            ParameterMapping::AssetField {
                asset_id: "asset-unknown".to_string(),
                path: None,
            },
        );
        let err = create_tool_step(&mut txn, &registry, &mut hop, invisible, &mut view)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_resolve_parameters_reads_ready_assets() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);
        let hop = hop_with_new_output("mission-1");

        let source = create_asset(
            &mut txn,
            AssetDefinition::new("source", AssetSchema::freeform_object(), AssetRole::Input),
            AssetScope::hop(hop.hop_id.as_str()),
            Some(json!({"nested": {"n": 2}})),
        )
        .await
        .unwrap();
        let pending = create_asset(
            &mut txn,
            AssetDefinition::new("later", AssetSchema::number(), AssetRole::Intermediate),
            AssetScope::hop(hop.hop_id.as_str()),
            None,
        )
        .await
        .unwrap();

        let view = ScopeView::for_hop(&txn, &hop).await.unwrap();
        let mut step = ToolStep::new(hop.hop_id.clone(), 1, new_asset_step("adder"));
        step.parameter_mapping.insert(
            "b".to_string(),
            ParameterMapping::AssetField {
                asset_id: source.asset_id.clone(),
                path: Some("nested.n".to_string()),
            },
        );

        let params = resolve_parameters(&step, &view).unwrap();
        assert_eq!(params.get("a"), Some(&json!(40)));
        assert_eq!(params.get("b"), Some(&json!(2)));

        // A pending asset cannot be read.
        step.parameter_mapping.insert(
            "b".to_string(),
            ParameterMapping::AssetField {
                asset_id: pending.asset_id.clone(),
                path: None,
            },
        );
        let err = resolve_parameters(&step, &view).unwrap_err();
        assert_eq!(err.kind(), "unresolved_asset");
    }

    #[tokio::test]
    async fn test_complete_fills_placeholder_and_rejects_missing_output() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);
        let registry = registry_with_adder().await;
        let mut hop = hop_with_new_output("mission-1");
        let mut view = ScopeView::for_hop(&txn, &hop).await.unwrap();

        let step = create_tool_step(&mut txn, &registry, &mut hop, new_asset_step("adder"), &mut view)
            .await
            .unwrap();
        begin_execution(&mut txn, &step.step_id).await.unwrap();

        // Tool forgot the declared output.
        let err = complete_execution(&mut txn, &step.step_id, &HashMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "output_mapping");

        let outputs = HashMap::from([("sum".to_string(), json!(42))]);
        let (done, filled) = complete_execution(&mut txn, &step.step_id, &outputs)
            .await
            .unwrap();
        assert_eq!(done.status, StepStatus::Completed);
        assert_eq!(filled.len(), 1);
        let asset = txn.require_asset(&filled[0]).await.unwrap();
        assert_eq!(asset.status, AssetStatus::Ready);
        assert_eq!(asset.value, Some(json!(42)));
    }

    #[tokio::test]
    async fn test_fail_marks_existing_targets() {
        let store = InMemoryStateStore::new();
        let mut txn = StateTxn::new(&store);
        let registry = registry_with_adder().await;
        let mut hop = hop_with_new_output("mission-1");

        let target = create_asset(
            &mut txn,
            AssetDefinition::new("out", AssetSchema::number(), AssetRole::Output),
            AssetScope::hop(hop.hop_id.as_str()),
            None,
        )
        .await
        .unwrap();
        let mut view = ScopeView::for_hop(&txn, &hop).await.unwrap();

        let mut def = new_asset_step("adder");
        def.result_mapping = HashMap::from([(
            "sum".to_string(),
            ResultMapping::ExistingAsset {
                asset_id: target.asset_id.clone(),
            },
        )]);
        let step = create_tool_step(&mut txn, &registry, &mut hop, def, &mut view)
            .await
            .unwrap();

        begin_execution(&mut txn, &step.step_id).await.unwrap();
        assert_eq!(
            txn.require_asset(&target.asset_id).await.unwrap().status,
            AssetStatus::InProgress
        );

        let failed = fail_execution(&mut txn, &step.step_id, "boom").await.unwrap();
        assert_eq!(failed.status, StepStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert_eq!(
            txn.require_asset(&target.asset_id).await.unwrap().status,
            AssetStatus::Error
        );
    }
}
