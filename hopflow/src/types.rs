//! Core workflow types.
//!
//! This module defines the three nested entities of the engine and their
//! lifecycles: Mission (top-level goal under approval), Hop (one
//! plan/approve/execute stage), ToolStep (one tool invocation inside a hop).
//!
//! Status enums carry explicit transition tables; every status change goes
//! through `transition_to`, which records a `StateTransition` on the entity
//! and rejects anything the table does not allow.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::asset::AssetDefinition;
use crate::error::{EngineError, EngineResult};

/// Unique identifier for a Mission
pub type MissionId = String;

/// Unique identifier for a Hop
pub type HopId = String;

/// Unique identifier for a ToolStep
pub type StepId = String;

/// Unique identifier for an Asset
pub type AssetId = String;

/// One recorded status change. Entities keep these in order, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

impl StateTransition {
    pub fn new(from: String, to: String, reason: Option<String>) -> Self {
        Self {
            from,
            to,
            reason,
            at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionStatus {
    /// Proposed, waiting for the human gate before any hop may run.
    #[serde(alias = "PENDING")]
    AwaitingApproval,
    #[serde(alias = "ACTIVE")]
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl MissionStatus {
    pub fn allowed_transitions(&self) -> &'static [MissionStatus] {
        use MissionStatus::*;
        match self {
            AwaitingApproval => &[InProgress, Failed, Cancelled],
            InProgress => &[Completed, Failed, Cancelled],
            Completed | Failed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: &MissionStatus) -> bool {
        self.allowed_transitions().contains(target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MissionStatus::AwaitingApproval => "AWAITING_APPROVAL",
            MissionStatus::InProgress => "IN_PROGRESS",
            MissionStatus::Completed => "COMPLETED",
            MissionStatus::Failed => "FAILED",
            MissionStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

/// Hop lifecycle. Plan and implementation each pass a human gate before
/// execution starts; there are no skips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HopStatus {
    /// Hop exists, plan not yet proposed. Accepts the legacy
    /// `READY_TO_DESIGN` wire name.
    #[serde(alias = "READY_TO_DESIGN")]
    PlanStarted,
    PlanProposed,
    PlanAccepted,
    ImplProposed,
    ImplAccepted,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl HopStatus {
    pub fn allowed_transitions(&self) -> &'static [HopStatus] {
        use HopStatus::*;
        match self {
            PlanStarted => &[PlanProposed, Failed, Cancelled],
            PlanProposed => &[PlanAccepted, Failed, Cancelled],
            PlanAccepted => &[ImplProposed, Failed, Cancelled],
            ImplProposed => &[ImplAccepted, Failed, Cancelled],
            ImplAccepted => &[Executing, Failed, Cancelled],
            Executing => &[Completed, Failed, Cancelled],
            Completed | Failed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: &HopStatus) -> bool {
        self.allowed_transitions().contains(target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for HopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HopStatus::PlanStarted => "PLAN_STARTED",
            HopStatus::PlanProposed => "PLAN_PROPOSED",
            HopStatus::PlanAccepted => "PLAN_ACCEPTED",
            HopStatus::ImplProposed => "IMPL_PROPOSED",
            HopStatus::ImplAccepted => "IMPL_ACCEPTED",
            HopStatus::Executing => "EXECUTING",
            HopStatus::Completed => "COMPLETED",
            HopStatus::Failed => "FAILED",
            HopStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Proposed,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl StepStatus {
    pub fn allowed_transitions(&self) -> &'static [StepStatus] {
        use StepStatus::*;
        match self {
            Proposed => &[Executing, Cancelled],
            Executing => &[Completed, Failed, Cancelled],
            Completed | Failed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, target: &StepStatus) -> bool {
        self.allowed_transitions().contains(target)
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Proposed => "PROPOSED",
            StepStatus::Executing => "EXECUTING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
            StepStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

// ---------------------------------------------------------------------------
// Mapping sum types
// ---------------------------------------------------------------------------

/// How one declared tool parameter gets its value at execution time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterMapping {
    /// Inline constant, passed through untouched.
    Literal { value: serde_json::Value },
    /// Read from an asset visible in the hop's working set. `path` navigates
    /// into object values with dotted segments; absent means the whole value.
    AssetField {
        asset_id: AssetId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

/// Where one declared tool output lands when the step completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultMapping {
    /// Materialize a new hop-scoped asset from the output value. `asset_id`
    /// is bound when the implementation is proposed: a Proposed placeholder
    /// is created up front so later steps can reference it.
    NewAsset {
        definition: AssetDefinition,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        asset_id: Option<AssetId>,
    },
    /// Write the output value into an asset that already exists.
    ExistingAsset { asset_id: AssetId },
}

/// The hop's declared contribution to its mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputSpec {
    /// A hop-scoped asset of this shape will be produced and promoted to
    /// mission scope on completion.
    NewAsset { definition: AssetDefinition },
    /// The hop fills an asset already declared at mission scope.
    ExistingAsset { asset_id: AssetId },
}

impl OutputSpec {
    pub fn existing_asset_id(&self) -> Option<&AssetId> {
        match self {
            OutputSpec::ExistingAsset { asset_id } => Some(asset_id),
            OutputSpec::NewAsset { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Definition payloads (caller-supplied, validated before entities are built)
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

/// One declared mission input: its shape, an optional up-front value, and
/// whether acceptance should block on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionInputDef {
    pub definition: AssetDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default = "default_true")]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionDefinition {
    pub name: String,
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,
    #[serde(default)]
    pub inputs: Vec<MissionInputDef>,
    #[serde(default)]
    pub outputs: Vec<AssetDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,
    /// Local name -> mission asset id. These assets become visible to the
    /// hop's steps without leaving mission scope.
    #[serde(default)]
    pub input_mapping: HashMap<String, AssetId>,
    pub output_spec: OutputSpec,
    #[serde(default)]
    pub is_final: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStepDefinition {
    pub tool_id: String,
    #[serde(default)]
    pub parameter_mapping: HashMap<String, ParameterMapping>,
    #[serde(default)]
    pub result_mapping: HashMap<String, ResultMapping>,
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub mission_id: MissionId,
    pub name: String,
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,
    pub input_asset_ids: Vec<AssetId>,
    /// Subset of `input_asset_ids` that must be Ready before acceptance.
    #[serde(default)]
    pub required_input_ids: Vec<AssetId>,
    pub output_asset_ids: Vec<AssetId>,
    /// At most one non-terminal hop at a time.
    pub current_hop_id: Option<HopId>,
    /// Terminal hops in completion order.
    pub hop_history: Vec<HopId>,
    pub status: MissionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub transitions: Vec<StateTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mission {
    pub fn new(name: String, goal: String) -> Self {
        let now = Utc::now();
        Self {
            mission_id: format!("mission-{}", Uuid::new_v4()),
            name,
            goal,
            success_criteria: None,
            input_asset_ids: Vec::new(),
            required_input_ids: Vec::new(),
            output_asset_ids: Vec::new(),
            current_hop_id: None,
            hop_history: Vec::new(),
            status: MissionStatus::AwaitingApproval,
            error_message: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_success_criteria(mut self, criteria: Option<String>) -> Self {
        self.success_criteria = criteria;
        self
    }

    pub fn transition_to(
        &mut self,
        to: MissionStatus,
        reason: Option<String>,
    ) -> EngineResult<()> {
        if !self.status.can_transition_to(&to) {
            return Err(EngineError::InvalidTransition {
                entity: "mission",
                id: self.mission_id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.transitions.push(StateTransition::new(
            self.status.to_string(),
            to.to_string(),
            reason,
        ));
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    pub hop_id: HopId,
    pub mission_id: MissionId,
    /// Position within the mission, assigned at proposal; monotonic.
    pub sequence_order: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,
    pub input_mapping: HashMap<String, AssetId>,
    pub output_spec: OutputSpec,
    /// Owned steps in execution order.
    pub tool_step_ids: Vec<StepId>,
    pub is_final: bool,
    pub status: HopStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub transitions: Vec<StateTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Hop {
    pub fn new(mission_id: MissionId, sequence_order: u32, def: HopDefinition) -> Self {
        let now = Utc::now();
        Self {
            hop_id: format!("hop-{}", Uuid::new_v4()),
            mission_id,
            sequence_order,
            name: def.name,
            description: def.description,
            goal: def.goal,
            success_criteria: def.success_criteria,
            input_mapping: def.input_mapping,
            output_spec: def.output_spec,
            tool_step_ids: Vec::new(),
            is_final: def.is_final,
            status: HopStatus::PlanStarted,
            error_message: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition_to(&mut self, to: HopStatus, reason: Option<String>) -> EngineResult<()> {
        if !self.status.can_transition_to(&to) {
            return Err(EngineError::InvalidTransition {
                entity: "hop",
                id: self.hop_id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.transitions.push(StateTransition::new(
            self.status.to_string(),
            to.to_string(),
            reason,
        ));
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStep {
    pub step_id: StepId,
    pub hop_id: HopId,
    pub tool_id: String,
    /// Position within the hop; steps run strictly in this order.
    pub sequence_order: u32,
    pub parameter_mapping: HashMap<String, ParameterMapping>,
    pub result_mapping: HashMap<String, ResultMapping>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub transitions: Vec<StateTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolStep {
    pub fn new(hop_id: HopId, sequence_order: u32, def: ToolStepDefinition) -> Self {
        let now = Utc::now();
        Self {
            step_id: format!("step-{}", Uuid::new_v4()),
            hop_id,
            tool_id: def.tool_id,
            sequence_order,
            parameter_mapping: def.parameter_mapping,
            result_mapping: def.result_mapping,
            status: StepStatus::Proposed,
            error_message: None,
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition_to(&mut self, to: StepStatus, reason: Option<String>) -> EngineResult<()> {
        if !self.status.can_transition_to(&to) {
            return Err(EngineError::InvalidTransition {
                entity: "tool_step",
                id: self.step_id.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.transitions.push(StateTransition::new(
            self.status.to_string(),
            to.to_string(),
            reason,
        ));
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}
