//! hopflow — a workflow state-machine engine for AI planning agents.
//!
//! A *mission* is a top-level goal executed under human approval. It unfolds
//! as a sequence of *hops*, each of which passes a plan gate and an
//! implementation gate before it executes its *tool steps* in order. Data
//! flows between these levels as *assets*: typed, scope-bound artifacts that
//! a hop produces locally and promotes to mission scope on completion, so
//! later hops can consume them.
//!
//! All mutation goes through [`coordinator::StateCoordinator::update_state`]
//! (or the [`engine::MissionEngine`] façade): each transaction type maps to
//! a fixed controller sequence staged on one transaction overlay and
//! committed to storage as a single batch. Transactions on the same mission
//! are serialized; independent missions run in parallel.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hopflow::{MissionEngine, StateTransaction};
//! use hopflow::types::MissionDefinition;
//!
//! # async fn demo() {
//! let engine = MissionEngine::in_memory();
//! let result = engine
//!     .update_state(StateTransaction::ProposeMission {
//!         definition: MissionDefinition {
//!             name: "research".into(),
//!             goal: "answer the question".into(),
//!             success_criteria: None,
//!             inputs: vec![],
//!             outputs: vec![],
//!         },
//!     })
//!     .await;
//! assert!(result.success);
//! # }
//! ```

pub mod asset;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod hop;
pub mod mission;
pub mod observer;
pub mod runner;
pub mod step;
pub mod storage;
pub mod tools;
pub mod types;

pub use asset::{Asset, AssetDefinition, AssetRole, AssetSchema, AssetScope, AssetStatus, ScopeType};
pub use config::EngineConfig;
pub use coordinator::{StateCoordinator, StateTransaction, TransactionResult};
pub use engine::MissionEngine;
pub use error::{EngineError, EngineResult};
pub use observer::{NoopObserver, TracingObserver, TransactionRecord, TransitionObserver};
pub use runner::StepRunner;
pub use storage::{FileStateStore, InMemoryStateStore, StateStore, StorageConfig};
pub use tools::{
    ToolCall, ToolDefinition, ToolHandler, ToolOutput, ToolOutputs, ToolParameter, ToolRegistry,
};
pub use types::{
    Hop, HopDefinition, HopStatus, Mission, MissionDefinition, MissionStatus, OutputSpec,
    ParameterMapping, ResultMapping, ToolStep, ToolStepDefinition,
};
