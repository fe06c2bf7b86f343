//! Tool registry.
//!
//! Responsibilities:
//! - Hold the declared surface of every tool the planner may schedule:
//!   parameter and output contracts plus per-tool resource configuration.
//! - Dispatch step execution to the registered handler.
//!
//! The registry is built at startup and injected into the engine. Handlers
//! are consumed through the `ToolHandler` trait; closures can be registered
//! directly for tests and small embeddings.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::asset::AssetSchema;
use crate::error::{EngineError, EngineResult};
use crate::types::StepId;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: AssetSchema,
    #[serde(default = "default_true")]
    pub required: bool,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, schema: AssetSchema) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub schema: AssetSchema,
}

impl ToolOutput {
    pub fn new(name: impl Into<String>, schema: AssetSchema) -> Self {
        Self {
            name: name.into(),
            description: None,
            schema,
        }
    }
}

/// Declared contract of one tool. Steps are validated against this before
/// an implementation proposal is accepted into the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub tool_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    #[serde(default)]
    pub outputs: Vec<ToolOutput>,
    /// Opaque per-tool settings (endpoints, model names, limits) handed to
    /// the handler on every call.
    #[serde(default)]
    pub resource_config: HashMap<String, Value>,
}

impl ToolDefinition {
    pub fn new(tool_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            name: name.into(),
            description: None,
            parameters: Vec::new(),
            outputs: Vec::new(),
            resource_config: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_output(mut self, output: ToolOutput) -> Self {
        self.outputs.push(output);
        self
    }

    pub fn with_resource(mut self, key: impl Into<String>, value: Value) -> Self {
        self.resource_config.insert(key.into(), value);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ToolParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&ToolOutput> {
        self.outputs.iter().find(|o| o.name == name)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.tool_id.trim().is_empty() {
            return Err(EngineError::Validation(
                "tool_id must not be empty".to_string(),
            ));
        }
        for p in &self.parameters {
            p.schema.validate()?;
        }
        for o in &self.outputs {
            o.schema.validate()?;
        }
        if self.parameters.iter().map(|p| &p.name).duplicates().next().is_some() {
            return Err(EngineError::Validation(format!(
                "tool {} declares duplicate parameter names",
                self.tool_id
            )));
        }
        if self.outputs.iter().map(|o| &o.name).duplicates().next().is_some() {
            return Err(EngineError::Validation(format!(
                "tool {} declares duplicate output names",
                self.tool_id
            )));
        }
        Ok(())
    }
}

/// Everything a handler receives for one invocation. `resource_config` is
/// injected from the registered definition at dispatch time.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub tool_id: String,
    pub step_id: StepId,
    pub params: HashMap<String, Value>,
    pub resource_config: HashMap<String, Value>,
}

impl ToolCall {
    pub fn new(tool_id: impl Into<String>, step_id: StepId, params: HashMap<String, Value>) -> Self {
        Self {
            tool_id: tool_id.into(),
            step_id,
            params,
            resource_config: HashMap::new(),
        }
    }
}

pub type ToolOutputs = HashMap<String, Value>;

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, call: ToolCall) -> EngineResult<ToolOutputs>;
}

type HandlerFn = Box<dyn Fn(ToolCall) -> BoxFuture<'static, EngineResult<ToolOutputs>> + Send + Sync>;

struct FnToolHandler {
    f: HandlerFn,
}

#[async_trait]
impl ToolHandler for FnToolHandler {
    async fn execute(&self, call: ToolCall) -> EngineResult<ToolOutputs> {
        (self.f)(call).await
    }
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> EngineResult<()> {
        definition.validate()?;
        let mut tools = self.tools.write().await;
        if tools.contains_key(&definition.tool_id) {
            return Err(EngineError::Validation(format!(
                "tool {} is already registered",
                definition.tool_id
            )));
        }
        tools.insert(
            definition.tool_id.clone(),
            RegisteredTool {
                definition,
                handler,
            },
        );
        Ok(())
    }

    /// Register a closure as the handler. Convenient for tests and small
    /// embeddings that do not want a handler type per tool.
    pub async fn register_fn<F, Fut>(&self, definition: ToolDefinition, f: F) -> EngineResult<()>
    where
        F: Fn(ToolCall) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = EngineResult<ToolOutputs>> + Send + 'static,
    {
        let handler = FnToolHandler {
            f: Box::new(move |call| Box::pin(f(call))),
        };
        self.register(definition, Arc::new(handler)).await
    }

    pub async fn definition(&self, tool_id: &str) -> Option<ToolDefinition> {
        self.tools
            .read()
            .await
            .get(tool_id)
            .map(|t| t.definition.clone())
    }

    pub async fn list(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .await
            .values()
            .map(|t| t.definition.clone())
            .sorted_by(|a, b| a.tool_id.cmp(&b.tool_id))
            .collect()
    }

    /// Invoke the handler for `call.tool_id`. The registry lock is released
    /// before the handler runs, so slow tools do not block registration or
    /// other dispatches.
    pub async fn execute(&self, mut call: ToolCall) -> EngineResult<ToolOutputs> {
        let (handler, resource_config) = {
            let tools = self.tools.read().await;
            let tool = tools
                .get(&call.tool_id)
                .ok_or_else(|| EngineError::not_found("tool", call.tool_id.clone()))?;
            (tool.handler.clone(), tool.definition.resource_config.clone())
        };
        call.resource_config = resource_config;
        handler.execute(call).await
    }
}
