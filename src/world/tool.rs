//! Tool abstraction & built-ins (C13): the trait the TOOL_CALLS branch dispatches
//! through, plus the two tools shipped with the core.
//!
//! `Tool`/`ToolRegistry` are grounded on the grounding repo's `tool_protocol.rs`
//! (`ToolParameter`, `ToolResult`, a registry keyed by tool name); `ShellTool` adapts
//! `tools/bash.rs`'s `BashTool` into this trait rather than keeping its standalone API.

use crate::world::error::ToolError;
use crate::world::llm::{ToolParameter, ToolParameterType, ToolSchema};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;

/// The reserved function name the orchestrator recognizes by literal comparison (never
/// dispatched through `Tool::execute`) per `SPEC_FULL.md` §4.C13.
pub const HUMAN_INTERVENTION_TOOL_NAME: &str = "human_intervention.request";

/// Per-call context a tool needs to emit lifecycle frames and honor cancellation.
pub struct ToolExecutionContext {
    pub world_id: String,
    pub chat_id: String,
    pub execution_id: String,
}

pub type ToolOutcome = Result<String, ToolError>;

/// A callable the orchestrator's TOOL_CALLS step may invoke.
///
/// `execute` never signals "approval needed" itself; the orchestrator consults
/// `requires_approval()` and the approval cache *before* calling it (§4.C13
/// REDESIGN FLAGS), so every implementation here can assume it has already been
/// cleared to run.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn requires_approval(&self) -> bool {
        false
    }

    fn schema(&self) -> ToolSchema;

    async fn execute(&self, args: serde_json::Value, ctx: &ToolExecutionContext) -> ToolOutcome;
}

/// Aggregates named tools behind `Arc<dyn Tool>`, mirroring the grounding repo's
/// `ToolRegistry` (`register`/`get`/`list_schemas`/`execute_tool`).
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema()).collect()
    }

    pub async fn execute_tool(
        &self,
        name: &str,
        args: serde_json::Value,
        ctx: &ToolExecutionContext,
    ) -> ToolOutcome {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(args, ctx).await
    }
}

/// Approval-required shell execution, adapted from the grounding repo's `BashTool`: a
/// bounded, timed-out `tokio::process::Command` invocation with combined stdout/stderr
/// capture instead of the standalone builder API the original exposed.
pub struct ShellTool {
    timeout_secs: u64,
}

impl ShellTool {
    pub fn new() -> Self {
        Self { timeout_secs: 30 }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    async fn read_all<R: AsyncReadExt + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell_cmd"
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: "Run a shell command and return its combined output.".to_string(),
            parameters: vec![ToolParameter {
                name: "cmd".to_string(),
                param_type: ToolParameterType::String,
                description: "The command line to execute.".to_string(),
                required: true,
            }],
        }
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolExecutionContext) -> ToolOutcome {
        let cmd = args
            .get("cmd")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidParameters("missing \"cmd\" argument".to_string()))?
            .to_string();

        let timeout = std::time::Duration::from_secs(self.timeout_secs);
        let run = async move {
            let mut child = TokioCommand::new("/bin/bash")
                .arg("-c")
                .arg(&cmd)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::piped())
                .stderr(std::process::Stdio::piped())
                .spawn()
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

            let stdout_pipe = child.stdout.take().expect("stdout piped");
            let stderr_pipe = child.stderr.take().expect("stderr piped");
            let (stdout_bytes, stderr_bytes) = tokio::join!(
                Self::read_all(stdout_pipe),
                Self::read_all(stderr_pipe),
            );
            let stdout = stdout_bytes.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
            let stderr = stderr_bytes.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

            let status = child
                .wait()
                .await
                .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;

            let mut output = String::from_utf8_lossy(&stdout).to_string();
            if !stderr.is_empty() {
                output.push_str(&String::from_utf8_lossy(&stderr));
            }

            if status.success() {
                Ok(output)
            } else {
                Err(ToolError::ExecutionFailed(format!(
                    "exit code {:?}: {}",
                    status.code(),
                    output
                )))
            }
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::TimedOut),
        }
    }
}

/// The HITL tool: never dispatched through `execute` by the orchestrator (TOOL_CALLS
/// step 1 recognizes it by name and rewrites it into a `client.humanIntervention`
/// sentinel unconditionally). `execute` exists only to satisfy the trait and returns an
/// error if ever reached, guarding against a future regression that forgets the name
/// check.
pub struct HumanInterventionTool;

#[async_trait]
impl Tool for HumanInterventionTool {
    fn name(&self) -> &str {
        HUMAN_INTERVENTION_TOOL_NAME
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: "Ask a human to make a decision or supply information.".to_string(),
            parameters: vec![
                ToolParameter {
                    name: "prompt".to_string(),
                    param_type: ToolParameterType::String,
                    description: "What to ask the human.".to_string(),
                    required: true,
                },
                ToolParameter {
                    name: "options".to_string(),
                    param_type: ToolParameterType::Array,
                    description: "The choices offered to the human.".to_string(),
                    required: true,
                },
            ],
        }
    }

    async fn execute(&self, _args: serde_json::Value, _ctx: &ToolExecutionContext) -> ToolOutcome {
        Err(ToolError::ExecutionFailed(
            "human_intervention.request must be intercepted before execute()".to_string(),
        ))
    }
}
