//! Python interpreter tool: run a code snippet in a fresh interpreter process.
//!
//! The code is piped to the interpreter's stdin, so nothing touches the
//! filesystem. Feeding the code and collecting output happen together under
//! one timeout, and the child is killed when it expires.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use deepreact_config::PythonToolConfig;
use deepreact_core::error::ToolError;
use deepreact_core::tool::{Tool, ToolOutput};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const NAME: &str = "PythonInterpreter";

pub struct PythonInterpreterTool {
    interpreter: String,
    timeout: Duration,
}

impl PythonInterpreterTool {
    pub fn new(config: &PythonToolConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    fn render(stdout: &str, stderr: &str) -> String {
        let stdout = stdout.trim_end();
        let stderr = stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => "Finished execution.".into(),
            (false, true) => format!("stdout:\n{stdout}"),
            (true, false) => format!("stderr:\n{stderr}"),
            (false, false) => format!("stdout:\n{stdout}\n\nstderr:\n{stderr}"),
        }
    }
}

#[async_trait]
impl Tool for PythonInterpreterTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Executes Python code in a sandboxed environment. The 'arguments' JSON object must be empty: {}. \
         Place the code immediately after the JSON block, enclosed within <code> and </code> tags. \
         Any output you want to see MUST be printed to standard output using print()."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let code = arguments["code"]
            .as_str()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ToolError::InvalidArguments("[Python Interpreter Error]: empty code. Wrap the code in <code></code> tags.".into())
            })?;

        debug!(interpreter = %self.interpreter, bytes = code.len(), "Running code");

        let mut child = Command::new(&self.interpreter)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: NAME.into(),
                reason: format!("could not start '{}': {e}", self.interpreter),
            })?;

        // Stdout is drained while the code is still being written, so a
        // chatty script cannot wedge both pipes.
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match stdin.write_all(code.as_bytes()).await {
                // The interpreter may exit before reading everything.
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
            // Dropping stdin closes the pipe so the interpreter sees EOF.
        };
        let run = async { tokio::join!(feed, child.wait_with_output()) };

        let (fed, output) = match tokio::time::timeout(self.timeout, run).await {
            Ok(pair) => pair,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Code execution timed out");
                return Ok(ToolOutput::error(format!(
                    "[Python Interpreter Error]: execution timed out after {:?}",
                    self.timeout
                )));
            }
        };
        fed.map_err(|e| ToolError::ExecutionFailed {
            tool_name: NAME.into(),
            reason: format!("could not send code: {e}"),
        })?;
        let output = output.map_err(|e| ToolError::ExecutionFailed {
            tool_name: NAME.into(),
            reason: e.to_string(),
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let rendered = Self::render(&stdout, &stderr);

        if output.status.success() {
            Ok(ToolOutput::ok(rendered))
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(exit_code = code, "Code exited with failure");
            Ok(ToolOutput::error(format!("[exit code: {code}]\n{rendered}")))
        }
    }
}
