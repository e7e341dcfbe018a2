//! Agent CLI invocation and output cleanup.

use crate::config::BackendConfig;
use crate::error::{Result, SpeechError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Diagnostic line markers the agent CLI prints alongside its answer.
const NOISE_MARKERS: &[&str] = &[
    "[plugins]",
    "[DEP0040]",
    "Doctor warnings",
    "State dir migration",
    "DeprecationWarning",
];

/// Box-drawing prefixes of the CLI's warning panels.
const PANEL_PREFIXES: &[char] = &['│', '├', '─', '┌', '└', '╭', '╰'];

/// Runs an agent for one message and returns its cleaned answer.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// # Errors
    ///
    /// Returns [`SpeechError::Backend`] when the agent cannot be run, exits
    /// with failure, times out, or produces no usable text.
    async fn ask(&self, agent: &str, message: &str) -> Result<String>;
}

/// Spawns `<command> agent --agent <agent> --message <message>`.
pub struct CommandAgentRunner {
    command: String,
    timeout: Duration,
}

impl CommandAgentRunner {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            command: config.agent_command.clone(),
            timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }
}

#[async_trait]
impl AgentRunner for CommandAgentRunner {
    async fn ask(&self, agent: &str, message: &str) -> Result<String> {
        let agent_timeout = self
            .timeout
            .saturating_sub(Duration::from_secs(5))
            .max(Duration::from_secs(1));
        let mut cmd = Command::new(&self.command);
        cmd.arg("agent")
            .arg("--agent")
            .arg(agent)
            .arg("--message")
            .arg(message)
            .arg("--timeout")
            .arg(agent_timeout.as_secs().to_string())
            .env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!(command = %self.command, agent, "running agent");
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                SpeechError::Backend(format!(
                    "agent timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SpeechError::Backend(format!("agent command '{}' not found", self.command))
                }
                _ => SpeechError::Backend(format!("failed to run '{}': {e}", self.command)),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            warn!(status = %output.status, "agent exited with failure");
            return Err(SpeechError::Backend(format!(
                "agent exited with {}: {}",
                output.status,
                clean_agent_output(&stderr)
            )));
        }

        let answer = pick_answer(&stdout, &stderr);
        if answer.is_empty() {
            return Err(SpeechError::Backend("agent produced no output".into()));
        }
        Ok(answer)
    }
}

/// Cleaned stdout, or cleaned stderr when stdout has nothing left.
pub fn pick_answer(stdout: &str, stderr: &str) -> String {
    let out = clean_agent_output(stdout);
    if out.is_empty() {
        clean_agent_output(stderr)
    } else {
        out
    }
}

/// Strip ANSI escapes and CLI diagnostic lines.
pub fn clean_agent_output(raw: &str) -> String {
    let plain = strip_ansi(raw);
    plain
        .lines()
        .map(str::trim_end)
        .filter(|line| !is_noise(line))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_owned()
}

fn is_noise(line: &str) -> bool {
    let trimmed = line.trim_start();
    NOISE_MARKERS.iter().any(|m| trimmed.contains(m))
        || trimmed.starts_with(PANEL_PREFIXES)
}

/// Remove CSI (`ESC [ ... final`) and OSC (`ESC ] ... BEL`) sequences.
fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\u{1b}' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\u{7}' {
                        break;
                    }
                    if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {
                chars.next();
            }
        }
    }
    out
}
