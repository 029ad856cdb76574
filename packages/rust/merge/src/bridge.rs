//! Subprocess reasoning collaborator.
//!
//! Spawns the configured command once per request and speaks a JSON-lines
//! protocol over stdin/stdout:
//!
//! ```text
//! bridge -> {"type":"ready"}
//! us     -> {"type":"resolve","id":"req-1","model":"...","request":{...}}
//! bridge -> {"type":"result","id":"req-1","result":{...}}
//!         | {"type":"error","id":"req-1","error":"..."}
//! us     -> {"type":"shutdown"}
//! ```
//!
//! The child is killed on drop, so a caller-side timeout never leaks a
//! process.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdout, Command};
use tracing::{debug, instrument};

use skillsmith_shared::BridgeConfig;

use crate::assisted::{
    CollaboratorError, ReasoningCollaborator, ResolutionRequest, ResolutionResponse,
};

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Resolve {
        id: String,
        model: &'a str,
        request: &'a ResolutionRequest,
    },
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result {
        id: String,
        result: ResolutionResponse,
    },
    Error {
        #[allow(dead_code)]
        id: String,
        error: String,
    },
}

pub struct BridgeCollaborator {
    config: BridgeConfig,
    request_counter: AtomicU64,
}

impl BridgeCollaborator {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            request_counter: AtomicU64::new(0),
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            // Bridge logs go to our stderr.
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

async fn read_message(
    lines: &mut Lines<BufReader<ChildStdout>>,
) -> Result<ResponseMessage, CollaboratorError> {
    let line = lines
        .next_line()
        .await
        .map_err(|e| CollaboratorError::Transient(format!("bridge read error: {e}")))?
        .ok_or_else(|| CollaboratorError::Transient("bridge closed stdout unexpectedly".into()))?;

    serde_json::from_str(line.trim()).map_err(|e| {
        CollaboratorError::Malformed(format!(
            "{e} (got: {})",
            &line[..line.len().min(200)]
        ))
    })
}

#[async_trait]
impl ReasoningCollaborator for BridgeCollaborator {
    #[instrument(skip_all, fields(identifier = %request.identifier, cmd = %self.config.command))]
    async fn resolve(
        &self,
        request: &ResolutionRequest,
    ) -> Result<ResolutionResponse, CollaboratorError> {
        if !self.config.is_configured() {
            return Err(CollaboratorError::Unavailable("no bridge command configured".into()));
        }

        let mut child = self.command().spawn().map_err(|e| {
            CollaboratorError::Unavailable(format!(
                "failed to spawn bridge: {e}. Is `{}` installed?",
                self.config.command
            ))
        })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CollaboratorError::Unavailable("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CollaboratorError::Unavailable("failed to capture bridge stdout".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        match read_message(&mut lines).await? {
            ResponseMessage::Ready => debug!("bridge is ready"),
            other => {
                return Err(CollaboratorError::Malformed(format!(
                    "expected ready message, got {other:?}"
                )));
            }
        }

        let id = format!(
            "req-{}",
            self.request_counter.fetch_add(1, Ordering::Relaxed) + 1
        );
        let message = RequestMessage::Resolve {
            id: id.clone(),
            model: &self.config.model,
            request,
        };
        let json = serde_json::to_string(&message)
            .map_err(|e| CollaboratorError::Malformed(format!("failed to serialize request: {e}")))?;
        stdin
            .write_all(format!("{json}\n").as_bytes())
            .await
            .map_err(|e| CollaboratorError::Transient(format!("failed to write to bridge: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| CollaboratorError::Transient(format!("failed to flush bridge stdin: {e}")))?;

        let outcome = match read_message(&mut lines).await? {
            ResponseMessage::Result {
                id: resp_id,
                result,
            } if resp_id == id => Ok(result),
            ResponseMessage::Result { id: resp_id, .. } => Err(CollaboratorError::Malformed(
                format!("response id {resp_id} does not match {id}"),
            )),
            ResponseMessage::Error { error, .. } => Err(CollaboratorError::Transient(error)),
            ResponseMessage::Ready => Err(CollaboratorError::Malformed(
                "unexpected ready message".into(),
            )),
        };

        // Best effort: the child is killed on drop anyway.
        if let Ok(shutdown) = serde_json::to_string(&RequestMessage::Shutdown) {
            let _ = stdin.write_all(format!("{shutdown}\n").as_bytes()).await;
        }
        drop(stdin);
        let _ = child.wait().await;

        outcome
    }
}
