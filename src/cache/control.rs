//! Control Channel
//!
//! Management commands sent by the embedding application, as JSON objects
//! tagged by `type`:
//!
//! ```text
//! {"type":"SKIP_WAITING"}                      -> {"type":"ACTIVATED"}
//! {"type":"CLEAR_CACHE","cacheName":"api"}     -> {"type":"CLEARED","tiers":["api"]}
//! {"type":"UPDATE_CACHE","urls":["/a.js"]}     -> {"type":"UPDATED","stored":1,"failed":[]}
//! {"type":"GET_CACHE_STATUS"}                  -> {"type":"STATUS","tiers":{...}}
//! ```
//!
//! Messages of unknown type are ignored. A recognized type with a malformed
//! payload is an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::store::TierStatus;
use crate::domain::ports::InterceptionLayer;
use crate::error::{Error, Result};

/// Default depth of the control queue
pub const DEFAULT_CONTROL_QUEUE: usize = 64;

const COMMAND_TYPES: [&str; 4] = [
    "SKIP_WAITING",
    "CLEAR_CACHE",
    "UPDATE_CACHE",
    "GET_CACHE_STATUS",
];

/// A management command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlCommand {
    /// Force a waiting version to activate
    SkipWaiting,
    /// Delete one tier, or all tiers when no name is given
    ClearCache {
        #[serde(rename = "cacheName", default, skip_serializing_if = "Option::is_none")]
        cache_name: Option<String>,
    },
    /// Fetch and store each URL into the static tier
    UpdateCache { urls: Vec<String> },
    /// Report entry counts and URLs per tier
    GetCacheStatus,
}

impl ControlCommand {
    /// Parse a raw message.
    ///
    /// Returns `Ok(None)` for messages without a recognized string `type`.
    pub fn parse(message: Value) -> Result<Option<Self>> {
        let Some(kind) = message.get("type").and_then(Value::as_str) else {
            return Ok(None);
        };
        if !COMMAND_TYPES.contains(&kind) {
            debug!("Ignoring control message of type {}", kind);
            return Ok(None);
        }
        let kind = kind.to_string();
        serde_json::from_value(message)
            .map(Some)
            .map_err(|e| Error::MalformedCommand {
                command: kind,
                reason: e.to_string(),
            })
    }

    /// Parse a raw JSON text; invalid JSON is ignored like an unknown type
    pub fn parse_str(text: &str) -> Result<Option<Self>> {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => Self::parse(value),
            Err(e) => {
                debug!("Ignoring non-JSON control message: {}", e);
                Ok(None)
            }
        }
    }

    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            ControlCommand::SkipWaiting => "SKIP_WAITING",
            ControlCommand::ClearCache { .. } => "CLEAR_CACHE",
            ControlCommand::UpdateCache { .. } => "UPDATE_CACHE",
            ControlCommand::GetCacheStatus => "GET_CACHE_STATUS",
        }
    }
}

/// Reply to a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlReply {
    Activated,
    Cleared {
        tiers: Vec<String>,
    },
    Updated {
        stored: usize,
        failed: Vec<String>,
    },
    Status {
        tiers: BTreeMap<String, TierStatus>,
    },
}

// =============================================================================
// Channel
// =============================================================================

/// A queued command with an optional reply port
#[derive(Debug)]
pub struct ControlMessage {
    pub id: Uuid,
    pub command: ControlCommand,
    pub reply: Option<oneshot::Sender<Result<ControlReply>>>,
}

/// Cloneable handle for submitting commands
#[derive(Clone)]
pub struct ControlSender {
    tx: mpsc::Sender<ControlMessage>,
}

impl ControlSender {
    /// Queue a command without waiting for its reply
    pub async fn send(&self, command: ControlCommand) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.tx
            .send(ControlMessage {
                id,
                command,
                reply: None,
            })
            .await
            .map_err(|_| Error::Internal("control channel closed".to_string()))?;
        Ok(id)
    }

    /// Queue a command and wait for its reply
    pub async fn request(&self, command: ControlCommand) -> Result<ControlReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ControlMessage {
                id: Uuid::new_v4(),
                command,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| Error::Internal("control channel closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| Error::Internal("control reply dropped".to_string()))?
    }
}

/// Task loop that executes commands against a layer, one at a time
pub struct ControlChannel {
    layer: Arc<dyn InterceptionLayer>,
    tx: mpsc::Sender<ControlMessage>,
    rx: Mutex<mpsc::Receiver<ControlMessage>>,
    cancel: CancellationToken,
}

impl ControlChannel {
    pub fn new(layer: Arc<dyn InterceptionLayer>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            layer,
            tx,
            rx: Mutex::new(rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Handle for submitting commands
    pub fn sender(&self) -> ControlSender {
        ControlSender {
            tx: self.tx.clone(),
        }
    }

    /// Token that stops [`ControlChannel::run`]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Process commands until cancelled
    pub async fn run(self: Arc<Self>) {
        info!("Starting control channel");
        let mut rx = self.rx.lock().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Control channel shutting down");
                    break;
                }

                message = rx.recv() => {
                    match message {
                        Some(message) => self.dispatch(message).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn dispatch(&self, message: ControlMessage) {
        let ControlMessage { id, command, reply } = message;
        debug!("Control command {} ({})", command.name(), id);

        let result = self.layer.handle_control(command).await;
        match reply {
            Some(port) => {
                if port.send(result).is_err() {
                    debug!("Control reply for {} had no receiver", id);
                }
            }
            None => {
                if let Err(e) = result {
                    warn!("Control command {} failed: {}", id, e);
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
