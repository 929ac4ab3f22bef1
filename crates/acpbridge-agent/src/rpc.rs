//! Newline-delimited JSON-RPC 2.0 connection to the ACP client.
//!
//! Inbound requests are dispatched to an [`Agent`], each on its own task so
//! a long prompt never blocks `session/cancel`. Outbound requests made
//! through the [`Client`] impl are matched to responses by id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::acp::{
    AcpError, Agent, Client, CreateTerminalRequest, CreateTerminalResponse, ReadTextFileRequest,
    ReadTextFileResponse, RequestPermissionRequest, RequestPermissionResponse, SessionNotification,
    TerminalExitStatus, TerminalOutputResponse, TerminalRequest, WriteTextFileRequest,
};

/// Longest inbound line accepted from the client.
pub const MAX_MESSAGE_BYTES: usize = 50 * 1024 * 1024;

type PendingReply = oneshot::Sender<Result<Value, AcpError>>;

/// One JSON-RPC peer over a pair of byte streams.
pub struct Connection {
    outgoing: mpsc::Sender<String>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingReply>>,
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, AcpError> {
    serde_json::from_value(params).map_err(|e| AcpError::invalid_params(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Value, AcpError> {
    serde_json::to_value(value).map_err(|e| AcpError::internal_error(e.to_string()))
}

/// Route one inbound method to the agent.
async fn dispatch(agent: &dyn Agent, method: &str, params: Value) -> Result<Value, AcpError> {
    match method {
        "initialize" => encode(&agent.initialize(parse_params(params)?).await?),
        "authenticate" => Ok(json!({})),
        "session/new" => encode(&agent.new_session(parse_params(params)?).await?),
        "session/prompt" => encode(&agent.prompt(parse_params(params)?).await?),
        "session/set_mode" => encode(&agent.set_session_mode(parse_params(params)?).await?),
        "session/cancel" => {
            agent.cancel(parse_params(params)?).await?;
            Ok(Value::Null)
        }
        other => Err(AcpError::method_not_found(other)),
    }
}

impl Connection {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn new<W>(writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, mut rx) = mpsc::channel::<String>(256);
        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = rx.recv().await {
                let written = async {
                    writer.write_all(line.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await
                };
                if let Err(e) = written.await {
                    error!(error = %e, "Failed to write to client");
                    break;
                }
            }
            debug!("client writer finished");
        });
        Arc::new(Self {
            outgoing,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        })
    }

    async fn write(&self, message: &Value) -> Result<(), AcpError> {
        self.outgoing
            .send(message.to_string())
            .await
            .map_err(|_| AcpError::internal_error("Client connection closed"))
    }

    pub async fn notify<P: Serialize + Sync>(&self, method: &str, params: &P) -> Result<(), AcpError> {
        self.write(&json!({"jsonrpc": "2.0", "method": method, "params": encode(params)?}))
            .await
    }

    /// Send a request and wait for the client's answer.
    pub async fn request<P, R>(&self, method: &str, params: &P) -> Result<R, AcpError>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);

        let message = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": encode(params)?});
        if let Err(e) = self.write(&message).await {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
            return Err(e);
        }

        let result = rx
            .await
            .map_err(|_| AcpError::internal_error("Client connection closed"))??;
        serde_json::from_value(result)
            .map_err(|e| AcpError::internal_error(format!("Invalid {method} response: {e}")))
    }

    fn complete(&self, message: &Value) {
        let Some(id) = message.get("id").and_then(Value::as_u64) else {
            warn!("Response with a non-numeric id");
            return;
        };
        let Some(tx) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
        else {
            warn!(id, "Response for unknown request");
            return;
        };
        let outcome = match message.get("error") {
            Some(error) => Err(serde_json::from_value(error.clone())
                .unwrap_or_else(|_| AcpError::internal_error(error.to_string()))),
            None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = tx.send(outcome);
    }

    async fn respond(&self, id: Value, outcome: Result<Value, AcpError>) {
        let message = match outcome {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err(error) => json!({"jsonrpc": "2.0", "id": id, "error": error}),
        };
        if let Err(e) = self.write(&message).await {
            warn!(error = %e, "Failed to send response");
        }
    }

    /// Read messages from `reader` until it closes.
    ///
    /// Requests still waiting on the client fail once the input ends.
    pub async fn serve<R>(self: &Arc<Self>, reader: R, agent: Arc<dyn Agent>) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut frames = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_MESSAGE_BYTES));
        let result = loop {
            let line = match frames.next().await {
                None => break Ok(()),
                Some(Ok(line)) => line,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(max = MAX_MESSAGE_BYTES, "Dropping oversized client message");
                    continue;
                }
                Some(Err(LinesCodecError::Io(e))) => break Err(e),
            };
            if line.trim().is_empty() {
                continue;
            }
            let message: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "Unparsable client message");
                    continue;
                }
            };
            self.handle_incoming(message, &agent);
        };

        info!("Client input closed");
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        result
    }

    fn handle_incoming(self: &Arc<Self>, mut message: Value, agent: &Arc<dyn Agent>) {
        let Some(method) = message.get("method").and_then(Value::as_str).map(str::to_string) else {
            if message.get("result").is_some() || message.get("error").is_some() {
                self.complete(&message);
            } else {
                warn!("Client message is neither a request nor a response");
            }
            return;
        };
        let params = message.get_mut("params").map_or(Value::Null, Value::take);
        let id = message.get("id").cloned();

        let conn = Arc::clone(self);
        let agent = Arc::clone(agent);
        tokio::spawn(async move {
            debug!(method = %method, "Client request");
            let outcome = dispatch(agent.as_ref(), &method, params).await;
            match id {
                Some(id) => conn.respond(id, outcome).await,
                None => {
                    if let Err(e) = outcome {
                        warn!(method = %method, error = %e, "Notification failed");
                    }
                }
            }
        });
    }
}

#[async_trait]
impl Client for Connection {
    async fn session_update(&self, notification: SessionNotification) -> Result<(), AcpError> {
        self.notify("session/update", &notification).await
    }

    async fn request_permission(
        &self,
        request: RequestPermissionRequest,
    ) -> Result<RequestPermissionResponse, AcpError> {
        self.request("session/request_permission", &request).await
    }

    async fn read_text_file(&self, request: ReadTextFileRequest) -> Result<ReadTextFileResponse, AcpError> {
        self.request("fs/read_text_file", &request).await
    }

    async fn write_text_file(&self, request: WriteTextFileRequest) -> Result<(), AcpError> {
        self.request::<_, Value>("fs/write_text_file", &request).await.map(|_| ())
    }

    async fn create_terminal(
        &self,
        request: CreateTerminalRequest,
    ) -> Result<CreateTerminalResponse, AcpError> {
        self.request("terminal/create", &request).await
    }

    async fn terminal_output(&self, request: TerminalRequest) -> Result<TerminalOutputResponse, AcpError> {
        self.request("terminal/output", &request).await
    }

    async fn wait_for_terminal_exit(&self, request: TerminalRequest) -> Result<TerminalExitStatus, AcpError> {
        self.request("terminal/wait_for_exit", &request).await
    }

    async fn kill_terminal(&self, request: TerminalRequest) -> Result<(), AcpError> {
        self.request::<_, Value>("terminal/kill", &request).await.map(|_| ())
    }

    async fn release_terminal(&self, request: TerminalRequest) -> Result<(), AcpError> {
        self.request::<_, Value>("terminal/release", &request).await.map(|_| ())
    }
}
