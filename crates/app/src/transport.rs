//! Line-delimited JSON transport between callers and the agent.
//!
//! Each line a caller writes is an [`Envelope`]. Requests on one
//! connection are handled concurrently, since a request can sit waiting on
//! the user for minutes; every answer is written back as a [`Response`]
//! line carrying the envelope's `id`. A request the agent stays silent on
//! (denied or expired prompt) is answered with `"reply": null`.
//!
//! Callers are not authenticated. The `origin` a connection claims first is
//! the identity it speaks for until it disconnects.

use std::net::SocketAddr;
use std::sync::Arc;

use common::agent::ledger::LedgerClient;
use common::agent::{Message, Reply, TrustedAgent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One request from a caller
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Echoed back so callers can match answers to requests
    #[serde(default)]
    pub id: Value,
    /// The caller's identity (page origin)
    pub origin: String,
    pub message: Value,
}

/// The agent's answer to one [`Envelope`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: Value,
    pub reply: Option<Reply>,
}

/// Message in the error reply to an envelope whose origin differs from the
/// one its connection is bound to
pub const ORIGIN_MISMATCH: &str = "origin does not match connection";

/// The origin a connection speaks for. The first well-formed envelope binds
/// it; later envelopes must repeat it.
#[derive(Debug, Default)]
pub struct ConnectionOrigin(Option<String>);

impl ConnectionOrigin {
    pub fn get(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Parse `line` and check it against the bound origin. On failure the
    /// returned [`Response`] is the answer to write back.
    pub fn admit(&mut self, line: &str) -> Result<Envelope, Response> {
        let envelope: Envelope = serde_json::from_str(line).map_err(|e| {
            tracing::warn!(error = %e, "malformed envelope");
            Response {
                id: Value::Null,
                reply: Some(Reply::error(format!("malformed envelope: {}", e))),
            }
        })?;

        match &self.0 {
            None => self.0 = Some(envelope.origin.clone()),
            Some(bound) if *bound != envelope.origin => {
                tracing::warn!(bound = %bound, origin = %envelope.origin, "origin changed on connection");
                return Err(Response {
                    id: envelope.id,
                    reply: Some(Reply::error(ORIGIN_MISMATCH)),
                });
            }
            Some(_) => {}
        }
        Ok(envelope)
    }
}

/// Run an admitted envelope through the agent.
pub async fn handle_envelope<L: LedgerClient>(agent: &TrustedAgent<L>, envelope: Envelope) -> Response {
    let reply = match serde_json::from_value::<Message>(envelope.message) {
        Ok(message) => agent.handle(&envelope.origin, message).await,
        Err(e) => {
            tracing::warn!(origin = %envelope.origin, error = %e, "malformed message");
            Some(Reply::error(format!("malformed message: {}", e)))
        }
    };

    Response {
        id: envelope.id,
        reply,
    }
}

async fn write_response<W>(writer: &Mutex<W>, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(response)?;
    line.push(b'\n');

    let mut writer = writer.lock().await;
    writer.write_all(&line).await?;
    writer.flush().await
}

async fn handle_connection<L: LedgerClient>(
    stream: TcpStream,
    peer: SocketAddr,
    agent: Arc<TrustedAgent<L>>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let (reader, writer) = stream.into_split();
    let writer = Arc::new(Mutex::new(writer));
    let mut lines = BufReader::new(reader).lines();
    let mut origin = ConnectionOrigin::default();

    loop {
        let line = tokio::select! {
            _ = shutdown_rx.changed() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let admitted = origin.admit(&line);
        let agent = agent.clone();
        let writer = writer.clone();
        tokio::spawn(async move {
            let response = match admitted {
                Ok(envelope) => handle_envelope(&agent, envelope).await,
                Err(response) => response,
            };
            if let Err(e) = write_response(&writer, &response).await {
                tracing::debug!(%peer, error = %e, "caller went away before its reply");
            }
        });
    }

    tracing::debug!(%peer, origin = ?origin.get(), "connection closed");
}

/// Accept callers on `listener` until shutdown is signalled.
pub async fn run<L: LedgerClient>(
    listener: TcpListener,
    agent: Arc<TrustedAgent<L>>,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), TransportError> {
    tracing::info!(addr = %listener.local_addr()?, "transport listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown_rx.changed() => break,
            accepted = listener.accept() => accepted?,
        };

        tracing::debug!(%peer, "caller connected");
        tokio::spawn(handle_connection(
            stream,
            peer,
            agent.clone(),
            shutdown_rx.clone(),
        ));
    }

    tracing::info!("transport shut down");
    Ok(())
}
