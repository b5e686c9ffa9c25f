// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! NDJSON TCP server.
//!
//! One line per message in both directions. A connection that sends
//! `observation:attach {observer}` becomes that observer's delivery channel:
//! deliveries are pushed to it as `observation:event` lines, interleaved
//! with request responses. Closing the connection detaches the observer.

use crate::domain::actor::ActorId;
use crate::infrastructure::delivery::{ChannelTransport, EventDelivery};
use crate::presentation::api::{RouterApi, RouterRequest, RouterResponse};
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

const MAX_LINE_LENGTH: usize = 1 << 20;
const ATTACH_CHANNEL_CAPACITY: usize = 256;

pub struct RouterServer {
    api: Arc<RouterApi>,
    transport: Arc<ChannelTransport>,
}

impl RouterServer {
    pub fn new(api: Arc<RouterApi>, transport: Arc<ChannelTransport>) -> Self {
        Self { api, transport }
    }

    /// Accepts connections until ctrl-c / SIGTERM.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr().context("listener has no local address")?;
        info!("router listening on {local}");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted.context("accept failed")?;
                    debug!(%peer, "connection opened");
                    let api = self.api.clone();
                    let transport = self.transport.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(api, transport, stream).await {
                            debug!(%peer, error = %err, "connection closed with error");
                        }
                        debug!(%peer, "connection closed");
                    });
                }
                _ = shutdown_signal() => {
                    info!("shutdown signal received, stopping router");
                    return Ok(());
                }
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[derive(Debug, Deserialize)]
struct AttachParams {
    observer: ActorId,
}

async fn handle_connection(
    api: Arc<RouterApi>,
    transport: Arc<ChannelTransport>,
    stream: TcpStream,
) -> Result<()> {
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let (mut sink, mut lines) = framed.split();

    // All outbound lines (responses and pushed deliveries) funnel through
    // one writer so they never interleave mid-line.
    let (out_tx, mut out_rx) = mpsc::channel::<String>(ATTACH_CHANNEL_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(line) = out_rx.recv().await {
            if sink.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut attached: Option<ActorId> = None;

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "line decode failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RouterRequest>(&line) {
            Ok(request) if request.event == "observation:attach" => {
                match serde_json::from_value::<AttachParams>(request.data) {
                    Ok(params) => {
                        let receiver =
                            transport.attach(params.observer.clone(), ATTACH_CHANNEL_CAPACITY);
                        spawn_delivery_forwarder(receiver, out_tx.clone());
                        attached = Some(params.observer.clone());
                        RouterResponse::success(json!({ "observer": params.observer }))
                    }
                    Err(err) => RouterResponse::error(format!("invalid request data: {err}")),
                }
            }
            Ok(request) => api.handle(request).await,
            Err(err) => RouterResponse::error(format!("invalid request: {err}")),
        };

        let encoded = serde_json::to_string(&response).context("response serialization")?;
        if out_tx.send(encoded).await.is_err() {
            break;
        }
    }

    if let Some(observer) = attached {
        transport.detach(&observer);
    }
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

/// Forwards queued deliveries to the connection as `observation:event`
/// lines. Ends when either side closes.
fn spawn_delivery_forwarder(
    mut receiver: mpsc::Receiver<EventDelivery>,
    out_tx: mpsc::Sender<String>,
) {
    tokio::spawn(async move {
        while let Some(delivery) = receiver.recv().await {
            let line = json!({
                "event": "observation:event",
                "data": delivery,
            });
            if out_tx.send(line.to_string()).await.is_err() {
                break;
            }
        }
    });
}
