// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! NDJSON client for the daemon's wire protocol.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

pub struct RouterClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl RouterClient {
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("failed to connect to daemon at {host}:{port}"))?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
        })
    }

    /// Sends one `{event, data}` request and returns the response's `data`.
    /// An error-status response becomes an `Err` carrying the daemon's
    /// message.
    pub async fn request(&mut self, event: &str, data: Value) -> Result<Value> {
        self.send(event, data).await?;
        let response = self
            .next_message()
            .await?
            .context("connection closed before response")?;
        let status = response["status"].as_str().unwrap_or("error");
        if status != "success" {
            let message = response["error"].as_str().unwrap_or("unknown error");
            bail!("daemon error: {message}");
        }
        Ok(response.get("data").cloned().unwrap_or(Value::Null))
    }

    pub async fn send(&mut self, event: &str, data: Value) -> Result<()> {
        let line = serde_json::to_string(&json!({ "event": event, "data": data }))?;
        self.send_raw(&line).await
    }

    /// Writes one already-encoded request line.
    pub async fn send_raw(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    /// Next line from the daemon: a response or a pushed delivery.
    pub async fn next_message(&mut self) -> Result<Option<Value>> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self.reader.read_line(&mut line).await?;
            if read == 0 {
                return Ok(None);
            }
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(
                serde_json::from_str(&line).context("malformed line from daemon")?,
            ));
        }
    }
}
