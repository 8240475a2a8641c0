//! Newline-delimited JSON over stdio. Each input line is either an activity event or a request:
//!
//! ```text
//! {"channel":"event","event":{"kind":"tabActivated","tab":{"id":1,"url":"https://a.com"}}}
//! {"channel":"request","id":7,"type":"GET_SUMMARY","payload":{"period":"week"}}
//! ```
//!
//! Responses carry the request id back, broadcasts are written as they happen.

use anyhow::Result;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    select,
    sync::{
        broadcast::{self, error::RecvError},
        mpsc, oneshot,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    protocol::{Envelope, Response},
    tracker::{bus::Outbound, events::ActivityEvent, service::TrackerInput},
};

#[derive(Debug)]
enum HostInput {
    Event(ActivityEvent),
    Request { id: u64, envelope: Envelope },
}

/// A line that couldn't be understood. `id` is set when the line was recognizably a request.
#[derive(Debug)]
struct LineError {
    id: Option<u64>,
    message: String,
}

fn parse_line(line: &str) -> Result<HostInput, LineError> {
    let value: Value = serde_json::from_str(line).map_err(|e| LineError {
        id: None,
        message: format!("Malformed JSON: {e}"),
    })?;
    let id = value.get("id").and_then(Value::as_u64);

    match value.get("channel").and_then(Value::as_str) {
        Some("event") => {
            let event = value.get("event").cloned().unwrap_or(Value::Null);
            serde_json::from_value(event)
                .map(HostInput::Event)
                .map_err(|e| LineError {
                    id,
                    message: format!("Invalid event: {e}"),
                })
        }
        Some("request") => {
            let id = id.ok_or_else(|| LineError {
                id: None,
                message: "Request without an id".into(),
            })?;
            let envelope = serde_json::from_value(value).map_err(|e| LineError {
                id: Some(id),
                message: format!("Invalid request: {e}"),
            })?;
            Ok(HostInput::Request { id, envelope })
        }
        other => Err(LineError {
            id,
            message: format!("Unknown channel {other:?}"),
        }),
    }
}

fn with_channel(mut value: Value, channel: &str, id: Option<u64>) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert("channel".into(), json!(channel));
        if let Some(id) = id {
            map.insert("id".into(), json!(id));
        }
    }
    value
}

fn response_line(id: u64, response: &Response) -> Result<String, serde_json::Error> {
    let value = with_channel(serde_json::to_value(response)?, "response", Some(id));
    serde_json::to_string(&value)
}

fn broadcast_line(message: &Outbound) -> Result<String, serde_json::Error> {
    let value = with_channel(serde_json::to_value(message)?, "broadcast", None);
    serde_json::to_string(&value)
}

/// Reads input lines until EOF or shutdown. Requests are forwarded one at a time and their
/// responses queued on `lines`. `shutdown` is cancelled whenever reading stops, since without
/// input the host has nothing left to do.
pub async fn read_input<R: AsyncBufRead + Unpin>(
    mut reader: R,
    inputs: mpsc::Sender<TrackerInput>,
    lines: mpsc::Sender<String>,
    shutdown: CancellationToken,
) -> Result<()> {
    let _stop_host = shutdown.clone().drop_guard();
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        let read = select! {
            _ = shutdown.cancelled() => break,
            read = reader.read_until(b'\n', &mut buffer) => read?,
        };
        if read == 0 {
            info!("Input closed, shutting down");
            break;
        }
        let line = match std::str::from_utf8(&buffer) {
            Ok(line) => line.trim(),
            Err(e) => {
                warn!("Skipping input line that isn't UTF-8: {e}");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            Ok(HostInput::Event(event)) => {
                debug!("Received {event:?}");
                if inputs.send(TrackerInput::Activity(event)).await.is_err() {
                    break;
                }
            }
            Ok(HostInput::Request { id, envelope }) => {
                let (reply, response) = oneshot::channel();
                if inputs
                    .send(TrackerInput::Request { envelope, reply })
                    .await
                    .is_err()
                {
                    break;
                }
                let Ok(response) = response.await else {
                    break;
                };
                if lines.send(response_line(id, &response)?).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Skipping input line: {}", e.message);
                if let Some(id) = e.id {
                    let line = response_line(id, &Response::error(e.message))?;
                    if lines.send(line).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Writes responses and broadcasts until both sources are closed.
pub async fn write_output<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut lines: mpsc::Receiver<String>,
    mut broadcasts: broadcast::Receiver<Outbound>,
) -> Result<()> {
    let mut lines_open = true;
    let mut broadcasts_open = true;

    while lines_open || broadcasts_open {
        let line = select! {
            biased;
            line = lines.recv(), if lines_open => match line {
                Some(line) => line,
                None => {
                    lines_open = false;
                    continue;
                }
            },
            message = broadcasts.recv(), if broadcasts_open => match message {
                Ok(message) => broadcast_line(&message)?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Dropped {skipped} broadcasts, output is too slow");
                    continue;
                }
                Err(RecvError::Closed) => {
                    broadcasts_open = false;
                    continue;
                }
            },
        };
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}
