//! Transport listener for the server push channel
//!
//! An explicit async task: it opens `/events`, parses the event stream,
//! and forwards typed events to the session loop over a channel. It
//! performs no routing or state side effects, and it does not reconnect;
//! a dropped stream is reported as [`TransportEvent::Closed`] and the
//! task ends.

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use fovea_common::events::{self, ServerEvent, StateUpdatePayload};
use fovea_common::{Error, Result};

/// Connection parameters for the event stream
#[derive(Debug, Clone)]
pub struct ListenOptions {
    /// Backend base URL
    pub base_url: String,
    /// Per-tab token distinguishing the origin of state changes
    pub subscription: Uuid,
    /// Dataset to initialize the session with, from the current URL
    pub dataset: Option<String>,
    /// Saved view to initialize the session with, from the current URL
    pub view: Option<String>,
}

/// Handshake body sent when opening the stream
#[derive(Debug, Serialize)]
struct ListenRequest<'a> {
    initializer: Initializer<'a>,
    subscription: Uuid,
    events: [&'static str; 2],
}

#[derive(Debug, Serialize)]
struct Initializer<'a> {
    dataset: Option<&'a str>,
    view: Option<&'a str>,
}

/// Open the push channel and forward events until cancellation, stream
/// end, or failure
///
/// Cancellation always wins over a racing in-flight event: the token is
/// re-checked after every decoded frame, before the event is forwarded.
pub async fn listen(
    client: reqwest::Client,
    options: ListenOptions,
    tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    let url = format!("{}/events", options.base_url);
    info!(%url, subscription = %options.subscription, "opening event stream");

    let response = client
        .post(&url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .json(&ListenRequest {
            initializer: Initializer {
                dataset: options.dataset.as_deref(),
                view: options.view.as_deref(),
            },
            subscription: options.subscription,
            events: ServerEvent::subscribed(),
        })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Transport(format!(
            "event stream returned {status}"
        )));
    }

    let mut body = response.bytes_stream();
    let mut parser = FrameParser::default();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("event stream cancelled");
                return Ok(());
            }
            chunk = body.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                for frame in parser.feed(&bytes) {
                    if cancel.is_cancelled() {
                        debug!("dropping in-flight event after cancellation");
                        return Ok(());
                    }
                    match decode(&frame)? {
                        Some(event) => {
                            if tx.send(event).await.is_err() {
                                // consumer went away; same as cancellation
                                return Ok(());
                            }
                        }
                        None => trace!(event = %frame.event, "ignoring unrecognized event"),
                    }
                }
            }
            Some(Err(err)) => {
                warn!(%err, "event stream failed");
                return Err(Error::Http(err));
            }
            None => {
                info!("event stream closed by server");
                let _ = tx.send(TransportEvent::Closed).await;
                return Ok(());
            }
        }
    }
}

/// Events the listener delivers to its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Full session snapshot
    StateUpdate(StateUpdatePayload),
    /// Embedded/notebook host deactivated this tab
    Deactivate,
    /// The server ended the stream
    Closed,
}

fn decode(frame: &Frame) -> Result<Option<TransportEvent>> {
    match frame.event.as_str() {
        events::STATE_UPDATE => {
            let payload: StateUpdatePayload = serde_json::from_str(&frame.data)?;
            Ok(Some(TransportEvent::StateUpdate(payload)))
        }
        events::DEACTIVATE_NOTEBOOK_CELL => Ok(Some(TransportEvent::Deactivate)),
        _ => Ok(None),
    }
}

/// A complete server-sent event frame
#[derive(Debug, Clone, PartialEq)]
struct Frame {
    event: String,
    data: String,
}

/// Incremental `text/event-stream` parser
///
/// Frames arrive as `event:`/`data:` lines terminated by a blank line;
/// chunk boundaries fall anywhere, so partial lines are buffered across
/// feeds. Comment lines (leading `:`) are dropped.
#[derive(Debug, Default)]
struct FrameParser {
    buffer: String,
    event: String,
    data: Vec<String>,
}

impl FrameParser {
    fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if let Some(frame) = self.dispatch() {
                    frames.push(frame);
                }
            } else if let Some(rest) = line.strip_prefix("event:") {
                self.event = rest.trim_start_matches(' ').to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.trim_start_matches(' ').to_string());
            } else if !line.starts_with(':') {
                trace!(%line, "ignoring unknown stream field");
            }
        }
        frames
    }

    fn dispatch(&mut self) -> Option<Frame> {
        if self.event.is_empty() && self.data.is_empty() {
            return None;
        }
        let frame = Frame {
            event: std::mem::take(&mut self.event),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(frame)
    }
}
