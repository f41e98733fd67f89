//! Line-oriented driver: one input event in, one JSON result out

use crate::input::InputEvent;
use anyhow::{Context, Result};
use pattern_engine::{EngineResult, ErrorReport, SharedSessionHub};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

/// Result of one input line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputLine {
    pub line: usize,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl OutputLine {
    fn ok(line: usize, outcome: Value) -> Self {
        Self {
            line,
            ok: true,
            outcome: Some(outcome),
            error: None,
        }
    }

    fn err(line: usize, error: ErrorReport) -> Self {
        Self {
            line,
            ok: false,
            outcome: None,
            error: Some(error),
        }
    }
}

/// Counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub lines: usize,
    pub failed: usize,
}

pub struct Runner {
    hub: SharedSessionHub,
}

impl Runner {
    pub fn new(hub: SharedSessionHub) -> Self {
        Self { hub }
    }

    /// Handle every line of `reader`, writing one result line per input
    /// line to `writer`. Blank lines are skipped.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<RunStats>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut stats = RunStats::default();
        let mut line_no = 0;

        while let Some(raw) = lines.next_line().await.context("reading input")? {
            line_no += 1;
            if raw.trim().is_empty() {
                continue;
            }
            let output = self.handle_line(line_no, &raw).await;
            stats.lines += 1;
            if !output.ok {
                stats.failed += 1;
            }
            let mut encoded = serde_json::to_string(&output).context("encoding output")?;
            encoded.push('\n');
            writer
                .write_all(encoded.as_bytes())
                .await
                .context("writing output")?;
        }
        writer.flush().await.context("flushing output")?;
        Ok(stats)
    }

    pub async fn handle_line(&self, line: usize, raw: &str) -> OutputLine {
        let event: InputEvent = match serde_json::from_str(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(line, error = %e, "Unparseable input line");
                return OutputLine::err(
                    line,
                    ErrorReport {
                        code: "INVALID_INPUT".to_string(),
                        message: e.to_string(),
                        retryable: false,
                    },
                );
            }
        };

        debug!(line, event = event.kind(), "Handling input");
        match self.dispatch(event).await {
            Ok(outcome) => OutputLine::ok(line, outcome),
            Err(e) => {
                warn!(line, code = e.code(), error = %e, "Event failed");
                OutputLine::err(line, e.to_report())
            }
        }
    }

    async fn dispatch(&self, event: InputEvent) -> EngineResult<Value> {
        let hub = &self.hub;
        let value = match event {
            InputEvent::Open {
                session_id,
                user_id,
            } => to_value(hub.open_session(&session_id, &user_id).await?),
            InputEvent::Observation(observation) => to_value(hub.observe(observation).await?),
            InputEvent::Response(response) => to_value(hub.respond(response).await?),
            InputEvent::End { session_id } => {
                hub.end_session(&session_id).await?;
                serde_json::json!({ "session_id": session_id, "ended": true })
            }
            InputEvent::Tick { now } => to_value(hub.redeliver_due(now).await),
        };
        Ok(value)
    }
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
