//! JSON-lines task source and result sink over any async reader/writer.
//!
//! The node binary wires these to stdin and stdout: one task per input line,
//! one outcome per output line.

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;

use crate::error::SourceError;
use crate::source::{ResultSink, TaskOutcome, TaskSource};
use crate::task::Task;

/// Reads one JSON task per line. Blank lines are skipped; end of input
/// disconnects the source.
pub struct JsonLinesSource<R> {
    lines: Mutex<LinesStream<R>>,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: Mutex::new(LinesStream::new(reader.lines())),
        }
    }
}

impl JsonLinesSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> TaskSource for JsonLinesSource<R> {
    async fn next_task(&self) -> Result<Option<Task>, SourceError> {
        let mut lines = self.lines.lock().await;
        loop {
            let line = match lines.next().await {
                Some(line) => line?,
                None => return Err(SourceError::Disconnected("end of input".to_string())),
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map(Some)
                .map_err(|e| SourceError::InvalidPayload(format!("{e}: {line}")));
        }
    }
}

#[derive(Serialize)]
struct OutcomeLine<'a> {
    id: &'a str,
    #[serde(flatten)]
    outcome: &'a TaskOutcome,
}

/// Writes one JSON outcome per line, flushing after each.
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl JsonLinesSink<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ResultSink for JsonLinesSink<W> {
    async fn submit_result(&self, task_id: &str, outcome: TaskOutcome) -> Result<(), SourceError> {
        let mut line = serde_json::to_vec(&OutcomeLine {
            id: task_id,
            outcome: &outcome,
        })?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::task::StatusReason;

    #[tokio::test]
    async fn reads_tasks_and_skips_blank_lines() {
        let input = b"{\"id\":\"a\",\"type\":\"echo\",\"config\":{}}\n\n{\"id\":\"b\",\"type\":\"sleep\",\"config\":{\"duration_ms\":1},\"priority\":true}\n";
        let source = JsonLinesSource::new(&input[..]);

        let a = source.next_task().await.unwrap().unwrap();
        assert_eq!(a.id, "a");
        let b = source.next_task().await.unwrap().unwrap();
        assert_eq!(b.task_type, "sleep");
        assert!(b.priority);

        assert!(matches!(
            source.next_task().await,
            Err(SourceError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn invalid_line_is_reported() {
        let source = JsonLinesSource::new(&b"not json\n{\"id\":\"ok\",\"type\":\"echo\",\"config\":1}\n"[..]);
        assert!(matches!(
            source.next_task().await,
            Err(SourceError::InvalidPayload(_))
        ));
        assert_eq!(source.next_task().await.unwrap().unwrap().id, "ok");
    }

    #[tokio::test]
    async fn writes_one_line_per_outcome() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.submit_result("t1", TaskOutcome::Completed { result: json!({"x": 1}) })
            .await
            .unwrap();
        sink.submit_result(
            "t2",
            TaskOutcome::Cancelled {
                reason: StatusReason::ResourcePressure,
            },
        )
        .await
        .unwrap();

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], "t1");
        assert_eq!(lines[0]["outcome"], "completed");
        assert_eq!(lines[0]["result"]["x"], 1);
        assert_eq!(lines[1]["reason"]["kind"], "resource_pressure");
    }
}
