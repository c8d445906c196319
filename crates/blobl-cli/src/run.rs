//! Line-oriented message runner

use crate::config::ErrorPolicy;
use blobl_ir::{Message, Part};
use blobl_mapping::Executor;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinError;
use tracing::{debug, warn};

/// Why a single message could not be mapped
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Mapping(#[from] blobl_mapping::Error),

    #[error(transparent)]
    Message(#[from] blobl_ir::Error),

    #[error("mapping did not finish within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("mapping worker failed: {0}")]
    Worker(#[from] JoinError),
}

/// Maps messages one at a time on blocking workers.
#[derive(Debug, Clone)]
pub struct Runner {
    executor: Arc<Executor>,
    timeout: Option<Duration>,
    on_error: ErrorPolicy,
    with_metadata: bool,
}

/// Counters for one run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub mapped: usize,
    pub skipped: usize,
    pub passed_through: usize,
}

impl Runner {
    pub fn new(executor: Executor) -> Self {
        Self {
            executor: Arc::new(executor),
            timeout: None,
            on_error: ErrorPolicy::default(),
            with_metadata: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_error_policy(mut self, on_error: ErrorPolicy) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn with_metadata(mut self, with_metadata: bool) -> Self {
        self.with_metadata = with_metadata;
        self
    }

    /// Map one raw message.
    ///
    /// The engine cannot be interrupted, so on timeout the worker keeps
    /// running and its result is discarded.
    pub async fn map_content(&self, content: &str) -> Result<Part, RunError> {
        let executor = Arc::clone(&self.executor);
        let mut msg = Message::from_contents([content.to_owned()]);
        let task = tokio::task::spawn_blocking(move || {
            executor.map_part(0, &mut msg)?;
            Ok::<_, blobl_mapping::Error>(msg)
        });

        let joined = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| RunError::Timeout(limit))?,
            None => task.await,
        };
        let msg = joined??;
        let mut parts = msg.into_parts().into_iter();
        Ok(parts
            .next()
            .ok_or(blobl_ir::Error::PartNotFound { index: 0, len: 0 })?)
    }

    /// Render a part as one output line
    pub fn render(&self, part: &Part) -> serde_json::Result<String> {
        let content = String::from_utf8_lossy(part.content());
        if self.with_metadata {
            serde_json::to_string(&serde_json::json!({
                "content": content,
                "metadata": part.metadata(),
            }))
        } else {
            Ok(content.into_owned())
        }
    }

    /// Map every non-empty line of `input`, writing results to `output`.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors, and on the first mapping failure when the error
    /// policy is [`ErrorPolicy::Fail`].
    pub async fn run<R, W>(&self, input: R, output: &mut W) -> anyhow::Result<RunStats>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut stats = RunStats::default();
        let mut lines = input.lines();
        let mut number = 0;

        while let Some(line) = lines.next_line().await? {
            number += 1;
            if line.trim().is_empty() {
                continue;
            }

            let part = match self.map_content(&line).await {
                Ok(part) => {
                    stats.mapped += 1;
                    part
                }
                Err(err) => match self.on_error {
                    ErrorPolicy::Fail => {
                        return Err(anyhow::Error::new(err)
                            .context(format!("failed to map message on input line {number}")));
                    }
                    ErrorPolicy::Skip => {
                        warn!(line = number, error = %err, "skipping message");
                        stats.skipped += 1;
                        continue;
                    }
                    ErrorPolicy::Passthrough => {
                        warn!(line = number, error = %err, "passing message through unchanged");
                        stats.passed_through += 1;
                        Part::new(line)
                    }
                },
            };

            let mut rendered = self.render(&part)?;
            rendered.push('\n');
            output.write_all(rendered.as_bytes()).await?;
        }

        output.flush().await?;
        debug!(?stats, "run finished");
        Ok(stats)
    }
}
