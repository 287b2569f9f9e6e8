//! Log stream multiplexer.
//!
//! Units emit one [`StreamRequest`] from their Exec call; `stream_build`
//! is the single consumer and runs every request as its own worker.
//!
//! ```text
//! exec_step ─┐
//! exec_step ─┼─► mpsc ─► stream_build ─┬─► worker (tail + copy)
//! exec_svc  ─┘                         └─► worker (tail + copy)
//! ```
//!
//! Workers run on a token that is canceled `log_streaming_timeout` after the
//! build's stream token, so trailing output still drains after Exec ends.

use super::Executor;
use crate::cancel::CancelToken;
use crate::constants::SECRET_MASK;
use crate::error::{Error, Result};
use crate::pipeline::Container;
use crate::runtime::LogStream;
use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Read size used once a log stream is past its size cap.
const DISCARD_CHUNK: usize = 8 * 1024;

/// Deferred log copy for one container.
pub type StreamFn = Box<dyn FnOnce(CancelToken, Container) -> BoxFuture<'static, Result<()>> + Send>;

/// Request to tail one container's logs.
pub struct StreamRequest {
    /// Unit kind (`"step"` or `"service"`).
    pub key: &'static str,
    pub container: Container,
    pub stream: StreamFn,
}

impl StreamRequest {
    pub fn new<F>(key: &'static str, container: Container, stream: F) -> Self
    where
        F: FnOnce(CancelToken, Container) -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        Self {
            key,
            container,
            stream: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRequest")
            .field("key", &self.key)
            .field("container", &self.container.id)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Hands a stream request to the multiplexer.
    ///
    /// Blocks while the channel is full and nobody drains it.
    pub(crate) async fn emit_stream(&self, token: &CancelToken, request: StreamRequest) -> Result<()> {
        debug!(key = request.key, container = %request.container.id, "Emitting stream request");
        tokio::select! {
            sent = self.stream_sender().send(request) => {
                sent.map_err(|_| Error::Internal("stream channel closed".to_string()))
            }
            () = token.cancelled() => Err(Error::Cancelled),
        }
    }

    pub(crate) async fn stream_build(&self, token: &CancelToken) -> Result<()> {
        let mut workers = JoinSet::new();

        {
            let executor = self.clone();
            let token = token.clone();
            workers.spawn(async move {
                let pipeline = executor.pipeline();
                if let Err(e) = executor.runtime().stream_build(&token, &pipeline).await {
                    error!(error = %e, "Unable to stream build");
                }
            });
        }

        let worker_token = CancelToken::new();
        let watchdog = {
            let build_token = token.clone();
            let worker_token = worker_token.clone();
            let grace = self.settings().log_streaming_timeout;
            tokio::spawn(async move {
                build_token.cancelled().await;
                tokio::time::sleep(grace).await;
                worker_token.cancel();
            })
        };

        {
            let mut requests = self.stream_receiver().lock().await;
            loop {
                tokio::select! {
                    biased;
                    request = requests.recv() => match request {
                        Some(request) => spawn_worker(&mut workers, &worker_token, request),
                        None => break,
                    },
                    () = token.cancelled() => break,
                }
            }
            while let Ok(request) = requests.try_recv() {
                spawn_worker(&mut workers, &worker_token, request);
            }
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Stream worker panicked");
            }
        }
        watchdog.abort();

        info!("Log streaming finished");
        Ok(())
    }

    /// Copies a log stream line by line to the build output.
    pub(crate) async fn copy_logs(
        &self,
        token: &CancelToken,
        ctn: &Container,
        prefix: &str,
        logs: LogStream,
    ) -> Result<()> {
        let mut secrets: Vec<&str> = ctn
            .secrets
            .iter()
            .filter_map(|s| ctn.environment.get(&s.target))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .collect();
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));

        let max = self.settings().max_log_size;
        let mut reader = BufReader::new(logs);
        let mut buf = Vec::new();
        let mut written = 0usize;

        loop {
            buf.clear();
            // One byte past the remaining budget is enough to detect overflow.
            let limit = match max {
                0 => u64::MAX,
                max => (max.saturating_sub(written) as u64).saturating_add(1),
            };
            let mut limited = (&mut reader).take(limit);
            let read = tokio::select! {
                read = limited.read_until(b'\n', &mut buf) => read?,
                () = token.cancelled() => return Err(Error::Cancelled),
            };
            if read == 0 {
                return Ok(());
            }
            if max > 0 && written + read > max {
                self.log_output(&format!(
                    "{prefix} log output exceeded maximum size of {max} bytes, truncating"
                ));
                return discard_logs(token, &mut reader).await;
            }
            written += read;

            let line = String::from_utf8_lossy(&buf);
            let line = mask_secrets(line.trim_end_matches(['\n', '\r']), &secrets);
            self.log_output(&format!("{prefix} {line}"));
        }
    }
}

/// Drains the rest of a log stream in fixed-size chunks.
async fn discard_logs(token: &CancelToken, reader: &mut BufReader<LogStream>) -> Result<()> {
    let mut chunk = [0u8; DISCARD_CHUNK];
    loop {
        let read = tokio::select! {
            read = reader.read(&mut chunk) => read?,
            () = token.cancelled() => return Err(Error::Cancelled),
        };
        if read == 0 {
            return Ok(());
        }
    }
}

fn spawn_worker(workers: &mut JoinSet<()>, token: &CancelToken, request: StreamRequest) {
    let StreamRequest {
        key,
        container,
        stream,
    } = request;
    let token = token.clone();

    workers.spawn(async move {
        let id = container.id.clone();
        debug!(key, container = %id, "Streaming container logs");
        match stream(token, container).await {
            Ok(()) => debug!(key, container = %id, "Finished streaming"),
            Err(e) if e.is_cancelled() => debug!(key, container = %id, "Stream canceled"),
            Err(e) => error!(key, container = %id, error = %e, "Unable to stream container"),
        }
    });
}

fn mask_secrets(line: &str, secrets: &[&str]) -> String {
    secrets
        .iter()
        .fold(line.to_string(), |line, secret| line.replace(secret, SECRET_MASK))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secrets_longest_first() {
        let secrets = ["hunter22", "hunter2"];
        assert_eq!(mask_secrets("pw=hunter22 and hunter2", &secrets), "pw=*** and ***");
        assert_eq!(mask_secrets("nothing here", &[]), "nothing here");
    }
}
