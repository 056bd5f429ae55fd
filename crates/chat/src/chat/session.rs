//! One assistant turn's worth of stream state.
//!
//! The session owns every piece of mutable accumulation state. The commit
//! target only ever receives finished snapshots.

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use trickle_llm::{ByteStream, TransportError};

use crate::config::SessionConfig;
use crate::stream::{
    CommitTarget, Committer, EchoSuppressor, Frame, FrameDemuxer, extract_token, normalize,
};

/// How the read loop ended.
#[derive(Debug)]
pub enum StreamEnd {
    /// End of input or a termination sentinel.
    Finished,
    Cancelled,
    Failed(TransportError),
}

/// Drops retransmitted tokens.
#[derive(Debug)]
struct DuplicateTokenGuard {
    last_token: Option<String>,
    repeat_max_chars: usize,
    tail_min_chars: usize,
}

impl DuplicateTokenGuard {
    fn admits(&mut self, token: &str, accumulated: &str) -> bool {
        let length = token.chars().count();
        if self.last_token.as_deref() == Some(token) && length < self.repeat_max_chars {
            tracing::debug!(dropped = %token, "skipped repeated token");
            return false;
        }
        self.last_token = Some(token.to_string());

        if length > self.tail_min_chars && accumulated.ends_with(token) {
            tracing::debug!(dropped = %token, "skipped token already ending the reply");
            return false;
        }
        true
    }
}

/// Accumulated reply text plus the per-turn heuristics that edit it.
#[derive(Debug)]
struct ResponseAssembler {
    accumulated: String,
    guard: DuplicateTokenGuard,
    echo: EchoSuppressor,
}

impl ResponseAssembler {
    /// Appends `token` and returns the normalized text to display, or `None`
    /// when the token was dropped.
    fn push_token(&mut self, token: &str) -> Option<String> {
        if !self.guard.admits(token, &self.accumulated) {
            return None;
        }
        self.accumulated.push_str(token);
        self.echo.apply(&mut self.accumulated);
        Some(normalize(&self.accumulated))
    }

    fn push_frame(&mut self, payload: &str) -> Option<String> {
        let token = extract_token(payload)?;
        self.push_token(&token)
    }
}

#[derive(Debug)]
pub struct StreamSession {
    demuxer: FrameDemuxer,
    assembler: ResponseAssembler,
    committer: Committer,
    saw_sentinel: bool,
}

impl StreamSession {
    pub fn new(last_user: &str, config: &SessionConfig) -> Self {
        Self {
            demuxer: FrameDemuxer::new(),
            assembler: ResponseAssembler {
                accumulated: String::new(),
                guard: DuplicateTokenGuard {
                    last_token: None,
                    repeat_max_chars: config.duplicate_token_max_chars,
                    tail_min_chars: config.duplicate_tail_min_chars,
                },
                echo: EchoSuppressor::new(last_user)
                    .with_give_up_chars(config.echo_give_up_chars),
            },
            committer: Committer::new(config.commit_interval, config.scroll_interval),
            saw_sentinel: false,
        }
    }

    pub fn accumulated(&self) -> &str {
        &self.assembler.accumulated
    }

    pub fn commit_count(&self) -> usize {
        self.committer.commit_count()
    }

    /// Feeds an already-extracted token, as delivered by a full-text
    /// completion.
    pub fn push_token(&mut self, token: &str) {
        if let Some(snapshot) = self.assembler.push_token(token) {
            self.committer.offer(snapshot);
        }
    }

    /// Feeds one network chunk. Returns true once a termination sentinel was
    /// seen; frames after it are ignored.
    pub fn push_chunk(&mut self, bytes: &[u8]) -> bool {
        let Self {
            demuxer,
            assembler,
            committer,
            saw_sentinel,
        } = self;

        for frame in demuxer.push_bytes(bytes) {
            match frame {
                Frame::Payload { payload, .. } => {
                    if let Some(snapshot) = assembler.push_frame(&payload) {
                        committer.offer(snapshot);
                    }
                }
                Frame::Sentinel => {
                    *saw_sentinel = true;
                    break;
                }
            }
        }
        *saw_sentinel
    }

    /// Reads `stream` until it ends, fails, or `cancel` fires, committing
    /// snapshots to `target` on the committer's cadence.
    pub async fn read_stream(
        &mut self,
        stream: &mut ByteStream,
        cancel: &CancellationToken,
        target: &mut impl CommitTarget,
    ) -> StreamEnd {
        loop {
            if cancel.is_cancelled() {
                return StreamEnd::Cancelled;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                _ = self.committer.due(), if self.committer.is_scheduled() => {
                    self.committer.run_due(target);
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        if self.push_chunk(&bytes) {
                            tracing::debug!("termination sentinel received");
                            return StreamEnd::Finished;
                        }
                    }
                    Some(Err(source)) => return StreamEnd::Failed(source),
                    None => return StreamEnd::Finished,
                },
            }
        }
    }

    /// Drains buffered frames, then writes the final normalization as the
    /// turn's last commit. Returns that text.
    pub fn finish(&mut self, target: &mut impl CommitTarget) -> String {
        if !self.saw_sentinel {
            for frame in self.demuxer.finish() {
                match frame {
                    Frame::Payload { payload, .. } => {
                        // Snapshots are superseded by the final commit below.
                        let _ = self.assembler.push_frame(&payload);
                    }
                    Frame::Sentinel => break,
                }
            }
        }

        let assembler = &mut self.assembler;
        assembler.echo.finish(&mut assembler.accumulated);
        let content = normalize(&assembler.accumulated);
        self.committer.offer(content.clone());
        self.committer.flush(target);
        content
    }

    /// Writes text that arrived but was not committed yet, as when a turn
    /// fails or is cancelled.
    pub fn flush(&mut self, target: &mut impl CommitTarget) {
        self.committer.flush(target);
    }
}
