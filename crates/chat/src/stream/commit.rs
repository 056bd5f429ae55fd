//! Rate-limits writes of normalized text to the display.
//!
//! Tokens can arrive far faster than a screen refreshes. The committer keeps
//! only the newest snapshot and writes it at most once per commit interval,
//! scrolling at most once per scroll interval. All timing uses
//! [`tokio::time::Instant`] so tests can drive it with a paused clock.

use std::future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

pub const DEFAULT_COMMIT_INTERVAL: Duration = Duration::from_millis(16);
pub const DEFAULT_SCROLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where committed snapshots land. Implementations must not feed anything
/// back into the stream that produced the snapshot.
pub trait CommitTarget {
    fn write_content(&mut self, content: &str);
    /// Called once, on the first non-empty write.
    fn composing_finished(&mut self);
    fn scroll_to_bottom(&mut self);
}

#[derive(Debug)]
pub struct Committer {
    commit_interval: Duration,
    scroll_interval: Duration,
    pending: Option<String>,
    deadline: Option<Instant>,
    last_scroll: Option<Instant>,
    scroll_owed: bool,
    composing: bool,
    commits: usize,
}

impl Default for Committer {
    fn default() -> Self {
        Self::new(DEFAULT_COMMIT_INTERVAL, DEFAULT_SCROLL_INTERVAL)
    }
}

impl Committer {
    pub fn new(commit_interval: Duration, scroll_interval: Duration) -> Self {
        Self {
            commit_interval,
            scroll_interval,
            pending: None,
            deadline: None,
            last_scroll: None,
            scroll_owed: false,
            composing: true,
            commits: 0,
        }
    }

    /// Replaces the pending snapshot and schedules a commit if none is
    /// scheduled yet. Never writes synchronously.
    pub fn offer(&mut self, content: String) {
        self.pending = Some(content);
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.commit_interval);
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Resolves when the scheduled commit is due. Never resolves while
    /// nothing is scheduled, which makes it safe to poll in a `select!` loop.
    pub async fn due(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => future::pending().await,
        }
    }

    /// Runs the scheduled commit.
    pub fn run_due(&mut self, target: &mut impl CommitTarget) {
        self.deadline = None;
        self.commit_pending(target);
    }

    /// Writes any pending snapshot right away and settles an owed scroll.
    pub fn flush(&mut self, target: &mut impl CommitTarget) {
        self.deadline = None;
        self.commit_pending(target);
        if self.scroll_owed {
            self.scroll_owed = false;
            self.last_scroll = Some(Instant::now());
            target.scroll_to_bottom();
        }
    }

    fn commit_pending(&mut self, target: &mut impl CommitTarget) {
        let Some(content) = self.pending.take() else {
            return;
        };
        target.write_content(&content);
        self.commits += 1;

        if self.composing && !content.is_empty() {
            self.composing = false;
            target.composing_finished();
        }

        let now = Instant::now();
        let scroll_due = self
            .last_scroll
            .is_none_or(|last| now.duration_since(last) >= self.scroll_interval);
        if scroll_due {
            self.scroll_owed = false;
            self.last_scroll = Some(now);
            target.scroll_to_bottom();
        } else {
            self.scroll_owed = true;
        }
    }
}
