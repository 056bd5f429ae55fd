use std::time::Duration;

use crate::stream::{DEFAULT_COMMIT_INTERVAL, DEFAULT_ECHO_GIVE_UP_CHARS, DEFAULT_SCROLL_INTERVAL};

/// Messages sent as context: ten user/assistant pairs.
pub const DEFAULT_CONTEXT_WINDOW: usize = 20;
pub const DEFAULT_DUPLICATE_TOKEN_MAX_CHARS: usize = 50;
pub const DEFAULT_DUPLICATE_TAIL_MIN_CHARS: usize = 5;

/// Tuning knobs for one assistant turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub context_window: usize,
    pub commit_interval: Duration,
    pub scroll_interval: Duration,
    /// How far a reply may run past a prompt-shaped prefix before the echo
    /// check gives up.
    pub echo_give_up_chars: usize,
    /// A token repeating the previous one is dropped when shorter than this.
    pub duplicate_token_max_chars: usize,
    /// A token already ending the reply is dropped when longer than this.
    pub duplicate_tail_min_chars: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            context_window: DEFAULT_CONTEXT_WINDOW,
            commit_interval: DEFAULT_COMMIT_INTERVAL,
            scroll_interval: DEFAULT_SCROLL_INTERVAL,
            echo_give_up_chars: DEFAULT_ECHO_GIVE_UP_CHARS,
            duplicate_token_max_chars: DEFAULT_DUPLICATE_TOKEN_MAX_CHARS,
            duplicate_tail_min_chars: DEFAULT_DUPLICATE_TAIL_MIN_CHARS,
        }
    }
}
