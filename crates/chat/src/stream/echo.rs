//! Strips a reply's leading repetition of the user's prompt.
//!
//! Some backends replay the prompt (sometimes twice) before answering. The
//! decision is made once per turn on the accumulated text and may wait for
//! more tokens while the start of the reply is still ambiguous.

pub const DEFAULT_ECHO_GIVE_UP_CHARS: usize = 120;

/// What one evaluation did to the accumulated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOutcome {
    /// Not enough text yet to tell.
    Waiting,
    Stripped { removed_bytes: usize },
    Kept,
    /// The decision was made by an earlier call.
    Settled,
}

enum Verdict {
    /// Undecided; `confirmed` bytes are already known to be echo.
    Wait { confirmed: usize },
    Strip(usize),
    Keep,
}

fn is_boundary(character: char) -> bool {
    character.is_whitespace() || ".!?:;,'\")]".contains(character)
}

#[derive(Debug, Clone)]
pub struct EchoSuppressor {
    last_user: String,
    give_up_chars: usize,
    settled: bool,
}

impl EchoSuppressor {
    pub fn new(last_user: &str) -> Self {
        let last_user = last_user.trim().to_string();
        Self {
            settled: last_user.is_empty(),
            last_user,
            give_up_chars: DEFAULT_ECHO_GIVE_UP_CHARS,
        }
    }

    pub fn with_give_up_chars(mut self, give_up_chars: usize) -> Self {
        self.give_up_chars = give_up_chars;
        self
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Re-evaluates `accumulated` and removes the echo in place once it is
    /// certain. After the first `Stripped` or `Kept` every call is a no-op.
    pub fn apply(&mut self, accumulated: &mut String) -> EchoOutcome {
        if self.settled {
            return EchoOutcome::Settled;
        }

        match self.evaluate(accumulated) {
            Verdict::Wait { .. } => EchoOutcome::Waiting,
            Verdict::Keep => self.keep(),
            Verdict::Strip(end) => self.strip(accumulated, end),
        }
    }

    /// Decides for good once no more text will arrive. Echo confirmed so far
    /// is stripped; a bare prefix of the prompt is kept.
    pub fn finish(&mut self, accumulated: &mut String) -> EchoOutcome {
        if self.settled {
            return EchoOutcome::Settled;
        }

        match self.evaluate(accumulated) {
            Verdict::Wait { confirmed: 0 } | Verdict::Keep => self.keep(),
            Verdict::Wait { confirmed: end } | Verdict::Strip(end) => {
                self.strip(accumulated, end)
            }
        }
    }

    fn keep(&mut self) -> EchoOutcome {
        self.settled = true;
        EchoOutcome::Kept
    }

    fn strip(&mut self, accumulated: &mut String, end: usize) -> EchoOutcome {
        self.settled = true;
        accumulated.drain(..end);
        tracing::debug!(removed_bytes = end, "stripped prompt echo from reply");
        EchoOutcome::Stripped { removed_bytes: end }
    }

    fn evaluate(&self, text: &str) -> Verdict {
        let prompt = self.last_user.as_str();
        // Bytes of `text` already known to be echo, and how many copies that is.
        let mut echo_end = 0;
        let mut copies = 0;

        loop {
            if copies == 2 {
                return Verdict::Strip(echo_end);
            }
            let rest = &text[echo_end..];
            let Some(after) = rest.strip_prefix(prompt) else {
                return if prompt.starts_with(rest) {
                    self.wait_for_copy(text, echo_end, copies)
                } else if copies > 0 {
                    Verdict::Strip(echo_end)
                } else {
                    Verdict::Keep
                };
            };

            match after.chars().next() {
                None => return self.wait_for_copy(text, echo_end, copies),
                Some(next) if is_boundary(next) => {
                    let answer = after.trim_start_matches(is_boundary);
                    echo_end = text.len() - answer.len();
                    copies += 1;
                }
                // "HiHi": one copy glued to the next is stripped, the other kept.
                Some(_) if copies == 0 && after.starts_with(prompt) => {
                    return Verdict::Strip(prompt.len());
                }
                Some(_) if copies > 0 => return Verdict::Strip(echo_end),
                Some(_) if after.chars().count() > self.give_up_chars => return Verdict::Keep,
                Some(_) => return Verdict::Wait { confirmed: 0 },
            }
        }
    }

    /// The text so far is confirmed echo followed by what may be the start of
    /// another copy.
    fn wait_for_copy(&self, text: &str, echo_end: usize, copies: usize) -> Verdict {
        if copies == 0 {
            return Verdict::Wait { confirmed: 0 };
        }
        if text[echo_end..].chars().count() > self.give_up_chars {
            Verdict::Strip(echo_end)
        } else {
            Verdict::Wait {
                confirmed: echo_end,
            }
        }
    }
}
