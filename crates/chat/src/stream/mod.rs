//! The byte-to-display pipeline: demux, extract, de-echo, normalize, commit.

mod commit;
mod demux;
mod echo;
mod extract;
mod normalize;

pub use commit::{CommitTarget, Committer, DEFAULT_COMMIT_INTERVAL, DEFAULT_SCROLL_INTERVAL};
pub use demux::{Frame, FrameDemuxer, FrameKind, Frames, Utf8Decoder, is_termination_sentinel};
pub use echo::{DEFAULT_ECHO_GIVE_UP_CHARS, EchoOutcome, EchoSuppressor};
pub use extract::{TokenPayload, extract_token};
pub use normalize::normalize;
