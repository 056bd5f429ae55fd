use std::fmt;
use std::str::FromStr;

use snafu::ResultExt;
use uuid::Uuid;

use super::error::{InvalidIdSnafu, StorageError, StorageResult};

/// Declares a uuid-backed id. Fresh ids are v7 so they sort by creation time.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $id_type:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new_v7() -> Self {
                Self(Uuid::now_v7())
            }

            /// Accepts any uuid form, surrounding whitespace included.
            pub fn parse(raw: &str) -> StorageResult<Self> {
                Uuid::try_parse(raw.trim())
                    .map(Self)
                    .context(InvalidIdSnafu {
                        stage: "parse-id",
                        id_type: $id_type,
                        raw: raw.to_string(),
                    })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0.hyphenated(), formatter)
            }
        }

        impl From<Uuid> for $name {
            fn from(raw: Uuid) -> Self {
                Self(raw)
            }
        }

        impl FromStr for $name {
            type Err = StorageError;

            fn from_str(raw: &str) -> StorageResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

uuid_id!(
    /// A conversation. Minted by the client on its first message.
    ChatId,
    "chat id"
);
uuid_id!(
    /// A persisted message, distinct from the client's local message id.
    MessageId,
    "message id"
);
