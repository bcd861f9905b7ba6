//! Identity types for guilds, members, roles and channels.
//!
//! The chat platform hands out opaque string snowflakes. Each kind gets its
//! own newtype so a role id can never be passed where a member id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id!(
    /// A guild (community/server) on the chat platform.
    GuildId
);

define_id!(
    /// A platform user identity. Also the key of linked-account records.
    MemberId
);

define_id!(
    /// A platform role identifier.
    RoleId
);

define_id!(
    /// A platform channel identifier.
    ChannelId
);

define_id!(
    /// Human-readable role label shared between the datastore and the Role-Map
    /// (e.g. `tester`, `staff`).
    RoleSlug
);
