//! Branded identifiers issued by negotiation.
//!
//! Both are opaque strings. Wrapping them keeps a connection id from being
//! passed where the token is expected (the token goes on the wire, the id only
//! into logs and `Reconnected` events).

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the server issued an empty value.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
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
    };
}

branded_id!(
    /// Identifies one logical connection for logging and correlation.
    ConnectionId
);

branded_id!(
    /// Authenticates one transport binding. Attached to every transport request.
    ConnectionToken
);
