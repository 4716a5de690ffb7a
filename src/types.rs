//! NewType wrappers for strong typing throughout the gateway.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a tool name where a server name is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Name of a downstream server as it appears in the catalog (unique).
    ServerName
);

newtype_string!(
    /// RFC 8693 `audience` value — the IdP client id of a downstream server.
    Audience
);

newtype_string!(
    /// A realm role string carried in JWT claims and required to activate a server.
    RealmRole
);

newtype_string!(
    /// Globally-unique proxy tool name, spanning every downstream server (I2).
    ToolName
);

newtype_string!(
    /// Opaque `Mcp-Session-Id`, assigned on `initialize` and echoed by the client.
    SessionId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_name_roundtrips_through_serde() {
        let name = ServerName::new("weather");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"weather\"");
        let parsed: ServerName = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, name);
    }

    #[test]
    fn server_names_hash_and_compare_by_value() {
        use std::collections::HashSet;
        let mut servers: HashSet<ServerName> = HashSet::new();
        servers.insert(ServerName::new("weather"));
        assert!(servers.contains(&ServerName::new("weather")));
        assert!(!servers.contains(&ServerName::new("calculator")));
    }

    #[test]
    fn tool_name_equality_and_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(ToolName::new("get_weather"));
        set.insert(ToolName::new("get_forecast"));
        assert!(set.contains(&ToolName::new("get_weather")));
        assert!(!set.contains(&ToolName::new("get_alerts")));
    }

    #[test]
    fn session_id_display() {
        let id = SessionId::new("01977b3e-0000-7000-8000-000000000000");
        assert_eq!(format!("{id}"), "01977b3e-0000-7000-8000-000000000000");
    }
}
