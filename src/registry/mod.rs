//! Server registry: the static catalog of downstream MCP servers this
//! gateway knows how to proxy to.
//!
//! Loaded once at startup from a JSON catalog file and held read-only for
//! the life of the process; changing the catalog requires a restart.

use std::collections::BTreeMap;
use std::{env, fs, path::Path};

use serde::Deserialize;

use crate::error::{GatewayError, NotFoundKind};
use crate::types::{Audience, RealmRole, ServerName};

/// On-disk shape of the catalog file: `{"servers": {"<name>": {...}}}`.
#[derive(Debug, Deserialize)]
struct ServerCatalogFile {
    servers: BTreeMap<String, ServerCatalogEntry>,
}

#[derive(Debug, Deserialize, Clone)]
struct ServerCatalogEntry {
    description: String,
    url: String,
    audience: String,
    #[serde(default)]
    required_role: Option<String>,
}

/// A single downstream server known to the gateway.
#[derive(Debug, Clone)]
pub struct ServerDescriptor {
    pub name: ServerName,
    pub description: String,
    pub url: String,
    pub audience: Audience,
    pub required_role: Option<RealmRole>,
}

/// The loaded, read-only catalog of downstream servers.
#[derive(Debug, Clone)]
pub struct ServerRegistry {
    servers: BTreeMap<String, ServerDescriptor>,
}

impl ServerRegistry {
    /// Load the catalog from `path`, expanding `${VAR}` references against
    /// the process environment.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)?;
        let file: ServerCatalogFile = serde_json::from_str(&raw)?;
        Self::from_file(file)
    }

    fn from_file(file: ServerCatalogFile) -> anyhow::Result<Self> {
        let mut servers = BTreeMap::new();
        for (name, entry) in file.servers {
            let entry = expand_entry(entry);
            servers.insert(
                name.clone(),
                ServerDescriptor {
                    name: ServerName::new(name),
                    description: entry.description,
                    url: entry.url,
                    audience: Audience::new(entry.audience),
                    required_role: entry.required_role.map(RealmRole::new),
                },
            );
        }
        Ok(Self { servers })
    }

    /// All known servers, in deterministic catalog order.
    pub fn list(&self) -> impl Iterator<Item = &ServerDescriptor> {
        self.servers.values()
    }

    /// Look up a server by name.
    pub fn get(&self, name: &str) -> Result<&ServerDescriptor, GatewayError> {
        self.servers.get(name).ok_or_else(|| GatewayError::NotFound {
            kind: NotFoundKind::Server,
            name: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_entry(mut entry: ServerCatalogEntry) -> ServerCatalogEntry {
    entry.url = expand_env_vars(&entry.url);
    entry.audience = expand_env_vars(&entry.audience);
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file() -> ServerCatalogFile {
        serde_json::from_str(
            r#"{
                "servers": {
                    "weather": {
                        "description": "Weather lookups",
                        "url": "https://weather.internal/mcp",
                        "audience": "weather-api",
                        "required_role": "weather-reader"
                    },
                    "calculator": {
                        "description": "Arithmetic tools",
                        "url": "https://calc.internal/mcp",
                        "audience": "calculator-api"
                    }
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn loads_servers_in_deterministic_order() {
        let registry = ServerRegistry::from_file(sample_file()).unwrap();
        let names: Vec<_> = registry.list().map(|s| s.name.as_str().to_string()).collect();
        assert_eq!(names, vec!["calculator", "weather"]);
    }

    #[test]
    fn required_role_is_optional() {
        let registry = ServerRegistry::from_file(sample_file()).unwrap();
        let calc = registry.get("calculator").unwrap();
        assert!(calc.required_role.is_none());
        let weather = registry.get("weather").unwrap();
        assert_eq!(weather.required_role, Some(RealmRole::new("weather-reader")));
    }

    #[test]
    fn unknown_server_name_is_not_found() {
        let registry = ServerRegistry::from_file(sample_file()).unwrap();
        let err = registry.get("ghost").unwrap_err();
        assert!(matches!(
            err,
            GatewayError::NotFound {
                kind: NotFoundKind::Server,
                ..
            }
        ));
    }

    #[test]
    fn expand_env_vars_substitutes_known_variables_and_leaves_unknown_ones() {
        // SAFETY: test runs single-threaded within this process's env mutation.
        unsafe {
            std::env::set_var("GATEWAY_TEST_HOST", "weather.internal");
        }
        let expanded = expand_env_vars("https://${GATEWAY_TEST_HOST}/mcp and ${MISSING_VAR}");
        assert_eq!(expanded, "https://weather.internal/mcp and ${MISSING_VAR}");
        unsafe {
            std::env::remove_var("GATEWAY_TEST_HOST");
        }
    }
}
