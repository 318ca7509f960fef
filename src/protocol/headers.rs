//! # Message Header Table
//!
//! Message-type ids are an external, versioned lookup supplied at
//! startup as JSON:
//!
//! ```json
//! {
//!   "incoming": [{ "id": 4000, "name": "DhInitHandshake" }],
//!   "outgoing": [{ "id": 206, "name": "InitDhHandshake" }]
//! }
//! ```
//!
//! The crate only needs id-for-name resolution; how the table is
//! produced for a given protocol release is out of scope.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
struct HeaderEntry {
    id: u16,
    name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
struct HeaderFile {
    #[serde(default)]
    incoming: Vec<HeaderEntry>,
    #[serde(default)]
    outgoing: Vec<HeaderEntry>,
}

/// Bidirectional name → id table, one side per traffic direction.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    incoming: HashMap<String, u16>,
    outgoing: HashMap<String, u16>,
}

impl HeaderMap {
    /// Loads the table from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ProtocolError::ConfigError(format!("failed to read header table: {e}"))
        })?;
        Self::from_json(&contents)
    }

    /// Parses the table from a JSON string.
    pub fn from_json(contents: &str) -> Result<Self> {
        let file: HeaderFile = serde_json::from_str(contents).map_err(|e| {
            ProtocolError::ConfigError(format!("failed to parse header table: {e}"))
        })?;
        Ok(Self::from_entries(file))
    }

    fn from_entries(file: HeaderFile) -> Self {
        Self {
            incoming: file.incoming.into_iter().map(|e| (e.name, e.id)).collect(),
            outgoing: file.outgoing.into_iter().map(|e| (e.name, e.id)).collect(),
        }
    }

    /// Builds a table directly from `(name, id)` pairs. Mostly useful
    /// for tests and embedded defaults.
    pub fn from_pairs(incoming: &[(&str, u16)], outgoing: &[(&str, u16)]) -> Self {
        Self {
            incoming: incoming.iter().map(|(n, i)| (n.to_string(), *i)).collect(),
            outgoing: outgoing.iter().map(|(n, i)| (n.to_string(), *i)).collect(),
        }
    }

    /// Resolves the id of a server-to-client message.
    pub fn incoming(&self, name: &str) -> Result<u16> {
        self.incoming
            .get(name)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownMessage(name.to_owned()))
    }

    /// Resolves the id of a client-to-server message.
    pub fn outgoing(&self, name: &str) -> Result<u16> {
        self.outgoing
            .get(name)
            .copied()
            .ok_or_else(|| ProtocolError::UnknownMessage(name.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "incoming": [
            { "id": 4000, "name": "DhInitHandshake" },
            { "id": 277, "name": "Ping" }
        ],
        "outgoing": [
            { "id": 206, "name": "InitDhHandshake" },
            { "id": 50, "name": "Pong" }
        ]
    }"#;

    #[test]
    fn resolves_ids_by_direction() {
        let map = HeaderMap::from_json(SAMPLE).unwrap();
        assert_eq!(map.incoming("Ping").unwrap(), 277);
        assert_eq!(map.outgoing("Pong").unwrap(), 50);
    }

    #[test]
    fn direction_tables_are_independent() {
        let map = HeaderMap::from_json(SAMPLE).unwrap();
        assert!(map.outgoing("Ping").is_err());
        assert!(map.incoming("Pong").is_err());
    }

    #[test]
    fn unknown_name_is_an_error() {
        let map = HeaderMap::from_json(SAMPLE).unwrap();
        assert!(matches!(
            map.incoming("NoSuchMessage"),
            Err(ProtocolError::UnknownMessage(_))
        ));
    }

    #[test]
    fn malformed_json_is_config_error() {
        assert!(matches!(
            HeaderMap::from_json("not json"),
            Err(ProtocolError::ConfigError(_))
        ));
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let map = HeaderMap::from_json("{}").unwrap();
        assert!(map.incoming("Ping").is_err());
    }
}
