//! Logical record types carried by the GDELT feed

use crate::schema::{TableSchema, EVENTS_SCHEMA, GKG_SCHEMA, MENTIONS_SCHEMA};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Event,
    Mention,
    KnowledgeGraph,
}

impl RecordType {
    /// Classification order; the first matching pattern wins
    pub const ALL: [RecordType; 3] = [
        RecordType::Event,
        RecordType::Mention,
        RecordType::KnowledgeGraph,
    ];

    /// Substring identifying this type in a feed URL
    pub fn url_pattern(self) -> &'static str {
        match self {
            RecordType::Event => "export",
            RecordType::Mention => "mentions",
            RecordType::KnowledgeGraph => "gkg",
        }
    }

    pub fn schema(self) -> &'static TableSchema {
        match self {
            RecordType::Event => &EVENTS_SCHEMA,
            RecordType::Mention => &MENTIONS_SCHEMA,
            RecordType::KnowledgeGraph => &GKG_SCHEMA,
        }
    }

    pub fn table_name(self) -> &'static str {
        self.schema().name
    }

    pub fn classify(url: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ty| url.contains(ty.url_pattern()))
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}
