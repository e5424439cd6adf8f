use std::collections::HashMap;

use serde::Deserialize;

use crate::topic::EntityTopic;

/// Registry identifier of a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(u32);

impl SchemaId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SchemaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Schema body as returned by the registry, tagged with the id it was
/// fetched for. Immutable for a given id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDefinition {
    id: SchemaId,
    text: String,
}

impl SchemaDefinition {
    pub fn new(id: SchemaId, text: impl Into<String>) -> Self {
        Self { id, text: text.into() }
    }

    pub fn id(&self) -> SchemaId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// SchemaId resolution per topic: one process-wide default plus
/// optional per-topic overrides.
#[derive(Debug, Clone)]
pub struct SchemaIds {
    default: SchemaId,
    overrides: HashMap<EntityTopic, SchemaId>,
}

impl SchemaIds {
    pub fn new(default: SchemaId) -> Self {
        Self { default, overrides: HashMap::new() }
    }

    pub fn with_override(mut self, topic: EntityTopic, id: SchemaId) -> Self {
        self.overrides.insert(topic, id);
        self
    }

    pub fn for_topic(&self, topic: EntityTopic) -> SchemaId {
        self.overrides.get(&topic).copied().unwrap_or(self.default)
    }

    pub fn default_id(&self) -> SchemaId {
        self.default
    }
}
