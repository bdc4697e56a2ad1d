//! Command definition table
//!
//! Maps `(target, packet)` pairs to the structural description used to
//! recognise them in raw buffers. The table is built once at startup and is
//! read-only afterwards, so it is shared between interface threads behind an
//! `Arc` without locking.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{TcrError, TcrResult};

/// A fixed byte pattern expected at an offset in the buffer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdItem {
    pub offset: usize,
    pub value: Vec<u8>,
}

impl IdItem {
    pub fn new(offset: usize, value: impl Into<Vec<u8>>) -> Self {
        Self { offset, value: value.into() }
    }

    fn matches(&self, buffer: &[u8]) -> bool {
        let Some(end) = self.offset.checked_add(self.value.len()) else {
            return false;
        };
        buffer.get(self.offset..end) == Some(self.value.as_slice())
    }
}

/// Structural definition of one command packet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandDefinition {
    pub target_name: String,
    pub packet_name: String,
    /// Exact buffer length, if fixed
    pub length: Option<usize>,
    /// Minimum buffer length for variable sized packets
    pub min_length: Option<usize>,
    pub id_items: Vec<IdItem>,
}

impl CommandDefinition {
    pub fn new(target_name: impl Into<String>, packet_name: impl Into<String>) -> Self {
        Self {
            target_name: target_name.into(),
            packet_name: packet_name.into(),
            length: None,
            min_length: None,
            id_items: Vec::new(),
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    pub fn with_id_item(mut self, offset: usize, value: impl Into<Vec<u8>>) -> Self {
        self.id_items.push(IdItem::new(offset, value));
        self
    }

    /// Whether the buffer has the shape of this command
    pub fn matches(&self, buffer: &[u8]) -> bool {
        if let Some(length) = self.length {
            if buffer.len() != length {
                return false;
            }
        }
        if let Some(min_length) = self.min_length {
            if buffer.len() < min_length {
                return false;
            }
        }
        self.id_items.iter().all(|item| item.matches(buffer))
    }

    /// How much of the buffer the definition pins down. Used to pick the
    /// best of several matches.
    pub fn specificity(&self) -> usize {
        let id_bytes: usize = self.id_items.iter().map(|item| item.value.len()).sum();
        id_bytes * 2 + usize::from(self.length.is_some())
    }

    /// A definition with nothing to compare against would match anything
    pub fn is_structural(&self) -> bool {
        !self.id_items.is_empty() || self.length.is_some()
    }
}

/// Read-only table of command definitions
#[derive(Debug, Clone, Default)]
pub struct DefinitionTable {
    definitions: Vec<CommandDefinition>,
    index: BTreeMap<(String, String), usize>,
}

impl DefinitionTable {
    pub fn new(definitions: Vec<CommandDefinition>) -> TcrResult<Self> {
        let mut index = BTreeMap::new();
        for (i, def) in definitions.iter().enumerate() {
            if def.target_name.is_empty() || def.packet_name.is_empty() {
                return Err(TcrError::Definition(format!(
                    "definition {} has an empty target or packet name",
                    i
                )));
            }
            let key = (def.target_name.clone(), def.packet_name.clone());
            if index.insert(key, i).is_some() {
                return Err(TcrError::Definition(format!(
                    "duplicate definition: {} {}",
                    def.target_name, def.packet_name
                )));
            }
        }
        Ok(Self { definitions, index })
    }

    /// `(target, packet) -> definition | absent`
    pub fn lookup(&self, target_name: &str, packet_name: &str) -> Option<&CommandDefinition> {
        self.index
            .get(&(target_name.to_string(), packet_name.to_string()))
            .map(|&i| &self.definitions[i])
    }

    pub fn contains(&self, target_name: &str, packet_name: &str) -> bool {
        self.lookup(target_name, packet_name).is_some()
    }

    /// Definitions belonging to one target, in declaration order
    pub fn definitions_for<'a>(&'a self, target_name: &'a str) -> impl Iterator<Item = &'a CommandDefinition> + 'a {
        self.definitions.iter().filter(move |def| def.target_name == target_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandDefinition> {
        self.definitions.iter()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
