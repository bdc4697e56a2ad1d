//! Packet identification
//!
//! Resolves a raw buffer into a `(target, packet)` pair by structural
//! comparison against the command definition table.

use std::cmp::Reverse;
use std::sync::Arc;
use tcrlib::{CommandDefinition, DefinitionTable, Packet};

/// How a packet came to have (or lack) its names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identification {
    /// The interface tagged the packet before it reached the router
    PreIdentified,
    /// A definition in the table matched the buffer
    Matched,
    /// Nothing matched
    Unidentified,
}

/// Identifies packets against a shared, read-only definition table
#[derive(Debug, Clone)]
pub struct PacketIdentifier {
    table: Arc<DefinitionTable>,
}

impl PacketIdentifier {
    pub fn new(table: Arc<DefinitionTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &DefinitionTable {
        &self.table
    }

    /// Identify a packet in place.
    ///
    /// Packets that already carry names are left alone; whether those names
    /// are actually defined is for the caller to check.
    pub fn identify(&self, packet: &mut Packet, target_names: &[String]) -> Identification {
        if packet.is_identified() {
            return Identification::PreIdentified;
        }
        match self.find_match(packet.buffer(), target_names) {
            Some(def) => {
                packet.set_identity(def.target_name.as_str(), def.packet_name.as_str());
                Identification::Matched
            }
            None => Identification::Unidentified,
        }
    }

    /// Best matching definition among the given targets (all targets when
    /// empty). The most specific definition wins; ties go to the one
    /// declared first.
    pub fn find_match(&self, buffer: &[u8], target_names: &[String]) -> Option<&CommandDefinition> {
        self.table
            .iter()
            .filter(|def| target_names.is_empty() || target_names.iter().any(|t| *t == def.target_name))
            .filter(|def| def.matches(buffer))
            .min_by_key(|def| Reverse(def.specificity()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifier() -> PacketIdentifier {
        let table = DefinitionTable::new(vec![
            CommandDefinition::new("INST", "NOOP").with_id_item(0, vec![0x01]),
            CommandDefinition::new("INST", "COLLECT")
                .with_id_item(0, vec![0x01])
                .with_id_item(1, vec![0x10]),
            CommandDefinition::new("SAT", "PING").with_id_item(0, vec![0x01]),
            CommandDefinition::new("SAT", "RESET").with_length(3),
        ])
        .unwrap();
        PacketIdentifier::new(Arc::new(table))
    }

    #[test]
    fn test_most_specific_match_wins() {
        let id = identifier();
        let mut packet = Packet::new(vec![0x01, 0x10, 0x00]);
        assert_eq!(id.identify(&mut packet, &["INST".to_string()]), Identification::Matched);
        assert_eq!(packet.identity(), Some(("INST", "COLLECT")));
    }

    #[test]
    fn test_restricted_to_interface_targets() {
        let id = identifier();
        let mut packet = Packet::new(vec![0x01, 0x00]);
        id.identify(&mut packet, &["SAT".to_string()]);
        assert_eq!(packet.identity(), Some(("SAT", "PING")));
    }

    #[test]
    fn test_tie_goes_to_first_declared() {
        let id = identifier();
        let mut packet = Packet::new(vec![0x01, 0x00]);
        id.identify(&mut packet, &[]);
        assert_eq!(packet.identity(), Some(("INST", "NOOP")));
    }

    #[test]
    fn test_unidentified() {
        let id = identifier();
        let mut packet = Packet::new(vec![0x7F]);
        assert_eq!(id.identify(&mut packet, &[]), Identification::Unidentified);
        assert!(!packet.is_identified());
    }

    #[test]
    fn test_pre_identified_left_alone() {
        let id = identifier();
        let mut packet = Packet::identified(vec![0x01, 0x10], "BOB", "SMITH");
        assert_eq!(id.identify(&mut packet, &[]), Identification::PreIdentified);
        assert_eq!(packet.identity(), Some(("BOB", "SMITH")));
    }
}
