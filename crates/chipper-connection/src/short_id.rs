//! Connection-local short IDs for message Identifiers.
//!
//! The first time a type goes out on the stream, the sender mints a short
//! ID and ships it alongside the full Identifier. From then on the short ID
//! alone names the type on the stream. Datagrams never use short IDs: one
//! can overtake the stream frame that introduced the mapping.
//!
//! Each direction has its own numbering: the peer's short IDs live in
//! `incoming`, ours in `outgoing`. Both are one-to-one.

use std::collections::HashMap;

use chipper_protocol::{Identifier, ProtocolError};

/// Both halves of the short-ID table.
///
/// Owned by the I/O side of a connection; never shared.
#[derive(Debug)]
pub struct ShortIdTable {
    incoming: HashMap<i32, Identifier>,
    /// Reverse of `incoming`.
    learned: HashMap<Identifier, i32>,
    outgoing: HashMap<Identifier, i32>,
    next: i32,
}

impl ShortIdTable {
    pub fn new() -> Self {
        Self {
            incoming: HashMap::new(),
            learned: HashMap::new(),
            outgoing: HashMap::new(),
            next: 1,
        }
    }

    // --- incoming ---

    /// Records that the peer bound `short_id` to `id`.
    ///
    /// Re-announcing the same binding is harmless. Rebinding a short ID to a
    /// different Identifier, or giving an Identifier a second short ID, is a
    /// protocol violation. A sender mints each Identifier once, so the table
    /// never holds more entries than the protocol has message types.
    pub fn learn(&mut self, short_id: i32, id: &Identifier) -> Result<(), ProtocolError> {
        if short_id <= 0 {
            return Err(ProtocolError::InvalidShortId(short_id));
        }
        match self.incoming.get(&short_id) {
            Some(existing) if existing == id => return Ok(()),
            Some(existing) => {
                return Err(ProtocolError::ShortIdConflict {
                    short_id,
                    existing: existing.clone(),
                    received: id.clone(),
                });
            }
            None => {}
        }
        if let Some(&existing) = self.learned.get(id) {
            return Err(ProtocolError::ShortIdAlias {
                id: id.clone(),
                existing,
                received: short_id,
            });
        }
        tracing::trace!(short_id, %id, "learned short id");
        self.incoming.insert(short_id, id.clone());
        self.learned.insert(id.clone(), short_id);
        Ok(())
    }

    /// Looks up a short ID the peer sent.
    pub fn resolve(&self, short_id: i32) -> Result<&Identifier, ProtocolError> {
        self.incoming
            .get(&short_id)
            .ok_or(ProtocolError::UnknownShortId(short_id))
    }

    // --- outgoing ---

    /// Our short ID for `id`, if one was minted.
    pub fn outgoing(&self, id: &Identifier) -> Option<i32> {
        self.outgoing.get(id).copied()
    }

    /// Assigns the next short ID to `id`.
    ///
    /// Returns `None` once the positive `i32` range is used up; such types
    /// keep travelling in long form.
    pub fn mint(&mut self, id: &Identifier) -> Option<i32> {
        if let Some(existing) = self.outgoing(id) {
            return Some(existing);
        }
        let short_id = self.next;
        if short_id <= 0 {
            return None;
        }
        self.next = short_id.checked_add(1).unwrap_or(0);
        self.outgoing.insert(id.clone(), short_id);
        Some(short_id)
    }

    /// Number of learned and minted entries.
    pub fn sizes(&self) -> (usize, usize) {
        (self.incoming.len(), self.outgoing.len())
    }
}

impl Default for ShortIdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat() -> Identifier {
        Identifier::new("game", "chat")
    }

    fn moves() -> Identifier {
        Identifier::new("game", "move")
    }

    #[test]
    fn test_mint_is_sequential_and_stable() {
        let mut table = ShortIdTable::new();
        assert_eq!(table.mint(&chat()), Some(1));
        assert_eq!(table.mint(&moves()), Some(2));
        assert_eq!(table.mint(&chat()), Some(1));
        assert_eq!(table.outgoing(&moves()), Some(2));
        assert_eq!(table.sizes(), (0, 2));
    }

    #[test]
    fn test_learn_then_resolve() {
        let mut table = ShortIdTable::new();
        table.learn(4, &chat()).unwrap();
        table.learn(4, &chat()).unwrap();
        assert_eq!(table.resolve(4).unwrap(), &chat());
        assert_eq!(table.resolve(5).unwrap_err(), ProtocolError::UnknownShortId(5));
    }

    #[test]
    fn test_rebinding_is_a_conflict() {
        let mut table = ShortIdTable::new();
        table.learn(1, &chat()).unwrap();
        assert_eq!(
            table.learn(1, &moves()).unwrap_err(),
            ProtocolError::ShortIdConflict {
                short_id: 1,
                existing: chat(),
                received: moves(),
            }
        );
        assert_eq!(table.resolve(1).unwrap(), &chat());
    }

    #[test]
    fn test_second_short_id_for_same_identifier_is_rejected() {
        let mut table = ShortIdTable::new();
        table.learn(1, &chat()).unwrap();
        assert_eq!(
            table.learn(2, &chat()).unwrap_err(),
            ProtocolError::ShortIdAlias {
                id: chat(),
                existing: 1,
                received: 2,
            }
        );
        assert_eq!(table.sizes(), (1, 0));
        assert_eq!(table.resolve(2).unwrap_err(), ProtocolError::UnknownShortId(2));
    }

    #[test]
    fn test_non_positive_short_ids_are_rejected() {
        let mut table = ShortIdTable::new();
        assert_eq!(
            table.learn(0, &chat()).unwrap_err(),
            ProtocolError::InvalidShortId(0)
        );
    }

    #[test]
    fn test_mint_stops_when_range_is_exhausted() {
        let mut table = ShortIdTable::new();
        table.next = i32::MAX;
        assert_eq!(table.mint(&chat()), Some(i32::MAX));
        assert_eq!(table.mint(&moves()), None);
        assert_eq!(table.outgoing(&moves()), None);
    }
}
