//! Opcode → handler registry.

use std::fmt;

use crate::{ByteCursor, ProtocolError};

/// A packet handler. It receives a cursor positioned at the first payload
/// byte and may fail with a [`ProtocolError`], which is reported for that
/// packet only.
pub type Handler = Box<dyn FnMut(&mut ByteCursor<'_>) -> Result<(), ProtocolError> + Send>;

/// Handlers for up to 256 opcodes.
///
/// Game-logic modules fill the table at startup; each connection gets its
/// own table, so a login connection and a game connection never share
/// registrations.
pub struct HandlerTable {
    slots: Vec<Option<Handler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self {
            slots: (0..256).map(|_| None).collect(),
        }
    }

    /// Registers `handler` for `opcode`, returning the handler it replaced.
    pub fn register<F>(&mut self, opcode: u8, handler: F) -> Option<Handler>
    where
        F: FnMut(&mut ByteCursor<'_>) -> Result<(), ProtocolError> + Send + 'static,
    {
        self.slots[opcode as usize].replace(Box::new(handler))
    }

    pub fn unregister(&mut self, opcode: u8) -> Option<Handler> {
        self.slots[opcode as usize].take()
    }

    pub fn contains(&self, opcode: u8) -> bool {
        self.slots[opcode as usize].is_some()
    }

    pub fn get_mut(&mut self, opcode: u8) -> Option<&mut Handler> {
        self.slots[opcode as usize].as_mut()
    }

    /// Number of registered opcodes.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opcodes: Vec<String> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(op, _)| format!("{op:#04x}"))
            .collect();
        f.debug_struct("HandlerTable").field("opcodes", &opcodes).finish()
    }
}
