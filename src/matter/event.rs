//! Event table entries.

/// Event declared by a cluster. Only the id is tracked; event payloads are
/// produced by the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    id: u32,
}

impl Event {
    pub(crate) fn new(id: u32) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}
