use std::collections::BTreeMap;

/// In-order acknowledgment tracker.
///
/// Sequences are tracked in feed order as they are dispatched and may complete
/// in any order. A sequence is only released for acknowledgment once every
/// lower tracked sequence has been released, so a persisted cursor never gets
/// ahead of applied state.
#[derive(Debug, Default)]
pub struct Checkpoint {
    pending: BTreeMap<u64, bool>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, seq: u64) {
        self.pending.entry(seq).or_insert(false);
    }

    /// Mark `seq` finished and return every sequence that is now safe to
    /// acknowledge, lowest first. Unknown sequences are ignored.
    pub fn complete(&mut self, seq: u64) -> Vec<u64> {
        if let Some(done) = self.pending.get_mut(&seq) {
            *done = true;
        }

        let mut released = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            if !*entry.get() {
                break;
            }
            released.push(entry.remove_entry().0);
        }
        released
    }

    /// Tracked sequences not yet released.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}
