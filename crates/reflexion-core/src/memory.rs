use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Entries retained per sequence.
pub const MEMORY_WINDOW: usize = 20;

/// Short-term scratch state for one run.
///
/// Purely advisory: the control loop never reads it to make decisions.
#[derive(Debug, Clone, Default)]
pub struct WorkingMemory {
    notes: VecDeque<String>,
    sources: VecDeque<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub notes: Vec<String>,
    pub sources: Vec<String>,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_note(&mut self, text: impl Into<String>) {
        push_bounded(&mut self.notes, text.into());
    }

    pub fn add_source(&mut self, text: impl Into<String>) {
        push_bounded(&mut self.sources, text.into());
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            notes: self.notes.iter().cloned().collect(),
            sources: self.sources.iter().cloned().collect(),
        }
    }
}

fn push_bounded(window: &mut VecDeque<String>, entry: String) {
    if window.len() == MEMORY_WINDOW {
        window.pop_front();
    }
    window.push_back(entry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_entries_first() {
        let mut memory = WorkingMemory::new();
        for idx in 0..25 {
            memory.add_note(format!("note {idx}"));
        }
        memory.add_source("https://arxiv.org/abs/1234");

        let snapshot = memory.snapshot();
        assert_eq!(snapshot.notes.len(), MEMORY_WINDOW);
        assert_eq!(snapshot.notes.first().map(String::as_str), Some("note 5"));
        assert_eq!(snapshot.notes.last().map(String::as_str), Some("note 24"));
        assert_eq!(snapshot.sources, vec!["https://arxiv.org/abs/1234"]);
    }
}
