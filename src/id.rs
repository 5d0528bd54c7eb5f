// Identifier generation for tasks, categories and subtasks

use uuid::Uuid;

/// Source of unique string identifiers
pub trait IdGenerator {
    fn next_id(&mut self) -> String;
}

/// Time-ordered UUID v7 identifiers
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&mut self) -> String {
        Uuid::now_v7().to_string()
    }
}

/// Deterministic `{prefix}-{n}` identifiers, starting at 1
#[derive(Debug, Clone)]
pub struct SequentialIds {
    prefix: String,
    next: u64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&mut self) -> String {
        let id = format!("{}-{}", self.prefix, self.next);
        self.next += 1;
        id
    }
}
