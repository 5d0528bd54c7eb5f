// Record trait for anything persisted as a keyed collection

use serde::{Serialize, de::DeserializeOwned};

/// Core trait that any storable record must implement
pub trait Record: Serialize + DeserializeOwned + Clone + 'static {
    /// Unique identifier for this record
    fn id(&self) -> &str;

    /// Collection name for this record type (e.g., "todos", "categories")
    /// Determines the storage key the collection lives under
    fn collection_name() -> &'static str
    where
        Self: Sized;
}

/// Return the first id that occurs more than once, if any
pub fn first_duplicate_id<T: Record>(records: &[T]) -> Option<&str> {
    let mut seen = std::collections::HashSet::new();
    records.iter().map(|r| r.id()).find(|id| !seen.insert(*id))
}
