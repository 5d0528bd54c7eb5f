// TodoStore - per-user task and category state over a local key-value medium

pub mod calendar;
pub mod clock;
pub mod config;
pub mod error;
pub mod filter;
pub mod id;
pub mod models;
pub mod notify;
pub mod record;
pub mod snapshot;
pub mod stats;
pub mod storage;
pub mod store;

// Re-export main types for convenience
pub use clock::{Clock, FixedClock, SystemClock, Today};
pub use config::{Backend, Config};
pub use error::{Result, StoreError};
pub use filter::{CategoryFilter, DueFilter, FilterPatch, PriorityFilter, StatusFilter, TaskFilters};
pub use id::{IdGenerator, SequentialIds, UuidIds};
pub use models::{Category, CategoryDraft, CategoryPatch, Priority, SubTask, Task, TaskDraft, TaskPatch};
pub use notify::{Notification, Variant};
pub use record::Record;
pub use snapshot::Snapshot;
pub use stats::TaskStats;
pub use storage::{FileStorage, MemoryStorage, SqliteStorage, Storage};
pub use store::TaskStore;
