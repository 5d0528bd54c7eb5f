// Export/import wire format: {"tasks": [...], "categories": [...]}
//
// Import is validated up front into typed data; nothing touches the store
// until the whole payload has passed.

use crate::error::{Result, StoreError};
use crate::models::{Category, Priority, SubTask, Task, deserialize_due_date};
use crate::record::{Record, first_duplicate_id};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Task as it arrives in an import; the owner is optional because it is
/// re-stamped to the importing user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_due_date")]
    pub due_date: Option<DateTime<Utc>>,
    pub priority: Priority,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<SubTask>,
}

impl ImportedTask {
    pub fn into_task(self, user_id: &str) -> Task {
        Task {
            id: self.id,
            title: self.title,
            description: self.description,
            completed: self.completed,
            created_at: self.created_at,
            due_date: self.due_date,
            priority: self.priority,
            category_id: self.category_id,
            user_id: user_id.to_string(),
            subtasks: self.subtasks,
        }
    }
}

impl Record for ImportedTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn collection_name() -> &'static str {
        Task::collection_name()
    }
}

/// A validated import payload. `None` means the field was absent and the
/// matching collection must be left alone.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub tasks: Option<Vec<ImportedTask>>,
    pub categories: Option<Vec<Category>>,
}

#[derive(Serialize)]
struct ExportView<'a> {
    tasks: &'a [Task],
    categories: &'a [Category],
}

impl Snapshot {
    /// Render the current state in the wire format
    pub fn export(tasks: &[Task], categories: &[Category]) -> Result<String> {
        Ok(serde_json::to_string(&ExportView { tasks, categories })?)
    }

    /// Validate an import payload
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| StoreError::malformed(format!("not valid JSON: {}", e)))?;

        let mut root = match value {
            Value::Object(root) => root,
            other => {
                return Err(StoreError::malformed(format!(
                    "top level must be an object, found {}",
                    kind_of(&other)
                )));
            }
        };

        let tasks: Option<Vec<ImportedTask>> = take_array(&mut root, "tasks")?;
        let mut categories: Option<Vec<Category>> = take_array(&mut root, "categories")?;

        if let Some(tasks) = &tasks {
            check_unique("tasks", tasks)?;
        }
        if let Some(categories) = categories.as_mut() {
            check_unique("categories", categories)?;
            for category in categories.iter_mut() {
                category.count = 0;
            }
        }

        Ok(Self { tasks, categories })
    }

    /// Split into store-ready collections, owning every task as `user_id`
    pub fn into_parts(self, user_id: &str) -> (Option<Vec<Task>>, Option<Vec<Category>>) {
        let tasks = self
            .tasks
            .map(|tasks| tasks.into_iter().map(|t| t.into_task(user_id)).collect());
        (tasks, self.categories)
    }
}

fn take_array<T: DeserializeOwned>(root: &mut Map<String, Value>, field: &str) -> Result<Option<Vec<T>>> {
    match root.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value(item).map_err(|e| StoreError::malformed(format!("{}[{}]: {}", field, i, e)))
            })
            .collect::<Result<Vec<T>>>()
            .map(Some),
        Some(other) => Err(StoreError::malformed(format!(
            "'{}' must be an array, found {}",
            field,
            kind_of(&other)
        ))),
    }
}

fn check_unique<T: Record>(field: &str, records: &[T]) -> Result<()> {
    match first_duplicate_id(records) {
        Some(id) => Err(StoreError::malformed(format!("duplicate id '{}' in {}", id, field))),
        None => Ok(()),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
