// Task store: in-memory task/category state mirrored to a key-value medium

use crate::clock::{Clock, SystemClock, Today};
use crate::error::{Result, StoreError};
use crate::filter::{FilterPatch, TaskFilters, apply_filters};
use crate::id::{IdGenerator, UuidIds};
use crate::models::{Category, CategoryDraft, CategoryPatch, SubTask, Task, TaskDraft, TaskPatch, default_categories};
use crate::notify::Notification;
use crate::record::Record;
use crate::snapshot::Snapshot;
use crate::storage::{self, SELF_TEST_KEY, Storage};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

/// Authoritative holder of the current user's tasks, all categories, the
/// active filters and the filtered view.
///
/// Tasks are persisted per user: the `todos` key holds every user's tasks
/// and a save only replaces the entries owned by the current user.
/// Categories are global and are written whole.
pub struct TaskStore {
    storage: Box<dyn Storage>,
    ids: Box<dyn IdGenerator>,
    clock: Box<dyn Clock>,
    current_user: Option<String>,
    tasks: Vec<Task>,
    /// Current user's stored entries that failed to decode, written back verbatim
    undecodable: Vec<Value>,
    /// Ids of stored tasks not held in `tasks`
    reserved_ids: HashSet<String>,
    filtered: Vec<Task>,
    categories: Vec<Category>,
    filters: TaskFilters,
    notifications: Vec<Notification>,
    storage_ok: bool,
    tasks_dirty: bool,
    categories_dirty: bool,
    revision: u64,
}

impl TaskStore {
    /// Open a store over the given medium
    ///
    /// Sweeps leftover self-test keys, then runs the storage self-test. A
    /// failing medium does not prevent opening: the store runs in unsaved
    /// mode and queues a notification.
    pub fn open(storage: impl Storage + 'static) -> Self {
        let mut store = Self {
            storage: Box::new(storage),
            ids: Box::new(UuidIds),
            clock: Box::new(SystemClock),
            current_user: None,
            tasks: Vec::new(),
            undecodable: Vec::new(),
            reserved_ids: HashSet::new(),
            filtered: Vec::new(),
            categories: default_categories(),
            filters: TaskFilters::default(),
            notifications: Vec::new(),
            storage_ok: true,
            tasks_dirty: false,
            categories_dirty: false,
            revision: 0,
        };
        store.check_storage();
        store
    }

    pub fn with_ids(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Box::new(ids);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn check_storage(&mut self) {
        if let Err(e) = storage::sweep(&mut *self.storage, SELF_TEST_KEY) {
            warn!(error = %e, "Failed to sweep stale storage keys");
        }

        if let Err(e) = storage::self_test(&mut *self.storage) {
            error!(error = %e, "Storage self-test failed");
            self.storage_ok = false;
            self.notify(Notification::destructive(
                "Storage Error",
                "Your storage is not working properly. Tasks may not be saved.",
            ));
        }
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Establish a session: load the user's tasks and the categories
    pub fn begin_session(&mut self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        info!(user = %user_id, "Beginning session");
        self.tasks_dirty = false;
        self.categories_dirty = false;

        self.tasks = self.load_tasks(&user_id);
        self.current_user = Some(user_id);
        self.load_categories();
        self.filters = TaskFilters::default();

        self.recount();
        self.refilter();
        self.bump();
    }

    /// Tear down the session. Categories stay loaded.
    pub fn end_session(&mut self) {
        if let Some(user) = self.current_user.take() {
            info!(user = %user, "Ending session");
        }
        self.tasks.clear();
        self.undecodable.clear();
        self.reserved_ids.clear();
        self.filtered.clear();
        self.filters = TaskFilters::default();
        self.tasks_dirty = false;
        self.recount();
        self.bump();
    }

    /// Decode the user's entries from the stored collection. Also records the
    /// user's undecodable entries and the ids of every entry not loaded.
    fn load_tasks(&mut self, user_id: &str) -> Vec<Task> {
        self.undecodable.clear();
        self.reserved_ids.clear();

        let raw = match self.storage.get(Task::collection_name()) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No tasks persisted yet");
                return Vec::new();
            }
            Err(e) => {
                self.tasks_dirty = true;
                self.report_storage_error("Storage Error", "Your tasks couldn't be loaded.", &e);
                return Vec::new();
            }
        };

        let items: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(items) => items,
            Err(e) => {
                self.tasks_dirty = true;
                self.report_storage_error("Storage Error", "Your saved tasks are unreadable.", &e.into());
                return Vec::new();
            }
        };

        let mut tasks = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            let decoded = if owner_of(&item) == Some(user_id) {
                match serde_json::from_value::<Task>(item.clone()) {
                    Ok(task) => Some(task),
                    Err(e) => {
                        warn!(index, error = %e, "Failed to parse stored task, keeping it as is");
                        None
                    }
                }
            } else {
                None
            };

            match decoded {
                Some(task) => tasks.push(task),
                None => {
                    if let Some(id) = id_of(&item) {
                        self.reserved_ids.insert(id.to_string());
                    }
                    if owner_of(&item) == Some(user_id) {
                        self.undecodable.push(item);
                    }
                }
            }
        }

        info!(
            user = user_id,
            count = tasks.len(),
            undecodable = self.undecodable.len(),
            "Loaded tasks from storage"
        );
        tasks
    }

    fn load_categories(&mut self) {
        match storage::read_collection::<Category>(&*self.storage) {
            Ok(Some(categories)) => {
                debug!(count = categories.len(), "Loaded categories from storage");
                self.categories = categories;
            }
            Ok(None) => {
                info!("No categories persisted, seeding defaults");
                self.categories = default_categories();
                self.save_categories();
            }
            Err(e) => {
                self.categories_dirty = true;
                self.report_storage_error("Storage Error", "Your categories couldn't be loaded.", &e);
            }
        }
    }

    fn require_user(&mut self, action: &'static str) -> Result<String> {
        if let Some(user) = &self.current_user {
            return Ok(user.clone());
        }

        warn!(action, "Rejected task operation without a session");
        self.notify(Notification::destructive(
            "Authentication required",
            format!("You need to be logged in to {}.", action),
        ));
        Err(StoreError::AuthRequired { action })
    }

    // ========================================================================
    // Read access
    // ========================================================================

    pub fn current_user(&self) -> Option<&str> {
        self.current_user.as_deref()
    }

    /// The current user's tasks, most recent first
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// The tasks passing the active filters
    pub fn filtered_tasks(&self) -> &[Task] {
        &self.filtered
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn active_filters(&self) -> &TaskFilters {
        &self.filters
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn today(&self) -> Today {
        self.clock.today()
    }

    pub fn storage(&self) -> &dyn Storage {
        &*self.storage
    }

    /// True when the medium failed its self-test or the last write failed
    pub fn is_unsaved(&self) -> bool {
        !self.storage_ok || self.tasks_dirty || self.categories_dirty
    }

    /// Incremented on every state change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Drain queued notifications, oldest first
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    /// Add a task for the current user, at the front of the list
    pub fn add_task(&mut self, draft: TaskDraft) -> Result<Task> {
        let user_id = self.require_user("add tasks")?;
        let id = self.fresh_task_id();
        let task = Task::from_draft(draft, id, self.clock.now(), user_id);
        debug!(task_id = %task.id, user = %task.user_id, "Adding task");

        self.tasks.insert(0, task.clone());
        self.tasks_changed();
        self.notify(Notification::success("Task added", "Your task has been added successfully."));
        Ok(task)
    }

    /// Merge fields into a task. Returns false if no task has this id.
    pub fn update_task(&mut self, id: &str, patch: TaskPatch) -> Result<bool> {
        self.require_user("update tasks")?;
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            debug!(task_id = id, "update_task: no such task");
            return Ok(false);
        };
        patch.apply_to(task);

        self.tasks_changed();
        self.notify(Notification::success("Task updated", "Your task has been updated successfully."));
        Ok(true)
    }

    pub fn delete_task(&mut self, id: &str) -> Result<bool> {
        self.require_user("delete tasks")?;
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        if self.tasks.len() == before {
            debug!(task_id = id, "delete_task: no such task");
            return Ok(false);
        }

        self.tasks_changed();
        self.notify(Notification::success("Task deleted", "Your task has been deleted."));
        Ok(true)
    }

    pub fn toggle_task_completion(&mut self, id: &str) -> Result<bool> {
        self.require_user("update tasks")?;
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) else {
            debug!(task_id = id, "toggle_task_completion: no such task");
            return Ok(false);
        };
        task.completed = !task.completed;

        self.tasks_changed();
        Ok(true)
    }

    // ========================================================================
    // Subtasks
    // ========================================================================

    /// Append a subtask. Returns its id, or None if the parent is missing.
    pub fn add_subtask(&mut self, task_id: &str, title: impl Into<String>) -> Result<Option<String>> {
        self.require_user("update tasks")?;
        let Some(index) = self.tasks.iter().position(|t| t.id == task_id) else {
            debug!(task_id, "add_subtask: no such task");
            return Ok(None);
        };

        let subtask_id = loop {
            let id = self.ids.next_id();
            if !self.tasks[index].subtasks.iter().any(|s| s.id == id) {
                break id;
            }
        };
        self.tasks[index].subtasks.push(SubTask {
            id: subtask_id.clone(),
            title: title.into(),
            completed: false,
        });

        self.tasks_changed();
        Ok(Some(subtask_id))
    }

    pub fn update_subtask(&mut self, task_id: &str, subtask_id: &str, completed: bool) -> Result<bool> {
        self.require_user("update tasks")?;
        let Some(subtask) = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .and_then(|t| t.subtasks.iter_mut().find(|s| s.id == subtask_id))
        else {
            debug!(task_id, subtask_id, "update_subtask: no such subtask");
            return Ok(false);
        };
        subtask.completed = completed;

        self.tasks_changed();
        Ok(true)
    }

    pub fn delete_subtask(&mut self, task_id: &str, subtask_id: &str) -> Result<bool> {
        self.require_user("update tasks")?;
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) else {
            debug!(task_id, "delete_subtask: no such task");
            return Ok(false);
        };
        let before = task.subtasks.len();
        task.subtasks.retain(|s| s.id != subtask_id);
        if task.subtasks.len() == before {
            return Ok(false);
        }

        self.tasks_changed();
        Ok(true)
    }

    // ========================================================================
    // Categories
    // ========================================================================

    pub fn add_category(&mut self, draft: CategoryDraft) -> Category {
        let id = loop {
            let id = self.ids.next_id();
            if self.category(&id).is_none() {
                break id;
            }
        };
        let mut category = Category::from_draft(draft, id);
        category.count = self.count_in(&category.id);
        debug!(category_id = %category.id, name = %category.name, "Adding category");

        self.categories.push(category.clone());
        self.save_categories();
        self.bump();
        self.notify(Notification::success(
            "Category added",
            "Your category has been added successfully.",
        ));
        category
    }

    pub fn update_category(&mut self, id: &str, patch: CategoryPatch) -> bool {
        let Some(category) = self.categories.iter_mut().find(|c| c.id == id) else {
            debug!(category_id = id, "update_category: no such category");
            return false;
        };
        patch.apply_to(category);

        self.save_categories();
        self.bump();
        self.notify(Notification::success(
            "Category updated",
            "Your category has been updated successfully.",
        ));
        true
    }

    /// Remove a category and clear it from every task that referenced it.
    /// The tasks themselves are kept.
    pub fn delete_category(&mut self, id: &str) -> bool {
        let mut detached = 0;
        for task in self.tasks.iter_mut().filter(|t| t.category_id.as_deref() == Some(id)) {
            task.category_id = None;
            detached += 1;
        }
        if detached > 0 {
            debug!(category_id = id, detached, "Cleared category from tasks");
            self.refilter();
            self.persist_tasks();
        }

        let before = self.categories.len();
        self.categories.retain(|c| c.id != id);
        let removed = self.categories.len() != before;
        if !removed && detached == 0 {
            debug!(category_id = id, "delete_category: no such category");
            return false;
        }

        self.save_categories();
        self.bump();
        if removed {
            self.notify(Notification::success("Category deleted", "Your category has been deleted."));
        }
        removed
    }

    // ========================================================================
    // Filtering
    // ========================================================================

    pub fn filter_tasks(&mut self, patch: FilterPatch) {
        self.filters.merge(patch);
        debug!(filters = %self.filters, "Applying filters");
        self.refilter();
        self.bump();
    }

    pub fn search_tasks(&mut self, query: impl Into<String>) {
        self.filter_tasks(FilterPatch {
            search_query: Some(query.into()),
            ..Default::default()
        });
    }

    pub fn clear_filters(&mut self) {
        self.filters = TaskFilters::default();
        self.refilter();
        self.bump();
    }

    // ========================================================================
    // Import / export
    // ========================================================================

    /// Serialize the current user's tasks and all categories
    pub fn export_tasks(&self) -> Result<String> {
        Snapshot::export(&self.tasks, &self.categories)
    }

    /// Replace tasks and/or categories from an exported blob. A payload
    /// that fails validation changes nothing.
    pub fn import_tasks(&mut self, text: &str) -> Result<()> {
        let user_id = self.require_user("import tasks")?;
        let snapshot = match Snapshot::parse(text) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Import rejected");
                self.notify(Notification::destructive(
                    "Import failed",
                    "There was an error importing your data. Please check the format.",
                ));
                return Err(e);
            }
        };

        let (tasks, categories) = snapshot.into_parts(&user_id);
        let replace_tasks = tasks.is_some();
        let replace_categories = categories.is_some();
        if let Some(tasks) = tasks {
            self.tasks = tasks;
            self.undecodable.clear();
        }
        if let Some(categories) = categories {
            self.categories = categories;
        }
        info!(
            user = %user_id,
            tasks = self.tasks.len(),
            categories = self.categories.len(),
            replace_tasks,
            replace_categories,
            "Imported snapshot"
        );

        let recounted = self.recount();
        self.refilter();
        if replace_tasks {
            self.persist_tasks();
        }
        if replace_categories || recounted {
            self.save_categories();
        }
        self.bump();
        self.notify(Notification::success(
            "Import successful",
            "Your tasks and categories have been imported.",
        ));
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn fresh_task_id(&mut self) -> String {
        loop {
            let id = self.ids.next_id();
            if self.task(&id).is_none() && !self.reserved_ids.contains(&id) {
                return id;
            }
        }
    }

    /// Recount, refilter and persist after any change to the task list
    fn tasks_changed(&mut self) {
        if self.recount() {
            self.save_categories();
        }
        self.refilter();
        self.persist_tasks();
        self.bump();
    }

    fn count_in(&self, category_id: &str) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.category_id.as_deref() == Some(category_id))
            .count()
    }

    /// Recompute every category count. Returns true if any count changed.
    fn recount(&mut self) -> bool {
        let counts: Vec<usize> = self.categories.iter().map(|c| self.count_in(&c.id)).collect();
        let mut changed = false;
        for (category, count) in self.categories.iter_mut().zip(counts) {
            if category.count != count {
                category.count = count;
                changed = true;
            }
        }
        changed
    }

    fn refilter(&mut self) {
        let today = self.clock.today();
        self.filtered = apply_filters(&self.tasks, &self.filters, &today);
    }

    fn persist_tasks(&mut self) {
        let Some(user_id) = self.current_user.clone() else {
            return;
        };
        match self.write_merged_tasks(&user_id) {
            Ok(()) => self.tasks_dirty = false,
            Err(e) => {
                self.tasks_dirty = true;
                self.report_storage_error(
                    "Error saving tasks",
                    "Your tasks couldn't be saved. Please try again or check storage settings.",
                    &e,
                );
            }
        }
    }

    /// Replace the current user's entries in the persisted collection,
    /// leaving every other user's entries as they were
    fn write_merged_tasks(&mut self, user_id: &str) -> Result<()> {
        let key = Task::collection_name();
        let mut merged: Vec<Value> = match self.storage.get(key)? {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(items) => items,
                Err(e) => {
                    warn!(key, error = %e, "Persisted tasks are unreadable, replacing them");
                    Vec::new()
                }
            },
        };

        merged.retain(|item| owner_of(item) != Some(user_id));
        let others = merged.len();
        self.reserved_ids = merged.iter().filter_map(id_of).map(str::to_string).collect();
        for item in &self.undecodable {
            if let Some(id) = id_of(item) {
                self.reserved_ids.insert(id.to_string());
            }
            merged.push(item.clone());
        }
        for task in &self.tasks {
            merged.push(serde_json::to_value(task)?);
        }

        self.storage.set(key, &serde_json::to_string(&merged)?)?;
        debug!(user = user_id, own = self.tasks.len(), others, "Saved tasks");
        Ok(())
    }

    fn save_categories(&mut self) {
        match storage::write_collection(&mut *self.storage, &self.categories) {
            Ok(()) => self.categories_dirty = false,
            Err(e) => {
                self.categories_dirty = true;
                self.report_storage_error("Error saving categories", "Your categories couldn't be saved.", &e);
            }
        }
    }

    fn report_storage_error(&mut self, title: &str, description: &str, err: &StoreError) {
        error!(error = %err, "{}", title);
        self.notify(Notification::destructive(title, description));
    }

    fn notify(&mut self, notification: Notification) {
        debug!(title = %notification.title, variant = ?notification.variant, "Queued notification");
        self.notifications.push(notification);
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}

fn owner_of(item: &Value) -> Option<&str> {
    item.get("userId").and_then(Value::as_str)
}

fn id_of(item: &Value) -> Option<&str> {
    item.get("id").and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::filter::{DueFilter, PriorityFilter, StatusFilter};
    use crate::id::SequentialIds;
    use crate::models::Priority;
    use crate::notify::Variant;
    use crate::storage::MemoryStorage;
    use chrono::{TimeZone, Utc};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn clock() -> FixedClock {
        // Wednesday
        FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 17, 10, 0, 0).unwrap())
    }

    fn store_over(storage: impl Storage + 'static) -> TaskStore {
        TaskStore::open(storage)
            .with_ids(SequentialIds::new("id"))
            .with_clock(clock())
    }

    fn session(user: &str) -> TaskStore {
        let mut store = store_over(MemoryStorage::new());
        store.begin_session(user);
        store.take_notifications();
        store
    }

    fn persisted_tasks(store: &TaskStore) -> Vec<Value> {
        let raw = store.storage().get("todos").unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    fn titles(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.title.as_str()).collect()
    }

    /// Shared-state medium whose writes can be made to fail
    #[derive(Clone, Default)]
    struct FlakyStorage {
        inner: Rc<RefCell<MemoryStorage>>,
        fail_writes: Rc<Cell<bool>>,
    }

    impl Storage for FlakyStorage {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.borrow().get(key)
        }

        fn set(&mut self, key: &str, value: &str) -> Result<()> {
            if self.fail_writes.get() {
                return Err(StoreError::Io(std::io::Error::other("quota exceeded")));
            }
            self.inner.borrow_mut().set(key, value)
        }

        fn remove(&mut self, key: &str) -> Result<()> {
            self.inner.borrow_mut().remove(key)
        }

        fn keys(&self) -> Result<Vec<String>> {
            self.inner.borrow().keys()
        }
    }

    #[test]
    fn test_add_task_requires_session() {
        let mut store = store_over(MemoryStorage::new());
        let err = store.add_task(TaskDraft::new("Orphan")).unwrap_err();

        assert!(matches!(err, StoreError::AuthRequired { .. }));
        assert!(store.tasks().is_empty());
        let notes = store.take_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Authentication required");
        assert!(notes[0].is_error());
    }

    #[test]
    fn test_add_task_stamps_fields_and_prepends() {
        let mut store = session("u1");
        let first = store.add_task(TaskDraft::new("First")).unwrap();
        let second = store.add_task(TaskDraft::new("Second").with_priority(Priority::High)).unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.user_id, "u1");
        assert_eq!(first.created_at, clock().now());
        assert_eq!(titles(store.tasks()), ["Second", "First"]);
        assert_eq!(titles(store.filtered_tasks()), ["Second", "First"]);

        let notes = store.take_notifications();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].title, "Task added");
        assert_eq!(notes[0].variant, Variant::Success);
    }

    #[test]
    fn test_update_task_merges_and_keeps_created_at() {
        let mut store = session("u1");
        let task = store.add_task(TaskDraft::new("Draft report").with_description("v1")).unwrap();

        let patch = TaskPatch {
            title: Some("Final report".to_string()),
            priority: Some(Priority::High),
            ..Default::default()
        };
        assert!(store.update_task(&task.id, patch).unwrap());

        let updated = store.task(&task.id).unwrap();
        assert_eq!(updated.title, "Final report");
        assert_eq!(updated.description.as_deref(), Some("v1"));
        assert_eq!(updated.created_at, task.created_at);
        assert_eq!(updated.user_id, "u1");
    }

    #[test]
    fn test_missing_ids_are_silent_no_ops() {
        let mut store = session("u1");
        store.add_task(TaskDraft::new("Only")).unwrap();
        store.take_notifications();
        let revision = store.revision();

        assert!(!store.update_task("nope", TaskPatch::default()).unwrap());
        assert!(!store.delete_task("nope").unwrap());
        assert!(!store.toggle_task_completion("nope").unwrap());
        assert!(!store.update_category("nope", CategoryPatch::default()));

        assert_eq!(store.tasks().len(), 1);
        assert!(store.take_notifications().is_empty());
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn test_delete_and_toggle() {
        let mut store = session("u1");
        let keep = store.add_task(TaskDraft::new("Keep")).unwrap();
        let drop = store.add_task(TaskDraft::new("Drop")).unwrap();

        assert!(store.toggle_task_completion(&keep.id).unwrap());
        assert!(store.task(&keep.id).unwrap().completed);
        assert!(store.toggle_task_completion(&keep.id).unwrap());
        assert!(!store.task(&keep.id).unwrap().completed);

        assert!(store.delete_task(&drop.id).unwrap());
        assert_eq!(titles(store.tasks()), ["Keep"]);
        assert_eq!(persisted_tasks(&store).len(), 1);
    }

    #[test]
    fn test_filter_by_status_and_priority() {
        let mut store = session("u1");
        store.add_task(TaskDraft::new("done high").with_priority(Priority::High).completed()).unwrap();
        store.add_task(TaskDraft::new("done low").with_priority(Priority::Low).completed()).unwrap();
        store.add_task(TaskDraft::new("open high").with_priority(Priority::High)).unwrap();

        store.filter_tasks(FilterPatch {
            status: Some(StatusFilter::Completed),
            ..Default::default()
        });
        assert_eq!(titles(store.filtered_tasks()), ["done low", "done high"]);

        store.filter_tasks(FilterPatch {
            priority: Some(PriorityFilter::Only(Priority::High)),
            ..Default::default()
        });
        assert_eq!(titles(store.filtered_tasks()), ["done high"]);

        // New tasks are run through the active filters
        store.add_task(TaskDraft::new("open low")).unwrap();
        assert_eq!(titles(store.filtered_tasks()), ["done high"]);

        store.clear_filters();
        assert!(store.active_filters().is_default());
        assert_eq!(store.filtered_tasks().len(), 4);
    }

    #[test]
    fn test_search_tasks() {
        let mut store = session("u1");
        store.add_task(TaskDraft::new("Buy milk")).unwrap();
        store.add_task(TaskDraft::new("Groceries").with_description("remember milk")).unwrap();
        store.add_task(TaskDraft::new("Eggs")).unwrap();

        store.search_tasks("milk");
        assert_eq!(titles(store.filtered_tasks()), ["Groceries", "Buy milk"]);
        assert_eq!(store.active_filters().search_query, "milk");

        store.search_tasks("");
        assert_eq!(store.filtered_tasks().len(), 3);
    }

    #[test]
    fn test_due_filter_uses_clock() {
        let mut store = session("u1");
        let today = store.today();
        store
            .add_task(TaskDraft::new("today").with_due_date(today.start_of(today.date())))
            .unwrap();
        store
            .add_task(TaskDraft::new("later").with_due_date(Utc.with_ymd_and_hms(2024, 1, 30, 9, 0, 0).unwrap()))
            .unwrap();
        store.add_task(TaskDraft::new("undated")).unwrap();

        store.filter_tasks(FilterPatch {
            due: Some(DueFilter::Today),
            ..Default::default()
        });
        assert_eq!(titles(store.filtered_tasks()), ["today"]);

        store.filter_tasks(FilterPatch {
            due: Some(DueFilter::Month),
            ..Default::default()
        });
        assert_eq!(titles(store.filtered_tasks()), ["later", "today"]);
    }

    #[test]
    fn test_category_counts_follow_tasks() {
        let mut store = session("u1");
        let task = store.add_task(TaskDraft::new("Standup").with_category("cat-1")).unwrap();
        store.add_task(TaskDraft::new("Gym").with_category("cat-4")).unwrap();
        assert_eq!(store.category("cat-1").unwrap().count, 1);
        assert_eq!(store.category("cat-4").unwrap().count, 1);

        let patch = TaskPatch {
            category_id: Some(Some("cat-4".to_string())),
            ..Default::default()
        };
        store.update_task(&task.id, patch).unwrap();
        assert_eq!(store.category("cat-1").unwrap().count, 0);
        assert_eq!(store.category("cat-4").unwrap().count, 2);

        // Counts ignore the active filters
        store.search_tasks("nothing matches");
        assert_eq!(store.category("cat-4").unwrap().count, 2);
    }

    #[test]
    fn test_delete_category_detaches_tasks() {
        let mut store = session("u1");
        for title in ["a", "b", "c"] {
            store.add_task(TaskDraft::new(title).with_category("cat-1")).unwrap();
        }
        store.add_task(TaskDraft::new("d").with_category("cat-2")).unwrap();
        assert_eq!(store.category("cat-1").unwrap().count, 3);

        assert!(store.delete_category("cat-1"));

        assert!(store.category("cat-1").is_none());
        assert_eq!(store.tasks().len(), 4);
        let detached = store.tasks().iter().filter(|t| t.category_id.is_none()).count();
        assert_eq!(detached, 3);
        assert_eq!(store.category("cat-2").unwrap().count, 1);

        // Detachment is persisted
        let stored = persisted_tasks(&store);
        assert_eq!(stored.iter().filter(|t| t.get("categoryId").is_none()).count(), 3);
    }

    #[test]
    fn test_category_crud_without_session() {
        let mut store = store_over(MemoryStorage::new());
        let category = store.add_category(CategoryDraft::new("Errands", "teal"));
        assert_eq!(store.categories().len(), 5);

        let patch = CategoryPatch {
            name: Some("Chores".to_string()),
            ..Default::default()
        };
        assert!(store.update_category(&category.id, patch));
        assert_eq!(store.category(&category.id).unwrap().name, "Chores");
        assert_eq!(store.category(&category.id).unwrap().color, "teal");

        let stored: Vec<Category> = storage::read_collection(store.storage()).unwrap().unwrap();
        assert_eq!(stored.len(), 5);
        assert!(stored.iter().any(|c| c.name == "Chores"));

        assert!(store.delete_category(&category.id));
        assert!(!store.delete_category(&category.id));
        assert_eq!(store.categories().len(), 4);
    }

    #[test]
    fn test_subtasks() {
        let mut store = session("u1");
        let task = store.add_task(TaskDraft::new("Pack")).unwrap();

        let socks = store.add_subtask(&task.id, "Socks").unwrap().unwrap();
        let shirt = store.add_subtask(&task.id, "Shirt").unwrap().unwrap();
        assert_ne!(socks, shirt);

        assert!(store.update_subtask(&task.id, &socks, true).unwrap());
        assert!(store.delete_subtask(&task.id, &shirt).unwrap());

        let subtasks = &store.task(&task.id).unwrap().subtasks;
        assert_eq!(subtasks.len(), 1);
        assert_eq!(subtasks[0].title, "Socks");
        assert!(subtasks[0].completed);

        // Missing parent or child is a no-op
        assert_eq!(store.add_subtask("nope", "x").unwrap(), None);
        assert!(!store.update_subtask(&task.id, "nope", true).unwrap());
        assert!(!store.delete_subtask("nope", &socks).unwrap());

        let stored = persisted_tasks(&store);
        assert_eq!(stored[0]["subtasks"][0]["title"], "Socks");
    }

    #[test]
    fn test_import_restamps_owner() {
        let mut store = session("u1");
        store
            .import_tasks(
                r#"{"tasks":[{"id":"t1","title":"X","completed":false,"createdAt":"2024-01-01T00:00:00Z","priority":"low","userId":"other"}],"categories":[]}"#,
            )
            .unwrap();

        assert_eq!(store.tasks().len(), 1);
        assert_eq!(store.tasks()[0].user_id, "u1");
        assert!(store.categories().is_empty());
        assert_eq!(store.take_notifications()[0].title, "Import successful");
    }

    #[test]
    fn test_import_garbage_changes_nothing() {
        let mut store = session("u1");
        store.add_task(TaskDraft::new("Precious")).unwrap();
        store.take_notifications();
        let before = store.tasks().to_vec();
        let revision = store.revision();

        let err = store.import_tasks("not json").unwrap_err();
        assert!(matches!(err, StoreError::MalformedImport { .. }));
        assert_eq!(store.tasks(), before.as_slice());
        assert_eq!(store.categories().len(), 4);
        assert_eq!(store.revision(), revision);

        let notes = store.take_notifications();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].title, "Import failed");
    }

    #[test]
    fn test_import_without_tasks_keeps_tasks() {
        let mut store = session("u1");
        store.add_task(TaskDraft::new("Stay").with_category("c9")).unwrap();

        store
            .import_tasks(r#"{"categories":[{"id":"c9","name":"Imported","color":"red"}]}"#)
            .unwrap();

        assert_eq!(titles(store.tasks()), ["Stay"]);
        assert_eq!(store.categories().len(), 1);
        assert_eq!(store.category("c9").unwrap().count, 1);
    }

    #[test]
    fn test_export_import_round_trip() {
        let mut store = session("u1");
        let task = store.add_task(TaskDraft::new("Trip").with_category("cat-2")).unwrap();
        store.add_subtask(&task.id, "Tickets").unwrap();
        store.add_category(CategoryDraft::new("Travel", "#123456"));
        let tasks = store.tasks().to_vec();
        let categories = store.categories().to_vec();

        let blob = store.export_tasks().unwrap();

        let mut other = session("u1");
        other.import_tasks(&blob).unwrap();
        assert_eq!(other.tasks(), tasks.as_slice());
        assert_eq!(other.categories(), categories.as_slice());
    }

    #[test]
    fn test_new_ids_skip_imported_ids() {
        let mut store = session("u1");
        store
            .import_tasks(
                r#"{"tasks":[{"id":"id-1","title":"Imported","completed":false,"createdAt":"2024-01-01T00:00:00Z","priority":"low"}]}"#,
            )
            .unwrap();

        let task = store.add_task(TaskDraft::new("Fresh")).unwrap();
        assert_eq!(task.id, "id-2");
    }

    #[test]
    fn test_save_merges_with_other_users() {
        let mut storage = MemoryStorage::new();
        storage
            .set(
                "todos",
                r#"[
                    {"id":"o1","title":"Theirs","completed":false,"createdAt":"2024-01-01T00:00:00Z","priority":"low","userId":"u2","pinned":true},
                    {"id":"m1","title":"Mine","completed":false,"createdAt":"2024-01-01T00:00:00Z","priority":"low","userId":"u1"}
                ]"#,
            )
            .unwrap();

        let mut store = store_over(storage);
        store.begin_session("u1");
        assert_eq!(titles(store.tasks()), ["Mine"]);

        store.add_task(TaskDraft::new("Also mine")).unwrap();
        store.delete_task("m1").unwrap();

        let stored = persisted_tasks(&store);
        assert_eq!(stored.len(), 2);
        // Other users' entries are preserved verbatim, unknown fields included
        assert_eq!(stored[0]["id"], "o1");
        assert_eq!(stored[0]["pinned"], true);
        assert_eq!(stored[1]["title"], "Also mine");
        assert_eq!(stored[1]["userId"], "u1");
    }

    #[test]
    fn test_sessions_are_isolated() {
        let mut store = session("u1");
        store.add_task(TaskDraft::new("u1 task")).unwrap();

        store.end_session();
        assert!(store.current_user().is_none());
        assert!(store.tasks().is_empty());
        assert!(store.add_task(TaskDraft::new("nobody")).is_err());

        store.begin_session("u2");
        assert!(store.tasks().is_empty());
        store.add_task(TaskDraft::new("u2 task")).unwrap();

        store.begin_session("u1");
        assert_eq!(titles(store.tasks()), ["u1 task"]);
        assert_eq!(persisted_tasks(&store).len(), 2);
    }

    #[test]
    fn test_default_categories_seeded_once() {
        let storage = FlakyStorage::default();
        let mut store = store_over(storage.clone());
        store.begin_session("u1");
        assert_eq!(store.categories().len(), 4);
        assert!(storage.inner.borrow().get("categories").unwrap().is_some());

        store.delete_category("cat-4");
        let mut reopened = store_over(storage);
        reopened.begin_session("u1");
        let names: Vec<&str> = reopened.categories().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Work", "Personal", "Shopping"]);
    }

    #[test]
    fn test_unreadable_tasks_blob_is_reported() {
        let mut storage = MemoryStorage::new();
        storage.set("todos", "{{{").unwrap();

        let mut store = store_over(storage);
        store.begin_session("u1");
        assert!(store.tasks().is_empty());
        assert!(store.take_notifications().iter().any(|n| n.title == "Storage Error"));
        assert!(store.is_unsaved());

        // The next save replaces the unreadable blob
        store.add_task(TaskDraft::new("Fresh start")).unwrap();
        assert_eq!(persisted_tasks(&store).len(), 1);
        assert!(!store.is_unsaved());
    }

    #[test]
    fn test_unreadable_categories_blob_is_reported() {
        let mut storage = MemoryStorage::new();
        storage.set("categories", "nope").unwrap();

        let mut store = store_over(storage);
        store.begin_session("u1");
        assert_eq!(store.categories().len(), 4);
        assert!(store.is_unsaved());
        assert!(store.take_notifications().iter().any(|n| n.title == "Storage Error"));

        // Not overwritten until a category change is saved
        assert_eq!(store.storage().get("categories").unwrap().as_deref(), Some("nope"));

        // A fresh session over a readable medium starts clean
        store.storage.set("categories", "[]").unwrap();
        store.begin_session("u1");
        assert!(!store.is_unsaved());
        assert!(store.categories().is_empty());
    }

    #[test]
    fn test_undecodable_own_entries_survive_saves() {
        let mut storage = MemoryStorage::new();
        storage
            .set(
                "todos",
                r#"[
                    {"id":"bad-1","title":"No timestamp","completed":false,"priority":"low","userId":"u1"},
                    {"id":"ok-1","title":"Fine","completed":false,"createdAt":"2024-01-01T00:00:00Z","priority":"low","userId":"u1"}
                ]"#,
            )
            .unwrap();

        let mut store = store_over(storage);
        store.begin_session("u1");
        assert_eq!(titles(store.tasks()), ["Fine"]);

        store.add_task(TaskDraft::new("New")).unwrap();
        let stored = persisted_tasks(&store);
        assert_eq!(stored.len(), 3);
        assert!(stored.iter().any(|t| t["id"] == "bad-1" && t["title"] == "No timestamp"));

        // Importing replaces the whole collection, unreadable entries included
        store.import_tasks(r#"{"tasks":[]}"#).unwrap();
        assert!(persisted_tasks(&store).is_empty());
    }

    #[test]
    fn test_new_ids_skip_other_users_stored_ids() {
        let mut storage = MemoryStorage::new();
        storage
            .set(
                "todos",
                r#"[
                    {"id":"id-1","title":"Theirs","completed":false,"createdAt":"2024-01-01T00:00:00Z","priority":"low","userId":"u2"},
                    {"id":"id-2","completed":false,"userId":"u1"}
                ]"#,
            )
            .unwrap();

        let mut store = store_over(storage);
        store.begin_session("u1");

        let task = store.add_task(TaskDraft::new("Mine")).unwrap();
        assert_eq!(task.id, "id-3");
        let ids: Vec<String> = persisted_tasks(&store)
            .iter()
            .map(|t| t["id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, ["id-1", "id-2", "id-3"]);
    }

    #[test]
    fn test_failed_save_keeps_memory_state() {
        let storage = FlakyStorage::default();
        let mut store = store_over(storage.clone());
        store.begin_session("u1");
        store.take_notifications();
        assert!(!store.is_unsaved());

        storage.fail_writes.set(true);
        let task = store.add_task(TaskDraft::new("Unsaved")).unwrap();
        assert_eq!(store.task(&task.id).unwrap().title, "Unsaved");
        assert!(store.is_unsaved());

        let notes = store.take_notifications();
        assert!(notes.iter().any(|n| n.title == "Error saving tasks" && n.is_error()));
        assert!(notes.iter().any(|n| n.title == "Task added"));

        // Recovery: the next successful write persists everything
        storage.fail_writes.set(false);
        store.toggle_task_completion(&task.id).unwrap();
        assert!(!store.is_unsaved());
        assert_eq!(persisted_tasks(&store).len(), 1);
    }

    #[test]
    fn test_broken_medium_detected_at_open() {
        let storage = FlakyStorage::default();
        storage.fail_writes.set(true);

        let mut store = store_over(storage);
        assert!(store.is_unsaved());
        let notes = store.take_notifications();
        assert_eq!(notes[0].title, "Storage Error");

        // Still usable in memory
        store.begin_session("u1");
        store.add_task(TaskDraft::new("In memory only")).unwrap();
        assert_eq!(store.tasks().len(), 1);
    }

    #[test]
    fn test_open_sweeps_leftover_probe_keys() {
        let mut storage = MemoryStorage::new();
        storage.set(SELF_TEST_KEY, "test").unwrap();
        let store = store_over(storage);
        assert!(!store.storage().keys().unwrap().contains(&SELF_TEST_KEY.to_string()));
    }
}
