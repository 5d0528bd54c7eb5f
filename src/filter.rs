// Task filtering: the active filter set and the ordered filter pipeline

use crate::clock::Today;
use crate::error::StoreError;
use crate::models::{Priority, Task};
use std::fmt;
use std::str::FromStr;

/// Completion status filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
}

/// Priority filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PriorityFilter {
    #[default]
    All,
    Only(Priority),
}

/// Category filter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(String),
}

/// Due-date window filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DueFilter {
    #[default]
    All,
    Today,
    Week,
    Month,
}

/// The active, conjunctive filter set. Process-local, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilters {
    pub status: StatusFilter,
    pub priority: PriorityFilter,
    pub category: CategoryFilter,
    pub due: DueFilter,
    pub search_query: String,
}

/// Partial filter update; `None` fields keep their current value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPatch {
    pub status: Option<StatusFilter>,
    pub priority: Option<PriorityFilter>,
    pub category: Option<CategoryFilter>,
    pub due: Option<DueFilter>,
    pub search_query: Option<String>,
}

impl TaskFilters {
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn merge(&mut self, patch: FilterPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(due) = patch.due {
            self.due = due;
        }
        if let Some(query) = patch.search_query {
            self.search_query = query;
        }
    }

    /// Evaluate every criterion in order: status, priority, category,
    /// due date, search. `needle` is the lowercased search query.
    fn matches(&self, task: &Task, today: &Today, needle: &str) -> bool {
        let status_ok = match self.status {
            StatusFilter::All => true,
            StatusFilter::Active => !task.completed,
            StatusFilter::Completed => task.completed,
        };
        if !status_ok {
            return false;
        }

        if let PriorityFilter::Only(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }

        if let CategoryFilter::Only(category_id) = &self.category {
            if task.category_id.as_deref() != Some(category_id.as_str()) {
                return false;
            }
        }

        if !due_matches(self.due, task, today) {
            return false;
        }

        needle.is_empty() || task.matches_query(needle)
    }
}

fn due_matches(filter: DueFilter, task: &Task, today: &Today) -> bool {
    if filter == DueFilter::All {
        return true;
    }
    let Some(due) = task.due_date.as_ref() else {
        return false;
    };

    let due = today.local_date(due);
    let start = today.date();
    match filter {
        DueFilter::All => true,
        DueFilter::Today => due == start,
        DueFilter::Week => due >= start && due <= today.end_of_week(),
        DueFilter::Month => due >= start && due <= today.end_of_month(),
    }
}

/// Apply the filter set to a task list, preserving order
pub fn apply_filters(tasks: &[Task], filters: &TaskFilters, today: &Today) -> Vec<Task> {
    let needle = filters.search_query.to_lowercase();
    tasks
        .iter()
        .filter(|task| filters.matches(task, today, &needle))
        .cloned()
        .collect()
}

impl FromStr for StatusFilter {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(StatusFilter::All),
            "active" => Ok(StatusFilter::Active),
            "completed" => Ok(StatusFilter::Completed),
            _ => Err(StoreError::invalid("status filter", s)),
        }
    }
}

impl FromStr for PriorityFilter {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(PriorityFilter::All);
        }
        s.parse::<Priority>()
            .map(PriorityFilter::Only)
            .map_err(|_| StoreError::invalid("priority filter", s))
    }
}

impl FromStr for CategoryFilter {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err(StoreError::invalid("category filter", s)),
            "all" => Ok(CategoryFilter::All),
            id => Ok(CategoryFilter::Only(id.to_string())),
        }
    }
}

impl FromStr for DueFilter {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(DueFilter::All),
            "today" => Ok(DueFilter::Today),
            "week" => Ok(DueFilter::Week),
            "month" => Ok(DueFilter::Month),
            _ => Err(StoreError::invalid("due date filter", s)),
        }
    }
}

impl fmt::Display for TaskFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            StatusFilter::All => "all",
            StatusFilter::Active => "active",
            StatusFilter::Completed => "completed",
        };
        let priority = match self.priority {
            PriorityFilter::All => "all",
            PriorityFilter::Only(p) => p.as_str(),
        };
        let category = match &self.category {
            CategoryFilter::All => "all",
            CategoryFilter::Only(id) => id.as_str(),
        };
        let due = match self.due {
            DueFilter::All => "all",
            DueFilter::Today => "today",
            DueFilter::Week => "week",
            DueFilter::Month => "month",
        };
        write!(
            f,
            "status={} priority={} category={} due={} search={:?}",
            status, priority, category, due, self.search_query
        )
    }
}
