// Summary counts over a task list

use crate::clock::Today;
use crate::models::Task;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub active: usize,
    /// Percent of tasks completed, rounded half up; 0 for an empty list
    pub completion_rate: u32,
    /// Incomplete tasks due before today
    pub overdue: usize,
    /// Incomplete tasks due today
    pub due_today: usize,
}

impl TaskStats {
    pub fn compute(tasks: &[Task], today: &Today) -> Self {
        let mut stats = TaskStats {
            total: tasks.len(),
            ..Default::default()
        };

        for task in tasks {
            if task.completed {
                stats.completed += 1;
                continue;
            }
            stats.active += 1;

            if let Some(due) = task.due_date.as_ref() {
                let due = today.local_date(due);
                if due < today.date() {
                    stats.overdue += 1;
                } else if due == today.date() {
                    stats.due_today += 1;
                }
            }
        }

        if stats.total > 0 {
            stats.completion_rate = ((stats.completed * 100 + stats.total / 2) / stats.total) as u32;
        }
        stats
    }
}
