// Calendar view: tasks by local due date

use crate::clock::{Today, last_day_of_month};
use crate::error::{Result, StoreError};
use crate::models::Task;
use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;
use std::fmt;

/// Where a task's due date falls relative to today
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueStatus {
    None,
    Overdue,
    Today,
    Upcoming,
}

impl DueStatus {
    pub fn of(task: &Task, today: &Today) -> Self {
        match task.due_date.as_ref().map(|due| today.local_date(due)) {
            None => DueStatus::None,
            Some(due) if due < today.date() => DueStatus::Overdue,
            Some(due) if due == today.date() => DueStatus::Today,
            Some(_) => DueStatus::Upcoming,
        }
    }
}

impl fmt::Display for DueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DueStatus::None => "none",
            DueStatus::Overdue => "overdue",
            DueStatus::Today => "today",
            DueStatus::Upcoming => "upcoming",
        };
        f.write_str(s)
    }
}

/// Tasks due on one local calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub count: usize,
    pub has_overdue: bool,
}

/// Tasks whose local due date is `date`, in list order
pub fn tasks_on<'a>(tasks: &'a [Task], date: NaiveDate, today: &Today) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|task| task.due_date.as_ref().map(|due| today.local_date(due)) == Some(date))
        .collect()
}

/// One entry per day of the month that has tasks due, in date order
pub fn month_overview(tasks: &[Task], year: i32, month: u32, today: &Today) -> Result<Vec<DaySummary>> {
    if last_day_of_month(year, month).is_none() {
        return Err(StoreError::invalid("month", format!("{}-{:02}", year, month)));
    }

    let mut days: BTreeMap<NaiveDate, DaySummary> = BTreeMap::new();
    for task in tasks {
        let Some(due) = task.due_date.as_ref().map(|due| today.local_date(due)) else {
            continue;
        };
        if due.year() != year || due.month() != month {
            continue;
        }

        let day = days.entry(due).or_insert(DaySummary {
            date: due,
            count: 0,
            has_overdue: false,
        });
        day.count += 1;
        if !task.completed && due < today.date() {
            day.has_overdue = true;
        }
    }

    Ok(days.into_values().collect())
}
