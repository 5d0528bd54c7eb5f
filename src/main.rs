use chrono::{DateTime, Datelike, NaiveDate, Utc};
use clap::{ArgAction, Parser, Subcommand};
use colored::{ColoredString, Colorize};
use eyre::{Result, WrapErr, bail, eyre};
use std::fs;
use std::io;
use std::path::PathBuf;
use todostore::calendar::{DueStatus, month_overview, tasks_on};
use todostore::models::parse_due_date;
use todostore::{
    Backend, CategoryDraft, CategoryFilter, CategoryPatch, Config, DueFilter, FilterPatch, Priority, PriorityFilter,
    StatusFilter, Task, TaskDraft, TaskPatch, TaskStats, TaskStore, Today, Variant,
};
use tracing::Level;

#[derive(Parser)]
#[command(name = "todostore")]
#[command(about = "TodoStore CLI - per-user tasks and categories in a local store")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Config file (default: <config dir>/todostore/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Storage backend: sqlite or files
    #[arg(long, global = true)]
    backend: Option<Backend>,

    /// Act as this user
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Log more (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a task
    Add {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long, default_value = "medium")]
        priority: Priority,
        /// YYYY-MM-DD (local) or RFC 3339
        #[arg(long)]
        due: Option<String>,
        /// Category id or name
        #[arg(short, long)]
        category: Option<String>,
    },

    /// List tasks, optionally filtered
    List {
        #[arg(long, default_value = "all")]
        status: StatusFilter,
        #[arg(long, default_value = "all")]
        priority: PriorityFilter,
        /// Category id or name
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value = "all")]
        due: DueFilter,
        /// Case-insensitive match on title and description
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Change fields of a task
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "clear_description")]
        description: Option<String>,
        #[arg(long)]
        clear_description: bool,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long, conflicts_with = "clear_due")]
        due: Option<String>,
        #[arg(long)]
        clear_due: bool,
        #[arg(long, conflicts_with = "clear_category")]
        category: Option<String>,
        #[arg(long)]
        clear_category: bool,
    },

    /// Flip a task between active and completed
    Toggle { id: String },

    /// Delete a task
    Rm { id: String },

    /// Manage the checklist of a task
    Subtask {
        #[command(subcommand)]
        command: SubtaskCommands,
    },

    /// Manage categories
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },

    /// Write tasks and categories as JSON
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace tasks and/or categories from an export ("-" reads stdin)
    Import { file: String },

    /// Completion and due-date summary
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Tasks by due date for a month or a single day
    Calendar {
        /// YYYY-MM (default: this month)
        #[arg(long, conflicts_with = "day")]
        month: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        day: Option<String>,
    },
}

#[derive(Subcommand)]
enum SubtaskCommands {
    Add {
        task_id: String,
        title: String,
    },
    /// Mark a subtask done (or not done with --undo)
    Done {
        task_id: String,
        subtask_id: String,
        #[arg(long)]
        undo: bool,
    },
    Rm {
        task_id: String,
        subtask_id: String,
    },
}

#[derive(Subcommand)]
enum CategoryCommands {
    List,
    Add {
        name: String,
        #[arg(default_value = "#6b7280")]
        color: String,
    },
    Edit {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    Rm {
        id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load_from(cli.config.as_deref()).wrap_err("Failed to load config")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(user) = cli.user {
        config.user = Some(user);
    }

    let storage = config.open_storage().wrap_err("Failed to open storage")?;
    let mut store = TaskStore::open(storage);
    store.begin_session(config.user());

    let result = run(&mut store, cli.command);
    print_notifications(&mut store);
    result?;

    if store.is_unsaved() {
        eprintln!("{}", "warning: some changes could not be saved".yellow());
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn run(store: &mut TaskStore, command: Commands) -> Result<()> {
    match command {
        Commands::Add {
            title,
            description,
            priority,
            due,
            category,
        } => {
            let mut draft = TaskDraft::new(title).with_priority(priority);
            if let Some(description) = description {
                draft = draft.with_description(description);
            }
            if let Some(due) = due {
                draft = draft.with_due_date(parse_due(&due, &store.today())?);
            }
            if let Some(category) = category {
                draft = draft.with_category(resolve_category(store, &category)?);
            }
            let task = store.add_task(draft)?;
            println!("Added {}", task.id);
        }

        Commands::List {
            status,
            priority,
            category,
            due,
            search,
            json,
        } => {
            let category = match category {
                Some(key) => CategoryFilter::Only(resolve_category(store, &key)?),
                None => CategoryFilter::All,
            };
            store.filter_tasks(FilterPatch {
                status: Some(status),
                priority: Some(priority),
                category: Some(category),
                due: Some(due),
                search_query: search,
            });

            if json {
                println!("{}", serde_json::to_string_pretty(store.filtered_tasks())?);
            } else if store.filtered_tasks().is_empty() {
                println!("No tasks");
            } else {
                let today = store.today();
                for task in store.filtered_tasks() {
                    print_task(store, task, &today);
                }
            }
        }

        Commands::Edit {
            id,
            title,
            description,
            clear_description,
            priority,
            due,
            clear_due,
            category,
            clear_category,
        } => {
            let mut patch = TaskPatch {
                title,
                priority,
                ..Default::default()
            };
            if clear_description {
                patch.description = Some(None);
            } else if let Some(description) = description {
                patch.description = Some(Some(description));
            }
            if clear_due {
                patch.due_date = Some(None);
            } else if let Some(due) = due {
                patch.due_date = Some(Some(parse_due(&due, &store.today())?));
            }
            if clear_category {
                patch.category_id = Some(None);
            } else if let Some(category) = category {
                patch.category_id = Some(Some(resolve_category(store, &category)?));
            }

            if patch.is_empty() {
                bail!("Nothing to change");
            }
            if !store.update_task(&id, patch)? {
                bail!("No task with id '{}'", id);
            }
        }

        Commands::Toggle { id } => {
            if !store.toggle_task_completion(&id)? {
                bail!("No task with id '{}'", id);
            }
            if let Some(task) = store.task(&id) {
                let state = if task.completed { "completed" } else { "active" };
                println!("{} is now {}", task.title, state);
            }
        }

        Commands::Rm { id } => {
            if !store.delete_task(&id)? {
                bail!("No task with id '{}'", id);
            }
        }

        Commands::Subtask { command } => run_subtask(store, command)?,

        Commands::Category { command } => run_category(store, command)?,

        Commands::Export { output } => {
            let blob = store.export_tasks()?;
            match output {
                Some(path) => {
                    fs::write(&path, blob).wrap_err_with(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported to {}", path.display());
                }
                None => println!("{}", blob),
            }
        }

        Commands::Import { file } => {
            let text = if file == "-" {
                io::read_to_string(io::stdin()).wrap_err("Failed to read stdin")?
            } else {
                fs::read_to_string(&file).wrap_err_with(|| format!("Failed to read {}", file))?
            };
            store.import_tasks(&text)?;
        }

        Commands::Stats { json } => {
            let stats = TaskStats::compute(store.tasks(), &store.today());
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Total:       {}", stats.total);
                println!("Completed:   {} ({}%)", stats.completed, stats.completion_rate);
                println!("Active:      {}", stats.active);
                println!("Due today:   {}", stats.due_today.to_string().yellow());
                println!("Overdue:     {}", stats.overdue.to_string().red());
            }
        }

        Commands::Calendar { month, day } => {
            let today = store.today();
            if let Some(day) = day {
                let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                    .map_err(|_| eyre!("Invalid day '{}': expected YYYY-MM-DD", day))?;
                let tasks = tasks_on(store.tasks(), date, &today);
                if tasks.is_empty() {
                    println!("No tasks due on {}", date);
                }
                for task in tasks {
                    print_task(store, task, &today);
                }
            } else {
                let (year, month) = match month {
                    Some(raw) => parse_month(&raw)?,
                    None => (today.date().year(), today.date().month()),
                };
                let days = month_overview(store.tasks(), year, month, &today)?;
                if days.is_empty() {
                    println!("No tasks due in {}-{:02}", year, month);
                }
                for day in days {
                    let line = format!("{}  {} task(s)", day.date, day.count);
                    if day.has_overdue {
                        println!("{}", line.red());
                    } else if day.date == today.date() {
                        println!("{}", line.yellow());
                    } else {
                        println!("{}", line);
                    }
                }
            }
        }
    }

    Ok(())
}

fn run_subtask(store: &mut TaskStore, command: SubtaskCommands) -> Result<()> {
    match command {
        SubtaskCommands::Add { task_id, title } => match store.add_subtask(&task_id, title)? {
            Some(id) => println!("Added {}", id),
            None => bail!("No task with id '{}'", task_id),
        },
        SubtaskCommands::Done {
            task_id,
            subtask_id,
            undo,
        } => {
            if !store.update_subtask(&task_id, &subtask_id, !undo)? {
                bail!("No subtask '{}' on task '{}'", subtask_id, task_id);
            }
        }
        SubtaskCommands::Rm { task_id, subtask_id } => {
            if !store.delete_subtask(&task_id, &subtask_id)? {
                bail!("No subtask '{}' on task '{}'", subtask_id, task_id);
            }
        }
    }
    Ok(())
}

fn run_category(store: &mut TaskStore, command: CategoryCommands) -> Result<()> {
    match command {
        CategoryCommands::List => {
            for category in store.categories() {
                println!(
                    "{}  {}  {}  {} task(s)",
                    category.id.dimmed(),
                    category.name.bold(),
                    category.color,
                    category.count
                );
            }
        }
        CategoryCommands::Add { name, color } => {
            let category = store.add_category(CategoryDraft::new(name, color));
            println!("Added {}", category.id);
        }
        CategoryCommands::Edit { id, name, color } => {
            if name.is_none() && color.is_none() {
                bail!("Nothing to change");
            }
            if !store.update_category(&id, CategoryPatch { name, color }) {
                bail!("No category with id '{}'", id);
            }
        }
        CategoryCommands::Rm { id } => {
            if !store.delete_category(&id) {
                bail!("No category with id '{}'", id);
            }
        }
    }
    Ok(())
}

/// Accept a category id or a case-insensitive name
fn resolve_category(store: &TaskStore, key: &str) -> Result<String> {
    if let Some(category) = store.category(key) {
        return Ok(category.id.clone());
    }
    store
        .categories()
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(key))
        .map(|c| c.id.clone())
        .ok_or_else(|| eyre!("No category '{}'", key))
}

/// A bare date means local midnight; anything else must be RFC 3339
fn parse_due(raw: &str, today: &Today) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(today.start_of(date));
    }
    parse_due_date(raw).ok_or_else(|| eyre!("Invalid due date '{}': expected YYYY-MM-DD or RFC 3339", raw))
}

fn parse_month(raw: &str) -> Result<(i32, u32)> {
    let date = NaiveDate::parse_from_str(&format!("{}-01", raw), "%Y-%m-%d")
        .map_err(|_| eyre!("Invalid month '{}': expected YYYY-MM", raw))?;
    Ok((date.year(), date.month()))
}

fn print_task(store: &TaskStore, task: &Task, today: &Today) {
    let check = if task.completed { "[x]".green() } else { "[ ]".normal() };
    let priority: ColoredString = match task.priority {
        Priority::High => "high".red(),
        Priority::Medium => "medium".yellow(),
        Priority::Low => "low".blue(),
    };

    let mut line = format!("{} {} {} ({})", check, task.id.dimmed(), task.title.bold(), priority);
    if let Some(category) = task.category_id.as_deref().and_then(|id| store.category(id)) {
        line.push_str(&format!(" #{}", category.name));
    }
    if let Some(due) = task.due_date.as_ref() {
        let text = format!("due {}", today.local_date(due));
        let text = match DueStatus::of(task, today) {
            DueStatus::Overdue if !task.completed => text.red(),
            DueStatus::Today => text.yellow(),
            _ => text.normal(),
        };
        line.push_str(&format!(" {}", text));
    }
    println!("{}", line);

    if let Some(description) = &task.description {
        println!("      {}", description.dimmed());
    }
    for subtask in &task.subtasks {
        let check = if subtask.completed { "[x]" } else { "[ ]" };
        println!("      {} {} {}", check, subtask.id.dimmed(), subtask.title);
    }
}

fn print_notifications(store: &mut TaskStore) {
    for notification in store.take_notifications() {
        let title = match notification.variant {
            Variant::Success => notification.title.green(),
            Variant::Destructive => notification.title.red(),
        };
        eprintln!("{}: {}", title.bold(), notification.description);
    }
}
