//! bee-memory - 记忆目录维护工具
//!
//! 用法：bee-memory [--config <path>] <command>
//! 未给出子命令时打印任务统计。

use std::path::PathBuf;

use anyhow::{bail, Context};
use bee_memory::{
    config::load_config,
    memory::{KeywordTaskSearch, MemoryManager, SharedMemory, SubtaskManager, TaskStatus},
    observability,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bee-memory")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect and maintain the agent memory directory", long_about = None)]
struct Cli {
    /// 额外的配置文件（叠加在 config/default.toml 之上）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List tasks, newest first
    List {
        /// Only tasks in this status (active, completed, failed, archived)
        #[arg(short, long)]
        status: Option<TaskStatus>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Case-insensitive substring search over task descriptions
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Keyword similarity search over task descriptions
    Similar {
        query: String,

        /// Number of hits to show
        #[arg(short, default_value_t = 5)]
        k: usize,
    },

    /// Print a task document
    Show { task_id: String },

    /// Print the subtask table of a task
    Subtasks { task_id: String },

    /// Print a shared multi-agent session
    Shared { session_id: String },

    /// Task counts by status (JSON)
    Stats,

    /// Archive completed tasks older than N days (default: retention policy)
    Archive {
        #[arg(long)]
        days: Option<i64>,
    },

    /// Archive and purge according to the retention policy
    Cleanup,
}

fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let cfg = load_config(cli.config).context("Failed to load config")?;
    let mut memory = MemoryManager::open(&cfg.memory.root)
        .with_context(|| format!("Failed to open memory root {}", cfg.memory.root.display()))?;
    if memory.policy() != &cfg.memory.policy() {
        memory
            .set_policy(cfg.memory.policy())
            .context("Failed to persist retention policy")?;
    }

    match cli.command.unwrap_or(Commands::Stats) {
        Commands::List { status, limit } => {
            for t in memory.list_tasks(status, limit) {
                println!(
                    "{}\t{}\t{}\t{}",
                    t.id,
                    t.status,
                    t.created_at.format("%Y-%m-%d %H:%M"),
                    t.description
                );
            }
        }
        Commands::Search { query } => {
            let query = query.join(" ");
            if query.trim().is_empty() {
                bail!("search needs a non-empty query");
            }
            for t in memory.search_tasks(&query) {
                println!("{}\t{}\t{}", t.id, t.status, t.description);
            }
        }
        Commands::Similar { query, k } => {
            let search = KeywordTaskSearch::from_records(memory.records());
            for hit in memory.find_similar(&search, &query, k) {
                println!("{:.3}\t{}\t{}", hit.score, hit.task_id, hit.description);
            }
        }
        Commands::Show { task_id } => {
            let path = memory
                .task_path(&task_id)
                .with_context(|| format!("Task not found: {}", task_id))?;
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            print!("{}", text);
        }
        Commands::Subtasks { task_id } => {
            let subtasks = SubtaskManager::open(memory.root(), &task_id)
                .with_context(|| format!("Failed to open subtasks of {}", task_id))?;
            println!("{}", subtasks.to_markdown());
        }
        Commands::Shared { session_id } => {
            let shared = SharedMemory::open(memory.root(), &session_id, cfg.lock.timeout())
                .with_context(|| format!("Failed to open shared session {}", session_id))?;
            println!("{}", shared.to_markdown());
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&memory.stats())?);
        }
        Commands::Archive { days } => {
            let days = days.unwrap_or(memory.policy().retention_days);
            let n = memory.archive_older_than(days).context("Archive failed")?;
            println!("archived {} task(s)", n);
        }
        Commands::Cleanup => {
            let report = memory.cleanup().context("Cleanup failed")?;
            println!("archived {}, purged {}", report.archived, report.purged);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_options_parse() {
        let cli = Cli::try_parse_from(["bee-memory", "list", "--limit", "5"]).unwrap();
        match cli.command {
            Some(Commands::List { status, limit }) => {
                assert_eq!(status, None);
                assert_eq!(limit, 5);
            }
            _ => panic!("expected list"),
        }

        let cli = Cli::try_parse_from(["bee-memory", "list", "--status", "failed"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::List { status: Some(TaskStatus::Failed), limit: 20 })
        ));
    }

    #[test]
    fn test_bad_status_rejected() {
        assert!(Cli::try_parse_from(["bee-memory", "list", "--status", "done"]).is_err());
    }

    #[test]
    fn test_global_config_and_default_command() {
        let cli = Cli::try_parse_from(["bee-memory", "archive", "--days", "3", "--config", "x.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(cli.command, Some(Commands::Archive { days: Some(3) })));

        let cli = Cli::try_parse_from(["bee-memory"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_search_joins_words() {
        let cli = Cli::try_parse_from(["bee-memory", "search", "login", "bug"]).unwrap();
        match cli.command {
            Some(Commands::Search { query }) => assert_eq!(query, vec!["login", "bug"]),
            _ => panic!("expected search"),
        }
    }
}
