//! Command definitions and handlers for the `aura-memory` binary.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;

use aura_memory::memory::consolidation::ConsolidationOptions;
use aura_memory::memory::engine::{MemoryEngine, NewFileMeta, RememberKind, RememberOutcome};
use aura_memory::memory::maintenance::Scheduler;
use aura_memory::MemoryConfig;

#[derive(Parser, Debug)]
#[command(
    name = "aura-memory",
    version,
    about = "Persistent episodic, procedural and semantic memory"
)]
pub struct Cli {
    /// Memory home directory (overrides config and AURA_MEMORY_HOME)
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store something (note, fact or episode)
    Remember {
        content: String,
        /// note, fact or episode
        #[arg(long = "type", default_value = "note")]
        kind: RememberKind,
        #[arg(long, default_value_t = 0.5)]
        importance: f64,
        /// Comma-separated tags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    /// Search episodes, skills and knowledge
    Search {
        query: String,
        #[arg(short = 'n', default_value_t = 5)]
        n: usize,
        /// Search the keyword/vector index instead
        #[arg(long)]
        hybrid: bool,
    },
    /// Manage memory files
    #[command(subcommand)]
    Files(FilesCommand),
    /// Turn successful episodes into skills and facts
    Consolidate {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        min_episodes: Option<usize>,
        #[arg(long)]
        min_valence: Option<f64>,
    },
    /// Preview how recent episodes would be grouped
    Analyze {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Show past consolidation runs
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Statistics for every store
    Stats,
    /// Rebuild the hybrid search index
    Reindex,
    /// Inspect or run maintenance tasks
    #[command(subcommand)]
    Scheduler(SchedulerCommand),
}

#[derive(Subcommand, Debug)]
pub enum FilesCommand {
    /// List files, newest first
    List,
    /// Print a file
    Read { filename: String },
    /// Create a file
    Create { filename: String, content: String },
    /// Delete a file
    Delete { filename: String },
}

#[derive(Subcommand, Debug)]
pub enum SchedulerCommand {
    /// Show every task with its last and next run
    Status,
    /// Run due tasks, or one task unconditionally
    Run {
        /// Task to run even if not due
        #[arg(long)]
        force: Option<String>,
    },
}

fn emit<T: Serialize>(json: bool, value: &T, human: impl FnOnce(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", human(value));
    }
    Ok(())
}

/// Execute one command.
pub async fn run(cli: Cli) -> Result<()> {
    let mut config = MemoryConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(home) = cli.home {
        config.storage.home = home;
    }
    let engine = Arc::new(
        MemoryEngine::open(config)
            .await
            .context("opening memory engine")?,
    );
    let json = cli.json;

    match cli.command {
        Command::Remember {
            content,
            kind,
            importance,
            tags,
        } => {
            let outcome = engine.remember(&content, kind, importance, tags).await?;
            emit(json, &outcome, |outcome| match outcome {
                RememberOutcome::Note { file } => format!("Saved note {}", file.filename),
                RememberOutcome::Fact { triple_id } => format!("Stored fact {triple_id}"),
                RememberOutcome::Episode { episode_id } => {
                    format!("Recorded episode {episode_id}")
                }
            })
        }
        Command::Search { query, n, hybrid } if hybrid => {
            let hits = engine.hybrid_search(&query, n).await?;
            emit(json, &hits, |hits| {
                let mut out = format!("{} results", hits.len());
                for hit in hits {
                    let _ = write!(
                        out,
                        "\n{:.3}  {}  {}",
                        hit.combined_score,
                        hit.id,
                        hit.content.chars().take(80).collect::<String>()
                    );
                }
                out
            })
        }
        Command::Search { query, n, .. } => {
            let results = engine.search(&query, n).await?;
            emit(json, &results, |results| {
                let mut out = String::from("Episodes:");
                for ranked in &results.episodic {
                    let _ = write!(out, "\n  {:.3}  {}", ranked.score.combined, ranked.item.action);
                }
                out.push_str("\nSkills:");
                for ranked in &results.procedural {
                    let _ = write!(out, "\n  {:.3}  {}", ranked.score.combined, ranked.item.name);
                }
                out.push_str("\nKnowledge:");
                for scored in &results.knowledge {
                    let t = &scored.triple;
                    let _ = write!(
                        out,
                        "\n  {:.3}  {} {} {}",
                        scored.similarity, t.subject, t.predicate, t.object
                    );
                }
                out
            })
        }
        Command::Files(command) => run_files(&engine, command, json).await,
        Command::Consolidate {
            dry_run,
            min_episodes,
            min_valence,
        } => {
            let options = ConsolidationOptions {
                min_episodes,
                min_valence,
                dry_run,
            };
            let result = engine.consolidate(options).await?;
            emit(json, &result, |r| {
                format!(
                    "{}processed {} episodes: {} skills created, {} updated, {} triples, {} archived",
                    if r.dry_run { "[dry run] " } else { "" },
                    r.episodes_processed,
                    r.skills_created,
                    r.skills_updated,
                    r.triples_extracted,
                    r.episodes_archived
                )
            })
        }
        Command::Analyze { limit } => {
            let analysis = engine.analyze_patterns(limit).await?;
            emit(json, &analysis, |a| {
                let mut out = format!(
                    "{} episodes, {} successful, {} groups",
                    a.total_episodes,
                    a.successful_episodes,
                    a.groups.len()
                );
                for skill in &a.potential_skills {
                    let _ = write!(
                        out,
                        "\n  {} ({} episodes, confidence {:.2})",
                        skill.name, skill.episodes, skill.confidence
                    );
                }
                out
            })
        }
        Command::History { limit } => {
            let history = engine.consolidation_history(limit).await?;
            emit(json, &history, |history| {
                let mut out = format!("{} runs", history.len());
                for r in history {
                    let _ = write!(
                        out,
                        "\n  {}  processed {}, created {}, updated {}",
                        r.timestamp.to_rfc3339(),
                        r.episodes_processed,
                        r.skills_created,
                        r.skills_updated
                    );
                }
                out
            })
        }
        Command::Stats => {
            let stats = engine.stats().await?;
            emit(json, &stats, |s| {
                format!(
                    "episodes: {} ({} active, {} consolidated, {} archived)\nskills: {}\n\
                     triples: {} over {} entities\ntemporal versions: {} ({} current)\n\
                     indexed documents: {}\nfiles: {}\nconsolidation runs: {}",
                    s.episodic.total,
                    s.episodic.active,
                    s.episodic.consolidated,
                    s.episodic.archived,
                    s.procedural.total,
                    s.knowledge.total_triples,
                    s.knowledge.unique_entities,
                    s.temporal.total_versions,
                    s.temporal.current_versions,
                    s.search.documents,
                    s.files,
                    s.consolidation_runs
                )
            })
        }
        Command::Reindex => {
            let report = engine.reindex().await?;
            emit(json, &report, |r| {
                format!("indexed {} documents, removed {}", r.indexed, r.removed)
            })
        }
        Command::Scheduler(command) => run_scheduler(engine, command, json).await,
    }
}

async fn run_files(engine: &MemoryEngine, command: FilesCommand, json: bool) -> Result<()> {
    match command {
        FilesCommand::List => {
            let entries = engine.list_files().await?;
            emit(json, &entries, |entries| {
                let mut out = format!("{} files", entries.len());
                for entry in entries {
                    let _ = write!(
                        out,
                        "\n  {}  {:>8} B  {}",
                        entry.modified.to_rfc3339(),
                        entry.size,
                        entry.filename
                    );
                }
                out
            })
        }
        FilesCommand::Read { filename } => {
            let Some(file) = engine.read_file(&filename).await? else {
                bail!("file not found: {filename}");
            };
            emit(json, &file, |file| file.content.clone())
        }
        FilesCommand::Create { filename, content } => {
            let meta = engine
                .create_file(&filename, &content, NewFileMeta::default())
                .await?;
            emit(json, &meta, |meta| {
                format!("Created {} ({} bytes)", meta.filename, meta.size)
            })
        }
        FilesCommand::Delete { filename } => {
            if !engine.delete_file(&filename).await? {
                bail!("file not found: {filename}");
            }
            emit(json, &filename, |name| format!("Deleted {name}"))
        }
    }
}

async fn run_scheduler(
    engine: Arc<MemoryEngine>,
    command: SchedulerCommand,
    json: bool,
) -> Result<()> {
    let scheduler = Scheduler::for_engine(engine).await?;
    match command {
        SchedulerCommand::Status => {
            let status = scheduler.status().await;
            emit(json, &status, |status| {
                let mut out = String::new();
                for task in status {
                    let next = task
                        .next_run
                        .map_or_else(|| "now".to_string(), |t| t.to_rfc3339());
                    let _ = writeln!(
                        out,
                        "{:<22} every {:>3}h  runs {:>4}  next {}{}{}",
                        task.name,
                        task.interval_hours,
                        task.run_count,
                        next,
                        if task.due { "  [due]" } else { "" },
                        task.last_failure
                            .as_ref()
                            .map(|f| format!("  last failure: {}", f.error))
                            .unwrap_or_default()
                    );
                }
                out.trim_end().to_string()
            })
        }
        SchedulerCommand::Run { force: Some(task) } => {
            let outcome = scheduler.run_task(&task, true).await?;
            emit(json, &outcome, |outcome| format!("{task}: {outcome}"))
        }
        SchedulerCommand::Run { force: None } => {
            let outcomes = scheduler.run_all_due().await?;
            emit(json, &outcomes, |outcomes| {
                if outcomes.is_empty() {
                    return "No task due".to_string();
                }
                outcomes
                    .iter()
                    .map(|(name, outcome)| format!("{name}: {outcome}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
    }
}
