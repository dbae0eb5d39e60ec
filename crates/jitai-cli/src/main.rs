//! CLI for jitai.
//!
//! Drives the decision engine against a JSON file store so decisions,
//! outcome collection and analytics can be simulated and inspected locally.
//! Every command prints pretty JSON on stdout; logs go to stderr.

mod file_store;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use file_store::{load_or_create_user_id, FileStore};
use jitai_core::{
    Clock, EngineConfig, Feedback, Horizon, InterventionContext, ManualClock, Persona,
    SessionRecord, StaticPersona, SystemClock, UserChoice,
};
use jitai_engine::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jitai", author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the store file and the anonymous user id
    #[arg(long, global = true, default_value = "data/jitai")]
    state_dir: PathBuf,

    /// Engine configuration (JSON); missing fields use defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Fixed current time (RFC 3339), for simulations
    #[arg(long, global = true)]
    now: Option<String>,

    /// Persona label reported to the engine
    #[arg(long, global = true, default_value = "UNKNOWN", value_parser = parse_label::<Persona>)]
    persona: Persona,

    /// Classifier confidence for the persona
    #[arg(long, global = true, default_value_t = 0.5)]
    persona_confidence: f64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide SHOW or SKIP for one app-open event
    Evaluate {
        /// Context JSON file, or `-` for stdin
        #[arg(long, conflicts_with = "app")]
        context: Option<String>,

        /// Target app, with every other context field at its default
        #[arg(long)]
        app: Option<String>,
    },
    /// Record the user's answer to a shown intervention
    Outcome {
        #[arg(long)]
        id: String,

        /// GO_BACK, CONTINUE, DISMISSED or TIMEOUT
        #[arg(long, value_parser = parse_label::<UserChoice>)]
        choice: UserChoice,

        #[arg(long, default_value_t = 0)]
        latency_ms: i64,

        /// HELPFUL or DISRUPTIVE
        #[arg(long, value_parser = parse_label::<Feedback>)]
        feedback: Option<Feedback>,

        #[arg(long, default_value_t = 0)]
        depth: u32,
    },
    /// Run one scheduled outcome collection pass
    Collect {
        #[arg(value_enum)]
        horizon: HorizonArg,

        #[arg(long, default_value = "100")]
        limit: usize,
    },
    /// Read-only analytics
    Stats {
        #[arg(value_enum)]
        view: StatsView,

        /// Window for the decision summary
        #[arg(long, default_value = "7")]
        days: i64,
    },
    /// Inspect or steer the bandit rollout
    Rollout {
        #[command(subcommand)]
        action: RolloutAction,
    },
    /// Delete rows older than the retention window
    Prune {
        #[arg(long)]
        days: Option<i64>,
    },
    /// Report a finished usage session of a monitored app
    Session {
        #[arg(long)]
        app: String,

        /// Session start in Unix milliseconds (default: now)
        #[arg(long)]
        start_ms: Option<i64>,

        #[arg(long)]
        duration_ms: i64,
    },
    /// Turn interventions on or off
    Switch {
        #[arg(value_enum)]
        state: Toggle,
    },
    /// Pause interventions for a number of minutes (0 clears)
    Snooze {
        #[arg(long)]
        minutes: u32,
    },
    /// Mark a monitored app as uninstalled
    Uninstalled {
        #[arg(long)]
        app: String,
    },
}

#[derive(Subcommand)]
enum RolloutAction {
    /// Change the share of users on bandit selection
    Set {
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Re-enable after an automatic rollback
    Enable,
    Status,
    /// Run the periodic variant comparison now
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum HorizonArg {
    Short,
    Medium,
    Long,
}

impl From<HorizonArg> for Horizon {
    fn from(arg: HorizonArg) -> Self {
        match arg {
            HorizonArg::Short => Horizon::ShortTerm,
            HorizonArg::Medium => Horizon::MediumTerm,
            HorizonArg::Long => Horizon::LongTerm,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum StatsView {
    Decisions,
    Content,
    Burden,
    Effectiveness,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

/// Parses a SCREAMING_SNAKE_CASE label, accepting any case and hyphens.
fn parse_label<T: DeserializeOwned>(raw: &str) -> std::result::Result<T, String> {
    let normalized = raw.trim().to_uppercase().replace('-', "_");
    serde_json::from_value(serde_json::Value::String(normalized))
        .map_err(|_| format!("unknown value '{raw}'"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let file =
        File::open(path).with_context(|| format!("Failed to open config {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid config {}", path.display()))
}

fn build_clock(now: Option<&str>) -> Result<Arc<dyn Clock>> {
    match now {
        Some(raw) => {
            let at = OffsetDateTime::parse(raw, &Rfc3339)
                .with_context(|| format!("--now must be RFC 3339, got '{raw}'"))?;
            Ok(Arc::new(ManualClock::new(at)))
        }
        None => Ok(Arc::new(SystemClock::default())),
    }
}

fn read_context(source: &str) -> Result<InterventionContext> {
    let mut raw = String::new();
    if source == "-" {
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("Failed to read context from stdin")?;
    } else {
        raw = std::fs::read_to_string(source)
            .with_context(|| format!("Failed to read context file {source}"))?;
    }
    serde_json::from_str(&raw).context("Invalid context JSON")
}

/// Context for `evaluate`; a context without a timestamp takes the clock's
/// calendar fields.
fn context_for(
    engine: &Engine,
    context: Option<&str>,
    app: Option<&str>,
) -> Result<InterventionContext> {
    match (context, app) {
        (Some(source), _) => {
            let mut ctx = read_context(source)?;
            if ctx.timestamp_ms == 0 {
                let now = engine.context_now(&ctx.target_app);
                ctx.timestamp_ms = now.timestamp_ms;
                ctx.hour = now.hour;
                ctx.weekday = now.weekday;
                ctx.is_weekend = now.is_weekend;
            }
            Ok(ctx)
        }
        (None, Some(app)) => Ok(engine.context_now(app)),
        (None, None) => anyhow::bail!("evaluate needs --context or --app"),
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    let clock = build_clock(cli.now.as_deref())?;
    let store = Arc::new(FileStore::open(&cli.state_dir)?);
    let user_id = load_or_create_user_id(&cli.state_dir)?;
    debug!(state_dir = %cli.state_dir.display(), "state loaded");

    let engine = Engine::new(
        store.clone(),
        clock.clone(),
        Arc::new(StaticPersona::new(cli.persona, cli.persona_confidence)),
        config,
        &user_id,
    );

    match cli.command {
        Commands::Evaluate { context, app } => {
            let ctx = context_for(&engine, context.as_deref(), app.as_deref())?;
            print_json(&engine.evaluate(&ctx))?;
        }
        Commands::Outcome {
            id,
            choice,
            latency_ms,
            feedback,
            depth,
        } => {
            let outcome = engine
                .record_outcome(&id, choice, latency_ms, feedback, depth)
                .with_context(|| format!("Could not record outcome for {id}"))?;
            print_json(&outcome)?;
        }
        Commands::Collect { horizon, limit } => {
            print_json(&engine.collect(horizon.into(), limit))?;
        }
        Commands::Stats { view, days } => match view {
            StatsView::Decisions => print_json(&engine.decision_summary(days)?)?,
            StatsView::Content => print_json(&engine.content_effectiveness()?)?,
            StatsView::Burden => print_json(&engine.burden_summary())?,
            StatsView::Effectiveness => print_json(&engine.effectiveness_metrics()?)?,
        },
        Commands::Rollout { action } => match action {
            RolloutAction::Set { percent } => print_json(&engine.set_rollout_percentage(percent))?,
            RolloutAction::Enable => print_json(&engine.enable_rollout())?,
            RolloutAction::Status => print_json(&engine.rollout_status())?,
            RolloutAction::Check => print_json(&engine.check_rollout())?,
        },
        Commands::Prune { days } => {
            print_json(&engine.prune(days)?)?;
        }
        Commands::Session {
            app,
            start_ms,
            duration_ms,
        } => {
            let session = SessionRecord {
                target_app: app,
                start_ms: start_ms.unwrap_or_else(|| clock.now_ms()),
                duration_ms,
            };
            engine.record_session(&session)?;
            print_json(&session)?;
        }
        Commands::Switch { state } => {
            let enabled = matches!(state, Toggle::On);
            engine.set_enabled(enabled)?;
            print_json(&serde_json::json!({ "enabled": enabled }))?;
        }
        Commands::Snooze { minutes } => {
            if minutes == 0 {
                engine.clear_snooze()?;
                print_json(&serde_json::json!({ "snooze_until_ms": null }))?;
            } else {
                let until = clock.now_ms() + i64::from(minutes) * 60_000;
                engine.snooze_until(until)?;
                print_json(&serde_json::json!({ "snooze_until_ms": until }))?;
            }
        }
        Commands::Uninstalled { app } => {
            engine.mark_uninstalled(&app)?;
            print_json(&serde_json::json!({ "uninstalled": app }))?;
        }
    }

    store.save().context("Failed to save state")?;
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn labels_parse_in_any_case() {
        assert_eq!(parse_label::<UserChoice>("go-back"), Ok(UserChoice::GoBack));
        assert_eq!(parse_label::<Persona>("new_user"), Ok(Persona::NewUser));
        assert!(parse_label::<Feedback>("meh").is_err());
    }
}
