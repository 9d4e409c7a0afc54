// vigil/src/cli.rs
//
// Single source of truth for all CLI definitions (Clap structs).

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use vigil_core::domain::remediation::TaskStatus;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Data Quality & Observability Engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Project directory (holds vigil.yaml)
    #[arg(long, global = true, default_value = ".", env = "VIGIL_PROJECT_DIR")]
    pub project_dir: PathBuf,

    /// Who is acting; recorded in the audit trail
    #[arg(long, global = true, default_value = "cli", env = "VIGIL_ACTOR")]
    pub actor: String,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "table")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 🛠️  Initializes the engine: loads rule files, registers configured pairs
    Setup,

    /// 🩺 Shows engine health (state, source, counts)
    Health,

    /// 🚦 Fails unless the engine is ready for activation
    Ready,

    /// ⬆️  Migrates the state schema one version forward
    Upgrade,

    /// 📜 Rule catalog (definitions, versions, approvals)
    Rule(RuleArgs),

    /// 📦 Rule packs (staging, promotion)
    Pack(PackArgs),

    /// 🚀 Evaluates an active pack against an asset
    Apply {
        pack: String,
        asset: String,
    },

    /// 📈 Anomaly detection
    Anomaly(AnomalyArgs),

    /// 🔄 Monitoring cycles and monitored pairs
    Monitor(MonitorArgs),

    /// 🚨 Incident lifecycle
    Incident(IncidentArgs),

    /// 🧰 Remediation tasks
    Task(TaskArgs),

    /// 🛡️  Migration guardrails, diagnostics, audit trail
    Admin(AdminArgs),
}

#[derive(Args)]
pub struct RuleArgs {
    #[command(subcommand)]
    pub command: RuleCommands,
}

#[derive(Subcommand)]
pub enum RuleCommands {
    /// List rules with their latest version
    List,
    /// Show every version of a rule
    Show { id: String },
    /// Create rules from a YAML file
    Create {
        #[arg(long, short)]
        file: PathBuf,
    },
    /// Edit a rule from a YAML file (rewrites a draft or appends a new version)
    Edit {
        #[arg(long, short)]
        file: PathBuf,
    },
    /// Submit the latest draft for approval
    Submit { id: String },
    /// Approve the pending version
    Approve { id: String },
    /// Send the pending version back to draft
    Reject {
        id: String,
        #[arg(long)]
        reason: String,
    },
    /// Deprecate every version of a rule
    Deprecate { id: String },
    /// Dry-run a rule on one sample (JSON value or plain string)
    Preview { id: String, sample: String },
}

#[derive(Args)]
pub struct PackArgs {
    #[command(subcommand)]
    pub command: PackCommands,
}

#[derive(Subcommand)]
pub enum PackCommands {
    List,
    /// Stage a new, empty pack
    Create { name: String },
    /// Reference a rule version from a staged pack
    Add {
        pack: String,
        rule: String,
        #[arg(long, default_value = "1")]
        version: u32,
    },
    /// Activate a staged pack (every referenced version must be approved)
    Promote { pack: String },
    Retire { pack: String },
}

#[derive(Args)]
pub struct AnomalyArgs {
    #[command(subcommand)]
    pub command: AnomalyCommands,
}

#[derive(Subcommand)]
pub enum AnomalyCommands {
    /// Queue a synthetic observation for a drill
    Inject { asset: String, score: f64 },
    /// Turn queued drills and unanalyzed evaluations into signals
    Detect,
    /// List every signal
    List,
}

#[derive(Args)]
pub struct MonitorArgs {
    #[command(subcommand)]
    pub command: MonitorCommands,
}

#[derive(Subcommand)]
pub enum MonitorCommands {
    Register { pack: String, asset: String },
    Unregister { pack: String, asset: String },
    /// List monitored pairs
    Pairs,
    /// Run one cycle over every monitored pair
    Run {
        #[arg(long, default_value = "manual_monitoring_cycle")]
        label: String,
    },
    /// Run cycles periodically until Ctrl-C
    Watch {
        /// Seconds between cycles
        #[arg(long, default_value = "3600")]
        every: u64,
        #[arg(long, default_value = "scheduled")]
        prefix: String,
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
    },
}

#[derive(Args)]
pub struct IncidentArgs {
    #[command(subcommand)]
    pub command: IncidentCommands,
}

#[derive(Subcommand)]
pub enum IncidentCommands {
    List {
        /// Only open and acknowledged incidents
        #[arg(long)]
        active: bool,
    },
    Show { id: String },
    /// Fold uncorrelated signals into incidents
    Correlate,
    Ack { id: String },
    Resolve {
        id: String,
        #[arg(long)]
        note: String,
    },
    Close { id: String },
}

#[derive(Args)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub command: TaskCommands,
}

#[derive(Subcommand)]
pub enum TaskCommands {
    List,
    /// Create a task on an incident, or on the latest open incident of an asset
    Create {
        #[arg(long, conflicts_with = "asset", required_unless_present = "asset")]
        incident: Option<String>,
        #[arg(long)]
        asset: Option<String>,
        #[arg(long, short)]
        description: String,
        #[arg(long)]
        assignee: String,
    },
    /// Move a task to a new status (assigned, in_progress, escalated, completed)
    Status {
        id: String,
        status: TaskStatus,
        #[arg(long, default_value = "")]
        note: String,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    Reassign {
        id: String,
        assignee: String,
        #[arg(long)]
        expected_version: Option<u64>,
    },
    Complete {
        id: String,
        #[arg(long)]
        evidence: String,
    },
    /// Counts by status and mean time to resolution
    Summary,
}

#[derive(Args)]
pub struct AdminArgs {
    #[command(subcommand)]
    pub command: AdminCommands,
}

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Export evaluations, signals, incidents, tasks and audit from the last hours
    Diagnostics {
        #[arg(long, default_value = "24")]
        hours: u32,
        /// Write the JSON report here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Capture a migration baseline
    Baseline,
    /// Diff the live state against a baseline (latest by default)
    Validate {
        #[arg(long)]
        baseline: Option<String>,
    },
    /// Audit history of one entity
    Audit {
        /// rule, pack, incident, task, migration_baseline, engine
        kind: String,
        id: String,
    },
}
