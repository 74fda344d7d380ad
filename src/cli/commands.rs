use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tz", about = concat!("taskzero v", env!("CARGO_PKG_VERSION"), " - next actions from plain markdown"), version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Run against a different vault directory
    #[arg(short = 'C', long = "vault-dir", global = true)]
    pub vault_dir: Option<String>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a taskzero vault in the current directory
    Init(InitArgs),
    /// Reconcile documents with the task database
    Sync(SyncArgs),
    /// Keep the database and documents in sync until interrupted
    Watch,
    /// Show the aggregated next-actions list (default)
    Next,
    /// List open tasks
    List(ListArgs),
    /// Show a task with its ancestors and descendants
    Show(ShowArgs),
    /// Capture a new task into a note
    Add(AddArgs),
    /// Add a subtask under a task
    Sub(SubArgs),
    /// Mark a task done (or open again)
    Done(IdArg),
    /// Toggle a task between open and done
    Toggle(IdArg),
    /// Set a task's type
    Type(TypeArgs),
    /// Move a task line to another note
    Mv(MvArgs),
    /// Move completed tasks out of a note into the archive note
    Archive(ArchiveArgs),
    /// Delete tasks that have been missing for longer than the retention window
    Sweep,
    /// Validate database and document integrity
    Check,
    /// Inspect or change which replica may write
    Replica(ReplicaCmd),
}

// ---------------------------------------------------------------------------
// Init args
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct InitArgs {
    /// Anchor prefix for task ids (default: tz)
    #[arg(long)]
    pub prefix: Option<String>,
    /// Note that quick capture appends to
    #[arg(long)]
    pub default_note: Option<String>,
    /// Reinitialize even if .taskzero/ already exists
    #[arg(long)]
    pub force: bool,
}

// ---------------------------------------------------------------------------
// Read command args
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct SyncArgs {
    /// Vault-relative notes to reconcile (default: every markdown note)
    pub paths: Vec<String>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Filter by type (inbox, next-action, project, waiting-on, someday, dependent)
    #[arg(long = "type")]
    pub task_type: Option<String>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Task ID to show
    pub id: u64,
}

// ---------------------------------------------------------------------------
// Write command args
// ---------------------------------------------------------------------------

#[derive(Args)]
pub struct AddArgs {
    /// Task text; may carry type tags and $dates
    pub text: String,
    /// Note to append to (default: the configured default note)
    #[arg(long)]
    pub note: Option<String>,
}

#[derive(Args)]
pub struct SubArgs {
    /// Parent task ID
    pub id: u64,
    /// Subtask text
    pub text: String,
}

#[derive(Args)]
pub struct IdArg {
    /// Task ID
    pub id: u64,
}

#[derive(Args)]
pub struct TypeArgs {
    /// Task ID
    pub id: u64,
    /// New type (inbox, next-action, project, waiting-on, someday, dependent)
    pub task_type: String,
}

#[derive(Args)]
pub struct MvArgs {
    /// Task ID
    pub id: u64,
    /// Vault-relative target note
    pub path: String,
    /// Insert before this task ID
    #[arg(long, conflicts_with = "after")]
    pub before: Option<u64>,
    /// Insert after this task ID
    #[arg(long)]
    pub after: Option<u64>,
}

#[derive(Args)]
pub struct ArchiveArgs {
    /// Note to archive from (default: the configured default note)
    pub path: Option<String>,
}

#[derive(Args)]
pub struct ReplicaCmd {
    #[command(subcommand)]
    pub action: Option<ReplicaAction>,
}

#[derive(Subcommand)]
pub enum ReplicaAction {
    /// Show this replica's id and whether it may write (default)
    Status,
    /// Make this replica the only writer
    Claim,
    /// Let every replica write again
    Release,
}
