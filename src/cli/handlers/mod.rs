mod init;
pub use init::cmd_init;

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::cli::commands::*;
use crate::cli::output::*;
use crate::io::activity::{ActivityTracker, EditorActivity, NoActivity};
use crate::io::config_io;
use crate::io::debounce::ChangeCoalescer;
use crate::io::events::EventBus;
use crate::io::store::{DocumentStore, FsDocumentStore, FsSnapshotProvider};
use crate::io::vault_io::{self, Vault};
use crate::io::watcher::{VaultEvent, VaultWatcher};
use crate::ops::task::{self as task_ops, MovePosition, Task};
use crate::ops::{archive, check, views};
use crate::ops::reconcile::{Engine, ReconcileReport};
use crate::model::task::TaskStatus;
use crate::util::clock::{Clock, SystemClock};

/// How long the watch loop sleeps between ticks
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Change events this soon after our own write are treated as its echo
const ECHO_WINDOW: Duration = Duration::from_secs(2);

type CmdResult = Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn dispatch(cli: Cli) -> CmdResult {
    let json = cli.json;
    let dir = cli.vault_dir.clone();
    let dir = dir.as_deref();

    // No subcommand → the next-actions list
    match cli.command.unwrap_or(Commands::Next) {
        Commands::Init(args) => cmd_init(args, dir),
        Commands::Next => cmd_next(dir, json),

        // Sync
        Commands::Sync(args) => cmd_sync(dir, args, json),
        Commands::Watch => cmd_watch(dir),

        // Read commands
        Commands::List(args) => cmd_list(dir, args, json),
        Commands::Show(args) => cmd_show(dir, args, json),
        Commands::Check => cmd_check(dir, json),

        // Write commands
        Commands::Add(args) => cmd_add(dir, args, json),
        Commands::Sub(args) => cmd_sub(dir, args, json),
        Commands::Done(args) => cmd_done(dir, args, json),
        Commands::Toggle(args) => cmd_toggle(dir, args, json),
        Commands::Type(args) => cmd_type(dir, args, json),
        Commands::Mv(args) => cmd_mv(dir, args),

        // Maintenance
        Commands::Archive(args) => cmd_archive(dir, args, json),
        Commands::Sweep => cmd_sweep(dir, json),
        Commands::Replica(args) => cmd_replica(dir, args, json),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Everything a command needs to work on one vault
struct Session {
    vault: Vault,
    store: FsDocumentStore,
    engine: Engine,
}

fn vault_root(dir: Option<&str>) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let start = match dir {
        Some(dir) => std::fs::canonicalize(dir)
            .map_err(|e| format!("cannot resolve -C path '{}': {}", dir, e))?,
        None => std::env::current_dir()?,
    };
    Ok(vault_io::discover_vault(&start)?)
}

fn open_session(dir: Option<&str>) -> Result<Session, Box<dyn std::error::Error>> {
    let root = vault_root(dir)?;
    let vault = vault_io::load_vault(&root)?;
    let store = FsDocumentStore::new(&vault.root);
    let engine = Engine::open(&vault, EventBus::new(), Rc::new(SystemClock))?;
    tracing::debug!(root = %vault.root.display(), rows = engine.db().len(), "vault opened");
    Ok(Session {
        vault,
        store,
        engine,
    })
}

/// Refuse to change anything on a replica that may not write
fn require_authority(engine: &Engine) -> CmdResult {
    if engine.is_authoritative() {
        return Ok(());
    }
    let replica = &engine.settings().replica;
    Err(format!(
        "this replica ({}) is not authoritative; '{}' is (see `tz replica`)",
        replica.resolved_self_id(),
        replica.authoritative_id
    )
    .into())
}

/// Push queued rows into their notes and persist the database
fn finish(session: &mut Session) -> CmdResult {
    if !session.engine.queue().is_empty() {
        let report = session.engine.drain_write_back(&session.store, &NoActivity)?;
        for id in &report.dropped {
            tracing::debug!(id, "queued task had nowhere to go");
        }
    }
    session.engine.flush()?;
    Ok(())
}

fn find_task(engine: &Engine, id: u64) -> Result<Task, Box<dyn std::error::Error>> {
    let task = Task::from_id(engine.db(), id);
    if !task.valid {
        return Err(format!("task not found: {}", id).into());
    }
    Ok(task)
}

/// Turn a command-line note path into a vault-relative one. Relative
/// paths are taken as vault-relative already.
fn note_path(vault: &Vault, arg: &str) -> Result<String, Box<dyn std::error::Error>> {
    let path = Path::new(arg);
    if path.is_absolute() {
        let root = std::fs::canonicalize(&vault.root)?;
        let full = std::fs::canonicalize(path).map_err(|e| format!("cannot resolve '{}': {}", arg, e))?;
        return vault_io::relative_path(&root, &full)
            .ok_or_else(|| format!("not inside the vault: {}", arg).into());
    }
    let rel = arg.trim_start_matches("./");
    if vault_io::resolve_in_vault(&vault.root, rel).is_none() {
        return Err(format!("not inside the vault: {}", arg).into());
    }
    Ok(rel.to_string())
}

fn print_task_result(row: &crate::model::task::TaskRow, verb: &str, json: bool) -> CmdResult {
    if json {
        println!("{}", serde_json::to_string_pretty(&task_to_json(row))?);
    } else {
        println!("{} {}", verb, format_task_line(row));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// Reconcile `paths`, reporting each note. Returns the reports.
fn reconcile_all(session: &mut Session, paths: &[String]) -> Result<Vec<ReconcileReport>, Box<dyn std::error::Error>> {
    let provider = FsSnapshotProvider::new(&session.store);
    let mut reports = Vec::new();
    for path in paths {
        let report = session.engine.reconcile_path(path, &provider, &session.store)?;
        reports.push(report);
    }
    Ok(reports)
}

fn cmd_sync(dir: Option<&str>, args: SyncArgs, json: bool) -> CmdResult {
    let mut session = open_session(dir)?;
    require_authority(&session.engine)?;

    let paths = if args.paths.is_empty() {
        session.store.list()?
    } else {
        args.paths
            .iter()
            .map(|p| note_path(&session.vault, p))
            .collect::<Result<Vec<_>, _>>()?
    };

    let reports = reconcile_all(&mut session, &paths)?;
    let drain = session.engine.drain_write_back(&session.store, &NoActivity)?;
    let sweep = session.engine.maybe_sweep();
    session.engine.flush()?;

    if json {
        #[derive(serde::Serialize)]
        struct SyncJson<'a> {
            notes: &'a [ReconcileReport],
            written: &'a [String],
            #[serde(skip_serializing_if = "Option::is_none")]
            sweep: Option<crate::ops::retention::SweepReport>,
        }
        let out = SyncJson {
            notes: &reports,
            written: &drain.written,
            sweep,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for line in reports.iter().filter_map(format_reconcile_report) {
            println!("{}", line);
        }
        for path in &drain.written {
            println!("{}: updated from database", path);
        }
        if let Some(sweep) = sweep
            && !sweep.deleted.is_empty()
        {
            println!("removed {} long-missing tasks", sweep.deleted.len());
        }
        println!("synced {} notes, {} tasks", paths.len(), session.engine.db().len());
    }
    Ok(())
}

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn request_stop(_signal: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

fn install_stop_handler() {
    let handler = request_stop as extern "C" fn(libc::c_int) as libc::sighandler_t;
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe
    unsafe {
        libc::signal(libc::SIGINT, handler);
        libc::signal(libc::SIGTERM, handler);
    }
}

fn cmd_watch(dir: Option<&str>) -> CmdResult {
    let Session {
        mut vault,
        store,
        mut engine,
    } = open_session(dir)?;
    if !engine.is_authoritative() {
        eprintln!("warning: this replica is not authoritative; notes will not be changed");
    }

    let watcher = VaultWatcher::start(&vault.root)?;
    let timing = engine.settings().timing.clone();
    let mut coalescer = ChangeCoalescer::new(timing.change_debounce());
    let mut activity = ActivityTracker::new(timing.editing_idle(), ECHO_WINDOW);
    let provider = FsSnapshotProvider::new(&store);
    install_stop_handler();

    // Catch up on everything that changed while nobody was watching
    for path in store.list()? {
        coalescer.notify(&path, engine.clock().instant());
    }
    println!("watching {} (Ctrl-C to stop)", vault.root.display());

    while !STOP.load(Ordering::SeqCst) {
        let now = engine.clock().instant();

        for event in watcher.poll() {
            match event {
                VaultEvent::DocumentsChanged(paths) => {
                    for path in paths {
                        if activity.touch(&path, now) {
                            coalescer.notify(&path, now);
                        }
                    }
                }
                VaultEvent::ConfigChanged => match config_io::load_settings(&vault.data_dir) {
                    Ok(settings) => {
                        engine.set_settings(settings.clone())?;
                        vault.settings = settings;
                        tracing::info!("configuration reloaded");
                    }
                    Err(e) => tracing::warn!(error = %e, "keeping previous configuration"),
                },
            }
        }

        for path in coalescer.take_ready(now, |p| activity.is_editing(p, now)) {
            match engine.reconcile_path(&path, &provider, &store) {
                Ok(report) => {
                    if report.rewritten {
                        activity.record_own_write(&path, engine.clock().instant());
                    }
                    if let Some(line) = format_reconcile_report(&report) {
                        println!("{}", line);
                    }
                }
                Err(e) => tracing::warn!(path = %path, error = %e, "reconcile failed"),
            }
        }

        match engine.tick(&store, &activity) {
            Ok(report) => {
                if let Some(drain) = report.drain {
                    for path in &drain.written {
                        activity.record_own_write(path, engine.clock().instant());
                        println!("{}: updated from database", path);
                    }
                }
                if let Some(sweep) = report.sweep
                    && !sweep.deleted.is_empty()
                {
                    println!("removed {} long-missing tasks", sweep.deleted.len());
                }
            }
            Err(e) => tracing::warn!(error = %e, "tick failed"),
        }

        activity.prune(now);
        std::thread::sleep(POLL_INTERVAL);
    }

    if let Err(e) = engine.flush() {
        tracing::warn!(error = %e, "could not save task database on exit");
    }
    println!("stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Read commands
// ---------------------------------------------------------------------------

fn cmd_next(dir: Option<&str>, json: bool) -> CmdResult {
    let session = open_session(dir)?;
    let today = session.engine.clock().today();
    let entries = views::get_tasklist(session.engine.db(), today);

    if json {
        println!("{}", serde_json::to_string_pretty(&tasklist_to_json(&entries))?);
    } else if entries.is_empty() {
        println!("nothing to do");
    } else {
        for line in format_tasklist(&entries) {
            println!("{}", line);
        }
    }
    Ok(())
}

fn cmd_list(dir: Option<&str>, args: ListArgs, json: bool) -> CmdResult {
    let session = open_session(dir)?;
    let task_type = args.task_type.as_deref().map(parse_task_type).transpose()?;
    let rows = views::get_tasks(session.engine.db(), task_type);

    if json {
        let out: Vec<TaskJson> = rows.iter().map(task_to_json).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for row in &rows {
            println!("{}", format_task_line(row));
        }
    }
    Ok(())
}

fn cmd_show(dir: Option<&str>, args: ShowArgs, json: bool) -> CmdResult {
    let session = open_session(dir)?;
    let db = session.engine.db();
    let task = find_task(&session.engine, args.id)?;

    let lineage = task.lineage(db);
    if let Some(at) = lineage.cycle {
        eprintln!("warning: parent chain of {} loops at {}", args.id, at);
    }
    let descendants = task.descendants(db);

    if json {
        let out = TaskDetailJson {
            task: task_to_json(&task.row),
            ancestors: lineage.chain.iter().map(task_to_json).collect(),
            descendants: descendants.iter().map(task_to_json).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        for line in format_task_detail(&task.row, &lineage.chain, &descendants) {
            println!("{}", line);
        }
    }
    Ok(())
}

fn cmd_check(dir: Option<&str>, json: bool) -> CmdResult {
    let session = open_session(dir)?;
    let result = check::check_vault(&session.engine, &session.store)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if !result.errors.is_empty() {
            println!("Errors:");
            for err in &result.errors {
                match err {
                    check::CheckError::ParentCycle { task_id, cycle_at } => {
                        println!("  {} has a parent cycle at {}", task_id, cycle_at);
                    }
                    check::CheckError::DanglingParent { task_id, parent_id } => {
                        println!("  {} has unknown parent {}", task_id, parent_id);
                    }
                    check::CheckError::DuplicateAnchor {
                        path,
                        task_id,
                        lines,
                    } => {
                        let lines: Vec<String> = lines.iter().map(|l| (l + 1).to_string()).collect();
                        println!("  {} appears more than once in {} (lines {})", task_id, path, lines.join(", "));
                    }
                }
            }
        }
        if !result.warnings.is_empty() {
            if !result.errors.is_empty() {
                println!();
            }
            println!("Warnings:");
            for warn in &result.warnings {
                match warn {
                    check::CheckWarning::OrphanedParent { task_id, parent_id } => {
                        println!("  {} has parent {} which is missing from its note", task_id, parent_id);
                    }
                    check::CheckWarning::MultipleNextActions {
                        project_id,
                        task_ids,
                    } => {
                        let ids: Vec<String> = task_ids.iter().map(u64::to_string).collect();
                        println!("  project {} has several next actions: {}", project_id, ids.join(", "));
                    }
                }
            }
        }
        if result.valid {
            println!("✓ vault is valid");
        } else {
            println!("✗ vault has errors");
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Write commands
// ---------------------------------------------------------------------------

fn cmd_add(dir: Option<&str>, args: AddArgs, json: bool) -> CmdResult {
    let mut session = open_session(dir)?;
    require_authority(&session.engine)?;
    let note = args
        .note
        .as_deref()
        .map(|n| note_path(&session.vault, n))
        .transpose()?;

    let task = task_ops::capture(&mut session.engine, &session.store, &args.text, note.as_deref())?;
    finish(&mut session)?;
    print_task_result(&task.row, "added", json)
}

fn cmd_sub(dir: Option<&str>, args: SubArgs, json: bool) -> CmdResult {
    let mut session = open_session(dir)?;
    require_authority(&session.engine)?;
    let parent = find_task(&session.engine, args.id)?;

    let sub = parent.add_subtask(&mut session.engine, &session.store, &args.text)?;
    finish(&mut session)?;
    print_task_result(&sub.row, "added", json)
}

fn cmd_done(dir: Option<&str>, args: IdArg, json: bool) -> CmdResult {
    let mut session = open_session(dir)?;
    require_authority(&session.engine)?;
    let mut task = find_task(&session.engine, args.id)?;

    if task.row.status == TaskStatus::Done {
        return print_task_result(&task.row, "already done", json);
    }
    task.toggle(&mut session.engine)?;
    finish(&mut session)?;
    print_task_result(&task.row, "done", json)
}

fn cmd_toggle(dir: Option<&str>, args: IdArg, json: bool) -> CmdResult {
    let mut session = open_session(dir)?;
    require_authority(&session.engine)?;
    let mut task = find_task(&session.engine, args.id)?;

    task.toggle(&mut session.engine)?;
    finish(&mut session)?;
    let verb = match task.row.status {
        TaskStatus::Done => "done",
        TaskStatus::Todo => "reopened",
    };
    print_task_result(&task.row, verb, json)
}

fn cmd_type(dir: Option<&str>, args: TypeArgs, json: bool) -> CmdResult {
    let mut session = open_session(dir)?;
    require_authority(&session.engine)?;
    let task_type = parse_task_type(&args.task_type)?;
    let mut task = find_task(&session.engine, args.id)?;

    task.set_type(&mut session.engine, task_type)?;
    finish(&mut session)?;
    print_task_result(&task.row, task_type.tag_name(), json)
}

fn cmd_mv(dir: Option<&str>, args: MvArgs) -> CmdResult {
    let mut session = open_session(dir)?;
    require_authority(&session.engine)?;
    let target = note_path(&session.vault, &args.path)?;
    let mut task = find_task(&session.engine, args.id)?;

    let position = match (args.before, args.after) {
        (Some(id), _) => MovePosition::Before(id),
        (None, Some(id)) => MovePosition::After(id),
        (None, None) => MovePosition::End,
    };
    if !task.move_to(&mut session.engine, &session.store, &target, position)? {
        return Err(format!("note not found: {}", target).into());
    }
    finish(&mut session)?;
    println!("moved {} to {}", args.id, target);
    Ok(())
}

// ---------------------------------------------------------------------------
// Maintenance
// ---------------------------------------------------------------------------

fn cmd_archive(dir: Option<&str>, args: ArchiveArgs, json: bool) -> CmdResult {
    let session = open_session(dir)?;
    require_authority(&session.engine)?;
    let note = match args.path {
        Some(p) => note_path(&session.vault, &p)?,
        None => session.engine.settings().tasks.default_note.clone(),
    };
    if !session.store.exists(&note) {
        return Err(format!("note not found: {}", note).into());
    }

    let report = archive::archive_completed(&session.engine, &session.store, &note)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.moved == 0 {
        println!("no completed tasks in {}", note);
    } else {
        println!("archived {} tasks from {} to {}", report.moved, report.note, report.archive_note);
    }
    Ok(())
}

fn cmd_sweep(dir: Option<&str>, json: bool) -> CmdResult {
    let mut session = open_session(dir)?;
    require_authority(&session.engine)?;
    let report = session.engine.sweep();
    session.engine.flush()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "{} marked missing, {} removed",
            report.orphaned.len(),
            report.deleted.len()
        );
    }
    Ok(())
}

fn cmd_replica(dir: Option<&str>, args: ReplicaCmd, json: bool) -> CmdResult {
    let root = vault_root(dir)?;
    let data_dir = root.join(vault_io::DATA_DIR);
    let (settings, mut doc) = config_io::read_config(&data_dir)?;
    let self_id = settings.replica.resolved_self_id();

    match args.action.unwrap_or(ReplicaAction::Status) {
        ReplicaAction::Status => {
            let authoritative = settings.replica.is_authoritative();
            if json {
                let out = ReplicaJson {
                    self_id,
                    authoritative_id: Some(settings.replica.authoritative_id.clone())
                        .filter(|id| !id.is_empty()),
                    authoritative,
                };
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("this replica: {}", self_id);
                if settings.replica.authoritative_id.is_empty() {
                    println!("writer: any replica");
                } else {
                    println!("writer: {}", settings.replica.authoritative_id);
                }
                println!("may write: {}", if authoritative { "yes" } else { "no" });
            }
        }
        ReplicaAction::Claim => {
            config_io::set_authoritative(&mut doc, &self_id);
            config_io::write_config(&data_dir, &doc)?;
            tracing::info!(replica = %self_id, "claimed writer role");
            println!("{} is now the only replica that writes", self_id);
        }
        ReplicaAction::Release => {
            config_io::clear_authoritative(&mut doc);
            config_io::write_config(&data_dir, &doc)?;
            tracing::info!(replica = %self_id, "released writer role");
            println!("every replica may write");
        }
    }
    Ok(())
}
