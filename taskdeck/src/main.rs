//! `taskdeck` command-line client.
//!
//! Signs in to the task service, runs one subcommand against it or
//! against the local membership ledger, and exits. Configuration via CLI
//! flags, environment variables, or config file
//! (`~/.config/taskdeck/config.toml`).
//!
//! ```bash
//! taskdeck --user ana --password secret tasks --status pending
//! TASKDECK_USER=ana TASKDECK_PASSWORD=secret taskdeck team-join k7m2qp
//! ```

use std::path::Path;
use std::process::ExitCode;

use chrono::Local;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use taskdeck::auth::{AuthError, AuthSession, IdentityProvider};
use taskdeck::config::{CliArgs, ClientConfig, Command, ConfigError};
use taskdeck::remote::http::{HttpAuthClient, HttpRemote, build_client};
use taskdeck::remote::{RemoteError, TaskRemote};
use taskdeck::tasks::{
    CreateOutcome, MutationError, MutationStore, StoreEvent, TaskFilter, effective_status,
};
use taskdeck::teams::{FileStorage, JoinOutcome, LedgerError, MembershipLedger};
use taskdeck_proto::task::{IdentityId, NewTask, Scope, Task, TaskId, TaskPatch};
use taskdeck_proto::team::{JoinCode, TeamId};

/// Anything that ends a command early.
#[derive(Debug, thiserror::Error)]
enum CliError {
    /// Configuration could not be resolved.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Sign-in failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// A direct service call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// A store operation failed and was rolled back.
    #[error(transparent)]
    Mutation(#[from] MutationError),
    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    /// The join code is malformed.
    #[error("invalid join code: {0}")]
    JoinCode(#[from] taskdeck_proto::team::JoinCodeError),
    /// `edit` was given no fields.
    #[error("nothing to change; pass at least one field")]
    EmptyEdit,
}

type Store = MutationStore<HttpRemote<AuthSession>, AuthSession>;
type Ledger = MembershipLedger<FileStorage, AuthSession>;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(2);
        }
    };

    // Logs go to a file so stdout carries only command output.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(api_base = %config.api_base, "taskdeck starting");

    match run(&cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskdeck.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(cli: &CliArgs, config: &ClientConfig) -> Result<(), CliError> {
    let client = build_client(config.request_timeout)?;
    let session = AuthSession::new();
    let auth = HttpAuthClient::new(client.clone(), config.api_base.clone(), session.clone());

    if let (Some(user), Some(password)) = (cli.user.as_deref(), cli.password.as_deref()) {
        auth.login(user, password).await?;
    }

    let remote = HttpRemote::new(client, config.api_base.clone(), session.clone());
    let (store, events) = MutationStore::new(remote, session.clone(), config.store_config());

    let command = cli.command.clone().unwrap_or(Command::Whoami);
    let result = dispatch(command, &store, &session, config).await;
    report_events(events);

    if session.credential().is_some()
        && let Err(e) = auth.logout().await
    {
        tracing::warn!(error = %e, "sign-out failed");
    }
    result
}

async fn dispatch(
    command: Command,
    store: &Store,
    session: &AuthSession,
    config: &ClientConfig,
) -> Result<(), CliError> {
    match command {
        Command::Whoami => {
            match session.identity() {
                Some(identity) => println!("{}\t{}", identity.id, identity.display_name),
                None => println!("not signed in"),
            }
            Ok(())
        }
        Command::Tasks {
            team,
            status,
            query,
        } => {
            enter(store, team).await?;
            let snapshot = store.snapshot();
            let today = Local::now().date_naive();
            let filter = TaskFilter { status, query };
            for task in filter.apply(&snapshot.tasks, today) {
                print_task(task, today);
            }
            Ok(())
        }
        Command::Add {
            title,
            description,
            due,
            team,
        } => {
            enter(store, team).await?;
            let fields = NewTask {
                title,
                description,
                due,
                category: None,
            };
            match store.create(fields).await? {
                CreateOutcome::Confirmed(id) => println!("{id}"),
                CreateOutcome::Reloaded => println!("created"),
                CreateOutcome::Unreconciled(e) => {
                    println!("created");
                    eprintln!("warning: list not refreshed: {e}");
                }
                CreateOutcome::ScopeChanged => {}
            }
            Ok(())
        }
        Command::Cycle { id, team } => {
            enter(store, team).await?;
            let status = store.cycle_status(&TaskId::new(id)).await?;
            println!("{status}");
            Ok(())
        }
        Command::Edit {
            id,
            title,
            description,
            due,
            category,
            team,
        } => {
            let patch = TaskPatch {
                title,
                description: description.map(Some),
                due: due.map(Some),
                status: None,
                category: category.map(Some),
            };
            if patch.is_empty() {
                return Err(CliError::EmptyEdit);
            }
            enter(store, team).await?;
            store.edit_fields(&TaskId::new(id), patch).await?;
            Ok(())
        }
        Command::Rm { id, team } => {
            enter(store, team).await?;
            store.delete(&TaskId::new(id)).await?;
            Ok(())
        }
        Command::Assign { team, task, member } => {
            store.load_team(TeamId::new(team)).await?;
            let outcome = store
                .assign(&TaskId::new(task), &IdentityId::new(member))
                .await?;
            tracing::debug!(?outcome, "assign finished");
            Ok(())
        }
        Command::Unassign { team, task, member } => {
            store.load_team(TeamId::new(team)).await?;
            let outcome = store
                .unassign(&TaskId::new(task), &IdentityId::new(member))
                .await?;
            tracing::debug!(?outcome, "unassign finished");
            Ok(())
        }
        Command::Teams { remote: true } => {
            for team in store.remote().list_teams().await? {
                println!("{}\t{}", team.id, team.name);
            }
            Ok(())
        }
        Command::TeamCreate { name, remote: true } => {
            let team = store.remote().create_team(&name).await?;
            println!(
                "{}\t{}",
                team.id,
                team.join_code.as_deref().unwrap_or("-")
            );
            Ok(())
        }
        Command::TeamJoin { code, remote: true } => {
            let code = JoinCode::parse(&code)?;
            let team = store.remote().join_team(&code).await?;
            println!("{}\t{}", team.id, team.name);
            Ok(())
        }
        command => run_ledger(command, session, config).await,
    }
}

async fn run_ledger(
    command: Command,
    session: &AuthSession,
    config: &ClientConfig,
) -> Result<(), CliError> {
    let storage = FileStorage::new(config.ledger_dir()?);
    let mut ledger: Ledger =
        MembershipLedger::new(storage, session.clone(), config.unowned_delete);
    let sync = ledger.load().await?;
    tracing::debug!(?sync, "ledger ready");

    match command {
        Command::Teams { .. } => {
            let current = ledger.current_team();
            for team in ledger.owned_teams() {
                let marker = if current == Some(&team.id) { "*" } else { " " };
                println!("{marker} {}\t{}\t{}\towner", team.id, team.name, team.code);
            }
            for team in ledger.joined_teams() {
                let marker = if current == Some(&team.id) { "*" } else { " " };
                println!("{marker} {}\t{}\t{}\tmember", team.id, team.name, team.code);
            }
        }
        Command::TeamCreate { name, .. } => {
            let team = ledger.create(&name).await?;
            println!("{}\t{}", team.id, team.code);
        }
        Command::TeamJoin { code, .. } => match ledger.join_by_code(&code).await? {
            JoinOutcome::Joined(team) => println!("joined {}", team.name),
            JoinOutcome::AlreadyMember(team) => println!("already a member of {}", team.name),
        },
        Command::TeamLeave { id } => ledger.leave(&TeamId::new(id)).await?,
        Command::TeamDelete { id } => {
            let team = ledger.delete(&TeamId::new(id)).await?;
            println!("deleted {}", team.name);
        }
        Command::TeamSelect { id } => ledger.select_team(&TeamId::new(id)).await?,
        Command::ClearLocal => ledger.clear().await?,
        other => tracing::error!(command = ?other, "not a ledger command"),
    }
    Ok(())
}

async fn enter(store: &Store, team: Option<String>) -> Result<usize, MutationError> {
    match team {
        Some(id) => {
            store
                .load_scope(Scope::Team {
                    team_id: TeamId::new(id),
                })
                .await
        }
        None => store.load_personal().await,
    }
}

fn print_task(task: &Task, today: chrono::NaiveDate) {
    let due = task
        .due
        .map_or_else(String::new, |d| d.format("%Y-%m-%d").to_string());
    let assignees: Vec<&str> = task
        .assignees
        .iter()
        .map(|a| a.initials.as_str())
        .collect();
    println!(
        "{}\t{}\t{}\t{}\t{}",
        task.id,
        effective_status(task, today),
        task.title,
        due,
        assignees.join(",")
    );
}

fn report_events(mut events: mpsc::Receiver<StoreEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            StoreEvent::RolledBack {
                kind,
                task_id,
                error,
            } => eprintln!("{kind} of {task_id} was undone: {error}"),
            StoreEvent::AuthenticationExpired => {
                eprintln!("session expired; sign in again");
            }
            StoreEvent::Confirmed { .. } | StoreEvent::Reloaded { .. } => {}
        }
    }
}
