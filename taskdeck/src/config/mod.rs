//! Configuration for the `taskdeck` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskdeck/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use taskdeck_proto::task::TaskStatus;

use crate::tasks::{CreateReconcile, StoreConfig};
use crate::teams::UnownedDeletePolicy;

/// Default service address.
pub const DEFAULT_API_BASE: &str = "http://localhost:8000";

/// Default transport timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The service address is not an absolute URL.
    #[error("invalid api base {value:?}: {source}")]
    InvalidApiBase {
        /// Value given.
        value: String,
        /// Parser error.
        source: url::ParseError,
    },

    /// No data directory was configured and none could be determined.
    #[error("could not determine data directory; set [teams] data_dir")]
    NoDataDir,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    remote: RemoteFileConfig,
    tasks: TasksFileConfig,
    teams: TeamsFileConfig,
}

/// `[remote]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RemoteFileConfig {
    api_base: Option<String>,
    request_timeout_secs: Option<u64>,
    event_buffer: Option<usize>,
}

/// `[tasks]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TasksFileConfig {
    max_title_len: Option<usize>,
    create_reconcile: Option<CreateReconcile>,
}

/// `[teams]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TeamsFileConfig {
    data_dir: Option<PathBuf>,
    unowned_delete: Option<UnownedDeletePolicy>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Remote --
    /// Base URL of the task service.
    pub api_base: Url,
    /// Transport timeout for each request.
    pub request_timeout: Duration,
    /// Capacity of the store event channel.
    pub event_buffer: usize,

    // -- Tasks --
    /// Longest accepted task title, in characters.
    pub max_title_len: usize,
    /// Reconciliation after a confirmed create.
    pub create_reconcile: CreateReconcile,

    // -- Teams --
    /// Directory holding the membership ledger, `None` if undeterminable.
    pub data_dir: Option<PathBuf>,
    /// Delete rule for teams without a recorded creator.
    pub unowned_delete: UnownedDeletePolicy,
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/taskdeck/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or the resolved API base is not a valid URL.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let store = StoreConfig::default();

        let value = cli
            .api_base
            .as_deref()
            .or(file.remote.api_base.as_deref())
            .unwrap_or(DEFAULT_API_BASE);
        let api_base = Url::parse(value).map_err(|source| ConfigError::InvalidApiBase {
            value: value.to_string(),
            source,
        })?;

        Ok(Self {
            api_base,
            request_timeout: Duration::from_secs(
                file.remote
                    .request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            event_buffer: file.remote.event_buffer.unwrap_or(store.event_buffer),
            max_title_len: file.tasks.max_title_len.unwrap_or(store.max_title_len),
            create_reconcile: file
                .tasks
                .create_reconcile
                .unwrap_or(store.create_reconcile),
            data_dir: file
                .teams
                .data_dir
                .clone()
                .or_else(|| dirs::data_dir().map(|d| d.join("taskdeck"))),
            unowned_delete: file.teams.unowned_delete.unwrap_or_default(),
        })
    }

    /// Settings for the mutation store.
    #[must_use]
    pub const fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_title_len: self.max_title_len,
            create_reconcile: self.create_reconcile,
            event_buffer: self.event_buffer,
        }
    }

    /// Directory for the membership ledger.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoDataDir`] if none is configured and the
    /// platform has no data directory.
    pub fn ledger_dir(&self) -> Result<PathBuf, ConfigError> {
        self.data_dir.clone().ok_or(ConfigError::NoDataDir)
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Task lists with team membership")]
pub struct CliArgs {
    /// Base URL of the task service.
    #[arg(long, env = "TASKDECK_API_BASE")]
    pub api_base: Option<String>,

    /// Account name to sign in with.
    #[arg(long, env = "TASKDECK_USER")]
    pub user: Option<String>,

    /// Account password.
    #[arg(long, env = "TASKDECK_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Path to config file (default: `~/.config/taskdeck/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKDECK_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskdeck.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do (default: `whoami`).
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show the signed-in identity.
    Whoami,
    /// List tasks, personal unless `--team` is given.
    Tasks {
        /// Team whose tasks to list.
        #[arg(long)]
        team: Option<String>,
        /// Only tasks with this (effective) status.
        #[arg(long)]
        status: Option<TaskStatus>,
        /// Only tasks whose title contains this text.
        #[arg(long)]
        query: Option<String>,
    },
    /// Create a task.
    Add {
        /// Title.
        title: String,
        /// Longer description.
        #[arg(long)]
        description: Option<String>,
        /// Due date, `YYYY-MM-DD`.
        #[arg(long)]
        due: Option<chrono::NaiveDate>,
        /// Team to create it in.
        #[arg(long)]
        team: Option<String>,
    },
    /// Advance a task to its next status.
    Cycle {
        /// Task ID.
        id: String,
        /// Team the task belongs to.
        #[arg(long)]
        team: Option<String>,
    },
    /// Change task fields.
    Edit {
        /// Task ID.
        id: String,
        /// New title.
        #[arg(long)]
        title: Option<String>,
        /// New description.
        #[arg(long)]
        description: Option<String>,
        /// New due date, `YYYY-MM-DD`.
        #[arg(long)]
        due: Option<chrono::NaiveDate>,
        /// New category.
        #[arg(long)]
        category: Option<String>,
        /// Team the task belongs to.
        #[arg(long)]
        team: Option<String>,
    },
    /// Delete a task.
    Rm {
        /// Task ID.
        id: String,
        /// Team the task belongs to.
        #[arg(long)]
        team: Option<String>,
    },
    /// Assign a team member to a task.
    Assign {
        /// Team ID.
        team: String,
        /// Task ID.
        task: String,
        /// Member identity ID.
        member: String,
    },
    /// Remove a team member from a task.
    Unassign {
        /// Team ID.
        team: String,
        /// Task ID.
        task: String,
        /// Member identity ID.
        member: String,
    },
    /// List known teams.
    Teams {
        /// List the service's teams instead of the local ledger.
        #[arg(long)]
        remote: bool,
    },
    /// Create a team.
    TeamCreate {
        /// Team name.
        name: String,
        /// Create it on the service instead of the local ledger.
        #[arg(long)]
        remote: bool,
    },
    /// Join a team by code.
    TeamJoin {
        /// Six-character join code, any case.
        code: String,
        /// Join on the service instead of the local ledger.
        #[arg(long)]
        remote: bool,
    },
    /// Leave a team.
    TeamLeave {
        /// Team ID.
        id: String,
    },
    /// Delete a team you created.
    TeamDelete {
        /// Team ID.
        id: String,
    },
    /// Select the current team.
    TeamSelect {
        /// Team ID.
        id: String,
    },
    /// Remove all locally stored ledger data.
    ClearLocal,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("taskdeck").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
