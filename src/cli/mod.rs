//! Command-line interface for ifm
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::clock::SystemClock;
use crate::config::Config;
use crate::error::Result;
use crate::file_store::FileStore;
use crate::output::OutputOptions;
use crate::service::IdeaFlowService;
use crate::storage::Storage;
use crate::task::TaskId;
use crate::timeline::TimelineOptions;

mod event;
mod state;
mod task;
mod timeline;

/// ifm - IdeaFlow Mapping
///
/// Tracks how work on a task moves between progress, conflict, learning and
/// rework, and prints the resulting timelines.
#[derive(Parser, Debug)]
#[command(name = "ifm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory holding `.ideaflow.toml` and the data directory (defaults to current directory)
    #[arg(long, global = true, env = "IFM_ROOT")]
    pub root: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Task management
    #[command(subcommand)]
    Task(TaskCommands),

    /// Flow state transitions
    #[command(subcommand)]
    State(StateCommands),

    /// Add a note to a task
    Note {
        /// Task ID
        id: TaskId,

        /// Note text
        comment: String,
    },

    /// Mark the start of a subtask
    Subtask {
        /// Task ID
        id: TaskId,

        /// Subtask description
        comment: String,
    },

    /// Report editor, idle or external activity
    #[command(subcommand)]
    Activity(ActivityCommands),

    /// Print a derived timeline
    #[command(subcommand)]
    Timeline(TimelineCommands),
}

/// Task subcommands
#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task (starts it unless --no-start)
    New {
        /// Unique task name
        name: String,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,

        /// Register the task without opening its primary state
        #[arg(long)]
        no_start: bool,
    },

    /// Show a task by name
    Show {
        /// Task name
        name: String,
    },

    /// Start a task created with --no-start
    Start {
        /// Task ID
        id: TaskId,
    },

    /// Close every open state of a task
    End {
        /// Task ID
        id: TaskId,
    },
}

/// State subcommands
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Open a state, closing the scope's current state
    Open {
        /// Task ID
        id: TaskId,

        /// State type: progress, conflict, learning, rework
        #[arg(long = "type", value_name = "TYPE")]
        state_type: String,

        /// Scope: primary, subtask, nested:<depth>
        #[arg(long, default_value = "primary")]
        scope: String,

        /// Starting comment
        #[arg(long)]
        comment: Option<String>,

        /// Continue the previous state of the same type in this scope
        #[arg(long)]
        link: bool,
    },

    /// Open a nested state under an open scope
    Nest {
        /// Task ID
        id: TaskId,

        /// State type: progress, conflict, learning, rework
        #[arg(long = "type", value_name = "TYPE")]
        state_type: String,

        /// Parent scope the nested state is opened under
        #[arg(long, default_value = "primary")]
        parent: String,

        /// Starting comment
        #[arg(long)]
        comment: Option<String>,
    },

    /// Close the state open in a scope
    Close {
        /// Task ID
        id: TaskId,

        /// Scope: primary, subtask, nested:<depth>
        #[arg(long, default_value = "primary")]
        scope: String,

        /// End time (RFC 3339); defaults to now
        #[arg(long)]
        at: Option<String>,

        /// Ending comment
        #[arg(long)]
        comment: Option<String>,
    },
}

/// Activity subcommands
#[derive(Subcommand, Debug)]
pub enum ActivityCommands {
    /// Time spent editing a file
    Editor {
        /// Task ID
        id: TaskId,

        /// File that was edited
        #[arg(long)]
        file: String,

        /// Duration in seconds
        #[arg(long)]
        duration: i64,

        /// The file was modified
        #[arg(long)]
        modified: bool,
    },

    /// Time away from the keyboard
    Idle {
        /// Task ID
        id: TaskId,

        /// Duration in seconds
        #[arg(long)]
        duration: i64,

        /// Comment
        #[arg(long)]
        comment: Option<String>,

        /// Detected automatically rather than declared
        #[arg(long)]
        auto: bool,
    },

    /// Time spent in tools outside the editor
    External {
        /// Task ID
        id: TaskId,

        /// Duration in seconds
        #[arg(long)]
        duration: i64,

        /// Comment
        #[arg(long)]
        comment: Option<String>,
    },
}

/// Timeline subcommands
#[derive(Subcommand, Debug)]
pub enum TimelineCommands {
    /// Flat chronological bands
    Band {
        /// Task ID
        id: TaskId,
    },

    /// Bands with nested states as children
    Tree {
        /// Task ID
        id: TaskId,
    },
}

/// Service and output settings shared by every command.
pub struct Context {
    pub service: IdeaFlowService,
    pub output: OutputOptions,
}

/// Resolve the root, load configuration and open the file store.
pub fn load_context(root: Option<PathBuf>, output: OutputOptions) -> Result<Context> {
    let root = match root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let config = Config::load_from_root(&root)?;
    let storage = Storage::new(root, &config.storage.dir);
    let store = FileStore::open(storage, &config)?;
    let service = IdeaFlowService::new(Arc::new(store), Arc::new(SystemClock))
        .with_timeline_options(TimelineOptions::from(&config.timeline));
    Ok(Context { service, output })
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let ctx = load_context(
            self.root,
            OutputOptions {
                json: self.json,
                quiet: self.quiet,
            },
        )?;

        match self.command {
            Commands::Task(cmd) => match cmd {
                TaskCommands::New {
                    name,
                    description,
                    no_start,
                } => task::run_new(&ctx, name, description, no_start),
                TaskCommands::Show { name } => task::run_show(&ctx, &name),
                TaskCommands::Start { id } => task::run_start(&ctx, id),
                TaskCommands::End { id } => task::run_end(&ctx, id),
            },
            Commands::State(cmd) => match cmd {
                StateCommands::Open {
                    id,
                    state_type,
                    scope,
                    comment,
                    link,
                } => state::run_open(
                    &ctx,
                    state::OpenOptions {
                        id,
                        state_type,
                        scope,
                        comment,
                        link,
                    },
                ),
                StateCommands::Nest {
                    id,
                    state_type,
                    parent,
                    comment,
                } => state::run_nest(&ctx, id, &state_type, &parent, comment),
                StateCommands::Close {
                    id,
                    scope,
                    at,
                    comment,
                } => state::run_close(&ctx, id, &scope, at.as_deref(), comment),
            },
            Commands::Note { id, comment } => event::run_note(&ctx, id, comment),
            Commands::Subtask { id, comment } => event::run_subtask(&ctx, id, comment),
            Commands::Activity(cmd) => event::run_activity(&ctx, cmd),
            Commands::Timeline(cmd) => match cmd {
                TimelineCommands::Band { id } => timeline::run_band(&ctx, id),
                TimelineCommands::Tree { id } => timeline::run_tree(&ctx, id),
            },
        }
    }
}
