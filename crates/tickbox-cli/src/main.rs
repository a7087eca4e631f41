#![forbid(unsafe_code)]

mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use output::{CliError, OutputMode};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tickbox_core::config::{self, DEFAULT_BRANCH};
use tickbox_core::store::GitStore;
use tickbox_core::{Author, CreateOptions, Outcome, TicketRecord, Tracker};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "tickbox: tickets as marker files on a git branch",
    long_about = None
)]
struct Cli {
    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Act as this email instead of the configured identity.
    #[arg(long, global = true)]
    author: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a ticket in state `open`, assigned to you.
    New {
        title: String,
        /// Initial comment.
        #[arg(long, short)]
        comment: Option<String>,
        /// Comma-separated tags.
        #[arg(long, short, default_value = "")]
        tags: String,
    },

    /// Show one ticket.
    Show { ticket: String },

    /// Move a ticket to another state.
    State { ticket: String, state: String },

    /// Assign a ticket; without EMAIL, assign it to yourself.
    Assign {
        ticket: String,
        email: Option<String>,
    },

    /// Change the display title. The ticket name is unchanged.
    Title { ticket: String, title: String },

    /// Set the story points.
    Points {
        ticket: String,
        #[arg(allow_hyphen_values = true)]
        points: i64,
    },

    /// Add comma-separated tags, or remove them with --remove.
    Tag {
        ticket: String,
        tags: String,
        #[arg(long, short)]
        remove: bool,
    },

    /// Add a comment as yourself.
    Comment { ticket: String, text: String },

    /// Rewrite a comment body. Only its author may, unless --force.
    EditComment {
        ticket: String,
        /// Comment file name, `COMMENT_<epoch>_<email>`.
        file: String,
        text: String,
        #[arg(long)]
        force: bool,
    },

    /// Store a file as an attachment, named after its file name.
    Attach { ticket: String, path: PathBuf },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TICKBOX_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "tickbox=debug,info"
        } else {
            "tickbox=info,warn"
        })
    });

    let format = env::var("TICKBOX_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Open the store for the repository around `cwd`, on the configured branch.
fn open_tracker(cwd: &Path, author_flag: Option<&str>) -> anyhow::Result<Tracker<GitStore>> {
    let store = GitStore::open(cwd, DEFAULT_BRANCH)?;
    let mut cfg = config::resolve_config(store.root())?;
    if let Some(email) = author_flag {
        cfg.author.email = Some(email.to_string());
    }
    let store = store.on_branch(&cfg.branch);
    let author = Author::resolve(&store, &cfg.author)?;
    debug!(branch = %cfg.branch, author = %author.email, "resolved configuration");
    Ok(Tracker::new(store, author))
}

fn load(tracker: &Tracker<GitStore>, name: &str) -> anyhow::Result<TicketRecord> {
    tracker
        .open(name)
        .with_context(|| format!("failed to load ticket {name}"))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let output = cli.output_mode();
    let cwd = env::current_dir()?;
    let mut tracker = open_tracker(&cwd, cli.author.as_deref())?;

    let (ticket, outcome): (TicketRecord, Outcome) = match cli.command {
        Commands::New {
            title,
            comment,
            tags,
        } => {
            let options = CreateOptions {
                comment,
                tags: tags.split(',').map(str::to_string).collect(),
            };
            let ticket = tracker.create(&title, &options)?;
            return output::render_ticket(output, &ticket);
        }
        Commands::Show { ticket } => {
            return output::render_ticket(output, &load(&tracker, &ticket)?);
        }
        Commands::State { ticket, state } => {
            let mut record = load(&tracker, &ticket)?;
            let outcome = tracker.change_state(&mut record, Some(&state))?;
            (record, outcome)
        }
        Commands::Assign { ticket, email } => {
            let mut record = load(&tracker, &ticket)?;
            let outcome = tracker.change_assigned(&mut record, email.as_deref())?;
            (record, outcome)
        }
        Commands::Title { ticket, title } => {
            let mut record = load(&tracker, &ticket)?;
            let outcome = tracker.change_title(&mut record, Some(&title))?;
            (record, outcome)
        }
        Commands::Points { ticket, points } => {
            let mut record = load(&tracker, &ticket)?;
            let outcome = tracker.change_points(&mut record, points)?;
            (record, outcome)
        }
        Commands::Tag {
            ticket,
            tags,
            remove,
        } => {
            let mut record = load(&tracker, &ticket)?;
            let outcome = if remove {
                tracker.remove_tag(&mut record, &tags)?
            } else {
                tracker.add_tag(&mut record, &tags)?
            };
            (record, outcome)
        }
        Commands::Comment { ticket, text } => {
            let mut record = load(&tracker, &ticket)?;
            let outcome = tracker.add_comment(&mut record, Some(&text))?;
            (record, outcome)
        }
        Commands::EditComment {
            ticket,
            file,
            text,
            force,
        } => {
            let mut record = load(&tracker, &ticket)?;
            let outcome = tracker.change_comment(&mut record, &text, &file, force)?;
            (record, outcome)
        }
        Commands::Attach { ticket, path } => {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("{} has no usable file name", path.display()))?
                .to_string();
            let content =
                fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
            let mut record = load(&tracker, &ticket)?;
            let outcome = tracker.attach(&mut record, &name, &content)?;
            (record, outcome)
        }
    };

    output::render_outcome(output, &ticket.ticket_name, &outcome)
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let output = cli.output_mode();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Err(render_err) = output::render_error(output, &CliError::from_anyhow(&err)) {
                eprintln!("error: {err:#} ({render_err})");
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_flag_after_subcommand() {
        let cli = Cli::parse_from(["tb", "show", "1_x_1", "--json"]);
        assert!(cli.json);
        assert_eq!(cli.output_mode(), OutputMode::Json);
    }

    #[test]
    fn default_output_is_human() {
        let cli = Cli::parse_from(["tb", "show", "1_x_1"]);
        assert_eq!(cli.output_mode(), OutputMode::Human);
    }

    #[test]
    fn assign_email_is_optional() {
        let cli = Cli::parse_from(["tb", "assign", "1_x_1"]);
        assert!(matches!(cli.command, Commands::Assign { email: None, .. }));
    }

    #[test]
    fn negative_points_parse() {
        let cli = Cli::parse_from(["tb", "points", "1_x_1", "-3"]);
        assert!(matches!(cli.command, Commands::Points { points: -3, .. }));
    }

    #[test]
    fn tag_remove_flag() {
        let cli = Cli::parse_from(["tb", "tag", "1_x_1", "a,b", "--remove"]);
        assert!(matches!(cli.command, Commands::Tag { remove: true, .. }));
    }

    #[test]
    fn edit_comment_takes_file_and_force() {
        let cli = Cli::parse_from([
            "tb",
            "edit-comment",
            "1_x_1",
            "COMMENT_1_a@b",
            "text",
            "--force",
        ]);
        assert!(matches!(
            cli.command,
            Commands::EditComment { force: true, ref file, .. } if file == "COMMENT_1_a@b"
        ));
    }
}
