//! Human and JSON rendering for `tb` commands.
//!
//! Every command handler receives an [`OutputMode`]. Human output goes to
//! stdout as aligned key/value lines; JSON output is one pretty-printed
//! object per invocation. Errors always go to stderr.

use serde::Serialize;
use std::io::{self, Write};
use tickbox_core::{ErrorCode, IntegrityIssue, Outcome, StoreError, TicketError, TicketRecord};

/// Shared width for human separators.
pub const RULE_WIDTH: usize = 72;

/// Output modes supported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// Write a horizontal separator.
pub fn rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = RULE_WIDTH)
}

/// Render a left-aligned key/value line.
pub fn kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<12} {}", format!("{key}:"), value.as_ref())
}

/// Render `value` as JSON, or through `human_fn` otherwise.
pub fn render<T: Serialize + ?Sized>(
    mode: OutputMode,
    value: &T,
    human_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Human => human_fn(value, &mut out)?,
    }
    Ok(())
}

/// JSON shape of a mutation result.
#[derive(Debug, Serialize)]
pub struct OutcomeView<'a> {
    pub ticket: &'a str,
    pub committed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl<'a> OutcomeView<'a> {
    pub fn new(ticket: &'a str, outcome: &'a Outcome) -> Self {
        match outcome {
            Outcome::Committed(message) => Self {
                ticket,
                committed: true,
                message: Some(message),
                skipped: None,
            },
            Outcome::Skipped(reason) => Self {
                ticket,
                committed: false,
                message: None,
                skipped: Some(reason.to_string()),
            },
        }
    }
}

pub fn render_outcome(mode: OutputMode, ticket: &str, outcome: &Outcome) -> anyhow::Result<()> {
    render(mode, &OutcomeView::new(ticket, outcome), |view, w| {
        match (view.message, view.skipped.as_deref()) {
            (Some(message), _) => writeln!(w, "{message}"),
            (None, Some(reason)) => writeln!(w, "nothing to do for {}: {reason}", view.ticket),
            (None, None) => Ok(()),
        }
    })
}

pub fn render_ticket(mode: OutputMode, ticket: &TicketRecord) -> anyhow::Result<()> {
    render(mode, ticket, write_ticket)
}

fn write_ticket(ticket: &TicketRecord, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}", ticket.title)?;
    rule(w)?;
    kv(w, "Ticket", &ticket.ticket_name)?;
    kv(w, "State", ticket.state.as_deref().unwrap_or("-"))?;
    kv(w, "Assigned", ticket.assigned.as_deref().unwrap_or("-"))?;
    if let Some(opened) = ticket.opened {
        kv(w, "Opened", opened.format("%Y-%m-%d %H:%M:%S UTC").to_string())?;
    }
    if let Some(points) = ticket.points {
        kv(w, "Points", points.to_string())?;
    }
    if !ticket.tags.is_empty() {
        let tags: Vec<&str> = ticket.tags.iter().map(String::as_str).collect();
        kv(w, "Tags", tags.join(", "))?;
    }
    for attachment in &ticket.attachments {
        kv(w, "Attachment", &attachment.name)?;
    }
    for issue in ticket.integrity_issues() {
        kv(w, "Warning", describe_issue(issue))?;
    }

    for comment in &ticket.comments {
        writeln!(w)?;
        let when = comment
            .created_at
            .map_or_else(String::new, |t| t.format(" on %Y-%m-%d %H:%M").to_string());
        writeln!(w, "{}{when}  [{}]", comment.author, comment.file_name)?;
        for line in comment.body.lines() {
            writeln!(w, "  {line}")?;
        }
    }
    Ok(())
}

fn describe_issue(issue: &IntegrityIssue) -> String {
    match issue {
        IntegrityIssue::MalformedTicketName => "ticket name is not <epoch>_<slug>_<n>".into(),
        IntegrityIssue::MissingMarker { kind } => format!("no {kind} marker"),
        IntegrityIssue::DuplicateMarker { kind, files } => {
            format!("several {kind} markers: {}", files.join(", "))
        }
        IntegrityIssue::UnreadablePoints { content } => {
            format!("POINTS is not a number: {content:?}")
        }
        IntegrityIssue::MalformedComment { file_name } => {
            format!("unreadable comment file {file_name}")
        }
    }
}

/// A structured error with optional hint and error code.
#[derive(Debug, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl CliError {
    /// Pick up code and hint from the first core error in the chain.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let code = err.chain().find_map(|cause| {
            cause
                .downcast_ref::<TicketError>()
                .map(TicketError::code)
                .or_else(|| cause.downcast_ref::<StoreError>().map(StoreError::code))
                .or_else(|| {
                    cause
                        .downcast_ref::<toml::de::Error>()
                        .map(|_| ErrorCode::ConfigParseError)
                })
        });
        Self {
            message: format!("{err:#}"),
            hint: code.and_then(|c| c.hint()).map(ToString::to_string),
            error_code: code.map(|c| c.code().to_string()),
        }
    }
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, &serde_json::json!({ "error": error }))?;
            writeln!(out)?;
        }
        OutputMode::Human => {
            match &error.error_code {
                Some(code) => writeln!(out, "error[{code}]: {}", error.message)?,
                None => writeln!(out, "error: {}", error.message)?,
            }
            if let Some(hint) = &error.hint {
                writeln!(out, "  hint: {hint}")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickbox_core::SkipReason;

    #[test]
    fn committed_outcome_serializes_message() {
        let outcome = Outcome::Committed("added tags (x) to ticket t".into());
        let json = serde_json::to_value(OutcomeView::new("t", &outcome)).expect("serialize");
        assert_eq!(json["committed"], true);
        assert_eq!(json["message"], "added tags (x) to ticket t");
        assert!(json.get("skipped").is_none());
    }

    #[test]
    fn skipped_outcome_serializes_reason() {
        let outcome = Outcome::Skipped(SkipReason::Unchanged);
        let json = serde_json::to_value(OutcomeView::new("t", &outcome)).expect("serialize");
        assert_eq!(json["committed"], false);
        assert_eq!(json["skipped"], "value unchanged");
    }

    #[test]
    fn cli_error_finds_core_code_under_context() {
        let err = anyhow::Error::new(TicketError::NotFound("1_x_1".into()))
            .context("failed to show ticket");
        let cli = CliError::from_anyhow(&err);
        assert_eq!(cli.error_code.as_deref(), Some("E2001"));
        assert!(cli.message.contains("failed to show ticket"));
        assert!(cli.hint.is_some());
    }

    #[test]
    fn config_syntax_errors_map_to_config_code() {
        let parse = toml::from_str::<toml::Table>("branch = [").expect_err("should fail");
        let err = anyhow::Error::new(parse).context("Failed to parse .tickbox/config.toml");
        let cli = CliError::from_anyhow(&err);
        assert_eq!(cli.error_code.as_deref(), Some("E1002"));
    }

    #[test]
    fn plain_errors_have_no_code() {
        let cli = CliError::from_anyhow(&anyhow::anyhow!("boom"));
        assert_eq!(cli.error_code, None);
        assert_eq!(cli.hint, None);
    }
}
