//! Name codec: ticket directory names, marker file names, and the
//! `#Updated_at=` line appended to rewritten comments.
//!
//! # Ticket names
//!
//! ```text
//! {epoch_seconds}_{slug(title)}_{suffix}
//! ```
//!
//! The suffix is drawn from `0..999` and only lowers the odds of two
//! same-second, same-title creations colliding. The slug is lossy; the full
//! title lives in the `TITLE` file.
//!
//! # Marker file names
//!
//! Unkeyed kinds use their bare prefix (`TICKET_ID`, `TITLE`, `POINTS`, ...).
//! Keyed kinds append `_<key>`, and the key may itself contain `_`
//! (`COMMENT_1700000000_jane_doe@example.com`).

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use rand::Rng;

use crate::schema::{FIELDS, FieldKind};

/// Exclusive upper bound of the random ticket-name suffix.
pub const SUFFIX_BOUND: u32 = 999;

/// Leading text of the marker line that records when a comment was last synced.
pub const UPDATED_MARKER_PREFIX: &str = "#Updated_at=";

const UPDATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Lowercase `input` and collapse every run of characters outside `[a-z0-9]`
/// into a single `-`, with no leading or trailing `-`.
#[must_use]
pub fn slug(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_dash = false;
    for ch in input.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Build a fresh ticket directory name for `title` created at `now`.
pub fn create_ticket_name<R: Rng + ?Sized>(title: &str, now: DateTime<Utc>, rng: &mut R) -> String {
    format!(
        "{}_{}_{}",
        now.timestamp(),
        slug(title),
        rng.gen_range(0..SUFFIX_BOUND)
    )
}

/// The three components of a ticket directory name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTicketName {
    pub epoch: i64,
    pub slug: String,
    pub suffix: u32,
}

impl ParsedTicketName {
    /// The slug with `-` turned back into spaces.
    ///
    /// Only a fallback: the stored `TITLE` content wins whenever present.
    #[must_use]
    pub fn humanized_title(&self) -> String {
        self.slug.replace('-', " ")
    }

    /// Creation time encoded in the name.
    #[must_use]
    pub fn opened(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.epoch, 0).single()
    }
}

/// Split a ticket name into epoch, slug and suffix.
///
/// Returns `None` unless the name has exactly three `_`-separated parts with
/// numeric first and last parts.
#[must_use]
pub fn parse_ticket_name(name: &str) -> Option<ParsedTicketName> {
    let mut parts = name.split('_');
    let epoch = parts.next()?.parse().ok()?;
    let slug = parts.next()?.to_string();
    let suffix = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(ParsedTicketName {
        epoch,
        slug,
        suffix,
    })
}

/// File name for a field of `kind`. `key` is ignored for unkeyed kinds.
#[must_use]
pub fn encode_file_name(kind: FieldKind, key: &str) -> String {
    let descriptor = kind.descriptor();
    if descriptor.keyed {
        format!("{}_{key}", descriptor.prefix)
    } else {
        descriptor.prefix.to_string()
    }
}

/// Classify a file name and split off its key.
///
/// Unkeyed kinds yield an empty key. Unknown prefixes and keyed names with an
/// empty key yield `None` so readers can skip them.
#[must_use]
pub fn decode_file_name(name: &str) -> Option<(FieldKind, &str)> {
    FIELDS.iter().find_map(|field| {
        if field.keyed {
            let key = name.strip_prefix(field.prefix)?.strip_prefix('_')?;
            (!key.is_empty()).then_some((field.kind, key))
        } else {
            (name == field.prefix).then_some((field.kind, ""))
        }
    })
}

/// Identity of a comment: creation second plus author email.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommentKey {
    pub epoch: i64,
    pub author: String,
}

impl CommentKey {
    /// Parse the key part of `COMMENT_<epoch>_<email>`.
    ///
    /// An author containing `/`, NUL or a newline is rejected; it would not
    /// name a file inside the ticket directory.
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let (epoch, author) = key.split_once('_')?;
        if author.is_empty() || author.contains(['/', '\0', '\n']) {
            return None;
        }
        Some(Self {
            epoch: epoch.parse().ok()?,
            author: author.to_string(),
        })
    }

    /// Parse a full comment file name.
    #[must_use]
    pub fn from_file_name(name: &str) -> Option<Self> {
        match decode_file_name(name)? {
            (FieldKind::Comment, key) => Self::parse(key),
            _ => None,
        }
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        encode_file_name(FieldKind::Comment, &format!("{}_{}", self.epoch, self.author))
    }

    /// Whether `email` names this comment's author, ignoring case and
    /// surrounding whitespace on both sides.
    #[must_use]
    pub fn is_authored_by(&self, email: &str) -> bool {
        self.author.trim().to_lowercase() == email.trim().to_lowercase()
    }
}

/// The marker line recording a sync at `at`.
#[must_use]
pub fn updated_marker(at: DateTime<Utc>) -> String {
    format!("{UPDATED_MARKER_PREFIX}{}", at.format(UPDATED_AT_FORMAT))
}

/// Parse the timestamp of a trailing `#Updated_at=` line.
///
/// Returns `None` when the last line is not a marker or its timestamp does
/// not parse. RFC 3339 timestamps are accepted as well.
#[must_use]
pub fn parse_updated_marker(body: &str) -> Option<DateTime<FixedOffset>> {
    let last = body.lines().last()?;
    let stamp = last.trim_end().strip_prefix(UPDATED_MARKER_PREFIX)?.trim();
    DateTime::parse_from_str(stamp, UPDATED_AT_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(stamp))
        .ok()
}

/// Append an updated marker for `now` unless `body` already ends in one.
#[must_use]
pub fn tag_updated(body: &str, now: DateTime<Utc>) -> String {
    if parse_updated_marker(body).is_some() {
        return body.to_string();
    }
    format!("{}\n{}", body.trim_end_matches('\n'), updated_marker(now))
}
