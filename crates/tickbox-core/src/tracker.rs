//! Ticket mutations, one commit each.
//!
//! Every operation first checks its guard against the in-memory
//! [`TicketRecord`]. A rejected guard returns [`Outcome::Skipped`] without
//! opening a transaction. Otherwise the operation computes the file diff,
//! applies it inside one [`Transaction`], commits with a fixed message, and
//! brings the record up to date.
//!
//! | Operation          | Commit message                               |
//! |--------------------|----------------------------------------------|
//! | `create`           | `added ticket X`                             |
//! | `add_comment`      | `added comment to ticket X`                  |
//! | `change_state`     | `added state (S) to ticket X`                |
//! | `change_assigned`  | `assigned E to ticket X`                     |
//! | `change_title`     | `changed title to "T" on ticket X`           |
//! | `change_points`    | `set points to N for ticket X`               |
//! | `add_tag`          | `added tags (a,b) to ticket X`               |
//! | `remove_tag`       | `removed tags (a,b) from ticket X`           |
//! | `change_comment`   | `changed comment COMMENT_...`                |
//! | `attach`           | `added attachment NAME to ticket X`          |

use std::fmt;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::codec::{self, CommentKey};
use crate::config::AuthorConfig;
use crate::error::{StoreError, TicketError};
use crate::model::TicketRecord;
use crate::schema::FieldKind;
use crate::store::{Transaction, VersionedStore, ticket_path};

/// State written at creation.
pub const INITIAL_STATE: &str = "open";

/// Author email used when neither config nor the store names one.
pub const ANONYMOUS_EMAIL: &str = "anon";

const NAME_ATTEMPTS: usize = 8;

/// The acting user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: Option<String>,
    pub email: String,
}

impl Author {
    #[must_use]
    pub fn new(email: &str) -> Self {
        Self {
            name: None,
            email: email.to_string(),
        }
    }

    /// Resolve identity: explicit overrides, then `user.email` / `user.name`
    /// from the store, then [`ANONYMOUS_EMAIL`].
    pub fn resolve<S: VersionedStore + ?Sized>(
        store: &S,
        overrides: &AuthorConfig,
    ) -> Result<Self, StoreError> {
        let email = match non_blank(overrides.email.as_deref()) {
            Some(email) => Some(email.to_string()),
            None => store.config("user.email")?,
        };
        let name = match non_blank(overrides.name.as_deref()) {
            Some(name) => Some(name.to_string()),
            None => store.config("user.name")?,
        };
        Ok(Self {
            name: name.filter(|n| !n.trim().is_empty()),
            email: email
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| ANONYMOUS_EMAIL.to_string()),
        })
    }
}

/// Options for [`Tracker::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub comment: Option<String>,
    pub tags: Vec<String>,
}

/// Why a mutation was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The argument was absent or blank.
    Empty,
    /// The argument would break the directory layout (`/`, NUL).
    InvalidValue,
    /// The new value equals the current one.
    Unchanged,
    /// Every requested tag or attachment is already present.
    AlreadyPresent,
    /// None of the tags to remove are present.
    Absent,
    /// The comment belongs to someone else and no override was given.
    NotAuthor,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "nothing given",
            Self::InvalidValue => "value cannot be stored in a file name",
            Self::Unchanged => "value unchanged",
            Self::AlreadyPresent => "already present",
            Self::Absent => "not present",
            Self::NotAuthor => "not the comment author",
        })
    }
}

/// Result of a mutation that did not fail.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// One commit was made with this message.
    Committed(String),
    /// The guard rejected the mutation; nothing was written.
    Skipped(SkipReason),
}

impl Outcome {
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// Reads tickets from and writes mutations to a [`VersionedStore`].
pub struct Tracker<S: VersionedStore, C: Clock = SystemClock> {
    store: S,
    author: Author,
    clock: C,
    rng: StdRng,
}

impl<S: VersionedStore> Tracker<S, SystemClock> {
    pub fn new(store: S, author: Author) -> Self {
        Self::with_clock(store, author, SystemClock)
    }
}

impl<S: VersionedStore, C: Clock> Tracker<S, C> {
    pub fn with_clock(store: S, author: Author, clock: C) -> Self {
        Self {
            store,
            author,
            clock,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a fixed seed for ticket-name suffixes.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub const fn author(&self) -> &Author {
        &self.author
    }

    /// Read a ticket from the branch tip.
    pub fn open(&self, ticket_name: &str) -> Result<TicketRecord, TicketError> {
        let files = self.store.ticket_files(ticket_name)?;
        if files.is_empty() {
            return Err(TicketError::NotFound(ticket_name.to_string()));
        }
        Ok(TicketRecord::from_files(&self.store, ticket_name, &files)?)
    }

    /// Create a ticket in one commit and return it as read back.
    pub fn create(
        &mut self,
        title: &str,
        options: &CreateOptions,
    ) -> Result<TicketRecord, TicketError> {
        let now = self.clock.now();
        let email = self.author.email.clone();
        let tags = normalize_tags(options.tags.iter().map(String::as_str));
        let comment = options.comment.as_deref().filter(|c| !c.trim().is_empty());

        for _ in 0..NAME_ATTEMPTS {
            let name = codec::create_ticket_name(title, now, &mut self.rng);
            let path =
                |kind: FieldKind, key: &str| ticket_path(&name, &codec::encode_file_name(kind, key));

            let mut tx = Transaction::begin(&mut self.store)?;
            if tx.exists(&path(FieldKind::TicketId, ""))? {
                debug!(ticket = %name, "ticket name taken, drawing another");
                tx.rollback()?;
                continue;
            }

            info!(ticket = %name, "saving ticket");
            tx.write(&path(FieldKind::TicketId, ""), &name)?;
            tx.write(&path(FieldKind::TicketTitle, ""), title)?;
            tx.write(&path(FieldKind::Assigned, &email), &email)?;
            tx.write(&path(FieldKind::State, INITIAL_STATE), INITIAL_STATE)?;
            tx.write(&path(FieldKind::Title, ""), title)?;

            if let Some(comment) = comment {
                let key = CommentKey {
                    epoch: now.timestamp(),
                    author: email.clone(),
                };
                tx.write(&ticket_path(&name, &key.file_name()), comment)?;
            }

            for tag in &tags {
                let file = codec::encode_file_name(FieldKind::Tag, tag);
                tx.write(&ticket_path(&name, &file), &file)?;
            }

            tx.commit(&format!("added ticket {name}"))?;
            return self.open(&name);
        }

        Err(TicketError::NameCollision(title.to_string()))
    }

    /// Add a comment authored by the acting user, timestamped now.
    ///
    /// Comments are never overwritten: if the acting user already commented
    /// in this second, the comment takes the next free second.
    pub fn add_comment(
        &mut self,
        ticket: &mut TicketRecord,
        text: Option<&str>,
    ) -> Result<Outcome, TicketError> {
        let Some(text) = text.filter(|t| !t.trim().is_empty()) else {
            return Ok(skip(ticket, "add_comment", SkipReason::Empty));
        };
        let now = self.clock.now().timestamp();
        let message = format!("added comment to ticket {}", ticket.ticket_name);

        let mut tx = Transaction::begin(&mut self.store)?;
        let mut free = None;
        for epoch in (now..).take(NAME_ATTEMPTS) {
            let key = CommentKey {
                epoch,
                author: self.author.email.clone(),
            };
            let path = ticket_path(&ticket.ticket_name, &key.file_name());
            if tx.exists(&path)? {
                debug!(ticket = %ticket.ticket_name, epoch, "comment name taken");
                continue;
            }
            free = Some((key, path));
            break;
        }
        let Some((key, path)) = free else {
            tx.rollback()?;
            return Err(TicketError::CommentCollision(ticket.ticket_name.clone()));
        };
        tx.write(&path, text)?;
        tx.commit(&message)?;

        ticket.upsert_comment(&key, text.to_string());
        Ok(Outcome::Committed(message))
    }

    /// Move the ticket to `new_state`. Any string is a legal target.
    pub fn change_state(
        &mut self,
        ticket: &mut TicketRecord,
        new_state: Option<&str>,
    ) -> Result<Outcome, TicketError> {
        let Some(new_state) = non_blank(new_state) else {
            return Ok(skip(ticket, "change_state", SkipReason::Empty));
        };
        if let Some(reason) =
            reject_value(ticket, FieldKind::State, new_state, ticket.state.as_deref())
        {
            return Ok(skip(ticket, "change_state", reason));
        }

        let message = format!(
            "added state ({new_state}) to ticket {}",
            ticket.ticket_name
        );
        if !self.replace_marker(ticket, FieldKind::State, new_state, &message)? {
            return Ok(skip(ticket, "change_state", SkipReason::Unchanged));
        }
        ticket.state = Some(new_state.to_string());
        Ok(Outcome::Committed(message))
    }

    /// Assign the ticket; `None` assigns it to the acting user.
    pub fn change_assigned(
        &mut self,
        ticket: &mut TicketRecord,
        new_assigned: Option<&str>,
    ) -> Result<Outcome, TicketError> {
        let new_assigned = non_blank(new_assigned)
            .unwrap_or(self.author.email.as_str())
            .to_string();
        if let Some(reason) = reject_value(
            ticket,
            FieldKind::Assigned,
            &new_assigned,
            ticket.assigned.as_deref(),
        ) {
            return Ok(skip(ticket, "change_assigned", reason));
        }

        let message = format!("assigned {new_assigned} to ticket {}", ticket.ticket_name);
        if !self.replace_marker(ticket, FieldKind::Assigned, &new_assigned, &message)? {
            return Ok(skip(ticket, "change_assigned", SkipReason::Unchanged));
        }
        ticket.assigned = Some(new_assigned);
        Ok(Outcome::Committed(message))
    }

    /// Rewrite the `TITLE` file. The ticket name keeps its original slug.
    pub fn change_title(
        &mut self,
        ticket: &mut TicketRecord,
        new_title: Option<&str>,
    ) -> Result<Outcome, TicketError> {
        let Some(new_title) = new_title else {
            return Ok(skip(ticket, "change_title", SkipReason::Empty));
        };
        if new_title == ticket.title {
            return Ok(skip(ticket, "change_title", SkipReason::Unchanged));
        }

        let file = codec::encode_file_name(FieldKind::Title, "");
        let path = ticket_path(&ticket.ticket_name, &file);
        let message = format!(
            "changed title to \"{new_title}\" on ticket {}",
            ticket.ticket_name
        );

        let mut tx = Transaction::begin(&mut self.store)?;
        tx.remove(&path)?;
        tx.write(&path, new_title)?;
        tx.stage_all()?;
        if !tx.commit(&message)? {
            return Ok(skip(ticket, "change_title", SkipReason::Unchanged));
        }

        ticket.title = new_title.to_string();
        ticket.note_added(&file);
        Ok(Outcome::Committed(message))
    }

    /// Overwrite `POINTS` in place.
    pub fn change_points(
        &mut self,
        ticket: &mut TicketRecord,
        new_points: i64,
    ) -> Result<Outcome, TicketError> {
        if ticket.points == Some(new_points) {
            return Ok(skip(ticket, "change_points", SkipReason::Unchanged));
        }

        let file = codec::encode_file_name(FieldKind::Points, "");
        let message = format!(
            "set points to {new_points} for ticket {}",
            ticket.ticket_name
        );

        let mut tx = Transaction::begin(&mut self.store)?;
        tx.write(&ticket_path(&ticket.ticket_name, &file), new_points.to_string())?;
        if !tx.commit(&message)? {
            return Ok(skip(ticket, "change_points", SkipReason::Unchanged));
        }

        ticket.points = Some(new_points);
        ticket.note_added(&file);
        ticket.clear_issues(FieldKind::Points);
        Ok(Outcome::Committed(message))
    }

    /// Add each comma-separated tag that is not already on the ticket.
    pub fn add_tag(&mut self, ticket: &mut TicketRecord, csv: &str) -> Result<Outcome, TicketError> {
        let tags = normalize_tags(csv.split(','));
        if tags.is_empty() {
            return Ok(skip(ticket, "add_tag", SkipReason::Empty));
        }

        let mut tx = Transaction::begin(&mut self.store)?;
        let mut added = Vec::new();
        for tag in tags {
            let file = codec::encode_file_name(FieldKind::Tag, &tag);
            let path = ticket_path(&ticket.ticket_name, &file);
            if tx.exists(&path)? {
                continue;
            }
            tx.write(&path, &file)?;
            added.push(tag);
        }

        let message = format!(
            "added tags ({}) to ticket {}",
            added.join(","),
            ticket.ticket_name
        );
        if !tx.commit(&message)? {
            return Ok(skip(ticket, "add_tag", SkipReason::AlreadyPresent));
        }

        for tag in added {
            ticket.note_added(&codec::encode_file_name(FieldKind::Tag, &tag));
            ticket.tags.insert(tag);
        }
        Ok(Outcome::Committed(message))
    }

    /// Remove each comma-separated tag that is on the ticket.
    pub fn remove_tag(
        &mut self,
        ticket: &mut TicketRecord,
        csv: &str,
    ) -> Result<Outcome, TicketError> {
        let tags = normalize_tags(csv.split(','));
        if tags.is_empty() {
            return Ok(skip(ticket, "remove_tag", SkipReason::Empty));
        }

        let mut tx = Transaction::begin(&mut self.store)?;
        let mut removed = Vec::new();
        for tag in tags {
            let file = codec::encode_file_name(FieldKind::Tag, &tag);
            if tx.remove(&ticket_path(&ticket.ticket_name, &file))? {
                removed.push(tag);
            }
        }

        let message = format!(
            "removed tags ({}) from ticket {}",
            removed.join(","),
            ticket.ticket_name
        );
        if !tx.commit(&message)? {
            return Ok(skip(ticket, "remove_tag", SkipReason::Absent));
        }

        for tag in removed {
            ticket.note_removed(&codec::encode_file_name(FieldKind::Tag, &tag));
            ticket.tags.remove(&tag);
        }
        Ok(Outcome::Committed(message))
    }

    /// Rewrite a comment's body.
    ///
    /// Without `override_author` only the author named in `comment_file` may
    /// rewrite it. The new body gets an `#Updated_at=` line unless its last
    /// line already is one.
    pub fn change_comment(
        &mut self,
        ticket: &mut TicketRecord,
        new_text: &str,
        comment_file: &str,
        override_author: bool,
    ) -> Result<Outcome, TicketError> {
        let key = CommentKey::from_file_name(comment_file)
            .ok_or_else(|| TicketError::MalformedCommentName(comment_file.to_string()))?;
        if !override_author && !key.is_authored_by(&self.author.email) {
            return Ok(skip(ticket, "change_comment", SkipReason::NotAuthor));
        }

        let body = codec::tag_updated(new_text, self.clock.now());
        let path = ticket_path(&ticket.ticket_name, comment_file);
        let message = format!("changed comment {comment_file}");

        let mut tx = Transaction::begin(&mut self.store)?;
        tx.remove(&path)?;
        tx.write(&path, &body)?;
        tx.stage_all()?;
        if !tx.commit(&message)? {
            return Ok(skip(ticket, "change_comment", SkipReason::Unchanged));
        }

        ticket.upsert_comment(&key, body);
        Ok(Outcome::Committed(message))
    }

    /// Store `content` as attachment `name` unless one by that name exists.
    pub fn attach(
        &mut self,
        ticket: &mut TicketRecord,
        name: &str,
        content: &[u8],
    ) -> Result<Outcome, TicketError> {
        let Some(name) = non_blank(Some(name)) else {
            return Ok(skip(ticket, "attach", SkipReason::Empty));
        };
        if !storable(name) {
            return Ok(skip(ticket, "attach", SkipReason::InvalidValue));
        }

        let file = codec::encode_file_name(FieldKind::Attachment, name);
        let path = ticket_path(&ticket.ticket_name, &file);
        let mut tx = Transaction::begin(&mut self.store)?;
        if tx.exists(&path)? {
            tx.rollback()?;
            return Ok(skip(ticket, "attach", SkipReason::AlreadyPresent));
        }
        tx.write(&path, content)?;
        let message = format!("added attachment {name} to ticket {}", ticket.ticket_name);
        tx.commit(&message)?;

        *ticket = self.open(&ticket.ticket_name)?;
        Ok(Outcome::Committed(message))
    }

    /// Swap every marker of a name-encoded single field for `value`.
    /// Returns whether a commit was made.
    fn replace_marker(
        &mut self,
        ticket: &mut TicketRecord,
        kind: FieldKind,
        value: &str,
        message: &str,
    ) -> Result<bool, TicketError> {
        debug_assert!(kind.is_name_encoded_single());
        let new_file = codec::encode_file_name(kind, value);
        let stale = ticket.marker_files(kind);

        let mut tx = Transaction::begin(&mut self.store)?;
        for old in &stale {
            tx.remove(&ticket_path(&ticket.ticket_name, old))?;
        }
        tx.write(&ticket_path(&ticket.ticket_name, &new_file), value)?;
        if !tx.commit(message)? {
            return Ok(false);
        }

        for old in &stale {
            ticket.note_removed(old);
        }
        ticket.note_added(&new_file);
        ticket.clear_issues(kind);
        Ok(true)
    }
}

fn skip(ticket: &TicketRecord, operation: &str, reason: SkipReason) -> Outcome {
    debug!(ticket = %ticket.ticket_name, operation, %reason, "mutation skipped");
    Outcome::Skipped(reason)
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Whether `value` can be the key of a marker file name.
fn storable(value: &str) -> bool {
    !value.contains(['/', '\0', '\n'])
}

/// Guard for name-encoded single fields. A damaged marker set is never
/// "unchanged", so writing the current value again repairs it.
fn reject_value(
    ticket: &TicketRecord,
    kind: FieldKind,
    value: &str,
    current: Option<&str>,
) -> Option<SkipReason> {
    if !storable(value) {
        Some(SkipReason::InvalidValue)
    } else if current == Some(value) && !ticket.has_issue(kind) {
        Some(SkipReason::Unchanged)
    } else {
        None
    }
}

/// Trim, drop empties, slugify, and dedupe while keeping first-seen order.
pub fn normalize_tags<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw {
        let tag = codec::slug(tag.trim());
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}
