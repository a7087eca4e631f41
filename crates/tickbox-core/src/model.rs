//! In-memory ticket record, rebuilt from a ticket directory's file set.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::Serialize;
use tracing::warn;

use crate::codec::{self, CommentKey};
use crate::error::StoreError;
use crate::schema::{Cardinality, FieldKind, StorageMode};
use crate::store::{ContentRef, TicketFile, VersionedStore};

/// A comment, identified by its creation second and author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Comment {
    pub file_name: String,
    pub author: String,
    pub created_at: Option<DateTime<Utc>>,
    pub body: String,
}

impl Comment {
    fn from_key(key: &CommentKey, body: String) -> Self {
        Self {
            file_name: key.file_name(),
            author: key.author.clone(),
            created_at: Utc.timestamp_opt(key.epoch, 0).single(),
            body,
        }
    }

    #[must_use]
    pub fn key(&self) -> Option<CommentKey> {
        CommentKey::from_file_name(&self.file_name)
    }

    /// When an external sync agent last applied this comment, if tagged.
    #[must_use]
    pub fn updated_at(&self) -> Option<DateTime<FixedOffset>> {
        codec::parse_updated_marker(&self.body)
    }
}

/// A named attachment. Bytes stay in the store until [`load`](Self::load).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub name: String,
    pub file_name: String,
    pub reference: ContentRef,
}

impl Attachment {
    pub fn load<S: VersionedStore + ?Sized>(&self, store: &S) -> Result<Vec<u8>, StoreError> {
        store.read_content(&self.reference)
    }
}

/// Something on disk that breaks the ticket layout invariants.
///
/// Reading never fails on these; the record is built from whatever is usable
/// and the problems are listed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// The directory name is not `<epoch>_<slug>_<suffix>`.
    MalformedTicketName,
    /// A single-valued marker is absent.
    MissingMarker { kind: FieldKind },
    /// A single-valued field has more than one file.
    DuplicateMarker { kind: FieldKind, files: Vec<String> },
    /// `POINTS` content is not an integer.
    UnreadablePoints { content: String },
    /// A `COMMENT_` file whose key is not `<epoch>_<email>`.
    MalformedComment { file_name: String },
}

/// A ticket as reconstructed from its marker files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TicketRecord {
    pub ticket_name: String,
    pub ticket_id: Option<String>,
    pub title: String,
    pub state: Option<String>,
    pub assigned: Option<String>,
    pub points: Option<i64>,
    pub opened: Option<DateTime<Utc>>,
    pub comments: Vec<Comment>,
    pub tags: BTreeSet<String>,
    pub attachments: Vec<Attachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    issues: Vec<IntegrityIssue>,
    #[serde(skip)]
    files: BTreeSet<String>,
}

/// A decoded file value, shaped by the field's storage mode.
enum FieldValue<'a> {
    Name(&'a str),
    Content(&'a str, String),
    Reference(&'a str, ContentRef),
}

impl TicketRecord {
    /// Rebuild a record from the committed files of `ticket_name`.
    ///
    /// Content-stored fields are dereferenced through `store`; attachments
    /// keep their reference. Unknown file names are ignored.
    pub fn from_files<S: VersionedStore + ?Sized>(
        store: &S,
        ticket_name: &str,
        files: &[TicketFile],
    ) -> Result<Self, StoreError> {
        let mut record = Self::empty(ticket_name);

        let parsed = codec::parse_ticket_name(ticket_name);
        if parsed.is_none() {
            warn!(ticket = ticket_name, "ticket name is malformed");
            record.issues.push(IntegrityIssue::MalformedTicketName);
        }
        let fallback_title = parsed.as_ref().map(codec::ParsedTicketName::humanized_title);
        record.opened = parsed.as_ref().and_then(codec::ParsedTicketName::opened);

        let mut singles: BTreeMap<FieldKind, Vec<String>> = BTreeMap::new();
        let mut ticket_title = None;
        let mut title = None;

        let mut sorted: Vec<&TicketFile> = files.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        for file in sorted {
            record.files.insert(file.name.clone());
            let Some((kind, key)) = codec::decode_file_name(&file.name) else {
                continue;
            };
            if kind.cardinality() == Cardinality::Single {
                singles.entry(kind).or_default().push(file.name.clone());
            }

            let value = match kind.storage() {
                StorageMode::Name => FieldValue::Name(key),
                StorageMode::Content => {
                    let bytes = store.read_content(&file.reference)?;
                    FieldValue::Content(key, String::from_utf8_lossy(&bytes).into_owned())
                }
                StorageMode::Reference => FieldValue::Reference(key, file.reference.clone()),
            };

            match (kind, value) {
                (FieldKind::TicketId, FieldValue::Content(_, text)) => {
                    record.ticket_id = Some(text);
                }
                (FieldKind::TicketTitle, FieldValue::Content(_, text)) => ticket_title = Some(text),
                (FieldKind::Title, FieldValue::Content(_, text)) => title = Some(text),
                (FieldKind::Assigned, FieldValue::Name(key)) => {
                    record.assigned = Some(key.to_string());
                }
                (FieldKind::State, FieldValue::Name(key)) => record.state = Some(key.to_string()),
                (FieldKind::Tag, FieldValue::Name(key)) => {
                    record.tags.insert(key.to_string());
                }
                (FieldKind::Points, FieldValue::Content(_, text)) => {
                    record.points = parse_points(&text, &mut record.issues);
                }
                (FieldKind::Comment, FieldValue::Content(key, body)) => match CommentKey::parse(key)
                {
                    Some(key) => record.comments.push(Comment::from_key(&key, body)),
                    None => {
                        warn!(ticket = ticket_name, file = %file.name, "unreadable comment name");
                        record.issues.push(IntegrityIssue::MalformedComment {
                            file_name: file.name.clone(),
                        });
                    }
                },
                (FieldKind::Attachment, FieldValue::Reference(key, reference)) => {
                    record.attachments.push(Attachment {
                        name: key.to_string(),
                        file_name: file.name.clone(),
                        reference,
                    });
                }
                // every (kind, storage) pair in the schema is covered above
                _ => {}
            }
        }

        record.title = title.or(ticket_title).or(fallback_title).unwrap_or_default();
        record
            .comments
            .sort_by(|a, b| (a.created_at, &a.author).cmp(&(b.created_at, &b.author)));

        for kind in [FieldKind::State, FieldKind::Assigned] {
            if !singles.contains_key(&kind) {
                warn!(ticket = ticket_name, %kind, "single-valued marker is missing");
                record.issues.push(IntegrityIssue::MissingMarker { kind });
            }
        }
        for (kind, names) in singles {
            if names.len() > 1 {
                warn!(ticket = ticket_name, %kind, count = names.len(), "duplicate markers");
                record
                    .issues
                    .push(IntegrityIssue::DuplicateMarker { kind, files: names });
            }
        }

        Ok(record)
    }

    fn empty(ticket_name: &str) -> Self {
        Self {
            ticket_name: ticket_name.to_string(),
            ticket_id: None,
            title: String::new(),
            state: None,
            assigned: None,
            points: None,
            opened: None,
            comments: Vec::new(),
            tags: BTreeSet::new(),
            attachments: Vec::new(),
            issues: Vec::new(),
            files: BTreeSet::new(),
        }
    }

    /// Layout problems found while reading. Empty for a healthy ticket.
    #[must_use]
    pub fn integrity_issues(&self) -> &[IntegrityIssue] {
        &self.issues
    }

    /// File names of the ticket directory as last seen.
    #[must_use]
    pub const fn files(&self) -> &BTreeSet<String> {
        &self.files
    }

    /// Local part of the assignee email.
    #[must_use]
    pub fn assigned_name(&self) -> &str {
        self.assigned
            .as_deref()
            .map_or("", |email| email.split('@').next().unwrap_or(email))
    }

    /// `<state>/<ticket_name>`, for display.
    #[must_use]
    pub fn path(&self) -> String {
        format!(
            "{}/{}",
            self.state.as_deref().unwrap_or_default(),
            self.ticket_name
        )
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    #[must_use]
    pub fn comment(&self, file_name: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.file_name == file_name)
    }

    /// Files currently holding a value of `kind`.
    pub(crate) fn marker_files(&self, kind: FieldKind) -> Vec<String> {
        self.files
            .iter()
            .filter(|name| matches!(codec::decode_file_name(name), Some((k, _)) if k == kind))
            .cloned()
            .collect()
    }

    pub(crate) fn note_added(&mut self, file_name: &str) {
        self.files.insert(file_name.to_string());
    }

    pub(crate) fn note_removed(&mut self, file_name: &str) {
        self.files.remove(file_name);
    }

    /// Record a comment body, replacing any comment with the same file name.
    pub(crate) fn upsert_comment(&mut self, key: &CommentKey, body: String) {
        let comment = Comment::from_key(key, body);
        self.note_added(&comment.file_name);
        match self
            .comments
            .iter_mut()
            .find(|c| c.file_name == comment.file_name)
        {
            Some(existing) => *existing = comment,
            None => {
                self.comments.push(comment);
                self.comments
                    .sort_by(|a, b| (a.created_at, &a.author).cmp(&(b.created_at, &b.author)));
            }
        }
    }

    pub(crate) fn has_issue(&self, kind: FieldKind) -> bool {
        self.issues.iter().any(|issue| {
            matches!(issue,
                IntegrityIssue::MissingMarker { kind: k } | IntegrityIssue::DuplicateMarker { kind: k, .. }
                    if *k == kind)
        })
    }

    /// Drop issues for `kind` once a mutation has repaired it.
    pub(crate) fn clear_issues(&mut self, kind: FieldKind) {
        self.issues.retain(|issue| match issue {
            IntegrityIssue::MissingMarker { kind: k } | IntegrityIssue::DuplicateMarker { kind: k, .. } => {
                *k != kind
            }
            IntegrityIssue::UnreadablePoints { .. } => kind != FieldKind::Points,
            _ => true,
        });
    }
}

fn parse_points(text: &str, issues: &mut Vec<IntegrityIssue>) -> Option<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse() {
        Ok(points) => Some(points),
        Err(_) => {
            warn!(content = trimmed, "POINTS is not an integer");
            issues.push(IntegrityIssue::UnreadablePoints {
                content: trimmed.to_string(),
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IntegrityIssue, TicketRecord};
    use crate::error::StoreError;
    use crate::schema::FieldKind;
    use crate::store::{MemoryStore, Transaction, VersionedStore};

    const NAME: &str = "1700000000_fix-login-crash_42";

    fn store_with(files: &[(&str, &str)]) -> Result<MemoryStore, StoreError> {
        let mut store = MemoryStore::new();
        let mut tx = Transaction::begin(&mut store)?;
        for (name, content) in files {
            tx.write(&format!("{NAME}/{name}"), content)?;
        }
        tx.commit("seed")?;
        Ok(store)
    }

    fn load(store: &MemoryStore) -> Result<TicketRecord, StoreError> {
        let files = store.ticket_files(NAME)?;
        TicketRecord::from_files(store, NAME, &files)
    }

    #[test]
    fn reads_every_field_kind() -> Result<(), StoreError> {
        let store = store_with(&[
            ("TICKET_ID", NAME),
            ("TICKET_TITLE", "Fix login crash"),
            ("TITLE", "Fix login crash on Safari"),
            ("ASSIGNED_jane@example.com", "jane@example.com"),
            ("STATE_resolved", "resolved"),
            ("TAG_urgent", "TAG_urgent"),
            ("TAG_auth", "TAG_auth"),
            ("POINTS", "8"),
            ("COMMENT_1700000100_jane@example.com", "second"),
            ("COMMENT_1700000050_bob@example.com", "first"),
            ("ATTACHMENT_trace.log", "stack"),
            ("MILESTONE_v1", "ignored"),
        ])?;
        let record = load(&store)?;

        assert_eq!(record.ticket_id.as_deref(), Some(NAME));
        assert_eq!(record.title, "Fix login crash on Safari");
        assert_eq!(record.state.as_deref(), Some("resolved"));
        assert_eq!(record.assigned.as_deref(), Some("jane@example.com"));
        assert_eq!(record.assigned_name(), "jane");
        assert_eq!(record.points, Some(8));
        assert_eq!(record.opened.map(|t| t.timestamp()), Some(1_700_000_000));
        assert!(record.has_tag("urgent") && record.has_tag("auth"));
        assert_eq!(record.comments.len(), 2);
        assert_eq!(record.comments[0].body, "first");
        assert_eq!(record.comments[1].author, "jane@example.com");
        assert_eq!(record.attachments[0].name, "trace.log");
        assert_eq!(record.attachments[0].load(&store)?, b"stack");
        assert_eq!(record.path(), format!("resolved/{NAME}"));
        assert!(record.integrity_issues().is_empty());
        assert!(record.files().contains("MILESTONE_v1"));
        Ok(())
    }

    #[test]
    fn title_falls_back_to_ticket_title_then_slug() -> Result<(), StoreError> {
        let store = store_with(&[
            ("TICKET_TITLE", "Fix login crash!"),
            ("STATE_open", "open"),
            ("ASSIGNED_a@b.c", "a@b.c"),
        ])?;
        assert_eq!(load(&store)?.title, "Fix login crash!");

        let store = store_with(&[("STATE_open", "open"), ("ASSIGNED_a@b.c", "a@b.c")])?;
        assert_eq!(load(&store)?.title, "fix login crash");
        Ok(())
    }

    #[test]
    fn missing_state_is_reported_not_defaulted() -> Result<(), StoreError> {
        let store = store_with(&[("TITLE", "x"), ("ASSIGNED_a@b.c", "a@b.c")])?;
        let record = load(&store)?;
        assert_eq!(record.state, None);
        assert_eq!(
            record.integrity_issues(),
            &[IntegrityIssue::MissingMarker {
                kind: FieldKind::State
            }]
        );
        Ok(())
    }

    #[test]
    fn duplicate_markers_and_bad_points_are_reported() -> Result<(), StoreError> {
        let store = store_with(&[
            ("STATE_open", "open"),
            ("STATE_resolved", "resolved"),
            ("ASSIGNED_a@b.c", "a@b.c"),
            ("POINTS", "lots"),
            ("COMMENT_soon_a@b.c", "?"),
        ])?;
        let record = load(&store)?;
        assert_eq!(record.points, None);
        assert!(record.comments.is_empty());
        assert!(record.integrity_issues().contains(&IntegrityIssue::DuplicateMarker {
            kind: FieldKind::State,
            files: vec!["STATE_open".into(), "STATE_resolved".into()],
        }));
        assert!(record.integrity_issues().contains(&IntegrityIssue::UnreadablePoints {
            content: "lots".into()
        }));
        assert!(record.integrity_issues().contains(&IntegrityIssue::MalformedComment {
            file_name: "COMMENT_soon_a@b.c".into()
        }));
        assert_eq!(record.marker_files(FieldKind::State).len(), 2);
        Ok(())
    }

    #[test]
    fn malformed_ticket_name_is_soft() -> Result<(), StoreError> {
        let mut store = MemoryStore::new();
        let mut tx = Transaction::begin(&mut store)?;
        tx.write("not-a-ticket/TITLE", "Still readable")?;
        tx.write("not-a-ticket/STATE_open", "open")?;
        tx.write("not-a-ticket/ASSIGNED_a@b.c", "a@b.c")?;
        tx.commit("seed")?;

        let files = store.ticket_files("not-a-ticket")?;
        let record = TicketRecord::from_files(&store, "not-a-ticket", &files)?;
        assert_eq!(record.title, "Still readable");
        assert_eq!(record.opened, None);
        assert_eq!(record.integrity_issues(), &[IntegrityIssue::MalformedTicketName]);
        Ok(())
    }
}
