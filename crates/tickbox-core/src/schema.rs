//! Field schema for the marker-file ticket layout.
//!
//! Every file inside a ticket directory belongs to exactly one [`FieldKind`].
//! The [`FIELDS`] table declares, per kind, how the file name is formed, where
//! the value lives, and how many values a ticket may hold. Both the reader
//! ([`TicketRecord::from_files`](crate::model::TicketRecord::from_files)) and
//! every mutator in [`crate::tracker`] consult this table instead of carrying
//! their own per-field rules.

use serde::Serialize;
use std::fmt;

/// The kinds of file that may appear inside a ticket directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    TicketId,
    TicketTitle,
    Title,
    Assigned,
    State,
    Tag,
    Points,
    Comment,
    Attachment,
}

/// Where a field's value is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// The value is the file-name suffix; presence of the file is the value.
    Name,
    /// The value is the file content, dereferenced eagerly on read.
    Content,
    /// The value is the content reference itself; bytes are loaded on demand.
    Reference,
}

/// How many values a ticket carries for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Exactly one file of this kind at any committed point.
    Single,
    /// Membership is binary; at most one file per normalized value.
    Set,
    /// Files are only ever added; each carries its own key in the name.
    AppendOnly,
}

/// Declarative description of one field kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub kind: FieldKind,
    /// File name, or file-name prefix when `keyed`.
    pub prefix: &'static str,
    /// Whether the file name carries `_<key>` after the prefix.
    pub keyed: bool,
    pub storage: StorageMode,
    pub cardinality: Cardinality,
}

/// The schema table, one row per [`FieldKind`] in declaration order.
pub static FIELDS: [FieldDescriptor; 9] = [
    FieldDescriptor {
        kind: FieldKind::TicketId,
        prefix: "TICKET_ID",
        keyed: false,
        storage: StorageMode::Content,
        cardinality: Cardinality::Single,
    },
    FieldDescriptor {
        kind: FieldKind::TicketTitle,
        prefix: "TICKET_TITLE",
        keyed: false,
        storage: StorageMode::Content,
        cardinality: Cardinality::Single,
    },
    FieldDescriptor {
        kind: FieldKind::Title,
        prefix: "TITLE",
        keyed: false,
        storage: StorageMode::Content,
        cardinality: Cardinality::Single,
    },
    FieldDescriptor {
        kind: FieldKind::Assigned,
        prefix: "ASSIGNED",
        keyed: true,
        storage: StorageMode::Name,
        cardinality: Cardinality::Single,
    },
    FieldDescriptor {
        kind: FieldKind::State,
        prefix: "STATE",
        keyed: true,
        storage: StorageMode::Name,
        cardinality: Cardinality::Single,
    },
    FieldDescriptor {
        kind: FieldKind::Tag,
        prefix: "TAG",
        keyed: true,
        storage: StorageMode::Name,
        cardinality: Cardinality::Set,
    },
    FieldDescriptor {
        kind: FieldKind::Points,
        prefix: "POINTS",
        keyed: false,
        storage: StorageMode::Content,
        cardinality: Cardinality::Single,
    },
    FieldDescriptor {
        kind: FieldKind::Comment,
        prefix: "COMMENT",
        keyed: true,
        storage: StorageMode::Content,
        cardinality: Cardinality::AppendOnly,
    },
    FieldDescriptor {
        kind: FieldKind::Attachment,
        prefix: "ATTACHMENT",
        keyed: true,
        storage: StorageMode::Reference,
        cardinality: Cardinality::AppendOnly,
    },
];

impl FieldKind {
    /// Look up this kind's row in [`FIELDS`].
    #[must_use]
    pub fn descriptor(self) -> &'static FieldDescriptor {
        &FIELDS[self as usize]
    }

    #[must_use]
    pub fn prefix(self) -> &'static str {
        self.descriptor().prefix
    }

    #[must_use]
    pub fn storage(self) -> StorageMode {
        self.descriptor().storage
    }

    #[must_use]
    pub fn cardinality(self) -> Cardinality {
        self.descriptor().cardinality
    }

    /// True for single-valued kinds whose value lives in the file name.
    ///
    /// Changing such a field means removing the old marker and adding a new
    /// one; the two must land in the same commit.
    #[must_use]
    pub fn is_name_encoded_single(self) -> bool {
        let d = self.descriptor();
        matches!(d.storage, StorageMode::Name) && matches!(d.cardinality, Cardinality::Single)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::{Cardinality, FIELDS, FieldKind, StorageMode};

    #[test]
    fn table_rows_line_up_with_kind_discriminants() {
        for (idx, row) in FIELDS.iter().enumerate() {
            assert_eq!(row.kind as usize, idx, "row {idx} is {:?}", row.kind);
            assert_eq!(row.kind.descriptor(), row);
        }
    }

    #[test]
    fn prefixes_are_unique() {
        let mut prefixes: Vec<_> = FIELDS.iter().map(|d| d.prefix).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), FIELDS.len());
    }

    #[test]
    fn name_encoded_single_fields() {
        assert!(FieldKind::State.is_name_encoded_single());
        assert!(FieldKind::Assigned.is_name_encoded_single());
        assert!(!FieldKind::Tag.is_name_encoded_single());
        assert!(!FieldKind::Points.is_name_encoded_single());
        assert!(!FieldKind::Title.is_name_encoded_single());
    }

    #[test]
    fn points_overwrite_in_place() {
        let points = FieldKind::Points.descriptor();
        assert!(!points.keyed);
        assert_eq!(points.storage, StorageMode::Content);
        assert_eq!(points.cardinality, Cardinality::Single);
    }

    #[test]
    fn attachments_stay_behind_their_reference() {
        assert_eq!(FieldKind::Attachment.storage(), StorageMode::Reference);
        assert_eq!(FieldKind::Comment.cardinality(), Cardinality::AppendOnly);
        assert_eq!(FieldKind::Tag.cardinality(), Cardinality::Set);
    }
}
