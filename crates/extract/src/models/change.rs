use derive_more::Display;
use serde::{Deserialize, Serialize};

/// What happened to a file in a single commit.
///
/// Serialized as the single-letter status git prints with `--name-status`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Disposition {
    #[display("A")]
    #[serde(rename = "A")]
    Added,
    #[display("M")]
    #[serde(rename = "M")]
    Modified,
    #[display("D")]
    #[serde(rename = "D")]
    Deleted,
    #[display("R")]
    #[serde(rename = "R")]
    Renamed,
}
impl Disposition {
    /// Parse a `--name-status` column. Scores (`R100`) are ignored, copies and
    /// type changes are not dispositions we care about.
    ///
    /// ```
    /// use typereg_extract::models::Disposition;
    /// assert_eq!(Disposition::from_status("M"), Some(Disposition::Modified));
    /// assert_eq!(Disposition::from_status("R087"), Some(Disposition::Renamed));
    /// assert_eq!(Disposition::from_status("C100"), None);
    /// ```
    pub fn from_status(status: &str) -> Option<Self> {
        match status.chars().next()? {
            'A' => Some(Self::Added),
            'M' => Some(Self::Modified),
            'D' => Some(Self::Deleted),
            'R' => Some(Self::Renamed),
            _ => None,
        }
    }
}

/// A single file-level change inside a commit.
///
/// On the wire this is the pair `["<disposition>", "<path>"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(Disposition, String)", into = "(Disposition, String)")]
pub struct Change {
    pub disposition: Disposition,
    pub path: String,
}
impl Change {
    pub fn new(disposition: Disposition, path: impl Into<String>) -> Self {
        Self { disposition, path: path.into() }
    }
}
impl From<(Disposition, String)> for Change {
    fn from((disposition, path): (Disposition, String)) -> Self {
        Self { disposition, path }
    }
}
impl From<Change> for (Disposition, String) {
    fn from(change: Change) -> Self {
        (change.disposition, change.path)
    }
}

/// What the pipeline should do with a relevant change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read the file at the commit and upsert what it declares.
    Extract,
    /// The file is gone; retire what it used to declare.
    Deprecate,
}
impl From<Disposition> for Action {
    fn from(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Added | Disposition::Modified | Disposition::Renamed => Self::Extract,
            Disposition::Deleted => Self::Deprecate,
        }
    }
}
