use globset::GlobSet;

use crate::consts::{DEFINITION_GLOBS, REGISTRY_GLOBS};
use crate::models::{Action, Change};

/// Decides which file changes in an upstream repository are worth indexing.
///
/// ```
/// use typereg_extract::Classifier;
/// use typereg_extract::models::{Action, Change, Disposition};
///
/// let classifier = Classifier::registry();
/// let change = Change::new(Disposition::Deleted, "npm/left-pad.json");
/// assert_eq!(classifier.classify(&change), Some(Action::Deprecate));
/// let change = Change::new(Disposition::Modified, "README.md");
/// assert_eq!(classifier.classify(&change), None);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    globs: &'static GlobSet,
}
impl Classifier {
    /// Matches `**/*.d.ts`.
    pub fn definitions() -> Self {
        Self { globs: &DEFINITION_GLOBS }
    }

    /// Matches `.json` documents under the known source namespaces.
    pub fn registry() -> Self {
        Self { globs: &REGISTRY_GLOBS }
    }

    pub fn is_relevant(&self, path: &str) -> bool {
        self.globs.is_match(path)
    }

    /// `None` means the change should be dropped before anything is queued.
    pub fn classify(&self, change: &Change) -> Option<Action> {
        self.is_relevant(&change.path).then(|| Action::from(change.disposition))
    }
}
