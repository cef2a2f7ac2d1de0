use derive_more::Display;
use serde::{Deserialize, Serialize};
use typereg_extract::Classifier;

/// One of the repositories the registry is built from.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Upstream {
    /// `.d.ts` files, indexed under the `dt` source.
    #[display("definitely-typed")]
    DefinitelyTyped,
    /// `<source>/<name>.json` documents.
    #[display("registry")]
    Registry,
}

/// Queue kinds used by one upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobKinds {
    pub resync: &'static str,
    pub commit: &'static str,
    pub file: &'static str,
}

impl Upstream {
    pub const ALL: [Self; 2] = [Self::DefinitelyTyped, Self::Registry];

    pub fn kinds(&self) -> JobKinds {
        match self {
            Self::DefinitelyTyped => JobKinds {
                resync: "definitely-typed.resync",
                commit: "definitely-typed.commit",
                file: "definitely-typed.file",
            },
            Self::Registry => JobKinds {
                resync: "registry.resync",
                commit: "registry.commit",
                file: "registry.file",
            },
        }
    }

    pub fn classifier(&self) -> Classifier {
        match self {
            Self::DefinitelyTyped => Classifier::definitions(),
            Self::Registry => Classifier::registry(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_kinds_are_distinct() {
        let kinds: HashSet<&str> = Upstream::ALL
            .iter()
            .flat_map(|upstream| {
                let kinds = upstream.kinds();
                [kinds.resync, kinds.commit, kinds.file]
            })
            .collect();
        assert_eq!(kinds.len(), 6);
    }

    #[test]
    fn test_classifier_matches_upstream() {
        assert!(Upstream::DefinitelyTyped.classifier().is_relevant("jquery/jquery.d.ts"));
        assert!(!Upstream::DefinitelyTyped.classifier().is_relevant("npm/jquery.json"));
        assert!(Upstream::Registry.classifier().is_relevant("npm/jquery.json"));
    }
}
