use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, ErrorKind};

/// Namespace a package entry was published under.
///
/// `dt` is the DefinitelyTyped repository; the rest are the top-level
/// directories of the JSON registry.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[display("npm")]
    Npm,
    #[display("bower")]
    Bower,
    #[display("github")]
    Github,
    #[display("common")]
    Common,
    #[display("shared")]
    Shared,
    #[display("dt")]
    Dt,
    #[display("env")]
    Env,
    #[display("lib")]
    Lib,
    #[display("global")]
    Global,
}
impl Source {
    pub const ALL: [Self; 9] = [
        Self::Npm,
        Self::Bower,
        Self::Github,
        Self::Common,
        Self::Shared,
        Self::Dt,
        Self::Env,
        Self::Lib,
        Self::Global,
    ];
    pub const AMBIENT: [Self; 4] = [Self::Dt, Self::Env, Self::Lib, Self::Global];
    pub const MAIN: [Self; 5] = [Self::Npm, Self::Bower, Self::Github, Self::Common, Self::Shared];

    /// Ambient sources describe globals rather than importable modules.
    pub fn is_ambient(&self) -> bool {
        Self::AMBIENT.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Bower => "bower",
            Self::Github => "github",
            Self::Common => "common",
            Self::Shared => "shared",
            Self::Dt => "dt",
            Self::Env => "env",
            Self::Lib => "lib",
            Self::Global => "global",
        }
    }

    /// Homepage to show for an entry that never declared one.
    ///
    /// ```
    /// use typereg_extract::models::Source;
    /// assert_eq!(
    ///     Source::Npm.default_homepage("left-pad").as_deref(),
    ///     Some("https://www.npmjs.com/package/left-pad")
    /// );
    /// assert_eq!(Source::Dt.default_homepage("react"), None);
    /// ```
    pub fn default_homepage(&self, name: &str) -> Option<String> {
        match self {
            Self::Npm => Some(format!("https://www.npmjs.com/package/{name}")),
            Self::Github => Some(format!("https://github.com/{name}")),
            _ => None,
        }
    }
}
impl FromStr for Source {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| ErrorKind::UnknownSource(s.to_string()).into())
    }
}
