//! Git tag naming for published releases

use crate::release::detection::PreDetectedRelease;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagStrategy {
    /// Single-package repository
    Single,
    /// Every package shares one version
    Fixed,
    /// Packages version independently
    Independent,
}

impl TagStrategy {
    pub fn infer(releases: &[PreDetectedRelease]) -> Self {
        match releases {
            [] | [_] => TagStrategy::Single,
            [first, rest @ ..] if rest.iter().all(|r| r.version == first.version) => {
                TagStrategy::Fixed
            }
            _ => TagStrategy::Independent,
        }
    }
}

pub fn tag_name(release: &PreDetectedRelease, strategy: TagStrategy) -> String {
    match strategy {
        TagStrategy::Single | TagStrategy::Fixed => format!("v{}", release.version),
        TagStrategy::Independent if release.name.starts_with('@') => {
            format!("{}@{}", release.name, release.version)
        }
        TagStrategy::Independent => format!("{}@v{}", release.name, release.version),
    }
}
