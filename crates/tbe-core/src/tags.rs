//! Image tag expectations for a published package version.

use serde::{Deserialize, Serialize};

/// Which tags the pushed image must carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagPolicy {
    /// Tags moved to every build of the default branch
    pub moving: Vec<String>,
    /// Require a tag that is a prefix of the merge commit SHA
    pub require_commit_tag: bool,
}

impl Default for TagPolicy {
    fn default() -> Self {
        TagPolicy {
            moving: vec!["main".to_string(), "latest".to_string()],
            require_commit_tag: true,
        }
    }
}

/// Outcome of checking one image's tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagVerdict {
    pub passed: bool,
    /// Moving tags the image lacks
    pub missing: Vec<String>,
    /// The short-SHA tag, if one was found
    pub commit_tag: Option<String>,
}

impl TagPolicy {
    pub fn evaluate(&self, tags: &[String], merge_sha: &str) -> TagVerdict {
        let missing: Vec<String> = self
            .moving
            .iter()
            .filter(|t| !tags.contains(t))
            .cloned()
            .collect();
        let commit_tag = find_commit_tag(tags, merge_sha).map(str::to_string);
        let passed = missing.is_empty() && (!self.require_commit_tag || commit_tag.is_some());

        TagVerdict {
            passed,
            missing,
            commit_tag,
        }
    }
}

/// A non-empty tag that the commit SHA starts with.
pub fn find_commit_tag<'a>(tags: &'a [String], sha: &str) -> Option<&'a str> {
    tags.iter()
        .map(String::as_str)
        .find(|t| !t.is_empty() && sha.starts_with(t))
}
