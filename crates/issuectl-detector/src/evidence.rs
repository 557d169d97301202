//! Repository-side evidence the scoring model consumes: commits
//! referencing an issue, files touched, test files, documentation diffs
//! and a handful of lifecycle/dispute signals pulled from comments.
//!
//! Gathering this evidence means walking GitHub's commit and comment
//! surface per issue, which is a distinct concern from the typed
//! mutation surface in `issuectl_github::Gateway`. It is abstracted
//! behind [`EvidenceSource`] so the scoring model (`scoring.rs`) can be
//! tested without a live GitHub connection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use issuectl_core::types::Issue;

use crate::error::Result;

/// A single commit whose message references the issue.
#[derive(Debug, Clone)]
pub struct CommitEvidence {
    pub sha: String,
    pub message: String,
    pub authored_at: DateTime<Utc>,
}

/// A single issue comment, used to detect disputes and hold requests.
#[derive(Debug, Clone)]
pub struct CommentEvidence {
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Everything the scoring model needs about one issue's surrounding
/// repository activity.
#[derive(Debug, Clone, Default)]
pub struct IssueEvidence {
    /// Paths of files touched by commits/PRs referencing this issue.
    pub files_touched: Vec<String>,
    /// Expected number of files a feature of this shape would touch;
    /// a detector-configured heuristic, not derived from evidence itself.
    pub expected_files: usize,
    /// Whether any test file appears among `files_touched`.
    pub tests_added: bool,
    /// Whether CI or a referencing commit message signals the added
    /// tests currently pass (e.g. a green-check commit status).
    pub tests_passing_signal: bool,
    /// Commits whose message references this issue number.
    pub commits: Vec<CommitEvidence>,
    /// Whether a documentation file (README, docs/**, *.md) is among
    /// `files_touched`.
    pub doc_diff_present: bool,
    /// Whether the issue was updated by its author or an assignee within
    /// the detector's lifecycle window.
    pub updated_by_author_or_assignee_recently: bool,
    /// Whether the issue was reopened after a prior close, within the
    /// false-positive lookback window.
    pub recently_reopened: bool,
    /// Comments left on the issue, newest first, for lexicon matching.
    pub comments: Vec<CommentEvidence>,
}

/// Gathers [`IssueEvidence`] for a given issue. Implemented against the
/// GitHub gateway in the daemon binary; swappable with a static fixture
/// in tests.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    async fn gather(&self, issue: &Issue) -> Result<IssueEvidence>;
}

/// An evidence source that always returns a fixed, pre-built
/// [`IssueEvidence`] — used in tests and for issues re-analyzed from
/// already-persisted detections without a fresh repository walk.
pub struct StaticEvidenceSource {
    evidence: IssueEvidence,
}

impl StaticEvidenceSource {
    pub fn new(evidence: IssueEvidence) -> Self {
        Self { evidence }
    }
}

#[async_trait]
impl EvidenceSource for StaticEvidenceSource {
    async fn gather(&self, _issue: &Issue) -> Result<IssueEvidence> {
        Ok(self.evidence.clone())
    }
}

const DOC_EXTENSIONS: &[&str] = &[".md", ".mdx", ".rst", ".adoc"];
const DOC_DIR_PREFIXES: &[&str] = &["docs/", "documentation/"];
const TEST_PATH_MARKERS: &[&str] = &["test", "tests", "spec", "__tests__"];

/// Heuristic doc-file classifier shared by evidence sources and tests:
/// a path counts as documentation if it lives under a docs directory, is
/// itself a README, or carries a prose file extension.
pub fn looks_like_doc_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    if DOC_DIR_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }
    if lower.ends_with("readme.md") || lower == "readme" {
        return true;
    }
    DOC_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Heuristic test-file classifier: a path counts as a test if any path
/// segment matches a common test-directory or test-file marker.
pub fn looks_like_test_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower
        .split(['/', '\\'])
        .any(|segment| TEST_PATH_MARKERS.iter().any(|m| segment.contains(m)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_doc_paths() {
        assert!(looks_like_doc_path("docs/guide.md"));
        assert!(looks_like_doc_path("README.md"));
        assert!(looks_like_doc_path("CHANGELOG.rst"));
        assert!(!looks_like_doc_path("src/lib.rs"));
    }

    #[test]
    fn classifies_test_paths() {
        assert!(looks_like_test_path("crates/foo/tests/it_works.rs"));
        assert!(looks_like_test_path("src/foo_test.go"));
        assert!(looks_like_test_path("__tests__/widget.spec.ts"));
        assert!(!looks_like_test_path("src/main.rs"));
    }
}
