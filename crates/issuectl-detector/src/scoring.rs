//! The multi-factor scoring model: five weighted signals folded into a
//! `feature_completion_score`, mapped to a confidence bucket, and an
//! independent `false_positive_score` that can veto automation
//! regardless of how high the raw score is.

use issuectl_core::config::DetectorConfig;
use issuectl_core::types::{ConfidenceLevel, Issue};

use crate::evidence::IssueEvidence;

const COMPLETION_LEXICON: &[&str] = &[
    "fixes",
    "fixed",
    "closes",
    "closed",
    "resolves",
    "resolved",
    "implement",
    "implemented",
    "implements",
    "complete",
    "completed",
    "done",
    "finish",
    "finished",
];

const DISPUTE_LEXICON: &[&str] = &["not done", "still broken", "revert", "regression", "doesn't work", "does not work"];

const HOLD_LEXICON: &[&str] = &["hold off", "please wait", "don't close", "do not close", "not ready"];

/// Per-signal breakdown behind a `feature_completion_score`, kept around
/// so the detector can record it as structured evidence on the
/// `FeatureDetection` row.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreBreakdown {
    pub code_evidence: f64,
    pub test_evidence: f64,
    pub commit_evidence: f64,
    pub doc_evidence: f64,
    pub lifecycle_evidence: f64,
    pub feature_completion_score: f64,
    pub false_positive_score: f64,
}

/// Hard disqualifiers short-circuit scoring entirely: the detector emits
/// no detections and forces `automation_eligible = false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disqualifier {
    DoNotAutomateLabel,
    AssigneeHoldRequested,
}

/// Check for a hard disqualifier before any scoring happens. Mirrors
/// §4.5: "If any hard disqualifier is present ... emit no detections".
pub fn disqualifier(issue: &Issue, evidence: &IssueEvidence, hold_window_hours: i64, now: chrono::DateTime<chrono::Utc>) -> Option<Disqualifier> {
    if issue.is_do_not_automate() {
        return Some(Disqualifier::DoNotAutomateLabel);
    }

    let cutoff = now - chrono::Duration::hours(hold_window_hours);
    let assignee_hold = evidence.comments.iter().any(|c| {
        c.created_at >= cutoff
            && issue.assignees.iter().any(|a| a.eq_ignore_ascii_case(&c.author))
            && matches_any_lexicon(&c.body, HOLD_LEXICON)
    });
    if assignee_hold {
        return Some(Disqualifier::AssigneeHoldRequested);
    }

    None
}

fn matches_any_lexicon(text: &str, lexicon: &[&str]) -> bool {
    let lower = text.to_ascii_lowercase();
    lexicon.iter().any(|term| lower.contains(term))
}

/// Compute the weighted score and false-positive adjustment for one
/// issue's evidence. Pure and deterministic: identical `evidence` and
/// `config` always yield an identical `ScoreBreakdown`.
pub fn score(evidence: &IssueEvidence, config: &DetectorConfig, now: chrono::DateTime<chrono::Utc>) -> ScoreBreakdown {
    let code_value = if evidence.expected_files == 0 {
        if evidence.files_touched.is_empty() { 0.0 } else { 1.0 }
    } else {
        (evidence.files_touched.len() as f64 / evidence.expected_files as f64).min(1.0)
    };

    let test_value = if evidence.tests_added && evidence.tests_passing_signal {
        1.0
    } else if evidence.tests_added {
        0.5
    } else {
        0.0
    };

    let commit_value = if evidence.commits.is_empty() {
        0.0
    } else {
        let matching = evidence
            .commits
            .iter()
            .filter(|c| matches_any_lexicon(&c.message, COMPLETION_LEXICON))
            .count();
        matching as f64 / evidence.commits.len() as f64
    };

    let doc_value = if evidence.doc_diff_present { 1.0 } else { 0.0 };

    let lifecycle_value = if evidence.updated_by_author_or_assignee_recently {
        1.0
    } else {
        0.5
    };

    let feature_completion_score = config.code_evidence_weight * code_value
        + config.test_evidence_weight * test_value
        + config.commit_evidence_weight * commit_value
        + config.doc_evidence_weight * doc_value
        + config.lifecycle_evidence_weight * lifecycle_value;

    let false_positive_score = false_positive_score(evidence, now);

    ScoreBreakdown {
        code_evidence: code_value,
        test_evidence: test_value,
        commit_evidence: commit_value,
        doc_evidence: doc_value,
        lifecycle_evidence: lifecycle_value,
        feature_completion_score: feature_completion_score.clamp(0.0, 1.0),
        false_positive_score,
    }
}

/// Conflicting signals, a recent reopen, and disputing comments each
/// push the false-positive score up; they are additive and capped at 1.0.
fn false_positive_score(evidence: &IssueEvidence, _now: chrono::DateTime<chrono::Utc>) -> f64 {
    let mut score = 0.0;

    if evidence.recently_reopened {
        score += 0.4;
    }

    let disputing_comments = evidence
        .comments
        .iter()
        .filter(|c| matches_any_lexicon(&c.body, DISPUTE_LEXICON))
        .count();
    if disputing_comments > 0 {
        score += 0.3 * disputing_comments.min(2) as f64;
    }

    if evidence.tests_added && !evidence.tests_passing_signal && evidence.files_touched.is_empty() {
        score += 0.2;
    }

    score.min(1.0)
}

/// Map a `feature_completion_score` + `false_positive_score` pair to the
/// confidence bucket, applying the `very_high` false-positive gate that
/// `ConfidenceLevel::from_score` alone does not encode.
pub fn confidence_level(breakdown: &ScoreBreakdown) -> ConfidenceLevel {
    let base = ConfidenceLevel::from_score(breakdown.feature_completion_score);
    if base == ConfidenceLevel::VeryHigh && breakdown.false_positive_score > 0.15 {
        ConfidenceLevel::High
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{CommentEvidence, CommitEvidence};
    use chrono::Utc;

    fn cfg() -> DetectorConfig {
        DetectorConfig::default()
    }

    #[test]
    fn full_evidence_yields_very_high() {
        let evidence = IssueEvidence {
            files_touched: vec!["src/feature.rs".into(), "src/feature_tests.rs".into()],
            expected_files: 2,
            tests_added: true,
            tests_passing_signal: true,
            commits: vec![CommitEvidence {
                sha: "abc".into(),
                message: "Implements the dark mode toggle, fixes #42".into(),
                authored_at: Utc::now(),
            }],
            doc_diff_present: true,
            updated_by_author_or_assignee_recently: true,
            recently_reopened: false,
            comments: vec![],
        };
        let breakdown = score(&evidence, &cfg(), Utc::now());
        assert!(breakdown.feature_completion_score >= 0.85, "{breakdown:?}");
        assert_eq!(confidence_level(&breakdown), ConfidenceLevel::VeryHigh);
    }

    #[test]
    fn no_evidence_yields_low() {
        let evidence = IssueEvidence::default();
        let breakdown = score(&evidence, &cfg(), Utc::now());
        assert!(breakdown.feature_completion_score < 0.5);
        assert_eq!(confidence_level(&breakdown), ConfidenceLevel::Low);
    }

    #[test]
    fn disputing_comment_elevates_false_positive_and_caps_confidence() {
        let evidence = IssueEvidence {
            files_touched: vec!["src/feature.rs".into()],
            expected_files: 1,
            tests_added: true,
            tests_passing_signal: true,
            commits: vec![CommitEvidence {
                sha: "abc".into(),
                message: "fixes #42".into(),
                authored_at: Utc::now(),
            }],
            doc_diff_present: true,
            updated_by_author_or_assignee_recently: true,
            recently_reopened: false,
            comments: vec![CommentEvidence {
                author: "reporter".into(),
                body: "this is still broken for me".into(),
                created_at: Utc::now(),
            }],
        };
        let breakdown = score(&evidence, &cfg(), Utc::now());
        assert!(breakdown.false_positive_score > 0.15);
        assert_ne!(confidence_level(&breakdown), ConfidenceLevel::VeryHigh);
    }

    #[test]
    fn do_not_automate_label_is_a_disqualifier() {
        let issue = sample_issue(vec!["do-not-automate".into()], vec![]);
        let evidence = IssueEvidence::default();
        assert_eq!(
            disqualifier(&issue, &evidence, 24, Utc::now()),
            Some(Disqualifier::DoNotAutomateLabel)
        );
    }

    #[test]
    fn assignee_hold_comment_within_window_is_a_disqualifier() {
        let issue = sample_issue(vec![], vec!["alice".into()]);
        let evidence = IssueEvidence {
            comments: vec![CommentEvidence {
                author: "alice".into(),
                body: "please wait, not ready yet".into(),
                created_at: Utc::now(),
            }],
            ..Default::default()
        };
        assert_eq!(
            disqualifier(&issue, &evidence, 24, Utc::now()),
            Some(Disqualifier::AssigneeHoldRequested)
        );
    }

    #[test]
    fn non_assignee_hold_comment_does_not_disqualify() {
        let issue = sample_issue(vec![], vec!["alice".into()]);
        let evidence = IssueEvidence {
            comments: vec![CommentEvidence {
                author: "random_passerby".into(),
                body: "please wait, not ready yet".into(),
                created_at: Utc::now(),
            }],
            ..Default::default()
        };
        assert_eq!(disqualifier(&issue, &evidence, 24, Utc::now()), None);
    }

    fn sample_issue(labels: Vec<String>, assignees: Vec<String>) -> Issue {
        use issuectl_core::types::{IssueSnapshot, IssueStatus};
        let now = Utc::now();
        let snapshot = IssueSnapshot {
            number: 1,
            github_id: 1,
            repo_owner: "acme".into(),
            repo_name: "widgets".into(),
            title: "t".into(),
            body: None,
            status: IssueStatus::Open,
            author: "octocat".into(),
            assignees,
            labels,
            milestone: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        };
        Issue::new(snapshot, now)
    }
}
