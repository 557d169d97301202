//! Feature Detector (C5): scores how complete a reported feature or fix
//! looks based on repository evidence, and gates automation eligibility
//! on hard disqualifiers independent of that score.

pub mod detector;
pub mod error;
pub mod evidence;
pub mod scoring;

pub use detector::{DetectionOutcome, FeatureDetector};
pub use error::{DetectorError, Result};
pub use evidence::{CommentEvidence, CommitEvidence, EvidenceSource, IssueEvidence, StaticEvidenceSource};
pub use scoring::{Disqualifier, ScoreBreakdown};
