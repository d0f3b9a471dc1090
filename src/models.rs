use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FieldError;

/// Maximum submission length, counted in characters.
pub const MAX_CONTENT_CHARS: usize = 1000;

/// A validated text submission travelling through the pipeline.
///
/// Built once by the ingestion API and immutable afterwards; the queue
/// payload is this struct serialized as JSON.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictStatus {
    Approved,
    Flagged,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerdictStatus::Approved => "APPROVED",
            VerdictStatus::Flagged => "FLAGGED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "APPROVED" => Some(VerdictStatus::Approved),
            "FLAGGED" => Some(VerdictStatus::Flagged),
            _ => None,
        }
    }
}

/// Outcome of classifying a single submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Verdict {
    /// The fail-closed verdict: an unavailable safety check never approves.
    pub fn unavailable() -> Self {
        Self {
            status: VerdictStatus::Flagged,
            confidence: 0.0,
            reason: Some("classifier unavailable".to_string()),
        }
    }

    /// Reject classifier output that breaks the verdict contract:
    /// confidence must be in [0, 1] and a FLAGGED verdict carries a reason.
    pub fn validate(self) -> Result<Self, String> {
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0, 1]", self.confidence));
        }
        if self.status == VerdictStatus::Flagged && self.reason.is_none() {
            return Err("FLAGGED verdict without a reason".to_string());
        }
        Ok(self)
    }
}

/// The durable join of a submission and its verdict, keyed by submission id.
#[derive(Clone, Debug)]
pub struct ModerationRecord {
    pub submission: Submission,
    pub verdict: Verdict,
    pub stored_at: DateTime<Utc>,
}

/// Fan-out event pushed to connected observers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationUpdate {
    pub submission_id: Uuid,
    pub status: VerdictStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub confidence: f64,
    pub original_content: String,
    pub timestamp: DateTime<Utc>,
}

impl ModerationUpdate {
    /// Events are built from the stored record, so a redelivered submission
    /// re-broadcasts the verdict that actually won, not a fresh one.
    pub fn from_record(record: &ModerationRecord) -> Self {
        Self {
            submission_id: record.submission.id,
            status: record.verdict.status,
            reason: record.verdict.reason.clone(),
            confidence: record.verdict.confidence,
            original_content: record.submission.content.clone(),
            timestamp: record.stored_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub user_id: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub message: String,
    pub submission_id: Uuid,
}

impl Submission {
    /// Validate an ingestion request and mint the submission.
    ///
    /// All failing fields are reported together so the caller can fix the
    /// request in one round trip.
    pub fn from_request(request: &SubmitRequest) -> Result<Self, Vec<FieldError>> {
        let mut errors = Vec::new();

        let user_id = match Uuid::parse_str(request.user_id.trim()) {
            Ok(id) => Some(id),
            Err(_) => {
                errors.push(FieldError::new("userId", "must be a valid UUID"));
                None
            }
        };

        let chars = request.content.chars().count();
        if chars == 0 {
            errors.push(FieldError::new("content", "must not be empty"));
        } else if chars > MAX_CONTENT_CHARS {
            errors.push(FieldError::new(
                "content",
                format!("must be at most {} characters", MAX_CONTENT_CHARS),
            ));
        }

        match (user_id, errors.is_empty()) {
            (Some(user_id), true) => Ok(Self {
                id: Uuid::new_v4(),
                user_id,
                content: request.content.clone(),
                created_at: Utc::now(),
            }),
            _ => Err(errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(content: &str) -> SubmitRequest {
        SubmitRequest {
            user_id: Uuid::new_v4().to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn valid_request_produces_unique_ids() {
        let a = Submission::from_request(&request("hello")).unwrap();
        let b = Submission::from_request(&request("hello")).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn empty_content_is_rejected() {
        let errors = Submission::from_request(&request("")).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "content");
    }

    #[test]
    fn oversized_content_is_rejected() {
        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        let errors = Submission::from_request(&request(&long)).unwrap_err();
        assert_eq!(errors[0].field, "content");
    }

    #[test]
    fn content_at_limit_is_accepted() {
        let at_limit = "x".repeat(MAX_CONTENT_CHARS);
        assert!(Submission::from_request(&request(&at_limit)).is_ok());
    }

    #[test]
    fn bad_uuid_and_bad_content_reported_together() {
        let req = SubmitRequest {
            user_id: "not-a-uuid".to_string(),
            content: String::new(),
        };
        let errors = Submission::from_request(&req).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["userId", "content"]);
    }

    #[test]
    fn verdict_status_round_trips_as_uppercase() {
        let json = serde_json::to_string(&VerdictStatus::Flagged).unwrap();
        assert_eq!(json, "\"FLAGGED\"");
        let back: VerdictStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, VerdictStatus::Flagged);
    }

    #[test]
    fn flagged_verdict_without_reason_is_invalid() {
        let verdict = Verdict {
            status: VerdictStatus::Flagged,
            confidence: 0.5,
            reason: None,
        };
        assert!(verdict.validate().is_err());
    }

    #[test]
    fn confidence_out_of_range_is_invalid() {
        let verdict = Verdict {
            status: VerdictStatus::Approved,
            confidence: 1.5,
            reason: None,
        };
        assert!(verdict.validate().is_err());
    }

    #[test]
    fn fail_closed_verdict_flags_with_zero_confidence() {
        let verdict = Verdict::unavailable();
        assert_eq!(verdict.status, VerdictStatus::Flagged);
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.reason.is_some());
    }

    #[test]
    fn update_serializes_with_camel_case_keys() {
        let update = ModerationUpdate {
            submission_id: Uuid::new_v4(),
            status: VerdictStatus::Approved,
            reason: None,
            confidence: 0.97,
            original_content: "Have a nice day".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("submissionId").is_some());
        assert!(json.get("originalContent").is_some());
        assert!(json.get("reason").is_none());
    }
}
