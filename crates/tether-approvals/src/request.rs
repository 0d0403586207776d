//! Approval request model and the aggregation rule.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tether_core::ids::{new_request_id, AuthorityId, DeviceId, RequestId};

/// One authority's vote.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Vote {
    Pending,
    Approved,
    Rejected,
}

impl Vote {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vote::Pending => "PENDING",
            Vote::Approved => "APPROVED",
            Vote::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Vote {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Vote::Pending),
            "APPROVED" | "APPROVE" => Ok(Vote::Approved),
            "REJECTED" | "REJECT" => Ok(Vote::Rejected),
            _ => Err(format!("Unknown vote: {}", s)),
        }
    }
}

/// Aggregate status of a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    /// No votes yet
    Pending,
    /// Fully approved (terminal)
    Approved,
    /// At least one rejection (terminal)
    Rejected,
    /// Some approvals, waiting for the rest
    Partial,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::Rejected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Partial => "PARTIAL",
        }
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the aggregate status from the full vote map.
///
/// Any rejection wins. Otherwise all approvals approve. Otherwise, once
/// anyone voted, the request is partial. An empty map never approves.
pub fn aggregate(approvals: &BTreeMap<AuthorityId, Vote>) -> ApprovalStatus {
    if approvals.values().any(|v| *v == Vote::Rejected) {
        return ApprovalStatus::Rejected;
    }
    if !approvals.is_empty() && approvals.values().all(|v| *v == Vote::Approved) {
        return ApprovalStatus::Approved;
    }
    if approvals.values().all(|v| *v == Vote::Pending) {
        return ApprovalStatus::Pending;
    }
    ApprovalStatus::Partial
}

/// Quorum record for one irreversible action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub request_id: RequestId,
    pub subject_device_id: DeviceId,
    pub created_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    /// Vote per authority. The key set is fixed at creation.
    pub approvals: BTreeMap<AuthorityId, Vote>,
    /// What is being approved, for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl ApprovalRequest {
    /// New request with every listed authority PENDING.
    pub fn new<I, S>(subject_device_id: impl Into<DeviceId>, authorities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AuthorityId>,
    {
        Self {
            request_id: new_request_id(),
            subject_device_id: subject_device_id.into(),
            created_at: Utc::now(),
            status: ApprovalStatus::Pending,
            approvals: authorities
                .into_iter()
                .map(|a| (a.into(), Vote::Pending))
                .collect(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn path(&self) -> String {
        tether_core::paths::approval_request(&self.subject_device_id, &self.request_id)
    }

    /// Authorities that have not voted yet.
    pub fn outstanding(&self) -> Vec<&str> {
        self.approvals
            .iter()
            .filter(|(_, v)| **v == Vote::Pending)
            .map(|(a, _)| a.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn votes(entries: &[(&str, Vote)]) -> BTreeMap<String, Vote> {
        entries.iter().map(|(a, v)| (a.to_string(), *v)).collect()
    }

    #[test]
    fn test_any_rejection_rejects() {
        assert_eq!(
            aggregate(&votes(&[("a", Vote::Approved), ("b", Vote::Rejected)])),
            ApprovalStatus::Rejected
        );
        assert_eq!(
            aggregate(&votes(&[("a", Vote::Rejected), ("b", Vote::Pending)])),
            ApprovalStatus::Rejected
        );
    }

    #[test]
    fn test_all_approved_approves() {
        assert_eq!(
            aggregate(&votes(&[("a", Vote::Approved), ("b", Vote::Approved)])),
            ApprovalStatus::Approved
        );
    }

    #[test]
    fn test_some_approved_is_partial() {
        for k in 1..4 {
            let entries: Vec<(String, Vote)> = (0..4)
                .map(|i| {
                    let vote = if i < k { Vote::Approved } else { Vote::Pending };
                    (format!("a{}", i), vote)
                })
                .collect();
            let map: BTreeMap<_, _> = entries.into_iter().collect();
            assert_eq!(aggregate(&map), ApprovalStatus::Partial, "k = {}", k);
        }
    }

    #[test]
    fn test_no_votes_is_pending() {
        assert_eq!(
            aggregate(&votes(&[("a", Vote::Pending), ("b", Vote::Pending)])),
            ApprovalStatus::Pending
        );
        assert_eq!(aggregate(&BTreeMap::new()), ApprovalStatus::Pending);
    }

    #[test]
    fn test_request_document_shape() {
        let request = ApprovalRequest::new("kid-1", ["a", "b"]).with_action("install app");
        let doc = serde_json::to_value(&request).unwrap();
        assert_eq!(doc["subjectDeviceId"], "kid-1");
        assert_eq!(doc["status"], "PENDING");
        assert_eq!(doc["approvals"]["a"], "PENDING");
        assert!(doc.get("createdAt").is_some());
        assert_eq!(request.outstanding(), vec!["a", "b"]);
    }

    #[test]
    fn test_vote_parsing() {
        assert_eq!("approve".parse::<Vote>(), Ok(Vote::Approved));
        assert_eq!("REJECTED".parse::<Vote>(), Ok(Vote::Rejected));
        assert!("maybe".parse::<Vote>().is_err());
    }
}
