use std::collections::BTreeMap;

use super::CanonicalStatus;
use crate::error::UnknownStatus;

/// Status dropped before mapping; drafts are never delivered.
pub const DRAFT_STATUS: &str = "Draft";

const BUILTIN: &[(&str, CanonicalStatus)] = &[
    ("Approval Paused", CanonicalStatus::Rejected),
    // spelling seen in older portal revisions
    ("Aprroval Paused", CanonicalStatus::Rejected),
    ("Approved", CanonicalStatus::Approved),
    ("Consolidated", CanonicalStatus::Approved),
    ("Paid", CanonicalStatus::Paid),
    ("Payment Pending", CanonicalStatus::PendingApproval),
    ("Payment Review", CanonicalStatus::PendingApproval),
    ("Pending Approval", CanonicalStatus::PendingApproval),
    ("Pending Consolidation", CanonicalStatus::PendingApproval),
    ("Pending SAP Quality Review", CanonicalStatus::PendingApproval),
    ("Rejected", CanonicalStatus::Rejected),
];

/// Lookup table from portal status labels to canonical statuses.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMap {
    table: BTreeMap<String, CanonicalStatus>,
}

impl StatusMap {
    pub fn builtin() -> Self {
        Self {
            table: BUILTIN
                .iter()
                .map(|(label, status)| (label.to_string(), *status))
                .collect(),
        }
    }

    pub fn from_table(table: BTreeMap<String, CanonicalStatus>) -> Self {
        Self { table }
    }

    /// Fails on any label not in the table; there is no fallback status.
    pub fn map(&self, text: &str) -> Result<CanonicalStatus, UnknownStatus> {
        self.table
            .get(text.trim())
            .copied()
            .ok_or_else(|| UnknownStatus(text.to_string()))
    }
}

pub fn is_draft(text: &str) -> bool {
    text.trim() == DRAFT_STATUS
}
