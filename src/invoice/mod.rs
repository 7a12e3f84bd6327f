// src/invoice/mod.rs

mod detail;
mod status;

#[cfg(test)]
pub(crate) mod fixtures;

pub use detail::{parse_detail, DetailRules};
pub use status::{is_draft, StatusMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::Date;

use crate::error::UnknownStatus;

pub const PORTAL_NAME: &str = "Fieldglass";

/// The closed set of statuses downstream consumers understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalStatus {
    Approved,
    #[serde(rename = "Pending Approval")]
    PendingApproval,
    Paid,
    Rejected,
    Canceled,
}

/// An invoice as the portal shows it, one per detail page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawInvoiceRecord {
    pub id: String,
    pub portal_name: String,
    pub invoice_number: String,
    pub po_number: Option<String>,
    pub buyer: String,
    /// Status label exactly as the portal wrote it.
    pub status: String,
    pub submit_date: Date,
    pub due_date: Option<Date>,
    pub currency: String,
    pub total: Decimal,
}

/// Portal-user identity fields, owned by whoever delivers the records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortalUserOverrides {
    pub portal_user_id: Option<String>,
    pub portal_user: Option<String>,
    pub username: Option<String>,
    pub customer_name: Option<String>,
}

/// Normalized invoice handed to delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalInvoiceRecord {
    pub portal_name: String,
    pub id_on_portal: String,
    pub invoice_number: String,
    pub po_number: Option<String>,
    pub buyer: String,
    pub status: CanonicalStatus,
    pub invoice_date: Date,
    pub due_date: Option<Date>,
    pub currency: String,
    pub total: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portal_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portal_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
}

impl CanonicalInvoiceRecord {
    /// Map a raw record, translating its status through `statuses`.
    pub fn from_raw(raw: RawInvoiceRecord, statuses: &StatusMap) -> Result<Self, UnknownStatus> {
        let status = statuses.map(&raw.status)?;
        Ok(Self {
            portal_name: raw.portal_name,
            id_on_portal: raw.id,
            invoice_number: raw.invoice_number,
            po_number: raw.po_number,
            buyer: raw.buyer,
            status,
            invoice_date: raw.submit_date,
            due_date: raw.due_date,
            currency: raw.currency,
            total: raw.total,
            portal_user_id: None,
            portal_user: None,
            username: None,
            customer_name: None,
        })
    }

    pub fn with_overrides(mut self, overrides: &PortalUserOverrides) -> Self {
        if let Some(v) = &overrides.portal_user_id {
            self.portal_user_id = Some(v.clone());
        }
        if let Some(v) = &overrides.portal_user {
            self.portal_user = Some(v.clone());
        }
        if let Some(v) = &overrides.username {
            self.username = Some(v.clone());
        }
        if let Some(v) = &overrides.customer_name {
            self.customer_name = Some(v.clone());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;
    use time::macros::date;

    fn raw(status: &str) -> RawInvoiceRecord {
        RawInvoiceRecord {
            id: "12345".into(),
            portal_name: PORTAL_NAME.into(),
            invoice_number: "INV-001".into(),
            po_number: None,
            buyer: "Acme Corp".into(),
            status: status.into(),
            submit_date: date!(2024 - 03 - 05),
            due_date: Some(date!(2024 - 04 - 04)),
            currency: "USD".into(),
            total: Decimal::from_str("1234.50").unwrap(),
        }
    }

    #[test]
    fn maps_raw_to_canonical() {
        let record = CanonicalInvoiceRecord::from_raw(raw("Payment Review"), &StatusMap::builtin())
            .unwrap();
        assert_eq!(record.status, CanonicalStatus::PendingApproval);
        assert_eq!(record.id_on_portal, "12345");
        assert_eq!(record.invoice_date, date!(2024 - 03 - 05));
        assert_eq!(record.portal_user, None);
    }

    #[test]
    fn unknown_status_never_reaches_the_record() {
        let err = CanonicalInvoiceRecord::from_raw(raw("Banana"), &StatusMap::builtin()).unwrap_err();
        assert_eq!(err, UnknownStatus("Banana".into()));
    }

    #[test]
    fn overrides_fill_identity_fields() {
        let overrides = PortalUserOverrides {
            portal_user_id: Some("u-1".into()),
            portal_user: Some("supplier".into()),
            username: Some("supplier".into()),
            customer_name: None,
        };
        let record = CanonicalInvoiceRecord::from_raw(raw("Paid"), &StatusMap::builtin())
            .unwrap()
            .with_overrides(&overrides);
        assert_eq!(record.portal_user_id.as_deref(), Some("u-1"));
        assert_eq!(record.username.as_deref(), Some("supplier"));
        assert_eq!(record.customer_name, None);
    }

    #[test]
    fn serializes_with_portal_field_names() {
        let record =
            CanonicalInvoiceRecord::from_raw(raw("Approved"), &StatusMap::builtin()).unwrap();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "Approved");
        assert_eq!(json["invoice_date"], "2024-03-05");
        assert_eq!(json["total"], "1234.50");
        assert!(json.get("portal_user_id").is_none());

        let pending = serde_json::to_value(CanonicalStatus::PendingApproval).unwrap();
        assert_eq!(pending, "Pending Approval");
    }
}
