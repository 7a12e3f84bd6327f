use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use std::{env, fs, path::Path};

use crate::error::ConfigError;
use crate::invoice::{CanonicalStatus, PortalUserOverrides};
use crate::session::Credentials;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub portal: PortalConfig,
    #[serde(default = "default_cache_path")]
    pub cache_path: String,
    #[serde(default)]
    pub overrides: OverridesConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub selectors: Selectors,
    #[serde(default)]
    pub fields: FieldRules,
    /// Replaces the built-in status table when present.
    #[serde(default)]
    pub statuses: Option<BTreeMap<String, CanonicalStatus>>,
}

fn default_cache_path() -> String {
    ".store/session_cache.db".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PortalConfig {
    pub root_url: String,
    pub invoices_url: String,
    #[serde(default = "default_referer")]
    pub referer: String,
    pub username: String,
    pub password: Option<String>,
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

fn default_referer() -> String {
    "https://www.fieldglass.net/past_invoice_list.do?moduleId=180&cf=1".to_string()
}

fn default_password_env() -> String {
    "FG_PASSWORD".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct OverridesConfig {
    pub portal_user_id: Option<String>,
    pub customer_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub headless: bool,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self { headless: true }
    }
}

/// Delays and bounded waits, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub settle_ms: u64,
    pub row_delay_ms: u64,
    pub dropdown_pause_ms: u64,
    pub next_page_pause_ms: u64,
    pub next_page_timeout_ms: u64,
    pub wait_timeout_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_ms: 3_000,
            row_delay_ms: 3_000,
            dropdown_pause_ms: 1_000,
            next_page_pause_ms: 1_000,
            next_page_timeout_ms: 10_000,
            wait_timeout_ms: 30_000,
        }
    }
}

impl Timing {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn row_delay(&self) -> Duration {
        Duration::from_millis(self.row_delay_ms)
    }

    pub fn dropdown_pause(&self) -> Duration {
        Duration::from_millis(self.dropdown_pause_ms)
    }

    pub fn next_page_pause(&self) -> Duration {
        Duration::from_millis(self.next_page_pause_ms)
    }

    pub fn next_page_timeout(&self) -> Duration {
        Duration::from_millis(self.next_page_timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// All delays zeroed and waits kept short.
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            settle_ms: 0,
            row_delay_ms: 0,
            dropdown_pause_ms: 0,
            next_page_pause_ms: 0,
            next_page_timeout_ms: 10,
            wait_timeout_ms: 10,
        }
    }
}

/// Every CSS selector the login and listing flows depend on.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub consent_banner: String,
    pub consent_button: String,
    pub username_input: String,
    pub password_input: String,
    pub submit_button: String,
    pub filter_start_date: String,
    pub filter_end_date: String,
    pub filter_button: String,
    pub page_size_dropdown: String,
    pub page_size_all: String,
    pub grid: String,
    pub detail_links: String,
    pub page_info: String,
    pub next_page: String,
    /// Page text markers checked after a login submit.
    pub bad_credentials_marker: String,
    pub change_password_marker: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            consent_banner: "#truste-consent-track".into(),
            consent_button: "#truste-consent-button".into(),
            username_input: "#usernameId_new".into(),
            password_input: "#passwordId_new".into(),
            submit_button: r#"button[type="submit"]"#.into(),
            filter_start_date: r#"input[name="filterStartDate"]"#.into(),
            filter_end_date: r#"input[name="filterEndDate"]"#.into(),
            filter_button: ".ttFilterButton".into(),
            page_size_dropdown: "#dropdownlistWrappergridpagerlistpast_invoice_supplier_list".into(),
            page_size_all: "#listitem7innerListBoxgridpagerlistpast_invoice_supplier_list > span"
                .into(),
            grid: ".jqxGridParent.fd-table".into(),
            detail_links: ".jqxGridParent.fd-table .archiveLink".into(),
            page_info: r#"div[style*="margin-right: 7px; float: right;"]"#.into(),
            next_page: r#"div[title="Next"]"#.into(),
            bad_credentials_marker: "Incorrect identifiers".into(),
            change_password_marker: "change your password".into(),
        }
    }
}

/// Where each field lives on an invoice detail page.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FieldRules {
    pub table_rows: String,
    pub invoice_number_caption: String,
    pub po_number_caption: String,
    pub end_date_caption: String,
    pub total_caption: String,
    pub currency_heading: String,
    pub currency_pattern: String,
    pub badge_marker: String,
    pub badge_pattern: String,
    pub status_key: String,
    pub submit_date_key: String,
    pub buyer_key: String,
}

impl Default for FieldRules {
    fn default() -> Self {
        Self {
            table_rows: "table.box tr".into(),
            invoice_number_caption: "Invoice Code".into(),
            po_number_caption: "PO Number".into(),
            end_date_caption: "End Date".into(),
            total_caption: "Total Amount Due".into(),
            currency_heading: "#invoiceDetails .fd-container h3".into(),
            currency_pattern: r"\(([^)]+)\)".into(),
            badge_marker: "initBadge".into(),
            badge_pattern: r"(?s)initBadge\((\{.*?\})\s*,\s*'invoiceBadge'".into(),
            status_key: "Status".into(),
            submit_date_key: "Submit Date".into(),
            buyer_key: "Buyer".into(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve the secret and build immutable credentials.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let secret = match &self.portal.password {
            Some(password) => password.clone(),
            None => env::var(&self.portal.password_env)
                .map_err(|_| ConfigError::MissingSecret(self.portal.password_env.clone()))?,
        };
        Ok(Credentials::new(
            &self.portal.root_url,
            &self.portal.username,
            secret,
        ))
    }

    pub fn user_overrides(&self) -> PortalUserOverrides {
        PortalUserOverrides {
            portal_user_id: self.overrides.portal_user_id.clone(),
            portal_user: Some(self.portal.username.clone()),
            username: Some(self.portal.username.clone()),
            customer_name: self.overrides.customer_name.clone(),
        }
    }
}
