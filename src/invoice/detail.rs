use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::LazyLock;

use super::{PORTAL_NAME, RawInvoiceRecord};
use crate::config::FieldRules;
use crate::dates;
use crate::error::{ConfigError, ParseError};

static ID_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]id=([^&#\s]+)").unwrap());

/// Field-extraction rules, compiled once per run.
pub struct DetailRules {
    rows: Selector,
    cells: Selector,
    scripts: Selector,
    currency_heading: Selector,
    currency_pattern: Regex,
    badge_marker: String,
    badge_pattern: Regex,
    invoice_number_caption: String,
    po_number_caption: String,
    end_date_caption: String,
    total_caption: String,
    status_key: String,
    submit_date_key: String,
    buyer_key: String,
}

fn selector(s: &str) -> Result<Selector, ConfigError> {
    Selector::parse(s).map_err(|e| ConfigError::Selector {
        selector: s.to_string(),
        reason: format!("{e:?}"),
    })
}

fn pattern(s: &str) -> Result<Regex, ConfigError> {
    Regex::new(s).map_err(|source| ConfigError::Pattern {
        pattern: s.to_string(),
        source,
    })
}

impl DetailRules {
    pub fn compile(fields: &FieldRules) -> Result<Self, ConfigError> {
        Ok(Self {
            rows: selector(&fields.table_rows)?,
            cells: selector("th, td")?,
            scripts: selector("script")?,
            currency_heading: selector(&fields.currency_heading)?,
            currency_pattern: pattern(&fields.currency_pattern)?,
            badge_marker: fields.badge_marker.clone(),
            badge_pattern: pattern(&fields.badge_pattern)?,
            invoice_number_caption: fields.invoice_number_caption.clone(),
            po_number_caption: fields.po_number_caption.clone(),
            end_date_caption: fields.end_date_caption.clone(),
            total_caption: fields.total_caption.clone(),
            status_key: fields.status_key.clone(),
            submit_date_key: fields.submit_date_key.clone(),
            buyer_key: fields.buyer_key.clone(),
        })
    }

    /// Value cell next to the label cell containing `caption`.
    fn row_value(&self, document: &Html, caption: &str) -> Option<String> {
        for row in document.select(&self.rows) {
            let cells: Vec<ElementRef> = row.select(&self.cells).collect();
            let Some(pos) = cells.iter().position(|c| cell_text(c).contains(caption)) else {
                continue;
            };
            if let Some(value) = cells.get(pos + 1) {
                return Some(cell_text(value));
            }
        }
        None
    }

    fn currency(&self, document: &Html) -> Option<String> {
        let heading = document.select(&self.currency_heading).next()?;
        let text = cell_text(&heading);
        let caps = self.currency_pattern.captures(&text)?;
        let currency = caps.get(1)?.as_str().trim();
        (!currency.is_empty()).then(|| currency.to_string())
    }

    fn badge(&self, document: &Html) -> Result<Badge, ParseError> {
        let script = document
            .select(&self.scripts)
            .map(|s| s.text().collect::<String>())
            .find(|body| body.contains(&self.badge_marker))
            .ok_or(ParseError::MissingBadge)?;

        let caps = self
            .badge_pattern
            .captures(&script)
            .ok_or(ParseError::MissingBadge)?;
        let json = caps.get(1).ok_or(ParseError::MissingBadge)?.as_str();
        serde_json::from_str(json).map_err(|e| ParseError::MalformedBadge(e.to_string()))
    }
}

#[derive(Deserialize)]
struct Badge {
    items: Vec<BadgeItem>,
}

#[derive(Deserialize)]
struct BadgeItem {
    key: String,
    #[serde(default)]
    value: serde_json::Value,
}

impl Badge {
    fn item(&self, key: &str) -> Result<String, ParseError> {
        let item = self
            .items
            .iter()
            .find(|i| i.key == key)
            .ok_or_else(|| ParseError::MissingBadgeItem(key.to_string()))?;
        Ok(match &item.value {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        })
    }
}

fn cell_text(el: &ElementRef) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// The `id` query parameter of a detail link.
pub fn invoice_id(link: &str) -> Result<String, ParseError> {
    let raw = ID_PARAM
        .captures(link)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| ParseError::MissingId {
            link: link.to_string(),
        })?;
    Ok(urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string()))
}

/// Amount text with thousands separators and currency symbols removed.
fn parse_amount(text: &str) -> Result<Decimal, ParseError> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    Decimal::from_str(&cleaned).map_err(|_| ParseError::InvalidAmount(text.to_string()))
}

fn parse_date(field: &'static str, text: &str) -> Result<time::Date, ParseError> {
    dates::parse_portal(text).ok_or_else(|| ParseError::InvalidDate {
        field,
        text: text.to_string(),
    })
}

/// Extract one invoice from its detail page. Pure: the same input always
/// yields the same record or the same error, never a partial record.
pub fn parse_detail(
    link: &str,
    html: &str,
    rules: &DetailRules,
) -> Result<RawInvoiceRecord, ParseError> {
    let id = invoice_id(link)?;
    let document = Html::parse_document(html);

    let currency = rules
        .currency(&document)
        .ok_or(ParseError::MissingCurrency)?;

    let invoice_number = rules
        .row_value(&document, &rules.invoice_number_caption)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ParseError::MissingField(rules.invoice_number_caption.clone()))?;

    let po_number = rules
        .row_value(&document, &rules.po_number_caption)
        .filter(|v| !v.is_empty());

    let due_date = match rules
        .row_value(&document, &rules.end_date_caption)
        .filter(|v| !v.is_empty())
    {
        Some(text) => Some(parse_date("end", &text)?),
        None => None,
    };

    let total_text = rules
        .row_value(&document, &rules.total_caption)
        .ok_or_else(|| ParseError::MissingField(rules.total_caption.clone()))?;
    let total = parse_amount(&total_text)?;

    let badge = rules.badge(&document)?;
    let status = badge.item(&rules.status_key)?;
    let submit_date = parse_date("submit", &badge.item(&rules.submit_date_key)?)?;
    let buyer = badge.item(&rules.buyer_key)?;

    Ok(RawInvoiceRecord {
        id,
        portal_name: PORTAL_NAME.to_string(),
        invoice_number,
        po_number,
        buyer,
        status,
        submit_date,
        due_date,
        currency,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoice::fixtures::{self, DETAIL_LINK};
    use pretty_assertions::assert_eq;
    use time::macros::date;

    fn rules() -> DetailRules {
        DetailRules::compile(&FieldRules::default()).unwrap()
    }

    #[test]
    fn parses_full_detail_page() {
        let html = fixtures::detail_page("INV-2024-001", "Approved", "1,234.56");
        let record = parse_detail(DETAIL_LINK, &html, &rules()).unwrap();

        assert_eq!(
            record,
            RawInvoiceRecord {
                id: "123456".into(),
                portal_name: "Fieldglass".into(),
                invoice_number: "INV-2024-001".into(),
                po_number: Some("PO-778".into()),
                buyer: "Acme Corp".into(),
                status: "Approved".into(),
                submit_date: date!(2024 - 03 - 05),
                due_date: Some(date!(2024 - 03 - 31)),
                currency: "USD".into(),
                total: Decimal::from_str("1234.56").unwrap(),
            }
        );
    }

    #[test]
    fn parsing_is_deterministic() {
        let html = fixtures::detail_page("INV-9", "Paid", "10.00");
        let rules = rules();
        let a = parse_detail(DETAIL_LINK, &html, &rules).unwrap();
        let b = parse_detail(DETAIL_LINK, &html, &rules).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_currency_heading_fails() {
        let html = fixtures::detail_page("INV-1", "Paid", "10.00")
            .replace("Invoice Details (USD)", "Invoice Details");
        assert_eq!(
            parse_detail(DETAIL_LINK, &html, &rules()),
            Err(ParseError::MissingCurrency)
        );
    }

    #[test]
    fn malformed_badge_json_fails() {
        let html = fixtures::detail_page("INV-1", "Paid", "10.00")
            .replace(r#""items": ["#, r#""items": [ oops"#);
        let err = parse_detail(DETAIL_LINK, &html, &rules()).unwrap_err();
        assert!(matches!(err, ParseError::MalformedBadge(_)), "{err:?}");
    }

    #[test]
    fn missing_badge_script_fails() {
        let html = fixtures::detail_page("INV-1", "Paid", "10.00").replace("initBadge", "initOther");
        assert_eq!(
            parse_detail(DETAIL_LINK, &html, &rules()),
            Err(ParseError::MissingBadge)
        );
    }

    #[test]
    fn empty_po_number_is_none() {
        let html = fixtures::detail_page("INV-1", "Paid", "10.00").replace("PO-778", "");
        let record = parse_detail(DETAIL_LINK, &html, &rules()).unwrap();
        assert_eq!(record.po_number, None);
    }

    #[test]
    fn bad_total_is_reported() {
        let html = fixtures::detail_page("INV-1", "Paid", "n/a");
        assert_eq!(
            parse_detail(DETAIL_LINK, &html, &rules()),
            Err(ParseError::InvalidAmount("n/a".into()))
        );
    }

    #[test]
    fn id_comes_from_query_parameter() {
        assert_eq!(
            invoice_id("https://www.fieldglass.net/invoice.do?cf=1&id=ab%2Fc&sn=2").unwrap(),
            "ab/c"
        );
        assert!(matches!(
            invoice_id("https://www.fieldglass.net/invoice.do?cf=1"),
            Err(ParseError::MissingId { .. })
        ));
        // a parameter merely ending in "id" is not the id
        assert!(invoice_id("https://x/invoice.do?userid=7").is_err());
    }

    #[test]
    fn invalid_rule_is_a_config_error() {
        let fields = FieldRules {
            table_rows: "table..box".into(),
            ..FieldRules::default()
        };
        assert!(matches!(
            DetailRules::compile(&fields),
            Err(ConfigError::Selector { .. })
        ));
    }
}
