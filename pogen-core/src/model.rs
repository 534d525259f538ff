//! Quotation and purchase-order data models
//!
//! [`SourceRecord`] mirrors the JSON the extraction service is asked to
//! return. Deserialization is forgiving where the service is known to be
//! sloppy (numbers sent as strings, lead times given as ranges or text) and
//! strict where a wrong value would end up on the order (prices, quantities).

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::str::FromStr;
use tracing::debug;

use crate::error::ValidationError;
use crate::text;

/// Structured data extracted from a vendor quotation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SourceRecord {
    #[serde(deserialize_with = "null_as_empty")]
    pub company_name: String,

    /// Free-text postal address, wrapped onto two lines when populated
    #[serde(deserialize_with = "null_as_empty")]
    pub address: String,

    #[serde(deserialize_with = "null_as_empty")]
    pub quotation_number: String,

    /// Vendor's person in charge
    #[serde(rename = "pic", deserialize_with = "null_as_default")]
    pub contact: Contact,

    #[serde(deserialize_with = "null_as_default")]
    pub terms: Terms,

    #[serde(deserialize_with = "null_as_default")]
    pub items: Vec<LineItem>,
}

impl SourceRecord {
    /// Sum of all line totals
    pub fn total_cost(&self) -> Decimal {
        self.items.iter().map(LineItem::line_total).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Contact {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub fax: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Terms {
    #[serde(deserialize_with = "null_as_empty")]
    pub payment: String,

    /// Delivery lead time in weeks; `None` when the quotation gives no usable number
    #[serde(deserialize_with = "lenient_weeks")]
    pub delivery_weeks: Option<u32>,
}

/// One quoted line
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LineItem {
    #[serde(deserialize_with = "lenient_decimal")]
    pub quantity: Decimal,

    #[serde(deserialize_with = "null_as_empty")]
    pub unit: String,

    #[serde(deserialize_with = "null_as_empty")]
    pub description: String,

    #[serde(deserialize_with = "lenient_decimal")]
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn line_total(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

/// Validated header fields of one purchase order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderInfo {
    po_number: String,
    issue_date: NaiveDate,
    project_number: String,
    project_name: String,
    purchaser_name: String,
    purchaser_phone: String,
    manager_name: String,
}

impl HeaderInfo {
    /// Build a header, rejecting malformed PO numbers. The project number is
    /// derived from the PO number.
    pub fn new(
        po_number: impl Into<String>,
        issue_date: NaiveDate,
        project_name: impl Into<String>,
        purchaser_name: impl Into<String>,
        purchaser_phone: impl Into<String>,
        manager_name: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let po_number = po_number.into().trim().to_string();
        if !text::is_valid_po_number(&po_number) {
            return Err(ValidationError::InvalidPoNumber(po_number));
        }

        Ok(Self {
            project_number: text::extract_project_number(&po_number),
            po_number,
            issue_date,
            project_name: project_name.into(),
            purchaser_name: purchaser_name.into(),
            purchaser_phone: purchaser_phone.into(),
            manager_name: manager_name.into(),
        })
    }

    pub fn po_number(&self) -> &str {
        &self.po_number
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn project_number(&self) -> &str {
        &self.project_number
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn purchaser_name(&self) -> &str {
        &self.purchaser_name
    }

    pub fn purchaser_phone(&self) -> &str {
        &self.purchaser_phone
    }

    pub fn manager_name(&self) -> &str {
        &self.manager_name
    }

    /// "Contact: {purchaser} ({phone})"
    pub fn contact_line(&self) -> String {
        format!("Contact: {} ({})", self.purchaser_name, self.purchaser_phone)
    }

    /// "PURCHASE ORDER NO.: {po}"
    pub fn order_line(&self) -> String {
        format!("PURCHASE ORDER NO.: {}", self.po_number)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_weeks<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let weeks = match &value {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_u64().and_then(|w| u32::try_from(w).ok()),
        Some(Value::String(s)) => {
            let s = s.trim();
            if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        }
        Some(_) => None,
    };

    if weeks.is_none() {
        if let Some(other) = value.filter(|v| !v.is_null()) {
            debug!(value = %other, "Ignoring unusable delivery lead time");
        }
    }

    Ok(weeks)
}

fn lenient_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Option::<Value>::deserialize(deserializer)?;
    let amount = match value {
        None | Some(Value::Null) => return Ok(Decimal::ZERO),
        Some(Value::Number(n)) => parse_decimal(&n.to_string()),
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(Decimal::ZERO);
            }
            parse_decimal(&s.replace(',', ""))
        }
        Some(other) => return Err(D::Error::custom(format!("expected a number, found {}", other))),
    };

    match amount {
        Some(amount) if amount.is_sign_negative() && !amount.is_zero() => Err(D::Error::custom(
            format!("expected a non-negative number, found {}", amount),
        )),
        Some(amount) => Ok(amount),
        None => Err(D::Error::custom("expected a number")),
    }
}

fn parse_decimal(text: &str) -> Option<Decimal> {
    Decimal::from_str(text)
        .or_else(|_| Decimal::from_scientific(text))
        .ok()
}
