//! Typed views over the bunq resource payloads the client works with.
//!
//! bunq responses carry many more fields than these; unknown fields are
//! ignored on deserialization and every known field is optional, matching
//! how loosely the API populates them across account types.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const BUNQ_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Parses bunq's `created`/`updated` timestamps, which are naive UTC with
/// microsecond precision (`2015-06-13 23:19:16.215235`).
pub fn parse_bunq_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, BUNQ_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Cursor block attached to every list response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Pagination {
    pub future_url: Option<String>,
    pub newer_url: Option<String>,
    pub older_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BunqAccount {
    pub alias: Option<Vec<Value>>,
    pub avatar: Option<Value>,
    pub balance: Option<Value>,
    pub created: Option<String>,
    pub currency: Option<String>,
    pub daily_limit: Option<Value>,
    pub description: Option<String>,
    pub display_name: Option<String>,
    pub id: Option<i64>,
    pub monetary_account_profile: Option<Value>,
    pub public_uuid: Option<String>,
    pub setting: Option<Value>,
    pub status: Option<String>,
    pub sub_status: Option<String>,
    pub updated: Option<String>,
    pub user_id: Option<i64>,
}

impl BunqAccount {
    /// The account's IBAN, taken from the alias list.
    pub fn iban(&self) -> Option<&str> {
        self.alias
            .as_ref()?
            .iter()
            .find(|alias| alias.get("type").and_then(Value::as_str) == Some("IBAN"))
            .and_then(|alias| alias.get("value"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BunqPayment {
    pub id: Option<i64>,
    pub alias: Option<Value>,
    pub amount: Option<Value>,
    pub attachment: Option<Vec<Value>>,
    pub balance_after_mutation: Option<Value>,
    pub counterparty_alias: Option<Value>,
    pub created: Option<String>,
    pub description: Option<String>,
    pub monetary_account_id: Option<i64>,
    pub request_reference_split_the_bill: Option<Vec<Value>>,
    pub sub_type: Option<String>,
    #[serde(rename = "type")]
    pub payment_type: Option<String>,
    pub updated: Option<String>,
}

impl BunqPayment {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_bunq_timestamp(self.created.as_deref()?)
    }
}

/// One entry of the user's notification (callback) configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationFilterUrl {
    pub notification_target: String,
    pub category: String,
}

impl NotificationFilterUrl {
    /// Callback on the MUTATION category, the one fired for payments.
    pub fn mutation(url: impl Into<String>) -> Self {
        Self {
            notification_target: url.into(),
            category: "MUTATION".to_string(),
        }
    }
}
