//! Resource-level calls built on the generic signed client: accounts,
//! payments and notification callbacks.

use crate::client::{unexpected, BunqClient};
use crate::error::Error;
use crate::keystore;
use crate::model::{parse_bunq_timestamp, BunqAccount, BunqPayment, NotificationFilterUrl};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::info;

/// Page size for paginated resource listings.
pub const ITEMS_PER_PAGE: u32 = 100;

impl BunqClient {
    /// The authenticated user's id, bootstrapping a session if the store
    /// has never recorded one.
    pub async fn user_id(&self) -> Result<i64, Error> {
        if self.store.get(keystore::SESSION_USER_ID)?.is_none() {
            self.ensure_session_active().await?;
        }
        self.store
            .get(keystore::SESSION_USER_ID)?
            .and_then(|value| value.as_i64())
            .ok_or(Error::UnexpectedResponse {
                context: "session user id",
                body: "keystore has no session_context.user_person_id.id".into(),
            })
    }

    /// All monetary accounts of the user, across account types.
    pub async fn accounts(&self) -> Result<Vec<BunqAccount>, Error> {
        let user_id = self.user_id().await?;
        let items = self
            .get_paginated(
                &format!("user/{user_id}/monetary-account"),
                &[],
                ITEMS_PER_PAGE,
            )
            .await?;
        let mut accounts = Vec::new();
        for item in &items {
            // Each entry wraps the account in its type name
            // (MonetaryAccountBank, MonetaryAccountSavings, ...).
            let Some(wrapper) = item.as_object() else {
                return Err(unexpected("monetary-account listing", item));
            };
            for account in wrapper.values() {
                accounts.push(serde_json::from_value(account.clone())?);
            }
        }
        info!(count = accounts.len(), "loaded bunq accounts");
        Ok(accounts)
    }

    /// Payments for one account, newest first. With `since`, page loading
    /// stops once a page ends older than the cutoff, and only payments
    /// strictly after the cutoff are returned.
    pub async fn payments_for_account(
        &self,
        account_id: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<BunqPayment>, Error> {
        let user_id = self.user_id().await?;
        let endpoint = format!("user/{user_id}/monetary-account/{account_id}/payment");
        let items = self
            .get_paginated_while(&endpoint, &[], ITEMS_PER_PAGE, |last_page| {
                should_load_older_pages(last_page, since)
            })
            .await?;
        let mut payments = Vec::new();
        for item in &items {
            let Some(payment) = item.get("Payment") else {
                continue;
            };
            if let Some(cutoff) = since {
                let created = payment
                    .get("created")
                    .and_then(Value::as_str)
                    .and_then(parse_bunq_timestamp);
                if !created.is_some_and(|created| created > cutoff) {
                    continue;
                }
            }
            payments.push(serde_json::from_value(payment.clone())?);
        }
        if !payments.is_empty() {
            info!(count = payments.len(), account_id, "loaded payments");
        }
        Ok(payments)
    }

    /// The registered notification callbacks.
    pub async fn callbacks(&self) -> Result<Vec<NotificationFilterUrl>, Error> {
        let user_id = self.user_id().await?;
        let response = self
            .get(&format!("user/{user_id}/notification-filter-url"), &[])
            .await?;
        let Some(items) = response.get("Response").and_then(Value::as_array) else {
            return Err(unexpected("notification-filter-url listing", &response));
        };
        let mut callbacks = Vec::new();
        for item in items {
            if let Some(entry) = item.get("NotificationFilterUrl") {
                callbacks.push(serde_json::from_value(entry.clone())?);
            }
        }
        Ok(callbacks)
    }

    /// Registers a MUTATION callback for `url`. An already-registered URL
    /// is left alone, so repeated calls are safe.
    pub async fn add_callback(&self, url: &str) -> Result<(), Error> {
        let mut callbacks = self.callbacks().await?;
        if callbacks
            .iter()
            .any(|callback| callback.notification_target == url)
        {
            return Ok(());
        }
        info!(url, "adding notification callback");
        callbacks.push(NotificationFilterUrl::mutation(url));
        self.set_callbacks(&callbacks).await
    }

    /// Removes the callback for `url` if present.
    pub async fn remove_callback(&self, url: &str) -> Result<(), Error> {
        let callbacks = self.callbacks().await?;
        if !callbacks
            .iter()
            .any(|callback| callback.notification_target == url)
        {
            return Ok(());
        }
        info!(url, "removing notification callback");
        let callbacks: Vec<_> = callbacks
            .into_iter()
            .filter(|callback| callback.notification_target != url)
            .collect();
        self.set_callbacks(&callbacks).await
    }

    /// The callback list is replaced wholesale; bunq has no per-entry
    /// add or delete.
    async fn set_callbacks(&self, callbacks: &[NotificationFilterUrl]) -> Result<(), Error> {
        let user_id = self.user_id().await?;
        self.post(
            &format!("user/{user_id}/notification-filter-url"),
            &json!({ "notification_filters": callbacks }),
            &[],
        )
        .await?;
        Ok(())
    }
}

/// Keep paging while the oldest payment on the page is still newer than
/// the cutoff; older pages may then still hold wanted payments. Without a
/// cutoff every page is wanted.
fn should_load_older_pages(last_page: &[Value], since: Option<DateTime<Utc>>) -> bool {
    let Some(since) = since else {
        return true;
    };
    let Some(oldest) = last_page
        .last()
        .and_then(|item| item.pointer("/Payment/created"))
        .and_then(Value::as_str)
        .and_then(parse_bunq_timestamp)
    else {
        return true;
    };
    oldest > since
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn page(created: &[&str]) -> Vec<Value> {
        created
            .iter()
            .map(|created| json!({"Payment": {"id": 1, "created": created}}))
            .collect()
    }

    #[test]
    fn without_cutoff_every_page_is_loaded() {
        assert!(should_load_older_pages(&[], None));
        assert!(should_load_older_pages(
            &page(&["2024-01-01 00:00:00.000000"]),
            None
        ));
    }

    #[test]
    fn paging_continues_while_oldest_is_after_cutoff() {
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let newer = page(&["2024-06-01 12:00:00.000000", "2024-03-01 12:00:00.000000"]);
        assert!(should_load_older_pages(&newer, Some(cutoff)));
    }

    #[test]
    fn paging_stops_once_a_page_ends_before_cutoff() {
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let stale = page(&["2024-02-01 12:00:00.000000", "2023-12-31 23:59:59.000000"]);
        assert!(!should_load_older_pages(&stale, Some(cutoff)));
    }

    #[test]
    fn malformed_pages_do_not_stop_paging() {
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let odd = vec![json!({"Payment": {"id": 1}})];
        assert!(should_load_older_pages(&odd, Some(cutoff)));
    }
}
