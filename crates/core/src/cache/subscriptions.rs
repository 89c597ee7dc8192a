//! Push subscription registrations received by the proxy server.

use super::connection::CacheDb;
use crate::Error;
use crate::push::{PushSubscription, SubscriptionRegistration};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

impl CacheDb {
    /// Store a registration, keyed by its client id.
    ///
    /// A client re-registering under the same id replaces its subscription.
    pub async fn upsert_subscription(&self, registration: &SubscriptionRegistration) -> Result<(), Error> {
        let client_id = registration.uniqueid;
        let endpoint = registration.subscription.endpoint.clone();
        let json = serde_json::to_string(&registration.subscription)?;
        let registered_at = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO subscriptions (client_id, endpoint, subscription_json, registered_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(client_id) DO UPDATE SET
                        endpoint = excluded.endpoint,
                        subscription_json = excluded.subscription_json,
                        registered_at = excluded.registered_at",
                    params![client_id, endpoint, json, registered_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get the subscription registered for a client id.
    pub async fn get_subscription(&self, client_id: i64) -> Result<Option<PushSubscription>, Error> {
        let json = self
            .conn
            .call(move |conn| -> Result<Option<String>, Error> {
                let result = conn.query_row(
                    "SELECT subscription_json FROM subscriptions WHERE client_id = ?1",
                    params![client_id],
                    |row| row.get::<_, String>(0),
                );
                match result {
                    Ok(json) => Ok(Some(json)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        json.map(|json| serde_json::from_str(&json).map_err(Error::from)).transpose()
    }

    /// Number of registered clients.
    pub async fn count_subscriptions(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM subscriptions", [], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::SubscriptionKeys;

    fn registration(id: i64, endpoint: &str) -> SubscriptionRegistration {
        SubscriptionRegistration {
            subscription: PushSubscription {
                endpoint: endpoint.to_string(),
                expiration_time: None,
                keys: SubscriptionKeys { p256dh: "key".into(), auth: "secret".into() },
            },
            uniqueid: id,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get_subscription() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let reg = registration(42, "https://push.example.com/a");

        db.upsert_subscription(&reg).await.unwrap();

        let stored = db.get_subscription(42).await.unwrap().unwrap();
        assert_eq!(stored, reg.subscription);
        assert!(db.get_subscription(7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reregistration_replaces() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.upsert_subscription(&registration(1, "https://push.example.com/old")).await.unwrap();
        db.upsert_subscription(&registration(1, "https://push.example.com/new")).await.unwrap();

        assert_eq!(db.count_subscriptions().await.unwrap(), 1);
        let stored = db.get_subscription(1).await.unwrap().unwrap();
        assert_eq!(stored.endpoint, "https://push.example.com/new");
    }
}
