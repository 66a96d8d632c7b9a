//! Notification channels, the seeded event catalog, rules and delivery
//! history.

use super::models::{
    MatchedRule, NotificationChannel, NotificationEvent, NotificationHistoryEntry,
    NotificationRule,
};
use super::{RowExt, Store};
use crate::error::{Error, Result};
use sqlx::any::AnyRow;

/// Seed row for the event catalog. Seeding is idempotent; events are not
/// user-deletable.
pub struct EventSeed {
    pub category: &'static str,
    pub event_type: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub default_enabled: bool,
    pub supports_threshold: bool,
    pub threshold_unit: Option<&'static str>,
}

fn map_channel(row: &AnyRow) -> Result<NotificationChannel> {
    Ok(NotificationChannel {
        id: row.col("id")?,
        name: row.col("name")?,
        url: row.col("url")?,
        enabled: row.col("enabled")?,
        created_at: row.ts("created_at")?,
        updated_at: row.ts("updated_at")?,
    })
}

fn map_event(row: &AnyRow) -> Result<NotificationEvent> {
    Ok(NotificationEvent {
        id: row.col("id")?,
        category: row.col("category")?,
        event_type: row.col("event_type")?,
        name: row.col("name")?,
        description: row.col("description")?,
        default_enabled: row.col("default_enabled")?,
        supports_threshold: row.col("supports_threshold")?,
        threshold_unit: row.col("threshold_unit")?,
    })
}

fn map_rule(row: &AnyRow) -> Result<NotificationRule> {
    Ok(NotificationRule {
        id: row.col("id")?,
        channel_id: row.col("channel_id")?,
        event_id: row.col("event_id")?,
        enabled: row.col("enabled")?,
        threshold_value: row.col("threshold_value")?,
        threshold_operator: row.col("threshold_operator")?,
        created_at: row.ts("created_at")?,
        updated_at: row.ts("updated_at")?,
    })
}

impl Store {
    pub async fn create_notification_channel(
        &self,
        name: &str,
        url: &str,
        enabled: bool,
    ) -> Result<NotificationChannel> {
        if url.trim().is_empty() {
            return Err(Error::InvalidInput("channel url must not be empty".into()));
        }

        let now = super::now_ts();
        let sql = self.dialect().insert_sql(
            "INSERT INTO notification_channels (name, url, enabled, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        );
        let query = sqlx::query(&sql)
            .bind(name)
            .bind(url.trim())
            .bind(enabled)
            .bind(&now)
            .bind(&now);
        let id = self
            .fetch_insert_id(query)
            .await
            .map_err(|e| Error::db("create channel", e))?;

        self.notification_channel(id).await
    }

    pub async fn notification_channel(&self, id: i64) -> Result<NotificationChannel> {
        let row = sqlx::query(&self.sql(
            "SELECT id, name, url, enabled, created_at, updated_at FROM notification_channels \
             WHERE id = ?",
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Error::db("load channel", e))?
        .ok_or_else(|| Error::NotFound(format!("channel {id}")))?;

        map_channel(&row)
    }

    pub async fn list_notification_channels(&self) -> Result<Vec<NotificationChannel>> {
        let rows = sqlx::query(
            "SELECT id, name, url, enabled, created_at, updated_at FROM notification_channels \
             ORDER BY id",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list channels", e))?;

        rows.iter().map(map_channel).collect()
    }

    pub async fn update_notification_channel(
        &self,
        id: i64,
        name: &str,
        url: &str,
        enabled: bool,
    ) -> Result<NotificationChannel> {
        let result = sqlx::query(&self.sql(
            "UPDATE notification_channels SET name = ?, url = ?, enabled = ?, updated_at = ? \
             WHERE id = ?",
        ))
        .bind(name)
        .bind(url.trim())
        .bind(enabled)
        .bind(super::now_ts())
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("update channel", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("channel {id}")));
        }
        self.notification_channel(id).await
    }

    /// Delete the channel and, in one transaction, its rules and history.
    pub async fn delete_notification_channel(&self, id: i64) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| Error::db("delete channel", e))?;

        sqlx::query(&self.sql("DELETE FROM notification_rules WHERE channel_id = ?"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::db("delete channel rules", e))?;

        sqlx::query(&self.sql("DELETE FROM notification_history WHERE channel_id = ?"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::db("delete channel history", e))?;

        let result = sqlx::query(&self.sql("DELETE FROM notification_channels WHERE id = ?"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::db("delete channel", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("channel {id}")));
        }

        tx.commit().await.map_err(|e| Error::db("delete channel", e))
    }

    /// Insert any catalog rows that do not exist yet. Existing rows are left
    /// untouched so user edits survive restarts.
    pub async fn seed_notification_events(&self, seeds: &[EventSeed]) -> Result<usize> {
        let mut inserted = 0usize;
        for seed in seeds {
            let result = sqlx::query(&self.sql(
                "INSERT INTO notification_events (category, event_type, name, description, \
                 default_enabled, supports_threshold, threshold_unit) \
                 VALUES (?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (category, event_type) DO NOTHING",
            ))
            .bind(seed.category)
            .bind(seed.event_type)
            .bind(seed.name)
            .bind(seed.description)
            .bind(seed.default_enabled)
            .bind(seed.supports_threshold)
            .bind(seed.threshold_unit)
            .execute(self.pool())
            .await
            .map_err(|e| Error::db("seed events", e))?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    pub async fn list_notification_events(&self) -> Result<Vec<NotificationEvent>> {
        let rows = sqlx::query(
            "SELECT id, category, event_type, name, description, default_enabled, \
             supports_threshold, threshold_unit FROM notification_events \
             ORDER BY category, event_type",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list events", e))?;

        rows.iter().map(map_event).collect()
    }

    pub async fn notification_event(
        &self,
        category: &str,
        event_type: &str,
    ) -> Result<NotificationEvent> {
        let row = sqlx::query(&self.sql(
            "SELECT id, category, event_type, name, description, default_enabled, \
             supports_threshold, threshold_unit FROM notification_events \
             WHERE category = ? AND event_type = ?",
        ))
        .bind(category)
        .bind(event_type)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| Error::db("load event", e))?
        .ok_or_else(|| Error::NotFound(format!("event {category}/{event_type}")))?;

        map_event(&row)
    }

    pub async fn create_notification_rule(
        &self,
        channel_id: i64,
        event_id: i64,
        enabled: bool,
        threshold_value: Option<f64>,
        threshold_operator: Option<&str>,
    ) -> Result<NotificationRule> {
        let now = super::now_ts();
        let sql = self.dialect().insert_sql(
            "INSERT INTO notification_rules (channel_id, event_id, enabled, threshold_value, \
             threshold_operator, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        );
        let query = sqlx::query(&sql)
            .bind(channel_id)
            .bind(event_id)
            .bind(enabled)
            .bind(threshold_value)
            .bind(threshold_operator)
            .bind(&now)
            .bind(&now);
        let id = self
            .fetch_insert_id(query)
            .await
            .map_err(|e| Error::db("create rule", e))?;

        let row = sqlx::query(&self.sql(
            "SELECT id, channel_id, event_id, enabled, threshold_value, threshold_operator, \
             created_at, updated_at FROM notification_rules WHERE id = ?",
        ))
        .bind(id)
        .fetch_one(self.pool())
        .await
        .map_err(|e| Error::db("load rule", e))?;

        map_rule(&row)
    }

    pub async fn list_notification_rules(&self, channel_id: i64) -> Result<Vec<NotificationRule>> {
        let rows = sqlx::query(&self.sql(
            "SELECT id, channel_id, event_id, enabled, threshold_value, threshold_operator, \
             created_at, updated_at FROM notification_rules WHERE channel_id = ? ORDER BY id",
        ))
        .bind(channel_id)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list rules", e))?;

        rows.iter().map(map_rule).collect()
    }

    pub async fn delete_notification_rule(&self, id: i64) -> Result<()> {
        let result = sqlx::query(&self.sql("DELETE FROM notification_rules WHERE id = ?"))
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| Error::db("delete rule", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("rule {id}")));
        }
        Ok(())
    }

    /// Enabled rules joined to enabled channels for one `(category,
    /// event_type)`. This is the matcher's candidate set.
    pub async fn matching_notification_rules(
        &self,
        category: &str,
        event_type: &str,
    ) -> Result<Vec<MatchedRule>> {
        let rows = sqlx::query(&self.sql(
            "SELECT r.id, r.channel_id, r.event_id, r.enabled, r.threshold_value, \
             r.threshold_operator, r.created_at, r.updated_at, c.url AS channel_url \
             FROM notification_rules r \
             JOIN notification_channels c ON c.id = r.channel_id \
             JOIN notification_events e ON e.id = r.event_id \
             WHERE r.enabled = ? AND c.enabled = ? AND e.category = ? AND e.event_type = ? \
             ORDER BY r.id",
        ))
        .bind(true)
        .bind(true)
        .bind(category)
        .bind(event_type)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("match rules", e))?;

        rows.iter()
            .map(|row| {
                let rule = map_rule(row)?;
                Ok(MatchedRule {
                    channel_url: row.col("channel_url")?,
                    channel_id: rule.channel_id,
                    event_id: rule.event_id,
                    rule,
                })
            })
            .collect()
    }

    /// Record one delivery attempt. Written after the attempt, so history
    /// rows always mean "attempted deliveries".
    pub async fn insert_notification_history(
        &self,
        channel_id: i64,
        event_id: i64,
        success: bool,
        error: Option<&str>,
        payload: Option<&str>,
    ) -> Result<()> {
        sqlx::query(&self.sql(
            "INSERT INTO notification_history (channel_id, event_id, success, error, payload, \
             created_at) VALUES (?, ?, ?, ?, ?, ?)",
        ))
        .bind(channel_id)
        .bind(event_id)
        .bind(success)
        .bind(error)
        .bind(payload)
        .bind(super::now_ts())
        .execute(self.pool())
        .await
        .map_err(|e| Error::db("insert history", e))?;

        Ok(())
    }

    pub async fn list_notification_history(
        &self,
        channel_id: i64,
        limit: i64,
    ) -> Result<Vec<NotificationHistoryEntry>> {
        let rows = sqlx::query(&self.sql(
            "SELECT id, channel_id, event_id, success, error, payload, created_at \
             FROM notification_history WHERE channel_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        ))
        .bind(channel_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| Error::db("list history", e))?;

        rows.iter()
            .map(|row| {
                Ok(NotificationHistoryEntry {
                    id: row.col("id")?,
                    channel_id: row.col("channel_id")?,
                    event_id: row.col("event_id")?,
                    success: row.col("success")?,
                    error: row.col("error")?,
                    payload: row.col("payload")?,
                    created_at: row.ts("created_at")?,
                })
            })
            .collect()
    }
}
