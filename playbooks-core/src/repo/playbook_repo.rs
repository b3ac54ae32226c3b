use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::debug;

use super::PlaybookStore;
use crate::error::{PlaybookError, PlaybookResult};
use crate::metrics::MetricCollection;
use crate::models::{Metric, MetricId, MetricType, Playbook, PlaybookId};

const PLAYBOOK_COLUMNS: &str = r#"
    id, team_id, title, description, default_owner_id, default_owner_enabled,
    broadcast_enabled, broadcast_channel_ids, webhook_on_creation_enabled,
    webhook_on_creation_urls, version, created_at, updated_at
"#;

#[derive(Debug, FromRow)]
struct PlaybookRow {
    id: String,
    team_id: String,
    title: String,
    description: String,
    default_owner_id: Option<String>,
    default_owner_enabled: bool,
    broadcast_enabled: bool,
    broadcast_channel_ids: Vec<String>,
    webhook_on_creation_enabled: bool,
    webhook_on_creation_urls: Vec<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct MetricRow {
    id: String,
    playbook_id: String,
    title: String,
    description: String,
    metric_type: String,
    target: Option<i64>,
}

impl MetricRow {
    fn into_metric(self) -> PlaybookResult<Metric> {
        let metric_type: MetricType = self.metric_type.parse().map_err(|_| {
            PlaybookError::Internal(format!(
                "stored metric '{}' has unknown type '{}'",
                self.id, self.metric_type
            ))
        })?;

        Ok(Metric {
            id: MetricId::from(self.id),
            title: self.title,
            description: self.description,
            metric_type,
            target: self.target,
        })
    }
}

impl PlaybookRow {
    fn into_playbook(self, metrics: Vec<MetricRow>) -> PlaybookResult<Playbook> {
        let metrics = metrics
            .into_iter()
            .map(MetricRow::into_metric)
            .collect::<PlaybookResult<Vec<_>>>()?;

        Ok(Playbook {
            id: PlaybookId::from(self.id),
            team_id: self.team_id,
            title: self.title,
            description: self.description,
            default_owner_id: self.default_owner_id,
            default_owner_enabled: self.default_owner_enabled,
            broadcast_enabled: self.broadcast_enabled,
            broadcast_channel_ids: self.broadcast_channel_ids,
            webhook_on_creation_enabled: self.webhook_on_creation_enabled,
            webhook_on_creation_urls: self.webhook_on_creation_urls,
            metrics: MetricCollection::from(metrics),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Postgres-backed [`PlaybookStore`]. Metrics live in `playbook_metrics`,
/// ordered by `position`, and are rewritten with their playbook on every save.
pub struct PgPlaybookRepository {
    pool: PgPool,
}

impl PgPlaybookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a new playbook at version 1.
    pub async fn create(&self, playbook: &Playbook) -> PlaybookResult<Playbook> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO playbooks (
                id, team_id, title, description, default_owner_id, default_owner_enabled,
                broadcast_enabled, broadcast_channel_ids, webhook_on_creation_enabled,
                webhook_on_creation_urls, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 1, $11, $12)
            "#,
        )
        .bind(playbook.id.as_str())
        .bind(&playbook.team_id)
        .bind(&playbook.title)
        .bind(&playbook.description)
        .bind(&playbook.default_owner_id)
        .bind(playbook.default_owner_enabled)
        .bind(playbook.broadcast_enabled)
        .bind(&playbook.broadcast_channel_ids)
        .bind(playbook.webhook_on_creation_enabled)
        .bind(&playbook.webhook_on_creation_urls)
        .bind(playbook.created_at)
        .bind(playbook.updated_at)
        .execute(&mut *tx)
        .await?;

        Self::write_metrics(&mut tx, playbook).await?;
        tx.commit().await?;

        let mut created = playbook.clone();
        created.version = 1;
        Ok(created)
    }

    pub async fn count(&self) -> PlaybookResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM playbooks")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    async fn write_metrics(
        tx: &mut Transaction<'_, Postgres>,
        playbook: &Playbook,
    ) -> PlaybookResult<()> {
        sqlx::query("DELETE FROM playbook_metrics WHERE playbook_id = $1")
            .bind(playbook.id.as_str())
            .execute(&mut **tx)
            .await?;

        for (position, metric) in playbook.metrics.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO playbook_metrics
                    (id, playbook_id, position, title, description, metric_type, target)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(metric.id.as_str())
            .bind(playbook.id.as_str())
            .bind(position as i32)
            .bind(&metric.title)
            .bind(&metric.description)
            .bind(metric.metric_type.as_str())
            .bind(metric.target)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    async fn metrics_for(&self, playbook_ids: &[String]) -> PlaybookResult<Vec<MetricRow>> {
        let rows = sqlx::query_as::<_, MetricRow>(
            r#"
            SELECT id, playbook_id, title, description, metric_type, target
            FROM playbook_metrics
            WHERE playbook_id = ANY($1)
            ORDER BY playbook_id, position
            "#,
        )
        .bind(playbook_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl PlaybookStore for PgPlaybookRepository {
    async fn load_playbook(&self, id: &PlaybookId) -> PlaybookResult<Option<Playbook>> {
        let row = sqlx::query_as::<_, PlaybookRow>(&format!(
            "SELECT {} FROM playbooks WHERE id = $1",
            PLAYBOOK_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let metrics = self.metrics_for(&[row.id.clone()]).await?;
                Ok(Some(row.into_playbook(metrics)?))
            }
            None => Ok(None),
        }
    }

    async fn save_playbook(&self, playbook: &Playbook) -> PlaybookResult<i64> {
        let mut tx = self.pool.begin().await?;

        let new_version: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE playbooks
            SET title = $3, description = $4, default_owner_id = $5,
                default_owner_enabled = $6, broadcast_enabled = $7,
                broadcast_channel_ids = $8, webhook_on_creation_enabled = $9,
                webhook_on_creation_urls = $10, version = version + 1, updated_at = NOW()
            WHERE id = $1 AND version = $2
            RETURNING version
            "#,
        )
        .bind(playbook.id.as_str())
        .bind(playbook.version)
        .bind(&playbook.title)
        .bind(&playbook.description)
        .bind(&playbook.default_owner_id)
        .bind(playbook.default_owner_enabled)
        .bind(playbook.broadcast_enabled)
        .bind(&playbook.broadcast_channel_ids)
        .bind(playbook.webhook_on_creation_enabled)
        .bind(&playbook.webhook_on_creation_urls)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(new_version) = new_version else {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT version FROM playbooks WHERE id = $1")
                    .bind(playbook.id.as_str())
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;

            return Err(match exists {
                Some(stored) => {
                    debug!(
                        playbook_id = %playbook.id,
                        expected = playbook.version,
                        stored,
                        "Version check failed"
                    );
                    PlaybookError::Conflict {
                        playbook_id: playbook.id.to_string(),
                    }
                }
                None => PlaybookError::PlaybookNotFound(playbook.id.to_string()),
            });
        };

        Self::write_metrics(&mut tx, playbook).await?;
        tx.commit().await?;

        Ok(new_version)
    }

    async fn list_playbooks(&self) -> PlaybookResult<Vec<Playbook>> {
        let rows = sqlx::query_as::<_, PlaybookRow>(&format!(
            "SELECT {} FROM playbooks ORDER BY title",
            PLAYBOOK_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut metrics_by_playbook: HashMap<String, Vec<MetricRow>> = HashMap::new();
        for metric in self.metrics_for(&ids).await? {
            metrics_by_playbook
                .entry(metric.playbook_id.clone())
                .or_default()
                .push(metric);
        }

        rows.into_iter()
            .map(|row| {
                let metrics = metrics_by_playbook.remove(&row.id).unwrap_or_default();
                row.into_playbook(metrics)
            })
            .collect()
    }

    async fn find_playbook_id_by_metric(
        &self,
        metric_id: &MetricId,
    ) -> PlaybookResult<Option<PlaybookId>> {
        let playbook_id: Option<String> =
            sqlx::query_scalar("SELECT playbook_id FROM playbook_metrics WHERE id = $1")
                .bind(metric_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        Ok(playbook_id.map(PlaybookId::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playbook_row() -> PlaybookRow {
        let now = Utc::now();
        PlaybookRow {
            id: "pb1".to_string(),
            team_id: "team-1".to_string(),
            title: "Incident".to_string(),
            description: String::new(),
            default_owner_id: None,
            default_owner_enabled: false,
            broadcast_enabled: true,
            broadcast_channel_ids: vec!["c1".to_string()],
            webhook_on_creation_enabled: false,
            webhook_on_creation_urls: Vec::new(),
            version: 4,
            created_at: now,
            updated_at: now,
        }
    }

    fn metric_row(id: &str, metric_type: &str) -> MetricRow {
        MetricRow {
            id: id.to_string(),
            playbook_id: "pb1".to_string(),
            title: id.to_uppercase(),
            description: String::new(),
            metric_type: metric_type.to_string(),
            target: Some(60_000),
        }
    }

    #[test]
    fn test_row_conversion_keeps_metric_order() {
        let playbook = playbook_row()
            .into_playbook(vec![
                metric_row("m2", "metric_duration"),
                metric_row("m1", "metric_integer"),
            ])
            .unwrap();

        assert_eq!(playbook.version, 4);
        let ids: Vec<&str> = playbook.metrics.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);
    }

    #[test]
    fn test_row_conversion_rejects_unknown_type() {
        let err = playbook_row()
            .into_playbook(vec![metric_row("m1", "metric_percentage")])
            .unwrap_err();
        assert!(matches!(err, PlaybookError::Internal(_)));
    }
}
