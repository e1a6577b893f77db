use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::types::{Alert, AlertError, AlertState, CreateAlertRequest, DeliveryStatus, RecordDeliveryRequest, Severity};

/// Alert/event/delivery persistence. Every multi-row write is a single
/// transaction, mirroring `mqk-db`'s run-lifecycle writes.
pub struct AlertStore {
    pool: PgPool,
}

impl AlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, req: &CreateAlertRequest) -> Result<Alert, AlertError> {
        let id = Uuid::new_v4();
        let mut tx = self.pool.begin().await.context("begin create alert tx")?;

        sqlx::query(
            r#"
            insert into alerts
                (id, dedupe_key, source, reason, severity, summary, message, metadata,
                 state, created_at, updated_at)
            values ($1, $2, $3, $4, $5, $6, $7, $8, 'open', $9, $9)
            "#,
        )
        .bind(id)
        .bind(&req.dedupe_key)
        .bind(&req.source)
        .bind(&req.reason)
        .bind(req.severity.as_str())
        .bind(&req.summary)
        .bind(&req.message)
        .bind(&req.metadata)
        .bind(req.occurred_at)
        .execute(&mut *tx)
        .await
        .context("insert alert")?;

        insert_event(&mut tx, id, "open", req.occurred_at).await?;

        tx.commit().await.context("commit create alert tx")?;

        Ok(Alert {
            id,
            dedupe_key: req.dedupe_key.clone(),
            source: req.source.clone(),
            reason: req.reason.clone(),
            severity: req.severity,
            summary: req.summary.clone(),
            message: req.message.clone(),
            metadata: req.metadata.clone(),
            state: AlertState::Open,
            created_at: req.occurred_at,
            updated_at: req.occurred_at,
            acknowledged_at: None,
            acknowledged_by: None,
            last_error: None,
        })
    }

    pub async fn transition(&self, id: Uuid, next: AlertState, now: DateTime<Utc>) -> Result<(), AlertError> {
        let mut tx = self.pool.begin().await.context("begin transition tx")?;

        let current: Option<(String,)> =
            sqlx::query_as("select state from alerts where id = $1 for update")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .context("load alert state")?;
        let Some((current_str,)) = current else {
            return Err(AlertError::NotFound(id));
        };
        let current_state = parse_state(&current_str);
        if !current_state.can_transition_to(next) {
            return Err(AlertError::InvalidTransition { from: current_state.as_str(), to: next.as_str() });
        }

        sqlx::query("update alerts set state = $2, updated_at = $3 where id = $1")
            .bind(id)
            .bind(next.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("update alert state")?;

        insert_event(&mut tx, id, next.as_str(), now).await?;

        tx.commit().await.context("commit transition tx")?;
        Ok(())
    }

    pub async fn acknowledge(&self, id: Uuid, by: &str, now: DateTime<Utc>) -> Result<(), AlertError> {
        let result = sqlx::query(
            "update alerts set acknowledged_at = $2, acknowledged_by = $3 where id = $1",
        )
        .bind(id)
        .bind(now)
        .bind(by)
        .execute(&self.pool)
        .await
        .context("acknowledge alert")?;
        if result.rows_affected() == 0 {
            return Err(AlertError::NotFound(id));
        }
        Ok(())
    }

    pub async fn record_delivery(&self, req: &RecordDeliveryRequest, now: DateTime<Utc>) -> Result<(), AlertError> {
        let mut tx = self.pool.begin().await.context("begin delivery tx")?;

        let exists: Option<(i64,)> = sqlx::query_as("select 1 from alerts where id = $1")
            .bind(req.alert_id)
            .fetch_optional(&mut *tx)
            .await
            .context("check alert exists")?;
        if exists.is_none() {
            return Err(AlertError::NotFound(req.alert_id));
        }

        let status_str = match req.status {
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        };

        sqlx::query(
            r#"
            insert into alert_deliveries
                (id, alert_id, channel, status, attempt, provider_message_id, error, metadata, created_at)
            values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(req.alert_id)
        .bind(&req.channel)
        .bind(status_str)
        .bind(req.attempt)
        .bind(&req.provider_message_id)
        .bind(&req.error)
        .bind(&req.metadata)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("insert alert delivery")?;

        insert_event(&mut tx, req.alert_id, &format!("delivery_{status_str}"), now).await?;

        if matches!(req.status, DeliveryStatus::Failed) {
            if let Some(err) = &req.error {
                sqlx::query("update alerts set last_error = $2 where id = $1")
                    .bind(req.alert_id)
                    .bind(err)
                    .execute(&mut *tx)
                    .await
                    .context("update alert last_error")?;
            }
        }

        tx.commit().await.context("commit delivery tx")?;
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Alert>, AlertError> {
        let row = sqlx::query(
            r#"select id, dedupe_key, source, reason, severity, summary, message, metadata,
                      state, created_at, updated_at, acknowledged_at, acknowledged_by, last_error
               from alerts where id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("get alert")?;
        Ok(row.map(row_to_alert))
    }

    /// Alerts not yet resolved, newest first — what an operator dashboard or
    /// CLI would poll.
    pub async fn list_open(&self) -> Result<Vec<Alert>, AlertError> {
        let rows = sqlx::query(
            r#"select id, dedupe_key, source, reason, severity, summary, message, metadata,
                      state, created_at, updated_at, acknowledged_at, acknowledged_by, last_error
               from alerts where state != 'resolved' order by created_at desc"#,
        )
        .fetch_all(&self.pool)
        .await
        .context("list_open alerts")?;
        Ok(rows.into_iter().map(row_to_alert).collect())
    }
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    alert_id: Uuid,
    kind: &str,
    now: DateTime<Utc>,
) -> Result<(), AlertError> {
    sqlx::query("insert into alert_events (id, alert_id, kind, occurred_at) values ($1, $2, $3, $4)")
        .bind(Uuid::new_v4())
        .bind(alert_id)
        .bind(kind)
        .bind(now)
        .execute(&mut **tx)
        .await
        .context("insert alert event")?;
    Ok(())
}

fn parse_state(s: &str) -> AlertState {
    match s {
        "open" => AlertState::Open,
        "suppressed" => AlertState::Suppressed,
        "sent" => AlertState::Sent,
        _ => AlertState::Resolved,
    }
}

fn row_to_alert(row: sqlx::postgres::PgRow) -> Alert {
    Alert {
        id: row.get("id"),
        dedupe_key: row.get("dedupe_key"),
        source: row.get("source"),
        reason: row.get("reason"),
        severity: parse_severity(row.get::<String, _>("severity").as_str()),
        summary: row.get("summary"),
        message: row.get("message"),
        metadata: row.get("metadata"),
        state: parse_state(row.get::<String, _>("state").as_str()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        acknowledged_at: row.get("acknowledged_at"),
        acknowledged_by: row.get("acknowledged_by"),
        last_error: row.get("last_error"),
    }
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "info" => Severity::Info,
        "warning" => Severity::Warning,
        "high" => Severity::High,
        _ => Severity::Critical,
    }
}
