use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use nearbux_core::domain::{OwnerId, PhoneNumber, ShopContext, ShopId};
use nearbux_core::flows::{FlowKind, FlowSnapshot, Step};
use nearbux_core::verification::IdentityToken;

use super::{FlowSnapshotRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFlowSnapshotRepository {
    pool: DbPool,
}

impl SqlFlowSnapshotRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FlowSnapshotRepository for SqlFlowSnapshotRepository {
    async fn load(&self, session_id: &str) -> Result<Option<FlowSnapshot>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                session_id,
                flow,
                step,
                phone_number,
                identity_token,
                shop_id,
                owner_id,
                updated_at
             FROM flow_snapshot
             WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(snapshot_from_row).transpose()
    }

    async fn save(&self, snapshot: FlowSnapshot) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO flow_snapshot (
                session_id,
                flow,
                step,
                phone_number,
                identity_token,
                shop_id,
                owner_id,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                flow = excluded.flow,
                step = excluded.step,
                phone_number = excluded.phone_number,
                identity_token = excluded.identity_token,
                shop_id = excluded.shop_id,
                owner_id = excluded.owner_id,
                updated_at = excluded.updated_at",
        )
        .bind(&snapshot.session_id)
        .bind(snapshot.flow.as_str())
        .bind(snapshot.step.as_str())
        .bind(snapshot.phone.as_ref().map(|phone| phone.national().to_string()))
        .bind(snapshot.identity.as_ref().map(|identity| identity.expose().to_string()))
        .bind(snapshot.shop.map(|shop| shop.shop_id.0))
        .bind(snapshot.shop.map(|shop| shop.owner_id.0))
        .bind(snapshot.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM flow_snapshot WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM flow_snapshot WHERE updated_at < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn snapshot_from_row(row: SqliteRow) -> Result<FlowSnapshot, RepositoryError> {
    let flow_raw = row.try_get::<String, _>("flow")?;
    let flow = flow_raw.parse::<FlowKind>().map_err(RepositoryError::Decode)?;

    let step_raw = row.try_get::<String, _>("step")?;
    let step = step_raw.parse::<Step>().map_err(RepositoryError::Decode)?;

    let phone = row
        .try_get::<Option<String>, _>("phone_number")?
        .map(|value| {
            PhoneNumber::parse(&value).map_err(|error| {
                RepositoryError::Decode(format!("invalid phone_number `{value}`: {error}"))
            })
        })
        .transpose()?;

    let shop_id = row.try_get::<Option<i64>, _>("shop_id")?;
    let owner_id = row.try_get::<Option<i64>, _>("owner_id")?;
    let shop = match (shop_id, owner_id) {
        (Some(shop_id), Some(owner_id)) => {
            Some(ShopContext { shop_id: ShopId(shop_id), owner_id: OwnerId(owner_id) })
        }
        _ => None,
    };

    Ok(FlowSnapshot {
        session_id: row.try_get("session_id")?,
        flow,
        step,
        phone,
        identity: row.try_get::<Option<String>, _>("identity_token")?.map(IdentityToken::new),
        shop,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
