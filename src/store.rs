//! MySQL-backed packet store.
//!
//! One append-only table of decoded readings. Each operation is a single
//! statement and individually retryable by the caller; the store performs
//! no internal retries. Concurrent inserts from the ingest path interleave
//! freely with reads, with no guarantee beyond per-statement atomicity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::DatabaseConfig;
use crate::packet::Packet;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// A packet after the store has assigned its identifier and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StoredPacket {
    pub id: u64,
    pub time: String,
    pub latitude: f64,
    pub longitude: f64,
    pub satellites: u32,
    pub acceleration_x: f64,
    pub acceleration_y: f64,
    pub acceleration_z: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Numeric columns that can be projected as a chart series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarField {
    Latitude,
    Longitude,
    Satellites,
    AccelerationX,
    AccelerationY,
    AccelerationZ,
}

impl ScalarField {
    pub fn column(&self) -> &'static str {
        match self {
            ScalarField::Latitude => "latitude",
            ScalarField::Longitude => "longitude",
            ScalarField::Satellites => "satellites",
            ScalarField::AccelerationX => "acceleration_x",
            ScalarField::AccelerationY => "acceleration_y",
            ScalarField::AccelerationZ => "acceleration_z",
        }
    }
}

/// Handle to the packets table, cloneable across tasks via its inner pool.
#[derive(Debug, Clone)]
pub struct PacketStore {
    pool: MySqlPool,
}

impl PacketStore {
    /// Open a connection pool against the configured database.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .max_lifetime(config.max_lifetime())
            .connect(&config.effective_url())
            .await
            .map_err(StoreError::Connect)?;

        info!(
            host = %config.host,
            database = %config.database,
            max_connections = config.max_connections,
            "connected to database"
        );

        Ok(Self { pool })
    }

    /// Apply any pending schema migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    /// Append one packet, returning the store-assigned identifier.
    #[instrument(skip(self, packet), fields(time = %packet.time))]
    pub async fn insert(&self, packet: &Packet) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO packets
                (time, latitude, longitude, satellites,
                 acceleration_x, acceleration_y, acceleration_z)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&packet.time)
        .bind(packet.latitude)
        .bind(packet.longitude)
        .bind(packet.satellites)
        .bind(packet.acceleration[0])
        .bind(packet.acceleration[1])
        .bind(packet.acceleration[2])
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_id();
        debug!(id, "packet stored");
        metrics::counter!("station.store.packets_inserted").increment(1);

        Ok(id)
    }

    /// Most-recent-first listing. `limit <= 0` returns everything.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: i64) -> Result<Vec<StoredPacket>, StoreError> {
        let sql = list_query(limit);

        let packets = if limit > 0 {
            sqlx::query_as::<_, StoredPacket>(&sql)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_as::<_, StoredPacket>(&sql)
                .fetch_all(&self.pool)
                .await?
        };

        debug!(count = packets.len(), "packets listed");
        Ok(packets)
    }

    /// The most recently created packet, or `None` when the table is empty.
    pub async fn latest(&self) -> Result<Option<StoredPacket>, StoreError> {
        let packet = sqlx::query_as::<_, StoredPacket>(
            r#"
            SELECT id, time, latitude, longitude, satellites,
                   acceleration_x, acceleration_y, acceleration_z,
                   created_at, updated_at
            FROM packets
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(packet)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM packets")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Remove every stored packet. Irreversible; callers confirm first.
    #[instrument(skip(self))]
    pub async fn delete_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM packets")
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        info!(deleted, "all packets deleted");
        Ok(deleted)
    }

    /// Project one scalar column in ascending creation order, for chart
    /// reconstruction. `limit > 0` caps to the first rows; columns are
    /// promoted so integer fields come back as doubles too.
    #[instrument(skip(self))]
    pub async fn series_of(
        &self,
        field: ScalarField,
        limit: i64,
    ) -> Result<Vec<f64>, StoreError> {
        let sql = series_query(field, limit);

        let values = if limit > 0 {
            sqlx::query_scalar::<_, f64>(&sql)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_scalar::<_, f64>(&sql)
                .fetch_all(&self.pool)
                .await?
        };

        debug!(field = field.column(), count = values.len(), "series loaded");
        Ok(values)
    }

    /// The newest `limit` samples of one scalar column, oldest first, so
    /// a display window can be rebuilt without reading the whole table.
    /// `limit <= 0` returns every sample.
    #[instrument(skip(self))]
    pub async fn recent_series(
        &self,
        field: ScalarField,
        limit: i64,
    ) -> Result<Vec<f64>, StoreError> {
        let sql = recent_series_query(field, limit);

        let mut values = if limit > 0 {
            sqlx::query_scalar::<_, f64>(&sql)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query_scalar::<_, f64>(&sql)
                .fetch_all(&self.pool)
                .await?
        };

        values.reverse();
        debug!(
            field = field.column(),
            count = values.len(),
            "recent series loaded"
        );
        Ok(values)
    }
}

// Query text builders. Column names come from the closed ScalarField
// enum, never from user input; `+ 0E0` promotes the INT UNSIGNED
// satellites column to DOUBLE on any MySQL-compatible server.

fn list_query(limit: i64) -> String {
    let mut sql = String::from(
        r#"
        SELECT id, time, latitude, longitude, satellites,
               acceleration_x, acceleration_y, acceleration_z,
               created_at, updated_at
        FROM packets
        ORDER BY created_at DESC, id DESC
        "#,
    );
    if limit > 0 {
        sql.push_str(" LIMIT ?");
    }
    sql
}

fn series_query(field: ScalarField, limit: i64) -> String {
    let mut sql = format!(
        "SELECT ({} + 0E0) FROM packets ORDER BY created_at ASC, id ASC",
        field.column()
    );
    if limit > 0 {
        sql.push_str(" LIMIT ?");
    }
    sql
}

fn recent_series_query(field: ScalarField, limit: i64) -> String {
    let mut sql = format!(
        "SELECT ({} + 0E0) FROM packets ORDER BY created_at DESC, id DESC",
        field.column()
    );
    if limit > 0 {
        sql.push_str(" LIMIT ?");
    }
    sql
}
