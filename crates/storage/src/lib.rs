use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use state::PersistedState;
use tracing::{info, warn};

pub const INIT_SQL: &str = include_str!("../../../scripts/init_db.sql");

pub const REQUIRED_TABLES: [&str; 4] = ["bot_state", "banned_ids", "runs", "incidents"];

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)
            .with_context(|| format!("invalid sqlite url `{path}`"))?
            .create_if_missing(true);
        // One connection: the process owns the file exclusively, and
        // `sqlite::memory:` databases are per-connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        run_init_sql(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Reads the persisted state. A missing record yields defaults and a
    /// damaged one is repaired; neither is an error.
    pub async fn load_state(&self) -> Result<PersistedState> {
        let row = sqlx::query("SELECT update_marker, price_threshold FROM bot_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        let banned: Vec<i64> = sqlx::query("SELECT variant_id FROM banned_ids ORDER BY variant_id")
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|r| r.try_get::<i64, _>("variant_id"))
            .collect::<Result<_, _>>()?;

        let Some(row) = row else {
            info!("no stored state found, starting from defaults");
            let (state, _) = PersistedState::repaired(Some(0), None, banned);
            return Ok(state);
        };

        let marker: Option<i64> = row.try_get("update_marker").unwrap_or(None);
        let threshold: Option<i64> = row.try_get("price_threshold").unwrap_or(None);
        let (state, repairs) = PersistedState::repaired(marker, threshold, banned);
        if repairs.any() {
            warn!(
                marker = repairs.marker,
                threshold = repairs.threshold,
                dropped_ids = repairs.dropped_ids,
                "stored state was damaged, repaired with defaults"
            );
        }
        Ok(state)
    }

    /// Writes the whole state in one transaction. The stored marker only
    /// ever grows.
    pub async fn save_state(&self, state: &PersistedState) -> Result<()> {
        let ts_ms = Utc::now().timestamp_millis();
        let threshold = i64::try_from(state.price_threshold)
            .context("price threshold does not fit in sqlite integer")?;
        let banned = state
            .banned_ids
            .iter()
            .map(i64::try_from)
            .collect::<Result<Vec<_>, _>>()
            .context("banned id does not fit in sqlite integer")?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO bot_state (id, update_marker, price_threshold, updated_at_ms) VALUES (1, ?1, ?2, ?3) \
             ON CONFLICT(id) DO UPDATE SET \
             update_marker = MAX(COALESCE(bot_state.update_marker, 0), excluded.update_marker), \
             price_threshold = excluded.price_threshold, \
             updated_at_ms = excluded.updated_at_ms",
        )
        .bind(state.last_update_marker)
        .bind(threshold)
        .bind(ts_ms)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM banned_ids")
            .execute(&mut *tx)
            .await?;
        for id in banned {
            sqlx::query("INSERT INTO banned_ids (variant_id) VALUES (?1)")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(
            marker = state.last_update_marker,
            threshold = state.price_threshold,
            banned = state.banned_ids.len(),
            "state persisted"
        );
        Ok(())
    }

    /// When the state was last written, if ever.
    pub async fn state_updated_at(&self) -> Result<Option<i64>> {
        let row = sqlx::query("SELECT updated_at_ms FROM bot_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.try_get::<Option<i64>, _>("updated_at_ms").ok().flatten()))
    }

    pub async fn insert_run(&self, run_id: &str) -> Result<()> {
        let host = hostname::get()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let ts_ms = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT OR REPLACE INTO runs (run_id, started_at_ms, host) VALUES (?1, ?2, ?3)",
        )
        .bind(run_id)
        .bind(ts_ms)
        .bind(host)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finish_run(&self, run_id: &str, outcome: &str) -> Result<()> {
        let ts_ms = Utc::now().timestamp_millis();
        sqlx::query("UPDATE runs SET finished_at_ms = ?1, outcome = ?2 WHERE run_id = ?3")
            .bind(ts_ms)
            .bind(outcome)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn run_outcome(&self, run_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT outcome FROM runs WHERE run_id = ?1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.try_get::<Option<String>, _>("outcome").ok().flatten()))
    }

    pub async fn log_incident(
        &self,
        run_id: &str,
        severity: &str,
        kind: &str,
        message: &str,
    ) -> Result<()> {
        let ts_ms = Utc::now().timestamp_millis();
        sqlx::query(
            "INSERT INTO incidents (run_id, ts_ms, severity, kind, message) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(run_id)
        .bind(ts_ms)
        .bind(severity)
        .bind(kind)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn incident_kinds(&self, run_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT kind FROM incidents WHERE run_id = ?1 ORDER BY id")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| r.try_get::<String, _>("kind"))
            .collect::<Result<_, _>>()?)
    }

    /// Names of required tables absent from the database.
    pub async fn validate_required_tables(&self) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for table in REQUIRED_TABLES {
            let found = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1")
                .bind(table)
                .fetch_optional(&self.pool)
                .await?;
            if found.is_none() {
                missing.push(table.to_string());
            }
        }
        Ok(missing)
    }
}

pub async fn init_sqlite(path: &str) -> Result<Store> {
    let store = Store::connect(path).await?;
    info!(path = path, "sqlite initialized");
    Ok(store)
}

async fn run_init_sql(pool: &SqlitePool) -> Result<()> {
    for statement in INIT_SQL.split(';') {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            continue;
        }
        sqlx::query(trimmed).execute(pool).await?;
    }
    Ok(())
}
