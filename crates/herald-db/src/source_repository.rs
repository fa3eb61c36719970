use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres, Transaction};

use herald_core::circuit_breaker::{CircuitBreaker, CircuitTransition, SourceCircuitState};
use herald_core::error::AppError;
use herald_core::source::{Source, SourceConfig, SourceDefinition, SourceOutcome};
use herald_core::traits::SourceRegistry;

/// PostgreSQL-backed source registry.
///
/// Circuit updates run inside a transaction holding `FOR UPDATE` on the
/// source row, so concurrent jobs reporting outcomes for the same source
/// serialize instead of losing failures.
#[derive(Clone)]
pub struct SourceRepository {
    pool: Pool<Postgres>,
    breaker: CircuitBreaker,
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: String,
    name: String,
    feed_url: String,
    config: Json<SourceConfig>,
    enabled: bool,
    circuit_state: String,
    failure_count: i32,
    window_start: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

impl SourceRow {
    fn into_source(self) -> Result<(Source, bool), AppError> {
        let circuit = SourceCircuitState {
            source_id: self.id.clone(),
            state: self
                .circuit_state
                .parse()
                .map_err(AppError::DatabaseError)?,
            failure_count: self.failure_count.max(0) as u32,
            window_start: self.window_start,
            opened_at: self.opened_at,
            last_failure_at: self.last_failure_at,
        };
        let source = Source::new(self.id, self.feed_url)
            .with_name(self.name)
            .with_config(self.config.0)
            .with_circuit(circuit);
        Ok((source, self.enabled))
    }
}

const SOURCE_COLUMNS: &str = r#"
    id, name, feed_url, config, enabled, circuit_state, failure_count,
    window_start, opened_at, last_failure_at
"#;

impl SourceRepository {
    pub fn new(pool: PgPool, breaker: CircuitBreaker) -> Self {
        Self { pool, breaker }
    }

    /// Insert or update a source's definition. Circuit state is left alone.
    pub async fn upsert_source(&self, definition: &SourceDefinition) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, name, feed_url, config, enabled)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, feed_url = EXCLUDED.feed_url,
                config = EXCLUDED.config, enabled = EXCLUDED.enabled,
                updated_at = NOW()
            "#,
        )
        .bind(&definition.id)
        .bind(definition.name.as_deref().unwrap_or(&definition.id))
        .bind(&definition.feed_url)
        .bind(Json(&definition.config))
        .bind(definition.enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::debug!(source_id = %definition.id, "Source definition stored");
        Ok(())
    }

    /// Every source with its enabled flag, ordered by id.
    pub async fn list_sources(&self) -> Result<Vec<(Source, bool)>, AppError> {
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        rows.into_iter().map(SourceRow::into_source).collect()
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, AppError> {
        self.pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {e}")))
    }
}

async fn store_circuit(
    tx: &mut Transaction<'static, Postgres>,
    circuit: &SourceCircuitState,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE sources
        SET circuit_state = $2, failure_count = $3, window_start = $4,
            opened_at = $5, last_failure_at = $6, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(&circuit.source_id)
    .bind(circuit.state.as_str())
    .bind(circuit.failure_count as i32)
    .bind(circuit.window_start)
    .bind(circuit.opened_at)
    .bind(circuit.last_failure_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::DatabaseError(e.to_string()))?;
    Ok(())
}

impl SourceRegistry for SourceRepository {
    async fn list_eligible_sources(&self) -> Result<Vec<Source>, AppError> {
        let mut tx = self.begin().await?;
        let rows = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE enabled ORDER BY id FOR UPDATE"
        ))
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let now = Utc::now();
        let mut sources = Vec::with_capacity(rows.len());
        for row in rows {
            let (mut source, _) = row.into_source()?;
            if self.breaker.refresh(&mut source.circuit, now).is_some() {
                store_circuit(&mut tx, &source.circuit).await?;
            }
            sources.push(source);
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(sources)
    }

    async fn report_source_outcome(
        &self,
        source_id: &str,
        outcome: SourceOutcome,
    ) -> Result<Option<CircuitTransition>, AppError> {
        let mut tx = self.begin().await?;
        let row = sqlx::query_as::<_, SourceRow>(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = $1 FOR UPDATE"
        ))
        .bind(source_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("Source {source_id}")))?;

        let (mut source, _) = row.into_source()?;
        let before = source.circuit.clone();
        let transition = self.breaker.apply(&mut source.circuit, &outcome, Utc::now());
        if source.circuit != before {
            store_circuit(&mut tx, &source.circuit).await?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(transition)
    }
}
