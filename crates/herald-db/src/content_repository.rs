use std::collections::HashSet;

use herald_core::error::AppError;
use herald_core::models::ScrapedContent;
use herald_core::traits::{ContentStore, UpsertOutcome};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

/// PostgreSQL-backed content store. The unique constraints on
/// `content_hash` and `normalized_url` are the global dedup truth.
#[derive(Clone)]
pub struct ContentRepository {
    pool: Pool<Postgres>,
}

impl ContentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> Result<u64, AppError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scraped_content")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(count as u64)
    }
}

impl ContentStore for ContentRepository {
    async fn upsert_scraped_content(
        &self,
        record: &ScrapedContent,
    ) -> Result<UpsertOutcome, AppError> {
        // No conflict target: a clash on either unique constraint is a duplicate.
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO scraped_content
                (job_id, source_id, url, normalized_url, title, body, author,
                 published_at, content_hash, quality_score, fingerprint)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT DO NOTHING
            RETURNING id
            "#,
        )
        .bind(record.job_id)
        .bind(&record.source_id)
        .bind(&record.url)
        .bind(&record.normalized_url)
        .bind(&record.title)
        .bind(&record.body)
        .bind(&record.author)
        .bind(record.published_at)
        .bind(&record.content_hash)
        .bind(i16::from(record.quality_score))
        // Stored bit-for-bit; XOR and bit_count do not care about the sign.
        .bind(record.fingerprint.map(|fp| fp as i64))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(match id {
            Some(id) => UpsertOutcome::Inserted(id),
            None => {
                tracing::debug!(url = %record.normalized_url, "Insert skipped on unique conflict");
                UpsertOutcome::Duplicate
            }
        })
    }

    async fn exists_by_hash(&self, hash: &str) -> Result<bool, AppError> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM scraped_content WHERE content_hash = $1)",
        )
        .bind(hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))
    }

    async fn exists_by_normalized_url(&self, normalized_url: &str) -> Result<bool, AppError> {
        sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM scraped_content WHERE normalized_url = $1)",
        )
        .bind(normalized_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))
    }

    async fn existing_normalized_urls(&self, urls: &[String]) -> Result<HashSet<String>, AppError> {
        if urls.is_empty() {
            return Ok(HashSet::new());
        }
        let found: Vec<String> = sqlx::query_scalar(
            "SELECT normalized_url FROM scraped_content WHERE normalized_url = ANY($1)",
        )
        .bind(urls)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(found.into_iter().collect())
    }

    async fn find_near_duplicate(
        &self,
        fingerprint: u64,
        max_distance: u32,
    ) -> Result<Option<u32>, AppError> {
        let distance: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT d FROM (
                SELECT bit_count((fingerprint # $1)::bit(64)) AS d
                FROM scraped_content
                WHERE fingerprint IS NOT NULL
            ) distances
            WHERE d <= $2
            ORDER BY d
            LIMIT 1
            "#,
        )
        .bind(fingerprint as i64)
        .bind(i64::from(max_distance))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(distance.map(|d| d as u32))
    }
}
