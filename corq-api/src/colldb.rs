//! SQLite memoization of collocation support counts
//!
//! Fy and Fxy counts for a (corpus, relation, pivot, collocate) key never
//! change for a fixed corpus build, so answered sub-queries are stored and
//! looked up before dispatching to the bus. Two requests computing the same
//! key concurrently both dispatch and both insert; the duplicate work is
//! accepted, the second insert is a no-op.

use std::path::Path;

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::info;

use corq_common::error::Result;

/// Which support count a stored row holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountKind {
    /// Collocate alone within the relation
    Fy,
    /// Pivot and collocate jointly
    Fxy,
}

impl CountKind {
    fn as_str(&self) -> &'static str {
        match self {
            CountKind::Fy => "fy",
            CountKind::Fxy => "fxy",
        }
    }
}

pub struct CollDatabase {
    pool: SqlitePool,
}

impl CollDatabase {
    pub async fn open(db_path: &Path) -> Result<Self> {
        let newly_created = !db_path.exists();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new().connect(&db_url).await?;
        if newly_created {
            info!("Initialized new collocation database: {}", db_path.display());
        }
        Self::init_schema(&pool).await?;
        Ok(CollDatabase { pool })
    }

    /// Private in-memory database, used by tests
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init_schema(&pool).await?;
        Ok(CollDatabase { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS coll_counts (
                corpus TEXT NOT NULL,
                relation TEXT NOT NULL,
                kind TEXT NOT NULL,
                pivot TEXT NOT NULL,
                collocate TEXT NOT NULL,
                value INTEGER NOT NULL,
                PRIMARY KEY (corpus, relation, kind, pivot, collocate)
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn get_count(
        &self,
        corpus: &str,
        relation: &str,
        kind: CountKind,
        pivot: &str,
        collocate: &str,
    ) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT value FROM coll_counts
             WHERE corpus = ? AND relation = ? AND kind = ? AND pivot = ? AND collocate = ?",
        )
        .bind(corpus)
        .bind(relation)
        .bind(kind.as_str())
        .bind(pivot)
        .bind(collocate)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<i64, _>("value")))
    }

    pub async fn put_count(
        &self,
        corpus: &str,
        relation: &str,
        kind: CountKind,
        pivot: &str,
        collocate: &str,
        value: i64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO coll_counts (corpus, relation, kind, pivot, collocate, value)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(corpus)
        .bind(relation)
        .bind(kind.as_str())
        .bind(pivot)
        .bind(collocate)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_miss_then_hit() {
        let db = CollDatabase::open_in_memory().await.unwrap();
        let miss = db
            .get_count("syn2020", "verb-subject", CountKind::Fy, "", "win")
            .await
            .unwrap();
        assert_eq!(miss, None);

        db.put_count("syn2020", "verb-subject", CountKind::Fy, "", "win", 120)
            .await
            .unwrap();
        let hit = db
            .get_count("syn2020", "verb-subject", CountKind::Fy, "", "win")
            .await
            .unwrap();
        assert_eq!(hit, Some(120));
    }

    #[tokio::test]
    async fn test_keys_do_not_collide_across_kinds() {
        let db = CollDatabase::open_in_memory().await.unwrap();
        db.put_count("c", "verb-subject", CountKind::Fy, "team", "win", 120)
            .await
            .unwrap();
        db.put_count("c", "verb-subject", CountKind::Fxy, "team", "win", 12)
            .await
            .unwrap();
        assert_eq!(
            db.get_count("c", "verb-subject", CountKind::Fxy, "team", "win")
                .await
                .unwrap(),
            Some(12)
        );
    }

    #[tokio::test]
    async fn test_duplicate_insert_keeps_first_value() {
        let db = CollDatabase::open_in_memory().await.unwrap();
        db.put_count("c", "verb-subject", CountKind::Fy, "", "win", 120)
            .await
            .unwrap();
        db.put_count("c", "verb-subject", CountKind::Fy, "", "win", 999)
            .await
            .unwrap();
        assert_eq!(
            db.get_count("c", "verb-subject", CountKind::Fy, "", "win")
                .await
                .unwrap(),
            Some(120)
        );
    }
}
