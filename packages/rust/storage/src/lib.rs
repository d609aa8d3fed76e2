//! libSQL storage layer (local file, offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding run history, the
//! ranked evidence behind each run, and the generation cache.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use serde::Serialize;

use rarecite_shared::{Document, RareCiteError, Result, RunId, SectionId, SufficiencyReport};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row of `rarecite runs`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub disease: String,
    pub created_at: DateTime<Utc>,
    pub can_compose: bool,
    pub total_score: f64,
    pub num_sufficient: usize,
    pub article_path: Option<String>,
}

/// A stored run with its full report.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub summary: RunSummary,
    pub report: SufficiencyReport,
}

/// A ranked document as recorded for a run (without its text).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDocument {
    pub section: SectionId,
    pub rank: usize,
    pub identity_key: String,
    pub url: String,
    pub title: Option<String>,
    pub tier: String,
    pub tier_score: u8,
    pub word_count: usize,
    pub citation_count: u32,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RareCiteError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RareCiteError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| RareCiteError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    RareCiteError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Record a sufficiency report as a new run.
    pub async fn insert_run(&self, report: &SufficiencyReport) -> Result<()> {
        let report_json = serde_json::to_string(report)
            .map_err(|e| RareCiteError::Storage(format!("failed to serialize report: {e}")))?;

        self.conn
            .execute(
                "INSERT INTO runs (id, disease, created_at, can_compose, total_score, num_sufficient, report_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    report.run_id.to_string(),
                    report.disease.as_str(),
                    report.created_at.to_rfc3339(),
                    i64::from(report.can_compose),
                    report.total_score,
                    report.num_sufficient as i64,
                    report_json,
                ],
            )
            .await
            .map_err(|e| RareCiteError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Attach the written article's path to a run.
    pub async fn set_article_path(&self, run_id: &RunId, path: &str) -> Result<()> {
        let updated = self
            .conn
            .execute(
                "UPDATE runs SET article_path = ?2 WHERE id = ?1",
                params![run_id.to_string(), path],
            )
            .await
            .map_err(|e| RareCiteError::Storage(e.to_string()))?;

        if updated == 0 {
            return Err(RareCiteError::Storage(format!("run not found: {run_id}")));
        }
        Ok(())
    }

    /// Get a run by ID, including its report.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, disease, created_at, can_compose, total_score, num_sufficient, article_path, report_json
                 FROM runs WHERE id = ?1",
                params![run_id],
            )
            .await
            .map_err(|e| RareCiteError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let summary = row_to_run_summary(&row)?;
                let report_json: String = row
                    .get(7)
                    .map_err(|e| RareCiteError::Storage(e.to_string()))?;
                let report = serde_json::from_str(&report_json)
                    .map_err(|e| RareCiteError::Storage(format!("corrupt report_json: {e}")))?;
                Ok(Some(RunRecord { summary, report }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(RareCiteError::Storage(e.to_string())),
        }
    }

    /// List the most recent runs, newest first.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, disease, created_at, can_compose, total_score, num_sufficient, article_path
                 FROM runs ORDER BY created_at DESC, id DESC LIMIT ?1",
                params![limit as i64],
            )
            .await
            .map_err(|e| RareCiteError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_run_summary(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Run documents
    // -----------------------------------------------------------------------

    /// Record a section's ranked documents for a run. Rank is the position in `documents`.
    pub async fn insert_run_documents(
        &self,
        run_id: &RunId,
        section: SectionId,
        documents: &[Document],
    ) -> Result<()> {
        let run_id = run_id.to_string();
        for (rank, doc) in documents.iter().enumerate() {
            self.conn
                .execute(
                    "INSERT INTO run_documents
                       (run_id, section, rank, identity_key, url, title, tier, tier_score, word_count, citation_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(run_id, section, identity_key) DO NOTHING",
                    params![
                        run_id.as_str(),
                        section.as_str(),
                        rank as i64,
                        doc.identity_key.as_str(),
                        doc.url.as_str(),
                        (!doc.title.is_empty()).then_some(doc.title.as_str()),
                        doc.quality_tier.as_str(),
                        i64::from(doc.tier_score),
                        doc.word_count as i64,
                        i64::from(doc.citation_count),
                    ],
                )
                .await
                .map_err(|e| RareCiteError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// Documents recorded for a run, in schema order then rank.
    pub async fn list_run_documents(&self, run_id: &str) -> Result<Vec<StoredDocument>> {
        let mut rows = self
            .conn
            .query(
                "SELECT section, rank, identity_key, url, title, tier, tier_score, word_count, citation_count
                 FROM run_documents WHERE run_id = ?1 ORDER BY rank",
                params![run_id],
            )
            .await
            .map_err(|e| RareCiteError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_stored_document(&row)?);
        }
        results.sort_by_key(|d| (d.section, d.rank));
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Generation cache
    // -----------------------------------------------------------------------

    /// Get a cached generation result.
    pub async fn get_cached_generation(
        &self,
        prompt_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT result_json FROM generation_cache WHERE prompt_hash = ?1 AND model_id = ?2",
                params![prompt_hash, model_id],
            )
            .await
            .map_err(|e| RareCiteError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let result: String = row
                    .get(0)
                    .map_err(|e| RareCiteError::Storage(e.to_string()))?;
                Ok(Some(result))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(RareCiteError::Storage(e.to_string())),
        }
    }

    /// Store a generation result in the cache (upserts).
    pub async fn set_cached_generation(
        &self,
        prompt_hash: &str,
        model_id: &str,
        section: SectionId,
        result_json: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO generation_cache (prompt_hash, model_id, section, result_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(prompt_hash, model_id) DO UPDATE SET
                   result_json = excluded.result_json,
                   created_at = excluded.created_at",
                params![prompt_hash, model_id, section.as_str(), result_json, now.as_str()],
            )
            .await
            .map_err(|e| RareCiteError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Remove every cached generation. Returns the number of rows deleted.
    pub async fn clear_generation_cache(&self) -> Result<u64> {
        self.conn
            .execute("DELETE FROM generation_cache", params![])
            .await
            .map_err(|e| RareCiteError::Storage(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_run_summary(row: &libsql::Row) -> Result<RunSummary> {
    Ok(RunSummary {
        id: row
            .get::<String>(0)
            .map_err(|e| RareCiteError::Storage(e.to_string()))?,
        disease: row
            .get::<String>(1)
            .map_err(|e| RareCiteError::Storage(e.to_string()))?,
        created_at: {
            let s: String = row
                .get(2)
                .map_err(|e| RareCiteError::Storage(e.to_string()))?;
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| RareCiteError::Storage(format!("invalid date: {e}")))?
        },
        can_compose: row
            .get::<i64>(3)
            .map_err(|e| RareCiteError::Storage(e.to_string()))?
            != 0,
        total_score: row
            .get::<f64>(4)
            .map_err(|e| RareCiteError::Storage(e.to_string()))?,
        num_sufficient: row
            .get::<i64>(5)
            .map_err(|e| RareCiteError::Storage(e.to_string()))? as usize,
        article_path: row.get::<String>(6).ok(),
    })
}

fn row_to_stored_document(row: &libsql::Row) -> Result<StoredDocument> {
    let section: String = row
        .get(0)
        .map_err(|e| RareCiteError::Storage(e.to_string()))?;
    Ok(StoredDocument {
        section: section.parse().map_err(RareCiteError::Storage)?,
        rank: row
            .get::<i64>(1)
            .map_err(|e| RareCiteError::Storage(e.to_string()))? as usize,
        identity_key: row
            .get::<String>(2)
            .map_err(|e| RareCiteError::Storage(e.to_string()))?,
        url: row
            .get::<String>(3)
            .map_err(|e| RareCiteError::Storage(e.to_string()))?,
        title: row.get::<String>(4).ok(),
        tier: row
            .get::<String>(5)
            .map_err(|e| RareCiteError::Storage(e.to_string()))?,
        tier_score: row
            .get::<i64>(6)
            .map_err(|e| RareCiteError::Storage(e.to_string()))? as u8,
        word_count: row
            .get::<i64>(7)
            .map_err(|e| RareCiteError::Storage(e.to_string()))? as usize,
        citation_count: row
            .get::<i64>(8)
            .map_err(|e| RareCiteError::Storage(e.to_string()))? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rarecite_shared::{QualityTier, SectionScore, identity_key};
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("rarecite_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn report(disease: &str, can_compose: bool) -> SufficiencyReport {
        SufficiencyReport {
            run_id: RunId::new(),
            disease: disease.into(),
            sections: SectionId::ALL
                .iter()
                .map(|id| SectionScore {
                    section: *id,
                    score: 1.0,
                    num_sources: 3,
                    word_count: 900,
                    num_citations: 4,
                    has_sources: true,
                    has_words: true,
                    has_citations: true,
                    is_critical: id.is_critical(),
                    sufficient: true,
                })
                .collect(),
            total_score: 13.0,
            num_sufficient: 13,
            can_compose,
            missing_info: vec![],
            gaps: vec![],
            created_at: Utc::now(),
        }
    }

    fn document(url: &str, tier_score: u8) -> Document {
        Document {
            source_id: url.into(),
            url: url.into(),
            title: format!("Title for {url}"),
            raw_text: "text".into(),
            word_count: 250,
            quality_tier: QualityTier::from_score(tier_score),
            tier_score,
            citation_count: 2,
            identity_key: identity_key(url, "text"),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("rarecite_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn run_roundtrip() {
        let storage = test_storage().await;
        let report = report("Fabry disease", true);
        storage.insert_run(&report).await.expect("insert run");

        let record = storage
            .get_run(&report.run_id.to_string())
            .await
            .expect("get run")
            .expect("run exists");
        assert_eq!(record.summary.disease, "Fabry disease");
        assert!(record.summary.can_compose);
        assert_eq!(record.summary.num_sufficient, 13);
        assert!(record.summary.article_path.is_none());
        assert_eq!(record.report.sections.len(), 13);

        storage
            .set_article_path(&report.run_id, "/tmp/fabry-disease.md")
            .await
            .expect("set path");
        let record = storage
            .get_run(&report.run_id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.summary.article_path.as_deref(), Some("/tmp/fabry-disease.md"));
    }

    #[tokio::test]
    async fn missing_run_is_none() {
        let storage = test_storage().await;
        assert!(storage.get_run("nope").await.unwrap().is_none());
        assert!(storage.set_article_path(&RunId::new(), "x.md").await.is_err());
    }

    #[tokio::test]
    async fn list_runs_newest_first() {
        let storage = test_storage().await;
        let first = report("Fabry disease", false);
        let mut second = report("Pompe disease", true);
        second.created_at = first.created_at + chrono::Duration::seconds(5);

        storage.insert_run(&first).await.unwrap();
        storage.insert_run(&second).await.unwrap();

        let runs = storage.list_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].disease, "Pompe disease");
        assert_eq!(runs[1].disease, "Fabry disease");

        assert_eq!(storage.list_runs(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_documents_keep_rank_and_skip_duplicates() {
        let storage = test_storage().await;
        let report = report("Fabry disease", true);
        storage.insert_run(&report).await.unwrap();

        let docs = vec![
            document("https://pubmed.ncbi.nlm.nih.gov/1", 5),
            document("https://www.orpha.net/fabry", 4),
        ];
        storage
            .insert_run_documents(&report.run_id, SectionId::Overview, &docs)
            .await
            .unwrap();
        storage
            .insert_run_documents(&report.run_id, SectionId::QuickFacts, &docs[1..])
            .await
            .unwrap();
        // Re-inserting the same documents is a no-op.
        storage
            .insert_run_documents(&report.run_id, SectionId::Overview, &docs)
            .await
            .unwrap();

        let stored = storage
            .list_run_documents(&report.run_id.to_string())
            .await
            .unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].section, SectionId::QuickFacts);
        assert_eq!(stored[1].section, SectionId::Overview);
        assert_eq!(stored[1].rank, 0);
        assert_eq!(stored[1].tier, "peer_reviewed_or_guideline");
        assert_eq!(stored[2].identity_key, "orpha.net/fabry");
        assert_eq!(stored[2].title.as_deref(), Some("Title for https://www.orpha.net/fabry"));
    }

    #[tokio::test]
    async fn generation_cache() {
        let storage = test_storage().await;

        let cached = storage
            .get_cached_generation("hash1", "model-a")
            .await
            .expect("get cache miss");
        assert!(cached.is_none());

        storage
            .set_cached_generation("hash1", "model-a", SectionId::Outlook, r#"{"text":"first"}"#)
            .await
            .expect("set cache");
        storage
            .set_cached_generation("hash1", "model-a", SectionId::Outlook, r#"{"text":"second"}"#)
            .await
            .expect("upsert cache");

        let cached = storage
            .get_cached_generation("hash1", "model-a")
            .await
            .expect("get cache hit");
        assert_eq!(cached.as_deref(), Some(r#"{"text":"second"}"#));

        // Different model misses.
        assert!(storage.get_cached_generation("hash1", "model-b").await.unwrap().is_none());

        assert_eq!(storage.clear_generation_cache().await.unwrap(), 1);
        assert!(storage.get_cached_generation("hash1", "model-a").await.unwrap().is_none());
    }
}
