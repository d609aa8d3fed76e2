//! SQL migration definitions for the rarecite database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: runs, run_documents, generation_cache",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per assessment / article attempt
CREATE TABLE IF NOT EXISTS runs (
    id             TEXT PRIMARY KEY,
    disease        TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    can_compose    INTEGER NOT NULL,
    total_score    REAL NOT NULL,
    num_sufficient INTEGER NOT NULL,
    article_path   TEXT,
    report_json    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_disease ON runs(disease);
CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at);

-- Ranked evidence per section (text is not stored)
CREATE TABLE IF NOT EXISTS run_documents (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id         TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    section        TEXT NOT NULL,
    rank           INTEGER NOT NULL,
    identity_key   TEXT NOT NULL,
    url            TEXT NOT NULL,
    title          TEXT,
    tier           TEXT NOT NULL,
    tier_score     INTEGER NOT NULL,
    word_count     INTEGER NOT NULL,
    citation_count INTEGER NOT NULL,
    UNIQUE(run_id, section, identity_key)
);

CREATE INDEX IF NOT EXISTS idx_run_documents_run ON run_documents(run_id);

-- Generated section prose keyed by prompt + model
CREATE TABLE IF NOT EXISTS generation_cache (
    prompt_hash TEXT NOT NULL,
    model_id    TEXT NOT NULL,
    section     TEXT NOT NULL,
    result_json TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (prompt_hash, model_id)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
