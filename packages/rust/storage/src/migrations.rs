//! SQL migrations for the Skillsmith database.
//!
//! Applied in ascending order on open; each runs as one batch.

pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: merge_runs",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per completed reconciliation run
CREATE TABLE IF NOT EXISTS merge_runs (
    id               TEXT PRIMARY KEY,
    name             TEXT NOT NULL,
    strategy         TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    entry_count      INTEGER NOT NULL,
    conflict_count   INTEGER NOT NULL,
    degraded_sources INTEGER NOT NULL DEFAULT 0,
    output_dir       TEXT NOT NULL,
    summary_json     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_merge_runs_name ON merge_runs(name, created_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Resolution cache for the assisted merge strategy",
            sql: r#"
CREATE TABLE IF NOT EXISTS resolution_cache (
    request_hash  TEXT NOT NULL,
    model         TEXT NOT NULL,
    identifier    TEXT NOT NULL,
    response_json TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    PRIMARY KEY (request_hash, model)
);

CREATE INDEX IF NOT EXISTS idx_resolution_cache_identifier ON resolution_cache(identifier);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
