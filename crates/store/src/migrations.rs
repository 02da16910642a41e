/// Inline SQL migrations for the jobtail database schema.
///
/// We use simple inline migrations rather than sqlx migration files
/// because the schema is small and self-contained.
pub const MIGRATIONS: &[&str] = &[
    // Migration 1: jobs summary table (projection of each job's event log)
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    id          TEXT PRIMARY KEY,
    status      TEXT NOT NULL DEFAULT 'PENDING',
    percent     INTEGER NOT NULL DEFAULT 0 CHECK (percent BETWEEN 0 AND 100),
    message     TEXT,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL,
    terminal_at INTEGER
);
"#,
    // Migration 2: append-only per-job event log
    r#"
CREATE TABLE IF NOT EXISTS job_events (
    job_id     TEXT NOT NULL REFERENCES jobs(id),
    seq        INTEGER NOT NULL CHECK (seq >= 1),
    kind       TEXT NOT NULL,
    payload    TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (job_id, seq)
);
"#,
    // Migration 3: supervisor sweep indexes
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_terminal_at ON jobs(terminal_at) WHERE terminal_at IS NOT NULL;"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_status_updated ON jobs(status, updated_at);"#,
];
