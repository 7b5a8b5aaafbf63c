//! SQL migration for the build store tables.

use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ci_build_results (
    id              BIGSERIAL PRIMARY KEY,
    course          VARCHAR(255) NOT NULL,
    username        VARCHAR(255) NOT NULL,
    labnum          INTEGER NOT NULL,
    payload         JSONB,
    create_date     TIMESTAMPTZ DEFAULT NOW(),
    write_date      TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_ci_build_results_owner ON ci_build_results (course, username, labnum);

CREATE TABLE IF NOT EXISTS ci_owners (
    owner_key       VARCHAR(512) PRIMARY KEY,
    kind            VARCHAR(16) NOT NULL,
    payload         JSONB NOT NULL,
    write_date      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

/// Create the store tables if they do not exist.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("CI migration failed: {e}"))?;
    Ok(())
}
