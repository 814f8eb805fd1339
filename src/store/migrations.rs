//! # Database Migrations
//!
//! Schema migrations for the Postgres store, compiled into the binary and applied in
//! version order. A Postgres advisory lock serializes concurrent runners (several
//! engine processes starting at once, or parallel test binaries), and applied
//! versions are tracked in `taskforge_schema_migrations`.

use sqlx::PgPool;
use std::collections::HashSet;
use tracing::info;

/// Advisory lock key for schema changes
const LOCK_KEY: i64 = 7_318_004_551_902_114;

/// A single embedded migration
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS)
    pub version: &'static str,
    pub name: &'static str,
    pub sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: "20250101000000",
    name: "create taskforge tables",
    sql: include_str!("../../migrations/20250101000000_create_taskforge_tables.sql"),
}];

pub struct DatabaseMigrations;

impl DatabaseMigrations {
    pub fn all() -> &'static [Migration] {
        MIGRATIONS
    }

    /// Apply every migration that has not been applied yet
    pub async fn run_all(pool: &PgPool) -> Result<(), sqlx::Error> {
        // Session-level advisory locks belong to a connection, so hold one for the duration
        let mut conn = pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = Self::run_outstanding(&mut conn).await;

        // Always release the lock
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        result
    }

    async fn run_outstanding(conn: &mut sqlx::PgConnection) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS taskforge_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        let applied: HashSet<String> =
            sqlx::query_scalar::<_, String>("SELECT version FROM taskforge_schema_migrations")
                .fetch_all(&mut *conn)
                .await?
                .into_iter()
                .collect();

        for migration in MIGRATIONS {
            if applied.contains(migration.version) {
                continue;
            }

            info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            sqlx::raw_sql(migration.sql).execute(&mut *conn).await?;
            sqlx::query("INSERT INTO taskforge_schema_migrations (version) VALUES ($1)")
                .bind(migration.version)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_versioned() {
        let versions: Vec<&str> = DatabaseMigrations::all().iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
        assert!(versions
            .iter()
            .all(|v| v.len() == 14 && v.chars().all(|c| c.is_ascii_digit())));
    }

    #[test]
    fn test_schema_contains_both_tables() {
        let sql = DatabaseMigrations::all()[0].sql;
        assert!(sql.contains("taskforge_tasks"));
        assert!(sql.contains("taskforge_task_logs"));
    }
}
