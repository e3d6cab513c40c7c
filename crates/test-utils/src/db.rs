//! Scratch-Postgres harness for integration tests that need a real Catalog.
//!
//! Tests gated on this module only run when `TEST_DATABASE_URL` points at a
//! reachable Postgres instance; otherwise they print a skip message and
//! return early, following the same pattern the other examples use for
//! optional external fixtures (see [`crate::find_test_file`]).

use std::process;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Returns the base connection URL for scratch-schema integration tests, or
/// `None` if `TEST_DATABASE_URL` is not set.
///
/// # Usage
///
/// ```ignore
/// let Some(base_url) = test_utils::db::test_database_url() else {
///     eprintln!("SKIPPED: TEST_DATABASE_URL not set");
///     return;
/// };
/// ```
pub fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok()
}

/// An isolated Postgres schema for one test run.
///
/// `ScratchSchema::create` opens a throwaway connection to `base_url`,
/// creates a schema scoped to the test's name hint and the current process
/// id (so concurrent `cargo test` runs never collide), and hands back a URL
/// with `search_path` pinned to it via the `options` query parameter. Since
/// the schema lives in the query string rather than a pool callback,
/// `Catalog::connect(&schema.url())` works unmodified against it.
pub struct ScratchSchema {
    base_url: String,
    schema: String,
    pool: PgPool,
}

impl ScratchSchema {
    /// Creates a new scratch schema named `test_<name_hint>_<pid>` in the
    /// database at `base_url`.
    pub async fn create(base_url: &str, name_hint: &str) -> sqlx::Result<Self> {
        let schema = format!(
            "test_{}_{}",
            name_hint.replace(|c: char| !c.is_ascii_alphanumeric(), "_"),
            process::id()
        );
        let pool = PgPoolOptions::new().max_connections(2).connect(base_url).await?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
            .execute(&pool)
            .await?;
        Ok(Self { base_url: base_url.to_string(), schema, pool })
    }

    /// Returns a connection URL with `search_path` pinned to this schema, for
    /// use with `Catalog::connect`.
    pub fn url(&self) -> String {
        let separator = if self.base_url.contains('?') { "&" } else { "?" };
        format!(
            "{}{}options=-csearch_path%3D{}",
            self.base_url, separator, self.schema
        )
    }

    /// Drops the scratch schema and everything in it.
    pub async fn drop(self) -> sqlx::Result<()> {
        sqlx::query(&format!("DROP SCHEMA IF EXISTS \"{}\" CASCADE", self.schema))
            .execute(&self.pool)
            .await?;
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_url_reads_env_var() {
        std::env::remove_var("TEST_DATABASE_URL");
        assert!(test_database_url().is_none());
        std::env::set_var("TEST_DATABASE_URL", "postgres://localhost/scratch");
        assert_eq!(test_database_url().as_deref(), Some("postgres://localhost/scratch"));
        std::env::remove_var("TEST_DATABASE_URL");
    }
}
