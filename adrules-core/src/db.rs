use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

use crate::config::CoreConfig;
use crate::errors::{AdRulesError, Result};

/// Wrapper around the Postgres connection pool shared by the stores.
#[derive(Clone)]
pub struct DatabasePool {
    pool: Pool<Postgres>,
}

impl DatabasePool {
    /// Establishes a new connection pool based on the core configuration.
    pub async fn connect(config: &CoreConfig) -> Result<Self> {
        let url = config
            .database_url()
            .ok_or_else(|| AdRulesError::ConfigError("DATABASE_URL is not configured".into()))?;
        Self::connect_with_url(url).await
    }

    /// Establishes a connection pool directly from a database URL.
    pub async fn connect_with_url(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Builds a pool that connects on first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub fn inner(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

/// Trait implemented by stores that own database migrations.
#[async_trait]
pub trait DatabaseMigrator {
    async fn run_migrations(&self, pool: &DatabasePool) -> Result<()>;
}

/// Run migrations by delegating to the provided migrators.
pub async fn run_migrations(
    pool: &DatabasePool,
    migrators: &[Box<dyn DatabaseMigrator + Send + Sync>],
) -> Result<()> {
    for migrator in migrators {
        migrator.run_migrations(pool).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingMigrator(Arc<AtomicUsize>);

    #[async_trait]
    impl DatabaseMigrator for CountingMigrator {
        async fn run_migrations(&self, _pool: &DatabasePool) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_all_migrators() {
        let pool = DatabasePool::connect_lazy("postgres://localhost/postgres").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let migrators: Vec<Box<dyn DatabaseMigrator + Send + Sync>> = vec![
            Box::new(CountingMigrator(counter.clone())),
            Box::new(CountingMigrator(counter.clone())),
        ];
        run_migrations(&pool, &migrators)
            .await
            .expect("should run migrations");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn connect_requires_database_url() {
        let config = CoreConfig {
            database_url: None,
            environment: Default::default(),
            node_name: "test".into(),
            http_bind: None,
        };
        let err = DatabasePool::connect(&config).await.err().expect("must fail");
        assert!(matches!(err, AdRulesError::ConfigError(_)));
    }
}
