//! Test utilities for database operations.
//!
//! Provides helpers for setting up and tearing down test databases.

use chrono::Utc;
use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr, Statement};
use sea_orm_migration::MigratorTrait;
use tracing::info;

use crate::entities::user;
use crate::migrations::Migrator;

/// Tables truncated between tests, children first.
const TABLES: [&str; 5] = [
    "change_event",
    "notification",
    "friendship",
    "blocking",
    "user",
];

/// Test database configuration.
#[derive(Debug, Clone)]
pub struct TestDbConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database username.
    pub username: String,
    /// Database password.
    pub password: String,
    /// Database name.
    pub database: String,
}

impl Default for TestDbConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("TEST_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("TEST_DB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5433),
            username: std::env::var("TEST_DB_USER")
                .unwrap_or_else(|_| "shelfmate_test".to_string()),
            password: std::env::var("TEST_DB_PASSWORD")
                .unwrap_or_else(|_| "shelfmate_test".to_string()),
            database: std::env::var("TEST_DB_NAME")
                .unwrap_or_else(|_| "shelfmate_test".to_string()),
        }
    }
}

impl TestDbConfig {
    /// Get the database URL.
    #[must_use]
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }

    /// Get URL for connecting to postgres database (for creating test DB).
    #[must_use]
    pub fn postgres_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/postgres",
            self.username, self.password, self.host, self.port
        )
    }
}

/// A migrated test database.
pub struct TestDatabase {
    /// Database connection.
    pub conn: DatabaseConnection,
    /// Database configuration.
    pub config: TestDbConfig,
}

impl TestDatabase {
    /// Connect to the configured test database and run migrations.
    pub async fn new() -> Result<Self, DbErr> {
        Self::with_config(TestDbConfig::default()).await
    }

    /// Connect with a custom configuration and run migrations.
    pub async fn with_config(config: TestDbConfig) -> Result<Self, DbErr> {
        let conn = Database::connect(&config.database_url()).await?;
        Migrator::up(&conn, None).await?;

        info!(database = %config.database, "Connected to test database");

        Ok(Self { conn, config })
    }

    /// Create a uniquely named, migrated database (for parallel tests).
    pub async fn create_unique() -> Result<Self, DbErr> {
        let mut config = TestDbConfig::default();
        let unique_suffix = uuid::Uuid::new_v4().simple().to_string();
        config.database = format!("shelfmate_test_{}", &unique_suffix[..8]);

        let postgres_conn = Database::connect(&config.postgres_url()).await?;
        let create_db = format!("CREATE DATABASE \"{}\"", config.database);
        postgres_conn
            .execute(Statement::from_string(DatabaseBackend::Postgres, create_db))
            .await?;
        postgres_conn.close().await?;

        info!(database = %config.database, "Created unique test database");

        Self::with_config(config).await
    }

    /// Get the database connection.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Remove every row written by a test.
    pub async fn cleanup(&self) -> Result<(), DbErr> {
        let truncate = format!(
            "TRUNCATE TABLE {} CASCADE",
            TABLES
                .iter()
                .map(|t| format!("\"{t}\""))
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.conn
            .execute(Statement::from_string(DatabaseBackend::Postgres, truncate))
            .await?;

        info!("Cleaned up test database");
        Ok(())
    }

    /// Drop a database created by [`Self::create_unique`].
    pub async fn drop_database(self) -> Result<(), DbErr> {
        self.conn.close().await?;

        let postgres_conn = Database::connect(&self.config.postgres_url()).await?;

        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = '{}'",
            self.config.database
        );
        postgres_conn
            .execute(Statement::from_string(DatabaseBackend::Postgres, terminate))
            .await
            .ok();

        let drop_db = format!("DROP DATABASE IF EXISTS \"{}\"", self.config.database);
        postgres_conn
            .execute(Statement::from_string(DatabaseBackend::Postgres, drop_db))
            .await?;
        postgres_conn.close().await?;

        info!(database = %self.config.database, "Dropped test database");
        Ok(())
    }
}

/// A user row with zeroed counters, ready to insert.
#[must_use]
pub fn user_fixture(id: &str, username: &str) -> user::Model {
    user::Model {
        id: id.to_string(),
        username: username.to_string(),
        username_lower: username.to_lowercase(),
        token: Some(format!("token_{id}")),
        name: Some(username.to_string()),
        avatar_url: None,
        bio: None,
        friends_count: 0,
        pending_requests_count: 0,
        sent_requests_count: 0,
        created_at: Utc::now().into(),
        updated_at: None,
    }
}
