use crate::models::UserContext;
use anyhow::Context;
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool};
use std::path::Path;

pub const MESSAGES_KEY: &str = "SavedMessages";
pub const PROFILE_KEY: &str = "UserProfile";

// Key-value table holding opaque blobs under fixed keys
const MIGRATIONS_SQL: &str = "
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
";

#[derive(Debug, Clone)]
pub struct StorageManager {
    pool: SqlitePool,
}

impl StorageManager {
    /// Opens (creating if needed) the SQLite database at `db_path` and runs migrations.
    pub async fn new(db_path: &Path) -> Result<Self, anyhow::Error> {
        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.to_string_lossy());
        log::info!("Connecting to database: {}", db_url);

        if !Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            log::info!("Database file not found, creating...");
            Sqlite::create_database(&db_url)
                .await
                .context("Failed to create database")?;
        }

        let pool = SqlitePoolOptions::new()
            .connect(&db_url)
            .await
            .context("Failed to connect to SQLite database")?;

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), anyhow::Error> {
        log::info!("Running database migrations...");
        sqlx::query(MIGRATIONS_SQL)
            .execute(pool)
            .await
            .context("Failed to run database migrations")?;
        log::info!("Database migrations completed.");
        Ok(())
    }

    /// Reads the blob stored under `key`, if any.
    pub async fn get_value(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        log::debug!("Reading setting '{}'", key);
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context(format!("Failed to read setting '{}'", key))?;

        row.map(|row| row.try_get::<String, _>("value"))
            .transpose()
            .context(format!("Failed to decode setting '{}'", key))
    }

    /// Replaces the blob stored under `key`.
    pub async fn set_value(&self, key: &str, value: &str) -> Result<(), anyhow::Error> {
        log::debug!("Writing setting '{}' ({} bytes)", key, value.len());
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .context(format!("Failed to write setting '{}'", key))?;
        Ok(())
    }

    /// Loads the saved profile. A missing or unreadable profile yields `None`.
    pub async fn load_profile(&self) -> Result<Option<UserContext>, anyhow::Error> {
        let Some(raw) = self.get_value(PROFILE_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<UserContext>(&raw) {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                log::error!("Failed to load profile: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn save_profile(&self, profile: &UserContext) -> Result<(), anyhow::Error> {
        let raw = serde_json::to_string(profile).context("Failed to encode profile")?;
        self.set_value(PROFILE_KEY, &raw).await?;
        log::info!("Saved profile for '{}'", profile.name);
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
