// Feature flags and tunables, cached in memory over the settings table
use std::collections::HashMap;
use std::sync::Arc;

use rusqlite::params;
use tokio::sync::RwLock;

use crate::error::AppResult;
use crate::state::DbPool;

#[derive(Clone)]
pub struct SettingsStore {
    db: DbPool,
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl SettingsStore {
    pub async fn new(db: DbPool) -> AppResult<Self> {
        let store = Self {
            db,
            cache: Arc::new(RwLock::new(HashMap::new())),
        };
        store.refresh().await?;
        Ok(store)
    }

    /// Reload the cache from the settings table.
    pub async fn refresh(&self) -> AppResult<()> {
        let loaded = {
            let conn = self.db.get()?;
            let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<HashMap<String, String>, _>>()?
        };
        *self.cache.write().await = loaded;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.cache.read().await.get(key).cloned()
    }

    pub async fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).await {
            Some(value) => value == "true" || value == "1",
            None => default,
        }
    }

    pub async fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.get(key).await {
            Some(value) => value.parse().unwrap_or(default),
            None => default,
        }
    }

    /// Write through to the table, then refresh the cache.
    pub async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        {
            let conn = self.db.get()?;
            conn.execute(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        self.refresh().await
    }

    pub async fn forums_enabled(&self) -> bool {
        self.get_bool("forums_enabled", true).await
    }

    pub async fn registration_enabled(&self) -> bool {
        self.get_bool("registration_enabled", true).await
    }

    pub async fn in_app_notifications_enabled(&self) -> bool {
        self.get_bool("in_app_notifications_enabled", true).await
    }

    /// The flag map served by `GET /settings/features`.
    pub async fn features(&self) -> serde_json::Value {
        serde_json::json!({
            "forums_enabled": self.forums_enabled().await,
            "registration_enabled": self.registration_enabled().await,
            "in_app_notifications_enabled": self.in_app_notifications_enabled().await,
        })
    }
}
