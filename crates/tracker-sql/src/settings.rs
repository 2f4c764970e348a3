use chrono::{DateTime, Utc};
use models::keys;
use sqlx::{Sqlite, SqliteConnection};

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Setting {
    pub key: String,
    pub value: Option<String>,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub async fn fetch_setting(
    key: &str,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Option<Setting>> {
    sqlx::query_as::<_, Setting>(
        "SELECT key, value, description, updated_at FROM app_settings WHERE key = ?",
    )
    .bind(key)
    .fetch_optional(db)
    .await
}

pub async fn fetch_settings(
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<Vec<Setting>> {
    sqlx::query_as::<_, Setting>(
        "SELECT key, value, description, updated_at FROM app_settings ORDER BY key",
    )
    .fetch_all(db)
    .await
}

/// Set a setting to a JSON-encoded value, creating it when missing.
pub async fn set_setting(
    key: &str,
    value: &str,
    description: Option<&str>,
    conn: &mut SqliteConnection,
) -> sqlx::Result<()> {
    sqlx::query(
        "INSERT INTO app_settings (key, value, description, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            description = COALESCE(excluded.description, app_settings.description),
            updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value)
    .bind(description)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

fn parse_value<T: serde::de::DeserializeOwned>(setting: Option<Setting>) -> Option<T> {
    let raw = setting?.value?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(%raw, %err, "malformed setting value, using default");
            None
        }
    }
}

pub async fn get_bool(
    key: &str,
    default: bool,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<bool> {
    Ok(parse_value(fetch_setting(key, db).await?).unwrap_or(default))
}

pub async fn get_f64(
    key: &str,
    default: f64,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<f64> {
    Ok(parse_value(fetch_setting(key, db).await?).unwrap_or(default))
}

pub async fn get_i64(
    key: &str,
    default: i64,
    db: impl sqlx::Executor<'_, Database = Sqlite>,
) -> sqlx::Result<i64> {
    Ok(parse_value(fetch_setting(key, db).await?).unwrap_or(default))
}

/// Polling interval in hours. Reads the current key, falling back to the
/// legacy minutes key divided by 60.
pub async fn polling_interval_hours(conn: &mut SqliteConnection) -> sqlx::Result<f64> {
    if let Some(hours) = parse_value::<f64>(
        fetch_setting(keys::POLLING_INTERVAL_HOURS, &mut *conn).await?,
    ) {
        return Ok(hours);
    }
    if let Some(minutes) = parse_value::<f64>(
        fetch_setting(keys::POLLING_INTERVAL_MINUTES, &mut *conn).await?,
    ) {
        tracing::warn!("POLLING_INTERVAL_MINUTES is deprecated; migrate to POLLING_INTERVAL_HOURS");
        return Ok(minutes / 60.0);
    }
    Ok(models::defaults::POLLING_INTERVAL_HOURS)
}

/// Seed defaults for settings that don't exist yet. Existing values win.
pub async fn seed_defaults(conn: &mut SqliteConnection) -> sqlx::Result<()> {
    use models::defaults;

    let entries: Vec<(&str, String, &str)> = vec![
        (
            keys::AUTO_UPDATE_ENABLED,
            defaults::AUTO_UPDATE_ENABLED.to_string(),
            "Enable automatic Jenkins polling",
        ),
        (
            keys::POLLING_INTERVAL_HOURS,
            defaults::POLLING_INTERVAL_HOURS.to_string(),
            "Hours between Jenkins polls",
        ),
        (
            keys::CLEANUP_ARTIFACTS_AFTER_IMPORT,
            defaults::CLEANUP_ARTIFACTS_AFTER_IMPORT.to_string(),
            "Delete downloaded artifacts once imported",
        ),
        (
            keys::SSE_DRAIN_TIMEOUT_SECONDS,
            defaults::SSE_DRAIN_TIMEOUT_SECONDS.to_string(),
            "Seconds without new logs before an SSE stream closes after completion",
        ),
        (
            keys::SSE_DRAIN_POLL_INTERVAL,
            defaults::SSE_DRAIN_POLL_INTERVAL.to_string(),
            "Seconds between queue polls during the SSE drain phase",
        ),
        (
            keys::FLAKY_DETECTION_JOB_WINDOW,
            defaults::FLAKY_DETECTION_JOB_WINDOW.to_string(),
            "Parent-job window for flaky detection",
        ),
        (
            keys::METADATA_SYNC_ENABLED,
            defaults::METADATA_SYNC_ENABLED.to_string(),
            "Enable scheduled metadata syncs",
        ),
        (
            keys::METADATA_SYNC_INTERVAL_HOURS,
            defaults::METADATA_SYNC_INTERVAL_HOURS.to_string(),
            "Hours between metadata syncs",
        ),
    ];

    for (key, value, description) in entries {
        sqlx::query(
            "INSERT INTO app_settings (key, value, description, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn typed_accessors_with_defaults() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        assert!(get_bool("MISSING", true, &mut *conn).await.unwrap());

        set_setting("FLAG", "false", None, &mut conn).await.unwrap();
        assert!(!get_bool("FLAG", true, &mut *conn).await.unwrap());

        set_setting("FLAG", "\"garbage\"", None, &mut conn).await.unwrap();
        assert!(get_bool("FLAG", true, &mut *conn).await.unwrap());
    }

    #[tokio::test]
    async fn legacy_minutes_migrate_to_hours() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        set_setting(keys::POLLING_INTERVAL_MINUTES, "90", None, &mut conn)
            .await
            .unwrap();
        assert_eq!(polling_interval_hours(&mut conn).await.unwrap(), 1.5);

        // The hours key, once present, wins.
        set_setting(keys::POLLING_INTERVAL_HOURS, "6.0", None, &mut conn)
            .await
            .unwrap();
        assert_eq!(polling_interval_hours(&mut conn).await.unwrap(), 6.0);
    }

    #[tokio::test]
    async fn seeding_never_overwrites() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        set_setting(keys::POLLING_INTERVAL_HOURS, "2.0", None, &mut conn)
            .await
            .unwrap();
        seed_defaults(&mut conn).await.unwrap();

        assert_eq!(polling_interval_hours(&mut conn).await.unwrap(), 2.0);
        // And the seeded keys exist.
        assert!(fetch_setting(keys::FLAKY_DETECTION_JOB_WINDOW, &mut *conn)
            .await
            .unwrap()
            .is_some());
    }
}
