use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct Release {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    pub jenkins_job_url: Option<String>,
    pub last_processed_build: i64,
    pub git_branch: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn fetch_release(
    name: &str,
    db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
) -> sqlx::Result<Option<Release>> {
    sqlx::query_as::<_, Release>("SELECT * FROM releases WHERE name = ?")
        .bind(name)
        .fetch_optional(db)
        .await
}

pub async fn fetch_releases(
    active_only: bool,
    db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
) -> sqlx::Result<Vec<Release>> {
    let sql = if active_only {
        "SELECT * FROM releases WHERE is_active = 1 ORDER BY name"
    } else {
        "SELECT * FROM releases ORDER BY name"
    };
    sqlx::query_as::<_, Release>(sql).fetch_all(db).await
}

/// Fetch the release by name, creating an active row when missing.
/// Releases come into existence lazily as the pipeline routes versions.
pub async fn upsert_release(
    name: &str,
    jenkins_job_url: Option<&str>,
    conn: &mut SqliteConnection,
) -> sqlx::Result<Release> {
    if let Some(release) = fetch_release(name, &mut *conn).await? {
        return Ok(release);
    }
    create_release(name, jenkins_job_url, true, None, &mut *conn).await
}

pub async fn create_release(
    name: &str,
    jenkins_job_url: Option<&str>,
    is_active: bool,
    git_branch: Option<&str>,
    conn: &mut SqliteConnection,
) -> sqlx::Result<Release> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO releases (name, is_active, jenkins_job_url, git_branch, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(is_active)
    .bind(jenkins_job_url)
    .bind(git_branch)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    fetch_release(name, conn)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn update_release(
    id: i64,
    name: Option<&str>,
    jenkins_job_url: Option<&str>,
    is_active: Option<bool>,
    git_branch: Option<&str>,
    conn: &mut SqliteConnection,
) -> sqlx::Result<u64> {
    let done = sqlx::query(
        "UPDATE releases SET
            name = COALESCE(?, name),
            jenkins_job_url = COALESCE(?, jenkins_job_url),
            is_active = COALESCE(?, is_active),
            git_branch = COALESCE(?, git_branch),
            updated_at = ?
         WHERE id = ?",
    )
    .bind(name)
    .bind(jenkins_job_url)
    .bind(is_active)
    .bind(git_branch)
    .bind(Utc::now())
    .bind(id)
    .execute(conn)
    .await?;
    Ok(done.rows_affected())
}

/// Cascades through modules, jobs and test results.
pub async fn delete_release(id: i64, conn: &mut SqliteConnection) -> sqlx::Result<u64> {
    let done = sqlx::query("DELETE FROM releases WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(done.rows_affected())
}

/// Advance the polling watermark. The MAX guard keeps it monotonic even if a
/// slow worker reports an older build late.
pub async fn advance_last_processed_build(
    release_id: i64,
    build: i64,
    conn: &mut SqliteConnection,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE releases SET
            last_processed_build = MAX(last_processed_build, ?),
            updated_at = ?
         WHERE id = ?",
    )
    .bind(build)
    .bind(Utc::now())
    .bind(release_id)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn module_count(
    release_id: i64,
    db: impl sqlx::Executor<'_, Database = sqlx::Sqlite>,
) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM modules WHERE release_id = ?")
        .bind(release_id)
        .fetch_one(db)
        .await
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn upsert_is_get_or_create() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let a = upsert_release("7.0", Some("http://ci/job/MAIN"), &mut conn)
            .await
            .unwrap();
        let b = upsert_release("7.0", None, &mut conn).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.jenkins_job_url.as_deref(), Some("http://ci/job/MAIN"));
        assert!(b.is_active);
        assert_eq!(b.last_processed_build, 0);
    }

    #[tokio::test]
    async fn watermark_never_decreases() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        let release = upsert_release("7.0", None, &mut conn).await.unwrap();
        advance_last_processed_build(release.id, 17, &mut conn)
            .await
            .unwrap();
        advance_last_processed_build(release.id, 12, &mut conn)
            .await
            .unwrap();

        let release = fetch_release("7.0", &mut *conn).await.unwrap().unwrap();
        assert_eq!(release.last_processed_build, 17);
    }

    #[tokio::test]
    async fn active_filter() {
        let pool = crate::memory_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        create_release("6.4", None, true, None, &mut conn).await.unwrap();
        create_release("6.1", None, false, None, &mut conn).await.unwrap();

        assert_eq!(fetch_releases(false, &mut *conn).await.unwrap().len(), 2);
        let active = fetch_releases(true, &mut *conn).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "6.4");
    }
}
