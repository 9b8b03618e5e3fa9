// SQLite CatalogStore Implementation

use async_trait::async_trait;
use cmdvault_core::domain::Command;
use cmdvault_core::error::{AppError, Result};
use cmdvault_core::port::{CatalogStore, CommandFilter, CommandQuery};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

const COLUMNS: &str = "id, name, command_text, description, tags, created_at, updated_at";

// SQLite error codes: https://www.sqlite.org/rescode.html
fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("2067") | Some("1555"))
        }
        _ => false,
    }
}

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => match code.as_ref() {
                "5" => AppError::Database(format!(
                    "Database locked (SQLITE_BUSY): {}",
                    db_err.message()
                )),
                "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                code_str => AppError::Database(format!(
                    "Database error [{}]: {}",
                    code_str,
                    db_err.message()
                )),
            },
            None => AppError::Database(format!("Database error: {}", db_err.message())),
        },
        sqlx::Error::ColumnNotFound(col) => AppError::Database(format!("Column not found: {}", col)),
        _ => AppError::Database(err.to_string()),
    }
}

/// Append `tags` overlap as `EXISTS (... json_each ...)`
fn push_tag_overlap(builder: &mut QueryBuilder<'_, Sqlite>, tags: &[String]) {
    builder.push("EXISTS (SELECT 1 FROM json_each(commands.tags) WHERE json_each.value IN (");
    let mut values = builder.separated(", ");
    for tag in tags {
        values.push_bind(tag.clone());
    }
    builder.push("))");
}

pub struct SqliteCatalogStore {
    pool: SqlitePool,
}

impl SqliteCatalogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn insert(&self, command: &Command) -> Result<()> {
        let tags = serde_json::to_string(&command.tags)?;

        sqlx::query(
            r#"
            INSERT INTO commands (id, name, command_text, description, tags, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&command.id)
        .bind(&command.name)
        .bind(&command.command_text)
        .bind(&command.description)
        .bind(tags)
        .bind(command.created_at)
        .bind(command.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::DuplicateName(command.name.clone())
            } else {
                map_sqlx_error(e)
            }
        })?;

        Ok(())
    }

    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<Command>> {
        let rows: Vec<CommandRow> = sqlx::query_as(&format!(
            "SELECT {} FROM commands ORDER BY rowid LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(CommandRow::into_command).collect()
    }

    async fn find_by_name(&self, name: &str) -> Result<Command> {
        let row: Option<CommandRow> =
            sqlx::query_as(&format!("SELECT {} FROM commands WHERE name = ?", COLUMNS))
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        match row {
            Some(row) => row.into_command(),
            None => Err(AppError::NotFound(format!("Command {} not found", name))),
        }
    }

    async fn update(&self, command: &Command) -> Result<()> {
        let tags = serde_json::to_string(&command.tags)?;

        let result = sqlx::query(
            r#"
            UPDATE commands
            SET command_text = ?, description = ?, tags = ?, updated_at = ?
            WHERE name = ?
            "#,
        )
        .bind(&command.command_text)
        .bind(&command.description)
        .bind(tags)
        .bind(command.updated_at)
        .bind(&command.name)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Command {} not found",
                command.name
            )));
        }
        Ok(())
    }

    async fn search(&self, query: &CommandQuery, limit: u32, offset: u32) -> Result<Vec<Command>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {} FROM commands WHERE 1 = 1", COLUMNS));

        if let Some(text) = &query.text {
            // SQLite's lower() folds ASCII only
            let needle = text.to_ascii_lowercase();
            builder.push(" AND (instr(lower(name), ");
            builder.push_bind(needle.clone());
            builder.push(") > 0 OR instr(lower(description), ");
            builder.push_bind(needle.clone());
            builder.push(") > 0 OR instr(lower(command_text), ");
            builder.push_bind(needle);
            builder.push(") > 0)");
        }
        if !query.tags.is_empty() {
            builder.push(" AND ");
            push_tag_overlap(&mut builder, &query.tags);
        }
        builder.push(" ORDER BY rowid LIMIT ");
        builder.push_bind(i64::from(limit));
        builder.push(" OFFSET ");
        builder.push_bind(i64::from(offset));

        debug!(sql = builder.sql(), "Searching commands");
        let rows: Vec<CommandRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(CommandRow::into_command).collect()
    }

    async fn delete(&self, filter: &CommandFilter) -> Result<u64> {
        if filter.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM commands WHERE 1 = 1");
        if let Some(name) = &filter.name {
            builder.push(" AND name = ");
            builder.push_bind(name.clone());
        }
        if !filter.tags.is_empty() {
            builder.push(" AND ");
            push_tag_overlap(&mut builder, &filter.tags);
        }

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM commands")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM commands")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct CommandRow {
    id: String,
    name: String,
    command_text: String,
    description: String,
    tags: String, // JSON array
    created_at: i64,
    updated_at: i64,
}

impl CommandRow {
    fn into_command(self) -> Result<Command> {
        let tags: Vec<String> = serde_json::from_str(&self.tags).map_err(|e| {
            AppError::Database(format!("Corrupt tags for command {}: {}", self.name, e))
        })?;

        Ok(Command {
            id: self.id,
            name: self.name,
            command_text: self.command_text,
            description: self.description,
            tags,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use cmdvault_core::domain::split_tags;
    use std::sync::Arc;

    async fn setup_test_db() -> SqliteCatalogStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteCatalogStore::new(pool)
    }

    fn command(name: &str, text: &str, tags: &str) -> Command {
        Command::new(format!("id-{}", name), 100, name, text, "", split_tags(tags)).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = setup_test_db().await;
        let cmd = command("build", "cargo build --release", "rust, ci");

        store.insert(&cmd).await.unwrap();

        let found = store.find_by_name("build").await.unwrap();
        assert_eq!(found, cmd);
        assert_eq!(found.tags, vec!["rust", "ci"]);
    }

    #[tokio::test]
    async fn test_find_missing() {
        let store = setup_test_db().await;
        let err = store.find_by_name("nope").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let store = setup_test_db().await;
        store.insert(&command("build", "make", "")).await.unwrap();

        let mut dup = command("build", "cargo build", "");
        dup.id = "other-id".to_string();
        let err = store.insert(&dup).await.unwrap_err();
        assert!(matches!(err, AppError::DuplicateName(name) if name == "build"));
        assert_eq!(store.find_by_name("build").await.unwrap().command_text, "make");
    }

    #[tokio::test]
    async fn test_list_insertion_order_and_paging() {
        let store = setup_test_db().await;
        for name in ["zeta", "alpha", "mid"] {
            store.insert(&command(name, "true", "")).await.unwrap();
        }

        let names = |cmds: Vec<Command>| cmds.into_iter().map(|c| c.name).collect::<Vec<_>>();
        assert_eq!(names(store.list(10, 0).await.unwrap()), vec!["zeta", "alpha", "mid"]);
        assert_eq!(names(store.list(1, 1).await.unwrap()), vec!["alpha"]);
        assert!(store.list(0, 0).await.unwrap().is_empty());
        assert!(store.list(10, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update() {
        let store = setup_test_db().await;
        let mut cmd = command("build", "make", "c");
        store.insert(&cmd).await.unwrap();

        cmd.command_text = "make -j8".to_string();
        cmd.tags = vec!["c".to_string(), "fast".to_string()];
        cmd.updated_at = 200;
        store.update(&cmd).await.unwrap();
        assert_eq!(store.find_by_name("build").await.unwrap(), cmd);

        let ghost = command("ghost", "true", "");
        assert!(matches!(
            store.update(&ghost).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_search_text_and_tags() {
        let store = setup_test_db().await;
        store.insert(&command("build", "cargo build", "rust")).await.unwrap();
        store.insert(&command("test", "cargo test", "rust,ci")).await.unwrap();
        store.insert(&command("lint", "npm run lint", "js,ci")).await.unwrap();

        let by_text = CommandQuery {
            text: Some("Cargo".to_string()),
            tags: vec![],
        };
        assert_eq!(store.search(&by_text, 10, 0).await.unwrap().len(), 2);

        let by_tag = CommandQuery {
            text: None,
            tags: vec!["ci".to_string(), "nothing".to_string()],
        };
        let names: Vec<_> = store
            .search(&by_tag, 10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["test", "lint"]);

        let both = CommandQuery {
            text: Some("cargo".to_string()),
            tags: vec!["ci".to_string()],
        };
        let hits = store.search(&both, 10, 0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "test");

        // Wildcard characters are matched literally
        let percent = CommandQuery {
            text: Some("%".to_string()),
            tags: vec![],
        };
        assert!(store.search(&percent, 10, 0).await.unwrap().is_empty());

        assert_eq!(store.search(&CommandQuery::default(), 2, 1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_search_folding_matches_in_memory_rules() {
        let store = setup_test_db().await;
        let cmd = command("café", "echo Crème", "");
        store.insert(&cmd).await.unwrap();

        for text in ["CAF", "café", "CAFÉ", "Café", "crème", "CRÈME", "CRè", "ème"] {
            let query = CommandQuery {
                text: Some(text.to_string()),
                tags: vec![],
            };
            let hits = store.search(&query, 10, 0).await.unwrap();
            assert_eq!(hits.len() == 1, query.matches(&cmd), "query {:?}", text);
        }
    }

    #[tokio::test]
    async fn test_delete_by_criteria() {
        let store = setup_test_db().await;
        store.insert(&command("build", "cargo build", "rust")).await.unwrap();
        store.insert(&command("test", "cargo test", "rust,ci")).await.unwrap();
        store.insert(&command("lint", "npm run lint", "js,ci")).await.unwrap();

        assert_eq!(store.delete(&CommandFilter::default()).await.unwrap(), 0);

        let name_and_tag = CommandFilter {
            name: Some("build".to_string()),
            tags: vec!["ci".to_string()],
        };
        assert_eq!(store.delete(&name_and_tag).await.unwrap(), 0);

        let by_tag = CommandFilter {
            name: None,
            tags: vec!["ci".to_string()],
        };
        assert_eq!(store.delete(&by_tag).await.unwrap(), 2);
        assert_eq!(store.count().await.unwrap(), 1);

        assert_eq!(store.delete_all().await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persists_across_pools() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("catalog.db").display());

        {
            let pool = create_pool(&url).await.unwrap();
            run_migrations(&pool).await.unwrap();
            let store = SqliteCatalogStore::new(pool.clone());
            store.insert(&command("keep", "echo kept", "x")).await.unwrap();
            pool.close().await;
        }

        let pool = create_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = SqliteCatalogStore::new(pool);
        assert_eq!(store.find_by_name("keep").await.unwrap().command_text, "echo kept");
    }

    #[tokio::test]
    async fn test_concurrent_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("catalog.db").display());
        let pool = create_pool(&url).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let store = Arc::new(SqliteCatalogStore::new(pool));

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .insert(&command(&format!("cmd-{}", i), "true", ""))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.count().await.unwrap(), 20);
        assert_eq!(store.list(100, 0).await.unwrap().len(), 20);
    }
}
