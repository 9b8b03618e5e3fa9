// Command Registry - validation and normalization in front of the catalog

use crate::domain::{normalize_tags, split_tags, Command, CommandPatch};
use crate::error::{AppError, Result};
use crate::port::{CatalogStore, CommandFilter, CommandQuery, IdProvider, TimeProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Add-command request (tags as typed by the user, comma-separated)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddCommandRequest {
    pub name: String,
    pub command_text: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: String,
}

/// Partial update request; `None` keeps the stored value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCommandRequest {
    pub name: String,
    #[serde(default)]
    pub command_text: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
}

/// Clamp a caller-supplied paging value into the store's range
fn clamp_page(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

/// Command Registry
pub struct CommandRegistry {
    store: Arc<dyn CatalogStore>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl CommandRegistry {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            id_provider,
            time_provider,
        }
    }

    /// Validate, normalize and store a new command
    ///
    /// # Errors
    /// - `AppError::Validation` if name or command text is blank
    /// - `AppError::DuplicateName` if the name is taken
    pub async fn add_command(&self, req: AddCommandRequest) -> Result<Command> {
        let command = Command::new(
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            &req.name,
            &req.command_text,
            req.description,
            split_tags(&req.tags),
        )?;

        info!(name = %command.name, tags = ?command.tags, "Adding command");
        if let Err(e) = self.store.insert(&command).await {
            warn!(name = %command.name, error = %e, "Failed to add command");
            return Err(e);
        }
        Ok(command)
    }

    /// Page through the catalog; negative values are treated as zero
    pub async fn list_commands(&self, limit: i64, offset: i64) -> Result<Vec<Command>> {
        let (limit, offset) = (clamp_page(limit), clamp_page(offset));
        debug!(limit, offset, "Listing commands");
        self.store.list(limit, offset).await
    }

    /// Find a command by name
    pub async fn find_command(&self, name: &str) -> Result<Command> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::NotFound("Command name is empty".to_string()));
        }
        self.store.find_by_name(name).await
    }

    /// Apply a partial update
    ///
    /// # Errors
    /// - `AppError::NotFound` if the command does not exist
    /// - `AppError::Validation` if nothing would change or the new text is blank
    pub async fn update_command(&self, req: UpdateCommandRequest) -> Result<Command> {
        let patch = CommandPatch {
            command_text: req.command_text,
            description: req.description,
            tags: req.tags.as_deref().map(split_tags),
        };
        if patch.is_empty() {
            return Err(AppError::Validation("Nothing to update".to_string()));
        }

        let mut command = self.find_command(&req.name).await?;
        command.apply(patch, self.time_provider.now_millis())?;

        info!(name = %command.name, "Updating command");
        self.store.update(&command).await?;
        Ok(command)
    }

    /// Search by free text and/or tags; paging as in `list_commands`
    pub async fn search_commands(
        &self,
        text: Option<&str>,
        tags: Vec<String>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Command>> {
        let query = CommandQuery {
            text: text
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            tags: normalize_tags(tags),
        };
        debug!(query = ?query, "Searching commands");
        self.store
            .search(&query, clamp_page(limit), clamp_page(offset))
            .await
    }

    /// Delete by name and/or tags; with neither, nothing is deleted
    pub async fn delete_commands(&self, name: Option<&str>, tags: Vec<String>) -> Result<u64> {
        let filter = CommandFilter {
            name: name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string),
            tags: normalize_tags(tags),
        };
        if filter.is_empty() {
            debug!("Delete called without criteria, nothing to do");
            return Ok(0);
        }

        let deleted = self.store.delete(&filter).await?;
        info!(filter = ?filter, deleted, "Deleted commands");
        Ok(deleted)
    }

    pub async fn delete_all_commands(&self) -> Result<u64> {
        let deleted = self.store.delete_all().await?;
        warn!(deleted, "Deleted all commands");
        Ok(deleted)
    }

    pub async fn count_commands(&self) -> Result<i64> {
        self.store.count().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::catalog_store::mocks::InMemoryCatalogStore;
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::time_provider::ManualTimeProvider;

    fn registry() -> CommandRegistry {
        CommandRegistry::new(
            Arc::new(InMemoryCatalogStore::new()),
            Arc::new(SequentialIdProvider::new("cmd")),
            Arc::new(ManualTimeProvider::new(1_000)),
        )
    }

    fn add(name: &str, text: &str, tags: &str) -> AddCommandRequest {
        AddCommandRequest {
            name: name.to_string(),
            command_text: text.to_string(),
            description: String::new(),
            tags: tags.to_string(),
        }
    }

    #[tokio::test]
    async fn test_add_then_list_normalizes_tags() {
        let registry = registry();
        registry
            .add_command(add("build", "cargo build", " rust, ci ,,rust"))
            .await
            .unwrap();

        let commands = registry.list_commands(1, 0).await.unwrap();
        let found: Vec<_> = commands.iter().filter(|c| c.name == "build").collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tags, vec!["rust", "ci"]);
        assert_eq!(found[0].id, "cmd-1");
        assert_eq!(found[0].created_at, 1_000);
    }

    #[tokio::test]
    async fn test_add_rejects_empty_name() {
        let err = registry()
            .add_command(add("", "echo hi", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_add_rejects_blank_command_text() {
        let err = registry()
            .add_command(add("greet", "   ", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_add_duplicate_is_rejected() {
        let registry = registry();
        registry.add_command(add("greet", "echo hi", "")).await.unwrap();

        let err = registry
            .add_command(add(" greet ", "echo hello", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateName(name) if name == "greet"));

        let stored = registry.find_command("greet").await.unwrap();
        assert_eq!(stored.command_text, "echo hi");
    }

    #[tokio::test]
    async fn test_list_empty_and_out_of_range() {
        let registry = registry();
        assert!(registry.list_commands(100, 0).await.unwrap().is_empty());

        registry.add_command(add("a", "true", "")).await.unwrap();
        assert!(registry.list_commands(10, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_clamps_negative_paging() {
        let registry = registry();
        registry.add_command(add("a", "true", "")).await.unwrap();
        registry.add_command(add("b", "true", "")).await.unwrap();

        assert!(registry.list_commands(-5, 0).await.unwrap().is_empty());
        let all = registry.list_commands(10, -3).await.unwrap();
        let names: Vec<_> = all.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_find_missing_command() {
        let err = registry().find_command("nope").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_command() {
        let registry = registry();
        registry.add_command(add("greet", "echo hi", "demo")).await.unwrap();

        let updated = registry
            .update_command(UpdateCommandRequest {
                name: "greet".to_string(),
                command_text: None,
                description: Some("says hi".to_string()),
                tags: Some("demo, shell".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(updated.description, "says hi");
        assert_eq!(updated.tags, vec!["demo", "shell"]);

        let stored = registry.find_command("greet").await.unwrap();
        assert_eq!(stored, updated);
    }

    #[tokio::test]
    async fn test_update_requires_changes() {
        let registry = registry();
        registry.add_command(add("greet", "echo hi", "")).await.unwrap();

        let err = registry
            .update_command(UpdateCommandRequest {
                name: "greet".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_search_and_delete() {
        let registry = registry();
        registry.add_command(add("build", "cargo build", "rust")).await.unwrap();
        registry.add_command(add("test", "cargo test", "rust,ci")).await.unwrap();
        registry.add_command(add("lint", "npm run lint", "js,ci")).await.unwrap();

        let cargo = registry
            .search_commands(Some("CARGO"), vec![], 10, 0)
            .await
            .unwrap();
        assert_eq!(cargo.len(), 2);

        let ci = registry
            .search_commands(None, vec!["ci".to_string()], 10, 0)
            .await
            .unwrap();
        let names: Vec<_> = ci.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["test", "lint"]);

        assert_eq!(registry.delete_commands(None, vec![]).await.unwrap(), 0);
        assert_eq!(
            registry
                .delete_commands(None, vec!["ci".to_string()])
                .await
                .unwrap(),
            2
        );
        assert_eq!(registry.count_commands().await.unwrap(), 1);
        assert_eq!(registry.delete_all_commands().await.unwrap(), 1);
    }
}
