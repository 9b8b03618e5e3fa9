// Catalog Store Port (Interface)

use crate::domain::Command;
use crate::error::Result;
use async_trait::async_trait;

/// Search criteria for `CatalogStore::search`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandQuery {
    /// Substring of name, description or command text; ASCII letters match
    /// regardless of case, other characters match exactly
    pub text: Option<String>,
    /// Match commands carrying at least one of these tags (empty = any)
    pub tags: Vec<String>,
}

impl CommandQuery {
    pub fn matches(&self, command: &Command) -> bool {
        let text_matches = match self.text.as_deref() {
            None => true,
            Some(needle) => {
                let needle = needle.to_ascii_lowercase();
                [&command.name, &command.description, &command.command_text]
                    .iter()
                    .any(|field| field.to_ascii_lowercase().contains(&needle))
            }
        };
        text_matches && (self.tags.is_empty() || command.has_any_tag(&self.tags))
    }
}

/// Selection for `CatalogStore::delete`
///
/// Both criteria given means both must match; neither given selects nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandFilter {
    pub name: Option<String>,
    pub tags: Vec<String>,
}

impl CommandFilter {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.tags.is_empty()
    }

    pub fn matches(&self, command: &Command) -> bool {
        if self.is_empty() {
            return false;
        }
        let name_matches = self.name.as_deref().map_or(true, |n| command.name == n);
        let tags_match = self.tags.is_empty() || command.has_any_tag(&self.tags);
        name_matches && tags_match
    }
}

/// Durable mapping from command name to definition
///
/// Listing order is insertion order. Implementations must serialize writes
/// while letting reads proceed concurrently.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert a new command
    ///
    /// # Errors
    /// `AppError::DuplicateName` if a command with the same name exists
    async fn insert(&self, command: &Command) -> Result<()>;

    /// Up to `limit` commands starting at `offset`; out-of-range offset yields empty
    async fn list(&self, limit: u32, offset: u32) -> Result<Vec<Command>>;

    /// Find command by name
    ///
    /// # Errors
    /// `AppError::NotFound` if no command has this name
    async fn find_by_name(&self, name: &str) -> Result<Command>;

    /// Replace the stored definition of `command.name`
    async fn update(&self, command: &Command) -> Result<()>;

    /// Filtered listing, same ordering and paging rules as `list`
    async fn search(&self, query: &CommandQuery, limit: u32, offset: u32) -> Result<Vec<Command>>;

    /// Delete matching commands, returning how many were removed
    async fn delete(&self, filter: &CommandFilter) -> Result<u64>;

    /// Delete every command, returning how many were removed
    async fn delete_all(&self) -> Result<u64>;

    /// Number of stored commands
    async fn count(&self) -> Result<i64>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use tokio::sync::RwLock;

    /// In-memory catalog (insertion-ordered vector behind a RwLock)
    #[derive(Default)]
    pub struct InMemoryCatalogStore {
        commands: RwLock<Vec<Command>>,
    }

    impl InMemoryCatalogStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn page(commands: impl Iterator<Item = Command>, limit: u32, offset: u32) -> Vec<Command> {
        commands
            .skip(offset as usize)
            .take(limit as usize)
            .collect()
    }

    #[async_trait]
    impl CatalogStore for InMemoryCatalogStore {
        async fn insert(&self, command: &Command) -> Result<()> {
            let mut commands = self.commands.write().await;
            if commands.iter().any(|c| c.name == command.name) {
                return Err(AppError::DuplicateName(command.name.clone()));
            }
            commands.push(command.clone());
            Ok(())
        }

        async fn list(&self, limit: u32, offset: u32) -> Result<Vec<Command>> {
            let commands = self.commands.read().await;
            Ok(page(commands.iter().cloned(), limit, offset))
        }

        async fn find_by_name(&self, name: &str) -> Result<Command> {
            let commands = self.commands.read().await;
            commands
                .iter()
                .find(|c| c.name == name)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Command {} not found", name)))
        }

        async fn update(&self, command: &Command) -> Result<()> {
            let mut commands = self.commands.write().await;
            let slot = commands
                .iter_mut()
                .find(|c| c.name == command.name)
                .ok_or_else(|| AppError::NotFound(format!("Command {} not found", command.name)))?;
            *slot = command.clone();
            Ok(())
        }

        async fn search(
            &self,
            query: &CommandQuery,
            limit: u32,
            offset: u32,
        ) -> Result<Vec<Command>> {
            let commands = self.commands.read().await;
            Ok(page(
                commands.iter().filter(|c| query.matches(c)).cloned(),
                limit,
                offset,
            ))
        }

        async fn delete(&self, filter: &CommandFilter) -> Result<u64> {
            let mut commands = self.commands.write().await;
            let before = commands.len();
            commands.retain(|c| !filter.matches(c));
            Ok((before - commands.len()) as u64)
        }

        async fn delete_all(&self) -> Result<u64> {
            let mut commands = self.commands.write().await;
            let removed = commands.len() as u64;
            commands.clear();
            Ok(removed)
        }

        async fn count(&self) -> Result<i64> {
            Ok(self.commands.read().await.len() as i64)
        }
    }
}
