// Command Domain Model

use serde::{Deserialize, Serialize};

use crate::domain::error::{DomainError, Result};

/// Command ID (UUID v4)
pub type CommandId = String;

/// Stored command definition
///
/// `name` is the catalog lookup key. `name` and `command_text` are never empty
/// and `tags` never holds blank or duplicate entries; every constructor and
/// mutator goes through the same normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub name: String,
    pub command_text: String,
    pub description: String,
    pub tags: Vec<String>,
    pub created_at: i64, // epoch ms
    pub updated_at: i64, // epoch ms
}

/// Partial update of a stored command (`None` keeps the current value)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandPatch {
    pub command_text: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl CommandPatch {
    pub fn is_empty(&self) -> bool {
        self.command_text.is_none() && self.description.is_none() && self.tags.is_none()
    }
}

impl Command {
    /// Create a new Command
    ///
    /// # Arguments
    ///
    /// * `id` - Unique command ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `name` - Lookup key, trimmed
    /// * `command_text` - Shell-interpreted invocation, trimmed
    /// * `description` - Free text, may be empty
    /// * `tags` - Tag candidates, normalized with [`normalize_tags`]
    ///
    /// # Errors
    /// `DomainError::Validation` if `name` or `command_text` is blank.
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        name: &str,
        command_text: &str,
        description: impl Into<String>,
        tags: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        Ok(Self {
            id: id.into(),
            name: required("name", name)?,
            command_text: required("command_text", command_text)?,
            description: description.into(),
            tags: normalize_tags(tags),
            created_at,
            updated_at: created_at,
        })
    }

    /// Apply a partial update with explicit timestamp
    ///
    /// Validation happens before any field is touched, so a rejected patch
    /// leaves the command unchanged.
    pub fn apply(&mut self, patch: CommandPatch, now_millis: i64) -> Result<()> {
        let command_text = patch
            .command_text
            .as_deref()
            .map(|text| required("command_text", text))
            .transpose()?;

        if let Some(command_text) = command_text {
            self.command_text = command_text;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(tags) = patch.tags {
            self.tags = normalize_tags(tags);
        }
        self.updated_at = now_millis;
        Ok(())
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|tag| tags.contains(tag))
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

/// Split a user-supplied comma-separated tag string into normalized tags
///
/// `" rust, cli,,rust "` becomes `["rust", "cli"]`.
pub fn split_tags(raw: &str) -> Vec<String> {
    normalize_tags(raw.split(',').map(str::to_string))
}

/// Trim, drop blanks and deduplicate (first occurrence wins)
///
/// Candidates that themselves contain commas are split as well, so tags coming
/// from structured input obey the same rules as the delimited form.
pub fn normalize_tags(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for candidate in tags {
        for segment in candidate.split(',') {
            let tag = segment.trim();
            if !tag.is_empty() && !normalized.iter().any(|t| t == tag) {
                normalized.push(tag.to_string());
            }
        }
    }
    normalized
}
