//! Provider serving records from a JSON document.

use super::{EntityPage, EntityProvider, PageRequest, ProviderError};
use crate::instrument::RawEntity;
use async_trait::async_trait;
use std::path::Path;

/// Serves a fixed record list, paginated.
///
/// Used for offline runs and tests; the JSON document is an array of
/// [`RawEntity`] objects.
#[derive(Debug, Clone)]
pub struct FixtureProvider {
    name: String,
    entities: Vec<RawEntity>,
}

impl FixtureProvider {
    /// Creates a provider over in-memory records, stamping the provider name.
    #[must_use]
    pub fn new(name: impl Into<String>, entities: Vec<RawEntity>) -> Self {
        let name = name.into();
        let entities = entities
            .into_iter()
            .map(|mut e| {
                e.provider.clone_from(&name);
                e
            })
            .collect();
        Self { name, entities }
    }

    /// Parses a JSON array of records.
    ///
    /// # Errors
    /// [`ProviderError::Decode`] if the document is not a record array.
    pub fn from_json(name: impl Into<String>, json: &str) -> Result<Self, ProviderError> {
        let entities: Vec<RawEntity> =
            serde_json::from_str(json).map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(Self::new(name, entities))
    }

    /// Loads a JSON array of records from disk.
    ///
    /// # Errors
    /// [`ProviderError::Transport`] if the file cannot be read,
    /// [`ProviderError::Decode`] if it cannot be parsed.
    pub async fn from_file(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| ProviderError::Transport(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_json(name, &content)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the fixture is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[async_trait]
impl EntityProvider for FixtureProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<EntityPage, ProviderError> {
        let start = request.offset.min(self.entities.len());
        let end = request.offset.saturating_add(request.limit).min(self.entities.len());
        Ok(EntityPage {
            entities: self.entities[start..end].to_vec(),
            next_offset: (end < self.entities.len()).then_some(end),
        })
    }
}
