//! Series code derivation and the entity-keyed code registry.

use crate::error::CatalogError;
use crate::instrument::EntityType;
use crate::ticker::MAX_DISAMBIGUATOR;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const TARGET_LEN: usize = 4;
const MIN_LEN: usize = 3;
const PREFIX_LEN: usize = 3;

/// Registry binding series codes to entity identities.
///
/// A code is owned by exactly one entity key and an entity key owns exactly
/// one code, so an entity re-derives the same code on every run.
#[async_trait]
pub trait SeriesCodeRegistry: Send + Sync {
    /// Returns the code already bound to `entity_key`, if any.
    async fn lookup_series_code(&self, entity_key: &str) -> Result<Option<String>, CatalogError>;

    /// Atomically binds `code` to `entity_key` if the code is free.
    ///
    /// Returns the code bound to the entity afterwards (which may be an
    /// earlier binding won by a concurrent run), or `None` if `code` belongs
    /// to a different entity.
    async fn claim_series_code(
        &self,
        entity_key: &str,
        code: &str,
    ) -> Result<Option<String>, CatalogError>;
}

#[derive(Debug, Default)]
struct RegistryTables {
    by_entity: HashMap<String, String>,
    by_code: HashMap<String, String>,
}

/// Process-wide in-memory code registry.
#[derive(Debug, Default)]
pub struct CodeRegistry {
    tables: Mutex<RegistryTables>,
}

impl CodeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bound codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.lock().by_code.len()
    }

    /// Whether no code is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, entity_key: &str) -> Option<String> {
        self.tables.lock().by_entity.get(entity_key).cloned()
    }

    fn claim(&self, entity_key: &str, code: &str) -> Option<String> {
        let mut tables = self.tables.lock();
        if let Some(existing) = tables.by_entity.get(entity_key) {
            return Some(existing.clone());
        }
        if tables.by_code.contains_key(code) {
            return None;
        }
        tables
            .by_code
            .insert(code.to_string(), entity_key.to_string());
        tables
            .by_entity
            .insert(entity_key.to_string(), code.to_string());
        Some(code.to_string())
    }
}

#[async_trait]
impl SeriesCodeRegistry for CodeRegistry {
    async fn lookup_series_code(&self, entity_key: &str) -> Result<Option<String>, CatalogError> {
        Ok(self.lookup(entity_key))
    }

    async fn claim_series_code(
        &self,
        entity_key: &str,
        code: &str,
    ) -> Result<Option<String>, CatalogError> {
        Ok(self.claim(entity_key, code))
    }
}

/// Derives short series codes and disambiguates them through a registry.
#[derive(Clone)]
pub struct SeriesCodeCompressor {
    registry: Arc<dyn SeriesCodeRegistry>,
}

impl SeriesCodeCompressor {
    /// Creates a compressor backed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<dyn SeriesCodeRegistry>) -> Self {
        Self { registry }
    }

    /// Returns the series code for an entity, minting one on first sight.
    ///
    /// # Errors
    /// [`CatalogError::InvalidInput`] when the name has no letters or every
    /// disambiguator is taken; store errors from the registry.
    pub async fn compress(
        &self,
        entity_key: &str,
        name: &str,
        entity_type: EntityType,
    ) -> Result<String, CatalogError> {
        let base = derive_base_code(name, entity_type)?;

        if let Some(code) = self.registry.lookup_series_code(entity_key).await? {
            return Ok(code);
        }

        for candidate in candidates(&base) {
            if let Some(code) = self
                .registry
                .claim_series_code(entity_key, &candidate)
                .await?
            {
                if code != base {
                    debug!(entity_key, base = %base, code = %code, "Disambiguated series code");
                }
                return Ok(code);
            }
        }

        Err(CatalogError::InvalidInput(format!(
            "no free series code left for '{name}'"
        )))
    }
}

/// Base code before disambiguation: 3-5 uppercase letters.
///
/// The first letter is always kept, vowels are dropped first, and names with
/// too few consonants fall back to plain truncation. Non-Latin scripts are
/// transliterated to ASCII first.
///
/// # Errors
/// [`CatalogError::InvalidInput`] when the name has no letters even after
/// transliteration.
pub fn derive_base_code(name: &str, entity_type: EntityType) -> Result<String, CatalogError> {
    let letters = significant_letters(name, entity_type);
    let Some(&first) = letters.first() else {
        return Err(CatalogError::InvalidInput(format!(
            "name '{name}' has no letters to derive a series code from"
        )));
    };

    let mut code = vec![first];
    code.extend(
        letters[1..]
            .iter()
            .filter(|c| !is_vowel(**c))
            .take(TARGET_LEN - 1),
    );

    if code.len() < MIN_LEN {
        code = letters.iter().copied().take(TARGET_LEN).collect();
    }
    while code.len() < MIN_LEN {
        code.push(b'X');
    }

    Ok(String::from_utf8_lossy(&code).into_owned())
}

/// Group code for an ETF theme tag (3 letters).
///
/// # Errors
/// See [`derive_base_code`].
pub fn derive_group_code(tag: &str) -> Result<String, CatalogError> {
    let code = derive_base_code(tag, EntityType::Other)?;
    Ok(code.chars().take(PREFIX_LEN).collect())
}

/// Candidate codes in claim order: the base code, then `PREFIX2..PREFIX99`.
pub fn candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    let prefix: String = base.chars().take(PREFIX_LEN).collect();
    std::iter::once(base.to_string())
        .chain((2..=MAX_DISAMBIGUATOR).map(move |n| format!("{prefix}{n}")))
}

fn significant_letters(name: &str, entity_type: EntityType) -> Vec<u8> {
    // Non-Latin names fold to their ASCII spelling.
    let folded = deunicode::deunicode(name);
    let mut words: Vec<&str> = folded
        .split(|c: char| c.is_whitespace() || c == '-' || c == ',')
        .filter(|w| w.chars().any(|c| c.is_ascii_alphabetic()))
        .collect();

    if words.len() > 1
        && matches!(
            words[0].to_ascii_lowercase().as_str(),
            "the" | "a" | "an"
        )
    {
        words.remove(0);
    }

    if entity_type == EntityType::Creator {
        while words.len() > 1
            && matches!(
                words[words.len() - 1]
                    .trim_end_matches('.')
                    .to_ascii_lowercase()
                    .as_str(),
                "jr" | "sr" | "ii" | "iii" | "iv"
            )
        {
            words.pop();
        }
        if let Some(family) = words.last().copied() {
            words = vec![family];
        }
    }

    words
        .iter()
        .flat_map(|w| w.bytes())
        .filter(u8::is_ascii_alphabetic)
        .map(|b| b.to_ascii_uppercase())
        .collect()
}

fn is_vowel(c: u8) -> bool {
    matches!(c, b'A' | b'E' | b'I' | b'O' | b'U')
}
