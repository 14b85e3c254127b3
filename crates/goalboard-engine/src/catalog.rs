//! Page catalog and identity resolution.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use goalboard_types::PageName;

const BUILTIN_CATALOG: &str = include_str!("../assets/pages.toml");
const TAG_MARKER: char = '#';

/// Errors raised while loading a page catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read page catalog {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse page catalog: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("catalog page name must be non-empty")]
    EmptyName,
    #[error("catalog alias '{alias}' must start with '#' and carry a name")]
    InvalidAlias { alias: String },
    #[error("catalog alias '{alias}' is declared for both '{first}' and '{second}'")]
    DuplicateAlias {
        alias: String,
        first: String,
        second: String,
    },
}

/// How forgiving a resolution should be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveMode {
    /// Unknown tokens are rejected. Used when recording sales.
    Strict,
    /// Unknown unprefixed tokens are accepted as ad hoc pages. Used by goal
    /// and override administration.
    Lenient,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    page: Vec<CatalogFileEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogFileEntry {
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Canonical page identities with their tag aliases.
#[derive(Debug, Clone, Default)]
pub struct PageCatalog {
    by_tag: BTreeMap<String, PageName>,
    by_display: BTreeMap<String, PageName>,
    by_normalized: BTreeMap<String, PageName>,
}

impl PageCatalog {
    /// Catalog compiled into the binary.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_toml_str(BUILTIN_CATALOG)
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(raw)?;
        let mut catalog = Self::default();
        for entry in file.page {
            let name = clean(&entry.name);
            if name.is_empty() {
                return Err(CatalogError::EmptyName);
            }
            let page = PageName::from(name.clone());
            catalog.by_display.insert(name.to_lowercase(), page.clone());
            catalog.insert_normalized(&name, &page)?;

            for alias in entry.aliases {
                let tag = alias.trim().to_lowercase();
                if !tag.starts_with(TAG_MARKER) || tag.len() == TAG_MARKER.len_utf8() {
                    return Err(CatalogError::InvalidAlias { alias });
                }
                if let Some(existing) = catalog.by_tag.get(&tag) {
                    if existing != &page {
                        return Err(CatalogError::DuplicateAlias {
                            alias: tag,
                            first: existing.to_string(),
                            second: page.to_string(),
                        });
                    }
                }
                catalog.insert_normalized(&tag, &page)?;
                catalog.by_tag.insert(tag, page.clone());
            }
        }
        Ok(catalog)
    }

    fn insert_normalized(&mut self, raw: &str, page: &PageName) -> Result<(), CatalogError> {
        let key = normalize(raw);
        if key.is_empty() {
            return Ok(());
        }
        match self.by_normalized.get(&key) {
            Some(existing) if existing != page => Err(CatalogError::DuplicateAlias {
                alias: key,
                first: existing.to_string(),
                second: page.to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.by_normalized.insert(key, page.clone());
                Ok(())
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_display.is_empty()
    }

    /// Number of canonical pages.
    pub fn len(&self) -> usize {
        self.by_display.len()
    }

    /// Tag aliases with their canonical page, ordered by tag.
    pub fn aliases(&self) -> Vec<(String, PageName)> {
        self.by_tag
            .iter()
            .map(|(tag, page)| (tag.clone(), page.clone()))
            .collect()
    }

    /// Maps a raw token onto a canonical page.
    ///
    /// Tagged input (`#autumnpaid trailing words`) is resolved from its first
    /// token only and fails when the tag is unknown, whatever the mode.
    /// Untagged input keeps its full cleaned text and is matched against
    /// display names, then against normalized aliases. Only `Lenient` mode
    /// accepts an untagged miss as an ad hoc page.
    pub fn resolve(&self, raw: &str, mode: ResolveMode) -> Option<PageName> {
        let cleaned = clean(raw);
        if cleaned.is_empty() {
            return None;
        }

        if cleaned.starts_with(TAG_MARKER) {
            let token = cleaned.split_whitespace().next()?.to_lowercase();
            return self.by_tag.get(&token).cloned();
        }

        if let Some(page) = self.by_display.get(&cleaned.to_lowercase()) {
            return Some(page.clone());
        }
        let normalized = normalize(&cleaned);
        if let Some(page) = self.by_normalized.get(&normalized) {
            return Some(page.clone());
        }

        match mode {
            ResolveMode::Strict => None,
            ResolveMode::Lenient => Some(PageName::from(cleaned)),
        }
    }
}

/// Strips chat markup characters and trims.
pub fn clean(raw: &str) -> String {
    raw.chars()
        .filter(|ch| !matches!(ch, '*' | '_' | '`'))
        .map(|ch| match ch {
            '[' => '(',
            ']' => ')',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}
