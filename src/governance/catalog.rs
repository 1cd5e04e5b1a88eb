use crate::governance::error::CatalogError;
use crate::governance::model::ItemAttributes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogQuery {
    pub entity_type: String,
    pub target_value: String,
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateItem {
    pub item_key: String,
    #[serde(default)]
    pub attributes: ItemAttributes,
}

impl CandidateItem {
    pub fn new(item_key: impl Into<String>) -> Self {
        Self {
            item_key: item_key.into(),
            attributes: ItemAttributes::default(),
        }
    }

    pub fn with_attributes(item_key: impl Into<String>, attributes: ItemAttributes) -> Self {
        Self {
            item_key: item_key.into(),
            attributes,
        }
    }
}

pub type CandidateStream<'a> = Box<dyn Iterator<Item = Result<CandidateItem, CatalogError>> + 'a>;

/// Read-only view of the indexer that discovered sensitive items.
///
/// The returned stream is lazy and finite. Calling `list_candidate_items`
/// again restarts enumeration from the beginning.
pub trait ItemCatalog {
    fn list_candidate_items(
        &self,
        query: &CatalogQuery,
    ) -> Result<CandidateStream<'_>, CatalogError>;
}

impl<T: ItemCatalog + ?Sized> ItemCatalog for &T {
    fn list_candidate_items(
        &self,
        query: &CatalogQuery,
    ) -> Result<CandidateStream<'_>, CatalogError> {
        (**self).list_candidate_items(query)
    }
}

/// In-process catalog keyed by `(entity_type, target_value)`.
///
/// Used for offline replays of an indexer export and in tests. Scope is
/// matched only when an entry was registered with one.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    entries: BTreeMap<(String, String), Vec<ScopedItems>>,
}

#[derive(Debug, Clone)]
struct ScopedItems {
    scope: Option<String>,
    items: Vec<CandidateItem>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        entity_type: impl Into<String>,
        target_value: impl Into<String>,
        items: Vec<CandidateItem>,
    ) {
        self.entries
            .entry((entity_type.into(), target_value.into()))
            .or_default()
            .push(ScopedItems { scope: None, items });
    }

    pub fn insert_scoped(
        &mut self,
        entity_type: impl Into<String>,
        target_value: impl Into<String>,
        scope: impl Into<String>,
        items: Vec<CandidateItem>,
    ) {
        self.entries
            .entry((entity_type.into(), target_value.into()))
            .or_default()
            .push(ScopedItems {
                scope: Some(scope.into()),
                items,
            });
    }
}

impl ItemCatalog for StaticCatalog {
    fn list_candidate_items(
        &self,
        query: &CatalogQuery,
    ) -> Result<CandidateStream<'_>, CatalogError> {
        let key = (query.entity_type.clone(), query.target_value.clone());
        let Some(groups) = self.entries.get(&key) else {
            return Ok(Box::new(std::iter::empty()));
        };
        let wanted_scope = query.scope.clone();
        let items = groups
            .iter()
            .filter(move |group| {
                group
                    .scope
                    .as_deref()
                    .map(|scope| scope == wanted_scope)
                    .unwrap_or(true)
            })
            .flat_map(|group| group.items.iter().cloned())
            .map(Ok);
        Ok(Box::new(items))
    }
}
