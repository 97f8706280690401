//! Listing filter composition.
//!
//! A `ListingFilter` is a pure predicate over items: visibility gating, then
//! category and condition equality (unless "all"), then a case-insensitive
//! substring match on title OR description. Applying it never reorders.

use std::str::FromStr;

use crate::market::domain::{Category, Condition, Item, ItemStatus, MarketError};
use crate::market::repository::{ItemQuery, ListedItem};

/// One optional equality facet; `All` admits every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet<T> {
    All,
    Only(T),
}

impl<T> Default for Facet<T> {
    fn default() -> Self {
        Facet::All
    }
}

impl<T: PartialEq> Facet<T> {
    pub fn admits(&self, value: &T) -> bool {
        match self {
            Facet::All => true,
            Facet::Only(wanted) => wanted == value,
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Facet::All => None,
            Facet::Only(v) => Some(v),
        }
    }
}

impl<T: FromStr<Err = MarketError>> Facet<T> {
    /// Missing, blank, and "all" all mean no constraint
    pub fn parse(raw: Option<&str>) -> Result<Self, MarketError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(Facet::All),
            Some(v) if v.eq_ignore_ascii_case("all") => Ok(Facet::All),
            Some(v) => v.parse().map(Facet::Only),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// approved and available only
    #[default]
    Public,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListingFilter {
    pub visibility: Visibility,
    pub category: Facet<Category>,
    pub condition: Facet<Condition>,
    search: Option<String>,
}

/// Anything that carries an item and can be filtered as a listing
pub trait Listable {
    fn listed_item(&self) -> &Item;
}

impl Listable for Item {
    fn listed_item(&self) -> &Item {
        self
    }
}

impl Listable for ListedItem {
    fn listed_item(&self) -> &Item {
        &self.item
    }
}

impl ListingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw query-string values
    pub fn parse(
        category: Option<&str>,
        condition: Option<&str>,
        search: Option<&str>,
    ) -> Result<Self, MarketError> {
        Ok(Self::new()
            .category(Facet::parse(category)?)
            .condition(Facet::parse(condition)?)
            .search(search))
    }

    pub fn category(mut self, category: Facet<Category>) -> Self {
        self.category = category;
        self
    }

    pub fn condition(mut self, condition: Facet<Condition>) -> Self {
        self.condition = condition;
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Stored lowercased; blank terms are dropped
    pub fn search(mut self, term: Option<&str>) -> Self {
        self.search = term
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        self
    }

    pub fn matches(&self, item: &Item) -> bool {
        let visible = match self.visibility {
            Visibility::Public => item.is_visible(),
            Visibility::Any => true,
        };

        visible
            && self.category.admits(&item.category)
            && self.condition.admits(&item.condition)
            && self.matches_text(item)
    }

    fn matches_text(&self, item: &Item) -> bool {
        let Some(term) = self.search.as_deref() else {
            return true;
        };
        item.title.to_lowercase().contains(term)
            || item
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(term))
    }

    /// Keep matching entries in their original order
    pub fn apply<T: Listable>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .filter(|entry| self.matches(entry.listed_item()))
            .collect()
    }

    /// Push the equality facets down to the persistence query
    pub fn narrow(&self, mut query: ItemQuery) -> ItemQuery {
        if self.visibility == Visibility::Public {
            query.status = Some(ItemStatus::Approved);
            query.available = Some(true);
        }
        if let Some(category) = self.category.value() {
            query.category = Some(*category);
        }
        if let Some(condition) = self.condition.value() {
            query.condition = Some(*condition);
        }
        query
    }
}
