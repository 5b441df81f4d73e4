//!
//! src/paging.rs
//!
//! Drains a cursor paginated resource (a paging object with `items` and
//! a `next` link) into one flat, ordered list
//!

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::errors::CollaboratorError;

/// The capability to fetch the page behind a `next` link
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, next: &str) -> Result<Value, CollaboratorError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub next: Option<String>
}

impl<T: DeserializeOwned> Page<T> {
    pub fn from_json(value: Value) -> Result<Self, CollaboratorError> {
        serde_json::from_value(value)
            .map_err(|e| CollaboratorError::Parse(format!("paging object: {e}")))
    }
}

/// Follows `next` until exhausted, one sequential request per page.
/// Transport errors are returned unchanged and nothing is retried.
pub async fn get_all_paged_items<T, S>(source: &S, first_page: Page<T>) ->
    Result<Vec<T>, CollaboratorError>
where
    T: DeserializeOwned + Send,
    S: PageSource + ?Sized,
{
    let Page { mut items, mut next } = first_page;
    debug!(items = items.len(), "paging.page");

    while let Some(link) = next {
        let page = Page::<T>::from_json(source.fetch_page(&link).await?)?;
        debug!(items = page.items.len(), "paging.page");
        items.extend(page.items);
        next = page.next;
    }

    Ok(items)
}
