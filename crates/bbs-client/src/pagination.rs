//! Page cursors for the two listing encodings
//!
//! Cloud pages carry an absolute `next` link; server pages carry
//! `isLastPage` plus `nextPageStart`. Both are drained by [`fetch_all`].

use crate::error::{ApiError, Result};
use crate::transport::AuthenticatedTransport;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Page sizes per listing.
pub mod page_size {
    pub const CLOUD_DEFAULT: u32 = 100;
    /// The cloud pull request listing rejects anything larger.
    pub const CLOUD_PULL_REQUESTS: u32 = 50;
    pub const SERVER_DEFAULT: u32 = 200;
}

/// One page of a paginated listing.
pub trait PageCursor: DeserializeOwned + Send {
    type Item;

    /// Request for the following page, `None` on the terminal page.
    fn next_page(&self, current: &Url) -> Result<Option<Url>>;

    fn into_values(self) -> Vec<Self::Item>;
}

/// Cloud-style page.
#[derive(Debug, Deserialize)]
pub struct CloudPage<T> {
    #[serde(default = "Vec::new")]
    pub values: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub pagelen: Option<u32>,
}

impl<T: DeserializeOwned + Send> PageCursor for CloudPage<T> {
    type Item = T;

    fn next_page(&self, current: &Url) -> Result<Option<Url>> {
        match self.next.as_deref() {
            None | Some("") => Ok(None),
            Some(next) => Url::parse(next).map(Some).map_err(|e| ApiError::Protocol {
                url: current.to_string(),
                message: format!("malformed next link '{}': {}", next, e),
            }),
        }
    }

    fn into_values(self) -> Vec<T> {
        self.values
    }
}

/// Server-style page.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPage<T> {
    #[serde(default = "Vec::new")]
    pub values: Vec<T>,
    #[serde(default = "terminal")]
    pub is_last_page: bool,
    #[serde(default)]
    pub next_page_start: Option<u64>,
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub limit: Option<u64>,
}

fn terminal() -> bool {
    true
}

impl<T: DeserializeOwned + Send> PageCursor for ServerPage<T> {
    type Item = T;

    fn next_page(&self, current: &Url) -> Result<Option<Url>> {
        if self.is_last_page {
            return Ok(None);
        }
        let next_start = self.next_page_start.ok_or_else(|| ApiError::Protocol {
            url: current.to_string(),
            message: "page is not last but carries no nextPageStart".to_string(),
        })?;
        if next_start <= self.start && !self.values.is_empty() {
            return Err(ApiError::Protocol {
                url: current.to_string(),
                message: format!("nextPageStart {} does not advance past {}", next_start, self.start),
            });
        }

        let retained: Vec<(String, String)> = current
            .query_pairs()
            .filter(|(name, _)| name != "start")
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();
        let mut next = current.clone();
        next.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair("start", &next_start.to_string());
        Ok(Some(next))
    }

    fn into_values(self) -> Vec<T> {
        self.values
    }
}

/// Drain every page starting at `first`, in page order.
///
/// Cancellation is checked before each request. A locator that repeats an
/// earlier one is a protocol violation and ends iteration with an error.
pub async fn fetch_all<P: PageCursor>(
    transport: &AuthenticatedTransport,
    first: Url,
) -> Result<Vec<P::Item>> {
    let mut seen = HashSet::new();
    let mut values = Vec::new();
    let mut next = Some(first);

    while let Some(url) = next {
        if transport.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        if !seen.insert(url.to_string()) {
            return Err(ApiError::Protocol {
                url: url.to_string(),
                message: "page locator repeated".to_string(),
            });
        }

        debug!(url = %url, page = seen.len(), "Fetching page");
        let page: P = transport.get_json(&url).await?;
        next = page.next_page(&url)?;
        values.extend(page.into_values());
    }

    Ok(values)
}
