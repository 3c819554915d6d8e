use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

/// Page size requested from every paginated list endpoint.
pub const PAGE_SIZE: u32 = 100;

/// Opaque continuation token returned alongside each list element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Cursor {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Query parameters of a list endpoint that accept a cursor and a page limit.
pub trait PageParams {
    fn set_cursor(&mut self, cursor: Option<Cursor>);
    fn set_limit(&mut self, limit: u32);
}

/// A `{ cursor, <resource> }` list element as returned by the API.
pub trait CursorEnvelope {
    type Item;

    fn into_parts(self) -> (Self::Item, Cursor);
}

/// Unwraps list envelopes into the bare items plus the cursor of the last one.
pub fn split_page<E: CursorEnvelope>(envelopes: Vec<E>) -> (Vec<E::Item>, Option<Cursor>) {
    let mut last_cursor = None;
    let items = envelopes
        .into_iter()
        .map(|envelope| {
            let (item, cursor) = envelope.into_parts();
            last_cursor = Some(cursor);
            item
        })
        .collect();
    (items, last_cursor)
}

/// Drives `fetch_page` until the listing is exhausted and returns every item.
///
/// The limit is forced to [`PAGE_SIZE`]. Fetching stops on an empty page or a
/// page shorter than the limit; a full page always costs one more round trip.
/// Any page error aborts the whole listing without partial results.
pub async fn fetch_all<T, P, E, F, Fut>(mut params: P, mut fetch_page: F) -> Result<Vec<T>, E>
where
    P: PageParams + Clone,
    F: FnMut(P) -> Fut,
    Fut: Future<Output = Result<(Vec<T>, Option<Cursor>), E>>,
{
    params.set_limit(PAGE_SIZE);
    let mut items = Vec::new();
    let mut pages = 0_usize;

    loop {
        let (page, cursor) = fetch_page(params.clone()).await?;
        pages += 1;
        if page.is_empty() {
            break;
        }

        let page_len = page.len();
        items.extend(page);
        tracing::debug!(
            event = "pagination_page",
            page = pages,
            page_len,
            total = items.len(),
            "fetched list page"
        );
        if page_len < PAGE_SIZE as usize {
            break;
        }

        match cursor {
            Some(cursor) => params.set_cursor(Some(cursor)),
            None => {
                tracing::warn!(
                    event = "pagination_missing_cursor",
                    total = items.len(),
                    "full page returned without a cursor, stopping"
                );
                break;
            }
        }
    }

    Ok(items)
}
