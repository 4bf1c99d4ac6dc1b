//! Paginated listing.
//!
//! Every resource category is fetched through [`Lister::list_all`], which
//! follows continuation tokens until the server reports the last page or the
//! batch bound is reached. A forbidden response always propagates. Any other
//! failure on the first page is structural and propagates too; on a later page
//! it truncates the listing to what was already fetched.

use std::future::Future;

use tracing::{debug, warn};

use crate::api::{ApiError, ApiResult, ListPage, PageRequest};
use crate::diagnostics::PassTracer;
use crate::{DiscoveryError, Result};

/// Items gathered by one paginated listing.
#[derive(Debug)]
pub struct Listing<T> {
    /// All items fetched, in server order.
    pub items: Vec<T>,
    /// Number of pages fetched.
    pub batches: u32,
    /// Set when a later page failed and the listing stopped early.
    pub truncated: Option<DiscoveryError>,
    /// Set when the batch bound stopped the listing.
    pub hit_batch_limit: bool,
}

/// Map an API failure on an unbatched or first-page call to a pass error.
#[must_use]
pub fn structural_error(kind: &str, err: ApiError) -> DiscoveryError {
    match err {
        ApiError::Forbidden(message) => DiscoveryError::AccessForbidden {
            kind: kind.to_string(),
            message,
        },
        ApiError::Other(message) => DiscoveryError::ListFailed {
            kind: kind.to_string(),
            message,
        },
    }
}

/// Follows continuation tokens with a page size and a batch bound.
#[derive(Debug, Clone)]
pub struct Lister {
    batch_size: u32,
    max_batches: u32,
    tracer: PassTracer,
}

impl Lister {
    /// Create a lister.
    #[must_use]
    pub fn new(batch_size: u32, max_batches: u32) -> Self {
        Self {
            batch_size,
            max_batches,
            tracer: PassTracer::new(),
        }
    }

    /// Report pagination progress to `tracer`.
    #[must_use]
    pub fn with_tracer(mut self, tracer: PassTracer) -> Self {
        self.tracer = tracer;
        self
    }

    /// Fetch every page of `kind`.
    ///
    /// # Errors
    ///
    /// Returns `AccessForbidden` if any page is forbidden, and `ListFailed`
    /// if the first page fails for another reason.
    pub async fn list_all<T, F, Fut>(
        &self,
        kind: &str,
        selector: Option<&str>,
        mut fetch: F,
    ) -> Result<Listing<T>>
    where
        F: FnMut(PageRequest) -> Fut,
        Fut: Future<Output = ApiResult<ListPage<T>>>,
    {
        let _frame = self.tracer.enter(kind);
        let mut listing = Listing {
            items: Vec::new(),
            batches: 0,
            truncated: None,
            hit_batch_limit: false,
        };
        let mut token: Option<String> = None;

        loop {
            if listing.batches >= self.max_batches {
                warn!(
                    kind,
                    batches = listing.batches,
                    items = listing.items.len(),
                    "Reached batch limit, using partial listing"
                );
                listing.hit_batch_limit = true;
                break;
            }

            let req = PageRequest {
                limit: Some(self.batch_size),
                continue_token: token.take(),
                label_selector: selector.map(str::to_string),
            };

            match fetch(req).await {
                Ok(page) => {
                    listing.batches += 1;
                    listing.items.extend(page.items);
                    self.tracer.record_batch(listing.batches, listing.items.len());
                    debug!(
                        kind,
                        batch = listing.batches,
                        items = listing.items.len(),
                        "Fetched page"
                    );
                    match page.continue_token {
                        Some(next) => token = Some(next),
                        None => break,
                    }
                }
                Err(ApiError::Other(message)) if listing.batches > 0 => {
                    warn!(
                        kind,
                        batch = listing.batches + 1,
                        error = %message,
                        "Page fetch failed, using partial listing"
                    );
                    listing.truncated = Some(DiscoveryError::TransientFetch {
                        kind: kind.to_string(),
                        message,
                    });
                    break;
                }
                Err(err) => return Err(structural_error(kind, err)),
            }
        }

        Ok(listing)
    }
}
