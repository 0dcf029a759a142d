//!
//! src/pagination.rs  Andrew Belles  Oct 2nd, 2025
//!
//! Offset pagination over listing endpoints. Stops on the explicit
//! continuation signal when a page carries one, otherwise when a page
//! comes back shorter than the requested size
//!

use std::future::Future;

use tracing::trace;

use crate::api::{Page, PageRequest};
use crate::errors::ReconcileError;

impl<T> Page<T> {
    /// Whether another request should follow this page
    pub fn continues(&self, limit: u32) -> bool {
        if self.items.is_empty() {
            return false;
        }
        match self.has_more {
            Some(flag) => flag,
            None => self.items.len() >= limit as usize
        }
    }
}

/// Drains a listing page by page, preserving upstream order
pub async fn collect_all<T, F, Fut>(limit: u32, mut fetch: F) ->
    Result<Vec<T>, ReconcileError>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<Page<T>, ReconcileError>>
{
    let limit = limit.max(1);
    let mut offset = 0_u32;
    let mut out = Vec::new();

    loop {
        let page = fetch(PageRequest { limit, offset }).await?;
        let received = page.items.len();
        let more = page.continues(limit);
        trace!(offset, received, more, "page.fetched");

        out.extend(page.items);
        offset = offset.saturating_add(received as u32);
        if !more {
            break;
        }
    }
    Ok(out)
}
