//! Early-terminating search over a lazily paged listing.

use futures::{Stream, TryStreamExt};
use tracing::{debug, trace};

/// First item across `pages` matching `predicate`.
///
/// Pages are pulled one at a time with no delay between them. The stream is
/// not polled again once a match is found, so later pages are never fetched.
/// `Ok(None)` means every page was inspected without a match.
pub async fn find_in_pages<S, T, E, P>(pages: S, mut predicate: P) -> Result<Option<T>, E>
where
    S: Stream<Item = Result<Vec<T>, E>>,
    P: FnMut(&T) -> bool,
{
    let mut pages = std::pin::pin!(pages);
    let mut page_number = 0u32;

    while let Some(page) = pages.try_next().await? {
        page_number += 1;
        if let Some(found) = page.into_iter().find(|item| predicate(item)) {
            debug!(page = page_number, "Found match");
            return Ok(Some(found));
        }
        trace!(page = page_number, "No match on page");
    }

    debug!(pages = page_number, "Listing exhausted without a match");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counted_pages<'a>(
        pages: Vec<Vec<&'static str>>,
        pulled: &'a AtomicU32,
    ) -> impl Stream<Item = Result<Vec<&'static str>, String>> + 'a {
        stream::iter(pages).map(move |page| {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok(page)
        })
    }

    #[tokio::test]
    async fn test_stops_on_page_with_match() {
        let pulled = AtomicU32::new(0);
        let pages = counted_pages(vec![vec!["a", "b"], vec!["c", "target"], vec!["d"]], &pulled);

        let found = find_in_pages(pages, |v| *v == "target").await.unwrap();

        assert_eq!(found, Some("target"));
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_missing_target_reads_every_page() {
        let pulled = AtomicU32::new(0);
        let pages = counted_pages(vec![vec!["a"], vec!["b"], vec![]], &pulled);

        let found = find_in_pages(pages, |v| *v == "target").await.unwrap();

        assert_eq!(found, None);
        assert_eq!(pulled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_page_error_propagates() {
        let pages = stream::iter(vec![Ok(vec![1]), Err("page 2 failed"), Ok(vec![3])]);
        let err = find_in_pages(pages, |v| *v == 3).await.unwrap_err();
        assert_eq!(err, "page 2 failed");
    }
}
