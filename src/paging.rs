//! Page navigation for engines whose results span several pages.

use async_trait::async_trait;

use crate::engine::Engine;
use crate::model::SearchResponse;
use crate::Result;

/// A response that knows its page number and the URLs of every page.
pub trait Paginated: SearchResponse {
    /// 1-based number of this page.
    fn page_number(&self) -> usize;

    /// URL of every page, index 0 being page 1.
    fn pages(&self) -> &[String];
}

/// Returns the page reached by moving `offset` pages from `current`, or
/// `None` when it falls outside `1..=total`.
pub fn target_page(current: usize, offset: isize, total: usize) -> Option<usize> {
    let target = current.checked_add_signed(offset)?;
    (1..=total).contains(&target).then_some(target)
}

/// Engines that can fetch further pages of a previous response.
#[async_trait]
pub trait Paginate: Engine
where
    Self::Response: Paginated,
{
    /// Fetches page `page` (1-based) of `response` and parses it into a new,
    /// independent response carrying the same page list.
    async fn fetch_page(&self, response: &Self::Response, page: usize) -> Result<Self::Response>;

    /// Moves `offset` pages from `response`. Out of range targets yield `None`
    /// without any request.
    async fn navigate(&self, response: &Self::Response, offset: isize) -> Result<Option<Self::Response>> {
        match target_page(response.page_number(), offset, response.pages().len()) {
            Some(page) => {
                tracing::debug!(engine = self.name(), page, "navigating");
                self.fetch_page(response, page).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Fetches the page after `response`.
    async fn next_page(&self, response: &Self::Response) -> Result<Option<Self::Response>> {
        self.navigate(response, 1).await
    }

    /// Fetches the page before `response`.
    async fn pre_page(&self, response: &Self::Response) -> Result<Option<Self::Response>> {
        self.navigate(response, -1).await
    }
}

/// Returns `url` with its `page` query parameter set to `page`.
pub fn with_page(url: &str, page: usize) -> Result<String> {
    let mut parsed = url::Url::parse(url)?;
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "page")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(pairs)
        .append_pair("page", &page.to_string());
    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_page() {
        assert_eq!(target_page(1, 1, 3), Some(2));
        assert_eq!(target_page(3, -2, 3), Some(1));
        assert_eq!(target_page(3, 1, 3), None);
        assert_eq!(target_page(1, -1, 3), None);
        assert_eq!(target_page(1, 0, 0), None);
        assert_eq!(target_page(2, 0, 2), Some(2));
    }

    #[test]
    fn test_with_page_replaces_existing() {
        let url = with_page("https://tineye.com/api/v1/result_json/?sort=score&page=1", 3).unwrap();
        assert_eq!(url, "https://tineye.com/api/v1/result_json/?sort=score&page=3");
    }

    #[test]
    fn test_with_page_appends() {
        let url = with_page("https://tineye.com/api/v1/result_json/", 2).unwrap();
        assert_eq!(url, "https://tineye.com/api/v1/result_json/?page=2");
    }

    #[test]
    fn test_with_page_rejects_relative() {
        assert!(with_page("/relative", 2).is_err());
    }
}
