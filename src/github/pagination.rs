use std::future::Future;

use super::errors::GitHubError;

/// Page size requested from list endpoints
pub const PER_PAGE: u8 = 100;

/// Walk numbered pages (starting at 1) until an item matches or a short page
/// ends the listing.
pub async fn find_in_pages<T, F, Fut>(
    mut fetch: F,
    mut matches: impl FnMut(&T) -> bool,
) -> Result<Option<T>, GitHubError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>, GitHubError>>,
{
    let mut page = 1u32;
    loop {
        let items = fetch(page).await?;
        let last_page = items.len() < usize::from(PER_PAGE);
        if let Some(found) = items.into_iter().find(|item| matches(item)) {
            return Ok(Some(found));
        }
        if last_page {
            return Ok(None);
        }
        page = page.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn numbered_pages(total: u32) -> impl Fn(u32) -> Vec<u32> {
        move |page| {
            let start = (page - 1) * u32::from(PER_PAGE);
            (start..total.min(start + u32::from(PER_PAGE))).collect()
        }
    }

    #[tokio::test]
    async fn test_match_beyond_the_first_page_is_found() {
        let pages = numbered_pages(250);
        let fetched = RefCell::new(Vec::new());

        let found = find_in_pages(
            |page| {
                fetched.borrow_mut().push(page);
                let items = pages(page);
                async move { Ok::<_, GitHubError>(items) }
            },
            |n: &u32| *n == 230,
        )
        .await
        .unwrap();

        assert_eq!(found, Some(230));
        assert_eq!(*fetched.borrow(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_short_page_ends_the_search() {
        let pages = numbered_pages(150);
        let fetched = RefCell::new(0);

        let found = find_in_pages(
            |page| {
                *fetched.borrow_mut() += 1;
                let items = pages(page);
                async move { Ok::<_, GitHubError>(items) }
            },
            |n: &u32| *n == 999,
        )
        .await
        .unwrap();

        assert_eq!(found, None);
        assert_eq!(*fetched.borrow(), 2);
    }

    #[tokio::test]
    async fn test_fetch_errors_propagate() {
        let result: Result<Option<u32>, _> = find_in_pages(
            |_| async { Err(GitHubError::InvalidReference("page".to_string())) },
            |_| true,
        )
        .await;
        assert!(matches!(result, Err(GitHubError::InvalidReference(_))));
    }
}
