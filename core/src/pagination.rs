//! Sans-IO accumulator for multi-page list reads.
//!
//! The caller asks `Pager` for the next URL, executes it, and feeds the
//! decoded `Page` back. Pages are strictly sequential because each
//! continuation link is only known once the previous page has arrived.

use crate::error::ApiError;
use crate::types::{ListItem, Page};

pub const DEFAULT_MAX_PAGES: usize = 500;

#[derive(Debug)]
pub struct Pager {
    next: Option<String>,
    items: Vec<ListItem>,
    pages: usize,
    max_pages: usize,
}

impl Pager {
    pub fn new(first_url: String, max_pages: usize) -> Self {
        Self {
            next: Some(first_url),
            items: Vec::new(),
            pages: 0,
            max_pages: max_pages.max(1),
        }
    }

    /// URL of the page to fetch next, or `None` once the server stopped
    /// sending continuation links.
    pub fn next_url(&self) -> Option<&str> {
        self.next.as_deref()
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Append a page. Fails if the server still has more after the page
    /// budget is spent.
    pub fn push(&mut self, page: Page) -> Result<(), ApiError> {
        self.pages += 1;
        self.items.extend(page.value);
        self.next = page.next_link.filter(|link| !link.is_empty());
        if self.next.is_some() && self.pages >= self.max_pages {
            return Err(ApiError::PageLimit {
                limit: self.max_pages,
            });
        }
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.next.is_none()
    }

    pub fn into_items(self) -> Vec<ListItem> {
        self.items
    }
}

/// Project every row to `fields`, keeping row order.
pub fn project<S: AsRef<str>>(items: &[ListItem], fields: &[S]) -> Vec<ListItem> {
    items.iter().map(|item| item.project(fields)).collect()
}
