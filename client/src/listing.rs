use std::sync::Arc;

use chrono::NaiveDate;

use common::{
    data::StoredFile,
    payloads::ListQuery,
};

use crate::transport::{FileApi, TransportError};

/// Conjunctive filter fields; empty strings count as unset.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterCriteria {
    pub name: Option<String>,
    pub tag: Option<String>,
    pub content_type: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

impl FilterCriteria {
    fn normalized(mut self) -> Self {
        fn scrub(value: Option<String>) -> Option<String> {
            value.filter(|s| !s.trim().is_empty())
        }
        self.name = scrub(self.name);
        self.tag = scrub(self.tag);
        self.content_type = scrub(self.content_type);
        self
    }
}

fn total_pages(total_count: u64, page_size: u32) -> u32 {
    total_count
        .div_ceil(page_size as u64)
        .clamp(1, u32::MAX as u64) as u32
}

/// Paged, filtered view over the remote file collection.
///
/// The server owns filtering and slicing: every filter or page change
/// issues a fresh list request carrying the filter fields plus
/// pageNumber/pageSize, and the response's total count drives the page
/// arithmetic. Nothing is re-filtered or re-sliced locally.
pub struct FileBrowser<T: FileApi> {
    api: Arc<T>,
    filters: FilterCriteria,
    page_size: u32,
    current_page: u32,
    total_pages: u32,
    total_count: u64,
    rows: Vec<StoredFile>,
}

impl<T: FileApi> FileBrowser<T> {
    pub fn new(api: Arc<T>, page_size: u32) -> Self {
        Self {
            api,
            filters: FilterCriteria::default(),
            page_size: page_size.max(1),
            current_page: 1,
            total_pages: 1,
            total_count: 0,
            rows: Vec::new(),
        }
    }

    fn query(&self) -> ListQuery {
        ListQuery {
            name: self.filters.name.clone(),
            tag: self.filters.tag.clone(),
            content_type: self.filters.content_type.clone(),
            start_date: self.filters.date_from,
            end_date: self.filters.date_to,
            page_number: Some(self.current_page),
            page_size: Some(self.page_size),
        }
    }

    /// Fetches the current page. On failure the view is cleared and the
    /// error handed back for the caller to report.
    pub async fn load(&mut self) -> Result<(), TransportError> {
        match self.api.list(&self.query()).await {
            Ok(page) => {
                self.total_count = page.total_count;
                self.total_pages = total_pages(page.total_count, self.page_size);
                self.rows = page.rows;
                Ok(())
            }
            Err(e) => {
                log::debug!("list request failed: {e}");
                self.rows.clear();
                self.total_count = 0;
                self.total_pages = 1;
                Err(e)
            }
        }
    }

    /// Replaces the filters and goes back to the first page.
    pub async fn set_filters(&mut self, filters: FilterCriteria) -> Result<(), TransportError> {
        self.filters = filters.normalized();
        self.current_page = 1;
        self.load().await
    }

    /// No-op outside [1, total_pages]; in range it refetches.
    pub async fn go_to_page(&mut self, page: u32) -> Result<(), TransportError> {
        if page < 1 || page > self.total_pages {
            return Ok(());
        }
        self.current_page = page;
        self.load().await
    }

    pub async fn next_page(&mut self) -> Result<(), TransportError> {
        if self.current_page >= self.total_pages {
            return Ok(());
        }
        self.current_page += 1;
        self.load().await
    }

    pub async fn previous_page(&mut self) -> Result<(), TransportError> {
        if self.current_page <= 1 {
            return Ok(());
        }
        self.current_page -= 1;
        self.load().await
    }

    pub fn rows(&self) -> &[StoredFile] {
        &self.rows
    }

    pub fn filters(&self) -> &FilterCriteria {
        &self.filters
    }

    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }
}
