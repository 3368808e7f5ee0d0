//! Page-number pagination with per-resource request counting.

use tracing::{debug, info};

/// Walks `page = base_page, base_page + 1, ...` until an empty page or
/// `maximum_page`.
///
/// Rate limiting is not applied here; it happens per response in the
/// interceptor.
#[derive(Debug, Clone)]
pub struct PagePaginator {
    resource_name: String,
    page: u32,
    maximum_page: Option<u32>,
    done: bool,
    resource_requests: u64,
}

impl PagePaginator {
    pub fn new(resource_name: impl Into<String>, base_page: u32, maximum_page: Option<u32>) -> Self {
        let resource_name = resource_name.into();
        debug!("Paginator initialized for resource: {}", resource_name);
        Self {
            resource_name,
            page: base_page,
            maximum_page,
            done: false,
            resource_requests: 0,
        }
    }

    /// Page to request next, or `None` when pagination is finished.
    pub fn next_page(&mut self) -> Option<u32> {
        if self.done || self.maximum_page.is_some_and(|max| self.page > max) {
            return None;
        }

        self.resource_requests += 1;
        debug!(
            "Request prepared for {}: total_requests={}",
            self.resource_name, self.resource_requests
        );
        if self.resource_requests % 10 == 0 {
            info!(
                "Resource '{}' progress: {} requests made",
                self.resource_name, self.resource_requests
            );
        }
        Some(self.page)
    }

    /// Advance after a page with `records` records came back.
    pub fn update(&mut self, records: usize) {
        if records == 0 {
            self.done = true;
        } else {
            self.page += 1;
        }
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    /// Pages requested for this resource.
    pub fn resource_requests(&self) -> u64 {
        self.resource_requests
    }
}
