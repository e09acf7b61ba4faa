//! Emergency history query filters.

use chrono::{DateTime, Utc};

use super::EmergencyStatus;
use crate::domain::EmergencyType;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Filters and pagination for a user's emergency history.
#[derive(Debug, Clone)]
pub struct HistoryFilters {
    pub user_id: String,
    pub status: Option<EmergencyStatus>,
    pub emergency_type: Option<EmergencyType>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// 1-based.
    pub page: u32,
    pub page_size: u32,
}

impl HistoryFilters {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            status: None,
            emergency_type: None,
            start_date: None,
            end_date: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_status(mut self, status: EmergencyStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_type(mut self, emergency_type: EmergencyType) -> Self {
        self.emergency_type = Some(emergency_type);
        self
    }

    pub fn between(mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    /// Out of range values fall back to page 1 / the default page size.
    pub fn with_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = if page == 0 { 1 } else { page };
        self.page_size = if page_size == 0 || page_size > MAX_PAGE_SIZE {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };
        self
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.page_size)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.page_size)
    }
}
