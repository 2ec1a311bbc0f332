use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

pub const MAX_PAGE_SIZE: i64 = 100;

/// Raw `page` / `limit` query values. Both arrive as strings and are parsed
/// by [`PaginationParams::resolve`] so malformed values produce a
/// field-level validation error instead of a generic query rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationParams {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PaginationParams {
    pub fn resolve(&self, default_limit: i64) -> AppResult<PageRequest> {
        let page = parse_bounded("page", self.page.as_deref(), 1, 1, i64::MAX)?;
        let limit = parse_bounded("limit", self.limit.as_deref(), default_limit, 1, MAX_PAGE_SIZE)?;
        Ok(PageRequest { page, limit })
    }
}

fn parse_bounded(field: &str, raw: Option<&str>, default: i64, min: i64, max: i64) -> AppResult<i64> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(default);
    };
    let value: i64 = raw
        .parse()
        .map_err(|_| AppError::invalid_field(field, format!("{field} must be an integer")))?;
    if value < min || value > max {
        let message = if max == i64::MAX {
            format!("{field} must be at least {min}")
        } else {
            format!("{field} must be between {min} and {max}")
        };
        return Err(AppError::invalid_field(field, message));
    }
    Ok(value)
}

impl PageRequest {
    pub fn new(page: i64, limit: i64) -> Self {
        Self { page: page.max(1), limit: limit.clamp(1, MAX_PAGE_SIZE) }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.limit
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub current_page: i64,
    pub total_pages: i64,
    pub total_count: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl PageInfo {
    pub fn new(total_count: i64, page: &PageRequest) -> Self {
        let total_pages = if total_count == 0 { 0 } else { (total_count + page.limit - 1) / page.limit };
        Self {
            current_page: page.page,
            total_pages,
            total_count,
            has_next_page: page.page < total_pages,
            has_prev_page: page.page > 1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T: Serialize> {
    pub items: Vec<T>,
    pub pagination: PageInfo,
}

impl<T: Serialize> Paginated<T> {
    pub fn new(items: Vec<T>, total_count: i64, page: &PageRequest) -> Self {
        Self {
            items,
            pagination: PageInfo::new(total_count, page),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(page: Option<&str>, limit: Option<&str>) -> PaginationParams {
        PaginationParams {
            page: page.map(String::from),
            limit: limit.map(String::from),
        }
    }

    #[test]
    fn defaults_apply_when_absent() {
        let page = params(None, None).resolve(20).unwrap();
        assert_eq!(page, PageRequest { page: 1, limit: 20 });
        assert_eq!(page.offset(), 0);
    }

    #[test]
    fn string_values_are_parsed() {
        let page = params(Some("3"), Some("10")).resolve(20).unwrap();
        assert_eq!(page.offset(), 20);
        assert_eq!(page.limit(), 10);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(params(Some("0"), None).resolve(20).is_err());
        assert!(params(None, Some("101")).resolve(20).is_err());
        assert!(params(None, Some("0")).resolve(20).is_err());
        assert!(params(Some("abc"), None).resolve(20).is_err());
    }

    #[test]
    fn page_info_flags() {
        let info = PageInfo::new(45, &PageRequest::new(2, 20));
        assert_eq!(info.total_pages, 3);
        assert!(info.has_next_page);
        assert!(info.has_prev_page);

        let last = PageInfo::new(45, &PageRequest::new(3, 20));
        assert!(!last.has_next_page);

        let empty = PageInfo::new(0, &PageRequest::new(1, 20));
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next_page);
        assert!(!empty.has_prev_page);
    }

    #[test]
    fn page_info_serializes_camel_case() {
        let value = serde_json::to_value(PageInfo::new(5, &PageRequest::new(1, 10))).unwrap();
        assert_eq!(value["currentPage"], 1);
        assert_eq!(value["totalCount"], 5);
        assert_eq!(value["hasPrevPage"], false);
    }
}
