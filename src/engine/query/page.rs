use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One engine's page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total_count: i64,
    pub page: i64,
    pub page_size: i64,
    pub request_time_in_milliseconds: u64,
    pub total_pages: i64,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

impl<T> PaginatedResult<T> {
    pub fn new(items: Vec<T>, total_count: i64, page: i64, page_size: i64, elapsed: Duration) -> Self {
        let total_pages = if page_size <= 0 {
            0
        } else {
            (total_count.max(0) + page_size - 1) / page_size
        };
        Self {
            items,
            total_count,
            page,
            page_size,
            request_time_in_milliseconds: elapsed.as_millis() as u64,
            total_pages,
            has_next_page: page < total_pages,
            has_previous_page: page > 1,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PaginatedResult<U> {
        PaginatedResult {
            items: self.items.into_iter().map(f).collect(),
            total_count: self.total_count,
            page: self.page,
            page_size: self.page_size,
            request_time_in_milliseconds: self.request_time_in_milliseconds,
            total_pages: self.total_pages,
            has_next_page: self.has_next_page,
            has_previous_page: self.has_previous_page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(45, 20, 3, 3, false, true ; "last of three")]
    #[test_case(45, 20, 1, 3, true, false ; "first of three")]
    #[test_case(40, 20, 2, 2, false, true ; "exact multiple")]
    #[test_case(0, 20, 1, 0, false, false ; "empty")]
    #[test_case(45, 0, 1, 0, false, false ; "zero page size")]
    #[test_case(45, -5, 2, 0, false, true ; "negative page size")]
    fn test_page_math(total: i64, size: i64, page: i64, pages: i64, next: bool, prev: bool) {
        let r: PaginatedResult<()> = PaginatedResult::new(vec![], total, page, size, Duration::ZERO);
        assert_eq!(r.total_pages, pages);
        assert_eq!(r.has_next_page, next);
        assert_eq!(r.has_previous_page, prev);
    }

    #[test]
    fn test_serialized_names() {
        let r = PaginatedResult::new(vec![1], 1, 1, 20, Duration::from_millis(7));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["totalCount"], 1);
        assert_eq!(v["requestTimeInMilliseconds"], 7);
        assert_eq!(v["hasNextPage"], false);
    }
}
