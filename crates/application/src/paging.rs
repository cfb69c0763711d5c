//! 消息列表的分页参数归一化

/// 单页最多返回的条数
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_LIST_PAGE_SIZE: u32 = 50;
pub const DEFAULT_SEARCH_PAGE_SIZE: u32 = 20;
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

/// 页码从 1 开始
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// 缺省或非正的页码按第 1 页处理；页大小缺省或非正时取 `default_size`，超过上限时截断
    pub fn new(page: Option<i64>, page_size: Option<i64>, default_size: u32) -> Self {
        let page = match page {
            Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
            _ => 1,
        };
        Self {
            page,
            page_size: clamp_size(page_size, default_size),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

/// 历史消息条数：缺省或非正取 20，最多 100
pub fn history_limit(limit: Option<i64>) -> u32 {
    clamp_size(limit, DEFAULT_HISTORY_LIMIT)
}

fn clamp_size(size: Option<i64>, default_size: u32) -> u32 {
    match size {
        Some(n) if n > 0 => n.min(i64::from(MAX_PAGE_SIZE)) as u32,
        _ => default_size.min(MAX_PAGE_SIZE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_limit_defaults_and_clamps() {
        assert_eq!(history_limit(None), 20);
        assert_eq!(history_limit(Some(0)), 20);
        assert_eq!(history_limit(Some(-5)), 20);
        assert_eq!(history_limit(Some(1)), 1);
        assert_eq!(history_limit(Some(100)), 100);
        assert_eq!(history_limit(Some(101)), 100);
        assert_eq!(history_limit(Some(i64::MAX)), 100);
    }

    #[test]
    fn page_request_normalizes_input() {
        let page = PageRequest::new(None, None, DEFAULT_LIST_PAGE_SIZE);
        assert_eq!(page, PageRequest { page: 1, page_size: 50 });
        assert_eq!(page.offset(), 0);

        let page = PageRequest::new(Some(3), Some(500), DEFAULT_SEARCH_PAGE_SIZE);
        assert_eq!(page, PageRequest { page: 3, page_size: 100 });
        assert_eq!(page.offset(), 200);

        let page = PageRequest::new(Some(-1), Some(0), DEFAULT_SEARCH_PAGE_SIZE);
        assert_eq!(page, PageRequest { page: 1, page_size: 20 });
    }
}
