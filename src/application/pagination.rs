//! Page-number pagination with an explicit clamping policy.
//!
//! The feed surfaces are forgiving about the `page` query parameter:
//! a missing or non-numeric value resolves to page 1, and a page past
//! the end resolves to the last populated page. An empty result set
//! still yields page 1 of 1 rather than an error.

/// Fixed page size for every feed surface.
pub const FEED_PAGE_SIZE: u32 = 10;

/// Interpret a raw `page` query parameter. Anything non-numeric or
/// below 1 falls back to page 1; numerics too large for `u32` saturate
/// so they clamp to the last page once the count is known.
pub fn parse_page_param(raw: Option<&str>) -> u32 {
    let Some(value) = raw.map(str::trim) else {
        return 1;
    };
    match value.parse::<u64>() {
        Ok(page) if page >= 1 => u32::try_from(page).unwrap_or(u32::MAX),
        Ok(_) => 1,
        // Digit strings that overflow still mean "far past the end".
        Err(_) if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) => u32::MAX,
        Err(_) => 1,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    page_size: u32,
}

/// Resolved window into a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageBounds {
    pub page_number: u32,
    pub num_pages: u32,
    pub offset: u64,
    pub limit: u32,
}

impl Paginator {
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size: page_size.max(1),
        }
    }

    pub fn num_pages(&self, total: u64) -> u32 {
        let size = u64::from(self.page_size);
        let pages = total.div_ceil(size).max(1);
        u32::try_from(pages).unwrap_or(u32::MAX)
    }

    /// Clamp a requested page number against the total and produce the
    /// corresponding query window.
    pub fn bounds(&self, total: u64, requested: u32) -> PageBounds {
        let num_pages = self.num_pages(total);
        let page_number = requested.clamp(1, num_pages);
        let offset = u64::from(page_number - 1) * u64::from(self.page_size);
        PageBounds {
            page_number,
            num_pages,
            offset,
            limit: self.page_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_garbage_page_param_resolves_to_one() {
        assert_eq!(parse_page_param(None), 1);
        assert_eq!(parse_page_param(Some("abc")), 1);
        assert_eq!(parse_page_param(Some("")), 1);
        assert_eq!(parse_page_param(Some("0")), 1);
        assert_eq!(parse_page_param(Some("-3")), 1);
        assert_eq!(parse_page_param(Some("7")), 7);
    }

    #[test]
    fn oversized_numeric_page_param_saturates() {
        assert_eq!(parse_page_param(Some("4294967296")), u32::MAX);
        assert_eq!(parse_page_param(Some("99999999999999999999")), u32::MAX);

        let paginator = Paginator::new(10);
        let bounds = paginator.bounds(25, parse_page_param(Some("4294967296")));
        assert_eq!(bounds.page_number, 3);
    }

    #[test]
    fn page_past_the_end_clamps_to_last_page() {
        let paginator = Paginator::new(10);
        let bounds = paginator.bounds(25, 999);
        assert_eq!(bounds.page_number, 3);
        assert_eq!(bounds.num_pages, 3);
        assert_eq!(bounds.offset, 20);
    }

    #[test]
    fn empty_result_set_yields_a_single_empty_page() {
        let paginator = Paginator::new(10);
        let bounds = paginator.bounds(0, 5);
        assert_eq!(bounds.page_number, 1);
        assert_eq!(bounds.num_pages, 1);
        assert_eq!(bounds.offset, 0);
    }

    #[test]
    fn exact_multiple_has_no_phantom_page() {
        let paginator = Paginator::new(10);
        assert_eq!(paginator.num_pages(30), 3);
        assert_eq!(paginator.bounds(30, 4).page_number, 3);
    }
}
