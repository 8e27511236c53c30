//! Page selection mini-language: `"1,3-5,2"`.
//!
//! Tokens are comma separated, each a page number `N` or an inclusive range
//! `A-B` with `A <= B`. Pages are 1-based. Order and repetition are kept, so
//! `"3,1,1"` selects page 3, then page 1 twice.

use crate::error::JobError;

/// Upper bound on how many pages one selection may expand to.
pub const MAX_SELECTED_PAGES: usize = 100_000;

/// Parses a page selection. With `page_count`, every page must be within it.
pub fn parse_page_ranges(
    selection: &str,
    page_count: Option<u32>,
) -> Result<Vec<u32>, JobError> {
    let mut pages = Vec::new();

    for raw in selection.split(',') {
        let token = raw.trim();
        if token.is_empty() {
            return Err(JobError::InvalidPageRange(format!(
                "empty token in '{}'",
                selection
            )));
        }

        let (start, end) = match token.split_once('-') {
            Some((a, b)) => (parse_page(a.trim(), token)?, parse_page(b.trim(), token)?),
            None => {
                let page = parse_page(token, token)?;
                (page, page)
            }
        };

        if start > end {
            return Err(JobError::InvalidPageRange(format!(
                "range '{}' is descending",
                token
            )));
        }

        if let Some(count) = page_count {
            if end > count {
                return Err(JobError::PageOutOfRange {
                    page: if start > count { start } else { count + 1 },
                    page_count: count,
                });
            }
        }

        let span = (end - start) as usize + 1;
        if pages.len() + span > MAX_SELECTED_PAGES {
            return Err(JobError::InvalidPageRange(format!(
                "selection expands to more than {} pages",
                MAX_SELECTED_PAGES
            )));
        }
        pages.extend(start..=end);
    }

    Ok(pages)
}

fn parse_page(text: &str, token: &str) -> Result<u32, JobError> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(JobError::InvalidPageRange(format!(
            "'{}' is not a page number or range",
            token
        )));
    }
    match text.parse::<u32>() {
        Ok(0) => Err(JobError::InvalidPageRange(format!(
            "page numbers start at 1, got '{}'",
            token
        ))),
        Ok(page) => Ok(page),
        Err(_) => Err(JobError::InvalidPageRange(format!(
            "page number '{}' is too large",
            text
        ))),
    }
}
