//! Page/limit handling shared by every paginated listing.

use anyhow::Result;
use rusqlite::{Connection, Row, ToSql};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;

/// Raw `page`/`limit` query parameters. Kept as strings so that garbage input
/// reaches [`PageParams::from_query`] instead of failing extraction.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: u32,
    pub limit: u32,
}

impl Default for PageParams {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl PageParams {
    /// Non-numeric, zero or negative values fall back to the defaults. Limits
    /// above [`MAX_LIMIT`] are clamped.
    pub fn from_query(page: Option<&str>, limit: Option<&str>) -> Self {
        Self {
            page: coerce(page, DEFAULT_PAGE),
            limit: coerce(limit, DEFAULT_LIMIT).min(MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> i64 {
        (i64::from(self.page.max(1)) - 1).saturating_mul(i64::from(self.limit))
    }
}

impl From<&PageQuery> for PageParams {
    fn from(query: &PageQuery) -> Self {
        Self::from_query(query.page.as_deref(), query.limit.as_deref())
    }
}

fn coerce(raw: Option<&str>, default: u32) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_items: i64,
    pub total_pages: i64,
    pub current_page: u32,
    pub limit: u32,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total_items: i64, params: PageParams) -> Self {
        let limit = i64::from(params.limit);
        let total_pages = (total_items + limit - 1) / limit;
        Self {
            items,
            total_items,
            total_pages,
            current_page: params.page,
            limit: params.limit,
            has_next_page: i64::from(params.page) < total_pages,
            has_prev_page: params.page > 1,
        }
    }
}

/// Runs `select` twice: once wrapped in `COUNT(*)` for the total, once with
/// `ORDER BY`, `LIMIT` and `OFFSET` appended for the requested page.
///
/// `select` must use numbered placeholders (`?1`, `?2`, ...) for `params`;
/// the limit and offset are bound after them. `order_by` should end in a
/// unique column so pages never overlap.
pub fn paginate<T, F>(
    conn: &Connection,
    select: &str,
    order_by: &str,
    params: &[&dyn ToSql],
    page: PageParams,
    mut map: F,
) -> Result<Page<T>>
where
    F: FnMut(&Row<'_>) -> Result<T>,
{
    let total_items: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM ({select})"),
        params,
        |row| row.get(0),
    )?;

    let limit = i64::from(page.limit);
    let offset = page.offset();
    let sql = format!(
        "{select} ORDER BY {order_by} LIMIT ?{} OFFSET ?{}",
        params.len() + 1,
        params.len() + 2
    );
    let mut bound: Vec<&dyn ToSql> = params.to_vec();
    bound.push(&limit);
    bound.push(&offset);

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(bound.as_slice())?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(map(row)?);
    }

    Ok(Page::new(items, total_items, page))
}
