use serde::Serialize;

/// One page of a listing. Pages are 1-based.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        let pages = self.total.div_ceil(u64::from(self.per_page));
        u32::try_from(pages).unwrap_or(u32::MAX)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }

    pub fn prev_num(&self) -> u32 {
        self.page.saturating_sub(1).max(1)
    }

    pub fn next_num(&self) -> u32 {
        self.page.saturating_add(1)
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

/// Run a `SELECT COUNT(*)` query.
pub fn count<P: rusqlite::Params>(
    conn: &rusqlite::Connection,
    sql: &str,
    params: P,
) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(u64::try_from(n).unwrap_or(0))
}

/// LIMIT/OFFSET for a 1-based page number. Page 0 is treated as page 1.
pub fn bounds(page: u32, per_page: u32) -> (u32, i64, i64) {
    let page = page.max(1);
    let offset = i64::from(page - 1) * i64::from(per_page);
    (page, i64::from(per_page), offset)
}
