//! Backend-specific SQL fragments for the repositories.

use crate::models::{Backend, QueryParam};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    backend: Backend,
}

impl Dialect {
    pub fn for_backend(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Pagination clause with two `?` placeholders; bind them with
    /// [`Dialect::page_params`].
    pub fn paginate(&self) -> &'static str {
        match self.backend {
            Backend::Mssql => "OFFSET ? ROWS FETCH NEXT ? ROWS ONLY",
            Backend::Mysql | Backend::Sqlite => "LIMIT ? OFFSET ?",
        }
    }

    /// Values for [`Dialect::paginate`], in placeholder order.
    pub fn page_params(&self, offset: i64, limit: i64) -> [QueryParam; 2] {
        match self.backend {
            Backend::Mssql => [QueryParam::Int(offset), QueryParam::Int(limit)],
            Backend::Mysql | Backend::Sqlite => [QueryParam::Int(limit), QueryParam::Int(offset)],
        }
    }

    /// Render `expr` as text so it can be matched with `LIKE`.
    pub fn cast_to_text(&self, expr: &str) -> String {
        match self.backend {
            Backend::Mssql => format!("CAST({} AS NVARCHAR(50))", expr),
            Backend::Mysql => format!("CAST({} AS CHAR)", expr),
            Backend::Sqlite => format!("CAST({} AS TEXT)", expr),
        }
    }

    /// `YYYY-MM-DD` text of a date or datetime column.
    pub fn date_to_text(&self, expr: &str) -> String {
        match self.backend {
            Backend::Mssql => format!("CONVERT(VARCHAR(10), {}, 23)", expr),
            Backend::Mysql => format!("DATE_FORMAT({}, '%Y-%m-%d')", expr),
            Backend::Sqlite => format!("strftime('%Y-%m-%d', {})", expr),
        }
    }

    /// Limit a `SELECT ...` to its first `n` rows.
    pub fn limit_rows(&self, select: &str, n: u32) -> String {
        let select = select.trim();
        match self.backend {
            Backend::Mssql => match select.get(..7) {
                Some(head) if head.eq_ignore_ascii_case("SELECT ") => {
                    format!("SELECT TOP {} {}", n, &select[7..])
                }
                _ => select.to_string(),
            },
            Backend::Mysql | Backend::Sqlite => format!("{} LIMIT {}", select, n),
        }
    }

    /// Limit a `SELECT ...` to a single row.
    pub fn first_row(&self, select: &str) -> String {
        self.limit_rows(select, 1)
    }
}
