use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// A single row filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// `column = value`
    Eq { column: String, value: String },
    /// `column IN (values...)`
    In { column: String, values: Vec<String> },
}

impl Filter {

    /// Renders the filter as a query parameter pair, e.g. `("id", "eq.5")`
    pub fn to_param(&self) -> (String, String) {
        match self {
            Filter::Eq { column, value } => (column.clone(), format!("eq.{}", quote_value(value))),
            Filter::In { column, values } => {
                let list = values.iter().map(|v| quote_value(v)).join(",");
                (column.clone(), format!("in.({})", list))
            }
        }
    }

}

/// Sort order of a [`Query`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Describes a read over a named table. \
/// Built fluently and rendered into the query parameters the REST endpoint understands:
/// ```
/// use crymaps::query::Query;
///
/// let query = Query::from("cry_locs")
///     .order("created_at", false)
///     .limit(20);
/// assert_eq!(query.to_params(), vec![
///     ("select".to_string(), "*".to_string()),
///     ("order".to_string(), "created_at.desc".to_string()),
///     ("limit".to_string(), "20".to_string()),
/// ]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
    /// Expect exactly one row back
    pub single: bool,
}

impl Query {

    /// Starts a query selecting all columns of `table`
    pub fn from(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: "*".to_string(),
            filters: vec![],
            order: None,
            limit: None,
            single: false,
        }
    }

    /// Restricts the returned columns, e.g. `"profile_picture_url, name"`
    pub fn select(mut self, columns: &str) -> Self {
        self.columns = columns.split(',').map(str::trim).filter(|c| !c.is_empty()).join(",");
        self
    }

    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.filters.push(Filter::Eq { column: column.to_string(), value: value.to_string() });
        self
    }

    pub fn in_<I, V>(mut self, column: &str, values: I) -> Self
        where
            I: IntoIterator<Item = V>,
            V: ToString,
    {
        self.filters.push(Filter::In {
            column: column.to_string(),
            values: values.into_iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order { column: column.to_string(), ascending });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Renders the query parameters (excluding the table, which is part of the path)
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        params.extend(self.filters.iter().map(Filter::to_param));
        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

}

/// Quotes a filter value if it contains characters reserved by the filter syntax
fn quote_value(value: &str) -> String {
    let reserved = value.is_empty()
        || value.chars().any(|c| matches!(c, ',' | '(' | ')' | '"' | '\\') || c.is_whitespace());
    if !reserved {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}
