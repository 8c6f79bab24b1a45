use chrono::{DateTime, NaiveDate};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;

/// Row predicate, encodable as a PostgREST parameter and evaluable against a JSON row.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    IsNull(String),
    NotNull(String),
    In(String, Vec<Value>),
    Or(Vec<Filter>),
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl Filter {
    pub fn eq(column: &str, value: impl Serialize) -> Self {
        Filter::Eq(column.to_string(), to_value(value))
    }

    /// PostgREST `(column, operator.value)` pair; `Or` renders as `("or", "(a.eq.1,b.is.null)")`.
    pub fn to_param(&self) -> (String, String) {
        match self {
            Filter::Or(filters) => {
                let inner: Vec<String> = filters.iter().map(Filter::to_inline).collect();
                ("or".to_string(), format!("({})", inner.join(",")))
            }
            _ => {
                let (column, op) = self.column_and_op();
                (column.to_string(), op)
            }
        }
    }

    fn to_inline(&self) -> String {
        match self {
            Filter::Or(filters) => {
                let inner: Vec<String> = filters.iter().map(Filter::to_inline).collect();
                format!("or({})", inner.join(","))
            }
            _ => {
                let (column, op) = self.column_and_op();
                format!("{column}.{op}")
            }
        }
    }

    fn column_and_op(&self) -> (&str, String) {
        match self {
            Filter::Eq(c, v) => (c, format!("eq.{}", render(v))),
            Filter::Neq(c, v) => (c, format!("neq.{}", render(v))),
            Filter::Lt(c, v) => (c, format!("lt.{}", render(v))),
            Filter::Lte(c, v) => (c, format!("lte.{}", render(v))),
            Filter::Gt(c, v) => (c, format!("gt.{}", render(v))),
            Filter::Gte(c, v) => (c, format!("gte.{}", render(v))),
            Filter::IsNull(c) => (c, "is.null".to_string()),
            Filter::NotNull(c) => (c, "not.is.null".to_string()),
            Filter::In(c, values) => {
                let items: Vec<String> = values.iter().map(render).collect();
                (c, format!("in.({})", items.join(",")))
            }
            Filter::Or(_) => ("or", String::new()),
        }
    }

    pub fn matches(&self, row: &Value) -> bool {
        let field = |column: &str| cell(row, column);
        match self {
            Filter::Eq(c, v) => compare(field(c), v) == Some(Ordering::Equal),
            Filter::Neq(c, v) => {
                let cell = field(c);
                !cell.is_null() && compare(cell, v) != Some(Ordering::Equal)
            }
            Filter::Lt(c, v) => compare(field(c), v) == Some(Ordering::Less),
            Filter::Lte(c, v) => matches!(
                compare(field(c), v),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::Gt(c, v) => compare(field(c), v) == Some(Ordering::Greater),
            Filter::Gte(c, v) => matches!(
                compare(field(c), v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::IsNull(c) => field(c).is_null(),
            Filter::NotNull(c) => !field(c).is_null(),
            Filter::In(c, values) => {
                let cell = field(c);
                values
                    .iter()
                    .any(|v| compare(cell, v) == Some(Ordering::Equal))
            }
            Filter::Or(filters) => filters.iter().any(|f| f.matches(row)),
        }
    }
}

fn cell<'a>(row: &'a Value, column: &str) -> &'a Value {
    row.get(column).unwrap_or(&Value::Null)
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Orders two cells the way the database would: instants, then dates, then numbers,
/// then text. `None` when either side is null or the kinds are incomparable.
pub(crate) fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(compare_text(x, y)),
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        (Value::String(x), Value::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        _ => (a == b).then_some(Ordering::Equal),
    }
}

fn compare_text(x: &str, y: &str) -> Ordering {
    if let (Some(dx), Some(dy)) = (parse_instant(x), parse_instant(y)) {
        return dx.cmp(&dy);
    }
    if let (Ok(dx), Ok(dy)) = (
        NaiveDate::parse_from_str(x, "%Y-%m-%d"),
        NaiveDate::parse_from_str(y, "%Y-%m-%d"),
    ) {
        return dx.cmp(&dy);
    }
    x.cmp(y)
}

fn parse_instant(s: &str) -> Option<DateTime<chrono::FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    fn to_param(&self) -> String {
        let dir = if self.ascending { "asc" } else { "desc" };
        format!("{}.{dir}", self.column)
    }

    /// Nulls sort last ascending and first descending, as in Postgres.
    pub(crate) fn cmp_rows(&self, a: &Value, b: &Value) -> Ordering {
        let x = cell(a, &self.column);
        let y = cell(b, &self.column);
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare(x, y).unwrap_or(Ordering::Equal),
        };
        if self.ascending { ord } else { ord.reverse() }
    }
}

/// A filtered read (or the target of an update/delete) against one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: Option<String>,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(table: &str) -> Self {
        Self {
            table: table.to_string(),
            columns: None,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    #[must_use]
    pub fn select(mut self, columns: &str) -> Self {
        self.columns = Some(columns.to_string());
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn eq(self, column: &str, value: impl Serialize) -> Self {
        self.filter(Filter::Eq(column.to_string(), to_value(value)))
    }

    #[must_use]
    pub fn neq(self, column: &str, value: impl Serialize) -> Self {
        self.filter(Filter::Neq(column.to_string(), to_value(value)))
    }

    #[must_use]
    pub fn lt(self, column: &str, value: impl Serialize) -> Self {
        self.filter(Filter::Lt(column.to_string(), to_value(value)))
    }

    #[must_use]
    pub fn lte(self, column: &str, value: impl Serialize) -> Self {
        self.filter(Filter::Lte(column.to_string(), to_value(value)))
    }

    #[must_use]
    pub fn gt(self, column: &str, value: impl Serialize) -> Self {
        self.filter(Filter::Gt(column.to_string(), to_value(value)))
    }

    #[must_use]
    pub fn gte(self, column: &str, value: impl Serialize) -> Self {
        self.filter(Filter::Gte(column.to_string(), to_value(value)))
    }

    #[must_use]
    pub fn is_null(self, column: &str) -> Self {
        self.filter(Filter::IsNull(column.to_string()))
    }

    #[must_use]
    pub fn not_null(self, column: &str) -> Self {
        self.filter(Filter::NotNull(column.to_string()))
    }

    #[must_use]
    pub fn in_list<T: Serialize>(self, column: &str, values: impl IntoIterator<Item = T>) -> Self {
        let values = values.into_iter().map(to_value).collect();
        self.filter(Filter::In(column.to_string(), values))
    }

    #[must_use]
    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Query-string pairs for `GET /rest/v1/<table>`.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![(
            "select".to_string(),
            self.columns.clone().unwrap_or_else(|| "*".to_string()),
        )];
        params.extend(self.filters.iter().map(Filter::to_param));
        if !self.order.is_empty() {
            let order: Vec<String> = self.order.iter().map(Order::to_param).collect();
            params.push(("order".to_string(), order.join(",")));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// Filter-only pairs, for PATCH and DELETE.
    pub fn filter_params(&self) -> Vec<(String, String)> {
        self.filters.iter().map(Filter::to_param).collect()
    }

    /// Applies filters, ordering and limit to an in-memory table.
    pub(crate) fn apply<'a>(&self, rows: impl IntoIterator<Item = &'a Value>) -> Vec<Value> {
        let mut out: Vec<Value> = rows
            .into_iter()
            .filter(|row| self.matches(row))
            .cloned()
            .collect();
        if !self.order.is_empty() {
            out.sort_by(|a, b| {
                self.order
                    .iter()
                    .map(|o| o.cmp_rows(a, b))
                    .find(|ord| ord.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
        }
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}
