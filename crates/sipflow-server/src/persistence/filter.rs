//! Column filter, sort and page builder shared by list queries
//!
//! A [`Filter`] is instantiated per entity with a static registry of sortable
//! fields. Predicates are collected through typed helpers and rendered into
//! two independent queries by [`Filter::apply`]: the page query (with
//! `LIMIT`/`OFFSET`) and the whole query counting every matching row, so list
//! operations describe their predicates once.
//!
//! ```rust,ignore
//! let mut f = Filter::new(SIP_SORTABLE_FIELDS);
//! f.equals("sips.status", Some(&SipStatus::Queued))
//!     .order_by(&Sort::new().add_col("created_at", true))
//!     .page(10, 20);
//! let (page, whole) = f.apply(SIP_SELECT);
//! ```

use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::models::{BatchStatus, SipStatus, TaskStatus, WorkflowStatus, WorkflowType};
use crate::timerange::Range;

use super::encode_time;

/// Page size used when a caller asks for zero items.
pub const DEFAULT_PAGE_SIZE: i64 = 20;

/// Upper bound on any page.
pub const MAX_PAGE_SIZE: i64 = 50_000;

/// A sortable field exposed to callers, mapped to its SQL column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortableField {
    pub column: &'static str,
    pub default: bool,
}

impl SortableField {
    pub const fn column(column: &'static str) -> Self {
        Self {
            column,
            default: false,
        }
    }

    pub const fn default_column(column: &'static str) -> Self {
        Self {
            column,
            default: true,
        }
    }
}

/// Registry of `(public name, field)` pairs.
pub type SortableFields = &'static [(&'static str, SortableField)];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortColumn {
    pub name: String,
    pub desc: bool,
}

/// Requested ordering, by public field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort(Vec<SortColumn>);

impl Sort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_col(mut self, name: impl Into<String>, desc: bool) -> Self {
        self.0.push(SortColumn {
            name: name.into(),
            desc,
        });
        self
    }

    /// Parse `"name,-created_at"`; a leading `-` sorts descending.
    pub fn parse(fields: &str) -> Self {
        fields
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .fold(Self::new(), |sort, col| match col.strip_prefix('-') {
                Some(name) => sort.add_col(name, true),
                None => sort.add_col(col, false),
            })
    }

    pub fn columns(&self) -> &[SortColumn] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Bind value of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
}

/// Types usable in equality and membership predicates.
pub trait FilterValue {
    /// Values failing validation are skipped instead of filtered on.
    fn is_valid(&self) -> bool {
        true
    }

    fn to_value(&self) -> Value;
}

impl FilterValue for Uuid {
    fn is_valid(&self) -> bool {
        !self.is_nil()
    }

    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl FilterValue for i64 {
    fn to_value(&self) -> Value {
        Value::Int(*self)
    }
}

impl FilterValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl FilterValue for &str {
    fn to_value(&self) -> Value {
        Value::Text((*self).to_string())
    }
}

impl FilterValue for SipStatus {
    fn to_value(&self) -> Value {
        Value::Text(self.as_str().to_string())
    }
}

impl FilterValue for BatchStatus {
    fn to_value(&self) -> Value {
        Value::Text(self.as_str().to_string())
    }
}

impl FilterValue for WorkflowType {
    fn to_value(&self) -> Value {
        Value::Text(self.as_str().to_string())
    }
}

impl FilterValue for WorkflowStatus {
    fn is_valid(&self) -> bool {
        *self != WorkflowStatus::Unspecified
    }

    fn to_value(&self) -> Value {
        Value::Text(self.as_str().to_string())
    }
}

impl FilterValue for TaskStatus {
    fn is_valid(&self) -> bool {
        *self != TaskStatus::Unspecified
    }

    fn to_value(&self) -> Value {
        Value::Text(self.as_str().to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Eq(&'static str, Value),
    In(&'static str, Vec<Value>),
    Gte(&'static str, Value),
    Lt(&'static str, Value),
    Like(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct Filter {
    sortable: SortableFields,
    predicates: Vec<Predicate>,
    orders: Vec<(&'static str, bool)>,
    limit: i64,
    offset: i64,
}

impl Filter {
    /// # Panics
    ///
    /// Panics when `sortable` is empty.
    pub fn new(sortable: SortableFields) -> Self {
        if sortable.is_empty() {
            panic!("filter: sortable fields registry must not be empty");
        }
        Self {
            sortable,
            predicates: Vec::new(),
            orders: Vec::new(),
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }

    /// Append the requested columns; unknown names are dropped and a repeated
    /// column keeps its first position with the last direction.
    pub fn order_by(&mut self, sort: &Sort) -> &mut Self {
        for col in sort.columns() {
            let Some(field) = self.field(&col.name) else {
                continue;
            };
            match self.orders.iter_mut().find(|(c, _)| *c == field.column) {
                Some(existing) => existing.1 = col.desc,
                None => self.orders.push((field.column, col.desc)),
            }
        }
        self
    }

    pub fn page(&mut self, limit: i64, offset: i64) -> &mut Self {
        self.limit = match limit {
            0 => DEFAULT_PAGE_SIZE,
            l if l < 0 || l > MAX_PAGE_SIZE => MAX_PAGE_SIZE,
            l => l,
        };
        self.offset = offset.max(0);
        self
    }

    pub fn equals<T: FilterValue>(&mut self, column: &'static str, value: Option<&T>) -> &mut Self {
        if let Some(v) = value.filter(|v| v.is_valid()) {
            self.predicates.push(Predicate::Eq(column, v.to_value()));
        }
        self
    }

    pub fn in_values<T: FilterValue>(&mut self, column: &'static str, values: &[T]) -> &mut Self {
        let values: Vec<Value> = values
            .iter()
            .filter(|v| v.is_valid())
            .map(FilterValue::to_value)
            .collect();
        if !values.is_empty() {
            self.predicates.push(Predicate::In(column, values));
        }
        self
    }

    /// Substring match; empty needles add nothing.
    pub fn contains(&mut self, column: &'static str, needle: Option<&str>) -> &mut Self {
        if let Some(needle) = needle.filter(|n| !n.is_empty()) {
            self.predicates
                .push(Predicate::Like(column, format!("%{}%", escape_like(needle))));
        }
        self
    }

    pub fn add_date_range(&mut self, column: &'static str, range: Option<&Range>) -> &mut Self {
        let Some(range) = range.filter(|r| !r.is_zero()) else {
            return self;
        };
        if range.is_instant() {
            self.predicates
                .push(Predicate::Eq(column, Value::Text(encode_time(&range.start))));
        } else {
            self.predicates
                .push(Predicate::Gte(column, Value::Text(encode_time(&range.start))));
            self.predicates
                .push(Predicate::Lt(column, Value::Text(encode_time(&range.end))));
        }
        self
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Render the page query and the whole-set count query over `select`.
    ///
    /// # Panics
    ///
    /// Panics when the registry has no default field.
    pub fn apply(
        &self,
        select: &str,
    ) -> (QueryBuilder<'static, Sqlite>, QueryBuilder<'static, Sqlite>) {
        let default = self
            .sortable
            .iter()
            .find(|(_, f)| f.default)
            .map(|(_, f)| f.column)
            .unwrap_or_else(|| panic!("filter: no default sortable field registered"));

        let mut page = QueryBuilder::new(select);
        self.push_predicates(&mut page);
        page.push(" ORDER BY ");
        if self.orders.is_empty() {
            page.push(default).push(" ASC");
        } else {
            for (i, (column, desc)) in self.orders.iter().enumerate() {
                if i > 0 {
                    page.push(", ");
                }
                page.push(column).push(if *desc { " DESC" } else { " ASC" });
            }
        }
        page.push(" LIMIT ").push_bind(self.limit);
        page.push(" OFFSET ").push_bind(self.offset);

        let mut whole = QueryBuilder::new("SELECT COUNT(*) FROM (");
        whole.push(select);
        self.push_predicates(&mut whole);
        whole.push(")");

        (page, whole)
    }

    fn field(&self, name: &str) -> Option<SortableField> {
        self.sortable
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, f)| *f)
    }

    fn push_predicates(&self, qb: &mut QueryBuilder<'static, Sqlite>) {
        for (i, predicate) in self.predicates.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            match predicate {
                Predicate::Eq(column, value) => {
                    qb.push(column).push(" = ");
                    push_value(qb, value);
                },
                Predicate::Gte(column, value) => {
                    qb.push(column).push(" >= ");
                    push_value(qb, value);
                },
                Predicate::Lt(column, value) => {
                    qb.push(column).push(" < ");
                    push_value(qb, value);
                },
                Predicate::Like(column, pattern) => {
                    qb.push(column).push(" LIKE ");
                    qb.push_bind(pattern.clone()).push(" ESCAPE '\\'");
                },
                Predicate::In(column, values) => {
                    qb.push(column).push(" IN (");
                    {
                        let mut list = qb.separated(", ");
                        for value in values {
                            match value {
                                Value::Text(s) => list.push_bind(s.clone()),
                                Value::Int(n) => list.push_bind(*n),
                            };
                        }
                    }
                    qb.push(")");
                },
            }
        }
    }
}

fn push_value(qb: &mut QueryBuilder<'static, Sqlite>, value: &Value) {
    match value {
        Value::Text(s) => qb.push_bind(s.clone()),
        Value::Int(n) => qb.push_bind(*n),
    };
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
