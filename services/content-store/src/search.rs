//! Search filters compiled to parameterized catalog queries.
//!
//! A [`Filter`] becomes a list of [`Predicate`]s, each naming a fixed column
//! and carrying its values. Compilation only ever appends column names and
//! operators to the SQL text; every user value goes through a bind
//! parameter.

use crate::model::TagSet;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

/// Page size used when the caller gives none.
pub const DEFAULT_PAGE_SIZE: u64 = 25;

/// Columns of the `Contents` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    ContentId,
    Data,
    Extension,
    Mime,
    Name,
    Size,
    Tags,
    Time,
}

impl Column {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::ContentId => "ContentId",
            Self::Data => "Data",
            Self::Extension => "Extension",
            Self::Mime => "Mime",
            Self::Name => "Name",
            Self::Size => "Size",
            Self::Tags => "Tags",
            Self::Time => "Time",
        }
    }
}

/// One search condition over a fixed column.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Inclusive range
    Between(Column, i64, i64),
    AtLeast(Column, i64),
    AtMost(Column, i64),
    /// Case-sensitive substring match
    Contains(Column, String),
    /// Tag is one of the delimiter-separated tokens of the `Tags` column
    HasTag(String),
    Equals(Column, String),
}

impl Predicate {
    fn push_to(&self, builder: &mut QueryBuilder<'static, Sqlite>) {
        match self {
            Self::Between(column, low, high) => {
                builder.push(column.as_sql()).push(" BETWEEN ");
                builder.push_bind(*low).push(" AND ").push_bind(*high);
            }
            Self::AtLeast(column, bound) => {
                builder.push(column.as_sql()).push(" >= ").push_bind(*bound);
            }
            Self::AtMost(column, bound) => {
                builder.push(column.as_sql()).push(" <= ").push_bind(*bound);
            }
            Self::Contains(column, needle) => {
                builder
                    .push(column.as_sql())
                    .push(" LIKE ")
                    .push_bind(format!("%{}%", escape_like(needle)))
                    .push(r" ESCAPE '\'");
            }
            Self::HasTag(tag) => {
                builder
                    .push("',' || ")
                    .push(Column::Tags.as_sql())
                    .push(r" || ',' LIKE ")
                    .push_bind(format!("%,{},%", escape_like(tag)))
                    .push(r" ESCAPE '\'");
            }
            Self::Equals(column, value) => {
                builder.push(column.as_sql()).push(" = ").push_bind(value.clone());
            }
        }
    }
}

/// Escape LIKE wildcards so the value matches literally under `ESCAPE '\'`.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Primary sort column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Size,
    #[default]
    Time,
    Uuid,
}

impl SortKey {
    /// Composite key ending in the content id, giving a total order.
    pub fn columns(self) -> &'static [Column] {
        match self {
            Self::Name => &[Column::Name, Column::Time, Column::Size, Column::ContentId],
            Self::Size => &[Column::Size, Column::Time, Column::Name, Column::ContentId],
            Self::Time => &[Column::Time, Column::Name, Column::Size, Column::ContentId],
            Self::Uuid => &[Column::ContentId],
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "name" => Some(Self::Name),
            "size" => Some(Self::Size),
            "time" => Some(Self::Time),
            "uuid" => Some(Self::Uuid),
            _ => None,
        }
    }
}

/// Sort direction, applied to every column of the composite key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    Ascending,
    #[default]
    Descending,
}

impl Order {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ascending" => Some(Self::Ascending),
            "descending" => Some(Self::Descending),
            _ => None,
        }
    }
}

/// Page selection. A missing or zero `count` returns every match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub count: Option<u64>,
    /// Zero-based page index
    pub page: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            count: Some(DEFAULT_PAGE_SIZE),
            page: 0,
        }
    }
}

impl Pagination {
    pub fn new(count: u64, page: u64) -> Self {
        Self {
            count: Some(count),
            page,
        }
    }

    /// Every match, no slicing.
    pub fn unbounded() -> Self {
        Self {
            count: None,
            page: 0,
        }
    }

    /// `(limit, offset)` when results are sliced.
    pub fn limit_offset(&self) -> Option<(i64, i64)> {
        let count = self.count.filter(|c| *c > 0)?;
        let limit = i64::try_from(count).unwrap_or(i64::MAX);
        let offset = i64::try_from(count.saturating_mul(self.page)).unwrap_or(i64::MAX);
        Some((limit, offset))
    }
}

/// Search conditions over the catalog.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub begin: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Smallest size in bytes
    pub minimum: Option<u64>,
    /// Largest size in bytes
    pub maximum: Option<u64>,
    pub name: Option<String>,
    pub extension: Option<String>,
    pub mime: Option<String>,
    pub tags: Option<TagSet>,
    pub uuid: Option<Uuid>,
    /// Join predicates with OR instead of AND
    pub loose: bool,
    pub sort: SortKey,
    pub order: Order,
}

fn range(column: Column, low: Option<i64>, high: Option<i64>) -> Option<Predicate> {
    match (low, high) {
        (Some(low), Some(high)) => Some(Predicate::Between(column, low, high)),
        (Some(low), None) => Some(Predicate::AtLeast(column, low)),
        (None, Some(high)) => Some(Predicate::AtMost(column, high)),
        (None, None) => None,
    }
}

fn size_bound(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

impl Filter {
    /// Predicates for every present field.
    pub fn predicates(&self) -> Vec<Predicate> {
        let mut predicates = Vec::new();

        predicates.extend(range(
            Column::Time,
            self.begin.map(|t| t.timestamp_millis()),
            self.end.map(|t| t.timestamp_millis()),
        ));
        predicates.extend(range(
            Column::Size,
            self.minimum.map(size_bound),
            self.maximum.map(size_bound),
        ));

        if let Some(name) = &self.name {
            predicates.push(Predicate::Contains(Column::Name, name.clone()));
        }
        if let Some(extension) = &self.extension {
            predicates.push(Predicate::Contains(Column::Extension, extension.clone()));
        }
        if let Some(mime) = &self.mime {
            predicates.push(Predicate::Contains(Column::Mime, mime.clone()));
        }
        if let Some(tags) = &self.tags {
            predicates.extend(tags.iter().map(|tag| Predicate::HasTag(tag.to_string())));
        }
        if let Some(uuid) = self.uuid {
            predicates.push(Predicate::Equals(Column::ContentId, uuid.to_string()));
        }

        predicates
    }

    /// Compile to a `SELECT ContentId` query with ordering and pagination.
    pub fn compile(&self, pagination: Pagination) -> QueryBuilder<'static, Sqlite> {
        let mut builder = QueryBuilder::new("SELECT ContentId FROM Contents");

        let predicates = self.predicates();
        if !predicates.is_empty() {
            let joint = if self.loose { " OR " } else { " AND " };
            builder.push(" WHERE ");
            for (i, predicate) in predicates.iter().enumerate() {
                if i > 0 {
                    builder.push(joint);
                }
                builder.push("(");
                predicate.push_to(&mut builder);
                builder.push(")");
            }
        }

        let direction = self.order.as_sql();
        let arrangement = self
            .sort
            .columns()
            .iter()
            .map(|column| format!("{} {direction}", column.as_sql()))
            .collect::<Vec<_>>()
            .join(", ");
        builder.push(" ORDER BY ").push(arrangement);

        if let Some((limit, offset)) = pagination.limit_offset() {
            builder.push(" LIMIT ").push_bind(limit);
            builder.push(" OFFSET ").push_bind(offset);
        }

        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let builder = Filter::default().compile(Pagination::default());
        assert_eq!(
            builder.sql(),
            "SELECT ContentId FROM Contents ORDER BY Time DESC, Name DESC, Size DESC, ContentId DESC LIMIT ? OFFSET ?"
        );
    }

    #[test]
    fn test_time_range_predicates() {
        let begin = DateTime::<Utc>::from_timestamp_millis(1_000).unwrap();
        let end = DateTime::<Utc>::from_timestamp_millis(2_000).unwrap();

        let both = Filter {
            begin: Some(begin),
            end: Some(end),
            ..Default::default()
        };
        assert_eq!(both.predicates(), vec![Predicate::Between(Column::Time, 1_000, 2_000)]);

        let lower = Filter {
            begin: Some(begin),
            ..Default::default()
        };
        assert_eq!(lower.predicates(), vec![Predicate::AtLeast(Column::Time, 1_000)]);

        let upper = Filter {
            maximum: Some(10),
            ..Default::default()
        };
        assert_eq!(upper.predicates(), vec![Predicate::AtMost(Column::Size, 10)]);
    }

    #[test]
    fn test_user_values_never_reach_sql_text() {
        let filter = Filter {
            name: Some("'; DROP TABLE Contents; --".to_string()),
            tags: Some(TagSet::new(["pet"]).unwrap()),
            ..Default::default()
        };

        let builder = filter.compile(Pagination::unbounded());
        let sql = builder.sql();
        assert!(!sql.contains("DROP"));
        assert!(!sql.contains("pet"));
        assert!(sql.contains(r"(Name LIKE ? ESCAPE '\')"));
        assert!(sql.contains(r"(',' || Tags || ',' LIKE ? ESCAPE '\')"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn test_loose_joins_with_or() {
        let filter = Filter {
            tags: Some(TagSet::new(["a", "b"]).unwrap()),
            loose: true,
            ..Default::default()
        };
        let builder = filter.compile(Pagination::default());
        assert!(builder.sql().contains(") OR ("));

        let strict = Filter {
            loose: false,
            ..filter
        };
        let builder = strict.compile(Pagination::default());
        assert!(builder.sql().contains(") AND ("));
    }

    #[test]
    fn test_sort_table() {
        let filter = Filter {
            sort: SortKey::Name,
            order: Order::Ascending,
            ..Default::default()
        };
        let builder = filter.compile(Pagination::default());
        assert!(builder
            .sql()
            .contains("ORDER BY Name ASC, Time ASC, Size ASC, ContentId ASC"));

        assert_eq!(SortKey::Uuid.columns(), &[Column::ContentId]);
        assert_eq!(SortKey::parse("size"), Some(SortKey::Size));
        assert_eq!(SortKey::parse("color"), None);
        assert_eq!(Order::parse("ascending"), Some(Order::Ascending));
    }

    #[test]
    fn test_pagination() {
        assert_eq!(Pagination::default().limit_offset(), Some((25, 0)));
        assert_eq!(Pagination::new(10, 3).limit_offset(), Some((10, 30)));
        assert_eq!(Pagination::new(0, 3).limit_offset(), None);
        assert_eq!(Pagination::unbounded().limit_offset(), None);
    }
}
