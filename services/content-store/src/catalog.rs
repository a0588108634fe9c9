use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::model::ContentRow;
use crate::search::{Column, Filter, Pagination};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{QueryBuilder, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const MEMORY_PATH: &str = ":memory:";

/// Column value staged for a partial row update.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Data(String),
    Extension(String),
    Mime(String),
    Name(String),
    Size(i64),
    Tags(String),
    Time(i64),
}

impl Assignment {
    pub fn column(&self) -> Column {
        match self {
            Self::Data(_) => Column::Data,
            Self::Extension(_) => Column::Extension,
            Self::Mime(_) => Column::Mime,
            Self::Name(_) => Column::Name,
            Self::Size(_) => Column::Size,
            Self::Tags(_) => Column::Tags,
            Self::Time(_) => Column::Time,
        }
    }

    fn push_to(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        builder.push(self.column().as_sql()).push(" = ");
        match self {
            Self::Data(v) | Self::Extension(v) | Self::Mime(v) | Self::Name(v) | Self::Tags(v) => {
                builder.push_bind(v.clone())
            }
            Self::Size(v) | Self::Time(v) => builder.push_bind(*v),
        };
    }
}

/// Content metadata table in SQLite
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open the catalog database file, creating it when missing. The path
    /// `:memory:` gives a catalog that lives as long as the process.
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        if config.path.as_os_str() == MEMORY_PATH {
            info!("Using in-memory SQLite catalog");
            return Self::in_memory().await;
        }

        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("case_sensitive_like", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_with(options)
            .await?;

        info!(path = %config.path.display(), "Connected to SQLite catalog");

        Ok(Self { pool })
    }

    /// Private in-memory catalog with the schema applied. One connection is
    /// kept alive for the lifetime of the pool so the database survives.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .pragma("case_sensitive_like", "ON");

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        let catalog = Self { pool };
        catalog.run_migrations().await?;
        Ok(catalog)
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> StoreResult<()> {
        info!("Running catalog migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))?;

        info!("Catalog migrations completed");
        Ok(())
    }

    #[instrument(skip(self, row), fields(id = %row.content_id))]
    pub async fn insert(&self, row: &ContentRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO Contents (ContentId, Data, Extension, Mime, Name, Size, Tags, Time)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.content_id)
        .bind(&row.data)
        .bind(&row.extension)
        .bind(&row.mime)
        .bind(&row.name)
        .bind(row.size)
        .bind(&row.tags)
        .bind(row.time)
        .execute(&self.pool)
        .await?;

        debug!("Row inserted");
        Ok(())
    }

    pub async fn select_one(&self, id: Uuid) -> StoreResult<Option<ContentRow>> {
        let row = sqlx::query_as::<_, ContentRow>(
            r#"
            SELECT ContentId, Data, Extension, Mime, Name, Size, Tags, Time
            FROM Contents
            WHERE ContentId = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn exists(&self, id: Uuid) -> StoreResult<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT 1 FROM Contents WHERE ContentId = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        Ok(found.is_some())
    }

    /// Apply staged assignments in one statement. Returns whether a row was
    /// changed; an empty assignment list touches nothing.
    #[instrument(skip(self, assignments), fields(columns = assignments.len()))]
    pub async fn update_columns(&self, id: Uuid, assignments: &[Assignment]) -> StoreResult<bool> {
        if assignments.is_empty() {
            return Ok(false);
        }

        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("UPDATE Contents SET ");
        for (i, assignment) in assignments.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            assignment.push_to(&mut builder);
        }
        builder.push(" WHERE ContentId = ").push_bind(id.to_string());

        let result = builder.build().execute(&self.pool).await?;
        debug!(rows = result.rows_affected(), "Columns updated");

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM Contents WHERE ContentId = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM Contents")
            .fetch_one(&self.pool)
            .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Content ids matching `filter`, ordered and paginated.
    #[instrument(skip(self))]
    pub async fn search(&self, filter: &Filter, pagination: Pagination) -> StoreResult<Vec<Uuid>> {
        let mut builder = filter.compile(pagination);
        debug!(sql = builder.sql(), "Searching catalog");

        let ids: Vec<String> = builder
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?;

        ids.iter()
            .map(|id| {
                Uuid::parse_str(id).map_err(|e| StoreError::Corrupt(format!("content id {id}: {e}")))
            })
            .collect()
    }

    /// Every content id, newest first.
    pub async fn list(&self, pagination: Pagination) -> StoreResult<Vec<Uuid>> {
        self.search(&Filter::default(), pagination).await
    }

    /// Get the connection pool (for readiness checks)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
