//! `SQLite` plumbing shared by kubelink storage layers.
//!
//! Provides [`DatabaseError`], [`unix_timestamp`], pool construction and the
//! [`define_database!`](crate::define_database) macro that stamps out a typed
//! database handle with embedded migrations.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open database: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A unique constraint rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        match e.as_database_error() {
            Some(db) if db.is_unique_violation() => Self::Conflict(db.message().to_string()),
            _ => Self::Query(e),
        }
    }
}

/// Pool sizing and lock behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// How long a caller waits for a free pooled connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolSettings {
    /// `:memory:` databases are per-connection, so the pool holds exactly one.
    pub fn in_memory() -> Self {
        Self {
            max_connections: 1,
            ..Self::default()
        }
    }
}

/// Open (or create) a file-backed pool, creating the parent directory first.
///
/// Runs in WAL mode with `synchronous = NORMAL` and foreign keys enforced.
pub async fn open_pool(path: &Path, settings: PoolSettings) -> Result<Pool<Sqlite>, DatabaseError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(settings.busy_timeout);

    let pool = connect(options, settings).await?;
    info!(path = %path.display(), max_connections = settings.max_connections, "Database opened");
    Ok(pool)
}

/// Open a private in-memory pool.
///
/// The single connection is never recycled; dropping it drops the data.
pub async fn open_pool_in_memory() -> Result<Pool<Sqlite>, DatabaseError> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);
    let pool_options = pool_options(PoolSettings::in_memory())
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None);
    pool_options
        .connect_with(options)
        .await
        .map_err(DatabaseError::Connection)
}

fn pool_options(settings: PoolSettings) -> SqlitePoolOptions {
    SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
}

async fn connect(
    options: SqliteConnectOptions,
    settings: PoolSettings,
) -> Result<Pool<Sqlite>, DatabaseError> {
    pool_options(settings)
        .connect_with(options)
        .await
        .map_err(DatabaseError::Connection)
}

/// Current time in whole seconds since the Unix epoch.
#[allow(clippy::cast_possible_wrap)]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Define a cloneable database handle backed by a `SQLite` pool.
///
/// ```ignore
/// kubelink_core::define_database!(ServerDatabase);
/// ```
///
/// The handle gets `open(path)`, `open_in_memory()`, `pool()` and `close()`.
/// Both constructors apply the migrations embedded from `./migrations` of
/// the invoking crate before returning.
#[macro_export]
macro_rules! define_database {
    ($name:ident) => {
        #[derive(Clone)]
        pub struct $name {
            pool: ::sqlx::Pool<::sqlx::Sqlite>,
        }

        impl $name {
            /// Open or create a database file at `path`.
            pub async fn open(
                path: &::std::path::Path,
            ) -> ::std::result::Result<Self, $crate::db::DatabaseError> {
                let pool =
                    $crate::db::open_pool(path, $crate::db::PoolSettings::default()).await?;
                Self::migrated(pool).await
            }

            /// Open an empty in-memory database.
            pub async fn open_in_memory() -> ::std::result::Result<Self, $crate::db::DatabaseError>
            {
                Self::migrated($crate::db::open_pool_in_memory().await?).await
            }

            async fn migrated(
                pool: ::sqlx::Pool<::sqlx::Sqlite>,
            ) -> ::std::result::Result<Self, $crate::db::DatabaseError> {
                ::sqlx::migrate!("./migrations").run(&pool).await?;
                ::tracing::debug!(database = stringify!($name), "Migrations applied");
                Ok(Self { pool })
            }

            pub const fn pool(&self) -> &::sqlx::Pool<::sqlx::Sqlite> {
                &self.pool
            }

            /// Wait for in-flight queries and close every pooled connection.
            pub async fn close(&self) {
                self.pool.close().await;
            }
        }
    };
}
