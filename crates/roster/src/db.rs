//! Database connection utilities.

use sea_orm::{Database, DatabaseConnection, DbErr};

/// Pragmas applied to every file-backed SQLite cache.
///
/// Split write sessions commit while other readers are open, so the cache runs
/// in WAL mode with a busy timeout instead of failing on the first lock.
const SQLITE_PRAGMAS: [&str; 3] = [
    "PRAGMA journal_mode=WAL",
    "PRAGMA busy_timeout=5000",
    "PRAGMA synchronous=NORMAL",
];

async fn configure_sqlite(db: &DatabaseConnection) -> Result<(), DbErr> {
    use sea_orm::{ConnectionTrait, Statement};

    for pragma in SQLITE_PRAGMAS {
        db.execute(Statement::from_string(
            db.get_database_backend(),
            pragma.to_string(),
        ))
        .await?;
    }

    tracing::debug!("configured sqlite pragmas");
    Ok(())
}

/// In-memory databases get no pragmas; WAL does not apply to them.
fn wants_sqlite_pragmas(database_url: &str) -> bool {
    database_url.starts_with("sqlite:") && !database_url.contains(":memory:")
}

/// Establish a connection to the cache database.
///
/// # Arguments
/// * `database_url` - Database connection string (e.g., `sqlite://roster.db?mode=rwc` or `postgres:///roster`)
///
/// # Errors
/// Returns `DbErr` if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;

    if wants_sqlite_pragmas(database_url) {
        configure_sqlite(&db).await?;
    }

    Ok(db)
}

/// Establish a connection to the database and run all pending migrations.
///
/// # Errors
/// Returns `DbErr` if the connection cannot be established or migrations fail.
///
/// # Example
/// ```ignore
/// let db = roster::connect_and_migrate("sqlite::memory:").await?;
/// ```
#[cfg(feature = "migrate")]
pub async fn connect_and_migrate(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    use sea_orm_migration::MigratorTrait;

    let db = connect(database_url).await?;
    crate::migration::Migrator::up(&db, None).await?;
    Ok(db)
}
