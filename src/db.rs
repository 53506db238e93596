use std::time::Duration;

use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};

use crate::error::AppResult;

const PRAGMAS: &[&str] = &["PRAGMA journal_mode=WAL", "PRAGMA synchronous=NORMAL", "PRAGMA cache_size=-64000"];

pub async fn connect_and_migrate(database_url: &str) -> AppResult<DatabaseConnection> {
    let in_memory = database_url.contains(":memory:");

    let mut options = ConnectOptions::new(database_url.to_string());
    options.connect_timeout(Duration::from_secs(10)).sqlx_logging(false);
    if in_memory {
        // `:memory:` databases are private to one connection
        options.max_connections(1).min_connections(1);
    }
    let db = Database::connect(options).await?;

    if !in_memory {
        for pragma in PRAGMAS {
            db.execute(Statement::from_string(db.get_database_backend(), pragma.to_string())).await?;
        }
    }

    Migrator::up(&db, None).await?;
    tracing::debug!(in_memory, "cache database ready");
    Ok(db)
}
