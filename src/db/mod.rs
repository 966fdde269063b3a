pub mod models;
pub mod users;
pub mod messages;

use std::time::Duration;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::config::Config;
use crate::error::AppError;

pub use models::{User, Message};
pub use users::UserRepository;
pub use messages::MessageRepository;

/// Open the pool and run embedded migrations
pub async fn connect(config: &Config) -> Result<SqlitePool, AppError> {
    let db = SqlitePoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&db).await?;

    Ok(db)
}
