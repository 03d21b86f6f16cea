pub mod client;
pub mod media;
pub mod record;

use sqlx::PgPool;

const SCHEMA: &str = include_str!("../schema.sql");

/// Creates the schemas and tables that do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
