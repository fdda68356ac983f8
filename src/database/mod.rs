pub mod pool;

use sqlx::PgPool;

use crate::error::Result;

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
