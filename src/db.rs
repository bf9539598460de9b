use sqlx::{postgres::PgPoolOptions, Pool, Postgres};

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str) -> Result<Db, sqlx::Error> {
    PgPoolOptions::new().max_connections(10).connect(url).await
}
