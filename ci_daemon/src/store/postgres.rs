//! PostgreSQL storage over a diesel-async connection pool.

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::BigInt;
use diesel::upsert::excluded;
use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use super::Storage;
use crate::models::build::{BuildResult, CiBuildResultRow};
use crate::models::owner::{CiOwnerRow, Owner, OwnerKey};
use crate::schema::{ci_build_results, ci_owners};

pub type DieselPool = Pool<AsyncPgConnection>;

#[derive(QueryableByName)]
struct NextId {
    #[diesel(sql_type = BigInt)]
    id: i64,
}

pub struct PgStorage {
    pool: DieselPool,
}

impl PgStorage {
    /// Connect and create the store tables if needed.
    pub async fn connect(database_url: &str, max_connections: usize) -> anyhow::Result<Self> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(manager).max_size(max_connections).build()?;

        let mut conn = pool
            .get()
            .await
            .map_err(|e| anyhow::anyhow!("diesel pool: {e}"))?;
        tracing::info!("Running CI store migration...");
        crate::migration::run_migration(&mut conn).await?;
        tracing::info!("CI store migration completed.");

        Ok(Self { pool })
    }
}

async fn next_id(conn: &mut AsyncPgConnection) -> anyhow::Result<i64> {
    let row: NextId =
        diesel::sql_query("SELECT nextval(pg_get_serial_sequence('ci_build_results', 'id')) AS id")
            .get_result(conn)
            .await?;
    Ok(row.id)
}

async fn upsert_build(conn: &mut AsyncPgConnection, result: &BuildResult) -> anyhow::Result<()> {
    let row = CiBuildResultRow {
        id: result.id,
        course: result.course.clone(),
        username: result.user.clone(),
        labnum: result.labnum,
        payload: Some(serde_json::to_value(result)?),
        create_date: None,
        write_date: Some(Utc::now()),
    };

    diesel::insert_into(ci_build_results::table)
        .values(&row)
        .on_conflict(ci_build_results::id)
        .do_update()
        .set((
            ci_build_results::payload.eq(excluded(ci_build_results::payload)),
            ci_build_results::write_date.eq(excluded(ci_build_results::write_date)),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

async fn find_build(conn: &mut AsyncPgConnection, id: i64) -> anyhow::Result<Option<BuildResult>> {
    let row = ci_build_results::table
        .find(id)
        .first::<CiBuildResultRow>(conn)
        .await
        .optional()?;

    match row.and_then(|r| r.payload) {
        Some(payload) => Ok(Some(serde_json::from_value(payload)?)),
        None => Ok(None),
    }
}

async fn find_owner(conn: &mut AsyncPgConnection, key: &OwnerKey) -> anyhow::Result<Option<Owner>> {
    let row = ci_owners::table
        .find(key.to_string())
        .first::<CiOwnerRow>(conn)
        .await
        .optional()?;

    match row {
        Some(r) => Ok(Some(serde_json::from_value(r.payload)?)),
        None => Ok(None),
    }
}

async fn upsert_owner(conn: &mut AsyncPgConnection, owner: &Owner) -> anyhow::Result<()> {
    let row = CiOwnerRow {
        owner_key: owner.key.to_string(),
        kind: owner.key.kind().to_string(),
        payload: serde_json::to_value(owner)?,
        write_date: Utc::now(),
    };

    diesel::insert_into(ci_owners::table)
        .values(&row)
        .on_conflict(ci_owners::owner_key)
        .do_update()
        .set((
            ci_owners::payload.eq(excluded(ci_owners::payload)),
            ci_owners::write_date.eq(excluded(ci_owners::write_date)),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

#[async_trait]
impl Storage for PgStorage {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn next_build_id(&self) -> anyhow::Result<i64> {
        let mut conn = self.pool.get().await?;
        next_id(&mut conn).await
    }

    async fn put_build(&self, result: &BuildResult) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        upsert_build(&mut conn, result).await
    }

    async fn get_build(&self, id: i64) -> anyhow::Result<Option<BuildResult>> {
        let mut conn = self.pool.get().await?;
        find_build(&mut conn, id).await
    }

    async fn get_owner(&self, key: &OwnerKey) -> anyhow::Result<Option<Owner>> {
        let mut conn = self.pool.get().await?;
        find_owner(&mut conn, key).await
    }

    async fn put_owner(&self, owner: &Owner) -> anyhow::Result<()> {
        let mut conn = self.pool.get().await?;
        upsert_owner(&mut conn, owner).await
    }
}
