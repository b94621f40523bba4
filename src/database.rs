use crate::capabilities::{CapabilityError, Storage};
use async_trait::async_trait;
use diesel::{prelude::*, upsert::excluded};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt, StreamExt,
};
use snafu::{ResultExt, Snafu};
use tracing::{trace, trace_span};

mod models;
mod schema;

const SCHEMA: &str = include_str!("../migrations/2026-10-19-000000_create_hash_fields/up.sql");

pub struct Db {
    conn: diesel::PgConnection,
}

impl Db {
    pub fn new(conn: diesel::PgConnection) -> Self {
        Self { conn }
    }

    /// Creates the tables if they do not exist yet.
    pub fn ensure_schema(&mut self) -> Result<()> {
        let Self { conn } = self;

        diesel::sql_query(SCHEMA)
            .execute(conn)
            .context(UnableToCreateSchemaSnafu)?;

        Ok(())
    }
}

impl Db {
    fn set_field(&mut self, key: &str, field: &str) -> Result<()> {
        use models::NewHashField;
        use schema::hash_fields::dsl;

        let s = trace_span!("set_field", key, field);
        let _s = s.enter();
        let Self { conn } = self;

        let row = NewHashField {
            key,
            field,
            value: "",
        };

        diesel::insert_into(dsl::hash_fields)
            .values(&row)
            .on_conflict((dsl::key, dsl::field))
            .do_update()
            .set(dsl::value.eq(excluded(dsl::value)))
            .log_query()
            .execute(conn)
            .context(UnableToInsertFieldSnafu)?;

        Ok(())
    }

    fn delete_field(&mut self, key: &str, field: &str) -> Result<()> {
        use schema::hash_fields::dsl;

        let s = trace_span!("delete_field", key, field);
        let _s = s.enter();
        let Self { conn } = self;

        let deleted = diesel::delete(
            dsl::hash_fields
                .filter(dsl::key.eq(key))
                .filter(dsl::field.eq(field)),
        )
        .log_query()
        .execute(conn)
        .context(UnableToDeleteFieldSnafu)?;

        trace!("Deleted {} fields", deleted);

        Ok(())
    }

    fn list_fields(&mut self, key: &str) -> Result<Vec<String>> {
        use schema::hash_fields::dsl;

        let s = trace_span!("list_fields", key);
        let _s = s.enter();
        let Self { conn } = self;

        dsl::hash_fields
            .filter(dsl::key.eq(key))
            .select(dsl::field)
            .log_query()
            .load::<String>(conn)
            .context(UnableToQueryFieldsSnafu)
    }
}

trait LogQuery {
    fn log_query(self) -> Self;
}

impl<T> LogQuery for T
where
    for<'a> diesel::query_builder::DebugQuery<'a, T, diesel::pg::Pg>: std::fmt::Display,
{
    fn log_query(self) -> Self {
        trace!("Query: {}", diesel::debug_query::<diesel::pg::Pg, _>(&self));
        self
    }
}

#[derive(Debug, Snafu)]
pub enum Error {
    UnableToCreateSchema { source: diesel::result::Error },

    UnableToInsertField { source: diesel::result::Error },

    UnableToDeleteField { source: diesel::result::Error },

    UnableToQueryFields { source: diesel::result::Error },

    #[snafu(display("The database task is gone"))]
    ActorGone { source: oneshot::Canceled },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub fn spawn(this: Db) -> (DbHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(10);
    let child = tokio::spawn(db_task(this, rx));
    (DbHandle(tx), child)
}

#[derive(Debug, Clone)]
pub struct DbHandle(mpsc::Sender<DbCommand>);

impl DbHandle {
    pub async fn set_field(&self, key: String, field: String) -> Result<()> {
        let (tx, rx) = oneshot::channel();

        // Ignore send errors. If this send fails, so does the
        // rx.await below. There's no reason to check for the
        // same failure twice.
        let _ = self.0.clone().send(DbCommand::SetField(tx, key, field)).await;
        rx.await.context(ActorGoneSnafu)?
    }

    pub async fn delete_field(&self, key: String, field: String) -> Result<()> {
        let (tx, rx) = oneshot::channel();

        // Ignore send errors, as above.
        let _ = self
            .0
            .clone()
            .send(DbCommand::DeleteField(tx, key, field))
            .await;
        rx.await.context(ActorGoneSnafu)?
    }

    pub async fn list_fields(&self, key: String) -> Result<Vec<String>> {
        let (tx, rx) = oneshot::channel();

        // Ignore send errors, as above.
        let _ = self.0.clone().send(DbCommand::ListFields(tx, key)).await;
        rx.await.context(ActorGoneSnafu)?
    }
}

#[async_trait]
impl Storage for DbHandle {
    async fn add_field(&self, key: &str, field: &str) -> Result<(), CapabilityError> {
        Ok(self.set_field(key.into(), field.into()).await?)
    }

    async fn remove_field(&self, key: &str, field: &str) -> Result<(), CapabilityError> {
        Ok(self.delete_field(key.into(), field.into()).await?)
    }

    async fn fields(&self, key: &str) -> Result<Vec<String>, CapabilityError> {
        Ok(self.list_fields(key.into()).await?)
    }
}

#[derive(Debug)]
enum DbCommand {
    SetField(oneshot::Sender<Result<()>>, String, String),

    DeleteField(oneshot::Sender<Result<()>>, String, String),

    ListFields(oneshot::Sender<Result<Vec<String>>>, String),
}

async fn db_task(mut this: Db, mut rx: mpsc::Receiver<DbCommand>) {
    while let Some(cmd) = rx.next().await {
        // Diesel is synchronous; keep the runtime's other tasks moving
        // while the query runs.
        match cmd {
            DbCommand::SetField(r, key, field) => {
                let retval = tokio::task::block_in_place(|| this.set_field(&key, &field));

                // If we couldn't respond, that's OK
                let _ = r.send(retval);
            }

            DbCommand::DeleteField(r, key, field) => {
                let retval = tokio::task::block_in_place(|| this.delete_field(&key, &field));
                let _ = r.send(retval);
            }

            DbCommand::ListFields(r, key) => {
                let retval = tokio::task::block_in_place(|| this.list_fields(&key));
                let _ = r.send(retval);
            }
        }
    }
}
