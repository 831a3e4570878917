//! Traced catalog connection wrapper.
//!
//! Wraps any [`Connection`] and logs every catalog query via tracing.

use std::future::Future;
use std::pin::Pin;

use tokio_postgres::types::ToSql;
use tokio_postgres::{Error, Row};
use tracing::{Instrument, Span};

/// Query parameters, as tokio-postgres takes them.
pub type Params<'a> = &'a [&'a (dyn ToSql + Sync)];

/// Boxed future returned by [`Connection`] methods.
pub type QueryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, Error>> + Send + 'a>>;

/// A connection wrapper scoped to one schema introspection.
///
/// Each query is wrapped in a `tracing::debug_span!` named `db.query`
/// carrying the schema, a short label for the query, the SQL and the row
/// count.
///
/// # Example
///
/// ```ignore
/// use dredge::ConnectionExt;
///
/// let traced = client.traced("public");
/// let rows = traced.query("tables", "SELECT relname FROM pg_class", &[]).await?;
/// ```
pub struct TracedConn<'a, C: Connection> {
    conn: &'a C,
    schema: &'a str,
}

impl<'a, C: Connection> TracedConn<'a, C> {
    pub fn new(conn: &'a C, schema: &'a str) -> Self {
        Self { conn, schema }
    }

    fn span(&self, label: &'static str, sql: &str, params: Params<'_>) -> Span {
        tracing::debug_span!(
            "db.query",
            schema = %self.schema,
            query = label,
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        )
    }

    /// Execute a query, returning all rows.
    pub async fn query(
        &self,
        label: &'static str,
        sql: &str,
        params: Params<'_>,
    ) -> Result<Vec<Row>, Error> {
        let span = self.span(label, sql, params);
        let rows = self.conn.query(sql, params).instrument(span.clone()).await?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    /// Execute a query, returning at most one row.
    pub async fn query_opt(
        &self,
        label: &'static str,
        sql: &str,
        params: Params<'_>,
    ) -> Result<Option<Row>, Error> {
        let span = self.span(label, sql, params);
        let row = self
            .conn
            .query_opt(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("rows", usize::from(row.is_some()));
        Ok(row)
    }
}

/// Extension trait to get a traced wrapper from a connection.
pub trait ConnectionExt: Connection + Sized {
    /// Wrap this connection in a `TracedConn` for the given schema.
    fn traced<'a>(&'a self, schema: &'a str) -> TracedConn<'a, Self> {
        TracedConn::new(self, schema)
    }
}

impl<C: Connection> ConnectionExt for C {}

/// Anything the catalog reader can run read-only queries on.
///
/// Implemented for `tokio_postgres::Client` and `deadpool_postgres::Object`.
/// Opening, pooling and closing connections is left to the caller.
pub trait Connection: Send + Sync {
    fn query<'a>(&'a self, sql: &'a str, params: Params<'a>) -> QueryFuture<'a, Vec<Row>>;

    fn query_opt<'a>(&'a self, sql: &'a str, params: Params<'a>) -> QueryFuture<'a, Option<Row>>;
}

impl Connection for tokio_postgres::Client {
    fn query<'a>(&'a self, sql: &'a str, params: Params<'a>) -> QueryFuture<'a, Vec<Row>> {
        Box::pin(tokio_postgres::Client::query(self, sql, params))
    }

    fn query_opt<'a>(&'a self, sql: &'a str, params: Params<'a>) -> QueryFuture<'a, Option<Row>> {
        Box::pin(tokio_postgres::Client::query_opt(self, sql, params))
    }
}

impl Connection for deadpool_postgres::Object {
    fn query<'a>(&'a self, sql: &'a str, params: Params<'a>) -> QueryFuture<'a, Vec<Row>> {
        let client: &tokio_postgres::Client = self;
        Connection::query(client, sql, params)
    }

    fn query_opt<'a>(&'a self, sql: &'a str, params: Params<'a>) -> QueryFuture<'a, Option<Row>> {
        let client: &tokio_postgres::Client = self;
        Connection::query_opt(client, sql, params)
    }
}
