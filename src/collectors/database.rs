use crate::collectors::util::quote_identifier;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{info_span, instrument};
use tracing_futures::Instrument as _;

/// One open connection, used for a single collection pass.
pub trait TenantDatabase: Send {
    /// List every schema visible to the connection.
    fn list_schemas(&mut self) -> BoxFuture<'_, Result<Vec<String>>>;

    /// Count rows in `schema.<table>` that are not soft-deleted.
    fn count_active_users<'a>(
        &'a mut self,
        schema: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<u64>>;

    /// Release the connection. Dropping without calling this also releases it.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Opens a fresh [`TenantDatabase`] per pass.
pub trait Connector: Send + Sync {
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn TenantDatabase>>>;
}

#[derive(Clone, Debug)]
pub struct MySqlConnector {
    options: MySqlConnectOptions,
}

impl MySqlConnector {
    #[must_use]
    pub fn new(options: MySqlConnectOptions) -> Self {
        // statement logging would print every per-schema count at info level
        Self {
            options: options.disable_statement_logging(),
        }
    }
}

impl Connector for MySqlConnector {
    #[instrument(skip(self), level = "debug", err, fields(db.system = "mysql", otel.kind = "client"))]
    fn connect(&self) -> BoxFuture<'_, Result<Box<dyn TenantDatabase>>> {
        Box::pin(async move {
            let conn = MySqlConnection::connect_with(&self.options)
                .await
                .context("failed to connect to database")?;

            Ok(Box::new(MySqlTenantDatabase { conn }) as Box<dyn TenantDatabase>)
        })
    }
}

struct MySqlTenantDatabase {
    conn: MySqlConnection,
}

impl TenantDatabase for MySqlTenantDatabase {
    fn list_schemas(&mut self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let span = info_span!(
                "db.query",
                db.system = "mysql",
                db.operation = "SHOW",
                db.statement = "SHOW DATABASES",
                otel.kind = "client"
            );

            let rows = sqlx::query_as::<_, (String,)>("SHOW DATABASES")
                .fetch_all(&mut self.conn)
                .instrument(span)
                .await
                .context("failed to list databases")?;

            Ok(rows.into_iter().map(|(name,)| name).collect())
        })
    }

    fn count_active_users<'a>(
        &'a mut self,
        schema: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let statement = format!(
                "SELECT COUNT(*) FROM {}.{} WHERE deleted = 0",
                quote_identifier(schema),
                quote_identifier(table)
            );

            let span = info_span!(
                "db.query",
                db.system = "mysql",
                db.operation = "SELECT",
                db.name = %schema,
                db.statement = %statement,
                otel.kind = "client"
            );

            let (count,) = sqlx::query_as::<_, (i64,)>(&statement)
                .fetch_one(&mut self.conn)
                .instrument(span)
                .await
                .with_context(|| format!("failed to count users in {schema}"))?;

            // COUNT(*) is never negative
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.conn
                .close()
                .await
                .context("failed to close database connection")
        })
    }
}
