use std::fmt;

use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const IN_MEMORY: &str = ":memory:";

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    NotFound,
    Database(String),
    Connection(String),
}
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let err_msg = match self {
            Self::NotFound => "Item not found",
            Self::Database(msg) => msg,
            Self::Connection(msg) => msg,
        };
        write!(f, "{}", err_msg)
    }
}
impl std::error::Error for Error {}

impl From<diesel::result::Error> for Error {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::NotFound => Self::NotFound,
            e => Self::Database(e.to_string()),
        }
    }
}

/// 数据库代理。持有连接池，每个操作独占一个连接。
pub struct Agent {
    connections: Pool<ConnectionManager<SqliteConnection>>,
}

impl Agent {
    /// 初始化数据库
    pub fn new(database_url: &str) -> Result<Self, Error> {
        // Init a db pool
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let builder = Pool::builder();

        // 内存数据库每个连接相互独立，只能保留唯一且长期存活的连接
        let builder = match database_url {
            IN_MEMORY => builder.max_size(1).idle_timeout(None).max_lifetime(None),
            _ => builder,
        };
        let connections = builder
            .build(manager)
            .map_err(|e| Error::Database(e.to_string()))?;

        // 初始化数据库结构
        {
            let conn = &mut connections
                .get()
                .map_err(|e| Error::Connection(e.to_string()))?;
            let applied = conn
                .run_pending_migrations(MIGRATIONS)
                .map_err(|e| Error::Database(e.to_string()))?;
            for version in applied {
                tracing::info!("Applied migration {version}");
            }
        }
        tracing::debug!("Database ready at {database_url}");

        Ok(Self { connections })
    }

    pub(super) fn conn(
        &self,
    ) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, Error> {
        self.connections
            .get()
            .map_err(|e| Error::Connection(e.to_string()))
    }
}
