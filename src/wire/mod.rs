//! Wire-level PostgreSQL client: one socket, one query at a time, text-mode
//! result decoding, protocol-level cancellation.

mod connection;
pub mod dsn;
mod pool;
pub mod protocol;
mod row;
pub mod text;

pub use connection::{
    CancelHandle, ConnState, Connection, QueryOptions, QueryOutput, QueryType,
};
pub use dsn::{Dsn, SessionParams, SslMode};
pub use pool::{ConnectionPool, PooledConn};
pub use protocol::{FieldDescription, Notification};
pub use row::{FromPgValue, FromRow, Row};
pub use text::{PgValue, TextDecoders};
