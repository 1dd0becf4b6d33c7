use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::PgSyncError;
use crate::wire::connection::{ConnState, Connection};
use crate::wire::dsn::{Dsn, SessionParams};

struct PoolInner {
    dsn: Dsn,
    session: SessionParams,
    idle: Mutex<Vec<Connection>>,
    semaphore: Arc<Semaphore>,
    idle_timeout: Option<Duration>,
}

/// A small pool of [Connection]s sharing one session-parameter state. All
/// members answer to the same `affinity_hash`, so a `SET`-sensitive caller
/// can treat any member interchangeably.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub fn new(dsn: Dsn, session: SessionParams, size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                dsn,
                session,
                idle: Mutex::new(Vec::new()),
                semaphore: Arc::new(Semaphore::new(size.max(1))),
                idle_timeout: None,
            }),
        }
    }

    pub fn with_idle_timeout(dsn: Dsn, session: SessionParams, size: usize, timeout: Option<Duration>) -> Self {
        let mut pool = Self::new(dsn, session, size);
        Arc::get_mut(&mut pool.inner)
            .map(|inner| inner.idle_timeout = timeout)
            .unwrap_or_default();
        pool
    }

    pub fn session_hash(&self) -> u64 {
        self.inner.session.affinity_hash()
    }

    /// Check a connection out, reconnecting when a pooled one has been
    /// closed or idled out.
    pub async fn acquire(&self) -> Result<PooledConn, PgSyncError> {
        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PgSyncError::Wire("Connection pool is shut down".to_string()))?;
        loop {
            let candidate = lock_idle(&self.inner).pop();
            match candidate {
                Some(mut connection) => {
                    if connection.state() == ConnState::Closed || connection.idle_expired() {
                        connection.close().await;
                        continue;
                    }
                    connection.reserve();
                    return Ok(PooledConn {
                        connection: Some(connection),
                        inner: self.inner.clone(),
                        _permit: permit,
                    });
                }
                None => {
                    let mut connection =
                        Connection::connect(&self.inner.dsn, &self.inner.session).await?;
                    connection.set_idle_timeout(self.inner.idle_timeout);
                    connection.reserve();
                    return Ok(PooledConn {
                        connection: Some(connection),
                        inner: self.inner.clone(),
                        _permit: permit,
                    });
                }
            }
        }
    }

    pub async fn close_all(&self) {
        let drained: Vec<Connection> = lock_idle(&self.inner).drain(..).collect();
        for mut connection in drained {
            connection.close().await;
        }
    }
}

fn lock_idle(inner: &PoolInner) -> std::sync::MutexGuard<'_, Vec<Connection>> {
    inner.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A checked-out connection, returned to the pool on drop unless it has been
/// closed in the meantime.
pub struct PooledConn {
    connection: Option<Connection>,
    inner: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConn {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref().expect("connection taken")
    }
}

impl DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_mut().expect("connection taken")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.release();
            if connection.state() == ConnState::Idle {
                lock_idle(&self.inner).push(connection);
            }
        }
    }
}
