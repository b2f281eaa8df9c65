//! A fixed set of connections, one per worker

use std::num::NonZeroUsize;

use observability_deps::tracing::{info, warn};

use crate::{Error, Result, Target};

/// Connections opened up front for a run
///
/// Workers take ownership of their connection for the duration of a round and hand it back
/// afterwards, so no connection is ever shared between two workers.
pub struct ConnectionPool<C> {
    conns: Vec<C>,
}

impl<C> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("connections", &self.conns.len())
            .finish()
    }
}

impl<C> ConnectionPool<C> {
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// The connection used for setup statements and sequential probes
    pub fn first_mut(&mut self) -> Option<&mut C> {
        self.conns.first_mut()
    }

    /// Move every connection out, in order, leaving the pool empty
    pub fn take_all(&mut self) -> Vec<C> {
        std::mem::take(&mut self.conns)
    }

    /// Put connections back after [`Self::take_all`]
    pub fn restore(&mut self, conns: impl IntoIterator<Item = C>) {
        self.conns.extend(conns);
    }

    /// Close every connection, logging failures instead of stopping at the first one
    pub async fn close<T>(self, target: &T)
    where
        T: Target<Conn = C>,
    {
        close_all(target, self.conns).await
    }
}

/// Open `count` connections to `target`, in order
///
/// If any connection fails to open, the ones already opened are closed before the error is
/// returned.
pub async fn build_pool<T: Target>(
    target: &T,
    count: NonZeroUsize,
) -> Result<ConnectionPool<T::Conn>> {
    let mut conns = Vec::with_capacity(count.get());
    for index in 0..count.get() {
        match target.connect().await {
            Ok(conn) => {
                info!(kind = %target.kind(), index, "opened connection");
                conns.push(conn);
            }
            Err(source) => {
                warn!(
                    kind = %target.kind(),
                    index,
                    opened = conns.len(),
                    "failed to open connection, closing the ones already opened"
                );
                close_all(target, conns).await;
                return Err(Error::Connect {
                    index,
                    source: Box::new(source),
                });
            }
        }
    }
    Ok(ConnectionPool { conns })
}

async fn close_all<T: Target>(target: &T, conns: Vec<T::Conn>) {
    for conn in conns {
        if let Err(e) = target.close(conn).await {
            warn!(error = %e, "failed to close connection");
        }
    }
}
