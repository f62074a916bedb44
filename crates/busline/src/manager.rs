//! Shared bus connection management.

use std::future::Future;
use std::sync::Arc;

use busline_core::Error;
use tokio::sync::Mutex;

use crate::Conn;

/// The two well-known message buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusType {
    Session,
    System,
}

impl std::fmt::Display for BusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Session => f.write_str("session"),
            Self::System => f.write_str("system"),
        }
    }
}

/// Establishes a ready-to-use connection to a bus.
///
/// Implementations resolve the bus address, connect the transport,
/// authenticate, and complete registration. The manager only caches what
/// the connector returns.
pub trait BusConnector: Send + Sync + 'static {
    fn connect(&self, bus: BusType)
        -> impl Future<Output = Result<Arc<Conn>, Error>> + Send + '_;
}

/// Caches one shared connection per bus, established lazily.
///
/// A cached connection is reused only while it reports connected; a dead
/// one is replaced on the next request. The per-bus mutex serializes
/// concurrent first requests so only one connection attempt runs per bus.
pub struct ConnectionManager<C> {
    connector: C,
    session: Mutex<Option<Arc<Conn>>>,
    system: Mutex<Option<Arc<Conn>>>,
}

impl<C: BusConnector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            session: Mutex::new(None),
            system: Mutex::new(None),
        }
    }

    /// The shared connection to `bus`, connecting if needed.
    pub async fn get(&self, bus: BusType) -> Result<Arc<Conn>, Error> {
        let slot = match bus {
            BusType::Session => &self.session,
            BusType::System => &self.system,
        };
        let mut slot = slot.lock().await;
        if let Some(conn) = slot.as_ref() {
            if conn.connected() {
                return Ok(Arc::clone(conn));
            }
            tracing::debug!(%bus, "cached bus connection is dead; reconnecting");
            *slot = None;
        }
        let conn = self.connector.connect(bus).await?;
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    pub async fn session_bus(&self) -> Result<Arc<Conn>, Error> {
        self.get(BusType::Session).await
    }

    pub async fn system_bus(&self) -> Result<Arc<Conn>, Error> {
        self.get(BusType::System).await
    }

    /// Close and drop every cached connection.
    pub async fn close_all(&self) {
        for slot in [&self.session, &self.system] {
            if let Some(conn) = slot.lock().await.take() {
                conn.close();
            }
        }
    }
}
