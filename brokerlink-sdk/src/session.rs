//! Session establishment shared by the services.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::error::{Error, Result, TransportError};
use crate::transport::{Session, Transport};

/// Open a session, bounded by the configured connect timeout.
pub(crate) async fn connect(
    transport: &dyn Transport,
    config: &ConnectionConfig,
) -> Result<Box<dyn Session>> {
    let timeout = config.connect_timeout();
    match tokio::time::timeout(timeout, transport.connect(config)).await {
        Ok(Ok(session)) => Ok(session),
        Ok(Err(err)) => Err(connection_error(err)),
        Err(_) => Err(Error::Connection(format!(
            "handshake with {} timed out after {:?}",
            config.bootstrap_servers(),
            timeout
        ))),
    }
}

/// Map a handshake failure to the caller-facing error.
pub(crate) fn connection_error(err: TransportError) -> Error {
    match err {
        TransportError::Connection(reason) => Error::Connection(reason),
        other => Error::Transport(other),
    }
}

/// A session opened on first use and kept until `close`.
///
/// Used by the request/response services (admin, producer).
pub(crate) struct LazySession {
    config: Arc<ConnectionConfig>,
    transport: Arc<dyn Transport>,
    service: &'static str,
    session: tokio::sync::Mutex<Option<Arc<dyn Session>>>,
}

impl LazySession {
    pub(crate) fn new(
        config: Arc<ConnectionConfig>,
        transport: Arc<dyn Transport>,
        service: &'static str,
    ) -> Self {
        Self {
            config,
            transport,
            service,
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// The open session, connecting first if necessary.
    pub(crate) async fn get(&self) -> Result<Arc<dyn Session>> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }

        let session: Arc<dyn Session> = Arc::from(connect(self.transport.as_ref(), &self.config).await?);
        info!(service = self.service, brokers = %self.config.bootstrap_servers(), "Connected");
        *slot = Some(session.clone());
        Ok(session)
    }

    pub(crate) async fn is_connected(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Close the session if one is open. A second call is a no-op.
    pub(crate) async fn close(&self) -> Result<()> {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => {
                session.close().await?;
                info!(service = self.service, "Disconnected");
                Ok(())
            }
            None => {
                debug!(service = self.service, "Disconnect requested while not connected");
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for LazySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazySession")
            .field("service", &self.service)
            .finish()
    }
}
