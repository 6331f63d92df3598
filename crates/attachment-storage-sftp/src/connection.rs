//! Per-thread session cache keyed by connection settings.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, info};

use crate::config::SftpConfig;
use crate::error::ConnectionError;
use crate::remote::{Connector, RemoteFs};

/// Session cache handle shared by the backends of one thread.
///
/// `Rc` keeps the handle on the thread that created it; every worker thread
/// builds its own manager and therefore its own sessions.
pub type SharedConnections<C> = Rc<RefCell<ConnectionManager<C>>>;

/// Owns one live session per distinct [`SftpConfig`] value.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    sessions: HashMap<SftpConfig, C::Session>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            sessions: HashMap::new(),
        }
    }

    /// A new manager wrapped for sharing between backends on this thread.
    pub fn shared(connector: C) -> SharedConnections<C> {
        Rc::new(RefCell::new(Self::new(connector)))
    }

    /// Cached session for `config`, connecting on first use.
    pub fn acquire(&mut self, config: &SftpConfig) -> Result<&mut C::Session, ConnectionError> {
        if !self.sessions.contains_key(config) {
            info!("Opening SFTP session to {}@{}", config.user, config.host);
            let session = self.connector.connect(config)?;
            return Ok(self.sessions.entry(config.clone()).or_insert(session));
        }
        self.sessions
            .get_mut(config)
            .ok_or_else(|| ConnectionError::Subsystem {
                host: config.host.clone(),
                message: "session dropped from cache".to_string(),
            })
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Disconnect and drop every session, returning how many were closed.
    pub fn close_all(&mut self) -> usize {
        let count = self.sessions.len();
        for (config, mut session) in self.sessions.drain() {
            debug!("Closing SFTP session to {}@{}", config.user, config.host);
            session.disconnect();
        }
        count
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.close_all();
    }
}
