//! SFTP sessions over libssh2.

use std::fs::File;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;

use ssh2::{ErrorCode, FileStat, Session, Sftp};
use tracing::{debug, instrument};

use crate::config::SftpConfig;
use crate::error::{ConnectionError, RemoteError, RemoteResult};
use crate::remote::{Connector, RemoteFs};

/// Opens authenticated SFTP sessions with `ssh2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ssh2Connector;

/// A live SSH connection with its SFTP channel.
pub struct Ssh2Session {
    session: Session,
    sftp: Sftp,
}

fn remote_error(path: &str, e: ssh2::Error) -> RemoteError {
    match e.code() {
        ErrorCode::SFTP(code) => RemoteError::from_status(path, code, e.message()),
        ErrorCode::Session(code) => RemoteError::Status {
            path: path.to_string(),
            code,
            message: e.message().to_string(),
        },
    }
}

fn transfer_error(path: &str, source: io::Error) -> RemoteError {
    RemoteError::Transfer {
        path: path.to_string(),
        source,
    }
}

fn local_error(path: &Path, source: io::Error) -> RemoteError {
    RemoteError::Local {
        path: path.display().to_string(),
        source,
    }
}

impl Ssh2Connector {
    fn tcp_connect(config: &SftpConfig) -> Result<TcpStream, ConnectionError> {
        let port = config.options.port;
        let timeout = config.options.timeout();
        let addrs = (config.host.as_str(), port)
            .to_socket_addrs()
            .map_err(|_| ConnectionError::Resolve {
                host: config.host.clone(),
                port,
            })?;

        let mut last_err = None;
        for addr in addrs {
            let stream = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match stream {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(source) => ConnectionError::Tcp {
                host: config.host.clone(),
                port,
                source,
            },
            None => ConnectionError::Resolve {
                host: config.host.clone(),
                port,
            },
        })
    }

    /// Agent identities, then the configured key file, then the password.
    fn authenticate(session: &Session, config: &SftpConfig) -> Result<(), ConnectionError> {
        let user = config.user.as_str();
        let options = &config.options;

        if options.use_agent && session.userauth_agent(user).is_ok() && session.authenticated() {
            debug!("Authenticated {}@{} via agent", user, config.host);
            return Ok(());
        }

        if let Some(key) = &options.private_key {
            let passphrase = options.passphrase.as_deref();
            if session
                .userauth_pubkey_file(user, None, key, passphrase)
                .is_ok()
                && session.authenticated()
            {
                debug!("Authenticated {}@{} via key {}", user, config.host, key.display());
                return Ok(());
            }
        }

        if let Some(password) = &options.password {
            if session.userauth_password(user, password).is_ok() && session.authenticated() {
                debug!("Authenticated {}@{} via password", user, config.host);
                return Ok(());
            }
        }

        Err(ConnectionError::Auth {
            user: user.to_string(),
            host: config.host.clone(),
        })
    }
}

impl Connector for Ssh2Connector {
    type Session = Ssh2Session;

    #[instrument(skip(self, config), fields(host = %config.host, user = %config.user))]
    fn connect(&self, config: &SftpConfig) -> Result<Ssh2Session, ConnectionError> {
        let tcp = Self::tcp_connect(config)?;

        let handshake_error = |e: ssh2::Error| ConnectionError::Handshake {
            host: config.host.clone(),
            message: e.message().to_string(),
        };

        let mut session = Session::new().map_err(handshake_error)?;
        if let Some(timeout) = config.options.timeout() {
            session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        }
        session.set_compress(config.options.compress);
        session.set_tcp_stream(tcp);
        session.handshake().map_err(handshake_error)?;

        Self::authenticate(&session, config)?;

        let sftp = session.sftp().map_err(|e| ConnectionError::Subsystem {
            host: config.host.clone(),
            message: e.message().to_string(),
        })?;

        Ok(Ssh2Session { session, sftp })
    }
}

impl RemoteFs for Ssh2Session {
    fn list_dir(&mut self, path: &str) -> RemoteResult<Vec<String>> {
        let entries = self
            .sftp
            .readdir(Path::new(path))
            .map_err(|e| remote_error(path, e))?;
        Ok(entries
            .into_iter()
            .filter_map(|(entry, _)| {
                entry
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .collect())
    }

    fn mkdir(&mut self, path: &str, mode: u32) -> RemoteResult<()> {
        self.sftp
            .mkdir(Path::new(path), mode as i32)
            .map_err(|e| remote_error(path, e))
    }

    fn upload(&mut self, local: &Path, remote: &str) -> RemoteResult<u64> {
        let mut source = File::open(local).map_err(|e| local_error(local, e))?;
        let mut target = self
            .sftp
            .create(Path::new(remote))
            .map_err(|e| remote_error(remote, e))?;
        io::copy(&mut source, &mut target).map_err(|e| transfer_error(remote, e))
    }

    fn set_permissions(&mut self, path: &str, mode: u32) -> RemoteResult<()> {
        let stat = FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: Some(mode),
            atime: None,
            mtime: None,
        };
        self.sftp
            .setstat(Path::new(path), stat)
            .map_err(|e| remote_error(path, e))
    }

    fn remove_file(&mut self, path: &str) -> RemoteResult<()> {
        self.sftp
            .unlink(Path::new(path))
            .map_err(|e| remote_error(path, e))
    }

    fn remove_dir(&mut self, path: &str) -> RemoteResult<()> {
        self.sftp
            .rmdir(Path::new(path))
            .map_err(|e| remote_error(path, e))
    }

    fn download(&mut self, remote: &str, local: &Path) -> RemoteResult<u64> {
        let mut source = self
            .sftp
            .open(Path::new(remote))
            .map_err(|e| remote_error(remote, e))?;
        let mut target = File::create(local).map_err(|e| local_error(local, e))?;
        io::copy(&mut source, &mut target).map_err(|e| transfer_error(remote, e))
    }

    fn disconnect(&mut self) {
        if let Err(e) = self.session.disconnect(None, "closing", None) {
            debug!("SFTP disconnect failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SftpOptions;
    use std::net::TcpListener;

    fn local_config(listener: &TcpListener, timeout_secs: Option<u64>) -> SftpConfig {
        let port = listener.local_addr().unwrap().port();
        SftpConfig::new("127.0.0.1", "u").with_options(SftpOptions {
            port,
            timeout_secs,
            ..SftpOptions::default()
        })
    }

    #[test]
    fn test_tcp_connect_without_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        assert!(Ssh2Connector::tcp_connect(&local_config(&listener, None)).is_ok());
    }

    #[test]
    fn test_zero_timeout_falls_back_to_transport_default() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        assert!(Ssh2Connector::tcp_connect(&local_config(&listener, Some(0))).is_ok());
    }

    #[test]
    fn test_tcp_connect_with_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        assert!(Ssh2Connector::tcp_connect(&local_config(&listener, Some(5))).is_ok());
    }
}
