//! One-shot SSH command execution.
//!
//! Every remote operation is a fresh connection: dial, handshake,
//! authenticate with an in-memory decrypted key, run one payload, collect
//! combined output, disconnect. libssh2 is blocking, so the whole exchange
//! runs on the blocking pool with the async side enforcing the deadline.

use async_trait::async_trait;
use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;

pub mod script;

#[derive(Debug, Error)]
pub enum SshError {
    #[error("could not resolve {0}")]
    Resolve(String),
    #[error("connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ssh handshake with {host}: {source}")]
    Handshake {
        host: String,
        #[source]
        source: ssh2::Error,
    },
    #[error("authentication for {user}@{host} failed: {source}")]
    Auth {
        user: String,
        host: String,
        #[source]
        source: ssh2::Error,
    },
    #[error("remote execution on {host}: {source}")]
    Exec {
        host: String,
        #[source]
        source: ssh2::Error,
    },
    #[error("i/o during remote execution on {host}: {source}")]
    Io {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("operation on {0} timed out after {1:?}")]
    Timeout(String, Duration),
    #[error("blocking task failed: {0}")]
    Join(String),
}

/// Where and as whom to execute.
#[derive(Debug, Clone)]
pub struct ExecTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Decrypted PEM, never written to local disk.
    pub private_key_pem: String,
}

#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    /// Combined stdout + stderr.
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last `n` bytes of output, aligned to a char boundary.
    pub fn tail(&self, n: usize) -> &str {
        let bytes = self.output.as_bytes();
        if bytes.len() <= n {
            return &self.output;
        }
        let mut start = bytes.len() - n;
        while !self.output.is_char_boundary(start) {
            start += 1;
        }
        &self.output[start..]
    }
}

#[async_trait]
pub trait RemoteExec: Send + Sync {
    async fn exec(
        &self,
        target: &ExecTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, SshError>;
}

/// libssh2-backed executor.
pub struct Ssh2Executor;

impl Ssh2Executor {
    fn exec_blocking(
        target: &ExecTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, SshError> {
        let authority = format!("{}:{}", target.host, target.port);
        let addr = authority
            .to_socket_addrs()
            .map_err(|_| SshError::Resolve(authority.clone()))?
            .next()
            .ok_or_else(|| SshError::Resolve(authority.clone()))?;

        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|source| SshError::Connect {
            host: target.host.clone(),
            source,
        })?;
        tcp.set_read_timeout(Some(timeout))
            .and_then(|()| tcp.set_write_timeout(Some(timeout)))
            .map_err(|source| SshError::Connect {
                host: target.host.clone(),
                source,
            })?;

        let mut session = ssh2::Session::new().map_err(|source| SshError::Handshake {
            host: target.host.clone(),
            source,
        })?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|source| SshError::Handshake {
            host: target.host.clone(),
            source,
        })?;
        session
            .userauth_pubkey_memory(&target.user, None, &target.private_key_pem, None)
            .map_err(|source| SshError::Auth {
                user: target.user.clone(),
                host: target.host.clone(),
                source,
            })?;

        let mut channel = session
            .channel_session()
            .map_err(|source| SshError::Exec {
                host: target.host.clone(),
                source,
            })?;
        // The automation image is started with `-it`; give it the pty it
        // expects, and merge stderr into the stream we read.
        channel
            .request_pty("xterm", None, None)
            .and_then(|()| channel.handle_extended_data(ssh2::ExtendedData::Merge))
            .and_then(|()| channel.exec(command))
            .map_err(|source| SshError::Exec {
                host: target.host.clone(),
                source,
            })?;

        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|source| SshError::Io {
                host: target.host.clone(),
                source,
            })?;
        channel.wait_close().map_err(|source| SshError::Exec {
            host: target.host.clone(),
            source,
        })?;
        let exit_code = channel.exit_status().map_err(|source| SshError::Exec {
            host: target.host.clone(),
            source,
        })?;

        Ok(ExecOutput { exit_code, output })
    }
}

#[async_trait]
impl RemoteExec for Ssh2Executor {
    async fn exec(
        &self,
        target: &ExecTarget,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecOutput, SshError> {
        let target_cloned = target.clone();
        let command = command.to_string();
        let handle = tokio::task::spawn_blocking(move || {
            Self::exec_blocking(&target_cloned, &command, timeout)
        });

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SshError::Join(join_err.to_string())),
            Err(_) => Err(SshError::Timeout(target.host.clone(), timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_respects_char_boundaries() {
        let out = ExecOutput {
            exit_code: 1,
            output: "héllo wörld".to_string(),
        };
        // cutting into the middle of a multibyte char must not panic
        for n in 0..out.output.len() + 2 {
            let _ = out.tail(n);
        }
        assert_eq!(out.tail(4), "rld");
        assert_eq!(out.tail(1000), "héllo wörld");
    }
}
