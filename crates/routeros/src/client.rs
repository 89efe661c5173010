//! Authenticated sessions against a router's management API.
//!
//! A session is single-owner: it is opened for one diagnostics or sync run and
//! closed at the end of it. Dropping a session closes the socket, so a
//! cancelled run never leaks a connection.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::api::{codec, command_words, Reply, ReplyKind, Response, Row};
use crate::error::{ApiError, ConnectionError};
use crate::net;

pub const DEFAULT_PLAIN_PORT: u16 = 8728;
pub const DEFAULT_TLS_PORT: u16 = 8729;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Plain,
    Tls,
}

impl Transport {
    pub fn default_port(self) -> u16 {
        match self {
            Transport::Plain => DEFAULT_PLAIN_PORT,
            Transport::Tls => DEFAULT_TLS_PORT,
        }
    }
}

/// Everything needed to open a session. The credential is held in clear text
/// only for the lifetime of a connect attempt.
#[derive(Clone)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub transport: Transport,
    pub timeout: Duration,
}

impl ConnectTarget {
    pub fn peer(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("transport", &self.transport)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Request/reply access to a router. Implemented by [`ApiSession`] and by test
/// doubles.
#[async_trait]
pub trait RouterApi: Send {
    async fn call(&mut self, command: &str, params: &[(&str, &str)]) -> Result<Reply, ApiError>;

    /// Ends the session. Errors are swallowed; the socket is released either way.
    async fn close(&mut self);
}

/// Opens sessions. The engine and the diagnostics runner only see this trait.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn RouterApi>, ConnectionError>;
}

pub trait ApiStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ApiStream for T {}

pub struct ApiSession {
    stream: BufStream<Box<dyn ApiStream>>,
    peer: String,
    timeout: Duration,
    next_tag: u32,
    closed: bool,
}

impl fmt::Debug for ApiSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSession")
            .field("peer", &self.peer)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ApiSession {
    pub fn new(stream: Box<dyn ApiStream>, peer: String, timeout: Duration) -> Self {
        Self {
            stream: BufStream::new(stream),
            peer,
            timeout,
            next_tag: 1,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Single round `/login`. Routers that answer with a challenge (`=ret=`)
    /// only speak the legacy scheme, which is not supported.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ConnectionError> {
        let reply = match self
            .call("/login", &[("name", username), ("password", password)])
            .await
        {
            Ok(reply) => reply,
            Err(ApiError::Trap { message, .. }) => {
                return Err(ConnectionError::AuthenticationFailed(message))
            }
            Err(e) => return Err(e.into()),
        };
        if reply.ret().is_some() {
            return Err(ConnectionError::Protocol(
                "router requested legacy challenge login".to_string(),
            ));
        }
        Ok(())
    }

    /// Sends one command and collects its full reply within the session timeout.
    pub async fn call(&mut self, command: &str, params: &[(&str, &str)]) -> Result<Reply, ApiError> {
        if self.closed {
            return Err(ApiError::SessionClosed);
        }
        let timeout = self.timeout;
        let words = command_words(command, params, None);
        let result = match tokio::time::timeout(timeout, self.exchange(&words)).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout(timeout)),
        };
        if let Err(e) = &result {
            if e.poisons_session() {
                warn!(peer = %self.peer, command = %command, error = %e, "Session is no longer usable.");
                self.closed = true;
            }
        }
        result
    }

    async fn exchange(&mut self, words: &[String]) -> Result<Reply, ApiError> {
        self.write_sentence(words).await?;

        let mut rows = Vec::new();
        let mut trap = None;
        loop {
            let response = self.read_response().await?;
            if response.tag.is_some() {
                // Leftover from an abandoned listener.
                continue;
            }
            match response.kind {
                ReplyKind::Re => rows.push(response.attributes),
                ReplyKind::Empty => {}
                ReplyKind::Trap => trap = Some(response.into_trap()),
                ReplyKind::Fatal => {
                    return Err(ApiError::Fatal(
                        response.message.unwrap_or_else(|| "no reason given".to_string()),
                    ))
                }
                ReplyKind::Done => {
                    return match trap {
                        Some(err) => Err(err),
                        None => Ok(Reply {
                            rows,
                            done: response.attributes,
                        }),
                    }
                }
            }
        }
    }

    /// Starts a streaming command (`listen`, `follow`). Rows arrive through the
    /// returned [`Listener`] until the router ends the stream or it is cancelled.
    pub async fn listen(
        &mut self,
        command: &str,
        params: &[(&str, &str)],
    ) -> Result<Listener<'_>, ApiError> {
        if self.closed {
            return Err(ApiError::SessionClosed);
        }
        let tag = self.allocate_tag();
        let words = command_words(command, params, Some(&tag));
        self.write_sentence(&words).await?;
        debug!(peer = %self.peer, command = %command, tag = %tag, "Listener started.");
        Ok(Listener {
            session: self,
            tag,
            finished: false,
        })
    }

    /// Sends `/quit` and drops the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let quit = codec::encode_sentence(&["/quit"]);
        let _ = tokio::time::timeout(self.timeout, async {
            self.stream.write_all(&quit).await?;
            self.stream.flush().await?;
            self.stream.shutdown().await
        })
        .await;
        debug!(peer = %self.peer, "Session closed.");
    }

    fn allocate_tag(&mut self) -> String {
        let tag = self.next_tag;
        self.next_tag = self.next_tag.wrapping_add(1);
        tag.to_string()
    }

    async fn write_sentence(&mut self, words: &[String]) -> Result<(), ApiError> {
        let bytes = codec::encode_sentence(words);
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<Response, ApiError> {
        let words = codec::read_sentence(&mut self.stream).await?;
        Response::parse(words)
    }
}

#[async_trait]
impl RouterApi for ApiSession {
    async fn call(&mut self, command: &str, params: &[(&str, &str)]) -> Result<Reply, ApiError> {
        ApiSession::call(self, command, params).await
    }

    async fn close(&mut self) {
        ApiSession::close(self).await
    }
}

/// A running streaming command. Dropping it without [`Listener::cancel`] leaves
/// the router still sending, so the session is marked closed.
pub struct Listener<'a> {
    session: &'a mut ApiSession,
    tag: String,
    finished: bool,
}

impl Listener<'_> {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Next streamed row, or `None` once the router sent `!done`.
    pub async fn next_row(&mut self) -> Option<Result<Row, ApiError>> {
        if self.finished {
            return None;
        }
        loop {
            let response = match self.session.read_response().await {
                Ok(response) => response,
                Err(e) => {
                    self.finished = true;
                    self.session.closed = true;
                    return Some(Err(e));
                }
            };
            if response.tag.as_deref() != Some(self.tag.as_str()) {
                continue;
            }
            match response.kind {
                ReplyKind::Re => return Some(Ok(response.attributes)),
                ReplyKind::Empty => {}
                ReplyKind::Trap => return Some(Err(response.into_trap())),
                ReplyKind::Done => {
                    self.finished = true;
                    return None;
                }
                ReplyKind::Fatal => {
                    self.finished = true;
                    self.session.closed = true;
                    return Some(Err(ApiError::Fatal(
                        response.message.unwrap_or_else(|| "no reason given".to_string()),
                    )));
                }
            }
        }
    }

    /// Issues `/cancel` for this stream and drains until both the stream and the
    /// cancel command have completed.
    pub async fn cancel(mut self) -> Result<(), ApiError> {
        if self.finished {
            return Ok(());
        }
        let cancel_tag = self.session.allocate_tag();
        let words = command_words("/cancel", &[("tag", self.tag.as_str())], Some(&cancel_tag));
        let timeout = self.session.timeout;
        let stream_tag = self.tag.clone();
        let session = &mut *self.session;

        let drained = tokio::time::timeout(timeout, async {
            session.write_sentence(&words).await?;
            let mut stream_done = false;
            let mut cancel_done = false;
            while !(stream_done && cancel_done) {
                let response = session.read_response().await?;
                if response.kind != ReplyKind::Done {
                    continue;
                }
                match response.tag.as_deref() {
                    Some(t) if t == stream_tag => stream_done = true,
                    Some(t) if t == cancel_tag => cancel_done = true,
                    _ => {}
                }
            }
            Ok::<(), ApiError>(())
        })
        .await;

        match drained {
            Ok(Ok(())) => {
                self.finished = true;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ApiError::Timeout(timeout)),
        }
    }
}

impl Drop for Listener<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.session.closed = true;
        }
    }
}

/// Connector for real routers over TCP, optionally TLS-wrapped.
#[derive(Default)]
pub struct RouterOsConnector {
    tls_config: OnceLock<Arc<rustls::ClientConfig>>,
}

impl RouterOsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn tls_config(&self) -> Result<Arc<rustls::ClientConfig>, ConnectionError> {
        if let Some(config) = self.tls_config.get() {
            return Ok(config.clone());
        }
        let config = Arc::new(build_tls_config()?);
        Ok(self.tls_config.get_or_init(|| config).clone())
    }

    /// Opens and authenticates a concrete session.
    pub async fn open(&self, target: &ConnectTarget) -> Result<ApiSession, ConnectionError> {
        let peer = target.peer();
        let tcp = net::connect_host(&target.host, target.port, target.timeout).await?;

        let stream: Box<dyn ApiStream> = match target.transport {
            Transport::Plain => Box::new(tcp),
            Transport::Tls => Box::new(self.wrap_tls(tcp, target).await?),
        };

        let mut session = ApiSession::new(stream, peer.clone(), target.timeout);
        if let Err(e) = session.login(&target.username, &target.password).await {
            warn!(peer = %peer, username = %target.username, error = %e, "Router login failed.");
            session.close().await;
            return Err(e);
        }
        info!(peer = %peer, username = %target.username, transport = ?target.transport, "Router session established.");
        Ok(session)
    }

    async fn wrap_tls(
        &self,
        tcp: TcpStream,
        target: &ConnectTarget,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, ConnectionError> {
        let server_name = rustls::pki_types::ServerName::try_from(target.host.clone())
            .map_err(|e| ConnectionError::Tls(format!("invalid server name '{}': {e}", target.host)))?;
        let connector = TlsConnector::from(self.tls_config()?);
        match tokio::time::timeout(target.timeout, connector.connect(server_name, tcp)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ConnectionError::Tls(e.to_string())),
            Err(_) => Err(ConnectionError::Timeout(target.timeout)),
        }
    }
}

#[async_trait]
impl Connector for RouterOsConnector {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn RouterApi>, ConnectionError> {
        let session = self.open(target).await?;
        Ok(Box::new(session))
    }
}

fn build_tls_config() -> Result<rustls::ClientConfig, ConnectionError> {
    let mut roots = rustls::RootCertStore::empty();
    let loaded = rustls_native_certs::load_native_certs();
    for err in &loaded.errors {
        warn!(error = %err, "Failed to load a platform root certificate.");
    }
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    debug!(added, ignored, "Loaded platform root certificates.");

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectionError::Tls(format!("unsupported TLS configuration: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}
