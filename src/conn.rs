use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_util::codec::Framed;
use url::Url;

use berkit::common::TagClass;
use berkit::structure::StructureTag;
use berkit::structures::{Integer, Null, OctetString, Sequence, Tag};

use crate::controls::Control;
use crate::ldap::{ConnOp, ItemSender, Ldap, MsgMap, ResultSender};
use crate::protocol::{LdapCodec, MaybeControls};
use crate::result::{LdapError, Result};
use crate::search::SearchItem;
use crate::RequestId;

/// Cadence of the drain re-check while a graceful close waits for
/// in-flight operations.
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_secs(3);

/// Additional settings for an LDAP connection.
///
/// An instance with default values is constructed by [`new()`](#method.new),
/// and all available settings can be replaced through a builder-like
/// interface, by calling the appropriate functions.
#[derive(Clone, Default)]
pub struct LdapConnSettings {
    conn_timeout: Option<Duration>,
    ssl: bool,
    #[cfg(feature = "tls")]
    connector: Option<native_tls::TlsConnector>,
    #[cfg(feature = "tls")]
    no_tls_verify: bool,
    unsolicited_fatal: Option<bool>,
    notice_tx: Option<mpsc::UnboundedSender<(Tag, Vec<Control>)>>,
}

impl LdapConnSettings {
    /// Create an instance of the structure with default settings.
    pub fn new() -> LdapConnSettings {
        LdapConnSettings {
            ..Default::default()
        }
    }

    /// Set the connection timeout. If a connection to the server can't be
    /// established before the timeout expires, an error will be returned to
    /// the user. Defaults to `None`, meaning an infinite timeout.
    pub fn set_conn_timeout(mut self, timeout: Duration) -> Self {
        self.conn_timeout = Some(timeout);
        self
    }

    /// Wrap the connection in TLS. Set implicitly when connecting through
    /// an `ldaps://` URL; needed explicitly only with
    /// [`LdapConnAsync::connect()`](struct.LdapConnAsync.html#method.connect).
    pub fn set_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    #[cfg(feature = "tls")]
    /// Set a custom TLS connector, which enables setting various options
    /// when establishing a secure connection. See the documentation for
    /// [native_tls](https://docs.rs/native-tls/). Defaults to `None`, which
    /// will use a connector with default settings.
    pub fn set_connector(mut self, connector: native_tls::TlsConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    #[cfg(feature = "tls")]
    /// If `true`, accept TLS certificates which fail validation, logging a
    /// warning when the connection is established. Certificate checking is
    /// strict by default; this is an explicit, noisy opt-out.
    pub fn set_no_tls_verify(mut self, no_tls_verify: bool) -> Self {
        self.no_tls_verify = no_tls_verify;
        self
    }

    /// Select the policy for responses whose message ID matches no pending
    /// operation. With `true` (the default), such a response is an error
    /// fatal to the connection; with `false`, it is logged and dropped.
    pub fn set_unsolicited_fatal(mut self, fatal: bool) -> Self {
        self.unsolicited_fatal = Some(fatal);
        self
    }

    /// Set the sink for unsolicited notifications (responses with message
    /// ID 0, see RFC 4511 §4.4). Without a sink, notifications are logged
    /// and dropped.
    pub fn set_notice_sender(mut self, tx: mpsc::UnboundedSender<(Tag, Vec<Control>)>) -> Self {
        self.notice_tx = Some(tx);
        self
    }
}

enum ConnType {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<tokio_native_tls::TlsStream<TcpStream>>),
}

impl AsyncRead for ConnType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            ConnType::Tls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnType {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            ConnType::Tls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_flush(cx),
            #[cfg(feature = "tls")]
            ConnType::Tls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnType::Tcp(ts) => Pin::new(ts).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            ConnType::Tls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}

enum OpSink {
    Single(ResultSender),
    Search(ItemSender),
}

impl OpSink {
    fn fail(self, e: LdapError) {
        match self {
            OpSink::Single(tx) => {
                let _ = tx.send(Err(e));
            }
            OpSink::Search(tx) => {
                let _ = tx.send(Err(e));
            }
        }
    }
}

/// One outstanding request: its completion sink and the submission
/// timestamp, keyed in the pending map by message ID.
struct PendingOp {
    sink: OpSink,
    started: Instant,
}

/// An operation whose ID has been assigned but whose bytes haven't been
/// flushed yet.
struct Outgoing {
    id: RequestId,
    tag: Tag,
    controls: MaybeControls,
    sink: Option<OpSink>,
    unbind: bool,
}

/// Asynchronous connection to an LDAP server.
///
/// The connection is constructed together with the [`Ldap`](struct.Ldap.html)
/// handle used to invoke operations on it, and must then be driven to
/// completion on its own task, most simply with the [`drive!`](macro.drive.html)
/// macro:
///
/// ```rust,no_run
/// # use ldapmux::{LdapConnAsync, Result};
/// # async fn _x() -> Result<()> {
/// let (conn, mut ldap) = LdapConnAsync::new("ldap://localhost:2389").await?;
/// ldapmux::drive!(conn);
/// ldap.simple_bind("uid=test,ou=People,dc=example,dc=org", "triplesecret").await?;
/// # Ok(())
/// # }
/// ```
///
/// The driver multiplexes every operation submitted through the handle (or
/// its clones) over the single socket, correlating responses to their
/// requests by message ID. A failure of the transport, or a protocol error
/// which makes the inbound stream unparseable, terminates the driver and
/// resolves every outstanding operation with the terminating error.
pub struct LdapConnAsync {
    stream: Framed<ConnType, LdapCodec>,
    rx: mpsc::UnboundedReceiver<ConnOp>,
    pending: HashMap<RequestId, PendingOp>,
    outbound: VecDeque<Outgoing>,
    bind_pending: bool,
    closing: bool,
    kill: bool,
    unbinding: bool,
    close_waiters: Vec<oneshot::Sender<()>>,
    unsolicited_fatal: bool,
    notice_tx: Option<mpsc::UnboundedSender<(Tag, Vec<Control>)>>,
}

impl LdapConnAsync {
    /// Open a connection to an LDAP server specified by `url`, which can
    /// have the __ldap__ or __ldaps__ scheme; the latter needs the __tls__
    /// feature, which is active by default. The port defaults to 389 for
    /// plain connections and 636 for TLS.
    pub async fn new(url: &str) -> Result<(LdapConnAsync, Ldap)> {
        LdapConnAsync::with_settings(LdapConnSettings::new(), url).await
    }

    /// Open a connection like [`new()`](#method.new), with additional
    /// settings in `settings`.
    pub async fn with_settings(
        mut settings: LdapConnSettings,
        url: &str,
    ) -> Result<(LdapConnAsync, Ldap)> {
        let url = Url::parse(url)?;
        let mut port = 389;
        match url.scheme() {
            "ldap" => settings.ssl = false,
            #[cfg(feature = "tls")]
            "ldaps" => {
                settings.ssl = true;
                port = 636;
            }
            s => return Err(LdapError::UnknownScheme(s.to_owned())),
        }
        if let Some(url_port) = url.port() {
            port = url_port;
        }
        let host = url.host_str().unwrap_or("localhost").to_owned();
        LdapConnAsync::connect(&host, port, settings).await
    }

    /// Open a connection to the server at (`host`, `port`). TLS wrapping
    /// and the other transport parameters are taken from `settings`.
    pub async fn connect(
        host: &str,
        port: u16,
        settings: LdapConnSettings,
    ) -> Result<(LdapConnAsync, Ldap)> {
        let tcp = match settings.conn_timeout {
            Some(timeout) => time::timeout(timeout, TcpStream::connect((host, port))).await??,
            None => TcpStream::connect((host, port)).await?,
        };
        let conn = if settings.ssl {
            #[cfg(feature = "tls")]
            {
                ConnType::Tls(Box::new(LdapConnAsync::tls_wrap(tcp, host, &settings).await?))
            }
            #[cfg(not(feature = "tls"))]
            {
                return Err(LdapError::ProtocolViolation {
                    reason: "ssl requested without TLS support",
                });
            }
        } else {
            ConnType::Tcp(tcp)
        };
        debug!("connected to {}:{}", host, port);
        let (tx, rx) = mpsc::unbounded_channel();
        let msgmap = Arc::new(Mutex::new(MsgMap::new()));
        let ldap = Ldap::new(tx, msgmap);
        let conn = LdapConnAsync {
            stream: Framed::new(conn, LdapCodec),
            rx,
            pending: HashMap::new(),
            outbound: VecDeque::new(),
            bind_pending: false,
            closing: false,
            kill: false,
            unbinding: false,
            close_waiters: vec![],
            unsolicited_fatal: settings.unsolicited_fatal.unwrap_or(true),
            notice_tx: settings.notice_tx,
        };
        Ok((conn, ldap))
    }

    #[cfg(feature = "tls")]
    async fn tls_wrap(
        tcp: TcpStream,
        host: &str,
        settings: &LdapConnSettings,
    ) -> Result<tokio_native_tls::TlsStream<TcpStream>> {
        let connector = match settings.connector.clone() {
            Some(connector) => connector,
            None => {
                let mut builder = native_tls::TlsConnector::builder();
                if settings.no_tls_verify {
                    warn!("accepting invalid TLS certificates for {}", host);
                    builder.danger_accept_invalid_certs(true);
                    builder.danger_accept_invalid_hostnames(true);
                }
                builder.build()?
            }
        };
        let connector = tokio_native_tls::TlsConnector::from(connector);
        Ok(connector.connect(host, tcp).await?)
    }

    /// Run the connection until it is closed or fails. Every operation
    /// pending at termination resolves with the terminating error, or with
    /// `ConnectionClosed` on an orderly shutdown.
    pub async fn drive(mut self) -> Result<()> {
        let mut drain_tick = time::interval(DRAIN_CHECK_INTERVAL);
        let fatal = loop {
            tokio::select! {
                op = self.rx.recv() => match op {
                    Some(op) => self.process(op),
                    // every handle is gone; results can no longer be observed
                    None => break None,
                },
                item = self.stream.next() => match item {
                    Some(Ok((id, (tag, controls)))) => {
                        if let Err(e) = self.route(id, tag, controls) {
                            break Some(e);
                        }
                    }
                    Some(Err(e)) => break Some(e),
                    None => break Some(LdapError::EndOfStream),
                },
                _ = drain_tick.tick(), if self.closing => {}
            }
            if self.kill {
                break None;
            }
            if let Err(e) = self.flush_outbound().await {
                break Some(e);
            }
            if self.unbinding {
                break None;
            }
            if self.closing && self.drained() {
                break None;
            }
        };
        self.teardown(fatal)
    }

    fn process(&mut self, op: ConnOp) {
        match op {
            ConnOp::Single {
                id,
                tag,
                controls,
                tx,
            } => {
                if self.closing {
                    let _ = tx.send(Err(LdapError::ConnectionClosed));
                    return;
                }
                if self.bind_pending && app_tag(&tag) == Some(0) {
                    let _ = tx.send(Err(LdapError::ProtocolViolation {
                        reason: "bind already in flight",
                    }));
                    return;
                }
                self.outbound.push_back(Outgoing {
                    id,
                    tag,
                    controls,
                    sink: Some(OpSink::Single(tx)),
                    unbind: false,
                });
            }
            ConnOp::Search {
                id,
                tag,
                controls,
                tx,
            } => {
                if self.closing {
                    let _ = tx.send(Err(LdapError::ConnectionClosed));
                    return;
                }
                self.outbound.push_back(Outgoing {
                    id,
                    tag,
                    controls,
                    sink: Some(OpSink::Search(tx)),
                    unbind: false,
                });
            }
            ConnOp::Abandon {
                id,
                target,
                tag,
                controls,
            } => {
                if let Some(op) = self.pending.remove(&target) {
                    debug!(
                        "msgid {}: abandoned after {:?}",
                        target,
                        op.started.elapsed()
                    );
                    op.sink.fail(LdapError::Abandoned { id: target });
                } else if let Some(pos) = self.outbound.iter().position(|out| out.id == target) {
                    // not flushed yet; the server never sees this one
                    let queued = self.outbound.remove(pos).expect("queued op");
                    if let Some(sink) = queued.sink {
                        sink.fail(LdapError::Abandoned { id: target });
                    }
                    return;
                }
                self.outbound.push_back(Outgoing {
                    id,
                    tag,
                    controls,
                    sink: None,
                    unbind: false,
                });
            }
            ConnOp::Unbind { id, tag } => {
                if self.closing {
                    return;
                }
                self.outbound.push_back(Outgoing {
                    id,
                    tag,
                    controls: None,
                    sink: None,
                    unbind: true,
                });
            }
            ConnOp::Close { immediate, tx } => {
                self.closing = true;
                self.close_waiters.push(tx);
                if immediate {
                    self.kill = true;
                }
            }
        }
    }

    /// Write out queued operations. The queue drains head-first so that
    /// submission order is wire order; a flushed Bind closes the gate until
    /// its response arrives, and nothing is written past an Unbind.
    async fn flush_outbound(&mut self) -> Result<()> {
        while !self.bind_pending {
            let out = match self.outbound.pop_front() {
                Some(out) => out,
                None => break,
            };
            let is_bind = app_tag(&out.tag) == Some(0);
            debug!("msgid {}: sending request", out.id);
            self.stream.feed((out.id, out.tag, out.controls)).await?;
            if let Some(sink) = out.sink {
                self.pending.insert(
                    out.id,
                    PendingOp {
                        sink,
                        started: Instant::now(),
                    },
                );
            }
            if out.unbind {
                self.unbinding = true;
                break;
            }
            if is_bind {
                self.bind_pending = true;
            }
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Hand one inbound envelope to the operation pending under its
    /// message ID.
    fn route(&mut self, id: RequestId, tag: Tag, controls: Vec<Control>) -> Result<()> {
        let protoop = match tag {
            Tag::StructureTag(st) => st,
            _ => {
                return Err(LdapError::MalformedPdu {
                    reason: "protocol op shape",
                })
            }
        };
        if id == 0 {
            // RFC 4511 unsolicited notification
            match &self.notice_tx {
                Some(tx) => {
                    let _ = tx.send((Tag::StructureTag(protoop), controls));
                }
                None => warn!("dropping unsolicited notification"),
            }
            return Ok(());
        }
        let app_id = protoop.id;
        match app_id {
            // searchResEntry / searchResRef / intermediateResponse extend
            // the stream and stay in the pending map
            4 | 19 | 25 => {
                let pending = match self.pending.get(&id) {
                    Some(pending) => pending,
                    None => return self.unsolicited(id),
                };
                match &pending.sink {
                    OpSink::Search(tx) => {
                        let item = match app_id {
                            4 => SearchItem::Entry(protoop),
                            19 => SearchItem::Referral(protoop),
                            _ => SearchItem::Intermediate(protoop),
                        };
                        let _ = tx.send(Ok((item, controls)));
                    }
                    OpSink::Single(_) => {
                        return Err(LdapError::ProtocolViolation {
                            reason: "search item for a single-response op",
                        })
                    }
                }
            }
            // searchResDone terminates the stream
            5 => {
                let pending = match self.pending.remove(&id) {
                    Some(pending) => pending,
                    None => return self.unsolicited(id),
                };
                match pending.sink {
                    OpSink::Search(tx) => {
                        debug!(
                            "msgid {}: search done after {:?}",
                            id,
                            pending.started.elapsed()
                        );
                        let _ = tx.send(Ok((SearchItem::Done(Tag::StructureTag(protoop)), controls)));
                    }
                    OpSink::Single(_) => {
                        return Err(LdapError::ProtocolViolation {
                            reason: "search done for a single-response op",
                        })
                    }
                }
            }
            // every single-response op; a bind response additionally
            // reopens the outbound gate
            1 | 7 | 9 | 11 | 13 | 15 | 24 => {
                if app_id == 1 {
                    self.bind_pending = false;
                }
                let pending = match self.pending.remove(&id) {
                    Some(pending) => pending,
                    None => return self.unsolicited(id),
                };
                match pending.sink {
                    OpSink::Single(tx) => {
                        debug!(
                            "msgid {}: response after {:?}",
                            id,
                            pending.started.elapsed()
                        );
                        let _ = tx.send(Ok((Tag::StructureTag(protoop), controls)));
                    }
                    OpSink::Search(_) => {
                        return Err(LdapError::ProtocolViolation {
                            reason: "single response for a search op",
                        })
                    }
                }
            }
            _ => {
                return Err(LdapError::MalformedPdu {
                    reason: "unknown protocol op tag",
                })
            }
        }
        Ok(())
    }

    fn unsolicited(&self, id: RequestId) -> Result<()> {
        if self.unsolicited_fatal {
            Err(LdapError::UnsolicitedResponse { id })
        } else {
            warn!("dropping unsolicited response, msgid {}", id);
            Ok(())
        }
    }

    fn drained(&self) -> bool {
        self.pending.is_empty() && self.outbound.is_empty()
    }

    /// Resolve everything still outstanding and destroy the socket, which
    /// is dropped with the connection itself.
    fn teardown(mut self, fatal: Option<LdapError>) -> Result<()> {
        let err = fatal.clone().unwrap_or(LdapError::ConnectionClosed);
        for (_, op) in self.pending.drain() {
            op.sink.fail(err.clone());
        }
        for out in self.outbound.drain(..) {
            if let Some(sink) = out.sink {
                sink.fail(err.clone());
            }
        }
        for tx in self.close_waiters.drain(..) {
            let _ = tx.send(());
        }
        match fatal {
            Some(e) => {
                warn!("connection terminated: {}", e);
                Err(e)
            }
            None => {
                debug!("connection closed");
                Ok(())
            }
        }
    }
}

/// Application tag of an outbound protocol op.
fn app_tag(tag: &Tag) -> Option<u64> {
    match tag {
        Tag::Sequence(Sequence {
            class: TagClass::Application,
            id,
            ..
        })
        | Tag::OctetString(OctetString {
            class: TagClass::Application,
            id,
            ..
        })
        | Tag::Integer(Integer {
            class: TagClass::Application,
            id,
            ..
        })
        | Tag::Null(Null {
            class: TagClass::Application,
            id,
            ..
        })
        | Tag::StructureTag(StructureTag {
            class: TagClass::Application,
            id,
            ..
        }) => Some(*id),
        _ => None,
    }
}
