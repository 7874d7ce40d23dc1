//! The DNS-over-DTLS client connection.
//!
//! A [Connection] talks to a single, pre-configured server over one
//! persistent DTLS session. [connect][Connection::connect] binds an
//! ephemeral datagram socket, registers the credential with the store and
//! drives the handshake with the retransmission backoff of RFC 6347.
//! [query][Connection::query] then serializes queries over the established
//! channel, one at a time, with a fixed per-attempt timeout budget and a
//! bounded number of retries. [disconnect][Connection::disconnect] tears
//! the whole session down again: secure session, channel, socket and the
//! stored credential together.
//!
//! One exclusive lock covers the session state and the scratch buffer all
//! operations share, so at most one of establishing, tearing down or
//! querying runs at any time. The scratch buffer is the only place where
//! unencrypted DNS content is resident and is zeroed again before any
//! operation returns.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use crate::cache::ResolverCache;
use crate::clock::{Clock, Elapsed, SystemClock};
use crate::credman::{
    Credential, CredentialStore, CredentialTag, CredentialType,
};
use crate::error::Error;
use crate::msg::{AddressFamily, QueryCodec, HEADER_LEN};
use crate::protocol::{
    AsyncBind, DtlsChannel, DtlsConnect, RecvError, UdpBind,
};
use bytes::BytesMut;
use rand::Rng;
use std::cmp;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

//------------ Configuration Constants ---------------------------------------

/// Configuration limits for the maximum domain name length.
const MAX_NAME_LEN: DefMinMax<usize> = DefMinMax::new(255, 1, 255);

/// Configuration limits for the maximum number of query attempts.
const MAX_RETRIES: DefMinMax<u8> = DefMinMax::new(2, 1, 100);

/// Configuration limits for the per-attempt query timeout.
const QUERY_TIMEOUT: DefMinMax<Duration> = DefMinMax::new(
    Duration::from_millis(1000),
    Duration::from_millis(1),
    Duration::from_secs(60),
);

/// Configuration limits for the session establishment window.
///
/// The default follows RFC 8094, Section 3.1.
const SESSION_TIMEOUT: DefMinMax<Duration> = DefMinMax::new(
    Duration::from_secs(15),
    Duration::from_secs(1),
    Duration::from_secs(120),
);

/// Configuration limits for the initial handshake receive timeout.
const HANDSHAKE_RECV_TIMEOUT: DefMinMax<Duration> = DefMinMax::new(
    Duration::from_millis(1000),
    Duration::from_millis(10),
    Duration::from_secs(15),
);

/// Configuration limits for the message buffer size.
const MSG_LEN: DefMinMax<usize> = DefMinMax::new(512, 64, 65535);

/// First port of the IANA dynamic port range.
const DYNAMIC_PORT_MIN: u16 = 49152;

/// Last port of the IANA dynamic port range.
const DYNAMIC_PORT_MAX: u16 = 65535;

//------------ Config --------------------------------------------------------

/// Configuration of a DNS-over-DTLS connection.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum length of a domain name in a query.
    max_name_len: usize,

    /// Maximum number of attempts per query.
    max_retries: u8,

    /// Timeout budget of a single query attempt.
    query_timeout: Duration,

    /// Window within which the handshake must be triggered.
    session_timeout: Duration,

    /// Receive timeout of the first handshake attempt.
    handshake_recv_timeout: Duration,

    /// Size of the shared message buffer.
    msg_len: usize,
}

impl Config {
    /// Creates a new config with default values.
    pub fn new() -> Self {
        Default::default()
    }

    /// Returns the maximum length of a domain name.
    pub fn max_name_len(&self) -> usize {
        self.max_name_len
    }

    /// Sets the maximum length of a domain name.
    ///
    /// If this value is too small or too large, it will be caped.
    pub fn set_max_name_len(&mut self, value: usize) {
        self.max_name_len = MAX_NAME_LEN.limit(value)
    }

    /// Returns the maximum number of attempts per query.
    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    /// Sets the maximum number of attempts per query.
    ///
    /// If this value is too small or too large, it will be caped.
    pub fn set_max_retries(&mut self, value: u8) {
        self.max_retries = MAX_RETRIES.limit(value)
    }

    /// Returns the timeout budget of a single query attempt.
    ///
    /// Unlike the handshake receive timeout, this budget is the same for
    /// every attempt.
    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Sets the timeout budget of a single query attempt.
    ///
    /// If this value is too small or too large, it will be caped.
    pub fn set_query_timeout(&mut self, value: Duration) {
        self.query_timeout = QUERY_TIMEOUT.limit(value)
    }

    /// Returns the session establishment window.
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Sets the session establishment window.
    ///
    /// If this value is too small or too large, it will be caped.
    pub fn set_session_timeout(&mut self, value: Duration) {
        self.session_timeout = SESSION_TIMEOUT.limit(value)
    }

    /// Returns the receive timeout of the first handshake attempt.
    ///
    /// Every further attempt within the session establishment window
    /// doubles the previous timeout.
    pub fn handshake_recv_timeout(&self) -> Duration {
        self.handshake_recv_timeout
    }

    /// Sets the receive timeout of the first handshake attempt.
    ///
    /// If this value is too small or too large, it will be caped.
    pub fn set_handshake_recv_timeout(&mut self, value: Duration) {
        self.handshake_recv_timeout = HANDSHAKE_RECV_TIMEOUT.limit(value)
    }

    /// Returns the size of the shared message buffer.
    pub fn msg_len(&self) -> usize {
        self.msg_len
    }

    /// Sets the size of the shared message buffer.
    ///
    /// If this value is too small or too large, it will be caped.
    pub fn set_msg_len(&mut self, value: usize) {
        self.msg_len = MSG_LEN.limit(value)
    }

    /// Returns the length of the smallest well formed reply.
    ///
    /// The minimum domain name length is one, so the smallest possible
    /// record takes seven octets beyond the message header. Replies at or
    /// below this length are treated as malformed without parsing.
    pub fn min_reply_len(&self) -> usize {
        HEADER_LEN + 7
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_name_len: MAX_NAME_LEN.default(),
            max_retries: MAX_RETRIES.default(),
            query_timeout: QUERY_TIMEOUT.default(),
            session_timeout: SESSION_TIMEOUT.default(),
            handshake_recv_timeout: HANDSHAKE_RECV_TIMEOUT.default(),
            msg_len: MSG_LEN.default(),
        }
    }
}

//------------ Connection ----------------------------------------------------

/// A DNS-over-DTLS client connection.
///
/// The connection is generic over the DTLS implementation `D`, the
/// credential store `S`, the resolver cache `C`, the message codec `M`,
/// the socket layer `B` and the clock `T`. Cloning is cheap and all clones
/// share the same single session.
pub struct Connection<D, S, C, M, B = UdpBind, T = SystemClock>
where
    B: AsyncBind,
    D: DtlsConnect<B::Socket>,
{
    /// Reference to the actual connection object.
    inner: Arc<InnerConnection<D, S, C, M, B, T>>,
}

impl<D, S, C, M, B, T> Connection<D, S, C, M, B, T>
where
    B: AsyncBind,
    D: DtlsConnect<B::Socket>,
    S: CredentialStore,
    C: ResolverCache,
    M: QueryCodec,
    T: Clock,
{
    /// Creates a new connection with a default configuration.
    pub fn new(bind: B, dtls: D, store: S, cache: C, codec: M) -> Self {
        Self::with_config(bind, dtls, store, cache, codec, Config::default())
    }

    /// Creates a new connection with the given configuration.
    pub fn with_config(
        bind: B,
        dtls: D,
        store: S,
        cache: C,
        codec: M,
        config: Config,
    ) -> Self {
        Self {
            inner: Arc::new(InnerConnection::new(
                bind, dtls, store, cache, codec, config,
            )),
        }
    }

    /// Establish a session with the given server.
    ///
    /// Binds a datagram socket to a random ephemeral port, adds the
    /// credential to the store, creates the secure channel and triggers
    /// the handshake. An existing session is torn down first. On failure
    /// no partial state remains: socket, credential and channel are all
    /// unwound before the error is returned.
    pub async fn connect(
        &self,
        server: SocketAddr,
        credential: Credential,
    ) -> Result<(), Error> {
        self.inner.connect(server, credential).await
    }

    /// Tear down the current session.
    ///
    /// Destroys the secure session, closes channel and socket and removes
    /// the credential from the store. Does nothing if no session is
    /// established; never fails.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    /// Returns the server the current session is established with.
    pub async fn get_server(&self) -> Result<SocketAddr, Error> {
        self.inner.get_server().await
    }

    /// Configure or unconfigure the server in a single operation.
    ///
    /// `Some` establishes a session with the given server,
    /// [connect][Self::connect]; `None` tears the current one down,
    /// [disconnect][Self::disconnect].
    pub async fn set_server(
        &self,
        server: Option<(SocketAddr, Credential)>,
    ) -> Result<(), Error> {
        match server {
            Some((server, credential)) => {
                self.inner.connect(server, credential).await
            }
            None => {
                self.inner.disconnect().await;
                Ok(())
            }
        }
    }

    /// Resolve a domain name into an address.
    ///
    /// The cache is consulted first; a hit returns without touching the
    /// session. Cache misses require an established session and are
    /// retried up to the configured limit, after which the most recent
    /// concrete error is returned, so a server that sent garbage can be
    /// told apart from one that never answered.
    pub async fn query(
        &self,
        name: &str,
        family: AddressFamily,
    ) -> Result<IpAddr, Error> {
        self.inner.query(name, family).await
    }
}

impl<D, S, C, M, B, T> Clone for Connection<D, S, C, M, B, T>
where
    B: AsyncBind,
    D: DtlsConnect<B::Socket>,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

//------------ InnerConnection -----------------------------------------------

/// Actual implementation of the DNS-over-DTLS connection.
struct InnerConnection<D, S, C, M, B, T>
where
    B: AsyncBind,
    D: DtlsConnect<B::Socket>,
{
    /// User configuration variables.
    config: Config,

    /// Creates the datagram sockets sessions run over.
    bind: B,

    /// Creates the secure channels on top of the sockets.
    dtls: D,

    /// The credential store sessions authenticate against.
    store: S,

    /// The cache of resolved addresses.
    cache: C,

    /// The message codec.
    codec: M,

    /// Source of time and delays.
    clock: T,

    /// The session state and scratch buffer, under the one exclusive lock
    /// that serializes connect, disconnect and query.
    state: Mutex<State<D::Channel>>,
}

impl<D, S, C, M, B, T> InnerConnection<D, S, C, M, B, T>
where
    B: AsyncBind,
    D: DtlsConnect<B::Socket>,
    S: CredentialStore,
    C: ResolverCache,
    M: QueryCodec,
    T: Clock,
{
    /// Create a new InnerConnection object.
    fn new(
        bind: B,
        dtls: D,
        store: S,
        cache: C,
        codec: M,
        config: Config,
    ) -> Self {
        let msg_len = config.msg_len;
        Self {
            config,
            bind,
            dtls,
            store,
            cache,
            codec,
            clock: T::new(),
            state: Mutex::new(State {
                session: None,
                buf: ScratchBuf::new(msg_len),
            }),
        }
    }

    /// Implementation of the connect operation.
    async fn connect(
        &self,
        server: SocketAddr,
        credential: Credential,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let res = self.connect_session(&mut state, server, credential).await;
        state.buf.scrub();
        res
    }

    /// Build up a session: socket, credential, channel, handshake.
    ///
    /// Runs under the lock. Every failure path unwinds the state built so
    /// far; the caller scrubs the buffer.
    async fn connect_session(
        &self,
        state: &mut State<D::Channel>,
        server: SocketAddr,
        credential: Credential,
    ) -> Result<(), Error> {
        if let Some(established) = state.session.take() {
            self.teardown(established);
        }
        let socket = self.bind_ephemeral(server).await?;
        let credential_type = credential.credential_type();
        let tag = self.store.add(&credential).map_err(|err| {
            debug!("unable to add credential to store: {err}");
            Error::from(err)
        })?;
        let mut channel = match self.dtls.connect(socket, tag) {
            Ok(channel) => channel,
            Err(err) => {
                debug!("unable to create DTLS channel: {err}");
                self.delete_credential(tag, credential_type);
                return Err(Error::ChannelCreate(Arc::new(err)));
            }
        };
        if let Err(err) =
            self.handshake(&mut state.buf, &mut channel, server).await
        {
            channel.destroy_session();
            drop(channel);
            self.delete_credential(tag, credential_type);
            return Err(err);
        }
        state.session = Some(Established {
            channel,
            tag,
            credential_type,
            next_id: rand::random(),
        });
        Ok(())
    }

    /// Bind a datagram socket to a fresh random ephemeral port.
    ///
    /// Retries with another port as long as binding reports the address in
    /// use; any other error aborts.
    async fn bind_ephemeral(
        &self,
        server: SocketAddr,
    ) -> Result<B::Socket, Error> {
        loop {
            let port = rand::thread_rng()
                .gen_range(DYNAMIC_PORT_MIN..=DYNAMIC_PORT_MAX);
            let local = match server {
                SocketAddr::V4(_) => {
                    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
                }
                SocketAddr::V6(_) => {
                    SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)
                }
            };
            match self.bind.bind(local, server).await {
                Ok(socket) => return Ok(socket),
                Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
                    continue
                }
                Err(err) => {
                    debug!("unable to create datagram socket: {err}");
                    return Err(Error::Bind(Arc::new(err)));
                }
            }
        }
    }

    /// Drive the handshake until its signal arrives or the window closes.
    ///
    /// Each attempt initializes a fresh session and waits for the
    /// distinguished handshake signal with the current per-attempt
    /// timeout. A failed wait sleeps out the rest of the attempt and
    /// doubles the timeout, the retransmission backoff of RFC 6347,
    /// Section 4.2.4.1. A failed initialization retries immediately; the
    /// window still bounds it.
    async fn handshake(
        &self,
        buf: &mut ScratchBuf,
        channel: &mut D::Channel,
        server: SocketAddr,
    ) -> Result<(), Error> {
        let window = self.clock.now();
        let mut attempt_timeout = self.config.handshake_recv_timeout;
        while window.elapsed() < self.config.session_timeout {
            let attempt = self.clock.now();
            match channel.init_session(server).await {
                Ok(()) => {
                    let res =
                        channel.recv(buf.as_mut(), attempt_timeout).await;
                    if matches!(res, Err(RecvError::HandshakeInProgress)) {
                        return Ok(());
                    }
                    debug!(
                        timeout = ?attempt_timeout,
                        "unable to establish DTLS handshake: {res:?}"
                    );
                    channel.destroy_session();
                    let spent = attempt.elapsed();
                    if spent < attempt_timeout {
                        self.clock.sleep(attempt_timeout - spent).await;
                    }
                    attempt_timeout *= 2;
                }
                Err(err) => {
                    debug!("unable to initialize DTLS session: {err}");
                    channel.destroy_session();
                }
            }
        }
        Err(Error::HandshakeTimeout)
    }

    /// Implementation of the disconnect operation.
    async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        if let Some(established) = state.session.take() {
            self.teardown(established);
        }
    }

    /// Tear down an established session completely.
    ///
    /// Secure session, channel, socket and the stored credential go
    /// together; deletion from the store is best effort.
    fn teardown(&self, established: Established<D::Channel>) {
        let Established {
            mut channel,
            tag,
            credential_type,
            ..
        } = established;
        channel.destroy_session();
        drop(channel);
        self.delete_credential(tag, credential_type);
    }

    /// Remove a credential from the store, best effort.
    fn delete_credential(
        &self,
        tag: CredentialTag,
        credential_type: CredentialType,
    ) {
        if let Err(err) = self.store.delete(tag, credential_type) {
            warn!("unable to delete credential from store: {err}");
        }
    }

    /// Implementation of the get_server operation.
    async fn get_server(&self) -> Result<SocketAddr, Error> {
        let state = self.state.lock().await;
        match &state.session {
            Some(established) => Ok(established.channel.peer_addr()),
            None => Err(Error::NotConnected),
        }
    }

    /// Implementation of the query operation.
    async fn query(
        &self,
        name: &str,
        family: AddressFamily,
    ) -> Result<IpAddr, Error> {
        if name.len() > self.config.max_name_len {
            return Err(Error::NameTooLong);
        }
        if let Some(addr) = self.cache.lookup(name, family) {
            return Ok(addr);
        }
        let mut state = self.state.lock().await;
        let res = self.query_session(&mut state, name, family).await;
        state.buf.scrub();
        res
    }

    /// Run the query retry loop over the established session.
    ///
    /// Runs under the lock; the caller scrubs the buffer.
    async fn query_session(
        &self,
        state: &mut State<D::Channel>,
        name: &str,
        family: AddressFamily,
    ) -> Result<IpAddr, Error> {
        let State { session, buf } = state;
        let Some(established) = session.as_mut() else {
            return Err(Error::ConnectionRefused);
        };
        let id = established.next_id;
        established.next_id = established.next_id.wrapping_add(1);

        let mut result = Err(Error::QueryTimeout);
        for _ in 0..self.config.max_retries {
            let mut budget = self.config.query_timeout;
            let len =
                self.codec.compose_query(buf.as_mut(), name, id, family);

            let start = self.clock.now();
            let sent = established
                .channel
                .send(&buf.as_ref()[..len], budget)
                .await;
            let send_duration = start.elapsed();
            if send_duration > budget {
                result = Err(Error::QueryTimeout);
                break;
            }
            budget -= send_duration;
            if !matches!(sent, Ok(n) if n > 0) {
                // Wait out the failed attempt before giving the transport
                // another chance.
                self.clock.sleep(budget).await;
            }

            match established.channel.recv(buf.as_mut(), budget).await {
                Ok(len) if len > self.config.min_reply_len() => {
                    match self.codec.parse_reply(&buf.as_ref()[..len], family)
                    {
                        Ok(answer) => {
                            self.cache.insert(
                                name,
                                family,
                                answer.addr,
                                answer.ttl,
                            );
                            result = Ok(answer.addr);
                            break;
                        }
                        Err(_) => {
                            result = Err(Error::MalformedReply);
                        }
                    }
                }
                Ok(_) => {
                    result = Err(Error::MalformedReply);
                }
                Err(RecvError::TimedOut)
                | Err(RecvError::HandshakeInProgress) => {
                    result = Err(Error::QueryTimeout);
                }
                Err(RecvError::Io(err)) => {
                    result = Err(Error::Receive(Arc::new(err)));
                }
            }
        }
        result
    }
}

//------------ State ---------------------------------------------------------

/// The lock-protected per-connection state.
struct State<Chan> {
    /// The established session, if there is one.
    session: Option<Established<Chan>>,

    /// The shared scratch buffer.
    buf: ScratchBuf,
}

//------------ Established ---------------------------------------------------

/// A session that has completed its handshake trigger.
///
/// Channel, credential identifiers and the query id counter live and die
/// together; teardown is all of them or none.
struct Established<Chan> {
    /// The secure channel, owning the underlying socket.
    channel: Chan,

    /// Tag of the credential bound to this session.
    tag: CredentialTag,

    /// Type of the credential bound to this session.
    credential_type: CredentialType,

    /// Id for the next query, incremented with wraparound per query.
    next_id: u16,
}

//------------ ScratchBuf ----------------------------------------------------

/// The one buffer unencrypted DNS content passes through.
///
/// Shared by handshake receives, query composition, send and receive.
/// Operations scrub it before they return; dropping it scrubs as well so
/// the content cannot outlive the connection.
struct ScratchBuf {
    /// The buffer itself, at its full length at all times.
    buf: BytesMut,
}

impl ScratchBuf {
    /// Creates a zeroed buffer of the given length.
    fn new(len: usize) -> Self {
        Self {
            buf: BytesMut::zeroed(len),
        }
    }

    /// Returns the whole buffer for writing.
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Returns the whole buffer for reading.
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }

    /// Overwrite the buffer with zeros.
    fn scrub(&mut self) {
        self.buf.fill(0)
    }
}

impl Drop for ScratchBuf {
    fn drop(&mut self) {
        self.scrub()
    }
}

//------------ DefMinMax -----------------------------------------------------

/// The default, minimum, and maximum values for a config variable.
#[derive(Clone, Copy)]
struct DefMinMax<T> {
    /// The default value,
    def: T,

    /// The minimum value,
    min: T,

    /// The maximum value,
    max: T,
}

impl<T> DefMinMax<T> {
    /// Creates a new value.
    const fn new(def: T, min: T, max: T) -> Self {
        Self { def, min, max }
    }

    /// Returns the default value.
    fn default(self) -> T {
        self.def
    }

    /// Trims the given value to fit into the minimum/maximum range.
    fn limit(self, value: T) -> T
    where
        T: Ord,
    {
        cmp::max(self.min, cmp::min(self.max, value))
    }
}

//============ Tests =========================================================
