//! Scripted implementations of the client's collaborator seams.
//!
//! The mock DTLS channel plays back a behavior script: how many handshake
//! attempts fail before the handshake signal, how session initialization
//! behaves, and what the server replies during the data phase. Sleeps use
//! Tokio's timer, so tests run under a paused runtime and control time
//! completely. The store, cache and codec mocks record what the engine
//! does to them.

#![allow(dead_code)]

use dodtls::cache::ResolverCache;
use dodtls::conn::{Config, Connection};
use dodtls::credman::{
    Credential, CredentialStore, CredentialTag, CredentialType, StoreError,
};
use dodtls::msg::{AddressFamily, Answer, ParseError, QueryCodec, HEADER_LEN};
use dodtls::protocol::{
    AsyncBind, DgramSocket, DtlsChannel, DtlsConnect, RecvError,
};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

/// The connection type every test works with.
pub type MockConn =
    Connection<MockDtls, MockStore, MockCache, MockCodec, MockBind>;

/// Handles to the recording side of all mocks.
pub struct Harness {
    pub bind: MockBind,
    pub behavior: Arc<Behavior>,
    pub store: MockStore,
    pub cache: MockCache,
    pub codec: MockCodec,
}

/// Build a connection wired up with fresh mocks.
pub fn connection(config: Config) -> (MockConn, Harness) {
    let probe = Arc::new(ActivityProbe::default());
    let bind = MockBind::default();
    let behavior = Arc::new(Behavior::new(probe.clone()));
    let store = MockStore::default();
    let cache = MockCache::default();
    let codec = MockCodec::new(probe);
    let conn = Connection::with_config(
        bind.clone(),
        MockDtls {
            behavior: behavior.clone(),
        },
        store.clone(),
        cache.clone(),
        codec.clone(),
        config,
    );
    let harness = Harness {
        bind,
        behavior,
        store,
        cache,
        codec,
    };
    (conn, harness)
}

pub fn server_addr() -> SocketAddr {
    "192.0.2.53:853".parse().unwrap()
}

pub fn psk() -> Credential {
    Credential::Psk {
        identity: b"client".to_vec(),
        key: b"secret".to_vec(),
    }
}

//------------ ActivityProbe -------------------------------------------------

/// Checks that buffer touching operations never overlap.
///
/// The codec and the channel both call [enter][Self::enter] while they
/// work on the shared buffer; more than one active guard at a time means
/// the engine let two operations interleave.
#[derive(Default)]
pub struct ActivityProbe {
    active: AtomicUsize,
    max_seen: AtomicUsize,
}

impl ActivityProbe {
    pub fn enter(&self) -> ProbeGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        ProbeGuard { probe: self }
    }

    /// The largest number of simultaneously active operations seen.
    pub fn max_seen(&self) -> usize {
        self.max_seen.load(Ordering::SeqCst)
    }
}

pub struct ProbeGuard<'a> {
    probe: &'a ActivityProbe,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.probe.active.fetch_sub(1, Ordering::SeqCst);
    }
}

//------------ MockBind ------------------------------------------------------

/// Socket layer that can fail a scripted number of binds first.
#[derive(Clone, Default)]
pub struct MockBind {
    /// Errors to report, consumed front to back.
    errors: Arc<Mutex<VecDeque<io::ErrorKind>>>,

    /// Local ports of every bind call, failed or not.
    ports: Arc<Mutex<Vec<u16>>>,
}

impl MockBind {
    pub fn fail_next(&self, kinds: &[io::ErrorKind]) {
        self.errors.lock().unwrap().extend(kinds.iter().copied());
    }

    pub fn ports(&self) -> Vec<u16> {
        self.ports.lock().unwrap().clone()
    }

    pub fn binds(&self) -> usize {
        self.ports.lock().unwrap().len()
    }
}

impl AsyncBind for MockBind {
    type Socket = MockSock;

    async fn bind(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Result<MockSock, io::Error> {
        self.ports.lock().unwrap().push(local.port());
        let scripted = self.errors.lock().unwrap().pop_front();
        match scripted {
            Some(kind) => Err(kind.into()),
            None => Ok(MockSock { peer: remote }),
        }
    }
}

//------------ MockSock ------------------------------------------------------

pub struct MockSock {
    peer: SocketAddr,
}

impl DgramSocket for MockSock {
    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

//------------ Behavior ------------------------------------------------------

/// What the scripted server on the other side of the channel does.
pub struct Behavior {
    /// Fail channel creation entirely.
    pub connect_fail: Mutex<bool>,

    /// Number of session initializations that fail before one succeeds.
    pub init_failures: AtomicUsize,

    /// Handshake receives that time out before the handshake signal.
    ///
    /// `usize::MAX` means the server never answers. Copied into each new
    /// channel, so a reconnect starts over.
    pub handshake_failures: AtomicUsize,

    /// Scripted replies for the data phase, consumed per receive. An
    /// exhausted script behaves like a silent server.
    pub replies: Mutex<VecDeque<Reply>>,

    /// Scripted delay of every send.
    pub send_delay: Mutex<Option<Duration>>,

    /// Results to return from sends, consumed front to back. Exhausted
    /// means the send succeeds.
    pub send_results: Mutex<VecDeque<io::Result<usize>>>,

    /// Timeout passed to every handshake phase receive.
    pub handshake_timeouts: Mutex<Vec<Duration>>,

    /// Number of session initializations.
    pub inits: AtomicUsize,

    /// Number of data phase sends.
    pub sends: AtomicUsize,

    /// Number of session destructions.
    pub destroys: AtomicUsize,

    /// Number of channels dropped.
    pub closes: AtomicUsize,

    /// Credential tags channels were created with.
    pub tags: Mutex<Vec<CredentialTag>>,

    /// Shared with the codec to detect interleaved buffer access.
    pub probe: Arc<ActivityProbe>,
}

impl Behavior {
    fn new(probe: Arc<ActivityProbe>) -> Self {
        Self {
            connect_fail: Mutex::new(false),
            init_failures: AtomicUsize::new(0),
            handshake_failures: AtomicUsize::new(0),
            replies: Mutex::new(VecDeque::new()),
            send_delay: Mutex::new(None),
            send_results: Mutex::new(VecDeque::new()),
            handshake_timeouts: Mutex::new(Vec::new()),
            inits: AtomicUsize::new(0),
            sends: AtomicUsize::new(0),
            destroys: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            tags: Mutex::new(Vec::new()),
            probe,
        }
    }

    pub fn push_replies(&self, replies: impl IntoIterator<Item = Reply>) {
        self.replies.lock().unwrap().extend(replies);
    }

    pub fn handshake_timeouts(&self) -> Vec<Duration> {
        self.handshake_timeouts.lock().unwrap().clone()
    }
}

/// One scripted data phase receive.
pub enum Reply {
    /// Deliver these bytes.
    Data(Vec<u8>),

    /// Sleep out the timeout, then report it.
    Timeout,

    /// Fail the receive outright.
    Io(io::ErrorKind),
}

//------------ MockDtls ------------------------------------------------------

#[derive(Clone)]
pub struct MockDtls {
    pub behavior: Arc<Behavior>,
}

impl DtlsConnect<MockSock> for MockDtls {
    type Channel = MockChannel;

    fn connect(
        &self,
        socket: MockSock,
        tag: CredentialTag,
    ) -> Result<MockChannel, io::Error> {
        if *self.behavior.connect_fail.lock().unwrap() {
            return Err(io::ErrorKind::Other.into());
        }
        self.behavior.tags.lock().unwrap().push(tag);
        Ok(MockChannel {
            behavior: self.behavior.clone(),
            handshaken: false,
            handshake_failures_left: self
                .behavior
                .handshake_failures
                .load(Ordering::SeqCst),
            peer: socket.peer_addr(),
        })
    }
}

//------------ MockChannel ---------------------------------------------------

pub struct MockChannel {
    behavior: Arc<Behavior>,

    /// Whether the handshake signal has been delivered.
    handshaken: bool,

    /// Handshake receives left to fail on this channel.
    handshake_failures_left: usize,

    peer: SocketAddr,
}

impl DtlsChannel for MockChannel {
    async fn init_session(
        &mut self,
        _remote: SocketAddr,
    ) -> Result<(), io::Error> {
        self.behavior.inits.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .behavior
            .init_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            })
            .is_ok();
        if failed {
            Err(io::ErrorKind::Other.into())
        } else {
            Ok(())
        }
    }

    async fn send(
        &mut self,
        buf: &[u8],
        _timeout: Duration,
    ) -> Result<usize, io::Error> {
        self.behavior.sends.fetch_add(1, Ordering::SeqCst);
        let _guard = self.behavior.probe.enter();
        let delay = *self.behavior.send_delay.lock().unwrap();
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        let scripted = self.behavior.send_results.lock().unwrap().pop_front();
        match scripted {
            Some(res) => res,
            None => Ok(buf.len()),
        }
    }

    async fn recv(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, RecvError> {
        let _guard = self.behavior.probe.enter();
        if !self.handshaken {
            self.behavior
                .handshake_timeouts
                .lock()
                .unwrap()
                .push(timeout);
            if self.handshake_failures_left == 0 {
                self.handshaken = true;
                return Err(RecvError::HandshakeInProgress);
            }
            self.handshake_failures_left -= 1;
            sleep(timeout).await;
            return Err(RecvError::TimedOut);
        }
        let reply = self.behavior.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Data(data)) => {
                buf[..data.len()].copy_from_slice(&data);
                Ok(data.len())
            }
            Some(Reply::Io(kind)) => Err(RecvError::Io(kind.into())),
            Some(Reply::Timeout) | None => {
                sleep(timeout).await;
                Err(RecvError::TimedOut)
            }
        }
    }

    fn destroy_session(&mut self) {
        self.behavior.destroys.fetch_add(1, Ordering::SeqCst);
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for MockChannel {
    fn drop(&mut self) {
        self.behavior.closes.fetch_add(1, Ordering::SeqCst);
    }
}

//------------ MockStore -----------------------------------------------------

/// A credential store that records what is resident.
#[derive(Clone, Default)]
pub struct MockStore {
    entries: Arc<Mutex<HashMap<u16, CredentialType>>>,
    next_tag: Arc<AtomicUsize>,
    fail_add: Arc<Mutex<Option<StoreError>>>,
}

impl MockStore {
    pub fn fail_add(&self, err: StoreError) {
        *self.fail_add.lock().unwrap() = Some(err);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl CredentialStore for MockStore {
    fn add(
        &self,
        credential: &Credential,
    ) -> Result<CredentialTag, StoreError> {
        if let Some(err) = self.fail_add.lock().unwrap().take() {
            return Err(err);
        }
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst) as u16;
        self.entries
            .lock()
            .unwrap()
            .insert(tag, credential.credential_type());
        Ok(CredentialTag::new(tag))
    }

    fn delete(
        &self,
        tag: CredentialTag,
        _credential_type: CredentialType,
    ) -> Result<(), StoreError> {
        match self.entries.lock().unwrap().remove(&tag.value()) {
            Some(_) => Ok(()),
            None => Err(StoreError::Failure),
        }
    }
}

//------------ MockCache -----------------------------------------------------

/// A resolver cache that counts lookups and inserts.
#[derive(Clone, Default)]
pub struct MockCache {
    entries: Arc<Mutex<HashMap<(String, AddressFamily), (IpAddr, Duration)>>>,
    lookups: Arc<AtomicUsize>,
    inserts: Arc<AtomicUsize>,
}

impl MockCache {
    pub fn preload(
        &self,
        name: &str,
        family: AddressFamily,
        addr: IpAddr,
    ) {
        self.entries.lock().unwrap().insert(
            (name.to_string(), family),
            (addr, Duration::from_secs(60)),
        );
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn get(
        &self,
        name: &str,
        family: AddressFamily,
    ) -> Option<(IpAddr, Duration)> {
        self.entries
            .lock()
            .unwrap()
            .get(&(name.to_string(), family))
            .copied()
    }
}

impl ResolverCache for MockCache {
    fn lookup(&self, name: &str, family: AddressFamily) -> Option<IpAddr> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .get(&(name.to_string(), family))
            .map(|(addr, _)| *addr)
    }

    fn insert(
        &self,
        name: &str,
        family: AddressFamily,
        addr: IpAddr,
        ttl: Duration,
    ) {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .insert((name.to_string(), family), (addr, ttl));
    }
}

//------------ MockCodec -----------------------------------------------------

/// A toy wire format: queries carry the id and the name, replies carry a
/// family tag, the address octets and the TTL.
#[derive(Clone)]
pub struct MockCodec {
    ids: Arc<Mutex<Vec<u16>>>,
    probe: Arc<ActivityProbe>,
}

impl MockCodec {
    fn new(probe: Arc<ActivityProbe>) -> Self {
        Self {
            ids: Arc::new(Mutex::new(Vec::new())),
            probe,
        }
    }

    /// Ids of every composed query, in order.
    pub fn ids(&self) -> Vec<u16> {
        self.ids.lock().unwrap().clone()
    }
}

impl QueryCodec for MockCodec {
    fn compose_query(
        &self,
        buf: &mut [u8],
        name: &str,
        id: u16,
        _family: AddressFamily,
    ) -> usize {
        let _guard = self.probe.enter();
        self.ids.lock().unwrap().push(id);
        buf[..2].copy_from_slice(&id.to_be_bytes());
        buf[2..2 + name.len()].copy_from_slice(name.as_bytes());
        2 + name.len()
    }

    fn parse_reply(
        &self,
        buf: &[u8],
        family: AddressFamily,
    ) -> Result<Answer, ParseError> {
        let _guard = self.probe.enter();
        let body = &buf[HEADER_LEN..];
        let (addr, rest): (IpAddr, &[u8]) = match body.first() {
            Some(4) if body.len() >= 13 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&body[1..5]);
                (octets.into(), &body[5..])
            }
            Some(6) if body.len() >= 25 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&body[1..17]);
                (octets.into(), &body[17..])
            }
            _ => return Err(ParseError),
        };
        match (family, addr) {
            (AddressFamily::V4, IpAddr::V6(_)) => return Err(ParseError),
            (AddressFamily::V6, IpAddr::V4(_)) => return Err(ParseError),
            _ => {}
        }
        let mut ttl = [0u8; 8];
        ttl.copy_from_slice(&rest[..8]);
        Ok(Answer {
            addr,
            ttl: Duration::from_secs(u64::from_be_bytes(ttl)),
        })
    }
}

/// Builds a well formed reply for the toy format.
pub fn reply_bytes(addr: IpAddr, ttl_secs: u64) -> Vec<u8> {
    let mut data = vec![0u8; HEADER_LEN];
    match addr {
        IpAddr::V4(v4) => {
            data.push(4);
            data.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            data.push(6);
            data.extend_from_slice(&v6.octets());
        }
    }
    data.extend_from_slice(&ttl_secs.to_be_bytes());
    data
}

/// A reply that is long enough to parse but not parsable.
pub fn garbage_bytes() -> Vec<u8> {
    vec![0xff; HEADER_LEN + 16]
}
