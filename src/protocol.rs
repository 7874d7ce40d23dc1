//! Underlying transport abstractions.
//!
//! The client consumes two layers through traits: a datagram socket bound
//! to a local and a remote endpoint, and a secure datagram channel created
//! on top of such a socket. The DTLS handshake machinery and record layer
//! live entirely behind [DtlsConnect] and [DtlsChannel]; the engine only
//! drives session initialization, timed sends and receives, and teardown.
//!
//! [UdpBind] provides the socket layer on top of Tokio. A DTLS
//! implementation supplies the channel layer by implementing
//! [DtlsConnect] for the socket type it wants to sit on.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use crate::credman::CredentialTag;
use std::error;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

//------------ AsyncBind -----------------------------------------------------

/// Creates datagram sockets bound to a local and a remote endpoint.
pub trait AsyncBind: Send + Sync {
    /// The type of a bound socket.
    type Socket: DgramSocket;

    /// Bind a socket to `local` and associate it with `remote`.
    ///
    /// A bind failure with [io::ErrorKind::AddrInUse] tells the caller to
    /// retry with a different local port; any other error is final.
    fn bind(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> impl Future<Output = Result<Self::Socket, io::Error>> + Send;
}

//------------ DgramSocket ---------------------------------------------------

/// A datagram socket associated with a single remote endpoint.
///
/// The socket is closed by dropping it.
pub trait DgramSocket: Send + Sync {
    /// Returns the remote endpoint the socket is associated with.
    fn peer_addr(&self) -> SocketAddr;
}

//------------ DtlsConnect ---------------------------------------------------

/// Creates secure datagram channels on top of bound sockets.
///
/// Implementations carry whatever configuration the underlying DTLS
/// library needs; protocol version and the client role are fixed when the
/// connector is built, not negotiated per channel.
pub trait DtlsConnect<Sock>: Send + Sync {
    /// The type of a created channel.
    type Channel: DtlsChannel;

    /// Create a client channel over `socket`, authenticating with the key
    /// material identified by `tag`.
    ///
    /// Creating the channel does not perform the handshake; that is
    /// triggered by [DtlsChannel::init_session].
    fn connect(
        &self,
        socket: Sock,
        tag: CredentialTag,
    ) -> Result<Self::Channel, io::Error>;
}

//------------ DtlsChannel ---------------------------------------------------

/// A secure datagram channel to a single server.
///
/// The channel owns its socket; dropping the channel closes both.
pub trait DtlsChannel: Send {
    /// Reset session state and initiate a fresh handshake with `remote`.
    ///
    /// Success means the first flight was sent, not that the handshake
    /// completed; completion is observed through [RecvError::HandshakeInProgress]
    /// on a subsequent [recv][Self::recv].
    fn init_session(
        &mut self,
        remote: SocketAddr,
    ) -> impl Future<Output = Result<(), io::Error>> + Send;

    /// Send application data, giving up after `timeout`.
    fn send(
        &mut self,
        buf: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<usize, io::Error>> + Send;

    /// Receive application data into `buf`, giving up after `timeout`.
    fn recv(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<usize, RecvError>> + Send;

    /// Destroy the current session state.
    ///
    /// The channel itself stays usable; [init_session][Self::init_session]
    /// starts over from a clean slate.
    fn destroy_session(&mut self);

    /// Returns the remote endpoint of the underlying socket.
    fn peer_addr(&self) -> SocketAddr;
}

//------------ RecvError -----------------------------------------------------

/// Error type of [DtlsChannel::recv].
#[derive(Debug)]
pub enum RecvError {
    /// The channel is (still) performing its handshake.
    ///
    /// During session establishment this is the success signal: the
    /// handshake has been triggered and the channel is ready for
    /// application data.
    HandshakeInProgress,

    /// No datagram arrived within the timeout.
    TimedOut,

    /// The transport failed.
    Io(io::Error),
}

impl Display for RecvError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            RecvError::HandshakeInProgress => {
                write!(f, "handshake in progress")
            }
            RecvError::TimedOut => write!(f, "receive timed out"),
            RecvError::Io(_) => write!(f, "transport error"),
        }
    }
}

impl error::Error for RecvError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            RecvError::Io(e) => Some(e),
            _ => None,
        }
    }
}

//------------ UdpBind -------------------------------------------------------

/// Creates UDP sockets through Tokio.
#[derive(Clone, Copy, Debug, Default)]
pub struct UdpBind;

impl AsyncBind for UdpBind {
    type Socket = UdpDgram;

    async fn bind(
        &self,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> Result<UdpDgram, io::Error> {
        let sock = UdpSocket::bind(local).await?;
        sock.connect(remote).await?;
        Ok(UdpDgram { sock, peer: remote })
    }
}

//------------ UdpDgram ------------------------------------------------------

/// A connected UDP socket.
#[derive(Debug)]
pub struct UdpDgram {
    /// The underlying Tokio socket.
    sock: UdpSocket,

    /// The remote endpoint passed at bind time.
    peer: SocketAddr,
}

impl UdpDgram {
    /// Returns a reference to the underlying socket.
    ///
    /// DTLS implementations sitting on top use this for raw datagram I/O.
    pub fn get_ref(&self) -> &UdpSocket {
        &self.sock
    }
}

impl DgramSocket for UdpDgram {
    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}
