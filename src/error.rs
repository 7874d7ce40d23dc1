//! Error type for the DNS-over-DTLS client.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Error type for the DNS-over-DTLS client.
#[derive(Clone, Debug)]
pub enum Error {
    /// Binding a datagram socket gave an error other than address-in-use.
    ///
    /// Address-in-use itself is retried internally with a fresh ephemeral
    /// port and never surfaces.
    Bind(Arc<std::io::Error>),

    /// Creating the secure channel on top of the socket gave an error.
    ChannelCreate(Arc<std::io::Error>),

    /// A query was issued while no session is established.
    ConnectionRefused,

    /// The credential store is out of space.
    CredentialStoreFull,

    /// No handshake signal arrived within the session establishment window.
    HandshakeTimeout,

    /// The credential store rejected the credential.
    InvalidCredential,

    /// The server reply was too short or could not be parsed, on every
    /// attempt.
    MalformedReply,

    /// The domain name exceeds the configured maximum length.
    NameTooLong,

    /// The operation requires an established session.
    NotConnected,

    /// A query attempt exceeded its timeout budget, on every attempt.
    QueryTimeout,

    /// Receiving over the secure channel gave an error.
    Receive(Arc<std::io::Error>),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Error::Bind(_) => write!(f, "error binding datagram socket"),
            Error::ChannelCreate(_) => {
                write!(f, "error creating secure channel")
            }
            Error::ConnectionRefused => {
                write!(f, "no session established for query")
            }
            Error::CredentialStoreFull => {
                write!(f, "credential store out of space")
            }
            Error::HandshakeTimeout => {
                write!(f, "timeout establishing session")
            }
            Error::InvalidCredential => write!(f, "invalid credential"),
            Error::MalformedReply => write!(f, "malformed reply"),
            Error::NameTooLong => write!(f, "domain name too long"),
            Error::NotConnected => write!(f, "not connected"),
            Error::QueryTimeout => {
                write!(f, "timeout waiting for response")
            }
            Error::Receive(_) => {
                write!(f, "error receiving from secure channel")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Bind(e) => Some(e),
            Error::ChannelCreate(e) => Some(e),
            Error::ConnectionRefused => None,
            Error::CredentialStoreFull => None,
            Error::HandshakeTimeout => None,
            Error::InvalidCredential => None,
            Error::MalformedReply => None,
            Error::NameTooLong => None,
            Error::NotConnected => None,
            Error::QueryTimeout => None,
            Error::Receive(e) => Some(e),
        }
    }
}
