//! The DNS message codec consumed by the client.
//!
//! Wire-format encoding and decoding is not part of this crate. The engine
//! only needs two operations: composing an address query into a caller
//! provided buffer and extracting a single address record plus its TTL from
//! a reply. Both are expressed through the [QueryCodec] trait so any DNS
//! message implementation can be plugged in.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::error;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::time::Duration;

/// Size of the DNS message header in octets.
///
/// The smallest well formed reply carries the header plus seven octets,
/// which is what the engine uses as its lower bound before parsing.
pub const HEADER_LEN: usize = 12;

//------------ AddressFamily -------------------------------------------------

/// Selects which kind of address record a query asks for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AddressFamily {
    /// Request an IPv4 address record.
    V4,

    /// Request an IPv6 address record.
    V6,

    /// Accept an address record of either family.
    Unspec,
}

//------------ Answer --------------------------------------------------------

/// A resolved address extracted from a reply.
#[derive(Clone, Copy, Debug)]
pub struct Answer {
    /// The resolved address.
    pub addr: IpAddr,

    /// How long the address may be considered valid.
    pub ttl: Duration,
}

//------------ QueryCodec ----------------------------------------------------

/// Composes queries and parses replies.
pub trait QueryCodec: Send + Sync {
    /// Compose an address query for `name` into the start of `buf`.
    ///
    /// The buffer is at least the configured maximum message length and
    /// `name` has already been checked against the configured maximum name
    /// length. Returns the length of the composed message.
    fn compose_query(
        &self,
        buf: &mut [u8],
        name: &str,
        id: u16,
        family: AddressFamily,
    ) -> usize;

    /// Parse the reply in `buf` and extract an address of the requested
    /// family.
    ///
    /// With [AddressFamily::Unspec] an address of either family is
    /// acceptable. The caller has already verified that the reply is longer
    /// than the minimum well formed length; anything that still does not
    /// yield an address is a parse error.
    fn parse_reply(
        &self,
        buf: &[u8],
        family: AddressFamily,
    ) -> Result<Answer, ParseError>;
}

//------------ ParseError ----------------------------------------------------

/// A reply could not be parsed into an address record.
#[derive(Clone, Copy, Debug)]
pub struct ParseError;

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "unparsable reply")
    }
}

impl error::Error for ParseError {}
