//! A DNS-over-DTLS stub client for Rust.
//!
//! This crate resolves domain names by querying a single, pre-configured
//! DNS server over DTLS as described in RFC 8094. It is built for hosts
//! that keep exactly one secured session to their resolver: there is one
//! persistent channel, one shared message buffer, and one lock that
//! serializes every operation that touches them.
//!
//! Using the client consists of three steps:
//! 1) Plugging the external collaborators into a [Connection],
//! 2) Configuring the server, and
//! 3) Issuing queries.
//!
//! # Plugging in the collaborators
//!
//! The crate deliberately does not contain a DTLS implementation, a DNS
//! wire-format implementation, or a credential registry. Each is consumed
//! through a trait and supplied by the host system:
//!
//! * [protocol::AsyncBind] creates the datagram socket a session runs
//!   over. [protocol::UdpBind] implements it on top of Tokio's UDP
//!   socket.
//! * [protocol::DtlsConnect] and [protocol::DtlsChannel] wrap the DTLS
//!   library: channel creation, session initialization, timed send and
//!   receive, teardown.
//! * [credman::CredentialStore] is the registry holding the key material
//!   a session authenticates with, referenced by tag instead of carried
//!   by value.
//! * [cache::ResolverCache] keeps resolved addresses; [cache::MokaCache]
//!   is a ready-made in-process implementation.
//! * [msg::QueryCodec] composes queries and parses replies.
//! * [clock::Clock] supplies monotonic time and delays and exists so
//!   tests can drive the engine's timing deterministically.
//!
//! A [Connection][conn::Connection] is created from one value of each.
//! Cloning it is cheap; all clones share the same session.
//!
//! # Configuring the server
//!
//! [connect][conn::Connection::connect] establishes the session: it binds
//! a socket to a random ephemeral port, adds the credential to the store,
//! creates the secure channel and drives the DTLS handshake with doubling
//! receive timeouts until the handshake signal arrives or the
//! establishment window closes. [disconnect][conn::Connection::disconnect]
//! tears everything down again, including the stored credential.
//! [set_server][conn::Connection::set_server] folds both into the single
//! entry point resolver configuration code tends to want.
//!
//! # Issuing queries
//!
//! [query][conn::Connection::query] resolves a name into an address.
//! Cached answers return immediately; everything else is sent over the
//! established channel with a fixed per-attempt timeout budget and a
//! bounded number of retries. The buffer holding the unencrypted query
//! and reply is zeroed before the call returns, on every path.
//!
//! Timeouts, retry counts, name and message size limits are all set
//! through [Config][conn::Config].

#![warn(missing_docs)]

pub mod cache;
pub mod clock;
pub mod conn;
pub mod credman;
pub mod error;
pub mod msg;
pub mod protocol;

pub use self::conn::{Config, Connection};
pub use self::credman::Credential;
pub use self::error::Error;
pub use self::msg::AddressFamily;
