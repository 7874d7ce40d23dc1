//! The credential store consumed by the client.
//!
//! DTLS sessions authenticate through key material that lives in an
//! external registry and is referenced by a tag rather than carried by
//! value. The client adds the configured credential to the store when a
//! session is established and removes it again on teardown, translating
//! the store's own error codes into the crate's [Error] taxonomy.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use crate::error::Error;
use std::error;
use std::fmt::{Display, Formatter};

//------------ CredentialTag -------------------------------------------------

/// Identifies key material resident in a credential store.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct CredentialTag(u16);

impl CredentialTag {
    /// Creates a tag from its raw value.
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Returns the raw tag value.
    pub fn value(self) -> u16 {
        self.0
    }
}

//------------ CredentialType ------------------------------------------------

/// The kind of key material a credential carries.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CredentialType {
    /// A pre-shared key.
    Psk,

    /// An ECDSA key pair.
    Ecdsa,
}

//------------ Credential ----------------------------------------------------

/// Key material for authenticating a DTLS session.
///
/// The content is opaque to the client; it is handed to the credential
/// store unchanged.
#[derive(Clone, Debug)]
pub enum Credential {
    /// A pre-shared key with its identity hint.
    Psk {
        /// The PSK identity presented to the server.
        identity: Vec<u8>,

        /// The key itself.
        key: Vec<u8>,
    },

    /// An ECDSA key pair.
    Ecdsa {
        /// The DER encoded private key.
        private_key: Vec<u8>,

        /// The DER encoded public key.
        public_key: Vec<u8>,
    },
}

impl Credential {
    /// Returns the type of key material this credential carries.
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Credential::Psk { .. } => CredentialType::Psk,
            Credential::Ecdsa { .. } => CredentialType::Ecdsa,
        }
    }
}

//------------ CredentialStore -----------------------------------------------

/// An external registry of key material.
pub trait CredentialStore: Send + Sync {
    /// Insert key material into the store and return its tag.
    ///
    /// Re-adding material that is already resident is not an error; the
    /// store returns the existing tag.
    fn add(&self, credential: &Credential)
        -> Result<CredentialTag, StoreError>;

    /// Remove the key material identified by tag and type.
    ///
    /// Callers treat deletion as best effort; the session teardown path
    /// always attempts it so the store never retains stale material.
    fn delete(
        &self,
        tag: CredentialTag,
        credential_type: CredentialType,
    ) -> Result<(), StoreError>;
}

//------------ StoreError ----------------------------------------------------

/// Error codes reported by a credential store.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreError {
    /// The store has no room for further credentials.
    NoSpace,

    /// The store failed internally.
    Failure,

    /// The credential is not acceptable to the store.
    Invalid,

    /// The store does not know this type of credential.
    TypeUnknown,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            StoreError::NoSpace => write!(f, "credential store full"),
            StoreError::Failure => write!(f, "credential store failure"),
            StoreError::Invalid => write!(f, "invalid credential"),
            StoreError::TypeUnknown => {
                write!(f, "unknown credential type")
            }
        }
    }
}

impl error::Error for StoreError {}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoSpace => Error::CredentialStoreFull,
            StoreError::Failure
            | StoreError::Invalid
            | StoreError::TypeUnknown => Error::InvalidCredential,
        }
    }
}

//============ Tests =========================================================
