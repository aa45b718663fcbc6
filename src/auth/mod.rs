//! Credential storage and token model
//!
//! This module holds the pieces the auth lifecycle manager builds on: the
//! [`TokenPair`] with its expiry-derivation invariant, and the
//! [`CredentialStore`] boundary to whatever persistence the host application
//! provides.

pub mod credentials;
pub mod token;

pub use credentials::{
    load_token_pair, CredentialStore, FileCredentialStore, MemoryCredentialStore,
};
pub use token::{parse_jwt_expiry, TokenPair};
