//! Authentication for stream requests
//!
//! Provides:
//! - Credential validation against an identity store
//! - Shared-secret generation for provisioning new accounts

pub mod credentials;
pub mod keys;

pub use credentials::{
    CredentialValidator, Identity, IdentityRecord, IdentityStore, MemoryIdentityStore, Verdict,
};
pub use keys::{generate_secret, DEFAULT_SECRET_LEN};
