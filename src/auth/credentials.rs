//! Credential validation
//!
//! An identity is valid iff the store holds a record for its account and the
//! record's secret matches exactly. No caching: every request does its own
//! lookup.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::types::{GatewayError, Result};

/// Identity claimed by a client on a request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Identity {
    /// Account identifier (`userAccount` query parameter)
    #[serde(rename = "userAccount")]
    pub account_id: String,
    /// Shared secret (`uuid` query parameter)
    #[serde(rename = "uuid")]
    pub secret: String,
}

/// Stored identity, as found in the users collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    #[serde(rename = "_id")]
    pub account_id: String,
    #[serde(rename = "uuid")]
    pub secret: String,
}

/// Read-only lookup of identity records
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find the record for `account_id`
    async fn find(&self, account_id: &str) -> Result<Option<IdentityRecord>>;
}

/// Outcome of a credential check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Authorized,
    /// No record exists for the account
    UnknownAccount,
    /// A record exists but the secret differs
    SecretMismatch,
}

impl Verdict {
    /// Map a denial to the error the client receives
    pub fn into_result(self) -> Result<()> {
        match self {
            Verdict::Authorized => Ok(()),
            Verdict::UnknownAccount => Err(GatewayError::Forbidden("Access forbidden".into())),
            Verdict::SecretMismatch => {
                Err(GatewayError::Unauthorized("Invalid access credentials".into()))
            }
        }
    }
}

/// Checks identities against an [`IdentityStore`]
#[derive(Clone)]
pub struct CredentialValidator {
    store: Arc<dyn IdentityStore>,
}

impl CredentialValidator {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Validate an identity
    ///
    /// Store failures are returned as `Err`; callers treat them as a denial.
    pub async fn validate(&self, identity: &Identity) -> Result<Verdict> {
        let verdict = match self.store.find(&identity.account_id).await? {
            None => Verdict::UnknownAccount,
            Some(record) if record.secret == identity.secret => Verdict::Authorized,
            Some(_) => Verdict::SecretMismatch,
        };

        match verdict {
            Verdict::Authorized => info!("User authenticated: {}", identity.account_id),
            Verdict::UnknownAccount => warn!("Unknown account: {}", identity.account_id),
            Verdict::SecretMismatch => {
                warn!("Secret mismatch for account: {}", identity.account_id)
            }
        }
        Ok(verdict)
    }

    /// Validate and convert every failure into the client-facing error
    ///
    /// Unknown accounts map to 403; mismatches and store failures to 401.
    pub async fn authenticate(&self, identity: &Identity) -> Result<()> {
        match self.validate(identity).await {
            Ok(verdict) => verdict.into_result(),
            Err(e) => {
                warn!("Credential check failed for {}: {}", identity.account_id, e);
                Err(GatewayError::Unauthorized("Invalid credentials".into()))
            }
        }
    }
}

/// In-memory identity store
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    records: DashMap<String, IdentityRecord>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a record
    pub fn insert(&self, account_id: impl Into<String>, secret: impl Into<String>) {
        let account_id = account_id.into();
        debug!("Registering identity {}", account_id);
        self.records.insert(
            account_id.clone(),
            IdentityRecord {
                account_id,
                secret: secret.into(),
            },
        );
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find(&self, account_id: &str) -> Result<Option<IdentityRecord>> {
        Ok(self.records.get(account_id).map(|r| r.value().clone()))
    }
}
