//! MongoDB client and identity store
//!
//! The client is created once at startup and shared; collections are
//! resolved per call.

use async_trait::async_trait;
use bson::doc;
use mongodb::{Client, Collection};
use tracing::info;

use crate::auth::{IdentityRecord, IdentityStore};
use crate::types::{GatewayError, Result};

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the connection with a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        info!("Connecting to MongoDB");

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| GatewayError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| GatewayError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Get a typed collection of the configured database
    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.client.database(&self.db_name).collection::<T>(name)
    }

    /// Identity store over `collection`
    pub fn identity_store(&self, collection: &str) -> MongoIdentityStore {
        MongoIdentityStore {
            collection: self.collection::<IdentityRecord>(collection),
        }
    }
}

/// Identity records kept in a users collection (`_id` = account, `uuid` = secret)
#[derive(Clone)]
pub struct MongoIdentityStore {
    collection: Collection<IdentityRecord>,
}

#[async_trait]
impl IdentityStore for MongoIdentityStore {
    async fn find(&self, account_id: &str) -> Result<Option<IdentityRecord>> {
        self.collection
            .find_one(doc! { "_id": account_id })
            .await
            .map_err(|e| GatewayError::Database(format!("Identity lookup failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    // Integration tests would require a running MongoDB replica set
}
