//! MongoDB access: client, identity store and change-stream feed

pub mod change_stream;
pub mod mongo;

pub use change_stream::{build_pipeline, MongoChangeFeed};
pub use mongo::{MongoClient, MongoIdentityStore};
