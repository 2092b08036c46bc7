//! Stream gateway - live collection changes for authenticated clients

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use stream_gateway::{
    config::Args,
    db::{MongoChangeFeed, MongoClient},
    logging,
    server::{self, AppState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_format);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Stream Gateway");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("MongoDB database: {}", args.mongodb_db);
    info!("Users: {}", args.user_collection);
    info!(
        "Streams: /event-stream <- {} (by {}), /vespa-stream <- {}",
        args.stream_collection, args.owner_field, args.vespa_collection
    );
    info!("Update lookup: {}", args.update_lookup);
    match args.stream_max_duration() {
        Some(limit) => info!("Stream limit: {:?}", limit),
        None => info!("Stream limit: none"),
    }
    info!("CORS origins: {}", args.cors_origin_list().join(", "));
    info!("======================================");

    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => client,
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    let identities = Arc::new(mongo.identity_store(&args.user_collection));
    let source = Arc::new(MongoChangeFeed::new(mongo, args.update_lookup));
    let state = Arc::new(AppState::new(args, identities, source));

    server::run(state).await?;

    info!("Stream gateway stopped");
    Ok(())
}
