//! Generate a shared secret for a users record
//!
//! Prints one random alphanumeric string to stdout, suitable for the `uuid`
//! field of an identity record.

use clap::Parser;
use stream_gateway::auth::keys::{generate_secret, DEFAULT_SECRET_LEN};

/// Print a new random client secret
#[derive(Parser, Debug)]
#[command(name = "stream-keygen")]
struct Args {
    /// Secret length in characters
    #[arg(long, short, default_value_t = DEFAULT_SECRET_LEN)]
    length: usize,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.length == 0 {
        anyhow::bail!("--length must be greater than zero");
    }
    println!("{}", generate_secret(args.length));
    Ok(())
}
