//! Shared-secret generation
//!
//! Secrets handed to clients as their `uuid` are random ASCII alphanumeric
//! strings drawn from the operating system RNG.

use rand::distributions::{Alphanumeric, DistString};
use rand::rngs::OsRng;

/// Default secret length
pub const DEFAULT_SECRET_LEN: usize = 32;

/// Generate a random alphanumeric secret of `len` characters
pub fn generate_secret(len: usize) -> String {
    Alphanumeric.sample_string(&mut OsRng, len)
}
