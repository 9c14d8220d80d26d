#![doc(hidden)]
#![allow(clippy::unwrap_used)]
//! Test-only helpers: an in-memory [`Federation`] builder and a throwaway signing key, so
//! downstream tests don't need to stand up `moka`/`tokio` queue machinery of their own.
//!
//! A small set of test doubles kept behind a module gate, not meant to be built on by external
//! crates.

use crate::{
    federation::{Federation, FederationConfig},
    kv::TestKvStore,
    queue::TokioDelayQueue,
    signatures::{generate_actor_keypair, Keypair},
};
use once_cell::sync::Lazy;
use std::sync::Arc;

/// A keypair generated once per test process, for tests that just need *a* valid key and don't
/// care whose it is.
pub static TEST_KEYPAIR: Lazy<Keypair> = Lazy::new(|| generate_actor_keypair().expect("keygen"));

/// Build a [`Federation`] backed by in-process [`TestKvStore`]/[`TokioDelayQueue`] instead of the
/// `moka`-backed production defaults, rooted at `domain`.
pub fn test_federation<T: Clone + Send + Sync + 'static>(domain: &str) -> Federation<T> {
    FederationConfig::builder()
        .domain(domain.parse().expect("valid test domain"))
        .kv(Arc::new(TestKvStore::new()))
        .queue(Arc::new(TokioDelayQueue::new()))
        .build()
        .expect("test federation config is always valid")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Unit;

    #[test]
    fn builds_test_federation() {
        let _federation: Federation<Unit> = test_federation("https://example.com");
    }

    #[test]
    fn test_keypair_is_valid_pem() {
        assert!(TEST_KEYPAIR.private_key.contains("PRIVATE KEY"));
        assert!(TEST_KEYPAIR.public_key.contains("PUBLIC KEY"));
    }
}
