//! Shared test utilities
//!
//! - `TestDatabase`: PostgreSQL container with a caller-supplied schema (feature: "postgres")
//! - `TestRedis`: Redis container for queue tests (feature: "redis")
//! - `TestDataBuilder`: Deterministic test data generation (always available)
//!
//! Container-backed tests need Docker; mark them `#[ignore = "requires Docker"]`
//! and run them with `cargo test -- --ignored`.
//!
//! # Features
//!
//! - `postgres` (default): Enables PostgreSQL test infrastructure
//! - `redis`: Enables Redis test infrastructure
//! - `all`: Enables both
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```

use uuid::Uuid;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "postgres")]
pub use postgres::TestDatabase;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for test data with deterministic values
///
/// The same seed always yields the same ids, names and addresses, so a failing
/// test reproduces exactly.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_issue_book");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic UUID for a labelled entity (`"borrowing"`, `"member"`, ...).
    pub fn id(&self, label: &str) -> Uuid {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        label.hash(&mut hasher);
        let high = hasher.finish();
        label.len().hash(&mut hasher);
        let low = hasher.finish();

        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&high.to_le_bytes());
        bytes[8..].copy_from_slice(&low.to_le_bytes());
        Uuid::from_bytes(bytes)
    }

    pub fn borrowing_id(&self) -> Uuid {
        self.id("borrowing")
    }

    pub fn member_id(&self) -> Uuid {
        self.id("member")
    }

    pub fn book_id(&self) -> Uuid {
        self.id("book")
    }

    pub fn library_id(&self) -> Uuid {
        self.id("library")
    }

    /// `member-<seed>-<suffix>@example.com`
    pub fn email(&self, suffix: &str) -> String {
        format!("member-{}-{}@example.com", self.seed, suffix)
    }

    /// Generate a unique name for testing
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::new(7);
    /// assert_eq!(builder.name("book", "main"), "test-book-7-main");
    /// ```
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }
}
