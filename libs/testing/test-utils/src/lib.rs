//! Shared test utilities for the database crates
//!
//! This crate provides reusable test infrastructure:
//! - `TestMongo`: MongoDB container with automatic cleanup
//! - `TestDataBuilder`: Deterministic test data generation
//! - `assertions`: Custom assertion helpers
//!
//! # Usage
//!
//! ```rust,no_run
//! use test_utils::{TestDataBuilder, TestMongo};
//!
//! #[tokio::test]
//! async fn my_mongo_test() {
//!     let mongo = TestMongo::new().await;
//!     let builder = TestDataBuilder::from_test_name("my_test");
//!
//!     let database = builder.database_name();
//!     let station_name = builder.name("station", "main");
//! }
//! ```

use mongodb::bson::oid::ObjectId;

mod mongo;

pub use mongo::TestMongo;

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by using seeded data.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
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
    /// let builder = TestDataBuilder::from_test_name("test_connect");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic document id derived from the seed
    pub fn object_id(&self) -> ObjectId {
        let bytes = self.seed.to_be_bytes();
        let mut id = [0u8; 12];
        id[..8].copy_from_slice(&bytes);
        id[8..].copy_from_slice(&bytes[..4]);
        ObjectId::from_bytes(id)
    }

    /// Database name unique to this seed, so tests sharing a container stay isolated
    pub fn database_name(&self) -> String {
        format!("test_{}", self.seed)
    }

    /// Generate a unique name for testing
    ///
    /// # Example
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("my_test");
    /// let name = builder.name("station", "main");
    /// // Returns: "test-station-12345-main"
    /// ```
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }
}

/// Test assertion helpers
pub mod assertions {
    use mongodb::bson::oid::ObjectId;

    /// Assert that two document ids are equal with a nice error message
    pub fn assert_object_id_eq(actual: ObjectId, expected: ObjectId, context: &str) {
        assert_eq!(
            actual, expected,
            "{}: expected ObjectId {}, got {}",
            context, expected, actual
        );
    }

    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_builder_deterministic() {
        let builder1 = TestDataBuilder::new(42);
        let builder2 = TestDataBuilder::new(42);

        assert_eq!(builder1.object_id(), builder2.object_id());
        assert_eq!(
            builder1.name("station", "test"),
            builder2.name("station", "test")
        );
        assert_eq!(builder1.database_name(), "test_42");
    }

    #[test]
    fn test_data_builder_from_name() {
        let builder1 = TestDataBuilder::from_test_name("my_test");
        let builder2 = TestDataBuilder::from_test_name("my_test");

        assert_eq!(builder1.object_id(), builder2.object_id());
    }

    #[test]
    fn test_data_builder_different_names() {
        let builder1 = TestDataBuilder::from_test_name("test1");
        let builder2 = TestDataBuilder::from_test_name("test2");

        assert_ne!(builder1.object_id(), builder2.object_id());
        assert_ne!(builder1.database_name(), builder2.database_name());
    }
}
