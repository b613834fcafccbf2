//! MongoDB test infrastructure
//!
//! Provides a `TestMongo` helper that starts a MongoDB container for testing.

use mongodb::Client;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::mongo::Mongo;

const MONGO_PORT: u16 = 27017;

/// Test MongoDB wrapper that ensures proper cleanup
///
/// The container is automatically stopped and removed when this struct is dropped.
///
/// # Example
///
/// ```no_run
/// use test_utils::TestMongo;
/// use mongodb::bson::{Document, doc};
///
/// # async fn example() {
/// let mongo = TestMongo::new().await;
/// let stations = mongo.client().database("evpulse").collection::<Document>("stations");
///
/// stations.insert_one(doc! { "name": "Depot 1" }).await.unwrap();
/// # }
/// ```
pub struct TestMongo {
    #[allow(dead_code)]
    container: ContainerAsync<Mongo>,
    client: Client,
    pub connection_string: String,
}

impl TestMongo {
    /// Create a new test MongoDB instance
    ///
    /// Uses the MongoDB 7 image, standalone and without authentication.
    pub async fn new() -> Self {
        Self::start(Mongo::default(), "").await
    }

    /// Single-node replica set, needed for multi-document transactions
    pub async fn replica_set() -> Self {
        Self::start(Mongo::repl_set(), "/?directConnection=true").await
    }

    async fn start(image: Mongo, options: &str) -> Self {
        let container = image
            .with_tag("7")
            .start()
            .await
            .expect("Failed to start MongoDB container");

        let host_port = container
            .get_host_port_ipv4(MONGO_PORT)
            .await
            .expect("Failed to get MongoDB port");

        let connection_string = format!("mongodb://127.0.0.1:{}{}", host_port, options);

        let client = Client::with_uri_str(&connection_string)
            .await
            .expect("Failed to create MongoDB client");

        tracing::info!(port = host_port, options, "Test MongoDB ready (mongo:7)");

        Self {
            container,
            client,
            connection_string,
        }
    }

    /// Get a cloned client (useful for seeding and asserting directly)
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Get the connection string for the code under test
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

// Container is automatically cleaned up when TestMongo is dropped
impl Drop for TestMongo {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test MongoDB container");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::{Document, doc};

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn test_mongo_insert_find() {
        let mongo = TestMongo::new().await;
        let collection = mongo
            .client()
            .database("test_utils")
            .collection::<Document>("items");

        collection.insert_one(doc! { "key": "value" }).await.unwrap();

        let found = collection
            .find_one(doc! { "key": "value" })
            .await
            .unwrap()
            .expect("document should exist");
        assert_eq!(found.get_str("key").unwrap(), "value");
    }
}
