//! Scriptable in-memory [`Driver`] for exercising the manager without a server.

use super::config::MongoDbConfig;
use super::driver::Driver;
use crate::common::{DriverError, DriverErrorKind};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FakeClient {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FakeDatabase {
    pub client_id: u32,
    pub name: String,
}

#[derive(Debug, Default)]
struct Script {
    refuse_all_opens: AtomicBool,
    refuse_next_opens: AtomicU32,
    fail_next_pings: AtomicU32,
    hang_pings: AtomicBool,
    next_id: AtomicU32,
    pings: AtomicU32,
    closes: AtomicU32,
    opens: Mutex<Vec<Instant>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeDriver {
    script: Arc<Script>,
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl FakeDriver {
    pub fn refuse_all_opens(&self, refuse: bool) {
        self.script.refuse_all_opens.store(refuse, Ordering::SeqCst);
    }

    pub fn refuse_next_opens(&self, count: u32) {
        self.script.refuse_next_opens.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_pings(&self, count: u32) {
        self.script.fail_next_pings.store(count, Ordering::SeqCst);
    }

    pub fn hang_pings(&self, hang: bool) {
        self.script.hang_pings.store(hang, Ordering::SeqCst);
    }

    pub fn open_instants(&self) -> Vec<Instant> {
        self.script.opens.lock().unwrap().clone()
    }

    pub fn open_count(&self) -> usize {
        self.script.opens.lock().unwrap().len()
    }

    pub fn ping_count(&self) -> u32 {
        self.script.pings.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u32 {
        self.script.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for FakeDriver {
    type Client = FakeClient;
    type Database = FakeDatabase;

    async fn open(&self, _config: &MongoDbConfig) -> Result<FakeClient, DriverError> {
        self.script.opens.lock().unwrap().push(Instant::now());

        if self.script.refuse_all_opens.load(Ordering::SeqCst)
            || take_one(&self.script.refuse_next_opens)
        {
            return Err(DriverError::new(
                DriverErrorKind::ConnectionFailure,
                "connection refused",
            ));
        }

        let id = self.script.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(FakeClient { id })
    }

    async fn ping(&self, _client: &FakeClient) -> Result<(), DriverError> {
        self.script.pings.fetch_add(1, Ordering::SeqCst);

        if self.script.hang_pings.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if take_one(&self.script.fail_next_pings) {
            return Err(DriverError::new(
                DriverErrorKind::ConnectionFailure,
                "connection reset by peer",
            ));
        }
        Ok(())
    }

    fn database(&self, client: &FakeClient, name: &str) -> FakeDatabase {
        FakeDatabase {
            client_id: client.id,
            name: name.to_string(),
        }
    }

    async fn close(&self, _client: FakeClient) -> Result<(), DriverError> {
        self.script.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
