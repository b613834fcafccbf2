use super::config::{ConnectionOptions, MongoDbConfig, ReadPreferenceMode, WriteConcernOptions};
use crate::common::DriverError;
use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::{
    Acknowledgment, ClientOptions, Compressor, ReadPreference, SelectionCriteria, Tls,
    TlsOptions, WriteConcern,
};
use mongodb::{Client, Database};
use std::path::PathBuf;
use std::time::Duration;

/// The seam between the connection manager and the database engine.
///
/// Implementations open clients, probe them and hand out database handles.
/// They report failures as [`DriverError`]s and leave classification to the caller.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Client: Clone + Send + Sync + 'static;
    type Database: Clone + Send + Sync + 'static;

    /// Build a client for `config`. May resolve SRV records but does not wait for a server.
    async fn open(&self, config: &MongoDbConfig) -> Result<Self::Client, DriverError>;

    /// Liveness probe (`ping` on the admin database)
    async fn ping(&self, client: &Self::Client) -> Result<(), DriverError>;

    fn database(&self, client: &Self::Client, name: &str) -> Self::Database;

    async fn close(&self, client: Self::Client) -> Result<(), DriverError>;
}

/// [`Driver`] backed by the official `mongodb` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoDriver;

#[async_trait]
impl Driver for MongoDriver {
    type Client = Client;
    type Database = Database;

    async fn open(&self, config: &MongoDbConfig) -> Result<Client, DriverError> {
        let mut options = ClientOptions::parse(&config.uri).await?;
        apply_options(&config.connection_options(), &mut options);
        Ok(Client::with_options(options)?)
    }

    async fn ping(&self, client: &Client) -> Result<(), DriverError> {
        ping(client).await
    }

    fn database(&self, client: &Client, name: &str) -> Database {
        client.database(name)
    }

    async fn close(&self, client: Client) -> Result<(), DriverError> {
        client.shutdown().await;
        Ok(())
    }
}

pub(crate) async fn ping(client: &Client) -> Result<(), DriverError> {
    client
        .database("admin")
        .run_command(doc! { "ping": 1 })
        .await?;
    Ok(())
}

/// Write `options` onto driver client options parsed from the connection string.
///
/// Explicit settings win over connection string options, except TLS which is only
/// forced on (never off) so `tls=true` in the URI keeps working with TLS disabled here.
pub fn apply_options(options: &ConnectionOptions, client_options: &mut ClientOptions) {
    client_options.min_pool_size = Some(options.min_pool_size);
    client_options.max_pool_size = Some(options.max_pool_size);
    client_options.max_idle_time = Some(Duration::from_millis(options.max_idle_time_ms));
    client_options.server_selection_timeout =
        Some(Duration::from_millis(options.server_selection_timeout_ms));
    client_options.connect_timeout = Some(Duration::from_millis(options.connect_timeout_ms));
    client_options.retry_writes = Some(options.retry_writes);
    client_options.retry_reads = Some(options.retry_reads);
    client_options.app_name = Some(options.app_name.clone());
    client_options.heartbeat_freq = Some(Duration::from_millis(options.heartbeat_frequency_ms));

    let compressors: Vec<Compressor> = options
        .compressors
        .iter()
        .filter_map(|name| compressor(name))
        .collect();
    client_options.compressors = (!compressors.is_empty()).then_some(compressors);

    client_options.write_concern = Some(write_concern(&options.write_concern));
    client_options.selection_criteria = Some(SelectionCriteria::ReadPreference(
        read_preference(options.read_preference),
    ));

    if let Some(tls) = &options.tls {
        // allow_invalid_hostnames is an openssl-only switch; the rustls backend ignores it
        let mut tls_options = TlsOptions::default();
        tls_options.allow_invalid_certificates = Some(tls.allow_invalid_certificates);
        tls_options.ca_file_path = tls.ca_file.as_ref().map(PathBuf::from);
        client_options.tls = Some(Tls::Enabled(tls_options));
    }
}

fn compressor(name: &str) -> Option<Compressor> {
    match name {
        "zstd" => Some(Compressor::Zstd { level: None }),
        "snappy" => Some(Compressor::Snappy),
        "zlib" => Some(Compressor::Zlib { level: None }),
        _ => None,
    }
}

fn write_concern(options: &WriteConcernOptions) -> WriteConcern {
    let w = if options.w.eq_ignore_ascii_case("majority") {
        Acknowledgment::Majority
    } else if let Ok(nodes) = options.w.parse::<u32>() {
        Acknowledgment::Nodes(nodes)
    } else {
        Acknowledgment::Custom(options.w.clone())
    };

    let mut concern = WriteConcern::default();
    concern.w = Some(w);
    concern.journal = Some(options.journal);
    concern.w_timeout = Some(Duration::from_millis(options.wtimeout_ms));
    concern
}

fn read_preference(mode: ReadPreferenceMode) -> ReadPreference {
    match mode {
        ReadPreferenceMode::Primary => ReadPreference::Primary,
        ReadPreferenceMode::PrimaryPreferred => ReadPreference::PrimaryPreferred { options: None },
        ReadPreferenceMode::Secondary => ReadPreference::Secondary { options: None },
        ReadPreferenceMode::SecondaryPreferred => {
            ReadPreference::SecondaryPreferred { options: None }
        }
        ReadPreferenceMode::Nearest => ReadPreference::Nearest { options: None },
    }
}
