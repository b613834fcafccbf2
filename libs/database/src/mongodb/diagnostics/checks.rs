use super::DiagnosticTimeouts;
use super::report::DiagnosticResult;
use crate::common::{DriverError, DriverErrorKind, ErrorKind, classify};
use crate::mongodb::driver;
use crate::mongodb::uri::{DEFAULT_PORT, MongoUri, mask_uri};
use mongodb::bson::{self, Document, doc, oid::ObjectId};
use mongodb::options::{ClientOptions, Tls, TlsOptions};
use mongodb::Client;
use serde_json::{Value, json};
use std::future::Future;
use std::time::Duration;
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;

/// Collection used by the CRUD round-trip; dropped afterwards
pub const DIAGNOSTIC_COLLECTION: &str = "_diagnostic_test";

/// Hosts probed by the network check
const MAX_PROBED_HOSTS: usize = 3;

/// The checks of a diagnostics run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumIter)]
pub enum Check {
    #[strum(serialize = "Environment Check")]
    Environment,
    #[strum(serialize = "URI Parsing")]
    UriParsing,
    #[strum(serialize = "DNS Resolution")]
    DnsResolution,
    #[strum(serialize = "Network Connectivity")]
    NetworkConnectivity,
    #[strum(serialize = "SSL/TLS Support")]
    TlsSupport,
    #[strum(serialize = "Driver Setup")]
    DriverSetup,
    #[strum(serialize = "Basic Connection")]
    BasicConnection,
    #[strum(serialize = "TLS Connection Options")]
    RelaxedTlsConnection,
    #[strum(serialize = "Database Access")]
    DatabaseAccess,
    #[strum(serialize = "Collection Operations")]
    CollectionOperations,
}

/// State carried from one check to the next within a run
pub(crate) struct Probe<'a> {
    pub uri: &'a str,
    pub database: &'a str,
    pub timeouts: &'a DiagnosticTimeouts,
    parsed: Result<MongoUri, String>,
    /// `(host, port)` pairs the network check connects to
    targets: Vec<(String, u16)>,
}

impl<'a> Probe<'a> {
    pub fn new(uri: &'a str, database: &'a str, timeouts: &'a DiagnosticTimeouts) -> Self {
        Self {
            uri,
            database,
            timeouts,
            parsed: MongoUri::parse(uri),
            targets: Vec::new(),
        }
    }

    /// Relaxed TLS is only forced on connection strings that ask for TLS
    fn relaxed_tls(&self) -> bool {
        self.parsed.as_ref().map(MongoUri::implies_tls).unwrap_or(true)
    }

    fn seed_targets(&self) -> Vec<(String, u16)> {
        match &self.parsed {
            Ok(parsed) => parsed
                .hosts
                .iter()
                .map(|h| (h.host.clone(), h.port_or_default()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

impl Check {
    pub(crate) async fn run(self, probe: &mut Probe<'_>) -> DiagnosticResult {
        let name = self.to_string();
        match self {
            Check::Environment => environment(name),
            Check::UriParsing => uri_parsing(name, probe),
            Check::DnsResolution => dns_resolution(name, probe).await,
            Check::NetworkConnectivity => network_connectivity(name, probe).await,
            Check::TlsSupport => tls_support(name, probe).await,
            Check::DriverSetup => driver_setup(name, probe).await,
            Check::BasicConnection => basic_connection(name, probe).await,
            Check::RelaxedTlsConnection => relaxed_tls_connection(name, probe).await,
            Check::DatabaseAccess => database_access(name, probe).await,
            Check::CollectionOperations => collection_operations(name, probe).await,
        }
    }
}

/// Build a client with diagnostic timeouts; optionally force TLS with
/// certificate checks disabled.
pub(crate) async fn open_client(
    uri: &str,
    timeouts: &DiagnosticTimeouts,
    relaxed_tls: bool,
) -> Result<Client, DriverError> {
    let mut options = ClientOptions::parse(uri).await?;
    options.server_selection_timeout = Some(timeouts.server_selection);
    options.connect_timeout = Some(timeouts.connect);

    if relaxed_tls {
        let mut tls = TlsOptions::default();
        tls.allow_invalid_certificates = Some(true);
        options.tls = Some(Tls::Enabled(tls));
    }

    Ok(Client::with_options(options)?)
}

/// Open a client and ping it, closing it again on success
pub(crate) async fn connect_and_ping(
    uri: &str,
    timeouts: &DiagnosticTimeouts,
    relaxed_tls: bool,
) -> Result<(), DriverError> {
    let client = bounded(timeouts.server_selection, open_client(uri, timeouts, relaxed_tls)).await?;
    let outcome = driver::ping(&client).await;
    client.shutdown().await;
    outcome
}

/// Bound a lookup that has no timeout of its own (SRV resolution)
async fn bounded<T>(
    limit: Duration,
    future: impl Future<Output = Result<T, DriverError>>,
) -> Result<T, DriverError> {
    timeout(limit, future).await.unwrap_or_else(|_| {
        Err(DriverError::new(
            DriverErrorKind::NetworkTimeout,
            format!("timed out after {}ms", limit.as_millis()),
        ))
    })
}

fn environment(name: String) -> DiagnosticResult {
    let runtime = tokio::runtime::Handle::try_current();

    let result = match &runtime {
        Ok(handle) => DiagnosticResult::pass(
            name,
            format!(
                "{} {} on {}/{}",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            ),
        )
        .with_detail("runtime", format!("{:?}", handle.runtime_flavor())),
        Err(e) => DiagnosticResult::fail(name, "No async runtime available")
            .with_error(e)
            .suggest("Run diagnostics from within a tokio runtime"),
    };

    result
        .with_detail("os", std::env::consts::OS)
        .with_detail("arch", std::env::consts::ARCH)
        .with_detail("family", std::env::consts::FAMILY)
        .with_detail("package_version", env!("CARGO_PKG_VERSION"))
}

fn uri_parsing(name: String, probe: &Probe<'_>) -> DiagnosticResult {
    let masked = mask_uri(probe.uri);

    let connection_type = if probe.uri.starts_with("mongodb+srv://") {
        "SRV (DNS Seedlist)"
    } else if probe.uri.starts_with("mongodb://") {
        "Standard"
    } else {
        return DiagnosticResult::fail(name, "URI must start with 'mongodb://' or 'mongodb+srv://'")
            .with_detail("masked_uri", masked)
            .with_error("Invalid URI scheme")
            .suggest("Check your MONGODB_URI environment variable");
    };

    let parsed = match &probe.parsed {
        Ok(parsed) => parsed,
        Err(e) => {
            return DiagnosticResult::fail(name, format!("URI parsing failed: {}", e))
                .with_detail("masked_uri", masked)
                .with_detail("connection_type", connection_type)
                .with_error(e);
        }
    };

    let result = if parsed.has_credentials() {
        DiagnosticResult::pass(name, "URI parsed successfully with credentials")
    } else {
        DiagnosticResult::fail(name, "URI missing username or password")
            .suggest("Ensure URI contains username:password@")
    };

    result
        .with_detail("masked_uri", masked)
        .with_detail("connection_type", connection_type)
        .with_detail("has_username", parsed.username.is_some())
        .with_detail("has_password", parsed.has_password)
        .with_detail("host", parsed.first_host().map(|h| h.host.clone()))
}

async fn dns_resolution(name: String, probe: &mut Probe<'_>) -> DiagnosticResult {
    let Some(parsed) = probe.parsed.as_ref().ok() else {
        return DiagnosticResult::fail(name, "Could not extract hostname from URI");
    };
    let Some(first) = parsed.first_host() else {
        return DiagnosticResult::fail(name, "Could not extract hostname from URI");
    };
    let hostname = first.host.clone();

    if parsed.is_srv() {
        return srv_resolution(name, probe, hostname).await;
    }

    let mut addresses = 0usize;
    for (host, port) in probe.seed_targets() {
        let lookup = timeout(probe.timeouts.connect, lookup_host((host.as_str(), port))).await;
        match lookup {
            Ok(Ok(found)) => addresses += found.count(),
            Ok(Err(e)) => return dns_failure(name, &hostname, e.to_string()),
            Err(_) => return dns_failure(name, &hostname, "lookup timed out".to_string()),
        }
    }

    probe.targets = probe.seed_targets();
    DiagnosticResult::pass(name, format!("DNS resolved: Found {} address(es)", addresses))
        .with_detail("hostname", hostname)
        .with_detail("addresses_found", addresses)
}

async fn srv_resolution(name: String, probe: &mut Probe<'_>, hostname: String) -> DiagnosticResult {
    let srv_hostname = format!("_mongodb._tcp.{}", hostname);
    let uri = probe.uri;
    let lookup = bounded(probe.timeouts.connect, async {
        Ok(ClientOptions::parse(uri).await?)
    })
    .await;

    match lookup {
        Ok(options) => {
            let servers: Vec<(String, u16)> = options
                .hosts
                .iter()
                .map(|address| match address {
                    mongodb::options::ServerAddress::Tcp { host, port } => {
                        (host.clone(), port.unwrap_or(DEFAULT_PORT))
                    }
                    other => (other.to_string(), DEFAULT_PORT),
                })
                .collect();
            let listed: Vec<String> = servers
                .iter()
                .take(MAX_PROBED_HOSTS)
                .map(|(host, port)| format!("{}:{}", host, port))
                .collect();

            let result = DiagnosticResult::pass(
                name,
                format!("DNS SRV resolved: Found {} server(s)", servers.len()),
            )
            .with_detail("hostname", hostname)
            .with_detail("srv_hostname", srv_hostname)
            .with_detail("servers_found", servers.len())
            .with_detail("servers", listed);
            probe.targets = servers;
            result
        }
        Err(e) if e.kind == DriverErrorKind::Dns => {
            DiagnosticResult::fail(name, "DNS SRV lookup failed - domain not found")
                .with_detail("hostname", hostname)
                .with_detail("srv_hostname", srv_hostname)
                .with_error(&e)
                .suggest("Check if MongoDB Atlas cluster exists and is active")
                .suggest("Verify the cluster hostname is correct")
        }
        Err(e) => dns_failure(name, &hostname, e.to_string()).with_detail("srv_hostname", srv_hostname),
    }
}

fn dns_failure(name: String, hostname: &str, error: String) -> DiagnosticResult {
    DiagnosticResult::fail(name, format!("DNS resolution failed: {}", error))
        .with_detail("hostname", hostname)
        .with_error(error)
        .suggest("Check your internet connection")
        .suggest("Verify the MongoDB hostname is correct")
}

async fn network_connectivity(name: String, probe: &Probe<'_>) -> DiagnosticResult {
    // Fall back to the seed list when DNS did not produce targets
    let targets = if probe.targets.is_empty() {
        probe.seed_targets()
    } else {
        probe.targets.clone()
    };

    if targets.is_empty() {
        return DiagnosticResult::fail(name, "Could not extract hostname from URI");
    }

    let mut tests = Vec::new();
    let mut reachable = false;
    for (host, port) in targets.into_iter().take(MAX_PROBED_HOSTS) {
        let attempt = timeout(probe.timeouts.tcp, TcpStream::connect((host.as_str(), port))).await;
        let entry = match attempt {
            Ok(Ok(_stream)) => {
                reachable = true;
                json!({ "host": host, "port": port, "reachable": true })
            }
            Ok(Err(e)) => {
                json!({ "host": host, "port": port, "reachable": false, "error": e.to_string() })
            }
            Err(_) => json!({ "host": host, "port": port, "reachable": false, "error": "Timeout" }),
        };
        tests.push(entry);
    }

    let result = if reachable {
        DiagnosticResult::pass(name, "Network connectivity to MongoDB confirmed")
    } else {
        DiagnosticResult::fail(name, "Cannot reach MongoDB servers")
            .suggest("Check if firewall is blocking port 27017")
            .suggest("Verify your IP is whitelisted in MongoDB Atlas")
            .suggest("Check if VPN/proxy is interfering")
    };
    result.with_detail("connectivity_tests", Value::Array(tests))
}

async fn tls_support(name: String, probe: &Probe<'_>) -> DiagnosticResult {
    let parsed = probe.parsed.as_ref().ok();
    let required = parsed.map(MongoUri::implies_tls);
    let ca_file = parsed
        .and_then(|p| p.option("tlsCAFile"))
        .map(str::to_string);

    let result = match &ca_file {
        Some(path) => match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {
                DiagnosticResult::pass(name, "TLS supported: rustls with custom CA file")
            }
            Ok(_) => DiagnosticResult::fail(name, format!("TLS CA file is not a file: {}", path))
                .suggest("Check the tlsCAFile path in your connection string"),
            Err(e) => DiagnosticResult::fail(name, format!("TLS CA file not readable: {}", path))
                .with_error(e)
                .suggest("Check the tlsCAFile path in your connection string"),
        },
        None => DiagnosticResult::pass(name, "TLS supported: rustls with system roots"),
    };

    result
        .with_detail("tls_backend", "rustls")
        .with_detail("tls_required", required)
        .with_detail("ca_file", ca_file)
}

async fn driver_setup(name: String, probe: &Probe<'_>) -> DiagnosticResult {
    let parsed = bounded(probe.timeouts.connect, async {
        let options = ClientOptions::parse(probe.uri).await?;
        let hosts = options.hosts.len();
        let app_name = options.app_name.clone();
        let _client = Client::with_options(options)?;
        Ok((hosts, app_name))
    })
    .await;

    match parsed {
        Ok((hosts, app_name)) => DiagnosticResult::pass(
            name,
            format!("Driver accepted connection string ({} host(s))", hosts),
        )
        .with_detail("hosts", hosts)
        .with_detail("app_name", app_name)
        .with_detail("compressors", vec!["zstd", "snappy", "zlib"]),
        Err(e) => DiagnosticResult::fail(name, format!("Driver rejected connection string: {}", e))
            .with_error(&e)
            .suggest("Check the options in your MONGODB_URI"),
    }
}

async fn basic_connection(name: String, probe: &Probe<'_>) -> DiagnosticResult {
    let error = match connect_and_ping(probe.uri, probe.timeouts, false).await {
        Ok(()) => {
            return DiagnosticResult::pass(name, "Basic connection successful")
                .with_detail("connection_type", "basic");
        }
        Err(e) => e,
    };

    let text = error.to_string();
    let (message, hints): (String, &[&str]) = match classify(error).kind() {
        ErrorKind::ServerSelectionFailed | ErrorKind::ConnectionTimeout => (
            "Connection timed out".into(),
            &[
                "MongoDB Atlas cluster may be PAUSED - check Atlas dashboard",
                "Your IP may not be whitelisted - add 0.0.0.0/0 for testing",
                "Check network/firewall settings",
            ],
        ),
        ErrorKind::AuthenticationFailed => (
            "Authentication failed".into(),
            &[
                "Check username and password in connection string",
                "Verify user has proper permissions",
            ],
        ),
        ErrorKind::TlsFailure => (
            "SSL/TLS error".into(),
            &["Try connection with TLS options (next test)"],
        ),
        _ => (format!("Connection failed: {}", text), &[]),
    };

    hints.iter().fold(
        DiagnosticResult::fail(name, message).with_error(&text),
        |result, hint| result.suggest(*hint),
    )
}

async fn relaxed_tls_connection(name: String, probe: &Probe<'_>) -> DiagnosticResult {
    let relaxed = probe.relaxed_tls();

    match connect_and_ping(probe.uri, probe.timeouts, relaxed).await {
        Ok(()) if relaxed => {
            DiagnosticResult::pass(name, "TLS connection successful with relaxed settings")
                .with_detail(
                    "tls_options",
                    json!({ "tls": true, "tlsAllowInvalidCertificates": true }),
                )
        }
        Ok(()) => DiagnosticResult::pass(
            name,
            "Connection successful without TLS (not requested by connection string)",
        )
        .with_detail("tls_options", json!({ "tls": false })),
        Err(e) => DiagnosticResult::fail(name, format!("TLS connection failed: {}", e))
            .with_error(&e)
            .suggest("Check if MongoDB Atlas requires specific TLS version"),
    }
}

async fn database_access(name: String, probe: &Probe<'_>) -> DiagnosticResult {
    let access = async {
        let client = open_client(probe.uri, probe.timeouts, probe.relaxed_tls()).await?;
        let listed = async {
            let databases = client.list_database_names().await?;
            let collections = client.database(probe.database).list_collection_names().await?;
            Ok::<_, DriverError>((databases, collections))
        }
        .await;
        client.shutdown().await;
        listed
    };

    match bounded(probe.timeouts.server_selection * 2, access).await {
        Ok((databases, collections)) => DiagnosticResult::pass(
            name,
            format!(
                "Database '{}' accessible with {} collection(s)",
                probe.database,
                collections.len()
            ),
        )
        .with_detail("available_databases", databases)
        .with_detail("target_database", probe.database)
        .with_detail("collections", collections),
        Err(e) => {
            let result = DiagnosticResult::fail(name, format!("Database access failed: {}", e))
                .with_error(&e);
            if not_authorized(&e) {
                result
                    .suggest("User may not have permissions on this database")
                    .suggest("Check user roles in MongoDB Atlas")
            } else {
                result
            }
        }
    }
}

async fn collection_operations(name: String, probe: &Probe<'_>) -> DiagnosticResult {
    let round_trip = async {
        let client = open_client(probe.uri, probe.timeouts, probe.relaxed_tls()).await?;
        let outcome = crud_round_trip(&client, probe.database).await;
        client.shutdown().await;
        outcome
    };

    match bounded(probe.timeouts.server_selection * 2, round_trip).await {
        Ok(steps) => {
            let complete = steps.iter().all(|(_, ok)| *ok);
            let mut result = if complete {
                DiagnosticResult::pass(name, "All CRUD operations successful")
            } else {
                DiagnosticResult::fail(name, "Collection operations incomplete")
            };
            for (step, ok) in steps {
                result = result.with_detail(step, ok);
            }
            result
        }
        Err(e) => {
            let result =
                DiagnosticResult::fail(name, format!("Collection operations failed: {}", e))
                    .with_error(&e);
            if not_authorized(&e) {
                result.suggest("User may not have write permissions")
            } else {
                result
            }
        }
    }
}

/// insert, read back, update, delete, then drop the scratch collection
async fn crud_round_trip(
    client: &Client,
    database: &str,
) -> Result<Vec<(&'static str, bool)>, DriverError> {
    let collection = client
        .database(database)
        .collection::<Document>(DIAGNOSTIC_COLLECTION);

    let id = ObjectId::new();
    collection
        .insert_one(doc! {
            "_id": id,
            "test": true,
            "timestamp": bson::DateTime::now(),
            "diagnostic": "EVPulse connection test",
        })
        .await?;

    let found = collection.find_one(doc! { "_id": id }).await?;
    let updated = collection
        .update_one(doc! { "_id": id }, doc! { "$set": { "updated": true } })
        .await?;
    let deleted = collection.delete_one(doc! { "_id": id }).await?;
    collection.drop().await?;

    Ok(vec![
        ("insert_success", true),
        ("read_success", found.is_some()),
        ("update_success", updated.modified_count == 1),
        ("delete_success", deleted.deleted_count == 1),
    ])
}

fn not_authorized(error: &DriverError) -> bool {
    error.code == Some(13) || error.message.to_lowercase().contains("not authorized")
}
