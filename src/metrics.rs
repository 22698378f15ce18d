use std::net::{IpAddr, SocketAddr};

use lazy_static::lazy_static;
use log::{error, info, warn};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, IntGaugeVec, Opts, Registry};
use warp::{Filter, Rejection, Reply};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    pub static ref NUM_CONNECTED_CLIENTS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("num_connected_clients", "Connected Clients"),
        &["hashed_ip"]
    )
    .expect("metric can be created");
    pub static ref NUM_ACTIVE_USERS: IntGauge =
        IntGauge::new("num_active_users", "Active Users").expect("metric can be created");
    pub static ref MESSAGES_RELAYED: IntCounter =
        IntCounter::new("messages_relayed_total", "Chat Lines Relayed")
            .expect("metric can be created");
    pub static ref EVICTED_SESSIONS: IntCounter =
        IntCounter::new("evicted_sessions_total", "Sessions Evicted On Write Failure")
            .expect("metric can be created");
    pub static ref SESSION_DURATION_SEC: Histogram = Histogram::with_opts(
        HistogramOpts::new("session_duration_sec", "Session Duration Seconds").buckets(vec![
            1.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 40.0, 50.0, 60.0, 90.0, 120.0, 180.0, 240.0,
            300.0, 600.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0, 28800.0, 43200.0, 86400.0,
        ])
    )
    .expect("metric can be created");
}

pub(crate) fn register() {
    REGISTRY
        .register(Box::new(NUM_CONNECTED_CLIENTS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(NUM_ACTIVE_USERS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(MESSAGES_RELAYED.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(EVICTED_SESSIONS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(SESSION_DURATION_SEC.clone()))
        .expect("collector can be registered");
}

/// Text exposition of the relay's own registry followed by the process defaults.
fn render() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    for families in [REGISTRY.gather(), prometheus::gather()] {
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            error!("could not encode metrics: {}", e);
        }
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("metrics could not be from_utf8'd: {}", e);
        String::default()
    })
}

pub(crate) async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(render())
}

pub(crate) async fn serve(addr: SocketAddr) {
    let metrics_route = warp::path!("metrics").and_then(metrics_handler);
    info!("Metrics listening on {}", addr);
    warp::serve(metrics_route).run(addr).await;
}

pub fn hash_ip(ip: IpAddr, salt: &str) -> Result<String, argon2::password_hash::Error> {
    use argon2::{
        password_hash::{PasswordHasher, SaltString},
        Argon2,
    };
    Argon2::default()
        .hash_password(ip.to_string().as_bytes(), &SaltString::from_b64(salt)?)?
        .hash
        .map(|hash| hash.to_string())
        .ok_or(argon2::password_hash::Error::Crypto)
}

/// Counts one open connection under its hashed address for as long as it lives.
///
/// Without a salt no per-client gauge is kept.
pub struct ConnectedClient {
    label: Option<String>,
}

impl ConnectedClient {
    pub fn open(ip: IpAddr, salt: Option<&str>) -> Self {
        let label = salt.and_then(|salt| match hash_ip(ip, salt) {
            Ok(hashed) => Some(hashed),
            Err(e) => {
                warn!("Could not hash client address: {}", e);
                None
            }
        });
        if let Some(label) = &label {
            NUM_CONNECTED_CLIENTS.with_label_values(&[label.as_str()]).inc();
        }
        ConnectedClient { label }
    }
}

impl Drop for ConnectedClient {
    fn drop(&mut self) {
        if let Some(label) = &self.label {
            NUM_CONNECTED_CLIENTS.with_label_values(&[label.as_str()]).dec();
        }
    }
}
