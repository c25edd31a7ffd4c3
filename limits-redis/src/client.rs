//! Resolves a parsed [`StorageUri`] into a concrete `redis` client: a single
//! node, a cluster, or (by asking a sentinel constellation for the current
//! master once, up front) a single node standing in for one.
//!
//! Sentinel failover is not tracked live here: if the master changes, calls
//! start failing until the caller constructs a fresh [`RedisStorage`]. The
//! original driver this is modeled on re-resolves the master through the
//! sentinel client on every connection acquisition; doing that under a
//! `Storage` trait built around cheap, already-open clients would mean
//! re-discovering topology on every call, which is a worse default for a
//! rate limiter whose whole point is to be fast on the hot path.

use limits_core::errors::{LimitsError, Result};
use limits_core::registry::StorageUri;
use redis::cluster::ClusterClient;
use redis::sentinel::{SentinelClient, SentinelServerType};
use redis::{Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};

#[derive(Clone)]
pub enum Backend {
    Single(Client),
    Cluster(ClusterClient),
}

impl Backend {
    pub fn resolve(parsed: &StorageUri) -> Result<Self> {
        if parsed.scheme.ends_with("+sentinel") {
            return Self::resolve_sentinel(parsed);
        }

        if parsed.hosts.len() > 1 {
            let urls: Result<Vec<String>> = parsed
                .hosts
                .iter()
                .map(|(host, port)| node_url(parsed, host, *port))
                .collect();
            let client = ClusterClient::new(urls?).map_err(LimitsError::storage)?;
            return Ok(Backend::Cluster(client));
        }

        if let Some(path) = &parsed.unix_path {
            let info = unix_connection_info(parsed, path);
            let client = Client::open(info).map_err(LimitsError::storage)?;
            return Ok(Backend::Single(client));
        }

        let (host, port) = parsed
            .hosts
            .first()
            .cloned()
            .unwrap_or(("127.0.0.1".to_string(), 6379));
        let client = Client::open(node_url(parsed, &host, port)?).map_err(LimitsError::storage)?;
        Ok(Backend::Single(client))
    }

    fn resolve_sentinel(parsed: &StorageUri) -> Result<Self> {
        let service_name = parsed
            .path
            .as_deref()
            .ok_or_else(|| LimitsError::configuration("sentinel URI is missing a master name"))?;

        let base_scheme = parsed.scheme.trim_end_matches("+sentinel");
        let mut sentinel_parsed = parsed.clone();
        sentinel_parsed.scheme = base_scheme.to_string();
        sentinel_parsed.path = None;

        let node_urls: Result<Vec<String>> = sentinel_parsed
            .hosts
            .iter()
            .map(|(host, port)| node_url(&sentinel_parsed, host, *port))
            .collect();

        let mut sentinel_client = SentinelClient::build(
            node_urls?,
            service_name.to_string(),
            Some(RedisConnectionInfo {
                db: db_index(parsed),
                username: parsed.username.clone(),
                password: parsed.password.clone(),
                ..Default::default()
            }),
            SentinelServerType::Master,
        )
        .map_err(LimitsError::storage)?;

        let master = sentinel_client
            .get_connection_info()
            .map_err(LimitsError::storage)?;
        let client = Client::open(master).map_err(LimitsError::storage)?;
        Ok(Backend::Single(client))
    }
}

fn db_index(parsed: &StorageUri) -> i64 {
    parsed
        .path
        .as_deref()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0)
}

fn unix_connection_info(parsed: &StorageUri, path: &str) -> ConnectionInfo {
    ConnectionInfo {
        addr: ConnectionAddr::Unix(path.into()),
        redis: RedisConnectionInfo {
            db: db_index(parsed),
            username: parsed.username.clone(),
            password: parsed.password.clone(),
            ..Default::default()
        },
    }
}

pub(crate) fn node_url(parsed: &StorageUri, host: &str, port: u16) -> Result<String> {
    if host.is_empty() {
        return Err(LimitsError::configuration("redis URI is missing a host"));
    }
    let scheme = if parsed.scheme.starts_with("rediss") {
        "rediss"
    } else {
        "redis"
    };
    let mut url = format!("{scheme}://");
    match (&parsed.username, &parsed.password) {
        (Some(user), Some(pass)) => url.push_str(&format!("{user}:{pass}@")),
        (None, Some(pass)) => url.push_str(&format!(":{pass}@")),
        (Some(user), None) => url.push_str(&format!("{user}@")),
        (None, None) => {}
    }
    url.push_str(host);
    url.push(':');
    url.push_str(&port.to_string());
    if let Some(path) = &parsed.path {
        url.push('/');
        url.push_str(path);
    }
    Ok(url)
}
