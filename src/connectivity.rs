use futures::{stream, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Tracks whether outbound requests are currently viable.
///
/// The state is push-driven: a path source (see [`reachability_probe`]) feeds
/// updates through [`ConnectivityMonitor::watch`], and readers take the latest
/// snapshot with [`ConnectivityMonitor::is_available`] without waiting.
#[derive(Debug)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
    pub fn new(initially_available: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_available);
        Self { tx }
    }

    pub fn is_available(&self) -> bool {
        *self.tx.borrow()
    }

    /// Receiver that wakes on every available <-> unavailable transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn set_available(&self, available: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == available {
                return false;
            }
            *current = available;
            true
        });
        if changed {
            if available {
                log::info!("Network path became available");
            } else {
                log::warn!("Network path became unavailable");
            }
        }
    }

    /// Consumes a stream of path updates in the background until it ends.
    pub fn watch<S>(self: &Arc<Self>, updates: S) -> JoinHandle<()>
    where
        S: Stream<Item = bool> + Send + 'static,
    {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut updates = Box::pin(updates);
            while let Some(available) = updates.next().await {
                monitor.set_available(available);
            }
            log::debug!("Connectivity update stream ended");
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Derives the `host:port` a reachability probe should dial from an endpoint URL.
pub fn probe_address(endpoint: &str) -> Option<String> {
    let url = reqwest::Url::parse(endpoint).ok()?;
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host, port))
}

/// Whether reqwest would send requests for `endpoint` through a proxy taken
/// from the environment. A direct dial says nothing about reachability then.
pub fn proxy_in_use(endpoint: &str) -> bool {
    proxy_in_use_with(endpoint, |name| std::env::var(name).ok())
}

pub fn proxy_in_use_with(endpoint: &str, lookup: impl Fn(&str) -> Option<String>) -> bool {
    let Ok(url) = reqwest::Url::parse(endpoint) else {
        return false;
    };
    let names: &[&str] = match url.scheme() {
        "https" => &["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"],
        "http" => &["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"],
        _ => &[],
    };
    names
        .iter()
        .any(|name| lookup(name).is_some_and(|value| !value.trim().is_empty()))
}

/// Path source that dials `address` immediately and then once per `interval`,
/// yielding whether the connection could be opened.
pub fn reachability_probe(address: String, interval: Duration) -> impl Stream<Item = bool> {
    stream::unfold((address, true), move |(address, first)| async move {
        if !first {
            tokio::time::sleep(interval).await;
        }
        let reachable = matches!(
            tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(address.as_str())).await,
            Ok(Ok(_))
        );
        log::debug!("Reachability probe to {}: {}", address, reachable);
        Some((reachable, (address, false)))
    })
}
