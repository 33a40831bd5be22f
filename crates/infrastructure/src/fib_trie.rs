use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use domain::virtualserver::entity::RouteType;
use ports::secondary::route_classifier::RouteClassifier;
use tracing::warn;

use crate::constants::PROC_FIB_TRIE;

/// Route classifier backed by `/proc/net/fib_trie`.
///
/// Addresses listed as `/32 host LOCAL` are local; broadcast and multicast
/// addresses are `Other`; everything else is treated as unicast. The table
/// is loaded on construction and on [`refresh`](Self::refresh).
pub struct FibTrieRoutes {
    path: PathBuf,
    local: RwLock<HashSet<u32>>,
}

impl FibTrieRoutes {
    pub fn new() -> Self {
        Self::with_path(PROC_FIB_TRIE)
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        let routes = Self {
            path: path.into(),
            local: RwLock::new(HashSet::new()),
        };
        routes.refresh();
        routes
    }

    /// Reload local addresses. A read failure keeps the previous set.
    pub fn refresh(&self) {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let parsed = parse_local_addrs(&content);
                *self.local.write().unwrap_or_else(PoisonError::into_inner) = parsed;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read fib_trie");
            }
        }
    }

    pub fn local_count(&self) -> usize {
        self.local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for FibTrieRoutes {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteClassifier for FibTrieRoutes {
    fn classify(&self, addr: u32) -> RouteType {
        let ip = Ipv4Addr::from(addr);
        if ip.is_loopback()
            || self
                .local
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&addr)
        {
            return RouteType::Local;
        }
        if ip.is_broadcast() || ip.is_multicast() || ip.is_unspecified() {
            return RouteType::Other;
        }
        RouteType::Unicast
    }
}

/// Collect addresses whose leaf is tagged `host LOCAL`.
///
/// A leaf looks like:
/// ```text
///         |-- 10.0.0.5
///            /32 host LOCAL
/// ```
fn parse_local_addrs(content: &str) -> HashSet<u32> {
    let mut local = HashSet::new();
    let mut last: Option<u32> = None;
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("|--") {
            last = rest.trim().parse::<Ipv4Addr>().ok().map(u32::from);
        } else if trimmed.starts_with("/32 host LOCAL")
            && let Some(addr) = last
        {
            local.insert(addr);
        }
    }
    local
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "\
Main:
  +-- 0.0.0.0/0 3 0 5
     |-- 0.0.0.0
        /0 universe UNICAST
     +-- 10.0.0.0/24 2 0 2
        |-- 10.0.0.0
           /24 link UNICAST
        |-- 10.0.0.5
           /32 host LOCAL
        |-- 10.0.0.255
           /32 link BROADCAST
Local:
  +-- 0.0.0.0/0 3 0 5
     |-- 192.168.1.7
        /32 host LOCAL
";

    fn make_routes(content: &str) -> (FibTrieRoutes, tempfile::NamedTempFile) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        (FibTrieRoutes::with_path(file.path()), file)
    }

    #[test]
    fn parse_collects_host_local() {
        let local = parse_local_addrs(SAMPLE);
        assert_eq!(local.len(), 2);
        assert!(local.contains(&u32::from(Ipv4Addr::new(10, 0, 0, 5))));
        assert!(local.contains(&u32::from(Ipv4Addr::new(192, 168, 1, 7))));
        assert!(!local.contains(&u32::from(Ipv4Addr::new(10, 0, 0, 255))));
    }

    #[test]
    fn classify_from_file() {
        let (routes, _file) = make_routes(SAMPLE);
        assert_eq!(routes.local_count(), 2);
        assert_eq!(routes.classify(0x0A00_0005), RouteType::Local);
        assert_eq!(routes.classify(0x7F00_0001), RouteType::Local);
        assert_eq!(routes.classify(0x0A00_0009), RouteType::Unicast);
        assert_eq!(routes.classify(0xE000_0001), RouteType::Other);
        assert_eq!(routes.classify(u32::MAX), RouteType::Other);
    }

    #[test]
    fn refresh_failure_keeps_previous() {
        let (routes, file) = make_routes(SAMPLE);
        drop(file);
        routes.refresh();
        assert_eq!(routes.local_count(), 2);
    }

    #[test]
    fn missing_file_starts_empty() {
        let routes = FibTrieRoutes::with_path("/nonexistent/fib_trie");
        assert_eq!(routes.local_count(), 0);
        assert_eq!(routes.classify(0x0A00_0005), RouteType::Unicast);
    }
}
