use domain::virtualserver::entity::RouteType;

/// Classifies a destination address against the host routing table.
pub trait RouteClassifier: Send + Sync {
    /// `addr` is in host byte order.
    fn classify(&self, addr: u32) -> RouteType;
}
