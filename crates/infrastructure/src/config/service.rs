//! Virtual services created at startup.

use domain::common::entity::Protocol;
use domain::virtualserver::entity::{DestConfig, ForwardMethod, ServiceConfig, ServiceKey};
use serde::{Deserialize, Serialize};

use super::common::{ConfigError, MAX_BOOTSTRAP_DESTS, check_limit, parse_ipv4};

/// Longest scheduler name accepted (one byte is kept for the NUL).
const MAX_SCHEDULER_NAME: usize = 15;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceBootstrapConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Virtual address. Required unless `fwmark` is set.
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    /// Firewall mark. Exclusive with `address`/`port`.
    #[serde(default)]
    pub fwmark: Option<u32>,

    pub scheduler: String,

    /// Persistence timeout in seconds; zero disables persistence.
    #[serde(default)]
    pub persistent_timeout: u32,

    #[serde(default)]
    pub netmask: Option<String>,

    #[serde(default)]
    pub destinations: Vec<DestBootstrapConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DestBootstrapConfig {
    pub address: String,
    pub port: u16,

    #[serde(default = "default_weight")]
    pub weight: i32,

    /// `masq`, `local`, `tunnel` or `route` (default: masq).
    #[serde(default)]
    pub forward: Option<String>,

    #[serde(default)]
    pub u_threshold: Option<u32>,

    #[serde(default)]
    pub l_threshold: Option<u32>,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

fn default_weight() -> i32 {
    1
}

fn invalid(field: String, message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field,
        message: message.into(),
    }
}

impl ServiceBootstrapConfig {
    pub(super) fn to_configs(
        &self,
        idx: usize,
    ) -> Result<(ServiceConfig, Vec<DestConfig>), ConfigError> {
        let prefix = format!("services[{idx}]");

        let protocol: Protocol = self.protocol.parse().map_err(|_| ConfigError::InvalidValue {
            field: format!("{prefix}.protocol"),
            value: self.protocol.clone(),
            expected: "tcp, udp".to_string(),
        })?;

        if self.scheduler.is_empty() || self.scheduler.len() > MAX_SCHEDULER_NAME {
            return Err(invalid(
                format!("{prefix}.scheduler"),
                format!("scheduler name must be 1..={MAX_SCHEDULER_NAME} bytes"),
            ));
        }

        let key = match (self.fwmark, &self.address, self.port) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(invalid(
                    prefix,
                    "fwmark and address/port are mutually exclusive",
                ));
            }
            (Some(0), None, None) => {
                return Err(invalid(format!("{prefix}.fwmark"), "fwmark must be non-zero"));
            }
            (Some(mark), None, None) => ServiceKey::fwmark(protocol, mark),
            (None, Some(addr), Some(port)) => {
                ServiceKey::addr(protocol, parse_ipv4(&format!("{prefix}.address"), addr)?, port)
            }
            (None, _, _) => {
                return Err(invalid(
                    prefix,
                    "either fwmark or address and port is required",
                ));
            }
        };

        let mut service = ServiceConfig::new(key, &self.scheduler);
        if self.persistent_timeout > 0 {
            service = service.persistent(self.persistent_timeout);
        }
        if let Some(mask) = &self.netmask {
            service.netmask = parse_ipv4(&format!("{prefix}.netmask"), mask)?;
        }

        check_limit(
            &format!("{prefix}.destinations"),
            self.destinations.len(),
            MAX_BOOTSTRAP_DESTS,
        )?;
        let dests = self
            .destinations
            .iter()
            .enumerate()
            .map(|(j, d)| d.to_config(&format!("{prefix}.destinations[{j}]")))
            .collect::<Result<Vec<_>, _>>()?;

        Ok((service, dests))
    }
}

impl DestBootstrapConfig {
    fn to_config(&self, prefix: &str) -> Result<DestConfig, ConfigError> {
        if self.weight < 0 {
            return Err(invalid(format!("{prefix}.weight"), "weight must be >= 0"));
        }
        let addr = parse_ipv4(&format!("{prefix}.address"), &self.address)?;
        let mut dest = DestConfig::new(addr, self.port, self.weight);
        if let Some(fwd) = &self.forward {
            let method: ForwardMethod = fwd.parse().map_err(|_| ConfigError::InvalidValue {
                field: format!("{prefix}.forward"),
                value: fwd.clone(),
                expected: "masq, local, tunnel, route".to_string(),
            })?;
            dest = dest.with_forward(method);
        }
        dest.u_threshold = self.u_threshold.unwrap_or(0);
        dest.l_threshold = self.l_threshold.unwrap_or(0);
        Ok(dest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_service(yaml: &str) -> ServiceBootstrapConfig {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    #[test]
    fn address_service_with_dests() {
        let svc = make_service(
            r"
protocol: tcp
address: 10.0.0.1
port: 80
scheduler: rr
persistent_timeout: 300
netmask: 255.255.255.0
destinations:
  - { address: 10.0.0.2, port: 8080, weight: 3, forward: route }
  - { address: 10.0.0.3, port: 8080 }
",
        );
        let (service, dests) = svc.to_configs(0).unwrap();
        assert_eq!(service.key, ServiceKey::addr(Protocol::Tcp, 0x0A00_0001, 80));
        assert_eq!(service.timeout, 300);
        assert_eq!(service.netmask, 0xFFFF_FF00);
        assert_eq!(dests.len(), 2);
        assert_eq!(dests[0].weight, 3);
        assert_eq!(
            dests[0].conn_flags,
            ForwardMethod::DirectRoute.to_conn_flags()
        );
        assert_eq!(dests[1].weight, 1);
        assert_eq!(dests[1].conn_flags, ForwardMethod::Masq.to_conn_flags());
    }

    #[test]
    fn fwmark_service() {
        let svc = make_service("fwmark: 7\nscheduler: rr\n");
        let (service, dests) = svc.to_configs(0).unwrap();
        assert!(service.key.is_fwmark());
        assert_eq!(service.key.fwmark, 7);
        assert!(dests.is_empty());
    }

    #[test]
    fn fwmark_and_address_rejected() {
        let svc = make_service("fwmark: 7\naddress: 10.0.0.1\nport: 80\nscheduler: rr\n");
        let err = svc.to_configs(2).unwrap_err();
        assert!(err.to_string().contains("services[2]"));
    }

    #[test]
    fn missing_key_rejected() {
        let svc = make_service("address: 10.0.0.1\nscheduler: rr\n");
        assert!(svc.to_configs(0).is_err());
    }

    #[test]
    fn scheduler_name_length() {
        let svc = make_service("fwmark: 1\nscheduler: abcdefghijklmnop\n");
        assert!(svc.to_configs(0).is_err());
        let svc = make_service("fwmark: 1\nscheduler: ''\n");
        assert!(svc.to_configs(0).is_err());
    }

    #[test]
    fn negative_weight_rejected() {
        let svc = make_service(
            "fwmark: 1\nscheduler: rr\ndestinations:\n  - { address: 10.0.0.2, port: 80, weight: -1 }\n",
        );
        let err = svc.to_configs(0).unwrap_err();
        assert!(err.to_string().contains("destinations[0].weight"));
    }

    #[test]
    fn unknown_protocol_and_forward() {
        let svc = make_service("protocol: sctp\nfwmark: 1\nscheduler: rr\n");
        assert!(matches!(
            svc.to_configs(0).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
        let svc = make_service(
            "fwmark: 1\nscheduler: rr\ndestinations:\n  - { address: 10.0.0.2, port: 80, forward: nope }\n",
        );
        assert!(matches!(
            svc.to_configs(0).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }
}
