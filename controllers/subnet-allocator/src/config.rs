//! Controller configuration, read once from the environment at startup.

use crate::error::ControllerError;
use ipam::{AllocatorConfig, LockIdentity};
use ipnet::Ipv4Net;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

const DEFAULT_INVENTORY_URL: &str = "http://subnet-inventory.infra:8080";
const DEFAULT_LOCK_NAMESPACE: &str = "default";
const DEFAULT_LOCK_NAME: &str = "subnet-allocator-ipam";
const DEFAULT_MASK_BITS: u8 = 24;
const DEFAULT_PROBE_ADDR: &str = "0.0.0.0:8080";

/// Controller settings
#[derive(Debug, Clone)]
pub struct Config {
    pub default_network: Ipv4Net,
    pub cluster_mask_bits: u8,
    pub node_pool_mask_bits: u8,
    pub inventory_url: String,
    pub inventory_token: String,
    pub inventory_account: String,
    pub inventory_region: String,
    /// `None` watches all namespaces
    pub watch_namespace: Option<String>,
    pub lock_namespace: String,
    pub lock_name: String,
    pub lock_ttl: Duration,
    /// Replica identity recorded as lock holder
    pub instance: String,
    pub probe_addr: SocketAddr,
}

fn invalid(var: &str, value: &str, reason: impl std::fmt::Display) -> ControllerError {
    ControllerError::InvalidConfig(format!("{var}={value:?}: {reason}"))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through `lookup`; unset and empty values are treated alike
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |var: &str| {
            get(var).ok_or_else(|| {
                ControllerError::InvalidConfig(format!("{var} environment variable is required"))
            })
        };

        let network_value = required("DEFAULT_NETWORK_CIDR")?;
        let default_network = network_value
            .parse::<Ipv4Net>()
            .map_err(|e| invalid("DEFAULT_NETWORK_CIDR", &network_value, e))?
            .trunc();

        let mask_bits = |var: &str| -> Result<u8, ControllerError> {
            let Some(value) = get(var) else {
                return Ok(DEFAULT_MASK_BITS);
            };
            let bits = ipam::cidr::parse_mask_bits(&value)
                .ok_or_else(|| invalid(var, &value, "not a prefix length"))?;
            if bits < default_network.prefix_len() {
                return Err(invalid(
                    var,
                    &value,
                    format!("shorter than the default network {default_network}"),
                ));
            }
            Ok(bits)
        };
        let cluster_mask_bits = mask_bits("CLUSTER_SUBNET_MASK_BITS")?;
        let node_pool_mask_bits = mask_bits("NODE_POOL_SUBNET_MASK_BITS")?;

        let lock_ttl = match get("LOCK_TTL_SECONDS") {
            None => ipam::lock::DEFAULT_LOCK_TTL,
            Some(value) => match value.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                Ok(_) => return Err(invalid("LOCK_TTL_SECONDS", &value, "must be positive")),
                Err(e) => return Err(invalid("LOCK_TTL_SECONDS", &value, e)),
            },
        };

        let probe_value = get("PROBE_ADDR").unwrap_or_else(|| DEFAULT_PROBE_ADDR.to_string());
        let probe_addr = probe_value
            .parse::<SocketAddr>()
            .map_err(|e| invalid("PROBE_ADDR", &probe_value, e))?;

        Ok(Self {
            default_network,
            cluster_mask_bits,
            node_pool_mask_bits,
            inventory_url: get("INVENTORY_URL").unwrap_or_else(|| DEFAULT_INVENTORY_URL.to_string()),
            inventory_token: required("INVENTORY_TOKEN")?,
            inventory_account: required("INVENTORY_ACCOUNT")?,
            inventory_region: required("INVENTORY_REGION")?,
            watch_namespace: get("WATCH_NAMESPACE"),
            lock_namespace: get("LOCK_NAMESPACE").unwrap_or_else(|| DEFAULT_LOCK_NAMESPACE.to_string()),
            lock_name: get("LOCK_NAME").unwrap_or_else(|| DEFAULT_LOCK_NAME.to_string()),
            lock_ttl,
            instance: get("POD_NAME").unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            probe_addr,
        })
    }

    pub fn allocator_config(&self) -> AllocatorConfig {
        AllocatorConfig {
            default_range: self.default_network,
            cluster_mask_bits: self.cluster_mask_bits,
            node_pool_mask_bits: self.node_pool_mask_bits,
        }
    }

    /// `subnet-allocator@<version>/<instance>`
    pub fn lock_identity(&self) -> LockIdentity {
        LockIdentity::new(
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            self.instance.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    const BASE: [(&str, &str); 4] = [
        ("DEFAULT_NETWORK_CIDR", "10.161.0.0/16"),
        ("INVENTORY_TOKEN", "secret"),
        ("INVENTORY_ACCOUNT", "123456789012"),
        ("INVENTORY_REGION", "eu-central-1"),
    ];

    fn with(extra: &[(&'static str, &'static str)]) -> Vec<(&'static str, &'static str)> {
        BASE.iter().chain(extra.iter()).copied().collect()
    }

    #[test]
    fn test_defaults() {
        let config = load(&BASE).unwrap();
        assert_eq!(config.default_network, "10.161.0.0/16".parse::<Ipv4Net>().unwrap());
        assert_eq!(config.cluster_mask_bits, 24);
        assert_eq!(config.node_pool_mask_bits, 24);
        assert_eq!(config.inventory_url, DEFAULT_INVENTORY_URL);
        assert_eq!(config.watch_namespace, None);
        assert_eq!(config.lock_namespace, "default");
        assert_eq!(config.lock_name, "subnet-allocator-ipam");
        assert_eq!(config.lock_ttl, Duration::from_secs(30));
        assert_eq!(config.probe_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert!(!config.instance.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = load(&with(&[
            ("CLUSTER_SUBNET_MASK_BITS", "20"),
            ("NODE_POOL_SUBNET_MASK_BITS", "255.255.255.192"),
            ("WATCH_NAMESPACE", "tenants"),
            ("LOCK_TTL_SECONDS", "45"),
            ("POD_NAME", "subnet-allocator-7d9f-abc"),
        ]))
        .unwrap();
        assert_eq!(config.cluster_mask_bits, 20);
        assert_eq!(config.node_pool_mask_bits, 26);
        assert_eq!(config.watch_namespace.as_deref(), Some("tenants"));
        assert_eq!(config.lock_ttl, Duration::from_secs(45));
        assert_eq!(
            config.lock_identity().to_string(),
            format!("subnet-allocator@{}/subnet-allocator-7d9f-abc", env!("CARGO_PKG_VERSION"))
        );
    }

    #[test]
    fn test_missing_network_is_rejected() {
        let err = load(&BASE[1..]).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(msg) if msg.contains("DEFAULT_NETWORK_CIDR")));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for extra in [
            ("DEFAULT_NETWORK_CIDR", "10.161.0.0/40"),
            ("CLUSTER_SUBNET_MASK_BITS", "12"),
            ("NODE_POOL_SUBNET_MASK_BITS", "abc"),
            ("LOCK_TTL_SECONDS", "0"),
            ("PROBE_ADDR", "localhost"),
        ] {
            // later entries win in the lookup map
            let result = load(&with(&[extra]));
            assert!(
                matches!(result, Err(ControllerError::InvalidConfig(_))),
                "{extra:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_empty_namespace_means_all() {
        let config = load(&with(&[("WATCH_NAMESPACE", "  ")])).unwrap();
        assert_eq!(config.watch_namespace, None);
    }
}
