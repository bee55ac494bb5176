//! Test utilities for building clusters and node pools

use crds::{HasNetworkAllocation, NodePool, NodePoolSpec, TenantCluster, TenantClusterSpec};
use ipnet::Ipv4Net;
use std::collections::BTreeMap;

pub const NAMESPACE: &str = "tenants";

pub fn net(s: &str) -> Ipv4Net {
    s.parse().unwrap()
}

pub fn nets(list: &[&str]) -> Vec<Ipv4Net> {
    list.iter().map(|s| net(s)).collect()
}

/// Cluster in [`NAMESPACE`], allocated when `cidr` is non-empty
pub fn create_test_cluster(name: &str, cidr: &str) -> TenantCluster {
    let mut cluster = TenantCluster::new(name, TenantClusterSpec::default());
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    if !cidr.is_empty() {
        cluster.set_allocated_cidr(cidr.to_string());
    }
    cluster
}

/// Node pool of `cluster_name` in [`NAMESPACE`], allocated when `cidr` is non-empty
pub fn create_test_node_pool(name: &str, cluster_name: &str, cidr: &str) -> NodePool {
    let mut pool = NodePool::new(
        name,
        NodePoolSpec {
            cluster_name: cluster_name.to_string(),
            ..Default::default()
        },
    );
    pool.metadata.namespace = Some(NAMESPACE.to_string());
    if !cidr.is_empty() {
        pool.set_allocated_cidr(cidr.to_string());
    }
    pool
}

/// Set one annotation on a cluster or node pool
pub fn annotate<K: kube::Resource>(resource: &mut K, key: &str, value: &str) {
    resource
        .meta_mut()
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
}
