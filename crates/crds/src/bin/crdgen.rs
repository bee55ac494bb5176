//! Prints the CRD manifests for every resource the subnet allocator consumes.
//!
//! Usage: `cargo run -p crds --bin crdgen > deploy/crds.yaml`

use crds::{NetworkPool, NodePool, TenantCluster};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [TenantCluster::crd(), NodePool::crd(), NetworkPool::crd()];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
