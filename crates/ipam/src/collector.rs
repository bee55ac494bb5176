//! Reservation Collector
//!
//! Gathers every subnet already handed out, from three sources queried
//! concurrently:
//!
//! - allocated clusters (`status.network.cidr`)
//! - allocated node pools (subnet annotation)
//! - the cloud subnet inventory
//!
//! The first failing source aborts the collection; a partial view could let
//! the allocator hand out a block that is already in use. Unallocated objects
//! contribute nothing, but a CIDR that does not parse is an error.

use crate::cidr;
use crate::error::IpamError;
use crate::store::AllocationStore;
use crds::{HasNetworkAllocation, ObjectKey, TargetKind};
use ipnet::Ipv4Net;
use std::fmt;
use std::sync::Arc;
use subnet_inventory::SubnetInventory;
use tokio::task::JoinSet;
use tracing::debug;

/// Where a reservation was found
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReservationSource {
    Cluster(ObjectKey),
    NodePool(ObjectKey),
    /// Cloud provider subnet id
    CloudSubnet(String),
}

impl fmt::Display for ReservationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationSource::Cluster(key) => write!(f, "TenantCluster {key}"),
            ReservationSource::NodePool(key) => write!(f, "NodePool {key}"),
            ReservationSource::CloudSubnet(id) => write!(f, "cloud subnet {id}"),
        }
    }
}

/// An allocated network and its owner
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reservation {
    pub cidr: Ipv4Net,
    pub source: ReservationSource,
}

impl Reservation {
    /// Parse a persisted CIDR string, failing loudly on garbage
    pub fn parse(value: &str, source: ReservationSource) -> Result<Self, IpamError> {
        match value.trim().parse::<Ipv4Net>() {
            Ok(cidr) => Ok(Self { cidr, source }),
            Err(e) => Err(IpamError::MalformedReservation {
                owner: source.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Collects reservations relevant to one allocation
#[derive(Clone)]
pub struct ReservationCollector {
    store: Arc<dyn AllocationStore>,
    inventory: Arc<dyn SubnetInventory>,
    default_range: Ipv4Net,
}

impl fmt::Debug for ReservationCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservationCollector")
            .field("default_range", &self.default_range)
            .finish_non_exhaustive()
    }
}

impl ReservationCollector {
    pub fn new(
        store: Arc<dyn AllocationStore>,
        inventory: Arc<dyn SubnetInventory>,
        default_range: Ipv4Net,
    ) -> Self {
        Self {
            store,
            inventory,
            default_range,
        }
    }

    /// Reserved networks within `range` (the default range when `None`),
    /// canonicalized and sorted by address.
    pub async fn collect(&self, range: Option<Ipv4Net>) -> Result<Vec<Ipv4Net>, IpamError> {
        let range = range.unwrap_or(self.default_range);
        let reservations = self.reservations().await?;
        let cidrs: Vec<Ipv4Net> = reservations.iter().map(|r| r.cidr).collect();
        let reserved = cidr::canonicalize(range, &cidrs);
        debug!(
            "Collected {} reservations, {} within {}",
            reservations.len(),
            reserved.len(),
            range
        );
        Ok(reserved)
    }

    /// Every reservation from all sources, sorted by network then source.
    pub async fn reservations(&self) -> Result<Vec<Reservation>, IpamError> {
        let mut tasks: JoinSet<Result<Vec<Reservation>, IpamError>> = JoinSet::new();

        for kind in [TargetKind::Cluster, TargetKind::NodePool] {
            let store = Arc::clone(&self.store);
            tasks.spawn(async move { object_reservations(store.as_ref(), kind).await });
        }
        let inventory = Arc::clone(&self.inventory);
        tasks.spawn(async move { cloud_reservations(inventory.as_ref()).await });

        let mut batches = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(batch)) => batches.push(batch),
                Ok(Err(e)) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(IpamError::Collection(e.to_string()));
                }
            }
        }

        let mut merged: Vec<Reservation> = batches.into_iter().flatten().collect();
        merged.sort();
        Ok(merged)
    }
}

async fn object_reservations(
    store: &dyn AllocationStore,
    kind: TargetKind,
) -> Result<Vec<Reservation>, IpamError> {
    let mut reservations = Vec::new();
    for target in store.list_targets(kind).await? {
        let (Some(cidr), Some(key)) = (target.allocated_cidr(), target.key()) else {
            continue;
        };
        let source = match kind {
            TargetKind::Cluster => ReservationSource::Cluster(key),
            TargetKind::NodePool => ReservationSource::NodePool(key),
        };
        reservations.push(Reservation::parse(cidr, source)?);
    }
    debug!("{} {} reservations", reservations.len(), kind);
    Ok(reservations)
}

async fn cloud_reservations(
    inventory: &dyn SubnetInventory,
) -> Result<Vec<Reservation>, IpamError> {
    let subnets = inventory.list_subnets().await?;
    let reservations = subnets
        .into_iter()
        .map(|subnet| Reservation::parse(&subnet.cidr_block, ReservationSource::CloudSubnet(subnet.id)))
        .collect::<Result<Vec<_>, _>>()?;
    debug!("{} cloud subnet reservations", reservations.len());
    Ok(reservations)
}
