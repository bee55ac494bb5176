//! Distributed lock around the allocation critical section.
//!
//! At most one allocator across all replicas may collect reservations, pick a
//! block and persist it at a time. The lock never blocks: contention is
//! reported as [`LockError::AlreadyExists`] and the caller gives up until its
//! next reconciliation. A crashed holder is bounded by the TTL; the lease is
//! not renewed while held.
//!
//! # Atomicity
//!
//! [`LeaseLock`] stores the token in a `coordination.k8s.io/v1` Lease. Creating
//! the lease and taking over an expired one are both conditional writes
//! (create fails with 409 if it exists, replace carries the observed
//! resourceVersion), so two replicas racing for the same lease cannot both win.
//! Every successful acquisition returns a [`LockToken`] carrying the
//! resourceVersion it wrote. Release deletes the lease with that version as a
//! precondition, so a pass whose lease expired and was taken over (by another
//! replica or by a concurrent pass of the same one) cannot delete the new
//! owner's token.

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, DeleteParams, PostParams, Preconditions};
use kube::Client;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default time a lock stays valid without being released
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Lock outcomes other than success
#[derive(Debug, Error)]
pub enum LockError {
    /// Another allocator holds an unexpired token
    #[error("lock {name} is already held by {holder}")]
    AlreadyExists { name: String, holder: String },

    /// Token is gone: expired, taken over, or never acquired
    #[error("lock {name} not found")]
    NotFound { name: String },

    /// Backend failure
    #[error("lock backend error: {0}")]
    Backend(#[from] kube::Error),
}

/// Proof of one successful acquisition, handed back on release.
///
/// Holds the backend version written when the lock was taken. A token whose
/// lock has since expired and been taken over no longer matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    version: String,
}

impl LockToken {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Exclusive, TTL-bounded token shared by every allocator of an installation.
#[async_trait::async_trait]
pub trait DistributedLock: Send + Sync {
    /// Lock name, for logs
    fn name(&self) -> &str;

    /// Take the token. Fails with `AlreadyExists` instead of waiting.
    async fn lock(&self) -> Result<LockToken, LockError>;

    /// Give back the token acquired as `token`. `NotFound` means it is gone
    /// (released, expired or taken over) and nothing was deleted.
    async fn unlock(&self, token: LockToken) -> Result<(), LockError>;
}

/// Who holds a lock: `<process>@<version>/<instance>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockIdentity {
    pub process: String,
    pub version: String,
    pub instance: String,
}

impl LockIdentity {
    pub fn new(
        process: impl Into<String>,
        version: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            process: process.into(),
            version: version.into(),
            instance: instance.into(),
        }
    }
}

impl fmt::Display for LockIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.process, self.version, self.instance)
    }
}

// MicroTime goes through its RFC 3339 wire form so lease timestamps can be
// handled with chrono whatever time crate k8s-openapi wraps.
fn to_micro_time(time: DateTime<Utc>) -> Option<MicroTime> {
    let wire = time.to_rfc3339_opts(SecondsFormat::Micros, true);
    serde_json::from_value(serde_json::Value::String(wire)).ok()
}

fn from_micro_time(time: &MicroTime) -> Option<DateTime<Utc>> {
    let wire = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(wire.as_str()?)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Maps a failed create/replace of the lease: 409 means someone else won the race.
fn acquire_error(name: &str, holder: Option<&str>, err: kube::Error) -> LockError {
    match err {
        kube::Error::Api(ref e) if e.code == 409 => LockError::AlreadyExists {
            name: name.to_string(),
            holder: holder.unwrap_or("<unknown>").to_string(),
        },
        other => LockError::Backend(other),
    }
}

/// Maps a failed delete of the lease: 404 (gone) and 409 (precondition failed,
/// lease now belongs to someone else) both mean our token no longer exists.
fn release_error(name: &str, err: kube::Error) -> LockError {
    match err {
        kube::Error::Api(ref e) if e.code == 404 || e.code == 409 => LockError::NotFound {
            name: name.to_string(),
        },
        other => LockError::Backend(other),
    }
}

/// Token for a lease write; a response without resourceVersion cannot be
/// released safely later, so it is treated as a backend fault.
fn token_of(name: &str, lease: &Lease) -> Result<LockToken, LockError> {
    lease
        .metadata
        .resource_version
        .as_deref()
        .map(LockToken::new)
        .ok_or_else(|| {
            LockError::Backend(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: format!("lease {name} returned without resourceVersion"),
                reason: "Invalid".to_string(),
                code: 500,
            }))
        })
}

/// True when the lease's renew time plus duration lies in the past.
/// Leases missing either field count as expired.
pub fn lease_expired(lease: &Lease, now: DateTime<Utc>) -> bool {
    let spec = lease.spec.as_ref();
    let renew_time = spec
        .and_then(|s| s.renew_time.as_ref())
        .and_then(from_micro_time);
    let duration = spec.and_then(|s| s.lease_duration_seconds);
    match (renew_time, duration) {
        (Some(rt), Some(secs)) => now > rt + chrono::Duration::seconds(i64::from(secs)),
        _ => true,
    }
}

/// [`DistributedLock`] backed by a Kubernetes Lease.
pub struct LeaseLock {
    api: Api<Lease>,
    name: String,
    namespace: String,
    identity: String,
    ttl: Duration,
}

impl fmt::Debug for LeaseLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseLock")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("identity", &self.identity)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl LeaseLock {
    pub fn new(
        client: Client,
        namespace: &str,
        name: &str,
        identity: &LockIdentity,
        ttl: Duration,
    ) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            ttl,
        }
    }

    fn lease_spec(&self, now: DateTime<Utc>, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(i32::try_from(self.ttl.as_secs()).unwrap_or(i32::MAX)),
            acquire_time: to_micro_time(now),
            renew_time: to_micro_time(now),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl DistributedLock for LeaseLock {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lock(&self) -> Result<LockToken, LockError> {
        let now = Utc::now();

        let Some(existing) = self.api.get_opt(&self.name).await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(self.name.clone()),
                    namespace: Some(self.namespace.clone()),
                    ..Default::default()
                },
                spec: Some(self.lease_spec(now, 0)),
            };
            let created = self
                .api
                .create(&PostParams::default(), &lease)
                .await
                .map_err(|e| acquire_error(&self.name, None, e))?;
            info!(lock = %self.name, identity = %self.identity, "Lock acquired");
            return token_of(&self.name, &created);
        };

        let holder = existing
            .spec
            .as_ref()
            .and_then(|s| s.holder_identity.clone());
        if !lease_expired(&existing, now) {
            return Err(LockError::AlreadyExists {
                name: self.name.clone(),
                holder: holder.unwrap_or_else(|| "<unknown>".to_string()),
            });
        }

        let transitions = existing
            .spec
            .as_ref()
            .and_then(|s| s.lease_transitions)
            .unwrap_or(0);
        let takeover = Lease {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: existing.metadata.resource_version.clone(),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, transitions + 1)),
        };

        let replaced = self
            .api
            .replace(&self.name, &PostParams::default(), &takeover)
            .await
            .map_err(|e| acquire_error(&self.name, holder.as_deref(), e))?;
        info!(
            lock = %self.name,
            identity = %self.identity,
            previous = holder.as_deref().unwrap_or("<none>"),
            "Lock acquired from expired holder"
        );
        token_of(&self.name, &replaced)
    }

    async fn unlock(&self, token: LockToken) -> Result<(), LockError> {
        let dp = DeleteParams {
            preconditions: Some(Preconditions {
                resource_version: Some(token.version),
                uid: None,
            }),
            ..Default::default()
        };

        self.api
            .delete(&self.name, &dp)
            .await
            .map_err(|e| release_error(&self.name, e))?;
        debug!(lock = %self.name, identity = %self.identity, "Lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lease(renewed_secs_ago: i64, duration: Option<i32>) -> Lease {
        Lease {
            metadata: ObjectMeta::default(),
            spec: Some(LeaseSpec {
                holder_identity: Some("subnet-allocator@0.1.0/pod-a".to_string()),
                renew_time: to_micro_time(Utc::now() - chrono::Duration::seconds(renewed_secs_ago)),
                lease_duration_seconds: duration,
                ..Default::default()
            }),
        }
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "lease".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_acquire_conflict_is_already_exists() {
        let err = acquire_error("ipam", Some("subnet-allocator@0.1.0/pod-b"), api_error(409));
        assert!(matches!(
            err,
            LockError::AlreadyExists { ref name, ref holder }
                if name == "ipam" && holder == "subnet-allocator@0.1.0/pod-b"
        ));
        let err = acquire_error("ipam", None, api_error(409));
        assert!(matches!(err, LockError::AlreadyExists { ref holder, .. } if holder == "<unknown>"));
    }

    #[test]
    fn test_acquire_other_failures_are_backend() {
        for code in [403, 404, 500] {
            let err = acquire_error("ipam", None, api_error(code));
            assert!(matches!(err, LockError::Backend(_)), "code {code}");
        }
    }

    #[test]
    fn test_release_gone_or_taken_over_is_not_found() {
        for code in [404, 409] {
            let err = release_error("ipam", api_error(code));
            assert!(matches!(err, LockError::NotFound { ref name } if name == "ipam"), "code {code}");
        }
        assert!(matches!(release_error("ipam", api_error(500)), LockError::Backend(_)));
    }

    #[test]
    fn test_token_carries_written_version() {
        let mut lease = Lease::default();
        assert!(matches!(token_of("ipam", &lease), Err(LockError::Backend(_))));

        lease.metadata.resource_version = Some("4711".to_string());
        let token = token_of("ipam", &lease).unwrap();
        assert_eq!(token.version(), "4711");
    }

    #[test]
    fn test_identity_format() {
        let identity = LockIdentity::new("subnet-allocator", "0.1.0", "pod-a");
        assert_eq!(identity.to_string(), "subnet-allocator@0.1.0/pod-a");
    }

    #[test]
    fn test_micro_time_round_trip() {
        let now = Utc::now();
        let wire = to_micro_time(now).and_then(|t| from_micro_time(&t));
        assert_eq!(wire.map(|t| t.timestamp_micros()), Some(now.timestamp_micros()));
    }

    #[test]
    fn test_fresh_lease_not_expired() {
        assert!(!lease_expired(&lease(5, Some(30)), Utc::now()));
    }

    #[test]
    fn test_old_lease_expired() {
        assert!(lease_expired(&lease(31, Some(30)), Utc::now()));
    }

    #[test]
    fn test_incomplete_lease_expired() {
        assert!(lease_expired(&lease(0, None), Utc::now()));
        let empty = Lease::default();
        assert!(lease_expired(&empty, Utc::now()));
    }
}
