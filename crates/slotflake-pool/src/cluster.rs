use slotflake::{Error, Result, UniqueId};
use tracing::info;

use crate::{
    claim::{POOL_NODE, QUEUE_NODE},
    coordinator::{Coordinator, CreateMode, ensure_path, join_path},
    error::CoordinationError,
};

/// Child of the pool node whose data is the cluster id as ASCII digits.
pub const CLUSTER_ID_NODE: &str = "cluster-id";

/// Reads the cluster id stored under `pool_path`.
///
/// # Errors
///
/// - [`Error::Configuration`] if the node is missing, is not a decimal number,
///   or names a cluster outside `0..=15`.
/// - [`Error::ClaimUnavailable`] if the coordination service fails.
pub fn cluster_id(coordinator: &dyn Coordinator, pool_path: &str) -> Result<u8> {
    let path = join_path(pool_path, CLUSTER_ID_NODE);
    let data = coordinator.get_data(&path).map_err(|err| match err {
        CoordinationError::NoNode(_) => Error::Configuration(format!("no cluster id at {path}")),
        other => Error::unavailable_from(format!("failed to read {path}"), other),
    })?;

    let text = core::str::from_utf8(&data)
        .map_err(|_| Error::Configuration(format!("cluster id at {path} is not text")))?
        .trim();
    let value: u64 = text.parse().map_err(|_| {
        Error::Configuration(format!("cluster id {text:?} at {path} is not a number"))
    })?;

    let max = UniqueId::max_cluster_id();
    u8::try_from(value)
        .ok()
        .filter(|id| *id <= max)
        .ok_or_else(|| Error::Configuration(format!("cluster id {value} is outside 0..={max}")))
}

/// Prepares a pool: creates `pool_path` with its queue and pool children and
/// writes `cluster_id`, overwriting any previous value.
///
/// # Errors
///
/// - [`Error::Configuration`] if `cluster_id` exceeds 15.
/// - [`Error::ClaimUnavailable`] if the coordination service fails.
pub fn provision(coordinator: &dyn Coordinator, pool_path: &str, cluster_id: u8) -> Result<()> {
    let max = UniqueId::max_cluster_id();
    if cluster_id > max {
        return Err(Error::Configuration(format!(
            "cluster id {cluster_id} is outside 0..={max}"
        )));
    }
    write_cluster_id(coordinator, pool_path, cluster_id.to_string().as_bytes())?;
    info!(pool = pool_path, cluster_id, "provisioned generator pool");
    Ok(())
}

/// Writes raw cluster-id data without validating it.
pub(crate) fn write_cluster_id(
    coordinator: &dyn Coordinator,
    pool_path: &str,
    data: &[u8],
) -> Result<()> {
    ensure_path(coordinator, pool_path)?;
    for child in [QUEUE_NODE, POOL_NODE] {
        ensure_path(coordinator, &join_path(pool_path, child))?;
    }
    let path = join_path(pool_path, CLUSTER_ID_NODE);
    match coordinator.create(&path, data, CreateMode::Persistent) {
        Ok(_) => Ok(()),
        Err(CoordinationError::NodeExists(_)) => Ok(coordinator.set_data(&path, data)?),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryEnsemble;

    #[test]
    fn provision_then_read() {
        let session = MemoryEnsemble::new().session();
        provision(&session, "/ids/east", 4).unwrap();
        assert_eq!(cluster_id(&session, "/ids/east").unwrap(), 4);
        assert!(session.exists("/ids/east/queue").unwrap());
        assert!(session.exists("/ids/east/pool").unwrap());

        provision(&session, "/ids/east", 15).unwrap();
        assert_eq!(cluster_id(&session, "/ids/east").unwrap(), 15);
    }

    #[test]
    fn provision_rejects_out_of_range() {
        let session = MemoryEnsemble::new().session();
        assert!(matches!(
            provision(&session, "/ids", 16),
            Err(Error::Configuration(_))
        ));
        assert!(!session.exists("/ids").unwrap());
    }

    #[test]
    fn missing_cluster_id_is_configuration_error() {
        let session = MemoryEnsemble::new().session();
        ensure_path(&session, "/ids").unwrap();
        assert!(matches!(
            cluster_id(&session, "/ids"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn malformed_or_out_of_range_values_are_rejected() {
        let session = MemoryEnsemble::new().session();
        for raw in ["16", "300", "-1", "four", ""] {
            write_cluster_id(&session, "/ids", raw.as_bytes()).unwrap();
            assert!(
                matches!(cluster_id(&session, "/ids"), Err(Error::Configuration(_))),
                "{raw:?}"
            );
        }
        write_cluster_id(&session, "/ids", b" 7\n").unwrap();
        assert_eq!(cluster_id(&session, "/ids").unwrap(), 7);
    }

    #[test]
    fn disconnected_read_is_unavailable() {
        let session = MemoryEnsemble::new().session();
        provision(&session, "/ids", 1).unwrap();
        session.disconnect();
        assert!(matches!(
            cluster_id(&session, "/ids"),
            Err(Error::ClaimUnavailable { .. })
        ));
    }
}
