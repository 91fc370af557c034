//! Endpoint discovery adaptor.
//!
//! The actual enumeration agent (a system message-bus daemon in the
//! reference deployment) is an external collaborator; this module only
//! specifies the record shape it populates and the dedup/filter logic that
//! turns those records into endpoints. An optional `dbus` feature adds a
//! real `zbus`-based enumerator over `org.freedesktop.DBus.ObjectManager`
//! for callers who want to skip hand-rolling that part too.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::frame::NMIMT_NVME_MI;
use crate::topology::{Endpoint, Root};

/// One endpoint as reported by the discovery agent. `eid`/`network_id` are
/// optional because the underlying D-Bus properties are themselves
/// optional on a given object; a record missing either, on an otherwise
/// NVMe-MI-capable object, is an error for that one record.
#[derive(Debug, Clone, Default)]
pub struct EndpointRecord {
    pub eid: Option<u8>,
    pub network_id: Option<i32>,
    pub supported_message_types: BTreeSet<u8>,
}

impl EndpointRecord {
    pub fn is_nvme_mi_capable(&self) -> bool {
        self.supported_message_types.contains(&NMIMT_NVME_MI)
    }
}

/// One record rejected during discovery, paired with its index in the
/// input slice.
pub struct DiscoveryError {
    pub index: usize,
    pub error: Error,
}

/// Adds one endpoint per NVMe-MI-capable record not already present in
/// `seen`, constructing each endpoint's transport via `make_endpoint`.
/// Records lacking `eid`/`network_id`, or whose endpoint construction
/// fails, are skipped and reported; discovery of the remaining records
/// continues regardless. Idempotent: a `(network_id, eid)` pair already in
/// `seen` is silently skipped, so calling this twice with the same records
/// and the same `seen` set never creates a duplicate endpoint.
pub fn add_discovered(
    root: &mut Root,
    seen: &mut BTreeSet<(i32, u8)>,
    records: &[EndpointRecord],
    make_endpoint: impl Fn(i32, u8) -> Result<Endpoint>,
) -> Vec<DiscoveryError> {
    let mut errors = Vec::new();

    for (index, record) in records.iter().enumerate() {
        if !record.is_nvme_mi_capable() {
            continue;
        }

        let (network_id, eid) = match (record.network_id, record.eid) {
            (Some(network_id), Some(eid)) => (network_id, eid),
            _ => {
                errors.push(DiscoveryError {
                    index,
                    error: Error::invalid_arg(
                        "NVMe-MI-capable record missing EID or NetworkId",
                    ),
                });
                continue;
            }
        };

        let key = (network_id, eid);
        if seen.contains(&key) {
            continue;
        }

        match make_endpoint(network_id, eid) {
            Ok(ep) => {
                root.add_endpoint(ep);
                seen.insert(key);
            }
            Err(error) => errors.push(DiscoveryError { index, error }),
        }
    }

    errors
}

/// Live endpoint enumeration via a system D-Bus daemon, off by default.
#[cfg(feature = "dbus")]
pub mod dbus {
    use super::EndpointRecord;
    use crate::error::{Error, Result};
    use std::collections::BTreeSet;
    use zbus::blocking::{Connection, Proxy};
    use zbus::zvariant::{OwnedObjectPath, OwnedValue};

    const ENDPOINT_INTERFACE: &str = "xyz.openbmc_project.MCTP.Endpoint";
    const OBJECT_MANAGER_DEST: &str = "xyz.openbmc_project.MCTP";
    const OBJECT_MANAGER_PATH: &str = "/xyz/openbmc_project/mctp";

    /// Enumerates MCTP Endpoint objects over the system bus and converts
    /// them into [`EndpointRecord`]s. Each object's properties are read
    /// defensively: a malformed property type degrades that one record to
    /// a "missing" field rather than aborting the whole enumeration.
    pub fn enumerate_endpoints() -> Result<Vec<EndpointRecord>> {
        let connection = Connection::system()
            .map_err(|e| Error::protocol(format!("D-Bus system connection failed: {e}")))?;

        let proxy = Proxy::new(
            &connection,
            OBJECT_MANAGER_DEST,
            OBJECT_MANAGER_PATH,
            "org.freedesktop.DBus.ObjectManager",
        )
        .map_err(|e| Error::protocol(format!("D-Bus ObjectManager proxy failed: {e}")))?;

        let managed: std::collections::HashMap<
            OwnedObjectPath,
            std::collections::HashMap<String, std::collections::HashMap<String, OwnedValue>>,
        > = proxy
            .call("GetManagedObjects", &())
            .map_err(|e| Error::protocol(format!("GetManagedObjects failed: {e}")))?;

        let mut records = Vec::new();
        for interfaces in managed.values() {
            let Some(props) = interfaces.get(ENDPOINT_INTERFACE) else {
                continue;
            };

            let eid = props
                .get("EID")
                .and_then(|v| u8::try_from(v.clone()).ok());
            let network_id = props
                .get("NetworkId")
                .and_then(|v| i32::try_from(v.clone()).ok());
            let supported_message_types: BTreeSet<u8> = props
                .get("SupportedMessageTypes")
                .and_then(|v| <Vec<u8>>::try_from(v.clone()).ok())
                .map(|v| v.into_iter().collect())
                .unwrap_or_default();

            records.push(EndpointRecord {
                eid,
                network_id,
                supported_message_types,
            });
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn fake_endpoint(_network_id: i32, _eid: u8) -> Result<Endpoint> {
        // A real socket open would need AF_MCTP kernel support; for the
        // dedup/filter logic under test we only need *some* endpoint.
        let state = Box::new(()) as crate::transport::TransportState;
        struct NoopTransport;
        impl crate::transport::Transport for NoopTransport {
            fn name(&self) -> &'static str {
                "noop"
            }
            fn mic_enabled(&self) -> bool {
                false
            }
            fn submit(
                &self,
                _state: &mut crate::transport::TransportState,
                _req: &mut crate::frame::RequestFrame,
                _resp: &mut crate::frame::ResponseFrame,
                _timeout_ms: u64,
                _mprt_max_ms: u64,
            ) -> Result<()> {
                Ok(())
            }
        }
        Ok(Endpoint::new(Arc::new(NoopTransport), state))
    }

    fn nvme_mi_record(network_id: i32, eid: u8) -> EndpointRecord {
        EndpointRecord {
            eid: Some(eid),
            network_id: Some(network_id),
            supported_message_types: [NMIMT_NVME_MI].into_iter().collect(),
        }
    }

    #[test]
    fn adds_one_endpoint_per_capable_record() {
        let mut root = Root::new();
        let mut seen = BTreeSet::new();
        let records = vec![nvme_mi_record(1, 9), nvme_mi_record(1, 10)];

        let errors = add_discovered(&mut root, &mut seen, &records, fake_endpoint);
        assert!(errors.is_empty());
        assert_eq!(root.endpoints().len(), 2);
    }

    #[test]
    fn duplicate_record_is_idempotent() {
        let mut root = Root::new();
        let mut seen = BTreeSet::new();
        let records = vec![nvme_mi_record(1, 9)];

        add_discovered(&mut root, &mut seen, &records, fake_endpoint);
        add_discovered(&mut root, &mut seen, &records, fake_endpoint);
        assert_eq!(root.endpoints().len(), 1);
    }

    #[test]
    fn skips_record_missing_eid_without_aborting_others() {
        let mut root = Root::new();
        let mut seen = BTreeSet::new();
        let records = vec![
            EndpointRecord {
                eid: None,
                network_id: Some(1),
                supported_message_types: [NMIMT_NVME_MI].into_iter().collect(),
            },
            nvme_mi_record(1, 9),
        ];

        let errors = add_discovered(&mut root, &mut seen, &records, fake_endpoint);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, 0);
        assert_eq!(root.endpoints().len(), 1);
    }

    #[test]
    fn ignores_records_without_the_nvme_mi_message_type() {
        let mut root = Root::new();
        let mut seen = BTreeSet::new();
        let records = vec![EndpointRecord {
            eid: Some(9),
            network_id: Some(1),
            supported_message_types: [0x01].into_iter().collect(),
        }];

        let errors = add_discovered(&mut root, &mut seen, &records, fake_endpoint);
        assert!(errors.is_empty());
        assert!(root.endpoints().is_empty());
    }
}
