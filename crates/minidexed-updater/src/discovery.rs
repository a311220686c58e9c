// SPDX-License-Identifier: GPL-3.0-or-later

//! mDNS discovery of MiniDexed devices advertising an FTP service

use crate::error::{Result, UpdaterError};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const FTP_SERVICE_TYPE: &str = "_ftp._tcp.local.";
pub const VENDOR_MARKER: &str = "MiniDexed";

/// A device that can be deployed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: String,
}

impl DiscoveredDevice {
    /// A device given on the command line; the address doubles as its name
    pub fn explicit(address: &str) -> Self {
        Self {
            address: address.to_string(),
            name: address.to_string(),
        }
    }
}

/// What a resolved service advertised, detached from the mDNS library types
#[derive(Debug, Clone, Default)]
pub struct ServiceAdvert {
    pub fullname: String,
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub properties: Vec<(String, Option<Vec<u8>>)>,
}

impl From<&ServiceInfo> for ServiceAdvert {
    fn from(info: &ServiceInfo) -> Self {
        Self {
            fullname: info.get_fullname().to_string(),
            hostname: info.get_hostname().to_string(),
            addresses: info.get_addresses().iter().copied().collect(),
            properties: info
                .get_properties()
                .iter()
                .map(|p| (p.key().to_string(), p.val().map(<[u8]>::to_vec)))
                .collect(),
        }
    }
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}

impl ServiceAdvert {
    /// True if any TXT key or value mentions the marker, either as raw bytes or
    /// once decoded as text
    pub fn carries_marker(&self, marker: &str) -> bool {
        self.properties.iter().any(|(key, value)| {
            if key.contains(marker) || contains_bytes(key.as_bytes(), marker.as_bytes()) {
                return true;
            }
            value.as_deref().is_some_and(|v| {
                contains_bytes(v, marker.as_bytes()) || String::from_utf8_lossy(v).contains(marker)
            })
        })
    }

    /// Lowest IPv4 address, falling back to the lowest IPv6 one
    pub fn primary_address(&self) -> Option<IpAddr> {
        let v4 = self.addresses.iter().filter(|a| a.is_ipv4()).min();
        v4.or_else(|| self.addresses.iter().min()).copied()
    }

    pub fn display_name(&self) -> String {
        let name = self.hostname.trim_end_matches('.');
        if name.is_empty() {
            self.fullname.trim_end_matches('.').to_string()
        } else {
            name.to_string()
        }
    }
}

/// Events observed while browsing
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    Added(ServiceAdvert),
    Updated(ServiceAdvert),
    Removed { fullname: String },
}

/// Append-only list of qualifying devices, unique by address
#[derive(Debug)]
pub struct DeviceRegistry {
    marker: String,
    devices: Vec<DiscoveredDevice>,
}

impl DeviceRegistry {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            devices: Vec::new(),
        }
    }

    pub fn apply(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Added(advert) => {
                info!("Service {} added", advert.fullname);
                self.record(&advert);
            }
            DiscoveryEvent::Updated(advert) => {
                info!("Service {} updated", advert.fullname);
                self.record(&advert);
            }
            DiscoveryEvent::Removed { fullname } => {
                info!("Service {fullname} removed");
            }
        }
    }

    fn record(&mut self, advert: &ServiceAdvert) {
        if !advert.carries_marker(&self.marker) {
            debug!("Ignoring {}: no {} marker", advert.fullname, self.marker);
            return;
        }
        let Some(address) = advert.primary_address() else {
            debug!("Ignoring {}: no address", advert.fullname);
            return;
        };

        let address = address.to_string();
        if self.devices.iter().any(|d| d.address == address) {
            return;
        }
        self.devices.push(DiscoveredDevice {
            address,
            name: advert.display_name(),
        });
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }
}

/// Map a browse event onto the registry's view. `seen` holds the fullnames
/// already resolved once; a repeat resolve is an update.
pub fn to_discovery_event(
    event: ServiceEvent,
    seen: &mut HashSet<String>,
) -> Option<DiscoveryEvent> {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let advert = ServiceAdvert::from(&info);
            if seen.insert(advert.fullname.clone()) {
                Some(DiscoveryEvent::Added(advert))
            } else {
                Some(DiscoveryEvent::Updated(advert))
            }
        }
        ServiceEvent::ServiceRemoved(_, fullname) => {
            seen.remove(&fullname);
            Some(DiscoveryEvent::Removed { fullname })
        }
        ServiceEvent::SearchStarted(ty) | ServiceEvent::SearchStopped(ty) => {
            debug!("mDNS search state changed for {ty}");
            None
        }
        ServiceEvent::ServiceFound(_, fullname) => {
            debug!("Found {fullname}, waiting for it to resolve");
            None
        }
    }
}

/// Browse for the discovery window and return qualifying devices in the order
/// they were found
pub async fn discover_devices(window: Duration) -> Result<Vec<DiscoveredDevice>> {
    let daemon = ServiceDaemon::new()
        .map_err(|e| UpdaterError::Discovery(format!("Failed to start mDNS daemon: {e}")))?;
    let receiver = daemon
        .browse(FTP_SERVICE_TYPE)
        .map_err(|e| UpdaterError::Discovery(format!("Failed to browse: {e}")))?;

    let registry = Arc::new(Mutex::new(DeviceRegistry::new(VENDOR_MARKER)));
    let listener_registry = Arc::clone(&registry);

    let listener = tokio::spawn(async move {
        let mut seen = HashSet::new();
        while let Ok(event) = receiver.recv_async().await {
            if let Some(event) = to_discovery_event(event, &mut seen) {
                listener_registry.lock().apply(event);
            }
        }
    });

    info!("Searching for devices...");
    tokio::time::sleep(window).await;
    listener.abort();

    if let Err(e) = daemon.shutdown() {
        warn!("mDNS daemon shutdown failed: {e}");
    }

    let devices = registry.lock().devices().to_vec();
    info!("Devices found: {devices:?}");
    Ok(devices)
}
