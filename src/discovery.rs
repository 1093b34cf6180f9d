// Service discovery component
// Advertises the WAMP endpoint on the local network over mDNS/DNS-SD

use crate::component::{CallResult, CapabilityKind, Component, Invocation};
use crate::config::Config;
use crate::registry::HostContext;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use mdns_sd::{ServiceDaemon, ServiceInfo};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub const PROCEDURE_INFO: &str = "discovery.info";

/// Read and trim the machine id
pub fn read_machine_id(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path).map_err(|e| {
        Error::Discovery(format!("Failed to read machine id from {}: {}", path.display(), e))
    })?;

    let id = raw.trim();
    if id.is_empty() {
        return Err(Error::Discovery(format!(
            "Machine id file {} is empty",
            path.display()
        )));
    }
    Ok(id.to_string())
}

/// Everything published about this server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Advertisement {
    pub instance: String,
    pub service_type: String,
    pub hostname: String,
    pub port: u16,
    pub txt: BTreeMap<String, String>,
}

impl Advertisement {
    pub fn new(config: &Config, hostname: &str, machine_id: &str) -> Self {
        let instance = config
            .discovery
            .instance_name
            .clone()
            .unwrap_or_else(|| format!("deskconnd ({})", hostname));

        let mut txt = BTreeMap::new();
        txt.insert("realm".to_string(), config.server.realm.clone());
        txt.insert("machineid".to_string(), machine_id.to_string());
        txt.insert("path".to_string(), config.server.path.clone());

        Self {
            instance,
            service_type: config.discovery.service_type.clone(),
            hostname: hostname.to_string(),
            port: config.server.port,
            txt,
        }
    }

    /// mDNS host name, always in the `.local.` domain
    pub fn host_fqdn(&self) -> String {
        format!("{}.local.", self.hostname.trim_end_matches('.'))
    }

    fn service_info(&self) -> Result<ServiceInfo> {
        let properties: HashMap<String, String> = self
            .txt
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        ServiceInfo::new(
            &self.service_type,
            &self.instance,
            &self.host_fqdn(),
            "",
            self.port,
            properties,
        )
        .map(ServiceInfo::enable_addr_auto)
        .map_err(|e| Error::Discovery(format!("Invalid service record: {}", e)))
    }

    fn to_kwargs(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

pub struct ServiceDiscovery {
    daemon: ServiceDaemon,
    fullname: String,
    advertisement: Advertisement,
}

impl ServiceDiscovery {
    pub fn factory(ctx: &HostContext) -> BoxFuture<'_, Result<Arc<dyn Component>>> {
        Box::pin(async move {
            let machine_id = read_machine_id(&ctx.config.discovery.machine_id_path)?;
            let advertisement = Advertisement::new(&ctx.config, &ctx.hostname, &machine_id);
            let service = advertisement.service_info()?;
            let fullname = service.get_fullname().to_string();

            let daemon = ServiceDaemon::new()
                .map_err(|e| Error::Discovery(format!("Failed to start mDNS daemon: {}", e)))?;
            daemon
                .register(service)
                .map_err(|e| Error::Discovery(format!("Failed to register {}: {}", fullname, e)))?;

            info!(
                "Advertising {} as {} on port {}",
                advertisement.instance, advertisement.service_type, advertisement.port
            );

            Ok(Arc::new(Self {
                daemon,
                fullname,
                advertisement,
            }) as Arc<dyn Component>)
        })
    }

    pub fn advertisement(&self) -> &Advertisement {
        &self.advertisement
    }
}

#[async_trait]
impl Component for ServiceDiscovery {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::ServiceDiscovery
    }

    fn procedures(&self) -> &'static [&'static str] {
        &[PROCEDURE_INFO]
    }

    async fn invoke(&self, procedure: &str, _invocation: Invocation) -> Result<CallResult> {
        match procedure {
            PROCEDURE_INFO => Ok(CallResult::keywords(self.advertisement.to_kwargs())),
            other => Err(Error::NoSuchProcedure(other.to_string())),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!("Failed to unregister {}: {}", self.fullname, e);
        }
        self.daemon
            .shutdown()
            .map_err(|e| Error::Discovery(format!("Failed to stop mDNS daemon: {}", e)))?;
        info!("Stopped advertising {}", self.fullname);
        Ok(())
    }
}
