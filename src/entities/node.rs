use std::collections::BTreeSet;
use std::sync::Arc;

use crate::entities::{Cluster, Disk, DiskSpec, Entity, Network, NetworkSpec, Service};
use crate::kvstore::KvStore;
use crate::paths;
use crate::Result;

/// Lazy view over a member host of a cluster
#[derive(Clone)]
pub struct Node {
    dn: String,
    kv: Arc<dyn KvStore>,
}

dn_entity!(Node,
           fields: ["name", "status", "cpu", "mem", "host", "id", "address",
                    "docker_image", "docker_opts", "port", "clustername", "type"],
           read_only: []);

impl Node {
    pub fn name(&self) -> Result<String> {
        self.get("name")
    }

    pub fn status(&self) -> Result<String> {
        self.get("status")
    }

    pub fn address(&self) -> Result<String> {
        self.get("address")
    }

    pub fn host(&self) -> Result<String> {
        self.get("host")
    }

    pub fn cpu(&self) -> Result<String> {
        self.get("cpu")
    }

    pub fn mem(&self) -> Result<String> {
        self.get("mem")
    }

    pub fn id(&self) -> Result<String> {
        self.get("id")
    }

    pub fn port(&self) -> Result<String> {
        self.get("port")
    }

    pub fn docker_image(&self) -> Result<String> {
        self.get("docker_image")
    }

    pub fn docker_opts(&self) -> Result<String> {
        self.get("docker_opts")
    }

    pub fn clustername(&self) -> Result<String> {
        self.get("clustername")
    }

    /// The `type` attribute, e.g. `docker`
    pub fn kind(&self) -> Result<String> {
        self.get("type")
    }

    /// The cluster this node is part of
    pub fn cluster(&self) -> Cluster {
        Cluster::new(self.kv.clone(), &paths::strip_node_suffix(&self.dn))
    }

    /// Services this node belongs to
    ///
    /// The subtree holds membership leaves only; each name is dereferenced to
    /// the service entry of the enclosing cluster.
    pub fn services(&self) -> Result<Vec<Service>> {
        let cluster = match paths::cluster_dn(&self.dn) {
            Some(dn) => dn.to_string(),
            None => bail!("node DN '{}' has no enclosing cluster", self.dn),
        };
        let subtree = self.kv.recurse(&format!("{}/services", self.dn))?;
        let folder = format!("{}/services/", self.dn);
        let names: BTreeSet<&str> = subtree.keys()
            .filter(|key| **key != folder)
            .map(|key| paths::last_segment(key))
            .collect();
        Ok(names.iter()
            .map(|name| Service::new(self.kv.clone(), &format!("{}/services/{}", cluster, name)))
            .collect())
    }

    /// Replace the service membership set
    ///
    /// Drops the whole subtree first; an interrupted call can leave the set
    /// partially written.
    pub fn replace_services(&self, services: &[Service]) -> Result<()> {
        self.kv.delete(&format!("{}/services", self.dn), true)?;
        for service in services {
            let leaf = format!("{}/services/{}", self.dn, paths::last_segment(service.dn()));
            self.kv.set(&leaf, "")?;
        }
        Ok(())
    }

    /// Disks attached to this node
    pub fn disks(&self) -> Result<Vec<Disk>> {
        let subtree = self.kv.recurse(&format!("{}/disks", self.dn))?;
        let folder = format!("{}/disks/", self.dn);
        let dns: BTreeSet<String> = subtree.keys()
            .filter(|key| **key != folder)
            .filter_map(|key| paths::disk_dn(key))
            .map(|dn| dn.to_string())
            .collect();
        Ok(dns.iter().map(|dn| Disk::new(self.kv.clone(), dn)).collect())
    }

    /// Write disk attribute sets, leaving existing siblings alone
    pub fn set_disks(&self, disks: &[DiskSpec]) -> Result<()> {
        for disk in disks {
            let base = format!("{}/disks/{}", self.dn, disk.name);
            self.kv.set(&format!("{}/name", base), &disk.name)?;
            self.kv.set(&format!("{}/type", base), &disk.kind)?;
            self.kv.set(&format!("{}/mode", base), &disk.mode)?;
            self.kv.set(&format!("{}/origin", base), &disk.origin)?;
            self.kv.set(&format!("{}/destination", base), &disk.destination)?;
        }
        Ok(())
    }

    /// Replace every disk of this node
    pub fn replace_disks(&self, disks: &[DiskSpec]) -> Result<()> {
        self.kv.delete(&format!("{}/disks", self.dn), true)?;
        self.set_disks(disks)
    }

    /// Networks this node is attached to
    pub fn networks(&self) -> Result<Vec<Network>> {
        let subtree = self.kv.recurse(&format!("{}/networks", self.dn))?;
        let folder = format!("{}/networks/", self.dn);
        let dns: BTreeSet<String> = subtree.keys()
            .filter(|key| **key != folder)
            .filter_map(|key| paths::network_dn(key))
            .map(|dn| dn.to_string())
            .collect();
        Ok(dns.iter().map(|dn| Network::new(self.kv.clone(), dn)).collect())
    }

    /// Write network attribute sets, leaving existing siblings alone
    pub fn set_networks(&self, networks: &[NetworkSpec]) -> Result<()> {
        for network in networks {
            let base = format!("{}/networks/{}", self.dn, network.name);
            self.kv.set(&format!("{}/name", base), &network.name)?;
            self.kv.set(&format!("{}/device", base), &network.device)?;
            self.kv.set(&format!("{}/bridge", base), &network.bridge)?;
            self.kv.set(&format!("{}/address", base), &network.address)?;
            self.kv.set(&format!("{}/netmask", base), &network.netmask)?;
            self.kv.set(&format!("{}/gateway", base), &network.gateway)?;
        }
        Ok(())
    }

    /// Replace every network of this node
    pub fn replace_networks(&self, networks: &[NetworkSpec]) -> Result<()> {
        self.kv.delete(&format!("{}/networks", self.dn), true)?;
        self.set_networks(networks)
    }

    /// Tags, stored comma joined; whitespace around items is trimmed
    pub fn tags(&self) -> Result<Vec<String>> {
        let raw = self.get("tags")?;
        Ok(raw.split(',')
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect())
    }

    pub fn set_tags(&self, tags: &[String]) -> Result<()> {
        self.set("tags", &tags.join(","))
    }

    /// Ports a health checker should probe, comma joined decimal integers
    pub fn check_ports(&self) -> Result<Vec<u32>> {
        let raw = self.get("check_ports")?;
        let mut ports = Vec::new();
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            ports.push(part.parse::<u32>()?);
        }
        Ok(ports)
    }

    pub fn set_check_ports(&self, ports: &[u32]) -> Result<()> {
        let joined = ports.iter()
            .map(|port| port.to_string())
            .collect::<Vec<String>>()
            .join(",");
        self.set("check_ports", &joined)
    }
}
