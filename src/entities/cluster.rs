use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::entities::{Entity, Node, Service};
use crate::kvstore::KvStore;
use crate::paths;
use crate::Result;

/// Lazy view over a materialised cluster instance
#[derive(Clone)]
pub struct Cluster {
    dn: String,
    kv: Arc<dyn KvStore>,
}

dn_entity!(Cluster,
           fields: ["name", "instance_name", "status"],
           read_only: []);

impl Cluster {
    /// Member nodes, reconstructed from the `nodes/` subtree
    pub fn nodes(&self) -> Result<Vec<Node>> {
        let subtree = self.kv.recurse(&format!("{}/nodes", self.dn))?;
        let folder = format!("{}/nodes/", self.dn);
        let dns: BTreeSet<String> = subtree.keys()
            .filter(|key| **key != folder)
            .filter_map(|key| paths::node_dn(key))
            .map(|dn| dn.to_string())
            .collect();
        Ok(dns.iter().map(|dn| Node::new(self.kv.clone(), dn)).collect())
    }

    /// Deployed services, reconstructed from the `services/` subtree
    pub fn services(&self) -> Result<Vec<Service>> {
        let subtree = self.kv.recurse(&format!("{}/services", self.dn))?;
        let folder = format!("{}/services/", self.dn);
        let dns: BTreeSet<String> = subtree.keys()
            .filter(|key| **key != folder)
            .filter_map(|key| paths::service_dn(key))
            .map(|dn| dn.to_string())
            .collect();
        Ok(dns.iter().map(|dn| Service::new(self.kv.clone(), dn)).collect())
    }

    /// Write a batch of scalar attributes at the top level of the cluster
    pub fn set_attributes(&self, attributes: &BTreeMap<String, String>) -> Result<()> {
        for (name, value) in attributes {
            self.set(name, value)?;
        }
        Ok(())
    }
}
