use std::collections::BTreeSet;
use std::sync::Arc;

use crate::entities::{Entity, Node};
use crate::kvstore::KvStore;
use crate::paths;
use crate::Result;

/// Lazy view over a logical service deployed across nodes
#[derive(Clone)]
pub struct Service {
    dn: String,
    kv: Arc<dyn KvStore>,
}

dn_entity!(Service,
           fields: ["name", "status"],
           read_only: []);

impl Service {
    pub fn name(&self) -> Result<String> {
        self.get("name")
    }

    pub fn status(&self) -> Result<String> {
        self.get("status")
    }

    /// Nodes this service runs on
    ///
    /// Membership leaves are dereferenced to the node entries of the
    /// enclosing cluster.
    pub fn nodes(&self) -> Result<Vec<Node>> {
        let cluster = match paths::cluster_dn(&self.dn) {
            Some(dn) => dn.to_string(),
            None => bail!("service DN '{}' has no enclosing cluster", self.dn),
        };
        let subtree = self.kv.recurse(&format!("{}/nodes", self.dn))?;
        let folder = format!("{}/nodes/", self.dn);
        let names: BTreeSet<&str> = subtree.keys()
            .filter(|key| **key != folder)
            .map(|key| paths::last_segment(key))
            .collect();
        Ok(names.iter()
            .map(|name| Node::new(self.kv.clone(), &format!("{}/nodes/{}", cluster, name)))
            .collect())
    }

    /// Replace the node membership set
    pub fn replace_nodes(&self, nodes: &[Node]) -> Result<()> {
        self.kv.delete(&format!("{}/nodes", self.dn), true)?;
        for node in nodes {
            let leaf = format!("{}/nodes/{}", self.dn, paths::last_segment(node.dn()));
            self.kv.set(&leaf, "")?;
        }
        Ok(())
    }
}
