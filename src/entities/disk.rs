use std::sync::Arc;

use crate::entities::Entity;
use crate::kvstore::KvStore;
use crate::Result;

/// Lazy view over a disk attached to a node
#[derive(Clone)]
pub struct Disk {
    dn: String,
    kv: Arc<dyn KvStore>,
}

dn_entity!(Disk,
           fields: ["name", "type", "mode", "origin", "destination"],
           read_only: []);

impl Disk {
    pub fn name(&self) -> Result<String> {
        self.get("name")
    }

    /// The `type` attribute, e.g. `sata` or `ssd`
    pub fn kind(&self) -> Result<String> {
        self.get("type")
    }

    pub fn mode(&self) -> Result<String> {
        self.get("mode")
    }

    pub fn origin(&self) -> Result<String> {
        self.get("origin")
    }

    pub fn destination(&self) -> Result<String> {
        self.get("destination")
    }
}

/// Attribute set written for a disk
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct DiskSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub destination: String,
}
