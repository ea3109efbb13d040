use std::sync::Arc;

use crate::entities::Entity;
use crate::kvstore::KvStore;
use crate::Result;

/// Lazy view over a network a node is attached to
#[derive(Clone)]
pub struct Network {
    dn: String,
    kv: Arc<dyn KvStore>,
}

dn_entity!(Network,
           fields: ["name", "device", "bridge", "address", "netmask", "gateway"],
           read_only: []);

impl Network {
    pub fn name(&self) -> Result<String> {
        self.get("name")
    }

    pub fn device(&self) -> Result<String> {
        self.get("device")
    }

    pub fn bridge(&self) -> Result<String> {
        self.get("bridge")
    }

    pub fn address(&self) -> Result<String> {
        self.get("address")
    }

    pub fn netmask(&self) -> Result<String> {
        self.get("netmask")
    }

    pub fn gateway(&self) -> Result<String> {
        self.get("gateway")
    }
}

/// Attribute set written for a network
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
#[serde(deny_unknown_fields)]
pub struct NetworkSpec {
    pub name: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub bridge: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub netmask: String,
    #[serde(default)]
    pub gateway: String,
}
