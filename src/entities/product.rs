use std::sync::Arc;

use crate::entities::Entity;
use crate::kvstore::KvStore;
use crate::template::OptionSchema;
use crate::Result;

/// Lazy view over a registered product blueprint
///
/// `name` and `version` mirror the DN segments the product was registered
/// under, so they refuse writes.
#[derive(Clone)]
pub struct Product {
    dn: String,
    kv: Arc<dyn KvStore>,
}

dn_entity!(Product,
           fields: ["name", "version", "description", "template", "templatetype",
                    "options", "orquestrator"],
           read_only: ["name", "version"]);

impl Product {
    pub fn name(&self) -> Result<String> {
        self.get("name")
    }

    pub fn version(&self) -> Result<String> {
        self.get("version")
    }

    pub fn description(&self) -> Result<String> {
        self.get("description")
    }

    /// The template text, rendered at instantiation time
    pub fn template(&self) -> Result<String> {
        self.get("template")
    }

    /// The declared template dialect, e.g. `json+jinja2`
    pub fn templatetype(&self) -> Result<String> {
        self.get("templatetype")
    }

    /// The raw option schema JSON
    pub fn options(&self) -> Result<String> {
        self.get("options")
    }

    /// Lifecycle script content, stored verbatim
    pub fn orquestrator(&self) -> Result<String> {
        self.get("orquestrator")
    }

    /// Parse the stored option schema
    pub fn option_schema(&self) -> Result<OptionSchema> {
        OptionSchema::parse(&self.options()?)
    }
}
