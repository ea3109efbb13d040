use std::collections::{BTreeMap, BTreeSet};
use std::env;
use std::sync::mpsc::channel;
use std::sync::{Arc, RwLock};

use serde_json::Value;
use threadpool::ThreadPool;

use crate::entities::{Cluster, Product};
use crate::flatten;
use crate::kvstore::{is_key_not_found, Consul, KvStore};
use crate::template::{self, RenderContext, TemplateType};
use crate::Result;

/// Top of the tree holding product blueprints
pub const PRODUCTS_PREFIX: &str = "products";
/// Top of the tree holding materialised clusters
pub const CLUSTERS_PREFIX: &str = "clusters";
/// Endpoint used when `REGISTRY_URL` is unset and `connect` was never called
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:8500/v1/kv";

// Workers dispatching the bulk write of a freshly rendered instance.
const WRITE_POOL_SIZE: usize = 8;

/// A product blueprint ready to be stored
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
pub struct ProductSpec {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Template text, rendered at instantiation time
    pub template: String,
    #[serde(default)]
    pub templatetype: TemplateType,
    /// JSON text holding the option schema
    pub options: String,
    /// Lifecycle script content, stored verbatim
    #[serde(default)]
    pub orquestrator: String,
}

/// Handle to one registry, bound to a single KV backend
#[derive(Clone)]
pub struct Registry {
    kv: Arc<dyn KvStore>,
}

impl Registry {
    /// Open a registry against an explicit endpoint
    pub fn connect(endpoint: &str) -> Result<Registry> {
        Ok(Registry {
            kv: Arc::new(Consul::new(endpoint)?),
        })
    }

    /// Open a registry against `REGISTRY_URL`, or the default endpoint
    pub fn from_env() -> Result<Registry> {
        let endpoint = env::var("REGISTRY_URL").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        Registry::connect(&endpoint)
    }

    /// Wrap an already constructed store
    pub fn with_store(kv: Arc<dyn KvStore>) -> Registry {
        Registry { kv }
    }

    /// Store a product blueprint under `products/<name>/<version>`
    pub fn register(&self, spec: &ProductSpec) -> Result<Product> {
        let dn = format!("{}/{}/{}", PRODUCTS_PREFIX, spec.name, spec.version);
        debug!("registering product {}", dn);
        self.kv.set(&format!("{}/name", dn), &spec.name)?;
        self.kv.set(&format!("{}/version", dn), &spec.version)?;
        self.kv.set(&format!("{}/description", dn), &spec.description)?;
        self.kv.set(&format!("{}/template", dn), &spec.template)?;
        self.kv.set(&format!("{}/templatetype", dn), spec.templatetype.as_str())?;
        self.kv.set(&format!("{}/options", dn), &spec.options)?;
        self.kv.set(&format!("{}/orquestrator", dn), &spec.orquestrator)?;
        Ok(Product::new(self.kv.clone(), &dn))
    }

    /// Drop a product and everything stored under it
    pub fn deregister(&self, name: &str, version: &str) -> Result<()> {
        self.kv.delete(&format!("{}/{}/{}", PRODUCTS_PREFIX, name, version), true)
    }

    /// Wrap a product DN; performs no I/O
    pub fn get_product(&self, name: &str, version: &str) -> Product {
        Product::new(
            self.kv.clone(),
            &format!("{}/{}/{}", PRODUCTS_PREFIX, name, version),
        )
    }

    /// Wrap an explicit product DN
    pub fn get_product_dn(&self, dn: &str) -> Product {
        Product::new(self.kv.clone(), dn)
    }

    /// Wrap a cluster position; performs no I/O
    pub fn get_cluster(&self, user: &str, product: &str, version: &str, id: u64) -> Cluster {
        Cluster::new(
            self.kv.clone(),
            &format!("{}/{}/{}/{}/{}", CLUSTERS_PREFIX, user, product, version, id),
        )
    }

    /// Wrap an explicit cluster DN
    pub fn get_cluster_dn(&self, dn: &str) -> Cluster {
        Cluster::new(self.kv.clone(), dn)
    }

    /// Materialise a cluster of `product`/`version` for `user`
    ///
    /// Validates the supplied options against the product's schema, merges
    /// the schema defaults, renders and parses the template, and writes the
    /// flattened document below a freshly allocated instance DN. Nothing is
    /// written before validation passes; an interrupted call can leave a
    /// partial subtree behind, which `deinstantiate` cleans up.
    pub fn instantiate(
        &self,
        user: &str,
        product: &str,
        version: &str,
        options: &BTreeMap<String, Value>,
    ) -> Result<Cluster> {
        let blueprint = self.get_product(product, version);
        let schema = blueprint.option_schema()?;
        schema.validate(options)?;
        let merged = schema.merge(options);

        let prefix = format!("{}/{}/{}/{}", CLUSTERS_PREFIX, user, product, version);
        let id = self.next_instance_id(&prefix)?;
        let dn = format!("{}/{}", prefix, id);
        debug!("allocated instance {} under {}", id, prefix);

        let dialect = TemplateType::parse(&blueprint.templatetype()?)?;
        let rendered = template::render(&blueprint.template()?, &RenderContext {
            user,
            product,
            version,
            clusterdn: &dn,
            options: &merged,
        })?;
        debug!("rendered {} bytes for {}", rendered.len(), dn);

        let doc = template::parse_rendered(dialect, &rendered)?;
        let flat = flatten::flatten(&doc, &dn)?;
        self.write_all(flat)?;
        Ok(Cluster::new(self.kv.clone(), &dn))
    }

    /// Tear down a materialised cluster
    pub fn deinstantiate(&self, user: &str, product: &str, version: &str, id: u64) -> Result<()> {
        let dn = format!("{}/{}/{}/{}/{}", CLUSTERS_PREFIX, user, product, version, id);
        self.kv.delete(&dn, true)
    }

    /// Products known to the registry, optionally narrowed by name and version
    pub fn query_products(
        &self,
        product: Option<&str>,
        version: Option<&str>,
    ) -> Result<Vec<Product>> {
        if version.is_some() && product.is_none() {
            bail!("product queries narrow by name before version");
        }
        let mut prefix = PRODUCTS_PREFIX.to_string();
        for segment in product.iter().chain(version.iter()) {
            prefix = format!("{}/{}", prefix, segment);
        }
        Ok(self.query_dns(&prefix, PRODUCTS_PREFIX, 2)?
            .iter()
            .map(|dn| Product::new(self.kv.clone(), dn))
            .collect())
    }

    /// Clusters known to the registry, optionally narrowed by user, product
    /// and version, in that order
    pub fn query_clusters(
        &self,
        user: Option<&str>,
        product: Option<&str>,
        version: Option<&str>,
    ) -> Result<Vec<Cluster>> {
        if (product.is_some() && user.is_none()) || (version.is_some() && product.is_none()) {
            bail!("cluster queries narrow in order: user, product, version");
        }
        let mut prefix = CLUSTERS_PREFIX.to_string();
        for segment in user.iter().chain(product.iter()).chain(version.iter()) {
            prefix = format!("{}/{}", prefix, segment);
        }
        Ok(self.query_dns(&prefix, CLUSTERS_PREFIX, 4)?
            .iter()
            .map(|dn| Cluster::new(self.kv.clone(), dn))
            .collect())
    }

    /// DNs found by walking `prefix`, truncated to `depth` segments below `top`
    ///
    /// A missing prefix is an empty result, not an error; keys too shallow to
    /// carry a full DN are skipped.
    fn query_dns(&self, prefix: &str, top: &str, depth: usize) -> Result<Vec<String>> {
        let subtree = match self.kv.recurse(prefix) {
            Ok(subtree) => subtree,
            Err(e) => {
                if is_key_not_found(&e) {
                    return Ok(vec![]);
                }
                return Err(e);
            }
        };
        let below_top = format!("{}/", top);
        let mut dns = BTreeSet::new();
        for key in subtree.keys() {
            let rest = match key.strip_prefix(&below_top) {
                Some(rest) => rest,
                None => continue,
            };
            let segments: Vec<&str> = rest.split('/').collect();
            if segments.len() < depth {
                continue;
            }
            dns.insert(format!("{}/{}", top, segments[..depth].join("/")));
        }
        Ok(dns.into_iter().collect())
    }

    /// Next free id under an instance prefix
    ///
    /// Read-then-compute: concurrent instantiations of the same prefix can
    /// race, and callers needing unique ids must serialise externally.
    fn next_instance_id(&self, prefix: &str) -> Result<u64> {
        let existing = match self.kv.recurse(prefix) {
            Ok(subtree) => subtree,
            Err(e) => {
                if is_key_not_found(&e) {
                    return Ok(1);
                }
                return Err(e);
            }
        };
        let max = existing.keys()
            .filter_map(|key| instance_id_of(key, prefix))
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    /// Write every pair through a bounded worker pool
    ///
    /// Writes are independent and unordered; the call returns once all of
    /// them finished and fails if any failed. Keys already written stay
    /// written.
    fn write_all(&self, pairs: BTreeMap<String, String>) -> Result<()> {
        let total = pairs.len();
        let pool = ThreadPool::new(WRITE_POOL_SIZE);
        let (tx, rx) = channel();
        for (key, value) in pairs {
            let tx = tx.clone();
            let kv = self.kv.clone();
            pool.execute(move || {
                let outcome = kv.set(&key, &value)
                    .map_err(|e| format_err!("write of '{}' failed: {}", key, e));
                let _ = tx.send(outcome);
            });
        }
        drop(tx);

        let mut first_failure = None;
        for outcome in rx.iter().take(total) {
            if let Err(e) = outcome {
                first_failure.get_or_insert(e);
            }
        }
        debug!("bulk write of {} keys done", total);
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Instance id of a key below `prefix`; non numeric segments count as zero
fn instance_id_of(key: &str, prefix: &str) -> Option<u64> {
    let rest = key.strip_prefix(prefix)?.trim_start_matches('/');
    let first = rest.split('/').next()?;
    Some(first.parse().unwrap_or(0))
}

lazy_static! {
    static ref DEFAULT_REGISTRY: RwLock<Option<Registry>> = RwLock::new(None);
}

/// Rebind the process wide registry to a new endpoint
///
/// Only the shared KV client is replaced; explicit `Registry` handles and
/// entities callers already hold keep their original binding.
pub fn connect(endpoint: &str) -> Result<()> {
    let registry = Registry::connect(endpoint)?;
    let mut slot = DEFAULT_REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    *slot = Some(registry);
    Ok(())
}

/// The process wide registry, created from the environment on first use
pub fn global() -> Result<Registry> {
    {
        let slot = DEFAULT_REGISTRY.read().unwrap_or_else(|e| e.into_inner());
        if let Some(registry) = slot.as_ref() {
            return Ok(registry.clone());
        }
    }
    let registry = Registry::from_env()?;
    let mut slot = DEFAULT_REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    Ok(slot.get_or_insert(registry).clone())
}

/// `Registry::register` on the process wide registry
pub fn register(spec: &ProductSpec) -> Result<Product> {
    global()?.register(spec)
}

/// `Registry::deregister` on the process wide registry
pub fn deregister(name: &str, version: &str) -> Result<()> {
    global()?.deregister(name, version)
}

/// `Registry::instantiate` on the process wide registry
pub fn instantiate(
    user: &str,
    product: &str,
    version: &str,
    options: &BTreeMap<String, Value>,
) -> Result<Cluster> {
    global()?.instantiate(user, product, version, options)
}

/// `Registry::deinstantiate` on the process wide registry
pub fn deinstantiate(user: &str, product: &str, version: &str, id: u64) -> Result<()> {
    global()?.deinstantiate(user, product, version, id)
}

/// `Registry::get_product` on the process wide registry
pub fn get_product(name: &str, version: &str) -> Result<Product> {
    Ok(global()?.get_product(name, version))
}

/// `Registry::get_cluster` on the process wide registry
pub fn get_cluster(user: &str, product: &str, version: &str, id: u64) -> Result<Cluster> {
    Ok(global()?.get_cluster(user, product, version, id))
}

/// `Registry::query_products` on the process wide registry
pub fn query_products(product: Option<&str>, version: Option<&str>) -> Result<Vec<Product>> {
    global()?.query_products(product, version)
}

/// `Registry::query_clusters` on the process wide registry
pub fn query_clusters(
    user: Option<&str>,
    product: Option<&str>,
    version: Option<&str>,
) -> Result<Vec<Cluster>> {
    global()?.query_clusters(user, product, version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Entity;
    use crate::kvstore::MemStore;
    use crate::template::TemplateErrKind;
    use serde_json::json;

    const TEMPLATE: &str = r#"
{
    "instance_name": "{{ user }}-{{ product }}-{{ version }}",
    "status": "registered",
    "nodes": {
        {%- set nslaves = opts["slaves.number"] %}
        {%- for i in range(end=2) %}
        "master{{ i }}": {
            "name": "master{{ i }}",
            "status": "pending",
            "cpu": {{ opts["masters.cpu"] }},
            "mem": 4096,
            "services": ["yarn"]
        },
        {%- endfor %}
        {%- for i in range(end=nslaves) %}
        "slave{{ i }}": {
            "name": "slave{{ i }}",
            "status": "pending",
            "cpu": {{ opts["slaves.cpu"] }},
            "mem": 2048,
            "services": ["datanode"]
        }{% if not loop.last %},{% endif %}
        {%- endfor %}
    },
    "services": {
        "yarn": {
            "name": "yarn",
            "status": "pending",
            "nodes": ["master0", "master1"]
        },
        "datanode": {
            "name": "datanode",
            "status": "pending",
            "nodes": ["slave0", "slave1"]
        }
    }
}
"#;

    const OPTIONS: &str = r#"{
        "required": {"slaves.number": 4},
        "optional": {"slaves.cpu": 2, "masters.cpu": 4},
        "advanced": {},
        "descriptions": {"slaves.number": "number of slave nodes"}
    }"#;

    fn sample_spec() -> ProductSpec {
        ProductSpec {
            name: "cdh".to_string(),
            version: "5.7.0".to_string(),
            description: "hadoop distribution".to_string(),
            template: TEMPLATE.to_string(),
            templatetype: TemplateType::JsonJinja2,
            options: OPTIONS.to_string(),
            orquestrator: "#!/bin/sh\nexit 0\n".to_string(),
        }
    }

    fn registry() -> (Arc<MemStore>, Registry) {
        let kv = Arc::new(MemStore::new());
        let registry = Registry::with_store(kv.clone());
        (kv, registry)
    }

    fn opts(n: u64) -> BTreeMap<String, Value> {
        let mut m = BTreeMap::new();
        m.insert("slaves.number".to_string(), json!(n));
        m
    }

    #[test]
    fn register_stores_every_blueprint_attribute() {
        let (kv, registry) = registry();
        registry.register(&sample_spec()).unwrap();

        assert_eq!(kv.get("products/cdh/5.7.0/name").unwrap(), "cdh");
        assert_eq!(kv.get("products/cdh/5.7.0/version").unwrap(), "5.7.0");
        assert_eq!(kv.get("products/cdh/5.7.0/templatetype").unwrap(), "json+jinja2");
        assert_eq!(kv.get("products/cdh/5.7.0/options").unwrap(), OPTIONS);
        assert_eq!(kv.get("products/cdh/5.7.0/template").unwrap(), TEMPLATE);
    }

    #[test]
    fn deregister_drops_the_whole_blueprint() {
        let (kv, registry) = registry();
        registry.register(&sample_spec()).unwrap();
        registry.deregister("cdh", "5.7.0").unwrap();
        assert!(kv.recurse("products/cdh").is_err());
    }

    #[test]
    fn instantiate_materialises_nodes_and_services() {
        let (_kv, registry) = registry();
        registry.register(&sample_spec()).unwrap();

        let cluster = registry.instantiate("jlopez", "cdh", "5.7.0", &opts(2)).unwrap();
        assert_eq!(cluster.dn(), "clusters/jlopez/cdh/5.7.0/1");
        assert_eq!(cluster.get("instance_name").unwrap(), "jlopez-cdh-5.7.0");
        assert_eq!(cluster.get("status").unwrap(), "registered");

        let nodes = cluster.nodes().unwrap();
        assert_eq!(nodes.len(), 4);
        let services = cluster.services().unwrap();
        assert_eq!(services.len(), 2);

        // defaults from the optional section made it into the render
        assert_eq!(nodes[0].get("cpu").unwrap(), "4");
        assert_eq!(nodes[2].get("cpu").unwrap(), "2");

        // membership back-pointers dereference both ways
        let master0 = &nodes[0];
        let member_of: Vec<String> = master0.services().unwrap()
            .iter()
            .map(|s| s.dn().to_string())
            .collect();
        assert_eq!(member_of, vec!["clusters/jlopez/cdh/5.7.0/1/services/yarn"]);
        let yarn = registry
            .get_cluster_dn("clusters/jlopez/cdh/5.7.0/1")
            .services().unwrap()
            .into_iter()
            .find(|s| s.dn().ends_with("/yarn"))
            .unwrap();
        assert_eq!(yarn.nodes().unwrap().len(), 2);
    }

    #[test]
    fn instantiate_accepts_yaml_templates() {
        let (_kv, registry) = registry();
        let mut spec = sample_spec();
        spec.template = "\
instance_name: \"{{ user }}-{{ product }}\"
status: registered
nodes:
{%- for i in range(end=2) %}
  master{{ i }}:
    name: master{{ i }}
    status: pending
    services: [\"yarn\"]
{%- endfor %}
services:
  yarn:
    name: yarn
    status: pending
    nodes: [\"master0\", \"master1\"]
"
        .to_string();
        spec.templatetype = TemplateType::YamlJinja2;
        registry.register(&spec).unwrap();

        let cluster = registry.instantiate("u", "cdh", "5.7.0", &opts(1)).unwrap();
        assert_eq!(cluster.nodes().unwrap().len(), 2);
        assert_eq!(cluster.services().unwrap().len(), 1);
    }

    #[test]
    fn missing_required_options_write_nothing() {
        let (kv, registry) = registry();
        registry.register(&sample_spec()).unwrap();
        let before = kv.dump();

        let err = registry
            .instantiate("jlopez", "cdh", "5.7.0", &BTreeMap::new())
            .unwrap_err();
        match err.downcast_ref::<TemplateErrKind>() {
            Some(TemplateErrKind::MissingRequiredOption(names)) => {
                assert_eq!(names, "slaves.number")
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(kv.dump(), before);
    }

    #[test]
    fn instance_ids_grow_monotonically() {
        let (_kv, registry) = registry();
        registry.register(&sample_spec()).unwrap();

        for expected in 1..=3 {
            let cluster = registry.instantiate("jlopez", "cdh", "5.7.0", &opts(2)).unwrap();
            assert_eq!(
                cluster.dn(),
                format!("clusters/jlopez/cdh/5.7.0/{}", expected)
            );
        }
    }

    #[test]
    fn deinstantiate_clears_the_subtree() {
        let (kv, registry) = registry();
        registry.register(&sample_spec()).unwrap();
        registry.instantiate("jlopez", "cdh", "5.7.0", &opts(1)).unwrap();

        registry.deinstantiate("jlopez", "cdh", "5.7.0", 1).unwrap();
        assert!(kv.recurse("clusters/jlopez").is_err());
        // the next allocation starts over
        let cluster = registry.instantiate("jlopez", "cdh", "5.7.0", &opts(1)).unwrap();
        assert_eq!(cluster.dn(), "clusters/jlopez/cdh/5.7.0/1");
    }

    #[test]
    fn parse_instance_ids_below_a_prefix() {
        let key = "clusters/jlopez/cdh/5.7.0/99/nodes/master0/status";
        let prefix = "clusters/jlopez/cdh/5.7.0";
        assert_eq!(instance_id_of(key, prefix), Some(99));
        // stray non numeric siblings count as zero instead of failing
        assert_eq!(instance_id_of("clusters/jlopez/cdh/5.7.0/junk/x", prefix), Some(0));
    }

    #[test]
    fn queries_narrow_hierarchically() {
        let (_kv, registry) = registry();
        registry.register(&sample_spec()).unwrap();
        let mut other = sample_spec();
        other.name = "mpi".to_string();
        other.version = "1.0.0".to_string();
        registry.register(&other).unwrap();

        registry.instantiate("jlopez", "cdh", "5.7.0", &opts(1)).unwrap();
        registry.instantiate("jlopez", "cdh", "5.7.0", &opts(1)).unwrap();
        registry.instantiate("aurora", "cdh", "5.7.0", &opts(1)).unwrap();

        let products = registry.query_products(None, None).unwrap();
        let dns: Vec<&str> = products.iter().map(|p| p.dn()).collect();
        assert_eq!(dns, vec!["products/cdh/5.7.0", "products/mpi/1.0.0"]);

        let all = registry.query_clusters(None, None, None).unwrap();
        assert_eq!(all.len(), 3);
        let mine = registry.query_clusters(Some("jlopez"), None, None).unwrap();
        assert_eq!(mine.len(), 2);
        let narrowed = registry
            .query_clusters(Some("aurora"), Some("cdh"), Some("5.7.0"))
            .unwrap();
        assert_eq!(narrowed[0].dn(), "clusters/aurora/cdh/5.7.0/1");

        // holes in the narrowing order are refused
        assert!(registry.query_clusters(None, Some("cdh"), None).is_err());
        assert!(registry.query_products(None, Some("5.7.0")).is_err());
    }

    #[test]
    fn queries_on_an_empty_registry_return_nothing() {
        let (_kv, registry) = registry();
        assert!(registry.query_clusters(Some("nobody"), None, None).unwrap().is_empty());
        assert!(registry.query_products(None, None).unwrap().is_empty());
    }

    #[test]
    fn unknown_template_formats_abort_instantiation() {
        let (kv, registry) = registry();
        registry.register(&sample_spec()).unwrap();
        kv.set("products/cdh/5.7.0/templatetype", "ini+jinja2").unwrap();

        let err = registry.instantiate("u", "cdh", "5.7.0", &opts(1)).unwrap_err();
        match err.downcast_ref::<TemplateErrKind>() {
            Some(TemplateErrKind::UnsupportedTemplateFormat(f)) => assert_eq!(f, "ini+jinja2"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
