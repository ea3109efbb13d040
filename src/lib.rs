#![allow(renamed_and_removed_lints)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;

extern crate tera;

#[macro_use]
extern crate log;

extern crate base64;
extern crate regex;
extern crate reqwest;
extern crate threadpool;

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate failure;

pub use failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Path grammar for distinguished names
pub mod paths;

/// A hierarchical key/value store client using `reqwest`
pub mod kvstore;
pub use crate::kvstore::{is_key_not_found, Consul, KvStore, MemStore};

/// Flattening of structured documents into key/value writes
pub mod flatten;

/// Lazy proxy entities over KV subtrees
pub mod entities;
pub use crate::entities::{Cluster, Disk, DiskSpec, Entity, Network, NetworkSpec, Node, Product,
                          Service};

/// Option schemas and a renderer of `tera` templates (jinja style)
pub mod template;
pub use crate::template::{OptionSchema, TemplateType};

/// Top level registry operations
pub mod api;
pub use crate::api::{connect, deinstantiate, deregister, get_cluster, get_product, instantiate,
                     query_clusters, query_products, register, ProductSpec, Registry};
