use std::collections::BTreeMap;
use std::sync::Arc;

use crate::kvstore::{self, KvStore};
use crate::Result;

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum EntityErrKind {
    #[fail(display = "attribute '{}' of '{}' is read only", _0, _1)]
    ReadOnlyAttribute(String, String),
}

/// Shared behaviour of the proxy entities
///
/// An entity is nothing but a DN and a store handle; attribute access goes
/// straight to the store and nothing is cached, so a proxy stays valid (and
/// cheap) whether or not its subtree exists.
pub trait Entity {
    /// The DN of the subtree this entity views
    fn dn(&self) -> &str;

    /// The store attribute access goes through
    fn store(&self) -> &Arc<dyn KvStore>;

    /// Attribute names serialised by `to_map`
    fn fields() -> &'static [&'static str];

    /// Attributes that refuse writes
    fn read_only() -> &'static [&'static str] {
        &[]
    }

    /// Read a scalar attribute
    fn get(&self, name: &str) -> Result<String> {
        self.store().get(&format!("{}/{}", self.dn(), name))
    }

    /// Read a scalar attribute, falling back to a default when absent
    fn get_or(&self, name: &str, default: &str) -> Result<String> {
        match self.get(name) {
            Ok(value) => Ok(value),
            Err(e) => {
                if kvstore::is_key_not_found(&e) {
                    Ok(default.to_string())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Write a scalar attribute
    fn set(&self, name: &str, value: &str) -> Result<()> {
        if Self::read_only().contains(&name) {
            return Err(EntityErrKind::ReadOnlyAttribute(
                name.to_string(),
                self.dn().to_string(),
            ).into());
        }
        self.store().set(&format!("{}/{}", self.dn(), name), value)
    }

    /// Render the fixed attribute set of this entity
    ///
    /// Attributes the backing subtree does not carry come out empty.
    fn to_map(&self) -> Result<BTreeMap<String, String>> {
        let mut map = BTreeMap::new();
        for name in Self::fields() {
            map.insert(name.to_string(), self.get_or(name, "")?);
        }
        Ok(map)
    }
}

// Constructor, DN accessor, DN based identity and the usual formatting for a
// proxy struct with `dn`/`kv` fields.
macro_rules! dn_entity {
    ($t:ident, fields: [$($f:expr),* $(,)?], read_only: [$($r:expr),* $(,)?]) => {
        impl $t {
            /// Wrap a DN; trailing slashes are dropped
            pub fn new(kv: ::std::sync::Arc<dyn $crate::kvstore::KvStore>, dn: &str) -> $t {
                $t { dn: dn.trim_end_matches('/').to_string(), kv }
            }

            /// The DN this proxy points at
            pub fn dn(&self) -> &str {
                &self.dn
            }
        }

        impl $crate::entities::Entity for $t {
            fn dn(&self) -> &str {
                &self.dn
            }

            fn store(&self) -> &::std::sync::Arc<dyn $crate::kvstore::KvStore> {
                &self.kv
            }

            fn fields() -> &'static [&'static str] {
                &[$($f),*]
            }

            fn read_only() -> &'static [&'static str] {
                &[$($r),*]
            }
        }

        impl ::std::fmt::Display for $t {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                f.write_str(&self.dn)
            }
        }

        impl ::std::fmt::Debug for $t {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, concat!(stringify!($t), "({})"), self.dn)
            }
        }

        impl ::std::cmp::PartialEq for $t {
            fn eq(&self, other: &$t) -> bool {
                self.dn == other.dn
            }
        }

        impl ::std::cmp::Eq for $t {}

        impl ::std::cmp::PartialOrd for $t {
            fn partial_cmp(&self, other: &$t) -> Option<::std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl ::std::cmp::Ord for $t {
            fn cmp(&self, other: &$t) -> ::std::cmp::Ordering {
                self.dn.cmp(&other.dn)
            }
        }
    };
}

mod cluster;
mod disk;
mod network;
mod node;
mod product;
mod service;

pub use self::cluster::Cluster;
pub use self::disk::{Disk, DiskSpec};
pub use self::network::{Network, NetworkSpec};
pub use self::node::Node;
pub use self::product::Product;
pub use self::service::Service;
