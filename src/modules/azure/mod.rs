//! Azure Resource Manager modules.
//!
//! Typed modules describe one resource type as a
//! [`ResourceDefinition`](crate::reconcile::ResourceDefinition) and hand it to the
//! reconciler. The generic modules (`azure_rm_resource`, `azure_rm_resource_info`)
//! address any ARM path directly.
//!
//! | Module | Resource |
//! |--------|----------|
//! | `azure_rm_resourcegroup` | Resource groups |
//! | `azure_rm_resourcegroup_info` | Resource group facts |
//! | `azure_rm_availabilityset` | `Microsoft.Compute/availabilitySets` |
//! | `azure_rm_virtualnetwork` | `Microsoft.Network/virtualNetworks` |
//! | `azure_rm_storageshare` | File shares in a storage account |
//! | `azure_rm_sqlserver` | `Microsoft.Sql/servers` |
//! | `azure_rm_containerregistry` | `Microsoft.ContainerRegistry/registries` |
//! | `azure_rm_publicipaddress` | `Microsoft.Network/publicIPAddresses` |
//! | `azure_rm_resource` | Any ARM path, any verb |
//! | `azure_rm_resource_info` | Any ARM path, GET |

mod availabilityset;
mod containerregistry;
mod publicipaddress;
mod resource;
mod resource_info;
mod resourcegroup;
mod resourcegroup_info;
mod sqlserver;
mod storageshare;
mod virtualnetwork;

pub use availabilityset::{AvailabilitySetDefinition, AvailabilitySetModule};
pub use containerregistry::{ContainerRegistryDefinition, ContainerRegistryModule};
pub use publicipaddress::{PublicIpAddressDefinition, PublicIpAddressModule};
pub use resource::{ResourceAddress, ResourceModule};
pub use resource_info::ResourceInfoModule;
pub use resourcegroup::{ResourceGroupDefinition, ResourceGroupModule};
pub use resourcegroup_info::ResourceGroupInfoModule;
pub use sqlserver::{SqlServerDefinition, SqlServerModule};
pub use storageshare::{StorageShareDefinition, StorageShareModule};
pub use virtualnetwork::{VirtualNetworkDefinition, VirtualNetworkModule};

use crate::reconcile::{lookup, prune_nulls};
use serde_json::{json, Map, Value};

/// `id`, `name`, `location` and `tags` of a tracked ARM resource.
fn tracked_state(raw: &Value) -> Map<String, Value> {
    let mut state = Map::new();
    state.insert("id".into(), raw["id"].clone());
    state.insert("name".into(), raw["name"].clone());
    state.insert("location".into(), raw["location"].clone());
    state.insert(
        "tags".into(),
        match raw.get("tags") {
            Some(tags @ Value::Object(_)) => tags.clone(),
            _ => json!({}),
        },
    );
    state
}

/// Copy a dotted path of the raw resource into the state under `key`.
fn copy_field(state: &mut Map<String, Value>, key: &str, raw: &Value, path: &str) {
    state.insert(key.to_string(), lookup(raw, path).clone());
}

/// Finish a normalized state: unset fields are left out.
fn finish(state: Map<String, Value>) -> Value {
    prune_nulls(&Value::Object(state))
}

/// `{"id": ...}` reference, or null.
fn id_ref(id: &Value) -> Value {
    if id.is_null() {
        Value::Null
    } else {
        json!({ "id": id })
    }
}
