//! Tests for the generic REST modules, the info modules and the registry.

mod common;

use azcollection::azure::HttpMethod;
use azcollection::modules::{ModuleError, ModuleRegistry};
use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn test_registry_lists_every_module() {
    let registry = ModuleRegistry::with_builtins();
    assert_eq!(
        registry.names(),
        vec![
            "azure_rm_availabilityset",
            "azure_rm_containerregistry",
            "azure_rm_publicipaddress",
            "azure_rm_resource",
            "azure_rm_resource_info",
            "azure_rm_resourcegroup",
            "azure_rm_resourcegroup_info",
            "azure_rm_sqlserver",
            "azure_rm_storageshare",
            "azure_rm_virtualnetwork",
        ]
    );
}

#[tokio::test]
async fn test_unknown_module() {
    let fake = FakeArm::new();
    let err = run("azure_rm_nothing", json!({}), &context(&fake))
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::NotFound(_)));
}

#[tokio::test]
async fn test_missing_required_parameter_sends_nothing() {
    let fake = FakeArm::new();
    let err = run("azure_rm_storageshare", json!({"name": "data"}), &context(&fake))
        .await
        .unwrap_err();
    assert!(matches!(err, ModuleError::MissingParameter(_)));
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn test_invocation_masks_secrets() {
    let fake = FakeArm::new();
    let output = run(
        "azure_rm_resourcegroup",
        json!({"name": "foo", "location": "eastus", "secret": "hunter2"}),
        &context(&fake),
    )
    .await
    .unwrap();
    let invocation = output.invocation.unwrap().to_string();
    assert!(!invocation.contains("hunter2"));
    assert!(invocation.contains("\"name\":\"foo\""));
}

fn vnet_path() -> String {
    resource_id("rg", "Microsoft.Network", "virtualNetworks", "vnet")
}

#[tokio::test]
async fn test_resource_put_sends_body() {
    let fake = FakeArm::new();
    let output = run(
        "azure_rm_resource",
        json!({
            "resource_group": "rg",
            "provider": "network",
            "resource_type": "virtualNetworks",
            "resource_name": "vnet",
            "api_version": "2023-05-01",
            "body": {"location": "eastus"}
        }),
        &context(&fake),
    )
    .await
    .unwrap();

    assert!(output.changed);
    let puts = fake.calls_with(HttpMethod::Put);
    assert_eq!(puts.len(), 1);
    // short provider names gain the Microsoft. prefix
    assert!(puts[0].path.ends_with("/providers/Microsoft.network/virtualNetworks/vnet"));
    assert_eq!(output.data["response"]["location"], "eastus");
}

#[tokio::test]
async fn test_resource_idempotent_put_skipped_when_subset() {
    let fake = FakeArm::new();
    fake.seed_resource(
        &vnet_path(),
        json!({"location": "eastus", "properties": {"addressSpace": {"addressPrefixes": ["10.0.0.0/16"]}}}),
    );

    let output = run(
        "azure_rm_resource",
        json!({
            "url": "/subscriptions/{{ subscription_id }}/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet",
            "api_version": "2023-05-01",
            "idempotency": true,
            "body": {"location": "eastus"}
        }),
        &context(&fake),
    )
    .await
    .unwrap();

    assert!(!output.changed);
    assert_eq!(fake.mutating_calls(), 0);
    assert_eq!(
        output.data["response"]["properties"]["addressSpace"]["addressPrefixes"][0],
        "10.0.0.0/16"
    );
}

#[tokio::test]
async fn test_resource_merge_keeps_existing_fields() {
    let fake = FakeArm::new();
    fake.seed_resource(
        &vnet_path(),
        json!({"location": "eastus", "properties": {"enableDdosProtection": false}}),
    );

    let output = run(
        "azure_rm_resource",
        json!({
            "resource_group": "rg",
            "provider": "Microsoft.Network",
            "resource_type": "virtualNetworks",
            "resource_name": "vnet",
            "api_version": "2023-05-01",
            "method": "MERGE",
            "body": {"tags": {"env": "dev"}}
        }),
        &context(&fake),
    )
    .await
    .unwrap();

    assert!(output.changed);
    let puts = fake.calls_with(HttpMethod::Put);
    let sent = puts[0].body.clone().unwrap();
    assert_eq!(sent["location"], "eastus");
    assert_eq!(sent["properties"]["enableDdosProtection"], false);
    assert_eq!(sent["tags"], json!({"env": "dev"}));
}

#[tokio::test]
async fn test_resource_absent_deletes() {
    let fake = FakeArm::new();
    fake.seed_resource(&vnet_path(), json!({"location": "eastus"}));

    let output = run(
        "azure_rm_resource",
        json!({
            "resource_group": "rg",
            "provider": "network",
            "resource_type": "virtualNetworks",
            "resource_name": "vnet",
            "api_version": "2023-05-01",
            "state": "absent"
        }),
        &context(&fake),
    )
    .await
    .unwrap();

    assert!(output.changed);
    assert_eq!(output.data["response"], json!(null));
    assert!(fake.resource(&vnet_path()).is_none());
}

#[tokio::test]
async fn test_resource_idempotent_delete_of_missing_resource() {
    let fake = FakeArm::new();
    let output = run(
        "azure_rm_resource",
        json!({
            "resource_group": "rg",
            "provider": "network",
            "resource_type": "virtualNetworks",
            "resource_name": "vnet",
            "api_version": "2023-05-01",
            "state": "absent",
            "idempotency": true
        }),
        &context(&fake),
    )
    .await
    .unwrap();

    assert!(!output.changed);
    assert_eq!(fake.mutating_calls(), 0);
}

#[tokio::test]
async fn test_resource_delete_of_missing_resource_is_a_no_op() {
    let fake = FakeArm::new();
    let ctx = context(&fake);
    let args = json!({
        "resource_group": "rg",
        "provider": "network",
        "resource_type": "virtualNetworks",
        "resource_name": "vnet",
        "api_version": "2023-05-01",
        "state": "absent"
    });

    for _ in 0..2 {
        let output = run("azure_rm_resource", args.clone(), &ctx).await.unwrap();
        assert!(!output.changed);
        assert_eq!(output.data["response"], json!(null));
    }
    assert_eq!(fake.calls_with(HttpMethod::Delete).len(), 2);
}

#[tokio::test]
async fn test_resource_accepts_listed_error_status() {
    let fake = FakeArm::new();
    let output = run(
        "azure_rm_resource",
        json!({
            "resource_group": "rg",
            "provider": "network",
            "resource_type": "virtualNetworks",
            "resource_name": "vnet",
            "api_version": "2023-05-01",
            "method": "GET",
            "status_code": [200, 404]
        }),
        &context(&fake),
    )
    .await
    .unwrap();

    assert!(!output.changed);
    assert_eq!(output.data["response"], json!(null));
}

#[tokio::test]
async fn test_resource_unexpected_status_fails() {
    let fake = FakeArm::new();
    let err = run(
        "azure_rm_resource",
        json!({
            "resource_group": "rg",
            "provider": "network",
            "resource_type": "virtualNetworks",
            "resource_name": "vnet",
            "api_version": "2023-05-01",
            "method": "GET"
        }),
        &context(&fake),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_resource_check_mode_sends_nothing() {
    let fake = FakeArm::new();
    let output = run(
        "azure_rm_resource",
        json!({
            "resource_group": "rg",
            "provider": "network",
            "resource_type": "virtualNetworks",
            "resource_name": "vnet",
            "api_version": "2023-05-01",
            "body": {"location": "eastus"}
        }),
        &context(&fake).with_check_mode(true),
    )
    .await
    .unwrap();

    assert!(output.changed);
    assert_eq!(output.data["response"], json!({"location": "eastus"}));
    assert_eq!(fake.mutating_calls(), 0);
}

#[tokio::test]
async fn test_resource_url_and_provider_are_exclusive() {
    let fake = FakeArm::new();
    let err = run(
        "azure_rm_resource",
        json!({"url": "/subscriptions/x", "provider": "compute", "api_version": "2023-01-01"}),
        &context(&fake),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ModuleError::InvalidParameter(_)));
}

#[tokio::test]
async fn test_resource_info_follows_next_link() {
    let fake = FakeArm::new();
    let base = format!("/subscriptions/{}/providers/Microsoft.Web/sites", SUBSCRIPTION);
    let page2 = format!("https://management.azure.com{}?$skiptoken=2", base);
    fake.seed(&base, json!({"value": [{"name": "a"}, {"name": "b"}], "nextLink": page2}));
    fake.seed(&page2, json!({"value": [{"name": "c"}]}));

    let output = run(
        "azure_rm_resource_info",
        json!({"provider": "web", "resource_type": "sites", "api_version": "2022-03-01"}),
        &context(&fake),
    )
    .await
    .unwrap();

    assert!(!output.changed);
    let names: Vec<&str> = output.data["response"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_resource_info_single_and_missing() {
    let fake = FakeArm::new();
    fake.seed_resource(&vnet_path(), json!({"location": "eastus"}));
    let ctx = context(&fake);
    let args = |name: &str| {
        json!({
            "resource_group": "rg",
            "provider": "network",
            "resource_type": "virtualNetworks",
            "resource_name": name,
            "api_version": "2023-05-01"
        })
    };

    let found = run("azure_rm_resource_info", args("vnet"), &ctx).await.unwrap();
    assert_eq!(found.data["response"].as_array().unwrap().len(), 1);
    assert_eq!(found.data["response"][0]["name"], "vnet");

    let missing = run("azure_rm_resource_info", args("nope"), &ctx).await.unwrap();
    assert_eq!(missing.data["response"], json!([]));
}

fn seed_groups(fake: &FakeArm) {
    fake.seed_resource(
        &group_id("web"),
        json!({"location": "eastus", "tags": {"env": "prod", "team": "web"}}),
    );
    fake.seed_resource(
        &group_id("data"),
        json!({"location": "westus", "tags": {"env": "dev"}}),
    );
    fake.seed_resource(
        &resource_id("web", "Microsoft.Web", "sites", "site1"),
        json!({"location": "eastus"}),
    );
}

#[tokio::test]
async fn test_resourcegroup_info_lists_all() {
    let fake = FakeArm::new();
    seed_groups(&fake);

    let output = run("azure_rm_resourcegroup_info", json!({}), &context(&fake))
        .await
        .unwrap();

    assert!(!output.changed);
    assert_eq!(output.msg, "Found 2 resource group(s)");
    assert_eq!(output.data["resourcegroups"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_resourcegroup_info_tag_filters() {
    let fake = FakeArm::new();
    seed_groups(&fake);
    let ctx = context(&fake);

    let prod = run("azure_rm_resourcegroup_info", json!({"tags": ["env:prod"]}), &ctx)
        .await
        .unwrap();
    let groups = prod.data["resourcegroups"].as_array().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["name"], "web");

    let with_env = run("azure_rm_resourcegroup_info", json!({"tags": ["env"]}), &ctx)
        .await
        .unwrap();
    assert_eq!(with_env.data["resourcegroups"].as_array().unwrap().len(), 2);

    let both = run(
        "azure_rm_resourcegroup_info",
        json!({"tags": ["env", "team:data"]}),
        &ctx,
    )
    .await
    .unwrap();
    assert_eq!(both.data["resourcegroups"], json!([]));
}

#[tokio::test]
async fn test_resourcegroup_info_by_name_with_resources() {
    let fake = FakeArm::new();
    seed_groups(&fake);

    let output = run(
        "azure_rm_resourcegroup_info",
        json!({"name": "web", "list_resources": true}),
        &context(&fake),
    )
    .await
    .unwrap();

    let groups = output.data["resourcegroups"].as_array().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["location"], "eastus");
    assert_eq!(groups[0]["resources"][0]["name"], "site1");
}

#[tokio::test]
async fn test_resourcegroup_info_missing_name_is_empty() {
    let fake = FakeArm::new();
    let output = run(
        "azure_rm_resourcegroup_info",
        json!({"name": "ghost"}),
        &context(&fake),
    )
    .await
    .unwrap();
    assert_eq!(output.data["resourcegroups"], json!([]));
}

#[tokio::test]
async fn test_public_ip_standard_defaults_to_static() {
    let fake = FakeArm::new();
    let output = run(
        "azure_rm_publicipaddress",
        json!({"resource_group": "rg", "name": "pip", "location": "eastus", "sku": "Standard"}),
        &context(&fake),
    )
    .await
    .unwrap();

    assert!(output.changed);
    let puts = fake.calls_with(HttpMethod::Put);
    let body = puts[0].body.clone().unwrap();
    assert_eq!(body["properties"]["publicIPAllocationMethod"], "Static");
    assert_eq!(body["properties"]["publicIPAddressVersion"], "IPv4");
}

#[tokio::test]
async fn test_container_registry_sku_update_is_patch() {
    let fake = FakeArm::new();
    let id = resource_id("rg", "Microsoft.ContainerRegistry", "registries", "acr1");
    fake.seed_resource(
        &id,
        json!({"location": "eastus", "sku": {"name": "Basic"}, "properties": {"adminUserEnabled": false}}),
    );

    let output = run(
        "azure_rm_containerregistry",
        json!({"resource_group": "rg", "name": "acr1", "sku": "Premium"}),
        &context(&fake),
    )
    .await
    .unwrap();

    assert!(output.changed);
    let patches = fake.calls_with(HttpMethod::Patch);
    assert_eq!(patches.len(), 1);
    assert!(patches[0].body.as_ref().unwrap().get("location").is_none());
    assert_eq!(fake.resource(&id).unwrap()["sku"]["name"], "Premium");
}

#[tokio::test]
async fn test_availability_set_domain_counts_are_immutable() {
    let fake = FakeArm::new();
    fake.seed_resource(
        &resource_id("rg", "Microsoft.Compute", "availabilitySets", "avs"),
        json!({
            "location": "eastus",
            "sku": {"name": "Classic"},
            "properties": {"platformUpdateDomainCount": 5, "platformFaultDomainCount": 3}
        }),
    );

    let err = run(
        "azure_rm_availabilityset",
        json!({"resource_group": "rg", "name": "avs", "platform_fault_domain_count": 2}),
        &context(&fake),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ModuleError::ImmutableField { .. }));
    assert_eq!(fake.mutating_calls(), 0);
}
