mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use azinfra_core::provision::image::{IMAGE_BLOB, IMAGE_CONTAINER};
use azinfra_core::provision::network::{SUBNET_ADDRESS_PREFIX, VNET_ADDRESS_PREFIX};
use azinfra_core::{CancellationToken, Error, InfraOutput};
use common::{
    Behaviour, FakeCloud, RHCOS_IMAGE, SUBSCRIPTION, arm_id, options, orchestrator,
    orchestrator_with,
};

#[tokio::test]
async fn test_creates_everything_and_writes_output() {
    let fake = Arc::new(FakeCloud::new());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("infra.yaml");

    let mut opts = options();
    opts.output_file = Some(path.clone());
    let output = orchestrator(&fake).run(&opts).await.unwrap();

    assert_eq!(output.resource_group_name, "foo-bar");
    assert_eq!(output.vnet_name, "foo-bar");
    assert_eq!(output.infra_id, "bar");
    assert_eq!(output.location, "eastus");
    assert_eq!(output.base_domain, "example.com");
    assert_eq!(
        output.vnet_id,
        arm_id("foo-bar", "Microsoft.Network/virtualNetworks", "foo-bar")
    );
    assert_eq!(output.subnet_id, format!("{}/subnets/default", output.vnet_id));
    assert_eq!(
        output.security_group_id,
        arm_id("foo-bar", "Microsoft.Network/networkSecurityGroups", "foo-bar-nsg")
    );
    assert_eq!(
        output.machine_identity_id,
        arm_id(
            "foo-bar",
            "Microsoft.ManagedIdentity/userAssignedIdentities",
            "foo-bar"
        )
    );
    assert_eq!(
        output.private_zone_id,
        arm_id(
            "foo-bar",
            "Microsoft.Network/privateDnsZones",
            "foo-azurecluster.example.com"
        )
    );
    assert_eq!(
        output.public_zone_id,
        arm_id("dns", "Microsoft.Network/dnszones", "example.com")
    );
    assert_eq!(
        output.boot_image_id,
        arm_id("foo-bar", "Microsoft.Compute/images", IMAGE_BLOB)
    );

    let written: InfraOutput =
        serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written, output);

    let state = fake.state();
    assert!(state.called("create_resource_group foo-bar"));
    assert!(state.zone_links.contains_key("foo-bar/foo-azurecluster.example.com/foo-bar"));
    assert!(state.public_ips.contains_key("foo-bar/bar"));
    assert!(state.load_balancers.contains_key("foo-bar/bar"));
    assert_eq!(state.role_assignments.len(), 1);
}

#[tokio::test]
async fn test_steps_run_in_order() {
    let fake = Arc::new(FakeCloud::new());
    orchestrator(&fake).run(&options()).await.unwrap();

    let state = fake.state();
    let position = |prefix: &str| {
        state
            .calls
            .iter()
            .position(|c| c.starts_with(prefix))
            .unwrap_or_else(|| panic!("{prefix} was never called"))
    };
    let order = [
        position("create_resource_group"),
        position("list_zones"),
        position("create_identity"),
        position("create_role_assignment"),
        position("create_security_group"),
        position("create_virtual_network"),
        position("create_private_zone"),
        position("create_zone_link"),
        position("create_public_ip"),
        position("create_load_balancer"),
        position("create_storage_account"),
        position("create_blob_container"),
        position("list_keys"),
        position("copy_blob"),
        position("create_image"),
    ];
    assert!(order.windows(2).all(|w| w[0] < w[1]), "{:?}", state.calls);
}

#[tokio::test]
async fn test_existing_resource_group_is_not_created() {
    let fake = Arc::new(FakeCloud::new());
    fake.seed_resource_group("shared");

    let mut opts = options();
    opts.resource_group_name = Some("shared".to_string());
    let output = orchestrator(&fake).run(&opts).await.unwrap();

    assert_eq!(output.resource_group_name, "shared");
    let state = fake.state();
    assert!(state.called("get_resource_group shared"));
    assert!(!state.called("create_resource_group"));
    assert_eq!(state.resource_groups["shared"].location, "westus");
}

#[tokio::test]
async fn test_missing_named_resource_group_fails() {
    let fake = Arc::new(FakeCloud::new());
    let mut opts = options();
    opts.resource_group_name = Some("missing".to_string());

    let err = orchestrator(&fake).run(&opts).await.unwrap_err();
    assert!(matches!(err, Error::GetResourceGroup { .. }));
    assert!(!fake.state().called("create_resource_group"));
}

#[tokio::test]
async fn test_created_resource_group_carries_tags() {
    let fake = Arc::new(FakeCloud::new());
    let mut opts = options();
    opts.resource_group_tags = BTreeMap::from([
        ("team".to_string(), "hypershift".to_string()),
        ("env".to_string(), "ci".to_string()),
    ]);
    orchestrator(&fake).run(&opts).await.unwrap();

    let state = fake.state();
    let group = &state.resource_groups["foo-bar"];
    assert_eq!(group.location, "eastus");
    assert_eq!(group.tags, opts.resource_group_tags);
}

#[tokio::test]
async fn test_reused_vnet_surfaces_first_subnet_and_security_group() {
    let fake = Arc::new(FakeCloud::new());
    let nsg_id = arm_id("shared", "Microsoft.Network/networkSecurityGroups", "shared-nsg");
    let vnet = fake.seed_virtual_network("shared", "hub", Some(&nsg_id));
    let vnet_id = vnet.id.clone().unwrap();

    let mut opts = options();
    opts.vnet_id = Some(vnet_id.clone());
    let output = orchestrator(&fake).run(&opts).await.unwrap();

    assert_eq!(output.vnet_id, vnet_id);
    assert_eq!(output.vnet_name, "hub");
    assert_eq!(output.subnet_id, format!("{vnet_id}/subnets/nodes"));
    assert_eq!(output.security_group_id, nsg_id);

    let state = fake.state();
    assert!(state.called("get_virtual_network shared/hub"));
    assert!(!state.called("create_virtual_network"));
    assert!(!state.called("create_security_group"));
    // the zone is still linked to the reused network
    let link = &state.zone_links["foo-bar/foo-azurecluster.example.com/foo-bar"];
    assert_eq!(link.properties.virtual_network.id.as_deref(), Some(vnet_id.as_str()));
    assert!(!link.properties.registration_enabled);
}

#[tokio::test]
async fn test_created_vnet_uses_fixed_address_space() {
    let fake = Arc::new(FakeCloud::new());
    orchestrator(&fake).run(&options()).await.unwrap();

    let state = fake.state();
    let vnet = &state.virtual_networks["foo-bar/foo-bar"];
    assert_eq!(vnet.address_prefixes(), [VNET_ADDRESS_PREFIX.to_string()]);
    let subnet = &vnet.subnets()[0];
    assert_eq!(subnet.name.as_deref(), Some("default"));
    assert_eq!(
        subnet.properties.as_ref().unwrap().address_prefix.as_deref(),
        Some(SUBNET_ADDRESS_PREFIX)
    );
    assert_eq!(
        subnet.security_group_id(),
        Some(arm_id("foo-bar", "Microsoft.Network/networkSecurityGroups", "foo-bar-nsg").as_str())
    );
}

#[tokio::test]
async fn test_existing_security_group_is_looked_up() {
    let fake = Arc::new(FakeCloud::new());
    fake.seed_resource_group("shared");
    let nsg_id = fake.seed_security_group("shared", "shared-nsg");

    let mut opts = options();
    opts.resource_group_name = Some("shared".to_string());
    opts.network_security_group = Some("shared-nsg".to_string());
    let output = orchestrator(&fake).run(&opts).await.unwrap();

    assert_eq!(output.security_group_id, nsg_id);
    let state = fake.state();
    assert!(state.called("get_security_group shared/shared-nsg"));
    assert!(!state.called("create_security_group"));
}

#[tokio::test]
async fn test_security_group_without_resource_group_makes_no_calls() {
    let fake = Arc::new(FakeCloud::new());
    let mut opts = options();
    opts.network_security_group = Some("shared-nsg".to_string());

    let err = orchestrator(&fake).run(&opts).await.unwrap_err();
    assert!(matches!(err, Error::InvalidOptions { .. }));
    assert!(fake.state().calls.is_empty());
}

#[tokio::test]
async fn test_vnet_without_subnets_stops_before_dns() {
    let fake = Arc::new(FakeCloud::with(Behaviour {
        strip_subnets: true,
        ..Behaviour::default()
    }));

    let err = orchestrator(&fake).run(&options()).await.unwrap_err();
    assert!(matches!(err, Error::NoSubnets { .. }), "{err}");

    let state = fake.state();
    assert!(state.called("create_virtual_network"));
    assert!(!state.called("create_private_zone"));
    assert!(!state.called("create_public_ip"));
}

#[tokio::test]
async fn test_role_assignment_succeeds_after_transient_failures() {
    let fake = Arc::new(FakeCloud::with(Behaviour {
        reject_role_assignments: 7,
        ..Behaviour::default()
    }));
    orchestrator(&fake).run(&options()).await.unwrap();

    let state = fake.state();
    assert_eq!(state.role_assignment_attempts, 8);
    assert_eq!(state.role_assignments.len(), 1);

    // every attempt reuses the same assignment name
    let names: Vec<_> = state
        .calls
        .iter()
        .filter(|c| c.starts_with("create_role_assignment"))
        .collect();
    assert_eq!(names.len(), 8);
    assert!(names.iter().all(|n| *n == names[0]));

    let assignment = state.role_assignments.values().next().unwrap();
    assert_eq!(assignment.properties.principal_id, "principal-foo-bar");
    assert!(assignment.properties.role_definition_id.ends_with("/b24988ac"));
}

#[tokio::test]
async fn test_role_assignment_gives_up_after_one_hundred_attempts() {
    let fake = Arc::new(FakeCloud::with(Behaviour {
        reject_role_assignments: 100,
        ..Behaviour::default()
    }));

    let err = orchestrator(&fake).run(&options()).await.unwrap_err();
    match err {
        Error::RoleAssignment { attempts, .. } => assert_eq!(attempts, 100),
        other => panic!("unexpected error: {other}"),
    }

    let state = fake.state();
    assert_eq!(state.role_assignment_attempts, 100);
    assert!(!state.called("create_virtual_network"));
    assert!(!state.called("create_security_group"));
}

#[tokio::test]
async fn test_missing_contributor_role() {
    let fake = Arc::new(FakeCloud::with(Behaviour {
        contributor_exists: false,
        ..Behaviour::default()
    }));

    let err = orchestrator(&fake).run(&options()).await.unwrap_err();
    assert!(matches!(err, Error::RoleDefinitionNotFound { .. }));
    assert_eq!(fake.state().role_assignment_attempts, 0);
}

#[tokio::test]
async fn test_base_domain_found_on_later_page() {
    let fake = Arc::new(FakeCloud::with(Behaviour {
        dns_zone_pages: vec![
            vec!["a.org".to_string()],
            vec!["b.org".to_string()],
            vec!["c.org".to_string(), "example.com".to_string()],
        ],
        ..Behaviour::default()
    }));
    let output = orchestrator(&fake).run(&options()).await.unwrap();
    assert!(output.public_zone_id.ends_with("/dnszones/example.com"));
    assert_eq!(
        fake.state()
            .calls
            .iter()
            .filter(|c| c.starts_with("list_zones"))
            .count(),
        3
    );
}

#[tokio::test]
async fn test_unknown_base_domain_fails_before_identity() {
    let fake = Arc::new(FakeCloud::new());
    let mut opts = options();
    opts.base_domain = "nowhere.net".to_string();

    let err = orchestrator(&fake).run(&opts).await.unwrap_err();
    assert!(matches!(err, Error::BaseDomainNotFound { .. }));
    assert!(err.to_string().contains("nowhere.net"));
    assert!(!fake.state().called("create_identity"));
}

#[tokio::test]
async fn test_untrusted_image_makes_no_remote_calls() {
    let fake = Arc::new(FakeCloud::new());
    let mut opts = options();
    opts.rhcos_image = "https://example.com/rhcos.x86_64.vhd".to_string();

    let err = orchestrator(&fake).run(&opts).await.unwrap_err();
    assert!(matches!(err, Error::UntrustedImageSource { .. }));

    let state = fake.state();
    assert!(state.calls.is_empty());
    assert!(state.storage_accounts.is_empty());
}

#[tokio::test]
async fn test_image_pipeline() {
    let fake = Arc::new(FakeCloud::new());
    orchestrator(&fake).run(&options()).await.unwrap();

    let state = fake.state();
    let (account, create) = state.storage_accounts.iter().next().unwrap();
    assert!(account.starts_with("cluster"));
    assert_eq!(account.len(), 12);
    assert_eq!(create.sku.name.as_deref(), Some("Premium_LRS"));
    assert_eq!(create.sku.tier.as_deref(), Some("Standard"));
    assert!(state.containers.contains_key(&format!("{account}/{IMAGE_CONTAINER}")));

    let (destination, source, metadata) = &state.copies[0];
    let expected = format!("https://{account}.blob.core.windows.net/vhd/rhcos.x86_64.vhd");
    assert_eq!(destination, &expected);
    assert_eq!(source, RHCOS_IMAGE);
    assert_eq!(metadata.get("source_uri").map(String::as_str), Some(RHCOS_IMAGE));
    assert!(state.called(&format!("copy_blob {account}")));

    let image = &state.images[&format!("foo-bar/{IMAGE_BLOB}")];
    let props = image.properties.as_ref().unwrap();
    assert_eq!(props.storage_profile.os_disk.blob_uri.as_deref(), Some(expected.as_str()));
    assert_eq!(props.hyper_v_generation.as_deref(), Some("V1"));
}

#[tokio::test]
async fn test_missing_storage_keys() {
    let fake = Arc::new(FakeCloud::with(Behaviour {
        no_storage_keys: true,
        ..Behaviour::default()
    }));
    let err = orchestrator(&fake).run(&options()).await.unwrap_err();
    assert!(matches!(err, Error::NoStorageKeys { .. }));
    assert!(fake.state().copies.is_empty());
}

#[tokio::test]
async fn test_rerun_converges_on_same_resources() {
    let fake = Arc::new(FakeCloud::new());
    let first = orchestrator(&fake).run(&options()).await.unwrap();
    let second = orchestrator(&fake).run(&options()).await.unwrap();

    assert_eq!(first, second);
    let state = fake.state();
    assert_eq!(state.resource_groups.len(), 1);
    assert_eq!(state.identities.len(), 1);
    assert_eq!(state.virtual_networks.len(), 1);
    assert_eq!(state.private_zones.len(), 1);
    assert_eq!(state.load_balancers.len(), 1);
    assert_eq!(state.images.len(), 1);
    assert_eq!(state.role_assignments.len(), 1);
}

#[tokio::test]
async fn test_rerun_accepts_existing_role_assignment() {
    let fake = Arc::new(FakeCloud::new());
    orchestrator(&fake).run(&options()).await.unwrap();
    fake.state().calls.clear();

    orchestrator(&fake).run(&options()).await.unwrap();

    let state = fake.state();
    let attempts = state
        .calls
        .iter()
        .filter(|call| call.starts_with("create_role_assignment "))
        .count();
    assert_eq!(attempts, 1);
    assert_eq!(state.role_assignments.len(), 1);
}

#[tokio::test]
async fn test_cancelled_run_stops_before_first_call() {
    let fake = Arc::new(FakeCloud::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator_with(&fake, cancel)
        .run(&options())
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(fake.state().calls.is_empty());
}

#[tokio::test]
async fn test_subscription_scopes_role_lookup() {
    let fake = Arc::new(FakeCloud::new());
    orchestrator(&fake).run(&options()).await.unwrap();

    let scope = format!("/subscriptions/{SUBSCRIPTION}/resourceGroups/foo-bar");
    assert!(fake.state().called(&format!("list_role_definitions {scope}")));
}
