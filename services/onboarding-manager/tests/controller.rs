//! Onboarding controller driven by inventory events and full passes.

use std::sync::Arc;
use std::time::Duration;

use onboard_manager::credentials::MemoryCredentials;
use onboard_manager::inventory::{
    EventKind, Host, HostState, Instance, InstanceState, MemoryInventory, OperatingSystem,
    OsProvider, OsType, ResourceRef, WatchEvent,
};
use onboard_manager::orchestrator::workflow_name;
use onboard_manager::reconcilers::StaticArtifactResolver;
use onboard_manager::{build_controller, Collaborators, Config, OnboardingController};
use onboard_tinkerbell::{MemoryStore, ResourceKind};
use tokio::sync::mpsc;
use uuid::Uuid;

fn config() -> Config {
    Config {
        namespace: "orch-infra".to_string(),
        image_version: "v1.0.0".to_string(),
        action_registry: "registry.local/actions".to_string(),
        artifact_base_url: "http://files/repository".to_string(),
        ticker_period: Duration::from_secs(600),
        reconcile_timeout: Duration::from_secs(5),
        parallelism: 1,
        store_timeout: Duration::from_secs(3),
        credentials_timeout: Duration::from_secs(3),
        proxies: Default::default(),
        name_servers: vec![],
        dev_mode: false,
    }
}

async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn start(
    inventory: Arc<MemoryInventory>,
    store: Arc<MemoryStore>,
    events: mpsc::Receiver<WatchEvent>,
) -> OnboardingController {
    build_controller(
        &config(),
        Collaborators {
            inventory,
            store,
            credentials: Arc::new(MemoryCredentials::new()),
            resolver: Arc::new(StaticArtifactResolver::new("http://files/repository")),
        },
        events,
    )
}

async fn seed_instance(inventory: &MemoryInventory, uuid: Uuid) {
    inventory
        .put_host(Host {
            resource_id: "host-c1".to_string(),
            tenant_id: "tenant-1".to_string(),
            uuid,
            pxe_mac: "52:54:00:aa:bb:cc".to_string(),
            bmc_ip: "192.168.1.30".to_string(),
            desired_state: HostState::Onboarded,
            current_state: HostState::Onboarded,
            ..Default::default()
        })
        .await;
    let os = OperatingSystem {
        resource_id: "os-c1".to_string(),
        tenant_id: "tenant-1".to_string(),
        profile_name: "ubuntu".to_string(),
        image_url: "https://cdn/ubuntu.img".to_string(),
        os_type: OsType::Mutable,
        os_provider: OsProvider::Infra,
        version: "22.04".to_string(),
        ..Default::default()
    };
    inventory.put_os(os.clone()).await;
    let host = inventory.host("host-c1").await.unwrap();
    inventory
        .put_instance(Instance {
            resource_id: "inst-c1".to_string(),
            tenant_id: "tenant-1".to_string(),
            host,
            os: Some(os),
            desired_state: InstanceState::Running,
            ..Default::default()
        })
        .await;
}

#[tokio::test]
async fn test_initial_pass_reconciles_existing_resources() {
    let (inventory, _events) = MemoryInventory::new();
    let inventory = Arc::new(inventory);
    let store = Arc::new(MemoryStore::new());
    let uuid = Uuid::from_u128(0xc1);
    seed_instance(&inventory, uuid).await;

    // Events from seeding are not delivered; only the full pass sees them.
    let (_tx, rx) = mpsc::channel(16);
    let controller = start(inventory.clone(), store.clone(), rx);
    controller.start().await.unwrap();

    let created = eventually(|| {
        let store = store.clone();
        async move {
            store
                .contains(ResourceKind::Workflow, "orch-infra", &workflow_name(uuid))
                .await
        }
    })
    .await;
    assert!(created);

    let resolved = eventually(|| {
        let inventory = inventory.clone();
        async move {
            inventory
                .os("os-c1")
                .await
                .is_some_and(|os| !os.repo_url.is_empty())
        }
    })
    .await;
    assert!(resolved);

    controller.stop().await;
}

#[tokio::test]
async fn test_watch_events_trigger_reconcile() {
    let (inventory, events) = MemoryInventory::new();
    let inventory = Arc::new(inventory);
    let store = Arc::new(MemoryStore::new());
    let controller = start(inventory.clone(), store.clone(), events);
    controller.start().await.unwrap();

    inventory
        .put_os(OperatingSystem {
            resource_id: "os-w1".to_string(),
            tenant_id: "tenant-1".to_string(),
            profile_name: "edge-os".to_string(),
            image_url: "https://cdn/edge.raw.gz".to_string(),
            version: "1.0".to_string(),
            ..Default::default()
        })
        .await;

    let resolved = eventually(|| {
        let inventory = inventory.clone();
        async move {
            inventory.os("os-w1").await.is_some_and(|os| {
                os.repo_url == "https://cdn/edge.raw.gz;http://files/repository/edge-os/1.0/installer.sh"
            })
        }
    })
    .await;
    assert!(resolved);

    controller.stop().await;
}

#[tokio::test]
async fn test_filter_event_per_kind() {
    let (inventory, events) = MemoryInventory::new();
    let controller = start(Arc::new(inventory), Arc::new(MemoryStore::new()), events);

    let event = |kind, id: &str| WatchEvent::new(kind, ResourceRef::new("tenant-1", id));

    assert!(!controller.filter_event(&event(EventKind::Deleted, "host-1")));
    assert!(controller.filter_event(&event(EventKind::Updated, "host-1")));
    assert!(controller.filter_event(&event(EventKind::Deleted, "inst-1")));
    assert!(controller.filter_event(&event(EventKind::Deleted, "os-1")));
    assert!(!controller.filter_event(&event(EventKind::Unspecified, "os-1")));

    controller.stop().await;
}

#[tokio::test]
async fn test_closed_watch_stream_is_fatal() {
    let (inventory, _events) = MemoryInventory::new();
    let (tx, rx) = mpsc::channel(1);
    let controller = start(Arc::new(inventory), Arc::new(MemoryStore::new()), rx);
    controller.start().await.unwrap();

    drop(tx);
    tokio::time::timeout(Duration::from_secs(1), controller.wait_fatal())
        .await
        .expect("fatal signal after stream closed");

    controller.stop().await;
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let (inventory, events) = MemoryInventory::new();
    let controller = start(Arc::new(inventory), Arc::new(MemoryStore::new()), events);
    controller.start().await.unwrap();

    controller.stop().await;
    controller.stop().await;
    assert!(controller
        .reconcile_resource(&ResourceRef::new("tenant-1", "host-1"))
        .await
        .is_err());
}
