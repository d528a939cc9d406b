//! Peers started from node configuration discovering and calling each other.

use meshdata_node::{NodeConfig, NodeError, Peer, Role};
use meshdata_rpc::{RpcError, ServiceDef, Shared};
use meshdata_shared::Repository;
use meshdata_transport::{MemoryTransport, PeerToPeer};
use meshdata_types::{FieldKind, Record, Schema, StorePath};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn hub_config(name: &str) -> NodeConfig {
    NodeConfig {
        name: name.to_string(),
        thread_count: 4,
        poll_wait_ms: 100,
        open_timeout_ms: 5_000,
        ..NodeConfig::default()
    }
}

fn member_config(name: &str, hub: &Peer) -> NodeConfig {
    NodeConfig {
        role: Role::Member,
        hub_url: Some(hub.hub_url().to_string()),
        ..hub_config(name)
    }
}

fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

fn greeter(name: &'static str) -> ServiceDef {
    ServiceDef::new().method1("greet", move |who: String| Ok(format!("{name} greets {who}")))
}

#[test]
fn member_discovers_a_service_on_the_hub() {
    let transport: Arc<dyn PeerToPeer> = Arc::new(MemoryTransport::new());
    let hub = Peer::start_with(hub_config("hub"), transport.clone()).unwrap();
    let member = Peer::start_with(member_config("member", &hub), transport).unwrap();
    assert_eq!(member.hub_url(), hub.hub_url());

    hub.rpc().register("greeter", "main", greeter("hub"), vec![]).unwrap();
    eventually("greeter on member", || {
        member.rpc().list_service("greeter").unwrap().contains("main")
    });

    let proxy = member.rpc().get_service("greeter", "main", vec![]).unwrap();
    let reply: String = proxy.call1("greet", &"member".to_string()).unwrap();
    assert_eq!(reply, "hub greets member");

    let entries = member.rpc().naming_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].process, "hub");

    member.shutdown();
    hub.shutdown();
    hub.shutdown();
}

#[test]
fn shared_values_keep_identity_between_peers() {
    let transport: Arc<dyn PeerToPeer> = Arc::new(MemoryTransport::new());
    let owner = Peer::start_with(hub_config("owner"), transport.clone()).unwrap();
    let caller = Peer::start_with(member_config("caller", &owner), transport).unwrap();
    owner.rpc().register_shared::<Vec<u64>>();
    caller.rpc().register_shared::<Vec<u64>>();

    let prices = Shared::new(vec![3_u64, 5, 8]);
    let served = prices.clone();
    owner
        .rpc()
        .register("prices", "eu", ServiceDef::new().method0("current", move || Ok(served.clone())), vec![])
        .unwrap();
    eventually("prices on caller", || {
        caller.rpc().list_service("prices").unwrap().contains("eu")
    });

    let proxy = caller.rpc().get_service("prices", "eu", vec![]).unwrap();
    let first: Shared<Vec<u64>> = proxy.call0("current").unwrap();
    let second: Shared<Vec<u64>> = proxy.call0("current").unwrap();
    assert!(Arc::ptr_eq(&first.get(), &second.get()));
    assert_eq!(*second.get(), vec![3, 5, 8]);

    caller.shutdown();
    owner.shutdown();
}

#[test]
fn stores_replicate_between_peers() {
    let transport: Arc<dyn PeerToPeer> = Arc::new(MemoryTransport::new());
    let hub = Peer::start_with(hub_config("hub"), transport.clone()).unwrap();
    let member = Peer::start_with(member_config("member", &hub), transport).unwrap();

    let schema = Schema::builder("inventory")
        .record("item", |t| {
            t.field("sku", FieldKind::Text)
                .field("count", FieldKind::Integer)
                .unique_key(["sku"])
        })
        .build()
        .unwrap();
    let path = StorePath::new("shop/inventory").unwrap();
    let on_hub = hub.manager().get_shared_data_service_sync(&path, &schema).unwrap();
    let on_member = member.manager().get_shared_data_service_sync(&path, &schema).unwrap();

    on_member
        .write(&mut |repo: &mut Repository<'_>| -> meshdata_shared::Result<()> {
            repo.put(Record::new("item").with("sku", "A-1").with("count", 7_i64))?;
            Ok(())
        })
        .unwrap();
    eventually("write on hub", || on_hub.version() >= 1);

    let mut count = None;
    on_hub
        .read(&mut |repo: &mut Repository<'_>| -> meshdata_shared::Result<()> {
            let wanted = Record::new("item").with("sku", "A-1");
            count = repo.get_like(&wanted)?.and_then(|r| r.get_i64("count"));
            Ok(())
        })
        .unwrap();
    assert_eq!(count, Some(7));

    let children = member
        .manager()
        .list_service(&StorePath::new("shop").unwrap())
        .unwrap();
    assert_eq!(children, vec![path]);

    member.shutdown();
    hub.shutdown();
}

#[test]
fn peers_talk_over_tcp() {
    let hub = Peer::start(hub_config("tcp-hub")).unwrap();
    assert!(hub.hub_url().starts_with("tcp://127.0.0.1:"));
    let member = Peer::start(member_config("tcp-member", &hub)).unwrap();

    member.rpc().register("greeter", "edge", greeter("member"), vec![]).unwrap();
    eventually("greeter on hub", || {
        hub.rpc().list_service("greeter").unwrap().contains("edge")
    });
    let proxy = hub.rpc().get_service("greeter", "edge", vec![]).unwrap();
    let reply: String = proxy.call1("greet", &"hub".to_string()).unwrap();
    assert_eq!(reply, "member greets hub");

    member.shutdown();
    eventually("withdrawal on hub", || {
        hub.rpc().list_service("greeter").unwrap().is_empty()
    });
    assert!(matches!(
        hub.rpc().get_service("greeter", "edge", vec![]),
        Err(RpcError::NotFound { .. })
    ));
    hub.shutdown();
}

#[test]
fn invalid_configuration_is_rejected() {
    let transport: Arc<dyn PeerToPeer> = Arc::new(MemoryTransport::new());
    let config = NodeConfig {
        role: Role::Member,
        ..hub_config("lost")
    };
    assert!(matches!(
        Peer::start_with(config, transport.clone()),
        Err(NodeError::Config(_))
    ));

    let config = NodeConfig {
        thread_count: 0,
        ..hub_config("idle")
    };
    assert!(matches!(
        Peer::start_with(config, transport),
        Err(NodeError::Config(_))
    ));
}
