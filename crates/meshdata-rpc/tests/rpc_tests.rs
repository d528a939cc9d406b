//! Registration, discovery and calls between two peers sharing one hub.

use meshdata_codec::{ErasedSerializer, JsonSerializer};
use meshdata_rpc::{RpcConfig, RpcError, RpcService, ServiceDef, Shared};
use meshdata_shared::{ManagerConfig, ReplicaConfig, SharedDataManager};
use meshdata_transport::MemoryTransport;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct Mesh {
    transport: Arc<MemoryTransport>,
    hub: SharedDataManager,
    member: SharedDataManager,
    a: RpcService,
    b: RpcService,
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.b.shutdown();
        self.a.shutdown();
        self.member.close();
        self.hub.close();
    }
}

fn manager_config() -> ManagerConfig {
    ManagerConfig {
        open_timeout: Duration::from_secs(5),
        replica: ReplicaConfig {
            poll_wait: Duration::from_millis(100),
            retry_backoff: Duration::from_millis(50),
        },
        ..ManagerConfig::default()
    }
}

fn rpc_config(name: &str) -> RpcConfig {
    RpcConfig {
        name: name.to_string(),
        thread_count: 4,
        ..RpcConfig::default()
    }
}

/// Peer `a` runs next to the hub, peer `b` on a member.
fn mesh() -> Mesh {
    let transport = Arc::new(MemoryTransport::new());
    let hub = SharedDataManager::hub(transport.clone(), manager_config()).unwrap();
    let member =
        SharedDataManager::member(transport.clone(), hub.hub_url(), manager_config()).unwrap();
    let a = RpcService::start(transport.clone(), &hub, rpc_config("peer-a")).unwrap();
    let b = RpcService::start(transport.clone(), &member, rpc_config("peer-b")).unwrap();
    Mesh {
        transport,
        hub,
        member,
        a,
        b,
    }
}

fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(10));
    }
}

fn visible(peer: &RpcService, service_type: &str, key: &str) -> bool {
    peer.list_service(service_type).unwrap().contains(key)
}

fn calculator() -> ServiceDef {
    ServiceDef::new()
        .method2("add", |a: i64, b: i64| Ok(a + b))
        .method2("div", |a: i64, b: i64| {
            a.checked_div(b)
                .ok_or_else(|| RpcError::failed("division by zero"))
        })
}

#[test]
fn registered_service_is_callable_from_another_peer() {
    let mesh = mesh();
    mesh.a.register("calc", "main", calculator(), vec![]).unwrap();
    eventually("calc/main on b", || visible(&mesh.b, "calc", "main"));

    let calc = mesh.b.get_service("calc", "main", vec![]).unwrap();
    assert_eq!(calc.call2::<i64, i64, i64>("add", &40, &2).unwrap(), 42);
    assert!(!calc.is_temporary());

    let entries = mesh.b.naming_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].url, mesh.a.url());
    assert_eq!(entries[0].process, "peer-a");
}

#[test]
fn double_registration_conflicts_locally_and_across_peers() {
    let mesh = mesh();
    mesh.a.register("calc", "main", calculator(), vec![]).unwrap();

    let err = mesh
        .a
        .register("calc", "main", calculator(), vec![])
        .unwrap_err();
    assert!(matches!(err, RpcError::Conflict { ref key, .. } if key == "main"));

    eventually("calc/main on b", || visible(&mesh.b, "calc", "main"));
    let err = mesh
        .b
        .register("calc", "main", calculator(), vec![])
        .unwrap_err();
    assert!(matches!(err, RpcError::Conflict { .. }));
    assert_eq!(mesh.b.stats().registered, 0);

    // The loser's failed attempt must not disturb the winner.
    let calc = mesh.b.get_service("calc", "main", vec![]).unwrap();
    assert_eq!(calc.call2::<i64, i64, i64>("add", &1, &2).unwrap(), 3);
    mesh.b.register("calc", "backup", calculator(), vec![]).unwrap();
}

#[test]
fn shared_results_keep_their_identity() {
    let mesh = mesh();
    mesh.a.register_shared::<Vec<String>>();
    mesh.b.register_shared::<Vec<String>>();

    let catalog = Shared::new(vec!["apple".to_string(), "pear".to_string()]);
    let served = catalog.clone();
    let def = ServiceDef::new().method0("items", move || Ok(served.clone()));
    mesh.a.register("catalog", "main", def, vec![]).unwrap();
    eventually("catalog/main on b", || visible(&mesh.b, "catalog", "main"));

    let proxy = mesh.b.get_service("catalog", "main", vec![]).unwrap();
    let first: Shared<Vec<String>> = proxy.call0("items").unwrap();
    let second: Shared<Vec<String>> = proxy.call0("items").unwrap();
    assert!(Arc::ptr_eq(&first.get(), &second.get()));
    assert_eq!(first.id(), catalog.id());
    assert_eq!(*first.get(), vec!["apple".to_string(), "pear".to_string()]);

    catalog.set(vec!["plum".to_string()]);
    let third: Shared<Vec<String>> = proxy.call0("items").unwrap();
    assert!(!Arc::ptr_eq(&first.get(), &third.get()));
    assert_eq!(third.version(), 2);
    assert_eq!(*third.get(), vec!["plum".to_string()]);
}

#[test]
fn unknown_key_is_not_found() {
    let mesh = mesh();
    let err = mesh.b.get_service("calc", "missing", vec![]).unwrap_err();
    assert!(matches!(err, RpcError::NotFound { ref key, .. } if key == "missing"));
    assert!(mesh
        .b
        .get_temporary_service("calc", "missing", vec![])
        .is_err());
}

#[test]
fn callee_errors_reach_the_caller() {
    let mesh = mesh();
    mesh.a.register("calc", "main", calculator(), vec![]).unwrap();
    eventually("calc/main on b", || visible(&mesh.b, "calc", "main"));
    let calc = mesh.b.get_service("calc", "main", vec![]).unwrap();

    let err = calc.call2::<i64, i64, i64>("div", &1, &0).unwrap_err();
    assert!(matches!(err, RpcError::Failed(ref msg) if msg == "division by zero"));

    let err = calc.call0::<i64>("sqrt").unwrap_err();
    assert!(matches!(err, RpcError::NoSuchMethod { ref method, .. } if method == "sqrt"));

    let err = calc.call1::<i64, i64>("add", &1).unwrap_err();
    assert!(matches!(err, RpcError::BadRequest(_)));

    // The proxy stays usable after failures.
    assert_eq!(calc.call2::<i64, i64, i64>("div", &9, &3).unwrap(), 3);
}

#[test]
fn registration_serializers_cover_extra_types() {
    let mesh = mesh();
    let numbers = || vec![ErasedSerializer::new::<Vec<i64>, _>(JsonSerializer::<Vec<i64>>::new())];
    let def = ServiceDef::new().method1("sum", |values: Vec<i64>| Ok(values.iter().sum::<i64>()));
    mesh.a.register("stats", "main", def, numbers()).unwrap();
    eventually("stats/main on b", || visible(&mesh.b, "stats", "main"));

    let without = mesh.b.get_service("stats", "main", vec![]).unwrap();
    assert!(matches!(
        without.call1::<Vec<i64>, i64>("sum", &vec![1, 2]),
        Err(RpcError::Codec(_))
    ));

    let with = mesh.b.get_service("stats", "main", numbers()).unwrap();
    assert_eq!(with.call1::<Vec<i64>, i64>("sum", &vec![1, 2, 3]).unwrap(), 6);
}

#[test]
fn temporary_proxy_binds_the_current_host() {
    let mesh = mesh();
    let hits = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&hits);
    let def = ServiceDef::new().method0("hit", move || {
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    });
    mesh.a.register("counter", "main", def, vec![]).unwrap();
    eventually("counter/main on b", || visible(&mesh.b, "counter", "main"));

    {
        let proxy = mesh
            .b
            .get_temporary_service("counter", "main", vec![])
            .unwrap();
        assert!(proxy.is_temporary());
        assert_eq!(proxy.call0::<u64>("hit").unwrap(), 1);
        assert_eq!(proxy.call0::<u64>("hit").unwrap(), 2);
    }

    let proxy = mesh.b.get_service("counter", "main", vec![]).unwrap();
    assert_eq!(proxy.call0::<u64>("hit").unwrap(), 3);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[test]
fn stopped_host_fails_with_a_transport_error() {
    let mesh = mesh();
    mesh.a.register("calc", "main", calculator(), vec![]).unwrap();
    eventually("calc/main on b", || visible(&mesh.b, "calc", "main"));
    let bound = mesh.b.get_temporary_service("calc", "main", vec![]).unwrap();
    let named = mesh.b.get_service("calc", "main", vec![]).unwrap();

    mesh.a.shutdown();
    mesh.a.shutdown();

    let err = bound.call2::<i64, i64, i64>("add", &1, &1).unwrap_err();
    assert!(err.is_transport(), "unexpected error: {err}");

    eventually("withdrawal on b", || !visible(&mesh.b, "calc", "main"));
    let err = named.call2::<i64, i64, i64>("add", &1, &1).unwrap_err();
    assert!(matches!(err, RpcError::NotFound { .. }));

    assert!(matches!(
        mesh.a.register("calc", "main", calculator(), vec![]),
        Err(RpcError::Stopped)
    ));
}

#[test]
fn unregister_and_reset_withdraw_registrations() {
    let mesh = mesh();
    for key in ["one", "two", "three"] {
        mesh.a.register("calc", key, calculator(), vec![]).unwrap();
    }
    eventually("three keys on b", || mesh.b.list_service("calc").unwrap().len() == 3);
    assert_eq!(mesh.a.stats().registered, 3);

    assert!(mesh.a.unregister("calc", "one").unwrap());
    assert!(!mesh.a.unregister("calc", "one").unwrap());
    eventually("withdrawal of calc/one on b", || {
        !visible(&mesh.b, "calc", "one")
    });

    mesh.a.reset().unwrap();
    eventually("empty registry on b", || {
        mesh.b.list_service("calc").unwrap().is_empty()
    });
    assert_eq!(mesh.a.stats().registered, 0);

    // A withdrawn key is free for another peer.
    mesh.b.register("calc", "two", calculator(), vec![]).unwrap();
    eventually("calc/two on a", || visible(&mesh.a, "calc", "two"));
}

#[test]
fn reset_clears_local_registrations_when_the_hub_is_gone() {
    let mesh = mesh();
    for key in ["one", "two", "three"] {
        mesh.b.register("calc", key, calculator(), vec![]).unwrap();
    }
    eventually("three keys on b", || mesh.b.list_service("calc").unwrap().len() == 3);

    mesh.hub.close();
    let err = mesh.b.reset().unwrap_err();
    assert!(matches!(err, RpcError::Shared(_)), "unexpected error: {err}");

    assert_eq!(mesh.b.stats().registered, 0);
    let mut out = Vec::new();
    mesh.b.dump_registered(&mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "(no registered services)\n");
}

#[test]
fn list_service_is_scoped_by_type() {
    let mesh = mesh();
    mesh.a.register("calc", "main", calculator(), vec![]).unwrap();
    mesh.b.register("calc", "spare", calculator(), vec![]).unwrap();
    mesh.b
        .register("echo", "main", ServiceDef::new().method1("echo", |s: String| Ok(s)), vec![])
        .unwrap();

    eventually("both calc keys on a", || mesh.a.list_service("calc").unwrap().len() == 2);
    let keys: Vec<String> = mesh.a.list_service("calc").unwrap().into_iter().collect();
    assert_eq!(keys, ["main", "spare"]);
    eventually("echo/main on a", || visible(&mesh.a, "echo", "main"));
    assert!(mesh.a.list_service("nothing").unwrap().is_empty());
}

#[test]
fn dump_registered_lists_local_services() {
    let mesh = mesh();
    let mut out = Vec::new();
    mesh.a.dump_registered(&mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "(no registered services)\n");

    mesh.a.register("calc", "main", calculator(), vec![]).unwrap();
    let mut out = Vec::new();
    mesh.a.dump_registered(&mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        format!("calc/main -> {} [add, div]\n", mesh.a.url())
    );
}

#[test]
fn stats_count_both_sides_of_a_call() {
    let mesh = mesh();
    mesh.a.register("calc", "main", calculator(), vec![]).unwrap();
    eventually("calc/main on b", || visible(&mesh.b, "calc", "main"));
    let calc = mesh.b.get_service("calc", "main", vec![]).unwrap();

    calc.call2::<i64, i64, i64>("add", &1, &2).unwrap();
    calc.call2::<i64, i64, i64>("div", &1, &0).unwrap_err();

    let caller = mesh.b.stats();
    assert_eq!(caller.calls_made, 2);
    assert_eq!(caller.calls_failed, 1);
    assert_eq!(caller.calls_served, 0);
    assert_eq!(caller.connections, 1);

    let callee = mesh.a.stats();
    assert_eq!(callee.calls_served, 2);
    assert_eq!(callee.registered, 1);
    assert_eq!(callee.connections, 0);
}

#[test]
fn proxies_fail_fast_once_the_service_is_shut_down() {
    let mesh = mesh();
    mesh.a.register("calc", "main", calculator(), vec![]).unwrap();
    eventually("calc/main on b", || visible(&mesh.b, "calc", "main"));
    let named = mesh.b.get_service("calc", "main", vec![]).unwrap();
    let bound = mesh.b.get_temporary_service("calc", "main", vec![]).unwrap();
    assert_eq!(named.call2::<i64, i64, i64>("add", &2, &2).unwrap(), 4);
    assert_eq!(mesh.b.stats().connections, 1);

    mesh.b.shutdown();

    assert!(matches!(
        named.call2::<i64, i64, i64>("add", &2, &2),
        Err(RpcError::Stopped)
    ));
    assert!(matches!(
        bound.call2::<i64, i64, i64>("add", &2, &2),
        Err(RpcError::Stopped)
    ));
    assert_eq!(mesh.b.stats().connections, 0);
}

#[test]
fn connection_pool_releases_the_least_recently_used_peer() {
    let mesh = mesh();
    mesh.a.register("calc", "left", calculator(), vec![]).unwrap();
    mesh.b.register("calc", "right", calculator(), vec![]).unwrap();

    let config = RpcConfig {
        max_connections: 1,
        ..rpc_config("peer-c")
    };
    let c = RpcService::start(mesh.transport.clone(), &mesh.member, config).unwrap();
    eventually("both keys on c", || c.list_service("calc").unwrap().len() == 2);
    let left = c.get_service("calc", "left", vec![]).unwrap();
    let right = c.get_service("calc", "right", vec![]).unwrap();

    assert_eq!(left.call2::<i64, i64, i64>("add", &1, &1).unwrap(), 2);
    assert_eq!(right.call2::<i64, i64, i64>("add", &2, &2).unwrap(), 4);
    assert_eq!(c.stats().connections, 1);
    assert_eq!(left.call2::<i64, i64, i64>("add", &3, &3).unwrap(), 6);
    assert_eq!(c.stats().connections, 1);

    assert_eq!(mesh.a.stats().calls_served, 2);
    assert_eq!(mesh.b.stats().calls_served, 1);
    c.shutdown();
    assert_eq!(c.stats().connections, 0);
}
