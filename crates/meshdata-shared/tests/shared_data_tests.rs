//! End-to-end tests for hub and member managers over in-process and TCP
//! transports.

use bytes::Bytes;
use meshdata_shared::{
    ChangeListener, ManagerConfig, ReplicaConfig, Repository, Result, SharedDataError,
    SharedDataManager,
};
use meshdata_transport::{
    MemoryTransport, PeerToPeer, ServerResponseBuilder, TcpTransport, TransportConfig,
};
use meshdata_types::{ChangeSet, FieldKind, Record, Schema, StorePath};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn schema() -> Schema {
    Schema::builder("orders")
        .record("order", |t| {
            t.field("id", FieldKind::Text)
                .field("qty", FieldKind::Integer)
                .unique_key(["id"])
        })
        .build()
        .unwrap()
}

fn order(id: &str, qty: i64) -> Record {
    Record::new("order").with("id", id).with("qty", qty)
}

fn path(p: &str) -> StorePath {
    StorePath::new(p).unwrap()
}

fn fast_config() -> ManagerConfig {
    ManagerConfig {
        open_timeout: Duration::from_secs(5),
        replica: ReplicaConfig {
            poll_wait: Duration::from_millis(100),
            retry_backoff: Duration::from_millis(50),
        },
        ..ManagerConfig::default()
    }
}

fn mesh() -> (Arc<MemoryTransport>, SharedDataManager, SharedDataManager) {
    let transport = Arc::new(MemoryTransport::new());
    let hub = SharedDataManager::hub(transport.clone(), fast_config()).unwrap();
    let member = SharedDataManager::member(transport.clone(), hub.hub_url(), fast_config()).unwrap();
    (transport, hub, member)
}

fn put(record: Record) -> impl FnMut(&mut Repository<'_>) -> Result<()> {
    move |repo: &mut Repository<'_>| -> Result<()> {
        repo.put(record.clone())?;
        Ok(())
    }
}

fn count(service: &meshdata_shared::SharedDataService) -> usize {
    let mut n = 0;
    service
        .read(&mut |repo: &mut Repository<'_>| -> Result<()> {
            n = repo.len();
            Ok(())
        })
        .unwrap();
    n
}

#[derive(Debug, PartialEq)]
enum Seen {
    Event { version: u64, thread: Option<String> },
    Reset,
}

struct Recorder {
    tx: Mutex<mpsc::Sender<Seen>>,
}

impl Recorder {
    fn new() -> (Arc<Self>, mpsc::Receiver<Seen>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self { tx: Mutex::new(tx) }), rx)
    }
}

impl ChangeListener for Recorder {
    fn event(&self, change_set: &ChangeSet) -> anyhow::Result<()> {
        let thread = thread::current().name().map(str::to_string);
        let _ = self.tx.lock().send(Seen::Event {
            version: change_set.version,
            thread,
        });
        Ok(())
    }

    fn reset(&self) -> anyhow::Result<()> {
        let _ = self.tx.lock().send(Seen::Reset);
        Ok(())
    }
}

#[test]
fn second_create_is_a_conflict() {
    let (_transport, hub, member) = mesh();
    let p = path("shop/orders");

    hub.create(&p, &schema()).unwrap();
    assert!(matches!(
        hub.create(&p, &schema()),
        Err(SharedDataError::AlreadyExist(existing)) if existing == p
    ));
    assert!(matches!(
        member.create(&p, &schema()),
        Err(SharedDataError::AlreadyExist(_))
    ));

    member.create(&path("shop/returns"), &schema()).unwrap();
    assert!(matches!(
        hub.create(&path("shop/returns"), &schema()),
        Err(SharedDataError::AlreadyExist(_))
    ));
}

#[test]
fn writes_reach_a_listener_in_order_on_one_thread() {
    let (_transport, _hub, member) = mesh();
    let service = member
        .get_shared_data_service_sync(&path("shop/orders"), &schema())
        .unwrap();
    let (recorder, rx) = Recorder::new();
    service.listen(recorder).unwrap();

    for (i, id) in ["w1", "w2", "w3"].into_iter().enumerate() {
        let change_set = service
            .write_change_set(&mut put(order(id, i as i64)))
            .unwrap();
        assert_eq!(change_set.len(), 1);
    }

    let seen: Vec<Seen> = (0..3)
        .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
        .collect();
    let versions: Vec<u64> = seen
        .iter()
        .map(|s| match s {
            Seen::Event { version, .. } => *version,
            Seen::Reset => panic!("unexpected reset"),
        })
        .collect();
    assert_eq!(versions, vec![1, 2, 3]);

    let threads: Vec<&Option<String>> = seen
        .iter()
        .filter_map(|s| match s {
            Seen::Event { thread, .. } => Some(thread),
            Seen::Reset => None,
        })
        .collect();
    assert!(threads.iter().all(|t| *t == threads[0]));
    assert_eq!(threads[0].as_deref(), Some("delivery:shop/orders"));

    // Nothing is delivered twice even though the sync thread polls too.
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn wait_for_initialization_gives_up_on_a_silent_hub() {
    let transport = Arc::new(MemoryTransport::with_config(TransportConfig {
        host: "localhost".to_string(),
        request_timeout: Duration::from_secs(1),
        ..TransportConfig::default()
    }));
    let stash: Arc<Mutex<Vec<ServerResponseBuilder>>> = Arc::default();
    let held = Arc::clone(&stash);
    let silent = transport
        .create_server_listener(
            None,
            2,
            Arc::new(move |_request: Bytes, response: ServerResponseBuilder| {
                held.lock().push(response);
            }),
            "silent",
        )
        .unwrap();

    let member = SharedDataManager::member(
        transport.clone(),
        silent.url(),
        ManagerConfig {
            open_timeout: Duration::from_millis(100),
            ..fast_config()
        },
    )
    .unwrap();
    let service = member
        .get_shared_data_service(&path("quiet"), &schema())
        .unwrap();

    let timeout = Duration::from_millis(100);
    let start = Instant::now();
    assert!(!service.wait_for_initialization(timeout));
    let elapsed = start.elapsed();
    assert!(elapsed >= timeout, "returned early: {elapsed:?}");
    assert!(elapsed < timeout + Duration::from_millis(400), "overshot: {elapsed:?}");
    assert!(!service.is_initialized());

    assert!(matches!(
        member.get_shared_data_service_sync(&path("quiet"), &schema()),
        Err(SharedDataError::InitTimeout { .. })
    ));

    member.close();
    silent.stop();
}

#[test]
fn listeners_reset_after_the_hub_restarts() {
    let transport = Arc::new(MemoryTransport::new());
    let hub_config = ManagerConfig {
        port: Some(47_000),
        ..fast_config()
    };
    let hub = SharedDataManager::hub(transport.clone(), hub_config.clone()).unwrap();
    let member = SharedDataManager::member(transport.clone(), hub.hub_url(), fast_config()).unwrap();

    let service = member
        .get_shared_data_service_sync(&path("shop/orders"), &schema())
        .unwrap();
    service.write(&mut put(order("before", 1))).unwrap();
    let first_id = service.id().unwrap();
    let (recorder, rx) = Recorder::new();
    service.listen(recorder).unwrap();

    hub.close();
    let restarted = SharedDataManager::hub(transport.clone(), hub_config).unwrap();
    assert_eq!(restarted.hub_url(), member.hub_url());

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Seen::Reset) => break,
            Ok(Seen::Event { .. }) => {}
            Err(e) => panic!("no reset delivered: {e}"),
        }
    }

    assert_ne!(service.id().unwrap(), first_id);
    assert!(member.stats().resyncs >= 1);
    // The restarted hub starts empty; the replica now mirrors it.
    assert_eq!(count(&service), 0);

    member.close();
    restarted.close();
}

#[test]
fn store_id_changes_across_stop() {
    let (_transport, hub, _member) = mesh();
    let p = path("ids");
    let first = hub.get_shared_data_service_sync(&p, &schema()).unwrap();
    let first_id = first.id().unwrap();
    assert_eq!(
        hub.get_shared_data_service(&p, &schema()).unwrap().id().unwrap(),
        first_id
    );

    first.stop();
    first.stop();
    assert!(matches!(first.id(), Err(SharedDataError::Stopped)));
    assert!(matches!(
        first.write(&mut put(order("x", 1))),
        Err(SharedDataError::Stopped)
    ));

    let second = hub.get_shared_data_service_sync(&p, &schema()).unwrap();
    assert_ne!(second.id().unwrap(), first_id);
}

#[test]
fn member_reads_its_own_write() {
    let (_transport, hub, member) = mesh();
    let p = path("shop/orders");
    let replica = member.get_shared_data_service_sync(&p, &schema()).unwrap();

    replica.write(&mut put(order("a", 1))).unwrap();
    assert_eq!(count(&replica), 1);
    assert_eq!(replica.version(), 1);

    let authoritative = hub.get_shared_data_service_sync(&p, &schema()).unwrap();
    let mut qty = None;
    authoritative
        .read(&mut |repo: &mut Repository<'_>| -> Result<()> {
            qty = repo.get_like(&order("a", 0))?.and_then(|r| r.get_i64("qty"));
            Ok(())
        })
        .unwrap();
    assert_eq!(qty, Some(1));
}

#[test]
fn hub_writes_propagate_to_members() {
    let (_transport, hub, member) = mesh();
    let p = path("shop/orders");
    let replica = member.get_shared_data_service_sync(&p, &schema()).unwrap();
    let (recorder, rx) = Recorder::new();
    replica.listen(recorder).unwrap();

    let authoritative = hub.get_shared_data_service_sync(&p, &schema()).unwrap();
    authoritative.write(&mut put(order("a", 1))).unwrap();
    authoritative
        .write(&mut |repo: &mut Repository<'_>| -> Result<()> {
            let key = repo.key_of(&order("a", 0))?;
            repo.remove(&key)?;
            repo.put(order("b", 2))?;
            Ok(())
        })
        .unwrap();

    for expected in [1, 2] {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Seen::Event { version, .. } => assert_eq!(version, expected),
            Seen::Reset => panic!("unexpected reset"),
        }
    }
    assert_eq!(count(&replica), 1);
    assert_eq!(replica.version(), 2);
    assert!(hub.stats().commits >= 2);
}

#[test]
fn invalid_and_read_only_mutations_are_rejected() {
    let (_transport, _hub, member) = mesh();
    let service = member
        .get_shared_data_service_sync(&path("shop/orders"), &schema())
        .unwrap();

    let bad = Record::new("order").with("id", "a").with("qty", "many");
    assert!(matches!(
        service.write(&mut put(bad)),
        Err(SharedDataError::InvalidRecord(_))
    ));
    assert!(matches!(
        service.read(&mut put(order("a", 1))),
        Err(SharedDataError::ReadOnly)
    ));
    assert_eq!(count(&service), 0);
}

#[test]
fn list_service_returns_immediate_children() {
    let (_transport, hub, member) = mesh();
    for p in ["shop/orders", "shop/stock/eu", "shop/stock/us", "misc"] {
        hub.create(&path(p), &schema()).unwrap();
    }
    let expected = vec![path("shop/orders"), path("shop/stock")];
    assert_eq!(hub.list_service(&path("shop")).unwrap(), expected);
    assert_eq!(member.list_service(&path("shop")).unwrap(), expected);
    assert!(member.list_service(&path("nothing")).unwrap().is_empty());
}

#[test]
fn close_is_idempotent_and_final() {
    let (_transport, hub, member) = mesh();
    let service = member
        .get_shared_data_service_sync(&path("a"), &schema())
        .unwrap();
    assert_eq!(member.stats().stores_open, 1);

    member.close();
    member.close();
    assert!(service.is_stopped());
    assert_eq!(member.stats().stores_open, 0);
    assert!(matches!(
        member.get_shared_data_service(&path("a"), &schema()),
        Err(SharedDataError::Stopped)
    ));
    hub.close();
}

#[test]
fn replication_works_over_tcp() {
    let transport: Arc<dyn PeerToPeer> = Arc::new(TcpTransport::new());
    let hub = SharedDataManager::hub(Arc::clone(&transport), fast_config()).unwrap();
    let member = SharedDataManager::member(Arc::clone(&transport), hub.hub_url(), fast_config()).unwrap();
    let p = path("tcp/orders");

    let replica = member.get_shared_data_service_sync(&p, &schema()).unwrap();
    replica.write(&mut put(order("a", 1))).unwrap();

    let authoritative = hub.get_shared_data_service_sync(&p, &schema()).unwrap();
    assert_eq!(count(&authoritative), 1);

    member.close();
    hub.close();
}
