use std::time::{Duration, Instant};

use cluster_coordinator::cluster::{HeartbeatStats, NodeLink, NodeRegistration, NodeRegistry};
use cluster_coordinator::error::CoordinatorError;

fn registration(node_id: &str, ip: &str) -> NodeRegistration {
    NodeRegistration::new(node_id, ip)
}

#[test]
fn test_register_and_lookup() {
    let mut registry = NodeRegistry::new();
    let now = Instant::now();

    registry
        .register(registration("nc1", "10.0.0.1"), None, now)
        .unwrap();

    assert!(registry.contains("nc1"));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get("nc1").unwrap().registration.ip_address, "10.0.0.1");
}

#[test]
fn test_duplicate_registration_is_rejected() {
    let mut registry = NodeRegistry::new();
    let now = Instant::now();

    registry
        .register(registration("nc1", "10.0.0.1"), None, now)
        .unwrap();
    let err = registry
        .register(registration("nc1", "10.0.0.2"), None, now)
        .unwrap_err();

    assert_eq!(err, CoordinatorError::DuplicateNode("nc1".to_string()));
    // The first registration is untouched.
    assert_eq!(registry.get("nc1").unwrap().registration.ip_address, "10.0.0.1");
    assert!(!registry.ip_address_node_map().contains_key("10.0.0.2"));
}

#[test]
fn test_ip_index_groups_nodes_sharing_an_address() {
    let mut registry = NodeRegistry::new();
    let now = Instant::now();

    registry.register(registration("nc1", "10.0.0.1"), None, now).unwrap();
    registry.register(registration("nc2", "10.0.0.1"), None, now).unwrap();
    registry.register(registration("nc3", "10.0.0.2"), None, now).unwrap();

    let map = registry.ip_address_node_map();
    assert_eq!(map.len(), 2);
    assert_eq!(
        map["10.0.0.1"].iter().cloned().collect::<Vec<_>>(),
        vec!["nc1".to_string(), "nc2".to_string()]
    );

    registry.unregister("nc1").unwrap();
    assert_eq!(registry.ip_address_node_map()["10.0.0.1"].len(), 1);

    registry.unregister("nc2").unwrap();
    assert!(!registry.ip_address_node_map().contains_key("10.0.0.1"));
}

#[test]
fn test_unregister_unknown_node() {
    let mut registry = NodeRegistry::new();
    let err = registry.unregister("ghost").unwrap_err();
    assert_eq!(err, CoordinatorError::UnknownNode("ghost".to_string()));
}

#[test]
fn test_heartbeat_from_unknown_node_is_ignored() {
    let mut registry = NodeRegistry::new();
    assert!(!registry.heartbeat("ghost", HeartbeatStats::default(), Instant::now()));
    assert!(registry.is_empty());
}

#[test]
fn test_dead_nodes_after_missed_heartbeats() {
    let mut registry = NodeRegistry::new();
    let t0 = Instant::now();
    let timeout = Duration::from_millis(300);

    registry.register(registration("nc1", "10.0.0.1"), None, t0).unwrap();
    registry.register(registration("nc2", "10.0.0.2"), None, t0).unwrap();

    // nc2 keeps heartbeating, nc1 goes silent.
    registry.heartbeat("nc2", HeartbeatStats::default(), t0 + Duration::from_millis(250));

    assert!(registry.dead_nodes(t0 + Duration::from_millis(300), timeout).is_empty());
    assert_eq!(
        registry.dead_nodes(t0 + Duration::from_millis(301), timeout),
        vec!["nc1".to_string()]
    );
}

#[test]
fn test_heartbeat_timestamp_never_moves_backwards() {
    let mut registry = NodeRegistry::new();
    let t0 = Instant::now();
    let later = t0 + Duration::from_secs(5);

    registry.register(registration("nc1", "10.0.0.1"), None, t0).unwrap();
    registry.heartbeat("nc1", HeartbeatStats::default(), later);
    registry.heartbeat("nc1", HeartbeatStats::default(), t0);

    assert_eq!(registry.get("nc1").unwrap().last_heartbeat, later);
}

#[test]
fn test_heartbeat_records_statistics() {
    let mut registry = NodeRegistry::new();
    let now = Instant::now();
    registry.register(registration("nc1", "10.0.0.1"), None, now).unwrap();

    let stats = HeartbeatStats {
        load_average: 1.5,
        thread_count: 12,
        ..Default::default()
    };
    assert!(registry.heartbeat("nc1", stats.clone(), now));
    assert_eq!(registry.get("nc1").unwrap().stats, Some(stats));
}

#[test]
fn test_send_to_node_without_open_link() {
    let mut registry = NodeRegistry::new();
    let (link, rx) = NodeLink::channel();
    drop(rx);

    registry
        .register(registration("nc1", "10.0.0.1"), Some(link), Instant::now())
        .unwrap();
    let node = registry.get("nc1").unwrap();

    // A closed link is a transient failure, not an error.
    assert!(!node.send(cluster_coordinator::cluster::NodeCommand::AbortTasks {
        job_id: cluster_coordinator::job::JobId(0),
        tasks: vec![],
    }));
}
