use super::{Broker, DEFAULT_PORT, connection_order};

#[test]
fn test_parse_full_url() {
    let broker = Broker::parse("ssl://mybroker:9001").unwrap();
    assert_eq!(broker.host_name, "mybroker");
    assert_eq!(broker.port, 9001);
}

#[test]
fn test_parse_defaults_port() {
    let broker = Broker::parse("mybroker").unwrap();
    assert_eq!(broker.host_name, "mybroker");
    assert_eq!(broker.port, DEFAULT_PORT);

    let broker = Broker::parse("ssl://mybroker").unwrap();
    assert_eq!(broker.port, DEFAULT_PORT);
}

#[test]
fn test_parse_rejects_unknown_protocol() {
    assert!(Broker::parse("mqtt://mybroker").is_err());
}

#[test]
fn test_parse_rejects_bad_port() {
    assert!(Broker::parse("mybroker:0").is_err());
    assert!(Broker::parse("mybroker:notaport").is_err());
}

#[test]
fn test_parse_ipv6_strips_brackets() {
    let broker = Broker::parse("ssl://[2001:db8::1]:9001").unwrap();
    assert_eq!(broker.host_name, "2001:db8::1");
    assert_eq!(broker.port, 9001);
}

#[test]
fn test_parse_bare_ipv6_defaults_port() {
    let broker = Broker::parse("2001:db8::1").unwrap();
    assert_eq!(broker.host_name, "2001:db8::1");
    assert_eq!(broker.port, DEFAULT_PORT);
}

#[test]
fn test_parse_directory_entry_with_unique_id() {
    let broker = Broker::parse_directory_entry("broker-1;8883;mybroker;10.0.0.5").unwrap();
    assert_eq!(broker.unique_id, "broker-1");
    assert_eq!(broker.port, 8883);
    assert_eq!(broker.host_name, "mybroker");
    assert_eq!(broker.ip_address.as_deref(), Some("10.0.0.5"));
}

#[test]
fn test_parse_directory_entry_short_form() {
    let broker = Broker::parse_directory_entry("9001;mybroker").unwrap();
    assert_eq!(broker.unique_id, "");
    assert_eq!(broker.port, 9001);
    assert_eq!(broker.host_name, "mybroker");
    assert_eq!(broker.ip_address, None);
}

#[test]
fn test_parse_directory_entry_rejects_missing_fields() {
    assert!(Broker::parse_directory_entry("mybroker").is_err());
    assert!(Broker::parse_directory_entry("broker-1;8883").is_err());
}

#[test]
fn test_connection_order_without_history() {
    let brokers = vec![
        Broker::new("b1", 8883).unwrap(),
        Broker::new("b2", 8883).unwrap(),
    ];
    let ordered = connection_order(&brokers, None);
    assert_eq!(ordered, brokers);
}

#[test]
fn test_connection_order_is_sticky() {
    let brokers = vec![
        Broker::new("b1", 8883).unwrap(),
        Broker::new("b2", 8883).unwrap(),
        Broker::new("b3", 8883).unwrap(),
    ];
    let ordered = connection_order(&brokers, Some(&brokers[1]));
    assert_eq!(ordered[0].host_name, "b2");
    assert_eq!(ordered[1].host_name, "b1");
    assert_eq!(ordered[2].host_name, "b3");
}

#[test]
fn test_connection_order_ignores_stale_history() {
    let brokers = vec![Broker::new("b1", 8883).unwrap()];
    let gone = Broker::new("removed", 8883).unwrap();
    let ordered = connection_order(&brokers, Some(&gone));
    assert_eq!(ordered, brokers);
}
