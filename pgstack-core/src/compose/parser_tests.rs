//! Tests for the Compose parser.

use super::*;
use crate::error::StackError;

#[test]
fn test_parse_dev_bundle() {
    let yaml = r#"
services:
  postgres:
    image: postgres:16
    ports:
      - "5432:5432"
  pgbouncer:
    image: edoburu/pgbouncer:latest
    ports:
      - "127.0.0.1:6432:6432/tcp"
  pgadmin:
    image: dpage/pgadmin4
    profiles: ["tools"]
    ports:
      - target: 80
        published: 5050
volumes:
  pgdata: {}
"#;
    let compose = ComposeParser::parse(yaml).unwrap();
    assert_eq!(compose.services.len(), 3);
    assert!(compose.volumes.contains_key("pgdata"));

    let services = ComposeParser::services(&compose);
    let names: Vec<_> = services.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["pgadmin", "pgbouncer", "postgres"]);

    let pgadmin = &services[0];
    assert_eq!(pgadmin.profiles, vec!["tools"]);
    assert_eq!(pgadmin.published_ports, vec![5050]);
    assert_eq!(services[1].published_ports, vec![6432]);
    assert_eq!(services[2].published_ports, vec![5432]);
}

#[test]
fn test_parse_citus_port_range() {
    let yaml = r#"
services:
  coordinator:
    image: citusdata/citus:12
    ports: ["5432-5435:5432-5435"]
  worker:
    image: citusdata/citus:12
    ports:
      - 5432
"#;
    let compose = ComposeParser::parse(yaml).unwrap();
    let services = ComposeParser::services(&compose);
    assert_eq!(services[0].published_ports, vec![5432, 5433, 5434, 5435]);
    assert!(services[1].published_ports.is_empty());
}

#[test]
fn test_parse_ipv6_host_address() {
    let entry = PortEntry::Short("[::1]:8008:8008".to_string());
    assert_eq!(ComposeParser::published_ports(&entry), vec![8008]);
}

#[test]
fn test_parse_rejects_empty_services() {
    let yaml = "services: {}\n";
    assert!(matches!(ComposeParser::parse(yaml), Err(StackError::ComposeParseError { .. })));
}

#[test]
fn test_parse_rejects_service_without_image() {
    let yaml = r#"
services:
  broken:
    ports: ["80:80"]
"#;
    assert!(ComposeParser::parse(yaml).is_err());
}

#[test]
fn test_parse_invalid_yaml() {
    assert!(ComposeParser::parse("services: [unclosed").is_err());
}
