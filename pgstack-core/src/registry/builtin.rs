//! Built-in stack catalog.
//!
//! The five topologies shipped with the repository. Bundle paths are relative
//! to the project root.

/// Catalog used when no catalog file is configured.
pub const BUILTIN_CATALOG: &str = r#"
stacks:
  # ===========================================================================
  # Single node
  # ===========================================================================
  - id: dev
    bundle: docker-compose.yml
    description: Single PostgreSQL node with PgBouncer, optional pgAdmin
    ports: [5432, 6432, 5050]
    profiles: [tools]
    probes:
      - service: postgres
        kind: exec
        command: ["pg_isready", "-U", "postgres"]
      - service: pgbouncer
        kind: tcp
        host: 127.0.0.1
        port: 6432

  # ===========================================================================
  # Distributed
  # ===========================================================================
  - id: citus
    bundle: docker-compose.citus.yml
    description: Citus coordinator with two workers
    ports: [5432, 5433, 5434, 5435]
    probes:
      - service: coordinator
        kind: exec
        command: ["pg_isready", "-U", "postgres"]
      - service: worker1
        kind: exec
        command: ["pg_isready", "-U", "postgres"]
      - service: worker2
        kind: exec
        command: ["pg_isready", "-U", "postgres"]

  - id: patroni
    bundle: docker-compose.patroni.yml
    description: Three-node Patroni cluster on etcd behind HAProxy
    ports: [2379, 5000, 5001, 7000, 8008, 8009, 8010]
    probes:
      - service: etcd
        kind: http
        url: http://127.0.0.1:2379/health
      - service: patroni1
        kind: http
        url: http://127.0.0.1:8008/health
      - service: patroni2
        kind: http
        url: http://127.0.0.1:8009/health
      - service: patroni3
        kind: http
        url: http://127.0.0.1:8010/health
      - service: haproxy
        kind: http
        url: http://127.0.0.1:7000/
      - service: haproxy
        kind: tcp
        host: 127.0.0.1
        port: 5000

  # ===========================================================================
  # Observability
  # ===========================================================================
  - id: monitoring
    bundle: docker-compose.monitoring.yml
    description: Prometheus, Grafana and postgres_exporter
    ports: [3000, 9090, 9187]
    probes:
      - service: prometheus
        kind: http
        url: http://127.0.0.1:9090/-/ready
      - service: grafana
        kind: http
        url: http://127.0.0.1:3000/api/health
        required: false
        retries: 10
      - service: postgres-exporter
        kind: tcp
        host: 127.0.0.1
        port: 9187
        required: false
        retries: 10

  # ===========================================================================
  # Production-like
  # ===========================================================================
  - id: production
    bundle: docker-compose.prod.yml
    description: Hardened single primary with PgBouncer and exporter
    ports: [5432, 6432, 9187]
    probes:
      - service: postgres
        kind: exec
        command: ["pg_isready", "-U", "postgres"]
      - service: pgbouncer
        kind: tcp
        host: 127.0.0.1
        port: 6432
      - service: postgres-exporter
        kind: tcp
        host: 127.0.0.1
        port: 9187
        required: false
        retries: 10
"#;
