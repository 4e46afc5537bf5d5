pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# SCANFOLD CONFIGURATION
# =============================================================================
# Scanfold reassembles network discovery scans reported by field supervisors
# from one partition of the discovery event log, hands every completed scan to
# a sink exactly once and advances the partition checkpoint when it is safe.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/scanfold/config.yml
#   3. /etc/scanfold/config.yml
#
# Values may reference environment variables with $env{NAME}.

# =============================================================================
# PARTITION
# =============================================================================
partition:
  # Partition id recorded with every checkpoint
  id: "0"
  # JSON-lines partition log, one envelope per line:
  #   {"sequenceNumber": 7, "properties": {...}, "body": {...}}
  path: /var/lib/scanfold/partition-0.jsonl
  # Where to start when no checkpoint exists yet: 'beginning' or 'end'
  start: beginning
  # Keep polling for appended lines after reaching the end of the log
  follow: true
  # Maximum messages handed to the intake per delivery
  max_batch_size: 100
  poll_interval: 500ms

# =============================================================================
# INTAKE
# =============================================================================
intake:
  content_type: application/x-discovery-event-v2-json
  content_type_property: content-type
  # Property identifying the supervisor's device
  identity_property: iothub-connection-device-id
  # Optional; agent id becomes '<device>_module_<module>' when present
  module_property: iothub-connection-module-id

# =============================================================================
# TRACKING
# =============================================================================
tracking:
  # Drop redelivered endpoint events by index. Set to false to append every
  # delivery (duplicates can then complete a scan early).
  deduplicate: true

# =============================================================================
# REAPER
# =============================================================================
reaper:
  # Scans still incomplete this long after their first event are abandoned
  inactivity_threshold: 1h
  # Reaper pass while the partition is idle
  idle_interval: 1m

# =============================================================================
# SINK
# =============================================================================
# Where completed scans go:
#   type: log       - log each completed scan (dry run)
#   type: storage   - record completed scans in the local database
#   type: http      - POST each completed scan as JSON to 'url'
sink:
  type: http
  url: http://localhost:9080/registry/v2/discovery/scans
  timeout: 30s

# =============================================================================
# STORAGE
# =============================================================================
storage:
  # DuckDB database holding partition checkpoints (and completed scans when
  # the storage sink is used)
  path: /var/lib/scanfold/scanfold.duckdb
  # Owner recorded with checkpoints, defaults to the hostname
  # owner: scanfold-1

# =============================================================================
# WEB (optional)
# =============================================================================
# Read-only status API: GET /health, GET /status
web:
  listen: 127.0.0.1:7410
"#
    .to_string()
}
