/// Service type under which discovery nodes announce themselves
pub const DISCOVERY_SERVICE_TYPE: &str = "discovery";

/// Legacy name of the fleet-wide pool
pub const GENERAL_POOL: &str = "general";

/// Service property keys that carry contact URIs, checked against the announcer's IP
pub const PROP_HTTP: &str = "http";
pub const PROP_HTTPS: &str = "https";
pub const PROP_ADMIN: &str = "admin";
pub const CONTACT_PROPERTIES: [&str; 3] = [PROP_HTTP, PROP_HTTPS, PROP_ADMIN];

/// API path prefix
pub const API_PREFIX: &str = "/v1";

/// Peer-facing replication endpoint (GET pulls a snapshot, POST pushes one entry)
pub const STORE_PATH: &str = "/v1/store/dynamic";
