//! # Application Constants
//!
//! Application-wide constants for the multipart upload coordinator and the
//! Worker façade that serves it.
//!
//! ## Binding Names
//!
//! Constants for Cloudflare Worker bindings that must match wrangler.toml configuration.
//!
//! ## Limits and Defaults
//!
//! Store protocol limits plus the defaults used when KV holds no configuration.

/// Standard KV configuration binding name
pub const STORAGE_CONFIG_KV_NAME: &str = "STORAGE_CONFIG";

/// Key under which the JSON configuration is stored in KV
pub const CONFIG_KV_KEY: &str = "config";

/// Standard R2 bucket binding name
pub const STORAGE_BUCKET_NAME: &str = "STORAGE_BUCKET";

/// Default maximum assembled object size (10GB)
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 10_737_418_240;

/// Highest part number the store accepts in a multipart upload
pub const MAX_PART_NUMBER: u16 = 10_000;

/// Longest object key accepted, in bytes
pub const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Part upload concurrency used when the platform cannot report its parallelism
pub const FALLBACK_PART_CONCURRENCY: usize = 4;

/// Default per-part upload timeout (60s)
pub const DEFAULT_PART_TIMEOUT_MS: u64 = 60_000;

/// Default timeout for initiate/complete/abort calls (15s)
pub const DEFAULT_CONTROL_TIMEOUT_MS: u64 = 15_000;

/// Default bound on concurrently open upload sessions
pub const DEFAULT_MAX_SESSIONS: usize = 256;

/// Age after which an unfinished session is considered orphaned (1h)
pub const DEFAULT_STALE_SESSION_SECS: u64 = 3_600;

/// Form field carrying the target object key
pub const FORM_FIELD_FILENAME: &str = "filename";

/// Form field carrying one file part; repeated once per part
pub const FORM_FIELD_FILE: &str = "file";

/// HTTP header echoing the upload session ID on error responses
pub const HEADER_UPLOAD_ID: &str = "X-Upload-Id";

/// CORS header for allowed origins
pub const CORS_ALLOW_ORIGIN: &str = "*";

/// CORS header for allowed methods
pub const CORS_ALLOW_METHODS: &str = "GET, POST, OPTIONS";

/// CORS header for allowed headers
pub const CORS_ALLOW_HEADERS: &str = "Content-Type";

/// CORS response headers readable by browser clients
pub const CORS_EXPOSE_HEADERS: &str = HEADER_UPLOAD_ID;
