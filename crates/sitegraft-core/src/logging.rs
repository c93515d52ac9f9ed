//! Structured logging schema and field name constants.
//!
//! All crates use these constants for consistent structured logging fields
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Run-fatal failures (connection, configuration) |
//! | WARN  | Recoverable issue: row skipped, parent flattened, file missing |
//! | INFO  | Run lifecycle, per-chunk completions, summaries |
//! | DEBUG | Decision points: write-mode gates, dedup hits, order choices |
//! | TRACE | Per-row iteration, per-URL rewrites |

/// Subsystem originating the log event.
/// Values: "db", "engine", "crypto"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "entry_query", "terms", "media", "import"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "fetch_rows", "import_terms", "resolve", "run_import"
pub const OPERATION: &str = "op";

/// Monotonic run identifier stamped on touched entities.
pub const RUN_ID: &str = "run_id";

/// Remote tenant being read.
pub const TENANT: &str = "tenant";

/// Remote source id of the row/term/user being processed.
pub const SOURCE_ID: &str = "source_id";

/// Local id resolved or created for the current entity.
pub const LOCAL_ID: &str = "local_id";

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of rows returned by a fetch.
pub const ROW_COUNT: &str = "row_count";

/// Number of entities in the current chunk.
pub const CHUNK_SIZE: &str = "chunk_size";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
