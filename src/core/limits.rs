/*!
 * Synchronizer Limits and Constants
 *
 * Centralized location for the limits, thresholds, and magic numbers used by
 * the queued synchronizer and the primitives built on it.
 *
 * ## Conventions
 * - Values are grouped by domain (queue, spinning, primitives)
 * - Performance-critical constants are marked with [PERF]
 * - Values fixed by an external contract are marked with [CONTRACT]
 */

// =============================================================================
// NODE STATUS BITS
// =============================================================================

/// Node is parked (or about to park) and must be unparked by its predecessor
pub const NODE_WAITING: i32 = 1;

/// Node sits on a condition queue and has not been signalled yet
pub const NODE_COND: i32 = 2;

/// A shared release observed this head; the next shared acquirer must propagate
pub const NODE_PROPAGATE: i32 = 4;

/// Node abandoned its acquisition (interrupt or timeout); any negative status
pub const NODE_CANCELLED: i32 = i32::MIN;

// =============================================================================
// SPINNING
// =============================================================================

/// Upper bound for the exponential re-wait spin of the head successor
/// [PERF] Mirrors a byte-sized spin counter; more spinning burns CPU on long holds
pub const DEFAULT_MAX_SPINS: u32 = 255;

/// Spin bound for latency-sensitive synchronizers
/// [PERF] Roughly a microsecond on current hardware before parking again
pub const LOW_LATENCY_MAX_SPINS: u32 = 1023;

// =============================================================================
// READ-WRITE LOCK STATE LAYOUT
// =============================================================================

/// Bits of the state word holding the shared (read) hold count
/// [CONTRACT] Upper 16 bits shared, lower 16 bits exclusive
pub const RW_SHARED_SHIFT: u32 = 16;

/// Increment applied to the state word for one read hold
pub const RW_SHARED_UNIT: i32 = 1 << RW_SHARED_SHIFT;

/// Maximum read or write hold count
pub const RW_MAX_COUNT: i32 = (1 << RW_SHARED_SHIFT) - 1;

/// Mask extracting the exclusive (write) hold count
pub const RW_EXCLUSIVE_MASK: i32 = (1 << RW_SHARED_SHIFT) - 1;

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Overrides `SyncConfig::max_spins`
pub const ENV_MAX_SPINS: &str = "SYNC_MAX_SPINS";

/// Enables or disables per-synchronizer metrics ("0"/"false" disables)
pub const ENV_METRICS: &str = "SYNC_METRICS";

/// Switches tracing output to JSON
pub const ENV_TRACE_JSON: &str = "SYNC_TRACE_JSON";

/// Thread count for the stress binary
pub const ENV_STRESS_THREADS: &str = "SYNC_STRESS_THREADS";

/// Per-thread iteration count for the stress binary
pub const ENV_STRESS_ITERATIONS: &str = "SYNC_STRESS_ITERATIONS";

// =============================================================================
// MONITORING
// =============================================================================

/// Scenarios slower than this are logged at warn level
pub const SLOW_SCENARIO_MS: u128 = 1_000;

/// Default worker threads per stress scenario
pub const DEFAULT_STRESS_THREADS: usize = 8;

/// Default iterations per stress worker
pub const DEFAULT_STRESS_ITERATIONS: u64 = 10_000;
