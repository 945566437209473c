/*!
 * Queued Synchronization Framework
 *
 * Building blocks for blocking primitives that share one acquire/release
 * engine:
 * - `StateCell`: the atomic state word (32 or 64 bit)
 * - `SyncQueue`: lock-free FIFO of parked threads with cancellation
 * - `Synchronizer`: exclusive/shared acquire and release, plain,
 *   interruptible or timed
 * - `Condition`: wait/signal queues bound to an exclusive synchronizer
 * - `Policy`: the hooks a primitive implements to give the state meaning
 *
 * # Architecture
 *
 * A primitive only decides *whether* an acquisition may succeed. Queueing,
 * parking, cancellation, and wake-up propagation live in the synchronizer.
 *
 * # Performance
 *
 * - Uncontended paths are a single CAS, no allocation
 * - Queue nodes are allocated only on contention
 * - Bounded spinning for the head successor before parking
 */

mod condition;
mod config;
mod metrics;
mod node;
pub mod park;
mod policy;
mod queue;
mod state;
mod synchronizer;

pub use condition::{Condition, WaitTimeoutResult};
pub use config::SyncConfig;
pub use metrics::SyncMetricsSnapshot;
pub use node::Mode;
pub use park::{Waiter, WaiterThread};
pub use policy::{Policy, SharedAcquire};
pub use state::{StateCell, StateWord};
pub use synchronizer::Synchronizer;
