//! Quartz Core -- a deterministic redstone simulation kernel.
//!
//! Given the same world state and the same inputs, every run produces the
//! same state transitions in the same order. The crate supplies the
//! ordering, buffering, network compression and power propagation pieces a
//! host game needs to drive redstone off its own tick loop.
//!
//! # Pass Pipeline
//!
//! Each call to [`kernel::Kernel::step`] runs one tick:
//!
//! 1. **Drain** -- Move the tick's wheel bucket into the micro heap.
//! 2. **Run** -- Pop events in key order and hand each to the caller's
//!    handler with a [`adapter::ComponentContext`] over a fresh overlay.
//! 3. **Commit** -- Apply the overlay atomically to the [`shadow::BackingStore`].
//! 4. **Route** -- Turn committed tick requests into future scheduler events.
//! 5. **Bookkeeping** -- Clear container snapshots and advance the tick.
//!
//! # Key Types
//!
//! - [`key::OrderingKey`] -- Total order over all scheduled work:
//!   tick, micro phase, region, then packed position and kind.
//! - [`scheduler::TickWheelScheduler`] -- Tick wheel plus micro heap.
//! - [`shadow::ShadowOverlay`] -- Sectioned write buffer with atomic commit
//!   and rollback.
//! - [`dust::csr::DustCsrBuilder`] -- Compresses conductor runs into a CSR
//!   graph.
//! - [`dust::propagator::CpuDustPropagator`] -- Bucketed power settle over
//!   that graph.
//! - [`adapter::ComponentAdapter`] -- Standard, snapshotting, pulse and
//!   mover wrappers around component logic.
//! - [`engine::SimulationEngine`] -- Coarse network simulation over a
//!   [`network::RedstoneNetwork`].

pub mod adapter;
pub mod component;
pub mod config;
pub mod dust;
pub mod engine;
pub mod event;
pub mod id;
pub mod kernel;
pub mod key;
pub mod network;
pub mod pos;
pub mod power;
pub mod profiling;
pub mod router;
pub mod scheduler;
pub mod shadow;
pub mod sim;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
