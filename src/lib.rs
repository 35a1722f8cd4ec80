//! # Strand
//!
//! Reference-counted ownership with explicit controls:
//!
//! - **Strong handles**: owning, cloneable references; the last one to go
//!   destroys the payload
//! - **Weak handles**: non-owning observers with race-free promotion
//! - **Allocation ledger**: opt-in leak auditing and statistics
//! - **Casts**: tag-checked and unchecked views sharing one allocation
//! - **Arc bridging**: co-ownership across the `std::sync::Arc` boundary
//! - **Cycle detection**: opt-in, trace-based search for strong cycles
//!
//! ## Counting model
//!
//! Every managed payload is paired with a control block holding atomic
//! strong and weak counters plus the runtime type tag recorded at
//! allocation. The strong decrement that observes the last unit destroys
//! the payload; the block itself lives until the weak side lets go too, so
//! expired weak handles stay safe to query.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          STRAND                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐           │
//! │  │   Strong   │   │    Weak    │   │   Bridge   │           │
//! │  │ (strong.rs)│   │  (weak.rs) │   │ (bridge.rs)│           │
//! │  └────────────┘   └────────────┘   └────────────┘           │
//! │        │                │                │                  │
//! │        └────────────────┼────────────────┘                  │
//! │                         │                                   │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐           │
//! │  │   Block    │   │   Ledger   │   │   Cycle    │           │
//! │  │ (block.rs) │   │ (ledger.rs)│   │ (cycle.rs) │           │
//! │  └────────────┘   └────────────┘   └────────────┘           │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use strand::make_strong;
//!
//! let answer = make_strong(42u32);
//! assert_eq!(*answer, 42);
//! assert_eq!(answer.strong_count(), 1);
//!
//! let observer = answer.downgrade();
//! let shared = answer.clone();
//! assert_eq!(shared.strong_count(), 2);
//!
//! drop(shared);
//! drop(answer);
//! assert!(observer.expired());
//! assert!(observer.lock().is_empty());
//! ```
//!
//! ## Diagnostics
//!
//! Lifecycle logging, ledger tracking, strict leak checks, and cycle
//! detection are all off by default; see [`config`] for the programmatic
//! switches and the `STRAND_*` environment variables.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod alloc;
pub mod block;
pub mod bridge;
pub mod config;
pub mod cycle;
pub mod ledger;
pub mod log;
pub mod strong;
pub mod weak;

mod cast;

// Re-exports
pub use alloc::{Allocator, DefaultAllocator};
pub use block::{ControlBlock, TypeTag};
pub use bridge::{adopt_external, from_arc, to_arc, Bridged};
pub use config::{init_from_env, Config};
pub use cycle::{detect_cycles, register_traceable, CycleReport, Trace, Tracer};
pub use ledger::{AllocationInfo, AllocationLedger, LeakCheckGuard, LedgerStats, TypeStats};
pub use strong::{make_strong, make_strong_with, Strong};
pub use weak::Weak;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
