//! # Allocation Ledger
//!
//! Process-wide table from payload address to allocation metadata, used for
//! leak auditing and statistics. The counting core consults it on every
//! construction and destruction, but when tracking is disabled those calls
//! return after one atomic load, so the ledger stays off the hot path.
//!
//! ## Lifecycle
//!
//! The global instance is created at first use and lives for the process.
//! All table access goes through one mutex; tracking and strict-leak flags
//! are atomics checked before the lock is taken.
//!
//! ## Strict mode
//!
//! [`check_leaks`] reports outstanding entries to the configured sink. With
//! [`set_leak_fatal`] armed it panics with the report instead, for test
//! teardown that demands zero leaks.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::Write;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;

// ============================================================================
// Allocation metadata
// ============================================================================

/// Metadata recorded for one live allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    /// Payload address.
    pub address: usize,
    /// Payload size in bytes.
    pub size: usize,
    /// Concrete payload type name.
    pub type_name: &'static str,
    /// Source location of the factory call that allocated it.
    pub location: &'static Location<'static>,
}

impl AllocationInfo {
    /// Create an entry for a payload at `address`.
    pub fn new(
        address: usize,
        size: usize,
        type_name: &'static str,
        location: &'static Location<'static>,
    ) -> Self {
        Self {
            address,
            size,
            type_name,
            location,
        }
    }
}

/// Per-type slice of the ledger statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeStats {
    /// Live allocations of this type.
    pub count: usize,
    /// Bytes held by this type.
    pub bytes: usize,
}

/// Aggregate statistics over live allocations.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerStats {
    /// Number of live allocations.
    pub allocation_count: usize,
    /// Total bytes across live allocations.
    pub total_bytes: usize,
    /// Largest single allocation in bytes (0 when empty).
    pub largest: usize,
    /// Smallest single allocation in bytes (0 when empty).
    pub smallest: usize,
    /// Mean allocation size in bytes (0.0 when empty).
    pub average: f64,
    /// Breakdown keyed by payload type name.
    pub by_type: HashMap<&'static str, TypeStats>,
}

// ============================================================================
// Ledger
// ============================================================================

/// Destination for leak reports.
enum LeakSink {
    Stderr,
    Writer(Box<dyn Write + Send>),
}

/// Address-keyed allocation table with audit and statistics queries.
///
/// Normally used through the global instance (see [`ledger`]); independent
/// instances exist for tests that need exact counts in isolation.
pub struct AllocationLedger {
    entries: Mutex<HashMap<usize, AllocationInfo>>,
    sink: Mutex<LeakSink>,
    tracking: AtomicBool,
    leak_fatal: AtomicBool,
}

impl AllocationLedger {
    /// Create an empty ledger with tracking disabled.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            sink: Mutex::new(LeakSink::Stderr),
            tracking: AtomicBool::new(false),
            leak_fatal: AtomicBool::new(false),
        }
    }

    /// Enable or disable tracking. While disabled, `track` and `untrack`
    /// are free no-ops; existing entries are kept.
    pub fn set_tracking(&self, enabled: bool) {
        self.tracking.store(enabled, Ordering::SeqCst);
    }

    /// Whether tracking is enabled.
    pub fn tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }

    /// Arm or disarm strict mode: with it armed, [`Self::check_leaks`]
    /// panics when any entry remains.
    pub fn set_leak_fatal(&self, fatal: bool) {
        self.leak_fatal.store(fatal, Ordering::SeqCst);
    }

    /// Whether strict mode is armed.
    pub fn leak_fatal(&self) -> bool {
        self.leak_fatal.load(Ordering::SeqCst)
    }

    /// Route leak reports to a caller-supplied writer.
    pub fn set_leak_sink(&self, writer: Box<dyn Write + Send>) {
        *self.sink.lock() = LeakSink::Writer(writer);
    }

    /// Record an allocation. Overwrites a stale entry at a reused address.
    pub fn track(&self, info: AllocationInfo) {
        if !self.tracking() {
            return;
        }
        self.entries.lock().insert(info.address, info);
    }

    /// Remove an allocation. Idempotent: an absent address is a silent
    /// no-op, which legitimately happens when tracking was toggled on or
    /// off mid-lifetime.
    pub fn untrack(&self, address: usize) {
        if !self.tracking() {
            return;
        }
        self.entries.lock().remove(&address);
    }

    /// Whether an address is currently recorded.
    pub fn contains(&self, address: usize) -> bool {
        self.entries.lock().contains_key(&address)
    }

    /// Number of live entries.
    pub fn allocation_count(&self) -> usize {
        self.entries.lock().len()
    }

    /// Total bytes across live entries.
    pub fn total_bytes(&self) -> usize {
        self.entries.lock().values().map(|info| info.size).sum()
    }

    /// Copy of all live entries.
    pub fn snapshot(&self) -> Vec<AllocationInfo> {
        self.entries.lock().values().copied().collect()
    }

    /// Live entries whose payload type name matches `type_name` exactly.
    pub fn allocations_of_type(&self, type_name: &str) -> Vec<AllocationInfo> {
        self.entries
            .lock()
            .values()
            .filter(|info| info.type_name == type_name)
            .copied()
            .collect()
    }

    /// Live entries whose payload type is `T`.
    pub fn allocations_of<T: 'static>(&self) -> Vec<AllocationInfo> {
        self.allocations_of_type(std::any::type_name::<T>())
    }

    /// Aggregate statistics over live entries.
    pub fn statistics(&self) -> LedgerStats {
        let entries = self.entries.lock();
        let allocation_count = entries.len();
        let total_bytes: usize = entries.values().map(|info| info.size).sum();
        let largest = entries.values().map(|info| info.size).max().unwrap_or(0);
        let smallest = entries.values().map(|info| info.size).min().unwrap_or(0);
        let average = if allocation_count > 0 {
            total_bytes as f64 / allocation_count as f64
        } else {
            0.0
        };

        let mut by_type: HashMap<&'static str, TypeStats> = HashMap::new();
        for info in entries.values() {
            let slot = by_type.entry(info.type_name).or_default();
            slot.count += 1;
            slot.bytes += info.size;
        }

        LedgerStats {
            allocation_count,
            total_bytes,
            largest,
            smallest,
            average,
            by_type,
        }
    }

    /// Human-readable dump of the aggregate statistics.
    pub fn write_statistics(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        let stats = self.statistics();
        writeln!(writer, "allocation statistics:")?;
        writeln!(writer, "  live allocations: {}", stats.allocation_count)?;
        writeln!(writer, "  total bytes:      {}", stats.total_bytes)?;
        writeln!(writer, "  largest:          {} bytes", stats.largest)?;
        writeln!(writer, "  smallest:         {} bytes", stats.smallest)?;
        writeln!(writer, "  average:          {:.1} bytes", stats.average)?;
        let mut types: Vec<_> = stats.by_type.iter().collect();
        types.sort_by_key(|(name, _)| *name);
        for (name, slice) in types {
            writeln!(
                writer,
                "  {}: {} allocation(s), {} byte(s)",
                name, slice.count, slice.bytes
            )?;
        }
        Ok(())
    }

    /// Human-readable enumeration of every live entry.
    pub fn leak_report(&self) -> String {
        let entries = self.entries.lock();
        let total: usize = entries.values().map(|info| info.size).sum();
        let mut report = String::new();
        let _ = writeln!(
            report,
            "{} outstanding allocation(s), {} byte(s):",
            entries.len(),
            total
        );
        let mut sorted: Vec<_> = entries.values().collect();
        sorted.sort_by_key(|info| info.address);
        for info in sorted {
            let _ = writeln!(
                report,
                "  {:#x}: {} bytes, {}, allocated at {}",
                info.address, info.size, info.type_name, info.location
            );
        }
        report
    }

    /// Audit for leaks: returns the number of outstanding entries, writing
    /// the report to the configured sink when any remain. With strict mode
    /// armed, panics with the report instead.
    pub fn check_leaks(&self) -> usize {
        let count = self.allocation_count();
        if count == 0 {
            return 0;
        }
        let report = self.leak_report();
        if self.leak_fatal() {
            panic!("{}", report);
        }
        match &mut *self.sink.lock() {
            LeakSink::Stderr => {
                let _ = write!(std::io::stderr(), "{}", report);
            }
            LeakSink::Writer(writer) => {
                let _ = write!(writer, "{}", report);
            }
        }
        count
    }

    /// Drop every entry (test harness reset).
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for AllocationLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AllocationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationLedger")
            .field("entries", &self.allocation_count())
            .field("tracking", &self.tracking())
            .field("leak_fatal", &self.leak_fatal())
            .finish()
    }
}

// ============================================================================
// Global instance
// ============================================================================

/// Global ledger instance.
static LEDGER: OnceLock<AllocationLedger> = OnceLock::new();

/// Get the global allocation ledger.
pub fn ledger() -> &'static AllocationLedger {
    LEDGER.get_or_init(AllocationLedger::new)
}

/// Enable or disable tracking on the global ledger.
pub fn set_tracking(enabled: bool) {
    ledger().set_tracking(enabled)
}

/// Whether global tracking is enabled.
pub fn tracking() -> bool {
    ledger().tracking()
}

/// Arm or disarm strict leak mode on the global ledger.
pub fn set_leak_fatal(fatal: bool) {
    ledger().set_leak_fatal(fatal)
}

/// Route global leak reports to a caller-supplied writer.
pub fn set_leak_sink(writer: Box<dyn Write + Send>) {
    ledger().set_leak_sink(writer)
}

/// Record an allocation in the global ledger.
pub fn track(info: AllocationInfo) {
    ledger().track(info)
}

/// Remove an allocation from the global ledger (idempotent).
pub fn untrack(address: usize) {
    ledger().untrack(address)
}

/// Number of live entries in the global ledger.
pub fn allocation_count() -> usize {
    ledger().allocation_count()
}

/// Total bytes across live entries in the global ledger.
pub fn total_allocated_bytes() -> usize {
    ledger().total_bytes()
}

/// Aggregate statistics over the global ledger.
pub fn statistics() -> LedgerStats {
    ledger().statistics()
}

/// Leak report for the global ledger.
pub fn leak_report() -> String {
    ledger().leak_report()
}

/// Audit the global ledger for leaks.
pub fn check_leaks() -> usize {
    ledger().check_leaks()
}

/// Drop every entry in the global ledger (test harness reset).
pub fn clear() {
    ledger().clear()
}

/// Runs a leak audit on the global ledger when dropped.
///
/// Place one at the top of a scope that must end with zero live
/// allocations; combine with [`set_leak_fatal`] to turn any remainder into
/// a panic.
#[derive(Debug, Default)]
pub struct LeakCheckGuard {
    _private: (),
}

impl LeakCheckGuard {
    /// Create a guard auditing the global ledger on drop.
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Drop for LeakCheckGuard {
    fn drop(&mut self) {
        check_leaks();
    }
}
