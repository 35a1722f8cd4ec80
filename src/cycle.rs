//! # Cycle Detection
//!
//! Opt-in diagnosis of reference cycles. Counting alone never reclaims a
//! cycle of strong handles; this module finds such cycles on demand so
//! they can be reported and broken, instead of pretending to collect them.
//!
//! ## Contract
//!
//! A participating payload type implements [`Trace`] to report the strong
//! handles it owns, and is registered once with [`register_traceable`]. A
//! [`detect_cycles`] pass walks the reported edges depth-first from a root
//! handle, pinning every block on the current path with a strong unit so
//! the path cannot die mid-walk, and returns the first cycle it closes.
//! Payloads of unregistered types are treated as leaves.
//!
//! ## Controls
//!
//! Detection is off by default; [`set_detection`] arms it. An optional
//! process-wide callback ([`set_cycle_callback`]) observes every reported
//! cycle, e.g. to fail a test or emit a diagnostic.

use std::any::TypeId;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::block::{free_block, ControlBlock};
use crate::strong::Strong;

// ============================================================================
// Tracing contract
// ============================================================================

/// Edge collector handed to [`Trace::trace`].
pub struct Tracer {
    edges: Vec<usize>,
}

impl Tracer {
    fn new() -> Self {
        Self { edges: Vec::new() }
    }

    /// Report one owned strong handle. Empty handles are ignored.
    pub fn visit<T>(&mut self, handle: &Strong<T>) {
        if let Some(block) = handle.raw_block() {
            self.edges.push(block.as_ptr() as usize);
        }
    }

    /// Number of edges reported so far.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("edges", &self.edges.len())
            .finish()
    }
}

/// Reports the strong handles a payload owns.
///
/// Weak handles never keep a payload alive, so they are not part of the
/// contract; only strong edges can close a leaking cycle.
///
/// # Safety
///
/// `trace` must visit only handles actually stored in `self`, and the
/// stored handles must not be structurally replaced by other threads while
/// a detection pass is running. Guarding each stored handle with a lock
/// and taking it inside `trace`, as the payload's accessors already do for
/// ordinary mutation, satisfies this.
pub unsafe trait Trace: 'static {
    /// Visit every strong handle owned by `self`.
    fn trace(&self, tracer: &mut Tracer);
}

type TraceThunk = unsafe fn(*const u8, &mut Tracer);

unsafe fn trace_thunk<T: Trace>(payload: *const u8, tracer: &mut Tracer) {
    (*payload.cast::<T>()).trace(tracer);
}

// ============================================================================
// Trace registry
// ============================================================================

/// Table from payload type to its erased trace function.
///
/// Normally used through the global instance via [`register_traceable`].
pub struct TraceRegistry {
    thunks: RwLock<HashMap<TypeId, TraceThunk>>,
}

impl TraceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            thunks: RwLock::new(HashMap::new()),
        }
    }

    /// Register `T`'s trace function. Re-registration is harmless.
    pub fn register<T: Trace>(&self) {
        self.thunks.write().insert(TypeId::of::<T>(), trace_thunk::<T>);
    }

    /// Whether `T` is registered.
    pub fn contains<T: 'static>(&self) -> bool {
        self.thunks.read().contains_key(&TypeId::of::<T>())
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.thunks.read().len()
    }

    /// Whether no type is registered.
    pub fn is_empty(&self) -> bool {
        self.thunks.read().is_empty()
    }

    fn thunk_for(&self, type_id: TypeId) -> Option<TraceThunk> {
        self.thunks.read().get(&type_id).copied()
    }
}

impl Default for TraceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TraceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceRegistry")
            .field("types", &self.len())
            .finish()
    }
}

/// Global trace registry.
static REGISTRY: OnceLock<TraceRegistry> = OnceLock::new();

fn registry() -> &'static TraceRegistry {
    REGISTRY.get_or_init(TraceRegistry::new)
}

/// Register `T` with the global registry so detection passes can follow
/// its outgoing handles.
pub fn register_traceable<T: Trace>() {
    registry().register::<T>()
}

/// Whether `T` is registered with the global registry.
pub fn is_traceable<T: 'static>() -> bool {
    registry().contains::<T>()
}

// ============================================================================
// Reports and controls
// ============================================================================

/// One detected cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Control block addresses along the cycle; the entry node appears at
    /// both ends.
    pub path: Vec<usize>,
    /// Number of distinct nodes in the cycle.
    pub length: usize,
    /// Rendered path with payload type names, for logs and panics.
    pub description: String,
}

type CycleCallback = Box<dyn Fn(&CycleReport) + Send + Sync>;

/// Whether detection passes actually walk.
static DETECTION: AtomicBool = AtomicBool::new(false);

/// One pass at a time; concurrent callers bail out instead of blocking.
static IN_PROGRESS: AtomicBool = AtomicBool::new(false);

/// Observer notified of every reported cycle.
static CALLBACK: OnceLock<RwLock<Option<CycleCallback>>> = OnceLock::new();

fn callback_slot() -> &'static RwLock<Option<CycleCallback>> {
    CALLBACK.get_or_init(|| RwLock::new(None))
}

/// Arm or disarm detection. While disarmed, [`detect_cycles`] returns
/// `None` without touching the graph.
pub fn set_detection(enabled: bool) {
    DETECTION.store(enabled, Ordering::SeqCst);
}

/// Whether detection is armed.
pub fn detection_enabled() -> bool {
    DETECTION.load(Ordering::SeqCst)
}

/// Install the process-wide cycle observer, replacing any previous one.
pub fn set_cycle_callback<F>(callback: F)
where
    F: Fn(&CycleReport) + Send + Sync + 'static,
{
    *callback_slot().write() = Some(Box::new(callback));
}

/// Remove the process-wide cycle observer.
pub fn clear_cycle_callback() {
    *callback_slot().write() = None;
}

fn notify(report: &CycleReport) {
    if let Some(callback) = &*callback_slot().read() {
        callback(report);
    }
}

// ============================================================================
// Detection
// ============================================================================

/// Strong unit held for the duration of a walk frame.
struct PinnedBlock {
    block: NonNull<ControlBlock>,
}

impl PinnedBlock {
    /// Pin a block by address, failing when its payload is already gone.
    fn acquire(block: NonNull<ControlBlock>) -> Option<Self> {
        if unsafe { block.as_ref() }.try_increment_strong() {
            Some(Self { block })
        } else {
            None
        }
    }

    fn address(&self) -> usize {
        self.block.as_ptr() as usize
    }

    fn block(&self) -> &ControlBlock {
        unsafe { self.block.as_ref() }
    }
}

impl Drop for PinnedBlock {
    fn drop(&mut self) {
        unsafe {
            if self.block.as_ref().decrement_strong() {
                free_block(self.block);
            }
        }
    }
}

/// One node on the depth-first path.
struct Frame {
    pin: PinnedBlock,
    children: Vec<usize>,
    next: usize,
}

/// Releases the single-flight flag even when a trace implementation
/// panics.
struct InProgressGuard;

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        IN_PROGRESS.store(false, Ordering::Release);
    }
}

/// Search for a strong-handle cycle reachable from `root`.
///
/// Returns `None` when detection is disarmed, when another pass is already
/// running, when the root is empty or expired, or when the reachable graph
/// is acyclic. On a hit the report names the first cycle closed by the
/// depth-first walk, and the observer installed with [`set_cycle_callback`]
/// fires once.
///
/// The walk pins every block on its current path with a strong unit, so
/// counts read by other threads can be transiently higher while a pass
/// runs.
pub fn detect_cycles<T>(root: &Strong<T>) -> Option<CycleReport> {
    if !detection_enabled() {
        return None;
    }
    let root_block = root.raw_block()?;
    if IN_PROGRESS
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return None;
    }
    let guard = InProgressGuard;
    let report = walk(root_block);
    drop(guard);

    if let Some(report) = &report {
        notify(report);
    }
    report
}

fn walk(root: NonNull<ControlBlock>) -> Option<CycleReport> {
    let root_pin = PinnedBlock::acquire(root)?;
    let root_address = root_pin.address();
    let root_children = children_of(root_pin.block());

    let mut stack = vec![Frame {
        pin: root_pin,
        children: root_children,
        next: 0,
    }];
    let mut on_path = vec![root_address];
    let mut visited: HashSet<usize> = HashSet::new();

    while let Some(frame) = stack.last_mut() {
        if frame.next >= frame.children.len() {
            visited.insert(frame.pin.address());
            on_path.pop();
            stack.pop();
            continue;
        }

        let child = frame.children[frame.next];
        frame.next += 1;

        if let Some(pos) = on_path.iter().position(|&address| address == child) {
            // Back edge: the path tail from the repeated node is a cycle.
            return Some(build_report(&stack[pos..]));
        }
        if visited.contains(&child) {
            continue;
        }
        let block = match NonNull::new(child as *mut ControlBlock) {
            Some(block) => block,
            None => continue,
        };
        // A child that expired between trace and pin is a leaf.
        let pin = match PinnedBlock::acquire(block) {
            Some(pin) => pin,
            None => continue,
        };
        let children = children_of(pin.block());
        on_path.push(pin.address());
        stack.push(Frame {
            pin,
            children,
            next: 0,
        });
    }
    None
}

/// Outgoing edges of a payload, empty for unregistered or destroyed ones.
fn children_of(block: &ControlBlock) -> Vec<usize> {
    let payload = block.payload_ptr();
    if payload.is_null() {
        return Vec::new();
    }
    match registry().thunk_for(block.tag().type_id()) {
        Some(thunk) => {
            let mut tracer = Tracer::new();
            unsafe { thunk(payload as *const u8, &mut tracer) };
            tracer.edges
        }
        None => Vec::new(),
    }
}

fn build_report(cycle_frames: &[Frame]) -> CycleReport {
    let mut path: Vec<usize> = Vec::with_capacity(cycle_frames.len() + 1);
    let mut rendered: Vec<String> = Vec::with_capacity(cycle_frames.len() + 1);
    for frame in cycle_frames {
        path.push(frame.pin.address());
        rendered.push(format!(
            "{:#x} ({})",
            frame.pin.address(),
            frame.pin.block().tag().type_name()
        ));
    }
    path.push(path[0]);
    let entry = rendered[0].clone();
    rendered.push(entry);

    let length = path.len() - 1;
    let description = format!(
        "reference cycle of {} node(s): {}",
        length,
        rendered.join(" -> ")
    );
    CycleReport {
        path,
        length,
        description,
    }
}
