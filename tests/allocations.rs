use std::alloc::{GlobalAlloc, Layout, System};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use spa_rs::{compile_sparse, sparse_project, SolveStatus, SpaOptions};

/// Counts allocated bytes and refuses any single allocation of at least
/// `FAIL_AT` bytes.
struct CountingAlloc;

static ALLOC_TOTAL: AtomicUsize = AtomicUsize::new(0);
static FAIL_AT: AtomicUsize = AtomicUsize::new(usize::MAX);

// Tests in this file observe process-wide allocator state.
static SERIAL: Mutex<()> = Mutex::new(());

#[global_allocator]
static GLOBAL: CountingAlloc = CountingAlloc;

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() >= FAIL_AT.load(Ordering::SeqCst) {
            return ptr::null_mut();
        }
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            ALLOC_TOTAL.fetch_add(layout.size(), Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.size() >= FAIL_AT.load(Ordering::SeqCst) {
            return ptr::null_mut();
        }
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            ALLOC_TOTAL.fetch_add(layout.size(), Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe {
            System.dealloc(ptr, layout);
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if new_size >= FAIL_AT.load(Ordering::SeqCst) {
            return ptr::null_mut();
        }
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            ALLOC_TOTAL.fetch_add(new_size, Ordering::Relaxed);
        }
        new_ptr
    }
}

fn reset_alloc_counter() {
    ALLOC_TOTAL.store(0, Ordering::SeqCst);
}

fn allocated_bytes() -> usize {
    ALLOC_TOTAL.load(Ordering::SeqCst)
}

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Makes every allocation of at least `bytes` fail until dropped.
struct FailLargeAllocations;

impl FailLargeAllocations {
    fn at(bytes: usize) -> Self {
        FAIL_AT.store(bytes, Ordering::SeqCst);
        Self
    }
}

impl Drop for FailLargeAllocations {
    fn drop(&mut self) {
        FAIL_AT.store(usize::MAX, Ordering::SeqCst);
    }
}

const LIMIT: usize = 1 << 18;

/// Many copies of `x1 + x2 <= 1` over two variables, so per-row storage is far
/// larger than anything sized by the variable count.
fn tall_system(nrows: usize) -> (Vec<(usize, usize, f64)>, Vec<f64>) {
    let mut triplets = Vec::with_capacity(2 * nrows);
    for row in 1..=nrows {
        triplets.push((row, 1, 1.0));
        triplets.push((row, 2, 1.0));
    }
    (triplets, vec![1.0; nrows])
}

#[test]
fn workspace_allocation_failure_returns_start_point() {
    let _serial = serial();
    let (triplets, b) = tall_system(100_000);
    let handle = compile_sparse(&triplets, &b, 0).unwrap();
    let x0 = [3.0, 4.0];

    let result = {
        let _fail = FailLargeAllocations::at(LIMIT);
        handle.solve(&x0, None, &SpaOptions::default())
    }
    .unwrap();

    assert_eq!(result.status, SolveStatus::AllocationFailed);
    assert_eq!(result.status.code(), 1);
    assert_eq!(result.iterations, 0);
    assert_eq!(result.x, x0.to_vec());
    assert_eq!(result.tol, 6.0);
    assert_eq!(result.objective, 0.0);

    // The same handle solves once memory is available again.
    let result = handle.solve(&x0, None, &SpaOptions::default()).unwrap();
    assert_eq!(result.status, SolveStatus::Converged);
}

#[test]
fn restriction_allocation_failure_returns_start_point() {
    let _serial = serial();
    let (triplets, b) = tall_system(100_000);
    let x0 = [3.0, 4.0];
    let w = [1.0, 2.0];

    let result = {
        let _fail = FailLargeAllocations::at(LIMIT);
        sparse_project(&x0, &triplets, &b, 0, Some(&w), &SpaOptions::default())
    }
    .unwrap();

    assert_eq!(result.status, SolveStatus::AllocationFailed);
    assert_eq!(result.status.code(), 1);
    assert_eq!(result.iterations, 0);
    assert_eq!(result.x, x0.to_vec());
    assert!(result.tol.is_infinite());
    assert!(!result.is_converged());
}

#[test]
fn solve_memory_is_independent_of_pass_count() {
    let _serial = serial();
    // x_j <= x_{j+1} for a chain of n variables, started in decreasing order.
    let n = 2_000;
    let mut triplets = Vec::with_capacity(2 * (n - 1));
    for row in 1..n {
        triplets.push((row, row, 1.0));
        triplets.push((row, row + 1, -1.0));
    }
    let b = vec![0.0; n - 1];
    let handle = compile_sparse(&triplets, &b, 0).unwrap();
    let x: Vec<f64> = (0..n).map(|j| (n - j) as f64).collect();

    let mut measured = Vec::new();
    for max_iter in [5, 50] {
        let options = SpaOptions {
            max_iter,
            ..SpaOptions::default()
        };
        reset_alloc_counter();
        let result = handle.solve(&x, None, &options).unwrap();
        measured.push(allocated_bytes());
        assert_eq!(result.status, SolveStatus::IterationLimit);
        assert_eq!(result.iterations, max_iter);
    }

    // The estimate plus one denominator per row.
    let expected = 8 * (n + (n - 1));
    for &alloc in &measured {
        assert!(alloc <= expected + 4_096, "allocations too high: {alloc}");
    }
    assert_eq!(measured[0], measured[1]);
}
