//! RustyXSLT - XSLT 1.0 transforms for Elixir
//!
//! Operations:
//! - parse_document: XML text -> document handle
//! - compile_stylesheet: XSLT text -> stylesheet handle
//! - transform: stylesheet + document + params -> output text
//!
//! Handles are registry tokens wrapped in ResourceArc; the native resource
//! is released exactly once, when the host collects the handle.

use rustler::{Binary, Env, ResourceArc, Term};

mod api;
mod dom;
mod error;
mod lifecycle;
mod marshal;
mod resource;
mod term;
mod xpath;
mod xslt;

use error::XsltError;
use resource::{DocumentRef, StylesheetRef};
use term::{decode_params, error_term, handle_counts_term, ok_term, str_to_binary};

// ============================================================================
// Allocator Configuration
// ============================================================================

#[cfg(feature = "memory_tracking")]
mod tracking {
    use std::alloc::{GlobalAlloc, Layout};
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
    pub static PEAK_ALLOCATED: AtomicUsize = AtomicUsize::new(0);

    pub struct TrackingAllocator;

    #[cfg(feature = "mimalloc")]
    static UNDERLYING: mimalloc::MiMalloc = mimalloc::MiMalloc;

    #[cfg(not(feature = "mimalloc"))]
    static UNDERLYING: std::alloc::System = std::alloc::System;

    unsafe impl GlobalAlloc for TrackingAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            let ptr = UNDERLYING.alloc(layout);
            if !ptr.is_null() {
                let current = ALLOCATED.fetch_add(layout.size(), Ordering::Relaxed) + layout.size();
                let mut peak = PEAK_ALLOCATED.load(Ordering::Relaxed);
                while current > peak {
                    match PEAK_ALLOCATED.compare_exchange_weak(
                        peak,
                        current,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(p) => peak = p,
                    }
                }
            }
            ptr
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            ALLOCATED.fetch_sub(layout.size(), Ordering::Relaxed);
            UNDERLYING.dealloc(ptr, layout)
        }
    }
}

#[cfg(feature = "memory_tracking")]
#[global_allocator]
static GLOBAL: tracking::TrackingAllocator = tracking::TrackingAllocator;

#[cfg(all(feature = "mimalloc", not(feature = "memory_tracking")))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// ============================================================================
// Memory Tracking NIFs
// ============================================================================

#[cfg(feature = "memory_tracking")]
use std::sync::atomic::Ordering;

#[cfg(feature = "memory_tracking")]
#[rustler::nif]
fn get_rust_memory() -> usize {
    tracking::ALLOCATED.load(Ordering::SeqCst)
}

#[cfg(feature = "memory_tracking")]
#[rustler::nif]
fn get_rust_memory_peak() -> usize {
    tracking::PEAK_ALLOCATED.load(Ordering::SeqCst)
}

#[cfg(feature = "memory_tracking")]
#[rustler::nif]
fn reset_rust_memory_stats() -> (usize, usize) {
    let current = tracking::ALLOCATED.load(Ordering::SeqCst);
    let peak = tracking::PEAK_ALLOCATED.swap(current, Ordering::SeqCst);
    (current, peak)
}

#[cfg(not(feature = "memory_tracking"))]
#[rustler::nif]
fn get_rust_memory() -> usize {
    0
}

#[cfg(not(feature = "memory_tracking"))]
#[rustler::nif]
fn get_rust_memory_peak() -> usize {
    0
}

#[cfg(not(feature = "memory_tracking"))]
#[rustler::nif]
fn reset_rust_memory_stats() -> (usize, usize) {
    (0, 0)
}

// ============================================================================
// XSLT Operations
// ============================================================================

/// Parse XML into a document handle: `{:ok, ref}` or `{:error, {kind, msg}}`
#[rustler::nif(schedule = "DirtyCpu")]
fn parse_document<'a>(env: Env<'a>, input: Term<'a>) -> Term<'a> {
    let Ok(input) = input.decode::<Binary>() else {
        return error_term(env, &XsltError::invalid_argument("document source must be a binary"));
    };
    match api::parse_document(input.as_slice()) {
        Ok(resource) => ok_term(env, ResourceArc::new(resource)),
        Err(e) => error_term(env, &e),
    }
}

/// Parse and compile a stylesheet into a stylesheet handle
#[rustler::nif(schedule = "DirtyCpu")]
fn compile_stylesheet<'a>(env: Env<'a>, input: Term<'a>) -> Term<'a> {
    let Ok(input) = input.decode::<Binary>() else {
        return error_term(env, &XsltError::invalid_argument("stylesheet source must be a binary"));
    };
    match api::compile_stylesheet(input.as_slice()) {
        Ok(resource) => ok_term(env, ResourceArc::new(resource)),
        Err(e) => error_term(env, &e),
    }
}

/// Apply a stylesheet to a document with a flat `[name, value, ...]` list
#[rustler::nif(schedule = "DirtyCpu")]
fn transform<'a>(env: Env<'a>, stylesheet: Term<'a>, document: Term<'a>, params: Term<'a>) -> Term<'a> {
    let Ok(stylesheet) = stylesheet.decode::<StylesheetRef>() else {
        return error_term(env, &XsltError::invalid_argument("expected a stylesheet handle"));
    };
    let Ok(document) = document.decode::<DocumentRef>() else {
        return error_term(env, &XsltError::invalid_argument("expected a document handle"));
    };
    let params = match decode_params(params) {
        Ok(params) => params,
        Err(e) => return error_term(env, &e),
    };

    match api::transform(&stylesheet, &document, &params) {
        Ok(output) => ok_term(env, str_to_binary(env, &output)),
        Err(e) => error_term(env, &e),
    }
}

/// Live/registered/released counters for both handle registries
#[rustler::nif]
fn handle_counts<'a>(env: Env<'a>) -> Term<'a> {
    handle_counts_term(env, api::handle_counts())
}

// ============================================================================
// NIF Initialization
// ============================================================================

fn load(_env: Env, _info: Term) -> bool {
    log::debug!("rustyxslt loaded");
    true
}

rustler::init!("Elixir.RustyXSLT.Native", load = load);
