//! Point enumeration over ISL sets.
//!
//! The generated `isl_rs` bindings cover the set and relation algebra this
//! crate needs, but not the callback-driven `foreach` entry points. This
//! module bridges that gap with direct FFI declarations and a closure
//! trampoline, following the same ownership conventions as the rest of the
//! bindings: every handle carries `ptr` plus `should_free_on_drop`, and a
//! point handed to the callback is owned by the callee.
//!
//! Visitors return [`Visit`] to either continue or stop the enumeration
//! early. A stopped enumeration is not an error; once a visitor has found
//! what it was looking for the remaining points are never materialized.

use isl_rs::{Point, Set, UnionSet};
use libc::uintptr_t;
use std::os::raw::c_void;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Continuation decision of a point visitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// Errors surfaced by the enumeration entry points.
#[derive(Debug, Error)]
pub enum FacadeError {
    /// The underlying library reported a failure while enumerating points.
    #[error("point enumeration failed: {0}")]
    Enumeration(String),

    /// A visitor closure panicked; the panic is contained at the FFI
    /// boundary and reported as an error instead.
    #[error("point visitor panicked: {0}")]
    VisitorPanic(String),
}

extern "C" {
    fn isl_set_foreach_point(
        set: uintptr_t,
        func: unsafe extern "C" fn(uintptr_t, *mut c_void) -> i32,
        user: *mut c_void,
    ) -> i32;

    fn isl_union_set_foreach_point(
        uset: uintptr_t,
        func: unsafe extern "C" fn(uintptr_t, *mut c_void) -> i32,
        user: *mut c_void,
    ) -> i32;
}

const STAT_OK: i32 = 0;
const STAT_ERROR: i32 = -1;

struct VisitorState<'a> {
    visitor: &'a mut dyn FnMut(Point) -> Result<Visit, FacadeError>,
    stopped: bool,
    failure: Option<FacadeError>,
}

/// Trampoline invoked by ISL once per point. The point is `__isl_take`, so
/// wrapping it with `should_free_on_drop` hands its release to Rust.
unsafe extern "C" fn point_callback(point: uintptr_t, user: *mut c_void) -> i32 {
    let state = &mut *(user as *mut VisitorState);
    let point = Point {
        ptr: point,
        should_free_on_drop: true,
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| (state.visitor)(point)));

    match outcome {
        Ok(Ok(Visit::Continue)) => STAT_OK,
        Ok(Ok(Visit::Stop)) => {
            state.stopped = true;
            STAT_ERROR
        }
        Ok(Err(failure)) => {
            state.failure = Some(failure);
            STAT_ERROR
        }
        Err(payload) => {
            state.failure = Some(FacadeError::VisitorPanic(panic_message(&payload)));
            STAT_ERROR
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn finish(rc: i32, state: VisitorState) -> Result<(), FacadeError> {
    if let Some(failure) = state.failure {
        return Err(failure);
    }
    if rc < 0 && !state.stopped {
        return Err(FacadeError::Enumeration(
            "the library aborted the enumeration".to_string(),
        ));
    }
    Ok(())
}

/// Invokes `visitor` for every integer point of `set`.
///
/// The set must be bounded; enumeration of an unbounded set is reported as
/// an error by the library itself.
pub fn for_each_point<F>(set: &Set, mut visitor: F) -> Result<(), FacadeError>
where
    F: FnMut(Point) -> Result<Visit, FacadeError>,
{
    let mut state = VisitorState {
        visitor: &mut visitor,
        stopped: false,
        failure: None,
    };
    let rc = unsafe {
        isl_set_foreach_point(
            set.ptr,
            point_callback,
            &mut state as *mut VisitorState as *mut c_void,
        )
    };
    finish(rc, state)
}

/// Invokes `visitor` for every integer point of `uset`.
pub fn for_each_union_point<F>(uset: &UnionSet, mut visitor: F) -> Result<(), FacadeError>
where
    F: FnMut(Point) -> Result<Visit, FacadeError>,
{
    let mut state = VisitorState {
        visitor: &mut visitor,
        stopped: false,
        failure: None,
    };
    let rc = unsafe {
        isl_union_set_foreach_point(
            uset.ptr,
            point_callback,
            &mut state as *mut VisitorState as *mut c_void,
        )
    };
    finish(rc, state)
}

/// Number of integer points in `set`, counted by enumeration.
pub fn point_count(set: &Set) -> Result<u64, FacadeError> {
    let mut count = 0u64;
    for_each_point(set, |_| {
        count += 1;
        Ok(Visit::Continue)
    })?;
    Ok(count)
}

/// Number of integer points in `uset`, counted by enumeration.
pub fn union_point_count(uset: &UnionSet) -> Result<u64, FacadeError> {
    let mut count = 0u64;
    for_each_union_point(uset, |_| {
        count += 1;
        Ok(Visit::Continue)
    })?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use isl_rs::Context;

    #[test]
    fn counts_points_of_a_bounded_set() {
        let ctx = Context::alloc();
        let set = Set::read_from_str(&ctx, "{ [i] : 0 <= i < 7 }");
        assert_eq!(point_count(&set).unwrap(), 7);
    }

    #[test]
    fn empty_set_has_no_points() {
        let ctx = Context::alloc();
        let set = Set::read_from_str(&ctx, "{ [i] : 1 = 0 }");
        assert_eq!(point_count(&set).unwrap(), 0);
    }

    #[test]
    fn visitor_can_stop_early() {
        let ctx = Context::alloc();
        let set = Set::read_from_str(&ctx, "{ [i] : 0 <= i < 100 }");
        let mut seen = 0;
        for_each_point(&set, |_| {
            seen += 1;
            Ok(if seen == 3 { Visit::Stop } else { Visit::Continue })
        })
        .unwrap();
        assert_eq!(seen, 3);
    }

    #[test]
    fn counts_union_set_points_across_spaces() {
        let ctx = Context::alloc();
        let uset = UnionSet::read_from_str(&ctx, "{ A[i] : 0 <= i < 3; B[i, j] : 0 <= i, j < 2 }");
        assert_eq!(union_point_count(&uset).unwrap(), 7);
    }
}
