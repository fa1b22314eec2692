//! FFI bindings for Focus Flux
//!
//! C-compatible entry points for hosts that embed the engagement engine.
//! Strings cross the boundary as null-terminated UTF-8; every string returned
//! here is heap-allocated and must be released with `focus_free_string`.
//! Functions returning a pointer return NULL on failure, functions returning
//! `i32` return non-zero; either way `focus_last_error` describes the failure.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::adapter::ObservationFrame;
use crate::config::{ConfigPatch, EngagementConfig};
use crate::pipeline::{replay_to_aggregate, FocusProcessor};
use crate::types::TimedFrame;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Read a required string argument, recording an error naming it when invalid
unsafe fn required_arg(ptr: *const c_char, name: &str) -> Option<String> {
    let value = cstr_to_string(ptr);
    if value.is_none() {
        set_last_error(&format!("Invalid {name} string pointer"));
    }
    value
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Optional configuration argument: NULL means defaults
unsafe fn config_arg(ptr: *const c_char) -> Result<EngagementConfig, String> {
    if ptr.is_null() {
        return Ok(EngagementConfig::default());
    }
    let json = cstr_to_string(ptr).ok_or_else(|| "Invalid config string pointer".to_string())?;
    EngagementConfig::from_json(&json).map_err(|e| e.to_string())
}

fn to_json_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Replay recorded frames (NDJSON or JSON array) and return the session aggregate JSON.
///
/// # Safety
/// - `frames_json` and `user_id` must be valid null-terminated C strings.
/// - `config_json` may be NULL to use the default configuration.
/// - Returns a newly allocated string that must be freed with `focus_free_string`.
/// - Returns NULL on error; call `focus_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn focus_replay_to_aggregate(
    frames_json: *const c_char,
    user_id: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(frames) = required_arg(frames_json, "frames JSON") else {
        return ptr::null_mut();
    };
    let Some(user) = required_arg(user_id, "user_id") else {
        return ptr::null_mut();
    };
    let config = match config_arg(config_json) {
        Ok(config) => config,
        Err(msg) => {
            set_last_error(&msg);
            return ptr::null_mut();
        }
    };

    match replay_to_aggregate(&frames, &user, config) {
        Ok(aggregate) => to_json_cstr(&aggregate),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateful Processor API
// ============================================================================

/// Opaque handle to a FocusProcessor
pub struct FocusProcessorHandle {
    processor: FocusProcessor,
}

/// Create a new FocusProcessor.
///
/// # Safety
/// - `config_json` may be NULL to use the default configuration.
/// - Must be freed with `focus_processor_free`.
/// - Returns NULL when the configuration is rejected.
#[no_mangle]
pub unsafe extern "C" fn focus_processor_new(
    config_json: *const c_char,
) -> *mut FocusProcessorHandle {
    clear_last_error();

    let processor = match config_arg(config_json).and_then(|config| {
        FocusProcessor::with_config(config).map_err(|e| e.to_string())
    }) {
        Ok(processor) => processor,
        Err(msg) => {
            set_last_error(&msg);
            return ptr::null_mut();
        }
    };

    Box::into_raw(Box::new(FocusProcessorHandle { processor }))
}

/// Free a FocusProcessor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `focus_processor_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn focus_processor_free(processor: *mut FocusProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Start a session and return its id.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `focus_processor_new`.
/// - `user_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `focus_free_string`.
#[no_mangle]
pub unsafe extern "C" fn focus_processor_start_session(
    processor: *mut FocusProcessorHandle,
    user_id: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;

    let Some(user) = required_arg(user_id, "user_id") else {
        return ptr::null_mut();
    };

    match handle.processor.start_session(&user) {
        Ok(session) => string_to_cstr(&session.id),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Pause (`paused != 0`) or resume the active session.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `focus_processor_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn focus_processor_set_paused(
    processor: *mut FocusProcessorHandle,
    paused: i32,
) -> i32 {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return -1;
    }
    let handle = &mut *processor;

    let result = if paused != 0 {
        handle.processor.pause_session()
    } else {
        handle.processor.resume_session()
    };

    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Process one timestamped frame and return the tick outcome JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `focus_processor_new`.
/// - `frame_json` must be a valid null-terminated C string holding one frame object.
/// - Returns a newly allocated string that must be freed with `focus_free_string`.
/// - Returns NULL on error; call `focus_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn focus_processor_tick(
    processor: *mut FocusProcessorHandle,
    frame_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;

    let Some(json) = required_arg(frame_json, "frame JSON") else {
        return ptr::null_mut();
    };

    let frame: TimedFrame = match serde_json::from_str(&json) {
        Ok(frame) => frame,
        Err(e) => {
            set_last_error(&format!("Invalid frame: {e}"));
            return ptr::null_mut();
        }
    };

    match handle.processor.tick(&frame.sample, frame.timestamp_ms) {
        Ok(outcome) => to_json_cstr(&outcome),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Process raw detector observations for one tick and return the outcome JSON.
///
/// Flags are derived with the processor's configured detector thresholds.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `focus_processor_new`.
/// - `observations_json` must be a valid null-terminated C string holding one
///   `{"timestamp_ms", "face", "hands"}` object.
/// - Returns a newly allocated string that must be freed with `focus_free_string`.
/// - Returns NULL on error; call `focus_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn focus_processor_tick_observations(
    processor: *mut FocusProcessorHandle,
    observations_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;

    let Some(json) = required_arg(observations_json, "observations JSON") else {
        return ptr::null_mut();
    };

    let frame: ObservationFrame = match serde_json::from_str(&json) {
        Ok(frame) => frame,
        Err(e) => {
            set_last_error(&format!("Invalid observations: {e}"));
            return ptr::null_mut();
        }
    };

    match handle.processor.tick_observations(&frame) {
        Ok(outcome) => to_json_cstr(&outcome),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Stop the active session and return its aggregate JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `focus_processor_new`.
/// - Returns a newly allocated string that must be freed with `focus_free_string`.
/// - Returns NULL on error; call `focus_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn focus_processor_stop_session(
    processor: *mut FocusProcessorHandle,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &mut *processor;

    match handle.processor.stop_session() {
        Ok(summary) => to_json_cstr(&handle.processor.encoder().encode(&summary)),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Per-state percentages of the current (or last finished) session as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `focus_processor_new`.
/// - Returns a newly allocated string that must be freed with `focus_free_string`.
#[no_mangle]
pub unsafe extern "C" fn focus_processor_stats(
    processor: *mut FocusProcessorHandle,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }
    let handle = &*processor;

    to_json_cstr(&handle.processor.engagement_stats())
}

/// Apply a partial configuration update.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `focus_processor_new`.
/// - `patch_json` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error. A rejected patch leaves the configuration unchanged.
#[no_mangle]
pub unsafe extern "C" fn focus_processor_update_config(
    processor: *mut FocusProcessorHandle,
    patch_json: *const c_char,
) -> i32 {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return -1;
    }
    let handle = &mut *processor;

    let Some(json) = required_arg(patch_json, "config patch") else {
        return -1;
    };

    let result =
        ConfigPatch::from_json(&json).and_then(|patch| handle.processor.update_config(&patch));
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Focus functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Focus function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn focus_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - The returned pointer is valid until the next Focus function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn focus_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn focus_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::TickOutcome;
    use crate::types::{EngagementState, EngagementStats, SessionAggregate};
    use std::ffi::CString;

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null(), "unexpected NULL: {:?}", last_error());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        focus_free_string(ptr);
        s
    }

    fn last_error() -> Option<String> {
        unsafe {
            let err = focus_last_error();
            (!err.is_null()).then(|| CStr::from_ptr(err).to_str().unwrap().to_string())
        }
    }

    fn frame(ts: u64, face_present: bool) -> CString {
        CString::new(format!(
            r#"{{"timestamp_ms": {ts}, "face_present": {face_present}, "eye_aspect_ratio": 0.3}}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_ffi_replay_to_aggregate() {
        let frames: Vec<String> = (0..7)
            .map(|i| frame(i * 1000, true).into_string().unwrap())
            .collect();
        let frames = CString::new(frames.join("\n")).unwrap();
        let user = CString::new("user-1").unwrap();

        unsafe {
            let json = take_string(focus_replay_to_aggregate(
                frames.as_ptr(),
                user.as_ptr(),
                ptr::null(),
            ));
            let aggregate: SessionAggregate = serde_json::from_str(&json).unwrap();
            assert_eq!(aggregate.record.user_id, "user-1");
            assert_eq!(aggregate.record.total_duration_secs, 7);
            assert_eq!(aggregate.series.len(), 2);
        }
    }

    #[test]
    fn test_ffi_processor_lifecycle() {
        unsafe {
            let processor = focus_processor_new(ptr::null());
            assert!(!processor.is_null());

            let user = CString::new("user-2").unwrap();
            let session_id = take_string(focus_processor_start_session(processor, user.as_ptr()));
            assert!(!session_id.is_empty());

            for i in 0..3 {
                let outcome: TickOutcome =
                    serde_json::from_str(&take_string(focus_processor_tick(
                        processor,
                        frame(i * 1000, true).as_ptr(),
                    )))
                    .unwrap();
                assert_eq!(outcome.metrics.timestamp_ms, i * 1000);
            }

            assert_eq!(focus_processor_set_paused(processor, 1), 0);
            take_string(focus_processor_tick(processor, frame(3000, false).as_ptr()));
            assert_eq!(focus_processor_set_paused(processor, 0), 0);

            let stats: EngagementStats =
                serde_json::from_str(&take_string(focus_processor_stats(processor))).unwrap();
            assert_eq!(stats.engaged, 100);

            let aggregate: SessionAggregate =
                serde_json::from_str(&take_string(focus_processor_stop_session(processor)))
                    .unwrap();
            assert_eq!(aggregate.record.session_id, session_id);
            assert_eq!(aggregate.record.total_duration_secs, 3);

            focus_processor_free(processor);
        }
    }

    #[test]
    fn test_ffi_update_config() {
        unsafe {
            let processor = focus_processor_new(ptr::null());

            let patch = CString::new(r#"{"baseline_score": 55}"#).unwrap();
            assert_eq!(focus_processor_update_config(processor, patch.as_ptr()), 0);
            assert_eq!((*processor).processor.config().baseline_score, 55.0);

            let bad = CString::new(r#"{"baseline_score": 500}"#).unwrap();
            assert_eq!(focus_processor_update_config(processor, bad.as_ptr()), -1);
            assert!(last_error().is_some());
            assert_eq!((*processor).processor.config().baseline_score, 55.0);

            focus_processor_free(processor);
        }
    }

    #[test]
    fn test_ffi_threshold_patch_applies_to_observations() {
        unsafe {
            let processor = focus_processor_new(ptr::null());
            let user = CString::new("user-3").unwrap();
            take_string(focus_processor_start_session(processor, user.as_ptr()));

            let tick = |ts: u64| -> TickOutcome {
                let json = CString::new(format!(
                    r#"{{"timestamp_ms": {ts}, "face": {{"eye_aspect_ratio": 0.25}}}}"#
                ))
                .unwrap();
                let outcome = focus_processor_tick_observations(processor, json.as_ptr());
                serde_json::from_str(&take_string(outcome)).unwrap()
            };

            assert_eq!(tick(0).metrics.state, EngagementState::Engaged);

            let patch =
                CString::new(r#"{"eye_closed_threshold": 0.3, "eye_closed_duration": 0}"#)
                    .unwrap();
            assert_eq!(focus_processor_update_config(processor, patch.as_ptr()), 0);
            assert_eq!(tick(1000).metrics.state, EngagementState::Sleepy);

            let invalid = CString::new("{").unwrap();
            assert!(focus_processor_tick_observations(processor, invalid.as_ptr()).is_null());
            assert!(last_error().unwrap().starts_with("Invalid observations"));

            focus_processor_free(processor);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let processor = focus_processor_new(ptr::null());
            let result = focus_processor_tick(processor, frame(0, true).as_ptr());
            assert!(result.is_null());
            assert_eq!(last_error().as_deref(), Some("No active session"));

            let invalid = CString::new("not json").unwrap();
            let user = CString::new("user").unwrap();
            let result = focus_replay_to_aggregate(invalid.as_ptr(), user.as_ptr(), ptr::null());
            assert!(result.is_null());
            assert!(last_error().is_some());

            let bad_config = CString::new(r#"{"yawn_duration": -1.0}"#).unwrap();
            assert!(focus_processor_new(bad_config.as_ptr()).is_null());

            assert!(focus_processor_stop_session(ptr::null_mut()).is_null());
            assert_eq!(last_error().as_deref(), Some("Null processor pointer"));

            focus_processor_free(processor);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = CStr::from_ptr(focus_version()).to_str().unwrap();
            assert_eq!(version, env!("CARGO_PKG_VERSION"));
        }
    }
}
