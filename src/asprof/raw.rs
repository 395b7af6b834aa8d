// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, LazyLock};

// subset of asprof.h used to start and stop traces

#[allow(non_camel_case_types)]
pub type asprof_error_t = *const std::ffi::c_char;
#[allow(non_camel_case_types)]
pub type asprof_writer_t = Option<unsafe extern "C" fn(buf: *const std::ffi::c_char, size: usize)>;

pub(crate) struct AsyncProfiler {
    pub(crate) asprof_init: libloading::Symbol<'static, unsafe extern "C" fn()>,
    pub(crate) asprof_execute: libloading::Symbol<
        'static,
        unsafe extern "C" fn(
            command: *const std::ffi::c_char,
            output_callback: asprof_writer_t,
        ) -> asprof_error_t,
    >,
    pub(crate) asprof_error_str: libloading::Symbol<
        'static,
        unsafe extern "C" fn(asprof_error_t) -> *const std::ffi::c_char,
    >,
}

// kept in a static so the library is never dlclose'd: it owns threads and
// signal handlers once initialized.
static LIBRARY: LazyLock<Result<libloading::Library, Arc<libloading::Error>>> =
    LazyLock::new(|| Ok(unsafe { libloading::Library::new("libasyncProfiler.so")? }));

static SYMBOLS: LazyLock<Result<AsyncProfiler, Arc<libloading::Error>>> = LazyLock::new(|| {
    // safety: the symbols are looked up with the signatures from asprof.h
    unsafe {
        let lib = LIBRARY.as_ref().map_err(|e| e.clone())?;
        Ok(AsyncProfiler {
            asprof_init: lib.get(b"asprof_init")?,
            asprof_execute: lib.get(b"asprof_execute")?,
            asprof_error_str: lib.get(b"asprof_error_str")?,
        })
    }
});

pub fn async_profiler() -> Result<&'static AsyncProfiler, Arc<libloading::Error>> {
    SYMBOLS.as_ref().map_err(|e| e.clone())
}
