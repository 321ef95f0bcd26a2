//! A `libloading`-backed module loader resolving the native shared-library
//! ABI described in §6.3 and in the "Module dynamic loading" design note:
//! a pair of `extern "C"` function pointers passed through a `cookie`
//! argument, rather than a closure capturing hidden state.
//!
//! This path is not exercised by this workspace's tests — there is no real
//! `.so` fixture to load in this environment — and is flagged untested in
//! `DESIGN.md`. It exists so the production deployment story (a) from the
//! design notes ("dynamic library with the ABI of §6.3") is complete.

use std::ffi::{c_char, c_void, CStr, CString};
use std::os::raw::c_longlong;
use std::path::Path;

use libloading::{Library, Symbol};

use super::{
    CommitterState, JmState, JobInfo, JobOutcome, Module, NextTaskOutcome, TaskOutcome,
    WorkerState,
};
use crate::error::ModuleError;

/// A raw byte buffer as handed across the FFI boundary: a pointer the
/// module owns plus a length. The core never frees module-owned memory.
#[repr(C)]
pub struct CBuf {
    pub ptr: *const u8,
    pub len: usize,
}

impl CBuf {
    fn as_slice(&self) -> Option<&[u8]> {
        if self.ptr.is_null() {
            None
        } else {
            Some(unsafe { std::slice::from_raw_parts(self.ptr, self.len) })
        }
    }
}

type JmNewFn =
    unsafe extern "C" fn(argv: *const c_char, jobid: *const c_char, run_id: c_longlong) -> *mut c_void;
type NextTaskFn =
    unsafe extern "C" fn(state: *mut c_void, ctx: c_longlong, out: *mut CBuf, out_ctx: *mut c_longlong) -> c_longlong;
type WorkerNewFn = unsafe extern "C" fn(argv: *const c_char) -> *mut c_void;
type WorkerRunFn = unsafe extern "C" fn(
    state: *mut c_void,
    task: *const u8,
    task_len: usize,
    ctx: c_longlong,
    out: *mut CBuf,
    out_ctx: *mut c_longlong,
) -> c_longlong;
type CommitterNewFn =
    unsafe extern "C" fn(argv: *const c_char, jobid: *const c_char, run_id: c_longlong) -> *mut c_void;
type CommitPitFn = unsafe extern "C" fn(state: *mut c_void, bytes: *const u8, len: usize) -> c_longlong;
type CommitJobFn = unsafe extern "C" fn(
    state: *mut c_void,
    ctx: c_longlong,
    out: *mut CBuf,
    out_ctx: *mut c_longlong,
) -> c_longlong;
type FinalizeFn = unsafe extern "C" fn(state: *mut c_void);

/// A loaded `.so`/`.dylib` implementing the §6.3 ABI.
pub struct DynamicModule {
    _lib: Library,
    jm_new: JmNewFn,
    next_task: NextTaskFn,
    worker_new: WorkerNewFn,
    worker_run: WorkerRunFn,
    committer_new: CommitterNewFn,
    commit_pit: CommitPitFn,
    commit_job: CommitJobFn,
    jm_finalize: Option<FinalizeFn>,
    worker_finalize: Option<FinalizeFn>,
    committer_finalize: Option<FinalizeFn>,
}

impl DynamicModule {
    /// Loads the module at `path`, resolving the required ABI symbols and
    /// the optional `finalize` hooks (absent finalizers are no-ops per
    /// §6.3: "Any of the `finalize` calls may be absent").
    pub fn load(path: &Path) -> Result<Self, ModuleError> {
        let lib = unsafe { Library::new(path) }.map_err(|e| ModuleError::Load {
            path: path.display().to_string(),
            source: e.into(),
        })?;

        macro_rules! required {
            ($name:literal) => {
                *unsafe {
                    lib.get::<Symbol<_>>($name.as_bytes())
                        .map_err(|_| ModuleError::MissingSymbol($name.to_string()))?
                }
            };
        }
        macro_rules! optional {
            ($name:literal) => {
                unsafe { lib.get::<Symbol<FinalizeFn>>($name.as_bytes()) }
                    .ok()
                    .map(|s| *s)
            };
        }

        let jm_new = required!("job_manager_new");
        let next_task = required!("next_task");
        let worker_new = required!("worker_new");
        let worker_run = required!("run");
        let committer_new = required!("committer_new");
        let commit_pit = required!("commit_pit");
        let commit_job = required!("commit_job");
        let jm_finalize = optional!("job_manager_finalize");
        let worker_finalize = optional!("worker_finalize");
        let committer_finalize = optional!("committer_finalize");

        Ok(Self {
            _lib: lib,
            jm_new,
            next_task,
            worker_new,
            worker_run,
            committer_new,
            commit_pit,
            commit_job,
            jm_finalize,
            worker_finalize,
            committer_finalize,
        })
    }
}

/// Builds a NUL-separated, NUL-terminated argv buffer for the `argv`
/// parameter of the §6.3 ABI. Module args are arbitrary strings, so this
/// cannot round-trip through `CString::new` (which rejects embedded NULs
/// and would therefore error on every argv of two or more elements) —
/// assemble the bytes directly instead, the same way `CBuf` carries raw
/// bytes across the boundary rather than a `CString`.
fn argv_buf(argv: &[String]) -> Vec<u8> {
    let mut buf = Vec::new();
    for arg in argv {
        buf.extend_from_slice(arg.as_bytes());
        buf.push(0);
    }
    buf.push(0);
    buf
}

impl Module for DynamicModule {
    fn job_manager_new(
        &self,
        argv: &[String],
        jobinfo: &JobInfo,
    ) -> Result<Box<dyn JmState>, ModuleError> {
        let argv_buf = argv_buf(argv);
        let jobid_c = CString::new(jobinfo.jobid.clone()).unwrap_or_default();
        let state = unsafe {
            (self.jm_new)(argv_buf.as_ptr() as *const c_char, jobid_c.as_ptr(), jobinfo.run_id)
        };
        Ok(Box::new(DynamicJmState {
            state,
            next_task: self.next_task,
            finalize: self.jm_finalize,
        }))
    }

    fn worker_new(&self, argv: &[String]) -> Result<Box<dyn WorkerState>, ModuleError> {
        let argv_buf = argv_buf(argv);
        let state = unsafe { (self.worker_new)(argv_buf.as_ptr() as *const c_char) };
        Ok(Box::new(DynamicWorkerState {
            state,
            run: self.worker_run,
            finalize: self.worker_finalize,
        }))
    }

    fn committer_new(
        &self,
        argv: &[String],
        jobinfo: &JobInfo,
    ) -> Result<Box<dyn CommitterState>, ModuleError> {
        let argv_buf = argv_buf(argv);
        let jobid_c = CString::new(jobinfo.jobid.clone()).unwrap_or_default();
        let state = unsafe {
            (self.committer_new)(argv_buf.as_ptr() as *const c_char, jobid_c.as_ptr(), jobinfo.run_id)
        };
        Ok(Box::new(DynamicCommitterState {
            state,
            commit_pit: self.commit_pit,
            commit_job: self.commit_job,
            finalize: self.committer_finalize,
        }))
    }
}

struct DynamicJmState {
    state: *mut c_void,
    next_task: NextTaskFn,
    finalize: Option<FinalizeFn>,
}
unsafe impl Send for DynamicJmState {}

impl JmState for DynamicJmState {
    fn next_task(&mut self, next_id: i64) -> Result<NextTaskOutcome, ModuleError> {
        let mut out = CBuf {
            ptr: std::ptr::null(),
            len: 0,
        };
        let mut out_ctx: i64 = 0;
        let status = unsafe { (self.next_task)(self.state, next_id, &mut out, &mut out_ctx) };
        if status == 0 {
            return Ok(NextTaskOutcome::NoMoreTasks);
        }
        let bytes = out.as_slice().map(|s| s.to_vec()).unwrap_or_default();
        Ok(NextTaskOutcome::Task {
            bytes,
            ctx: out_ctx,
        })
    }

    fn finalize(&mut self) {
        if let Some(f) = self.finalize {
            unsafe { f(self.state) };
        }
    }
}

struct DynamicWorkerState {
    state: *mut c_void,
    run: WorkerRunFn,
    finalize: Option<FinalizeFn>,
}
unsafe impl Send for DynamicWorkerState {}

impl WorkerState for DynamicWorkerState {
    fn run(&mut self, task_bytes: &[u8], ctx: i64) -> Result<TaskOutcome, ModuleError> {
        let mut out = CBuf {
            ptr: std::ptr::null(),
            len: 0,
        };
        let mut out_ctx: i64 = 0;
        let status = unsafe {
            (self.run)(
                self.state,
                task_bytes.as_ptr(),
                task_bytes.len(),
                ctx,
                &mut out,
                &mut out_ctx,
            )
        };
        Ok(TaskOutcome {
            status,
            bytes: out.as_slice().map(|s| s.to_vec()),
            ctx: out_ctx,
        })
    }

    fn finalize(&mut self) {
        if let Some(f) = self.finalize {
            unsafe { f(self.state) };
        }
    }
}

struct DynamicCommitterState {
    state: *mut c_void,
    commit_pit: CommitPitFn,
    commit_job: CommitJobFn,
    finalize: Option<FinalizeFn>,
}
unsafe impl Send for DynamicCommitterState {}

impl CommitterState for DynamicCommitterState {
    fn commit_pit(&mut self, result_bytes: &[u8]) -> Result<i64, ModuleError> {
        let status = unsafe {
            (self.commit_pit)(self.state, result_bytes.as_ptr(), result_bytes.len())
        };
        Ok(status)
    }

    fn commit_job(&mut self, ctx: i64) -> Result<JobOutcome, ModuleError> {
        let mut out = CBuf {
            ptr: std::ptr::null(),
            len: 0,
        };
        let mut out_ctx: i64 = 0;
        let status = unsafe { (self.commit_job)(self.state, ctx, &mut out, &mut out_ctx) };
        Ok(JobOutcome {
            status,
            bytes: out.as_slice().map(|s| s.to_vec()),
            ctx: out_ctx,
        })
    }

    fn finalize(&mut self) {
        if let Some(f) = self.finalize {
            unsafe { f(self.state) };
        }
    }
}

#[allow(dead_code)]
fn cstr_or_empty(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}
