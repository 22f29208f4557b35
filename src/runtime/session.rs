//! Run-scoped ownership of the bridge, with a guaranteed single statistics flush.

use parking_lot::Mutex;

use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    wall_time_iso_utc, Case, CaseResponse, Config, FuzzStateResult, StatefulBridge, StatsReport, TraceFile,
    UserService,
};

/// Owns a [`StatefulBridge`] for one fuzzing run. Statistics are reported
/// exactly once: by [`RunSession::finish`], or on drop if `finish` never ran.
#[derive(Debug)]
pub struct RunSession<S: UserService> {
    bridge: StatefulBridge<S>,
    started_at: String,
    trace_out: Option<PathBuf>,
    teardown_cleanup: bool,
    log_report: bool,
}

impl<S: UserService> RunSession<S> {
    pub fn new(bridge: StatefulBridge<S>, config: &Config) -> Self {
        Self {
            bridge,
            started_at: wall_time_iso_utc(),
            trace_out: config.trace_out.clone(),
            teardown_cleanup: config.teardown_cleanup,
            log_report: true,
        }
    }

    /// Whether the final report is also emitted through `tracing`. Callers
    /// that print the report returned by [`RunSession::finish`] turn this off.
    pub fn with_report_log(mut self, enabled: bool) -> Self {
        self.log_report = enabled;
        self
    }

    pub fn bridge(&self) -> &StatefulBridge<S> {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut StatefulBridge<S> {
        &mut self.bridge
    }

    /// Shape, dispatch and reconcile one case. A transport failure releases
    /// the case identity and is returned; the mirror is left untouched.
    pub fn run_case(&mut self, case: &mut Case) -> FuzzStateResult<CaseResponse> {
        let id = self.bridge.before_call(case);
        match self.bridge.dispatch(case) {
            Ok(response) => {
                self.bridge.after_call(id, case, &response);
                Ok(response)
            }
            Err(err) => {
                self.bridge.abandon(id, &err.to_string());
                Err(err)
            }
        }
    }

    pub fn finish(mut self) -> StatsReport {
        match self.close() {
            Some(report) => report,
            None => self.snapshot(),
        }
    }

    fn snapshot(&self) -> StatsReport {
        self.bridge.stats().report(&self.started_at, &wall_time_iso_utc())
    }

    fn close(&mut self) -> Option<StatsReport> {
        if self.bridge.stats().is_flushed() {
            return None;
        }
        if self.teardown_cleanup {
            let deleted = self.bridge.cleanup_created();
            tracing::info!(deleted, "teardown cleanup finished");
        }
        let finished_at = wall_time_iso_utc();
        let report = self.bridge.stats_mut().flush(&self.started_at, &finished_at)?;
        if self.log_report {
            tracing::info!(total = report.total, "run finished\n{}", report.pretty());
        } else {
            tracing::debug!(total = report.total, "run finished");
        }

        if let Some(path) = &self.trace_out {
            let trace = TraceFile::new(
                self.bridge.base_url(),
                self.bridge.policy().snapshot(),
                self.bridge.trace().events().to_vec(),
                report.clone(),
            );
            match trace.write_json(path) {
                Ok(()) => tracing::info!("case trace written to {}", path.display()),
                Err(err) => tracing::warn!("failed to write case trace {}: {err}", path.display()),
            }
        }
        Some(report)
    }
}

impl<S: UserService> Drop for RunSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// A [`RunSession`] behind one lock, for harnesses that run workers in
/// parallel. The lock is held across shape, dispatch and reconcile.
#[derive(Debug)]
pub struct SharedSession<S: UserService> {
    inner: Arc<Mutex<RunSession<S>>>,
}

impl<S: UserService> Clone for SharedSession<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: UserService> SharedSession<S> {
    pub fn new(session: RunSession<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    pub fn run_case(&self, case: &mut Case) -> FuzzStateResult<CaseResponse> {
        self.inner.lock().run_case(case)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut RunSession<S>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    /// Report from the last handle. Earlier handles get `None`; the session
    /// then flushes when the last handle drops.
    pub fn finish(self) -> Option<StatsReport> {
        Arc::try_unwrap(self.inner).ok().map(|m| m.into_inner().finish())
    }
}
