use crate::error::ErrorKind;
use crate::report::{EntryKind, ExecutionReport, OutputEntry, RunStatus};
use crate::script::evaluator::Evaluator;
use crate::script::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Budget configuration for a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RunLimits {
    /// Evaluation steps before the run is stopped.
    pub fuel: u64,
    /// Wall-clock allowance, measured from run start.
    #[serde(rename = "timeLimitMs", with = "duration_ms")]
    pub time_limit: Duration,
    /// Deepest permitted script call nesting.
    pub max_call_depth: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            fuel: 5_000_000,
            time_limit: Duration::from_secs(5),
            max_call_depth: 200,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Shared cancellation flag. Clones observe the same flag, so a handle
/// given out before a run starts can stop that run from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Runs untrusted source with budgets and captured output. Each run gets a
/// fresh global environment and its own console recorder; nothing leaks
/// between runs or between concurrent sandboxes.
pub struct Sandbox {
    limits: RunLimits,
    cancel: CancelHandle,
    busy: Arc<AtomicBool>,
}

impl Sandbox {
    pub fn new(limits: RunLimits) -> Self {
        Self {
            limits,
            cancel: CancelHandle::new(),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn limits(&self) -> &RunLimits {
        &self.limits
    }

    /// Handle that stops the current or next run when cancelled.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Installs a fresh cancellation flag, invalidating previously issued
    /// handles. Call after a cancelled run before reusing the sandbox.
    pub fn reset_cancel(&mut self) -> CancelHandle {
        self.cancel = CancelHandle::new();
        self.cancel.clone()
    }

    pub fn is_idle(&self) -> bool {
        !self.busy.load(Ordering::Relaxed)
    }

    /// Lexes, parses, and evaluates `source`, returning everything the run
    /// produced. Never panics on bad input; every failure becomes an
    /// `Error` entry in the report.
    pub fn run(&mut self, source: &str) -> ExecutionReport {
        self.busy.store(true, Ordering::Relaxed);
        let started = Instant::now();
        debug!(bytes = source.len(), "sandbox run started");

        let outcome = self.execute(source);
        let duration = started.elapsed();
        self.busy.store(false, Ordering::Relaxed);

        match outcome {
            Ok((mut entries, last_value)) => {
                if let Some(value) = last_value {
                    if !matches!(value, Value::Undefined) {
                        entries.push(OutputEntry::new(EntryKind::Result, value.inspect()));
                    }
                }
                if entries.is_empty() {
                    entries.push(OutputEntry::new(
                        EntryKind::Success,
                        "Code executed successfully (no output)".to_string(),
                    ));
                }
                debug!(?duration, entries = entries.len(), "sandbox run succeeded");
                ExecutionReport {
                    entries,
                    duration,
                    status: RunStatus::Success,
                }
            }
            Err((mut entries, err)) => {
                let status = if err.kind == ErrorKind::Budget {
                    RunStatus::TimedOut
                } else {
                    RunStatus::Error
                };
                debug!(?duration, error = %err, "sandbox run failed");
                entries.push(OutputEntry::new(EntryKind::Error, err.annotate(source)));
                ExecutionReport {
                    entries,
                    duration,
                    status,
                }
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn execute(
        &self,
        source: &str,
    ) -> Result<(Vec<OutputEntry>, Option<Value>), (Vec<OutputEntry>, crate::error::ScriptError)>
    {
        let program = match crate::script::parse_source(source) {
            Ok(program) => program,
            Err(err) => return Err((Vec::new(), err)),
        };

        let mut evaluator = Evaluator::new(&self.limits, self.cancel.clone());
        match evaluator.evaluate_program(&program) {
            Ok(last_value) => Ok((evaluator.drain_output(), last_value)),
            Err(err) => Err((evaluator.drain_output(), err)),
        }
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(RunLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_entry_for_final_expression() {
        let mut sandbox = Sandbox::default();
        let report = sandbox.run("40 + 2");
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].kind, EntryKind::Result);
        assert_eq!(report.entries[0].content, "42");
    }

    #[test]
    fn console_output_precedes_the_result() {
        let mut sandbox = Sandbox::default();
        let report = sandbox.run("console.log(\"hi\")\n\"done\"");
        let kinds: Vec<EntryKind> = report.entries.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EntryKind::Log, EntryKind::Result]);
        assert_eq!(report.entries[0].content, "hi");
        assert_eq!(report.entries[1].content, "\"done\"");
    }

    #[test]
    fn silent_success_synthesizes_an_entry() {
        let mut sandbox = Sandbox::default();
        let report = sandbox.run("let x = 1");
        assert_eq!(report.status, RunStatus::Success);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].kind, EntryKind::Success);
    }

    #[test]
    fn undefined_result_is_not_reported() {
        let mut sandbox = Sandbox::default();
        let report = sandbox.run("undefined");
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].kind, EntryKind::Success);
    }

    #[test]
    fn syntax_errors_produce_an_annotated_error_entry() {
        let mut sandbox = Sandbox::default();
        let report = sandbox.run("let x = ;");
        assert_eq!(report.status, RunStatus::Error);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].kind, EntryKind::Error);
        let text = &report.entries[0].content;
        assert!(text.starts_with("SyntaxError:"));
        assert!(text.contains("at line 1, column"));
        assert!(text.contains('^'));
    }

    #[test]
    fn runtime_errors_keep_earlier_output() {
        let mut sandbox = Sandbox::default();
        let report = sandbox.run("console.log(\"before\")\nmissing()");
        assert_eq!(report.status, RunStatus::Error);
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].kind, EntryKind::Log);
        assert_eq!(report.entries[0].content, "before");
        assert_eq!(report.entries[1].kind, EntryKind::Error);
        assert!(report.entries[1].content.contains("ReferenceError"));
        assert!(report.entries[1].content.contains("at line 2"));
    }

    #[test]
    fn thrown_values_render_as_uncaught() {
        let mut sandbox = Sandbox::default();
        let report = sandbox.run("throw new Error(\"boom\")");
        assert_eq!(report.status, RunStatus::Error);
        assert!(report.entries[0].content.starts_with("Uncaught Error: boom"));
    }

    #[test]
    fn fuel_exhaustion_times_out() {
        let limits = RunLimits {
            fuel: 2_000,
            ..RunLimits::default()
        };
        let mut sandbox = Sandbox::new(limits);
        let report = sandbox.run("while (true) {}");
        assert_eq!(report.status, RunStatus::TimedOut);
        assert!(report.entries[0].content.contains("ExecutionLimit"));
    }

    #[test]
    fn deadline_times_out() {
        let limits = RunLimits {
            fuel: u64::MAX,
            time_limit: Duration::from_millis(20),
            ..RunLimits::default()
        };
        let mut sandbox = Sandbox::new(limits);
        let report = sandbox.run("while (true) {}");
        assert_eq!(report.status, RunStatus::TimedOut);
        assert!(report.entries[0].content.contains("time limit"));
    }

    #[test]
    fn array_hole_padding_cannot_outrun_the_fuel_budget() {
        let limits = RunLimits {
            fuel: 1_000,
            ..RunLimits::default()
        };
        let mut sandbox = Sandbox::new(limits);
        let report = sandbox.run("let a = []; a[9000000] = 1; a.length");
        assert_eq!(report.status, RunStatus::TimedOut);
        assert!(report.entries[0].content.contains("ExecutionLimit"));
    }

    #[test]
    fn cancelled_handle_stops_the_run() {
        let mut sandbox = Sandbox::default();
        sandbox.cancel_handle().cancel();
        let report = sandbox.run("while (true) {}");
        assert_eq!(report.status, RunStatus::TimedOut);
        assert!(report.entries[0].content.contains("cancelled"));

        sandbox.reset_cancel();
        let report = sandbox.run("1 + 1");
        assert_eq!(report.status, RunStatus::Success);
    }

    #[test]
    fn runs_are_deterministic() {
        let mut first = Sandbox::default();
        let mut second = Sandbox::default();
        let source = "let total = 0;\nfor (let i = 0; i < 100; i++) { total += i }\nconsole.log(\"total\", total)\ntotal";
        let a = first.run(source);
        let b = second.run(source);
        assert_eq!(a.status, b.status);
        let strip = |r: &ExecutionReport| -> Vec<(EntryKind, String)> {
            r.entries
                .iter()
                .map(|e| (e.kind, e.content.clone()))
                .collect()
        };
        assert_eq!(strip(&a), strip(&b));
    }

    #[test]
    fn state_does_not_leak_between_runs() {
        let mut sandbox = Sandbox::default();
        sandbox.run("let leak = 99");
        let report = sandbox.run("leak");
        assert_eq!(report.status, RunStatus::Error);
        assert!(report.entries[0].content.contains("leak is not defined"));
    }

    #[test]
    fn sandbox_is_idle_between_runs() {
        let mut sandbox = Sandbox::default();
        assert!(sandbox.is_idle());
        sandbox.run("1");
        assert!(sandbox.is_idle());
    }

    #[test]
    fn report_serializes_with_camel_case_status() {
        let mut sandbox = Sandbox::default();
        let report = sandbox.run("1 + 1");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["entries"][0]["kind"], "result");

        let limits = RunLimits {
            fuel: 100,
            ..RunLimits::default()
        };
        let mut sandbox = Sandbox::new(limits);
        let report = sandbox.run("while (true) {}");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "timedOut");
    }

    #[test]
    fn limits_deserialize_from_camel_case_json() {
        let limits: RunLimits =
            serde_json::from_str(r#"{"fuel": 1000, "timeLimitMs": 250, "maxCallDepth": 32}"#)
                .unwrap();
        assert_eq!(limits.fuel, 1_000);
        assert_eq!(limits.time_limit, Duration::from_millis(250));
        assert_eq!(limits.max_call_depth, 32);

        let limits: RunLimits = serde_json::from_str("{}").unwrap();
        assert_eq!(limits.fuel, 5_000_000);
    }

    #[test]
    fn clipboard_text_joins_entries() {
        let mut sandbox = Sandbox::default();
        let report = sandbox.run("console.log(\"a\")\nconsole.log(\"b\")\n\"c\"");
        assert_eq!(report.clipboard_text(), "a\nb\n\"c\"");
    }
}
