//! Suite runner.
//!
//! Each case gets a settle pause, a fresh encoder and session, a bounded
//! run of its step list, and a teardown that stops the stream and releases
//! whatever handle is still live. Cases never share state.

use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::completion::{CompletionPath, CompletionToken};
use crate::config::HarnessConfig;
use crate::drain;
use crate::platform::{MediaPlatform, StreamSource, VideoEncoder};
use crate::report::{CaseReport, Failure, FailureKind, SuiteReport};
use crate::scenario::Scenario;
use crate::sequencer::Sequencer;
use crate::session::{CaseContext, SessionState};
use crate::sink::Sink;

pub struct Suite<P> {
    platform: P,
    config: HarnessConfig,
}

impl<P: MediaPlatform> Suite<P> {
    pub fn new(platform: P, config: HarnessConfig) -> Self {
        Self { platform, config }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run every scenario in order.
    pub async fn run_all(&self, scenarios: &[Scenario]) -> SuiteReport {
        let started_at = chrono::Utc::now();
        info!(
            cases = scenarios.len(),
            results_dir = %self.config.results_dir.display(),
            "suite started"
        );

        let mut cases = Vec::with_capacity(scenarios.len());
        for scenario in scenarios {
            cases.push(self.run_scenario(scenario).await);
        }

        let report = SuiteReport::new(started_at, cases);
        info!(
            total = report.total,
            passed = report.passed,
            failed = report.failed,
            "suite finished"
        );
        report
    }

    /// Run one scenario with setup and teardown.
    pub async fn run_scenario(&self, scenario: &Scenario) -> CaseReport {
        let settle = self.config.settle();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let started = Instant::now();
        let sink = Sink::for_scenario(
            &self.config.results_dir,
            &self.config.file_prefix,
            &scenario.name,
        );
        sink.reset();

        let mut report = CaseReport {
            name: scenario.name.clone(),
            title: scenario.title.clone(),
            passed: false,
            completion: None,
            failures: Vec::new(),
            checks: 0,
            steps_executed: 0,
            emitted: 0,
            consumed: 0,
            released: 0,
            written: 0,
            eos_observed: false,
            output_format: None,
            rejected_completions: Vec::new(),
            warnings: Vec::new(),
            duration_ms: 0,
            sink_path: Some(sink.path().to_path_buf()),
        };

        let findings = scenario.validate();
        report.warnings = findings.iter().map(ToString::to_string).collect();
        if let Some(finding) = findings.iter().find(|finding| finding.is_error()) {
            error!(scenario = %scenario.name, finding = %finding, "scenario rejected");
            report.failures.push(setup_failure(finding.to_string()));
            report.duration_ms = elapsed_ms(started);
            return report;
        }

        let encoder = match self.platform.create_encoder_by_mime(&self.config.mime).await {
            Ok(encoder) => encoder,
            Err(err) => {
                error!(scenario = %scenario.name, error = %err, "encoder creation failed");
                report
                    .failures
                    .push(setup_failure(format!("create by mime '{}': {err}", self.config.mime)));
                report.duration_ms = elapsed_ms(started);
                return report;
            }
        };

        let (completion, mut signal) = CompletionToken::new();
        let ctx = CaseContext {
            scenario: scenario.name.clone(),
            format: self.config.media_format(),
            stream_settings: self.config.stream_settings(scenario.frame_total),
            stream: self.platform.stream_source(),
            hold: self.config.hold(),
            sink,
            completion,
        };
        let mut session = SessionState::new(scenario);
        session.attach(encoder);

        info!(scenario = %scenario.name, steps = %scenario.rendered_steps(), "case started");
        let mut sequencer = Sequencer::new(scenario, session, ctx);
        let timeout = self.config.case_timeout();
        let timed_out = tokio::time::timeout(timeout, sequencer.run()).await.is_err();
        report.steps_executed = sequencer.executed();
        let (mut session, ctx) = sequencer.into_parts();

        if timed_out {
            warn!(scenario = %scenario.name, timeout_ms = timeout.as_millis() as u64, "case timed out");
            session.record_failure(
                FailureKind::Timeout,
                None,
                format!("case did not complete within {timeout:?}"),
            );
            drain::complete(&mut session, &ctx, CompletionPath::Halted);
        } else if !ctx.completion.is_resolved() {
            session.record_failure(
                FailureKind::HarnessDefect,
                None,
                "sequence returned without resolving completion",
            );
        }

        teardown(&mut session, &ctx).await;
        // Let detached buffer returns settle before reading the counter.
        tokio::task::yield_now().await;

        report.completion = signal.try_take();
        report.rejected_completions = ctx.completion.rejected();
        report.checks = session.checks;
        report.emitted = session.counters.emitted;
        report.consumed = session.counters.consumed;
        report.written = session.counters.written;
        report.released = session.counters.released();
        report.eos_observed = session.eos_observed;
        report.output_format = session.output_format.take();
        report.failures = std::mem::take(&mut session.failures);
        report.passed = report.failures.is_empty() && report.completion.is_some();
        report.duration_ms = elapsed_ms(started);

        if report.passed {
            info!(
                scenario = %scenario.name,
                consumed = report.consumed,
                duration_ms = report.duration_ms,
                "case passed"
            );
        } else {
            warn!(
                scenario = %scenario.name,
                failures = report.failures.len(),
                duration_ms = report.duration_ms,
                "case failed"
            );
        }
        report
    }
}

/// Stop the stream and release any handle the scenario left live.
async fn teardown<E: VideoEncoder, S: StreamSource>(
    session: &mut SessionState<E>,
    ctx: &CaseContext<S>,
) {
    if let Some(surface) = &session.surface {
        ctx.stream.close_stream(surface);
    }
    let Some(codec) = session.take_codec() else {
        return;
    };
    if let Err(err) = codec.release().await {
        session.record_failure(
            FailureKind::Teardown,
            None,
            format!("release during teardown failed: {err}"),
        );
    }
}

fn setup_failure(message: String) -> Failure {
    Failure {
        kind: FailureKind::Setup,
        step: None,
        index: None,
        message,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockBehavior, MockPlatform};
    use crate::platform::CodecOp;
    use crate::step::Step::*;

    fn suite(platform: MockPlatform, dir: &std::path::Path) -> Suite<MockPlatform> {
        Suite::new(
            platform,
            HarnessConfig::default().with_results_dir(dir),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn passing_case_releases_its_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        let suite = suite(platform.clone(), dir.path());

        let report = suite
            .run_scenario(&Scenario::new("configure_0100", [Configure, End]))
            .await;
        assert!(report.passed, "{:?}", report.failures);
        assert_eq!(report.completion, Some(CompletionPath::Sequencer));
        assert_eq!(report.checks, 1);
        assert_eq!(platform.live_encoders(), 0);
        assert!(
            report
                .sink_path
                .as_ref()
                .unwrap()
                .ends_with("video_reliability_promise_configure_0100.es")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_scenario_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::new();
        let suite = suite(platform.clone(), dir.path());

        let report = suite
            .run_scenario(&Scenario::new("stuck", [Configure, WaitForOutputs]))
            .await;
        assert!(!report.passed);
        assert_eq!(report.failures[0].kind, FailureKind::Setup);
        assert_eq!(report.completion, None);
        assert_eq!(platform.created_encoders(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_fails_setup() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::with_behavior(MockBehavior::default().fail_op(CodecOp::Create));
        let report = suite(platform, dir.path())
            .run_scenario(&Scenario::new("c", [Configure, End]))
            .await;
        assert!(!report.passed);
        assert_eq!(report.failures[0].kind, FailureKind::Setup);
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_failure_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let platform =
            MockPlatform::with_behavior(MockBehavior::default().fail_op(CodecOp::Release));
        let report = suite(platform, dir.path())
            .run_scenario(&Scenario::new("c", [Configure, End]))
            .await;
        assert!(!report.passed);
        assert_eq!(report.completion, Some(CompletionPath::Sequencer));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::Teardown);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_case_times_out_and_still_completes() {
        let dir = tempfile::tempdir().unwrap();
        let platform = MockPlatform::with_behavior(
            MockBehavior::default().with_latency(CodecOp::Configure, std::time::Duration::from_secs(120)),
        );
        let report = suite(platform.clone(), dir.path())
            .run_scenario(&Scenario::new("slow", [Configure, End]))
            .await;

        assert!(!report.passed);
        assert_eq!(report.failures[0].kind, FailureKind::Timeout);
        assert_eq!(report.completion, Some(CompletionPath::Halted));
        assert_eq!(platform.live_encoders(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_all_collects_every_case() {
        let dir = tempfile::tempdir().unwrap();
        let suite = suite(MockPlatform::new(), dir.path());
        let scenarios = vec![
            Scenario::new("configure_0100", [Configure, End]),
            Scenario::new("bad", [Configure, ExpectErrorMarker, End]),
        ];

        let report = suite.run_all(&scenarios).await;
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed_cases().next().unwrap().name, "bad");
    }
}
