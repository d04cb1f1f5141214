mod common;

use crh::mock::MockPlatform;
use crh::step::Step::{self, *};
use crh::{CompletionPath, CompletionToken, FailureKind, Scenario, ScenarioTable};
use crh_common::testing::{TestLogger, TestPhase};

const RUNNING: [Step; 6] = [
    Configure,
    GetSurface,
    SetStreamParams,
    Prepare,
    StartStream,
    Start,
];

#[tokio::test(start_paused = true)]
async fn configure_then_end_completes_once() {
    let dir = tempfile::tempdir().unwrap();
    let report = common::suite(MockPlatform::new(), dir.path())
        .run_scenario(&Scenario::new("configure_0100", [Configure, End]))
        .await;

    assert!(report.passed, "{:?}", report.failures);
    assert_eq!(report.completion, Some(CompletionPath::Sequencer));
    assert!(report.rejected_completions.is_empty());
    assert_eq!(report.steps_executed, 2);
}

#[tokio::test(start_paused = true)]
async fn second_configure_fails_as_expected() {
    let dir = tempfile::tempdir().unwrap();
    let report = common::suite(MockPlatform::new(), dir.path())
        .run_scenario(&Scenario::new(
            "configure_0800",
            [Configure, Configure, ExpectErrorMarker, End],
        ))
        .await;

    assert!(report.passed, "{:?}", report.failures);
    assert_eq!(report.checks, 2);
    assert_eq!(report.completion, Some(CompletionPath::Sequencer));
}

#[tokio::test(start_paused = true)]
async fn hold_drains_two_frames_and_eos() {
    let logger = TestLogger::for_test("hold_drains_two_frames_and_eos");
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(
        "configure_0600",
        [
            Configure,
            GetSurface,
            SetStreamParams,
            Prepare,
            Start,
            StartStream,
            Hold,
            AssertEosSeen,
            Configure,
            ExpectErrorMarker,
            StopStream,
            End,
        ],
    )
    .with_frame_total(2);

    logger.log(TestPhase::Execute, scenario.rendered_steps());
    let report = common::suite(MockPlatform::new(), dir.path())
        .run_scenario(&scenario)
        .await;

    logger.record(TestPhase::Verify, "case report", &report);
    assert!(report.passed, "{:?}", report.failures);
    assert!(report.eos_observed);
    assert_eq!(report.emitted, 3);
    assert_eq!(report.consumed, 3);
    assert_eq!(report.written, 2);
    assert_eq!(report.released, 2);

    let written = std::fs::read_to_string(report.sink_path.as_ref().unwrap()).unwrap();
    assert_eq!(written, "320x240 frame 0\n320x240 frame 1\n");
    logger.pass();
}

#[tokio::test(start_paused = true)]
async fn wait_for_outputs_completes_from_the_drain() {
    let dir = tempfile::tempdir().unwrap();
    let platform = MockPlatform::new();
    let scenario = Scenario::new(
        "start_0300",
        RUNNING.iter().cloned().chain([WaitForOutputs]),
    )
    .with_frame_total(10)
    .work_done_on_eos();

    let report = common::suite(platform.clone(), dir.path())
        .run_scenario(&scenario)
        .await;

    assert!(report.passed, "{:?}", report.failures);
    assert_eq!(report.completion, Some(CompletionPath::Drain));
    assert_eq!(report.consumed, 11);
    assert_eq!(report.written, 10);
    assert_eq!(platform.live_encoders(), 0);
    assert_eq!(platform.released_encoders(), 1);
}

#[tokio::test(start_paused = true)]
async fn reset_then_configure_recovers_from_every_state() {
    let dir = tempfile::tempdir().unwrap();
    let suite = common::suite(MockPlatform::new(), dir.path());
    let eos_prefix = vec![
        Configure,
        GetSurface,
        SetStreamParams,
        Prepare,
        Start,
        StartStream,
        Hold,
        AssertEosSeen,
    ];
    let prefixes: Vec<(&str, Vec<Step>)> = vec![
        ("idle", vec![]),
        ("configured", vec![Configure]),
        ("prepared", RUNNING[..4].to_vec()),
        ("running", RUNNING.to_vec()),
        ("flushed", RUNNING.iter().cloned().chain([Flush]).collect()),
        ("stopped", RUNNING.iter().cloned().chain([Stop]).collect()),
        ("eos", eos_prefix),
    ];

    for (state, prefix) in prefixes {
        let scenario = Scenario::new(
            format!("recover_from_{state}"),
            prefix.into_iter().chain([Reset, Configure, StopStream, End]),
        )
        .with_frame_total(2);
        let report = suite.run_scenario(&scenario).await;
        assert!(report.passed, "{state}: {:?}", report.failures);
    }
}

#[tokio::test(start_paused = true)]
async fn hard_failure_halts_and_skips_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let report = common::suite(MockPlatform::new(), dir.path())
        .run_scenario(&Scenario::new(
            "halt",
            [Configure, Prepare, ExpectErrorMarker, Start, End],
        ))
        .await;

    assert!(!report.passed);
    assert_eq!(report.completion, Some(CompletionPath::Halted));
    assert_eq!(report.steps_executed, 3);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.kind, FailureKind::UnexpectedSuccess);
    assert_eq!(failure.step.as_deref(), Some("PREPARE"));
    assert_eq!(failure.index, Some(1));
}

#[tokio::test(start_paused = true)]
async fn missing_eos_is_a_soft_failure() {
    let dir = tempfile::tempdir().unwrap();
    let report = common::suite(MockPlatform::new(), dir.path())
        .run_scenario(&Scenario::new(
            "no_eos",
            [Configure, AssertEosSeen, Reset, End],
        ))
        .await;

    assert!(!report.passed);
    assert_eq!(report.completion, Some(CompletionPath::Sequencer));
    assert_eq!(report.steps_executed, 4);
    assert_eq!(report.failures[0].kind, FailureKind::Assertion);
}

#[tokio::test(start_paused = true)]
async fn output_format_is_queried_on_first_output() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(
        "format_query",
        RUNNING.iter().cloned().chain([WaitForOutputs]),
    )
    .with_frame_total(3)
    .work_done_on_eos()
    .query_output_format();

    let report = common::suite(MockPlatform::new(), dir.path())
        .run_scenario(&scenario)
        .await;
    assert!(report.passed, "{:?}", report.failures);
    let format = report.output_format.unwrap();
    assert_eq!((format.width, format.height), (320, 240));
}

#[tokio::test(start_paused = true)]
async fn restart_after_eos_arms_drain_completion() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(
        "eos_0400",
        [
            Configure,
            GetSurface,
            SetStreamParams,
            Prepare,
            Start,
            StartStream,
            Hold,
            AssertEosSeen,
            StopStream,
            Stop,
            RestartAfterEos,
            Start,
            SetStreamParams,
            StartStream,
            WaitForOutputs,
        ],
    )
    .with_frame_total(2);

    let report = common::suite(MockPlatform::new(), dir.path())
        .run_scenario(&scenario)
        .await;
    assert!(report.passed, "{:?}", report.failures);
    assert_eq!(report.completion, Some(CompletionPath::Drain));
    assert_eq!(report.consumed, 3);
}

#[tokio::test(start_paused = true)]
async fn scenarios_load_from_a_toml_table() {
    let dir = tempfile::tempdir().unwrap();
    let table = ScenarioTable::from_toml_str(
        r#"
        [[scenario]]
        name = "toml_stop_0400"
        title = "stop when running"
        steps = ["CONFIGURE", "GETSURFACE", "SETSTREAMPARAM", "PREPARE",
                 "STARTSTREAM", "START", "STOP", "STOPSTREAM", "END"]

        [[scenario]]
        name = "toml_flush_0100"
        steps = ["FLUSH", "ERROR", "END"]
        "#,
    )
    .unwrap();
    assert!(table.check().unwrap().is_empty());

    let report = common::suite(MockPlatform::new(), dir.path())
        .run_all(&table.scenarios)
        .await;
    assert!(report.all_passed(), "{}", report.render_pretty());
    assert_eq!(report.total, 2);
}

#[test]
fn completion_token_rejects_a_second_resolution() {
    let (token, mut signal) = CompletionToken::new();
    token.resolve(CompletionPath::Drain).unwrap();

    let err = token.resolve(CompletionPath::Sequencer).unwrap_err();
    assert_eq!(err.first, CompletionPath::Drain);
    assert_eq!(token.rejected(), vec![CompletionPath::Sequencer]);
    assert_eq!(signal.try_take(), Some(CompletionPath::Drain));
}

#[tokio::test(start_paused = true)]
async fn release_step_leaves_nothing_for_teardown() {
    let dir = tempfile::tempdir().unwrap();
    let platform = MockPlatform::new();
    let report = common::suite(platform.clone(), dir.path())
        .run_scenario(&Scenario::new(
            "release_0800",
            RUNNING
                .iter()
                .cloned()
                .chain([Release, Release, ExpectErrorMarker, StopStream, End]),
        ))
        .await;

    assert!(report.passed, "{:?}", report.failures);
    assert_eq!(platform.created_encoders(), 1);
    assert_eq!(platform.released_encoders(), 1);
}

#[tokio::test(start_paused = true)]
async fn wait_after_release_halts_instead_of_timing_out() {
    let logger = TestLogger::for_test("wait_after_release_halts_instead_of_timing_out");
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new("release_then_wait", [Configure, Release, WaitForOutputs])
        .work_done_on_eos();

    let report = common::suite(MockPlatform::new(), dir.path())
        .run_scenario(&scenario)
        .await;

    assert!(!report.passed);
    assert_eq!(report.completion, Some(CompletionPath::Halted));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::UnexpectedFailure);
    assert_eq!(report.failures[0].step.as_deref(), Some("WAIT_FOR_OUTPUTS"));
    assert!(report.duration_ms < common::config(dir.path()).case_timeout_ms);
    logger.record(TestPhase::Verify, "case report", &report);
    logger.pass();
}
