//! Built-in scenario catalog.
//!
//! One group per lifecycle operation, each walking the operation through
//! every encoder state, plus a group of EOS combinations. Most cases are
//! built from a shared prefix that drives the encoder to a given state.

use crate::scenario::Scenario;
use crate::step::Step::{self, *};

const ERR: Step = ExpectErrorMarker;

/// Configured, surface acquired, stream parameters set, prepared.
const PREPARED: &[Step] = &[Configure, GetSurface, SetStreamParams, Prepare];

/// Stream started into the surface, then the encoder started.
const RUNNING: &[Step] = &[
    Configure,
    GetSurface,
    SetStreamParams,
    Prepare,
    StartStream,
    Start,
];

/// Encoder started, then a short stream held until its EOS is drained.
const AT_EOS: &[Step] = &[
    Configure,
    GetSurface,
    SetStreamParams,
    Prepare,
    Start,
    StartStream,
    Hold,
    AssertEosSeen,
];

/// Frames pushed by the EOS prefix.
const EOS_FRAMES: u32 = 2;

fn steps(parts: &[&[Step]]) -> Vec<Step> {
    parts.concat()
}

fn case(name: &str, title: &str, parts: &[&[Step]]) -> Scenario {
    Scenario::new(name, steps(parts)).with_title(title)
}

fn eos_case(name: &str, title: &str, tail: &[Step]) -> Scenario {
    case(name, title, &[AT_EOS, tail]).with_frame_total(EOS_FRAMES)
}

fn configure_group() -> Vec<Scenario> {
    vec![
        case("configure_0100", "configure from idle", &[&[Configure, End]]),
        case(
            "configure_0200",
            "configure when prepared fails",
            &[PREPARED, &[Configure, ERR, End]],
        ),
        case(
            "configure_0300",
            "configure when running fails",
            &[RUNNING, &[Configure, ERR, StopStream, End]],
        ),
        case(
            "configure_0400",
            "configure when flushed fails",
            &[RUNNING, &[Flush, Configure, ERR, StopStream, End]],
        ),
        case(
            "configure_0500",
            "configure when stopped fails",
            &[RUNNING, &[Stop, Configure, ERR, StopStream, End]],
        ),
        eos_case(
            "configure_0600",
            "configure at EOS fails",
            &[Configure, ERR, StopStream, End],
        ),
        case(
            "configure_0700",
            "configure after reset from idle",
            &[&[Reset, Configure, End]],
        ),
        case(
            "configure_0800",
            "second configure fails",
            &[&[Configure, Configure, ERR, End]],
        ),
        case(
            "configure_0900",
            "configure, reset, configure again",
            &[&[Configure, Reset, Configure, End]],
        ),
    ]
}

fn prepare_group() -> Vec<Scenario> {
    vec![
        case("prepare_0100", "prepare from idle fails", &[&[Prepare, ERR, End]]),
        case("prepare_0200", "prepare after configure", &[PREPARED, &[End]]),
        case(
            "prepare_0300",
            "second prepare fails",
            &[PREPARED, &[Prepare, ERR, End]],
        ),
        case(
            "prepare_0400",
            "prepare when running fails",
            &[RUNNING, &[Prepare, ERR, StopStream, End]],
        ),
        case(
            "prepare_0500",
            "prepare when flushed fails",
            &[RUNNING, &[Flush, Prepare, ERR, StopStream, End]],
        ),
        case(
            "prepare_0600",
            "prepare when stopped fails",
            &[RUNNING, &[Stop, Prepare, ERR, StopStream, End]],
        ),
        eos_case(
            "prepare_0700",
            "prepare at EOS fails",
            &[Prepare, ERR, StopStream, End],
        ),
        case(
            "prepare_0800",
            "prepare after reset fails",
            &[RUNNING, &[Reset, Prepare, ERR, StopStream, End]],
        ),
    ]
}

fn start_group() -> Vec<Scenario> {
    vec![
        case("start_0100", "start from idle fails", &[&[Start, ERR, End]]),
        case(
            "start_0200",
            "start when configured fails",
            &[&[Configure, Start, ERR, End]],
        ),
        case(
            "start_0300",
            "start after prepare encodes to EOS",
            &[RUNNING, &[WaitForOutputs]],
        )
        .work_done_on_eos(),
        case(
            "start_0400",
            "second start fails",
            &[RUNNING, &[Start, ERR, StopStream, End]],
        ),
        case(
            "start_0500",
            "start when flushed fails",
            &[RUNNING, &[Flush, Start, ERR, StopStream, End]],
        ),
        case(
            "start_0600",
            "start after stop encodes to EOS",
            &[RUNNING, &[Stop, Start, WaitForOutputs]],
        )
        .work_done_on_eos(),
        eos_case(
            "start_0700",
            "start at EOS fails",
            &[Start, ERR, StopStream, End],
        ),
        case(
            "start_0800",
            "start after reset fails",
            &[RUNNING, &[Reset, Start, ERR, StopStream, End]],
        ),
    ]
}

fn flush_group() -> Vec<Scenario> {
    vec![
        case("flush_0100", "flush from idle fails", &[&[Flush, ERR, End]]),
        case(
            "flush_0200",
            "flush when configured fails",
            &[&[Configure, Flush, ERR, End]],
        ),
        case(
            "flush_0300",
            "flush when prepared fails",
            &[PREPARED, &[Flush, ERR, End]],
        ),
        case(
            "flush_0400",
            "flush when running",
            &[PREPARED, &[Start, StartStream, Flush, StopStream, End]],
        ),
        case(
            "flush_0500",
            "second flush then encode to EOS",
            &[RUNNING, &[Flush, Flush, WaitForOutputs]],
        )
        .work_done_on_eos(),
        case(
            "flush_0600",
            "flush when stopped fails",
            &[RUNNING, &[Stop, Flush, ERR, StopStream, End]],
        ),
        eos_case("flush_0700", "flush at EOS", &[Flush, StopStream, End]),
        case(
            "flush_0800",
            "flush after reset fails",
            &[RUNNING, &[Reset, Flush, ERR, StopStream, End]],
        ),
    ]
}

fn stop_group() -> Vec<Scenario> {
    vec![
        case("stop_0100", "stop from idle fails", &[&[Stop, ERR, End]]),
        case(
            "stop_0200",
            "stop when configured fails",
            &[&[Configure, Stop, ERR, End]],
        ),
        case(
            "stop_0300",
            "stop when prepared fails",
            &[PREPARED, &[Stop, ERR, End]],
        ),
        case(
            "stop_0400",
            "stop when running",
            &[RUNNING, &[Stop, StopStream, End]],
        ),
        case(
            "stop_0500",
            "stop when flushed",
            &[RUNNING, &[Flush, Stop, StopStream, End]],
        ),
        case(
            "stop_0600",
            "second stop fails",
            &[RUNNING, &[Stop, Stop, ERR, StopStream, End]],
        ),
        eos_case("stop_0700", "stop at EOS", &[Stop, StopStream, End]),
        case(
            "stop_0800",
            "stop after reset fails",
            &[RUNNING, &[Reset, Stop, ERR, StopStream, End]],
        ),
    ]
}

fn reset_group() -> Vec<Scenario> {
    vec![
        case("reset_0100", "reset from idle", &[&[Reset, End]]),
        case(
            "reset_0200",
            "reset when configured",
            &[&[Configure, Reset, End]],
        ),
        case("reset_0300", "reset when prepared", &[PREPARED, &[Reset, End]]),
        case(
            "reset_0400",
            "reset when running",
            &[RUNNING, &[Reset, StopStream, End]],
        ),
        case(
            "reset_0500",
            "reset when flushed",
            &[RUNNING, &[Flush, Reset, StopStream, End]],
        ),
        case(
            "reset_0600",
            "reset when stopped",
            &[RUNNING, &[Stop, Reset, StopStream, End]],
        ),
        eos_case("reset_0700", "reset at EOS", &[Reset, StopStream, End]),
        case(
            "reset_0800",
            "second reset",
            &[RUNNING, &[Reset, Reset, StopStream, End]],
        ),
    ]
}

fn release_group() -> Vec<Scenario> {
    vec![
        case("release_0100", "release from idle", &[&[Release, End]]),
        case(
            "release_0200",
            "release when configured",
            &[&[Configure, Release, End]],
        ),
        case(
            "release_0300",
            "release when prepared",
            &[PREPARED, &[Release, End]],
        ),
        case(
            "release_0400",
            "release when running",
            &[RUNNING, &[Release, StopStream, End]],
        ),
        case(
            "release_0500",
            "release when flushed",
            &[RUNNING, &[Flush, Release, StopStream, End]],
        ),
        case(
            "release_0600",
            "release when stopped",
            &[RUNNING, &[Stop, Release, StopStream, End]],
        ),
        eos_case("release_0700", "release at EOS", &[Release, StopStream, End]),
        case(
            "release_0800",
            "second release fails",
            &[RUNNING, &[Release, Release, ERR, StopStream, End]],
        ),
    ]
}

fn eos_group() -> Vec<Scenario> {
    vec![
        eos_case(
            "eos_0100",
            "flush and stop after EOS",
            &[Flush, Stop, StopStream, End],
        ),
        eos_case(
            "eos_0200",
            "flush after EOS restarts the stream",
            &[Flush, StartStream, WaitForOutputs],
        )
        .flush_at_eos(),
        eos_case(
            "eos_0300",
            "reset and configure after EOS",
            &[Reset, Configure, StopStream, End],
        ),
        eos_case(
            "eos_0400",
            "stop and restart after EOS",
            &[
                StopStream,
                Stop,
                RestartAfterEos,
                Start,
                SetStreamParams,
                StartStream,
                WaitForOutputs,
            ],
        ),
        eos_case(
            "eos_0500",
            "stop, start, stop and release after EOS",
            &[Stop, Start, Stop, StopStream, Release, End],
        ),
    ]
}

/// Every built-in lifecycle scenario, grouped by operation.
pub fn promise_scenarios() -> Vec<Scenario> {
    [
        configure_group(),
        prepare_group(),
        start_group(),
        flush_group(),
        stop_group(),
        reset_group(),
        release_group(),
        eos_group(),
    ]
    .into_iter()
    .flatten()
    .collect()
}
