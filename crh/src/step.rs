//! Step vocabulary.
//!
//! A scenario is a flat list of [`Step`]s. Each step is dispatched by the
//! sequencer in one of three ways (see [`Dispatch`]); `EXPECT_ERROR_MARKER`
//! is never dispatched on its own, it is consumed by the lifecycle step
//! in front of it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::platform::CodecOp;

/// One abstract action in a scenario.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Step {
    Configure,
    GetSurface,
    SetStreamParams,
    Prepare,
    StartStream,
    StopStream,
    Start,
    Flush,
    Stop,
    Reset,
    Release,
    Hold,
    ExpectErrorMarker,
    WaitForOutputs,
    AssertEosSeen,
    /// Explicit reset point after EOS: clears drain bookkeeping and arms
    /// passive completion on the next EOS.
    RestartAfterEos,
    End,
    /// A name from a textual table that matches no known step.
    Unrecognized(String),
}

/// How the sequencer runs a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Synchronous side effect, then continue.
    FireAndContinue,
    /// Await a resource operation while draining output.
    AwaitThenContinue,
    /// Wait a fixed interval while draining output.
    DelayedContinue,
    /// Park until the drain completes the case.
    AwaitDrain,
    /// Resolve completion and stop.
    Terminate,
    /// Consumed by the preceding lifecycle step.
    Marker,
}

impl Step {
    /// Every named step, in vocabulary order.
    pub const ALL: [Step; 17] = [
        Step::Configure,
        Step::GetSurface,
        Step::SetStreamParams,
        Step::Prepare,
        Step::StartStream,
        Step::StopStream,
        Step::Start,
        Step::Flush,
        Step::Stop,
        Step::Reset,
        Step::Release,
        Step::Hold,
        Step::ExpectErrorMarker,
        Step::WaitForOutputs,
        Step::AssertEosSeen,
        Step::RestartAfterEos,
        Step::End,
    ];

    pub fn name(&self) -> &str {
        match self {
            Self::Configure => "CONFIGURE",
            Self::GetSurface => "GET_SURFACE",
            Self::SetStreamParams => "SET_STREAM_PARAMS",
            Self::Prepare => "PREPARE",
            Self::StartStream => "START_STREAM",
            Self::StopStream => "STOP_STREAM",
            Self::Start => "START",
            Self::Flush => "FLUSH",
            Self::Stop => "STOP",
            Self::Reset => "RESET",
            Self::Release => "RELEASE",
            Self::Hold => "HOLD",
            Self::ExpectErrorMarker => "EXPECT_ERROR_MARKER",
            Self::WaitForOutputs => "WAIT_FOR_OUTPUTS",
            Self::AssertEosSeen => "ASSERT_EOS_SEEN",
            Self::RestartAfterEos => "RESTART_AFTER_EOS",
            Self::End => "END",
            Self::Unrecognized(name) => name,
        }
    }

    pub fn dispatch(&self) -> Dispatch {
        match self {
            Self::Configure
            | Self::GetSurface
            | Self::Prepare
            | Self::Start
            | Self::Flush
            | Self::Stop
            | Self::Reset
            | Self::Release => Dispatch::AwaitThenContinue,
            Self::SetStreamParams
            | Self::StartStream
            | Self::StopStream
            | Self::AssertEosSeen
            | Self::RestartAfterEos
            | Self::Unrecognized(_) => Dispatch::FireAndContinue,
            Self::Hold => Dispatch::DelayedContinue,
            Self::WaitForOutputs => Dispatch::AwaitDrain,
            Self::End => Dispatch::Terminate,
            Self::ExpectErrorMarker => Dispatch::Marker,
        }
    }

    /// The resource operation behind a lifecycle step.
    pub fn codec_op(&self) -> Option<CodecOp> {
        match self {
            Self::Configure => Some(CodecOp::Configure),
            Self::GetSurface => Some(CodecOp::GetInputSurface),
            Self::Prepare => Some(CodecOp::Prepare),
            Self::Start => Some(CodecOp::Start),
            Self::Flush => Some(CodecOp::Flush),
            Self::Stop => Some(CodecOp::Stop),
            Self::Reset => Some(CodecOp::Reset),
            Self::Release => Some(CodecOp::Release),
            _ => None,
        }
    }

    /// Whether an `EXPECT_ERROR_MARKER` may follow this step.
    pub fn accepts_error_marker(&self) -> bool {
        self.codec_op().is_some()
    }

    /// Whether the step ends the sequencer's walk through the list.
    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::End | Self::WaitForOutputs)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn lifecycle(name: &str) -> Option<Step> {
    Some(match name {
        "CONFIGURE" => Step::Configure,
        "PREPARE" => Step::Prepare,
        "START" => Step::Start,
        "FLUSH" => Step::Flush,
        "STOP" => Step::Stop,
        "RESET" => Step::Reset,
        "RELEASE" => Step::Release,
        "GET_SURFACE" | "GETSURFACE" | "GET_INPUT_SURFACE" => Step::GetSurface,
        _ => return None,
    })
}

fn stream(name: &str) -> Option<Step> {
    Some(match name {
        "START" => Step::StartStream,
        "STOP" | "CLOSE" => Step::StopStream,
        "PARAMS" | "PARAM" => Step::SetStreamParams,
        _ => return None,
    })
}

impl FromStr for Step {
    type Err = std::convert::Infallible;

    /// Parse a step name. Matching is case-insensitive, `-` and spaces are
    /// treated as `_`, and legacy table aliases are accepted. Unknown names
    /// become [`Step::Unrecognized`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();

        if let Some(rest) = normalized.strip_prefix("ENCODE:")
            && let Some(step) = lifecycle(rest)
        {
            return Ok(step);
        }
        if let Some(rest) = normalized.strip_prefix("STREAM:")
            && let Some(step) = stream(rest)
        {
            return Ok(step);
        }
        if let Some(step) = lifecycle(&normalized) {
            return Ok(step);
        }

        Ok(match normalized.as_str() {
            "SET_STREAM_PARAMS" | "SETSTREAMPARAM" | "SET_STREAM_PARAM" => Step::SetStreamParams,
            "START_STREAM" | "STARTSTREAM" => Step::StartStream,
            "STOP_STREAM" | "STOPSTREAM" | "CLOSE_STREAM" => Step::StopStream,
            "HOLD" | "HOLDON" | "HOLD_ON" => Step::Hold,
            "EXPECT_ERROR_MARKER" | "EXPECT_ERROR" | "ERROR" => Step::ExpectErrorMarker,
            "WAIT_FOR_OUTPUTS" | "WAITFORALLOUTS" | "WAIT_FOR_ALL_OUTS" => Step::WaitForOutputs,
            "ASSERT_EOS_SEEN" | "JUDGE_EOS" => Step::AssertEosSeen,
            "RESTART_AFTER_EOS" => Step::RestartAfterEos,
            "END" => Step::End,
            _ => Step::Unrecognized(s.trim().to_string()),
        })
    }
}

impl From<String> for Step {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(step) => step,
            Err(never) => match never {},
        }
    }
}

impl From<Step> for String {
    fn from(step: Step) -> Self {
        step.name().to_string()
    }
}

/// Render a sequence as `A -> B -> C`.
pub fn render(steps: &[Step]) -> String {
    steps
        .iter()
        .map(Step::name)
        .collect::<Vec<_>>()
        .join(" -> ")
}
