//! Scenario definitions and TOML scenario tables.
//!
//! A scenario is pure data: a name, a step list and a handful of options
//! that change how the output drain treats end-of-stream.
//!
//! ```toml
//! [[scenario]]
//! name = "configure_0800"
//! title = "configure -> configure"
//! steps = ["CONFIGURE", "CONFIGURE", "EXPECT_ERROR_MARKER", "END"]
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::step::{Step, render};

/// One reliability case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub title: String,
    pub steps: Vec<Step>,
    /// Overrides the configured stream frame count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_total: Option<u32>,
    /// Tear down and complete the case when the drain sees EOS.
    #[serde(default)]
    pub work_done_on_eos: bool,
    /// The first successful FLUSH closes the stream and acts as an EOS
    /// reset point.
    #[serde(default)]
    pub flush_at_eos: bool,
    /// Query the output format once on the first output event.
    #[serde(default)]
    pub query_output_format: bool,
}

impl Scenario {
    pub fn new(name: impl Into<String>, steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            name: name.into(),
            title: String::new(),
            steps: steps.into_iter().collect(),
            frame_total: None,
            work_done_on_eos: false,
            flush_at_eos: false,
            query_output_format: false,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn with_frame_total(mut self, frames: u32) -> Self {
        self.frame_total = Some(frames);
        self
    }

    #[must_use]
    pub fn work_done_on_eos(mut self) -> Self {
        self.work_done_on_eos = true;
        self
    }

    #[must_use]
    pub fn flush_at_eos(mut self) -> Self {
        self.flush_at_eos = true;
        self
    }

    #[must_use]
    pub fn query_output_format(mut self) -> Self {
        self.query_output_format = true;
        self
    }

    pub fn rendered_steps(&self) -> String {
        render(&self.steps)
    }

    /// Static checks on the step list.
    pub fn validate(&self) -> Vec<ScenarioWarning> {
        let mut warnings = Vec::new();

        if self.steps.is_empty() {
            warnings.push(ScenarioWarning::error(None, "scenario has no steps"));
            return warnings;
        }

        let terminator = self.steps.iter().position(Step::is_terminator);
        match terminator {
            Some(index) if index + 1 < self.steps.len() => {
                warnings.push(ScenarioWarning::warning(
                    Some(index + 1),
                    format!(
                        "{} step(s) after {} are never executed",
                        self.steps.len() - index - 1,
                        self.steps[index]
                    ),
                ));
            }
            Some(_) => {}
            None => warnings.push(ScenarioWarning::warning(
                None,
                "no END or WAIT_FOR_OUTPUTS; the case completes when the list runs out",
            )),
        }

        if self.work_done_on_eos && self.steps.contains(&Step::End) {
            warnings.push(ScenarioWarning::warning(
                None,
                "END together with work_done_on_eos allows two completion paths",
            ));
        }

        let mut armed = self.work_done_on_eos;
        for (index, step) in self.steps.iter().enumerate() {
            match step {
                Step::ExpectErrorMarker => {
                    let follows_op = index
                        .checked_sub(1)
                        .is_some_and(|prev| self.steps[prev].accepts_error_marker());
                    if !follows_op {
                        warnings.push(ScenarioWarning::warning(
                            Some(index),
                            "EXPECT_ERROR_MARKER does not follow a resource operation",
                        ));
                    }
                }
                Step::Unrecognized(name) => warnings.push(ScenarioWarning::warning(
                    Some(index),
                    format!("unrecognized step '{name}' will be skipped"),
                )),
                Step::RestartAfterEos => armed = true,
                Step::Flush if self.flush_at_eos => armed = true,
                Step::WaitForOutputs if !armed => {
                    warnings.push(ScenarioWarning::error(
                        Some(index),
                        "WAIT_FOR_OUTPUTS without work_done_on_eos can never complete",
                    ));
                }
                _ => {}
            }
            if terminator == Some(index) {
                break;
            }
        }

        warnings
    }
}

/// How serious a validation finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioWarning {
    pub severity: Severity,
    /// Offending step, if the finding is tied to one.
    pub index: Option<usize>,
    pub message: String,
}

impl ScenarioWarning {
    fn warning(index: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            index,
            message: message.into(),
        }
    }

    fn error(index: Option<usize>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            index,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ScenarioWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match self.index {
            Some(index) => write!(f, "{level} at step {index}: {}", self.message),
            None => write!(f, "{level}: {}", self.message),
        }
    }
}

/// A set of scenarios loaded from `[[scenario]]` TOML tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioTable {
    #[serde(rename = "scenario", default)]
    pub scenarios: Vec<Scenario>,
}

impl ScenarioTable {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Read, parse and check a table file.
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_toml_str(&content).map_err(|source| HarnessError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        table.check()?;
        Ok(table)
    }

    /// Reject duplicate names and error-level findings; return the rest.
    pub fn check(&self) -> HarnessResult<Vec<(String, ScenarioWarning)>> {
        let mut seen = HashSet::new();
        let mut findings = Vec::new();
        for scenario in &self.scenarios {
            if !seen.insert(scenario.name.as_str()) {
                return Err(HarnessError::InvalidScenario {
                    name: scenario.name.clone(),
                    reason: "duplicate scenario name".to_string(),
                });
            }
            for warning in scenario.validate() {
                if warning.is_error() {
                    return Err(HarnessError::InvalidScenario {
                        name: scenario.name.clone(),
                        reason: warning.to_string(),
                    });
                }
                findings.push((scenario.name.clone(), warning));
            }
        }
        Ok(findings)
    }

    /// Scenarios whose name contains `filter`.
    pub fn filtered(self, filter: Option<&str>) -> Self {
        match filter {
            Some(filter) => Self {
                scenarios: self
                    .scenarios
                    .into_iter()
                    .filter(|scenario| scenario.name.contains(filter))
                    .collect(),
            },
            None => self,
        }
    }
}

impl From<Vec<Scenario>> for ScenarioTable {
    fn from(scenarios: Vec<Scenario>) -> Self {
        Self { scenarios }
    }
}
