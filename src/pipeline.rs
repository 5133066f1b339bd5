use std::fmt;

use crate::error::{CogtileError, CogtileResult};

/// Which output channels a step applies to. Anything other than `All`
/// confines the operation to exactly one channel and leaves the other two
/// numerically unchanged for that step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandScope {
    #[default]
    All,
    Red,
    Green,
    Blue,
}

impl BandScope {
    pub fn as_str(self) -> &'static str {
        match self {
            BandScope::All => "all",
            BandScope::Red => "red",
            BandScope::Green => "green",
            BandScope::Blue => "blue",
        }
    }
}

/// A band-math operation together with its numeric parameters.
///
/// The parameter values are draw-time inputs (uniforms on the GPU path);
/// only the variant and its scope enter the program signature.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum Operation {
    SigmoidalContrast {
        contrast: f32,
        bias: f32,
    },
    Gamma {
        value: f32,
    },
    /// Rescale `[min, max]` (in source units) to `[0, 1]`, clamping outside.
    /// `stat_min`/`stat_max` are slider bounds carried for the editing UI and
    /// do not enter the math.
    Linear {
        min: f32,
        max: f32,
        stat_min: f32,
        stat_max: f32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    SigmoidalContrast,
    Gamma,
    Linear,
}

impl Operation {
    /// The default parameter values a freshly added step starts with.
    pub fn with_defaults(kind: OperationKind) -> Self {
        match kind {
            OperationKind::SigmoidalContrast => Operation::SigmoidalContrast {
                contrast: 50.0,
                bias: 0.15,
            },
            OperationKind::Gamma => Operation::Gamma { value: 1.0 },
            OperationKind::Linear => Operation::Linear {
                min: 0.0,
                max: 100.0,
                stat_min: 0.0,
                stat_max: 65535.0,
            },
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::SigmoidalContrast { .. } => OperationKind::SigmoidalContrast,
            Operation::Gamma { .. } => OperationKind::Gamma,
            Operation::Linear { .. } => OperationKind::Linear,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::SigmoidalContrast { .. } => "sigmoidal-contrast",
            Operation::Gamma { .. } => "gamma",
            Operation::Linear { .. } => "linear",
        }
    }

    fn patched(self, patch: &StepPatch) -> Self {
        match self {
            Operation::SigmoidalContrast { contrast, bias } => Operation::SigmoidalContrast {
                contrast: patch.contrast.unwrap_or(contrast),
                bias: patch.bias.unwrap_or(bias),
            },
            Operation::Gamma { value } => Operation::Gamma {
                value: patch.value.unwrap_or(value),
            },
            Operation::Linear {
                min,
                max,
                stat_min,
                stat_max,
            } => Operation::Linear {
                min: patch.min.unwrap_or(min),
                max: patch.max.unwrap_or(max),
                stat_min: patch.stat_min.unwrap_or(stat_min),
                stat_max: patch.stat_max.unwrap_or(stat_max),
            },
        }
    }
}

/// One step of a band-math pipeline. Immutable once constructed; edits go
/// through [`Pipeline::edit_step`] and produce a new sequence.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PipelineStep {
    #[serde(flatten)]
    pub operation: Operation,
    #[serde(default, rename = "bands")]
    pub scope: BandScope,
}

impl PipelineStep {
    pub fn new(operation: Operation, scope: BandScope) -> Self {
        Self { operation, scope }
    }

    pub fn with_defaults(kind: OperationKind, scope: BandScope) -> Self {
        Self::new(Operation::with_defaults(kind), scope)
    }
}

/// A partial edit of one step: only the provided fields change. Fields that
/// do not apply to the step's operation are ignored.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StepPatch {
    pub contrast: Option<f32>,
    pub bias: Option<f32>,
    pub value: Option<f32>,
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub stat_min: Option<f32>,
    pub stat_max: Option<f32>,
    pub bands: Option<BandScope>,
}

/// Cache key for compiled GPU programs: the `(operation, scope)` sequence of
/// a pipeline with all numeric parameters stripped. Two pipelines that differ
/// only in parameter values share one signature, so parameter edits never
/// force a recompile.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineSignature(String);

impl PipelineSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PipelineSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered band-math program. Later steps see the output of earlier ones.
///
/// All edit operations are persistent: they return a new `Pipeline` and leave
/// the receiver untouched, so a failed edit cannot corrupt shared state.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
}

impl Pipeline {
    pub fn new(steps: Vec<PipelineStep>) -> Self {
        Self { steps }
    }

    /// A representative natural-color stretch: a global sigmoidal contrast
    /// plus slight red/blue gamma rebalancing.
    pub fn example() -> Self {
        Self::new(vec![
            PipelineStep::new(
                Operation::SigmoidalContrast {
                    contrast: 50.0,
                    bias: 0.16,
                },
                BandScope::All,
            ),
            PipelineStep::new(Operation::Gamma { value: 1.03 }, BandScope::Red),
            PipelineStep::new(Operation::Gamma { value: 0.925 }, BandScope::Blue),
        ])
    }

    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    fn check_index(&self, index: usize) -> CogtileResult<()> {
        if index >= self.steps.len() {
            return Err(CogtileError::InvalidIndex {
                index,
                len: self.steps.len(),
            });
        }
        Ok(())
    }

    /// Append a step at the end.
    pub fn add_step(&self, step: PipelineStep) -> Pipeline {
        let mut steps = self.steps.clone();
        steps.push(step);
        Pipeline { steps }
    }

    /// Insert a step before `index`; `index == len` appends.
    pub fn insert_step(&self, index: usize, step: PipelineStep) -> CogtileResult<Pipeline> {
        if index > self.steps.len() {
            return Err(CogtileError::InvalidIndex {
                index,
                len: self.steps.len(),
            });
        }
        let mut steps = self.steps.clone();
        steps.insert(index, step);
        Ok(Pipeline { steps })
    }

    pub fn remove_step(&self, index: usize) -> CogtileResult<Pipeline> {
        self.check_index(index)?;
        let mut steps = self.steps.clone();
        steps.remove(index);
        Ok(Pipeline { steps })
    }

    /// Remove the step at `from` and re-insert it at `to`, preserving its
    /// current parameter values.
    pub fn move_step(&self, from: usize, to: usize) -> CogtileResult<Pipeline> {
        self.check_index(from)?;
        self.check_index(to)?;
        let mut steps = self.steps.clone();
        let step = steps.remove(from);
        steps.insert(to, step);
        Ok(Pipeline { steps })
    }

    /// Apply a partial edit to the step at `index`.
    pub fn edit_step(&self, index: usize, patch: &StepPatch) -> CogtileResult<Pipeline> {
        self.check_index(index)?;
        let mut steps = self.steps.clone();
        let step = &mut steps[index];
        step.operation = step.operation.patched(patch);
        if let Some(bands) = patch.bands {
            step.scope = bands;
        }
        Ok(Pipeline { steps })
    }

    /// Derive the program cache key: `op#scope` fragments joined with `/`.
    pub fn signature(&self) -> PipelineSignature {
        let parts: Vec<String> = self
            .steps
            .iter()
            .map(|s| format!("{}#{}", s.operation.name(), s.scope.as_str()))
            .collect();
        PipelineSignature(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_step_pipeline() -> Pipeline {
        Pipeline::new(vec![
            PipelineStep::with_defaults(OperationKind::SigmoidalContrast, BandScope::All),
            PipelineStep::new(Operation::Gamma { value: 1.2 }, BandScope::Red),
            PipelineStep::with_defaults(OperationKind::Linear, BandScope::Blue),
        ])
    }

    #[test]
    fn defaults_match_the_documented_constants() {
        assert_eq!(
            Operation::with_defaults(OperationKind::SigmoidalContrast),
            Operation::SigmoidalContrast {
                contrast: 50.0,
                bias: 0.15
            }
        );
        assert_eq!(
            Operation::with_defaults(OperationKind::Gamma),
            Operation::Gamma { value: 1.0 }
        );
        assert_eq!(
            Operation::with_defaults(OperationKind::Linear),
            Operation::Linear {
                min: 0.0,
                max: 100.0,
                stat_min: 0.0,
                stat_max: 65535.0
            }
        );
    }

    #[test]
    fn edits_are_persistent_and_bounds_checked() {
        let p = three_step_pipeline();

        let removed = p.remove_step(1).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(p.len(), 3, "original must be untouched");

        assert!(matches!(
            p.remove_step(3),
            Err(CogtileError::InvalidIndex { index: 3, len: 3 })
        ));
        assert!(p.edit_step(7, &StepPatch::default()).is_err());
        assert!(p.move_step(0, 3).is_err());
        assert!(p.insert_step(4, p.steps()[0]).is_err());
    }

    #[test]
    fn move_step_round_trip_is_a_no_op() {
        let p = three_step_pipeline();
        let moved = p.move_step(0, 2).unwrap();
        assert_ne!(moved, p);
        let back = moved.move_step(2, 0).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn move_step_preserves_just_edited_params() {
        let p = three_step_pipeline()
            .edit_step(
                1,
                &StepPatch {
                    value: Some(0.8),
                    ..StepPatch::default()
                },
            )
            .unwrap();
        let moved = p.move_step(1, 0).unwrap();
        assert_eq!(moved.steps()[0].operation, Operation::Gamma { value: 0.8 });
    }

    #[test]
    fn edit_step_ignores_foreign_fields() {
        let p = three_step_pipeline();
        let edited = p
            .edit_step(
                1,
                &StepPatch {
                    contrast: Some(99.0), // not a gamma field
                    value: Some(1.5),
                    ..StepPatch::default()
                },
            )
            .unwrap();
        assert_eq!(edited.steps()[1].operation, Operation::Gamma { value: 1.5 });
    }

    #[test]
    fn signature_excludes_parameter_values() {
        let p = three_step_pipeline();
        let edited = p
            .edit_step(
                0,
                &StepPatch {
                    contrast: Some(10.0),
                    bias: Some(0.5),
                    ..StepPatch::default()
                },
            )
            .unwrap();
        assert_eq!(p.signature(), edited.signature());
        assert_eq!(
            p.signature().as_str(),
            "sigmoidal-contrast#all/gamma#red/linear#blue"
        );

        let rescoped = p
            .edit_step(
                1,
                &StepPatch {
                    bands: Some(BandScope::Green),
                    ..StepPatch::default()
                },
            )
            .unwrap();
        assert_ne!(p.signature(), rescoped.signature());
    }

    #[test]
    fn steps_round_trip_through_json() {
        let p = Pipeline::example();
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"operation\":\"sigmoidal-contrast\""));
        assert!(json.contains("\"bands\":\"red\""));
        let back: Pipeline = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn scope_defaults_to_all_when_absent() {
        let step: PipelineStep =
            serde_json::from_str(r#"{"operation":"gamma","value":1.1}"#).unwrap();
        assert_eq!(step.scope, BandScope::All);
    }
}
