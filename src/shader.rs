//! WGSL program synthesis for the GPU backend.
//!
//! A pipeline compiles to a single-pass fragment shader whose body chains the
//! band operations in order. Each operation variant contributes its uniform
//! field declarations and a formula call; numeric parameters are bound
//! through the uniform block at draw time, so two pipelines with the same
//! [`PipelineSignature`](crate::pipeline::PipelineSignature) share one
//! program and parameter edits never recompile.
//!
//! The formula functions are literal transliterations of the scalar math in
//! `band_ops.rs`; the parity test holds the two within 1/255 per channel.

use std::fmt::Write as _;

use crate::pipeline::{BandScope, Operation, Pipeline};

/// Uniform block layout, shared between the generated WGSL `Params` struct
/// and [`pack_params`]: two `vec4<f32>` headers, then one `f32` per
/// parameter field in step order, padded to a 16-byte multiple.
///
/// `divisor.xyz` brings each channel's raw texel value down to `[0, 1]`
/// (bands can carry different declared maxima) and `divisor.w` flags an
/// interleaved single-texture tile; `scale.xyz` rescales each normalized
/// channel back to its own source units for `linear` bounds.
pub const HEADER_SIZE: u64 = 32;

/// A synthesized program: WGSL source plus the uniform buffer size its
/// `Params` struct requires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramSource {
    pub wgsl: String,
    pub params_size: u64,
}

fn uniform_fields(op: &Operation) -> &'static [&'static str] {
    match op {
        Operation::SigmoidalContrast { .. } => &["contrast", "bias"],
        Operation::Gamma { .. } => &["value"],
        Operation::Linear { .. } => &["min", "max"],
    }
}

fn param_values(op: &Operation) -> Vec<f32> {
    match *op {
        Operation::SigmoidalContrast { contrast, bias } => vec![contrast, bias],
        Operation::Gamma { value } => vec![value],
        Operation::Linear { min, max, .. } => vec![min, max],
    }
}

fn scale_component(var: &str) -> &'static str {
    match var {
        "red" => "x",
        "green" => "y",
        _ => "z",
    }
}

fn formula_call(op: &Operation, step: usize, var: &str) -> String {
    match op {
        Operation::SigmoidalContrast { .. } => {
            format!("op_sigmoidal({var}, params.s{step}_contrast, params.s{step}_bias)")
        }
        Operation::Gamma { .. } => format!("op_gamma({var}, params.s{step}_value)"),
        Operation::Linear { .. } => {
            let component = scale_component(var);
            format!(
                "op_linear({var} * params.scale.{component}, params.s{step}_min, params.s{step}_max)"
            )
        }
    }
}

fn padded_size(unpadded: u64) -> u64 {
    unpadded.div_ceil(16) * 16
}

/// Total uniform buffer size for a pipeline.
pub fn params_size(pipeline: &Pipeline) -> u64 {
    let fields: u64 = pipeline
        .steps()
        .iter()
        .map(|s| uniform_fields(&s.operation).len() as u64)
        .sum();
    padded_size(HEADER_SIZE + fields * 4)
}

/// Pack the draw-time uniform values for a pipeline into the byte layout the
/// generated `Params` struct expects.
pub fn pack_params(
    pipeline: &Pipeline,
    divisors: [f32; 3],
    single_texture: bool,
    scales: [f32; 3],
) -> Vec<u8> {
    let size = params_size(pipeline) as usize;
    let mut bytes = Vec::with_capacity(size);
    for v in [
        divisors[0],
        divisors[1],
        divisors[2],
        if single_texture { 1.0 } else { 0.0 },
        scales[0],
        scales[1],
        scales[2],
        0.0,
    ] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    for step in pipeline.steps() {
        for v in param_values(&step.operation) {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
    }
    bytes.resize(size, 0);
    bytes
}

const FORMULA_LIB: &str = r#"
fn op_gamma(v: f32, g: f32) -> f32 {
    return pow(v, 1.0 / g);
}

fn op_sigmoidal(v: f32, contrast: f32, bias: f32) -> f32 {
    let alpha = bias;
    let beta = contrast;
    if (abs(beta) < 1e-6) {
        return v;
    }
    if (beta > 0.0) {
        let denominator = 1.0 / (1.0 + exp(beta * (alpha - 1.0))) - 1.0 / (1.0 + exp(beta * alpha));
        let numerator = 1.0 / (1.0 + exp(beta * (alpha - v))) - 1.0 / (1.0 + exp(beta * alpha));
        return numerator / denominator;
    }
    let s0 = 1.0 / (1.0 + exp(beta * alpha));
    let s1 = 1.0 / (1.0 + exp(beta * alpha - beta));
    let u = v * s1 - v * s0 + s0;
    return (beta * alpha - log(1.0 / u - 1.0)) / beta;
}

fn op_linear(raw: f32, lo: f32, hi: f32) -> f32 {
    if (hi <= lo) {
        return 0.0;
    }
    return clamp((raw - lo) / (hi - lo), 0.0, 1.0);
}
"#;

/// Synthesize the WGSL program for a pipeline. The output depends only on
/// the pipeline's signature, never on its parameter values.
pub fn pipeline_wgsl(pipeline: &Pipeline) -> ProgramSource {
    let mut declarations = String::new();
    for (i, step) in pipeline.steps().iter().enumerate() {
        for field in uniform_fields(&step.operation) {
            writeln!(declarations, "    s{i}_{field}: f32,").expect("write to string");
        }
    }

    let mut body = String::new();
    for (i, step) in pipeline.steps().iter().enumerate() {
        match step.scope {
            BandScope::All => {
                for var in ["red", "green", "blue"] {
                    writeln!(
                        body,
                        "    {var} = {};",
                        formula_call(&step.operation, i, var)
                    )
                    .expect("write to string");
                }
            }
            scope => {
                let var = scope.as_str();
                writeln!(
                    body,
                    "    {var} = {};",
                    formula_call(&step.operation, i, var)
                )
                .expect("write to string");
            }
        }
    }

    let wgsl = format!(
        r#"struct VertexOutput {{
    @builtin(position) clip_position: vec4<f32>,
    @location(0) tex_coords: vec2<f32>,
}}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {{
    var output: VertexOutput;
    let x = f32(i32(vertex_index & 1u) * 4 - 1);
    let y = f32(i32(vertex_index >> 1u) * 4 - 1);
    output.clip_position = vec4<f32>(x, -y, 0.0, 1.0);
    output.tex_coords = vec2<f32>((x + 1.0) * 0.5, (y + 1.0) * 0.5);
    return output;
}}

struct Params {{
    divisor: vec4<f32>,
    scale: vec4<f32>,
{declarations}}}

@group(0) @binding(0) var tex_red: texture_2d<f32>;
@group(0) @binding(1) var tex_green: texture_2d<f32>;
@group(0) @binding(2) var tex_blue: texture_2d<f32>;
@group(0) @binding(3) var<uniform> params: Params;
{FORMULA_LIB}
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {{
    let dims = textureDimensions(tex_red);
    let coords = vec2<i32>(
        i32(in.tex_coords.x * f32(dims.x)),
        i32(in.tex_coords.y * f32(dims.y)),
    );
    var red: f32;
    var green: f32;
    var blue: f32;
    if (params.divisor.w > 0.5) {{
        let value = textureLoad(tex_red, coords, 0);
        red = value.r / params.divisor.x;
        green = value.g / params.divisor.y;
        blue = value.b / params.divisor.z;
    }} else {{
        red = textureLoad(tex_red, coords, 0).r / params.divisor.x;
        green = textureLoad(tex_green, coords, 0).r / params.divisor.y;
        blue = textureLoad(tex_blue, coords, 0).r / params.divisor.z;
    }}

{body}
    if (max(red, max(green, blue)) < 0.5 / 255.0) {{
        return vec4<f32>(0.0, 0.0, 0.0, 0.0);
    }}
    return vec4<f32>(red, green, blue, 1.0);
}}
"#
    );

    ProgramSource {
        wgsl,
        params_size: params_size(pipeline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{OperationKind, PipelineStep, StepPatch};

    fn stretch_pipeline() -> Pipeline {
        Pipeline::new(vec![
            PipelineStep::with_defaults(OperationKind::SigmoidalContrast, BandScope::All),
            PipelineStep::with_defaults(OperationKind::Gamma, BandScope::Red),
            PipelineStep::with_defaults(OperationKind::Linear, BandScope::All),
        ])
    }

    #[test]
    fn scoped_steps_only_touch_their_channel() {
        let src = pipeline_wgsl(&stretch_pipeline()).wgsl;
        assert!(src.contains("red = op_sigmoidal(red, params.s0_contrast, params.s0_bias);"));
        assert!(src.contains("green = op_sigmoidal(green, params.s0_contrast, params.s0_bias);"));
        assert!(src.contains("red = op_gamma(red, params.s1_value);"));
        assert!(!src.contains("green = op_gamma"));
        assert!(!src.contains("blue = op_gamma"));
        // linear rescales each channel by its own source-unit scale
        assert!(src.contains("red = op_linear(red * params.scale.x, params.s2_min, params.s2_max);"));
        assert!(src.contains("green = op_linear(green * params.scale.y, params.s2_min, params.s2_max);"));
        assert!(src.contains("blue = op_linear(blue * params.scale.z, params.s2_min, params.s2_max);"));
    }

    #[test]
    fn program_text_is_parameter_independent() {
        let p = stretch_pipeline();
        let edited = p
            .edit_step(
                1,
                &StepPatch {
                    value: Some(2.5),
                    ..StepPatch::default()
                },
            )
            .unwrap();
        assert_eq!(pipeline_wgsl(&p), pipeline_wgsl(&edited));
    }

    #[test]
    fn params_layout_matches_field_count() {
        let p = stretch_pipeline();
        // header(32) + contrast+bias+value+min+max (20) -> padded to 64
        assert_eq!(params_size(&p), 64);
        assert_eq!(pack_params(&p, [255.0; 3], false, [255.0; 3]).len(), 64);

        let empty = Pipeline::default();
        assert_eq!(params_size(&empty), 32);
        let bytes = pack_params(&empty, [1.0; 3], true, [255.0; 3]);
        assert_eq!(bytes.len(), 32);
        // single-texture flag rides in divisor.w
        assert_eq!(f32::from_le_bytes(bytes[12..16].try_into().unwrap()), 1.0);
    }

    #[test]
    fn packed_values_follow_step_order() {
        let p = stretch_pipeline();
        let bytes = pack_params(
            &p,
            [65535.0, 4000.0, 255.0],
            false,
            [65535.0, 4000.0, 255.0],
        );
        let f = |i: usize| f32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        assert_eq!(f(0), 65535.0); // red divisor
        assert_eq!(f(1), 4000.0); // green divisor
        assert_eq!(f(2), 255.0); // blue divisor
        assert_eq!(f(3), 0.0); // single-texture flag
        assert_eq!(f(5), 4000.0); // green source scale
        assert_eq!(f(8), 50.0); // s0 contrast
        assert_eq!(f(9), 0.15); // s0 bias
        assert_eq!(f(10), 1.0); // s1 gamma value
        assert_eq!(f(11), 0.0); // s2 linear min
        assert_eq!(f(12), 100.0); // s2 linear max
    }

    #[test]
    fn empty_pipeline_still_compiles_to_a_passthrough() {
        let src = pipeline_wgsl(&Pipeline::default()).wgsl;
        assert!(src.contains("@fragment"));
        assert!(src.contains(
            "struct Params {\n    divisor: vec4<f32>,\n    scale: vec4<f32>,\n}"
        ));
        assert!(!src.contains("s0_"));
    }
}
