//! WGSL snippets shared by the flowmap and compositing passes.
//!
//! - `snoise(v: vec3<f32>) -> f32` - 3D simplex noise in roughly [-1, 1]
//! - `fbm(p: vec3<f32>) -> f32` - 5 octaves of `snoise`, persistence 0.5,
//!   each octave doubling frequency and shifting by 100 on every axis
//! - `falloff_ramp(edge0, edge1, x) -> f32` - Hermite ramp that accepts
//!   `edge0 > edge1` (an inverted smoothstep)
//! - `LUMA` - Rec. 601 luminance weights
//! - `vs_fullscreen` - vertex entry point drawing one oversized triangle
//!
//! The noise kernel is pure math on the GPU. Nothing on the host evaluates
//! it; it only has to validate and be deterministic.

/// 3D simplex noise (Ashima Arts / Ian McEwan formulation).
pub const NOISE_WGSL: &str = r#"
fn mod289_3(x: vec3<f32>) -> vec3<f32> {
    return x - floor(x * (1.0 / 289.0)) * 289.0;
}

fn mod289_4(x: vec4<f32>) -> vec4<f32> {
    return x - floor(x * (1.0 / 289.0)) * 289.0;
}

fn permute4(x: vec4<f32>) -> vec4<f32> {
    return mod289_4(((x * 34.0) + 1.0) * x);
}

fn taylor_inv_sqrt4(r: vec4<f32>) -> vec4<f32> {
    return 1.79284291400159 - 0.85373472095314 * r;
}

fn snoise(v: vec3<f32>) -> f32 {
    let C = vec2<f32>(1.0 / 6.0, 1.0 / 3.0);
    let D = vec4<f32>(0.0, 0.5, 1.0, 2.0);

    // First corner
    var i = floor(v + dot(v, vec3(C.y)));
    let x0 = v - i + dot(i, vec3(C.x));

    // Other corners
    let g = step(x0.yzx, x0.xyz);
    let l = 1.0 - g;
    let i1 = min(g.xyz, l.zxy);
    let i2 = max(g.xyz, l.zxy);

    let x1 = x0 - i1 + C.x;
    let x2 = x0 - i2 + C.y;
    let x3 = x0 - D.yyy;

    // Permutations
    i = mod289_3(i);
    let p = permute4(permute4(permute4(
        i.z + vec4<f32>(0.0, i1.z, i2.z, 1.0))
      + i.y + vec4<f32>(0.0, i1.y, i2.y, 1.0))
      + i.x + vec4<f32>(0.0, i1.x, i2.x, 1.0));

    // Gradients on a 7x7 grid mapped onto an octahedron
    let n_ = 1.0 / 7.0;
    let ns = n_ * D.wyz - D.xzx;

    let j = p - 49.0 * floor(p * ns.z * ns.z);

    let x_ = floor(j * ns.z);
    let y_ = floor(j - 7.0 * x_);

    let x = x_ * ns.x + ns.yyyy;
    let y = y_ * ns.x + ns.yyyy;
    let h = 1.0 - abs(x) - abs(y);

    let b0 = vec4<f32>(x.xy, y.xy);
    let b1 = vec4<f32>(x.zw, y.zw);

    let s0 = floor(b0) * 2.0 + 1.0;
    let s1 = floor(b1) * 2.0 + 1.0;
    let sh = -step(h, vec4<f32>(0.0));

    let a0 = b0.xzyw + s0.xzyw * sh.xxyy;
    let a1 = b1.xzyw + s1.xzyw * sh.zzww;

    var p0 = vec3<f32>(a0.xy, h.x);
    var p1 = vec3<f32>(a0.zw, h.y);
    var p2 = vec3<f32>(a1.xy, h.z);
    var p3 = vec3<f32>(a1.zw, h.w);

    let norm = taylor_inv_sqrt4(vec4<f32>(dot(p0, p0), dot(p1, p1), dot(p2, p2), dot(p3, p3)));
    p0 *= norm.x;
    p1 *= norm.y;
    p2 *= norm.z;
    p3 *= norm.w;

    var m = max(0.6 - vec4<f32>(dot(x0, x0), dot(x1, x1), dot(x2, x2), dot(x3, x3)), vec4<f32>(0.0));
    m = m * m;
    return 42.0 * dot(m * m, vec4<f32>(dot(p0, x0), dot(p1, x1), dot(p2, x2), dot(p3, x3)));
}
"#;

/// Sum of the [`FBM_WGSL`] octave amplitudes (0.5 + 0.25 + ... + 1/32).
/// With `snoise` in [-1, 1], `fbm` stays within plus or minus this.
pub const FBM_AMPLITUDE: f32 = 0.96875;

/// Fractal sum over [`NOISE_WGSL`].
pub const FBM_WGSL: &str = r#"
const FBM_OCTAVES: i32 = 5;

fn fbm(p: vec3<f32>) -> f32 {
    var value = 0.0;
    var amplitude = 0.5;
    var pos = p;
    for (var i = 0; i < FBM_OCTAVES; i++) {
        value += amplitude * snoise(pos);
        pos = pos * 2.0 + vec3<f32>(100.0);
        amplitude *= 0.5;
    }
    return value;
}
"#;

/// Ramp helpers.
pub const RAMP_WGSL: &str = r#"
// Hermite ramp from edge0 to edge1. Unlike smoothstep, edge0 > edge1 is
// allowed and yields 1 below edge1 falling to 0 at edge0.
fn falloff_ramp(edge0: f32, edge1: f32, x: f32) -> f32 {
    let span = edge1 - edge0;
    if abs(span) < 1e-6 {
        return select(0.0, 1.0, x <= edge1);
    }
    let t = clamp((x - edge0) / span, 0.0, 1.0);
    return t * t * (3.0 - 2.0 * t);
}
"#;

/// Color helpers.
pub const COLOR_WGSL: &str = r#"
const LUMA: vec3<f32> = vec3<f32>(0.299, 0.587, 0.114);
"#;

/// Fullscreen triangle vertex stage.
///
/// `uv` runs y-up (0,0 at the bottom-left of the target) so it matches the
/// normalized pointer position. `tex_uv` runs y-down for sampling textures
/// that were uploaded top row first.
pub const FULLSCREEN_WGSL: &str = r#"
struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) tex_uv: vec2<f32>,
};

@vertex
fn vs_fullscreen(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0),
    );

    let pos = positions[vertex_index];
    let uv = pos * 0.5 + 0.5;

    var out: VertexOutput;
    out.clip_position = vec4<f32>(pos, 0.0, 1.0);
    out.uv = uv;
    out.tex_uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}
"#;

/// Prepend the shared snippets to a pass-specific shader body.
pub fn with_utils(body: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        FULLSCREEN_WGSL, NOISE_WGSL, FBM_WGSL, RAMP_WGSL, COLOR_WGSL, body
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Validates WGSL code using naga.
    pub(crate) fn validate_wgsl(code: &str) -> Result<(), String> {
        let module = naga::front::wgsl::parse_str(code)
            .map_err(|e| format!("WGSL parse error: {}", e.emit_to_string(code)))?;

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        validator
            .validate(&module)
            .map_err(|e| format!("WGSL validation error: {:?}", e))?;

        Ok(())
    }

    #[test]
    fn test_utils_validate_standalone() {
        let shader = with_utils(
            r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let n = fbm(vec3<f32>(in.uv * 15.0, 1.0));
    let r = falloff_ramp(0.15, 0.1, n);
    return vec4<f32>(vec3<f32>(dot(vec3<f32>(r), LUMA)), 1.0);
}
"#,
        );
        validate_wgsl(&shader).expect("Shared WGSL should be valid");
    }

    #[test]
    fn test_fbm_octave_shift() {
        assert!(FBM_WGSL.contains("FBM_OCTAVES: i32 = 5"));
        assert!(FBM_WGSL.contains("pos * 2.0 + vec3<f32>(100.0)"));
        assert!(FBM_WGSL.contains("amplitude *= 0.5"));
    }

    #[test]
    fn test_fbm_amplitude_matches_octaves() {
        let sum: f32 = (0..5).map(|i| 0.5f32.powi(i + 1)).sum();
        assert_eq!(sum, FBM_AMPLITUDE);
    }
}
