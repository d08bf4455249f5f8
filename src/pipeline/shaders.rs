//! WGSL programs used by the render passes
//!
//! Bind group layout shared by every program:
//! - group 0: frame globals (camera position and lights), read-only storage
//! - group 1: per-draw locals (world and world-view-projection matrices)
//! - group 2: texture unit `i` at binding `i`, its sampler at `8 + i`, and
//!   the boolean flags block at binding 16

use crate::backend::{CullMode, ProgramDescriptor, ProgramOutput, TextureBinding, TextureFormat};

use super::gbuffer::{GBUFFER_COLOR_FORMATS, GBUFFER_DEPTH_FORMAT};

/// Frame globals and the lighting model
const COMMON_SHADER: &str = r#"
struct Light {
    // 0 = directional, 1 = point
    kind: u32,
    color: vec3<f32>,
    direction: vec3<f32>,
    position: vec3<f32>,
}

struct Globals {
    camera_position: vec3<f32>,
    light_count: u32,
    lights: array<Light>,
}

@group(0) @binding(0) var<storage, read> globals: Globals;

fn shade(albedo: vec3<f32>, normal: vec3<f32>, world_pos: vec3<f32>, view_dir: vec3<f32>) -> vec3<f32> {
    var color = albedo * 0.05;

    for (var i = 0u; i < globals.light_count; i = i + 1u) {
        let light = globals.lights[i];
        var light_dir: vec3<f32>;
        var attenuation: f32 = 1.0;

        if light.kind == 0u {
            light_dir = -normalize(light.direction);
        } else {
            let light_vec = light.position - world_pos;
            let distance = length(light_vec);
            light_dir = light_vec / max(distance, 0.0001);
            attenuation = 1.0 / (1.0 + 0.09 * distance + 0.032 * distance * distance);
        }

        let ndotl = max(dot(normal, light_dir), 0.0);
        let half_vec = normalize(light_dir + view_dir);
        let specular = pow(max(dot(normal, half_vec), 0.0), 32.0) * 0.5;

        color = color + (albedo * ndotl + vec3<f32>(specular)) * light.color * attenuation;
    }

    return color;
}
"#;

/// Mesh vertex stage shared by the forward and G-buffer programs
const GEOMETRY_VERTEX_SHADER: &str = r#"
struct Locals {
    world: mat4x4<f32>,
    world_view_projection: mat4x4<f32>,
}

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
}

@group(1) @binding(0) var<uniform> locals: Locals;
@group(2) @binding(0) var albedo_texture: texture_2d<f32>;
@group(2) @binding(8) var albedo_sampler: sampler;

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    let position = vec4<f32>(input.position, 1.0);
    output.world_position = (locals.world * position).xyz;
    output.clip_position = locals.world_view_projection * position;
    output.world_normal = (locals.world * vec4<f32>(input.normal, 0.0)).xyz;
    output.uv = input.uv;
    return output;
}
"#;

const FORWARD_FRAGMENT_SHADER: &str = r#"
@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let albedo = textureSample(albedo_texture, albedo_sampler, input.uv).rgb;
    let normal = normalize(input.world_normal);
    let view_dir = normalize(globals.camera_position - input.world_position);
    return vec4<f32>(shade(albedo, normal, input.world_position, view_dir), 1.0);
}
"#;

const GBUFFER_FRAGMENT_SHADER: &str = r#"
struct GBufferOutput {
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) position: vec4<f32>,
    @location(3) view_direction: vec4<f32>,
}

@fragment
fn fs_main(input: VertexOutput) -> GBufferOutput {
    var output: GBufferOutput;
    output.albedo = vec4<f32>(textureSample(albedo_texture, albedo_sampler, input.uv).rgb, 1.0);
    output.normal = vec4<f32>(normalize(input.world_normal), 1.0);
    output.position = vec4<f32>(input.world_position, 1.0);
    output.view_direction = vec4<f32>(normalize(globals.camera_position - input.world_position), 1.0);
    return output;
}
"#;

const COMPOSITION_SHADER: &str = r#"
struct Flags {
    show_depth: u32,
    show_normals: u32,
    _padding: vec2<u32>,
}

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(2) @binding(0) var gbuffer_albedo: texture_2d<f32>;
@group(2) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(2) @binding(2) var gbuffer_position: texture_2d<f32>;
@group(2) @binding(3) var gbuffer_view_direction: texture_2d<f32>;
@group(2) @binding(4) var gbuffer_depth: texture_depth_2d;
@group(2) @binding(16) var<uniform> flags: Flags;

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.position = vec4<f32>(input.position.xy, 0.0, 1.0);
    output.uv = input.uv;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let pixel_coord = vec2<i32>(input.position.xy);

    let albedo = textureLoad(gbuffer_albedo, pixel_coord, 0);
    let normal = textureLoad(gbuffer_normal, pixel_coord, 0).xyz;
    let world_pos = textureLoad(gbuffer_position, pixel_coord, 0).xyz;
    let view_dir = textureLoad(gbuffer_view_direction, pixel_coord, 0).xyz;
    let depth = textureLoad(gbuffer_depth, pixel_coord, 0);

    if flags.show_depth != 0u {
        return vec4<f32>(vec3<f32>(pow(depth, 32.0)), 1.0);
    }

    // Nothing was drawn here
    if albedo.a == 0.0 {
        return vec4<f32>(0.1, 0.1, 0.1, 1.0);
    }

    if flags.show_normals != 0u {
        return vec4<f32>(normal * 0.5 + 0.5, 1.0);
    }

    return vec4<f32>(shade(albedo.rgb, normalize(normal), world_pos, normalize(view_dir)), 1.0);
}
"#;

/// Boolean uniforms of the composition program, in flags block order.
pub const SHOW_DEPTH: &str = "show_depth";
pub const SHOW_NORMALS: &str = "show_normals";

/// Format of the default framebuffer depth buffer.
pub const SCREEN_DEPTH_FORMAT: TextureFormat = TextureFormat::Depth24Plus;

fn geometry_program(label: &str, fragment: &str, output: ProgramOutput) -> ProgramDescriptor {
    ProgramDescriptor {
        label: label.to_string(),
        source: [COMMON_SHADER, GEOMETRY_VERTEX_SHADER, fragment].concat(),
        vertex_entry: "vs_main".to_string(),
        fragment_entry: "fs_main".to_string(),
        output,
        uses_local_block: true,
        textures: vec![TextureBinding::Sampled],
        flags: Vec::new(),
        cull_mode: CullMode::Back,
    }
}

/// Lit mesh rendering straight to the screen.
pub fn forward_program() -> ProgramDescriptor {
    geometry_program(
        "forward",
        FORWARD_FRAGMENT_SHADER,
        ProgramOutput::Screen { depth_test: true },
    )
}

/// Mesh rendering into the G-buffer attachments.
pub fn gbuffer_program() -> ProgramDescriptor {
    geometry_program(
        "gbuffer",
        GBUFFER_FRAGMENT_SHADER,
        ProgramOutput::Offscreen {
            color_formats: GBUFFER_COLOR_FORMATS.to_vec(),
            depth_format: Some(GBUFFER_DEPTH_FORMAT),
        },
    )
}

/// Full-screen resolve of the G-buffer.
pub fn composition_program() -> ProgramDescriptor {
    ProgramDescriptor {
        label: "composition".to_string(),
        source: [COMMON_SHADER, COMPOSITION_SHADER].concat(),
        vertex_entry: "vs_main".to_string(),
        fragment_entry: "fs_main".to_string(),
        output: ProgramOutput::Screen { depth_test: false },
        uses_local_block: false,
        textures: vec![
            TextureBinding::Fetched,
            TextureBinding::Fetched,
            TextureBinding::Fetched,
            TextureBinding::Fetched,
            TextureBinding::FetchedDepth,
        ],
        flags: vec![SHOW_DEPTH.to_string(), SHOW_NORMALS.to_string()],
        cull_mode: CullMode::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{compile_wgsl, introspect_vertex_layout};

    fn locations(desc: &ProgramDescriptor) -> Vec<(u32, u32)> {
        let module = compile_wgsl(&desc.label, &desc.source).unwrap();
        introspect_vertex_layout(&desc.label, &module, &desc.vertex_entry)
            .unwrap()
            .attributes
            .iter()
            .map(|a| (a.location, a.component_count))
            .collect()
    }

    #[test]
    fn test_geometry_programs_validate() {
        assert_eq!(locations(&forward_program()), vec![(0, 3), (1, 3), (2, 2)]);
        assert_eq!(locations(&gbuffer_program()), vec![(0, 3), (1, 3), (2, 2)]);
    }

    #[test]
    fn test_composition_program_validates() {
        let desc = composition_program();
        assert_eq!(locations(&desc), vec![(0, 3), (1, 2)]);
        assert_eq!(desc.textures.len(), 5);
        assert_eq!(desc.flags, vec!["show_depth", "show_normals"]);
    }
}
