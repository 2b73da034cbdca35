use std::borrow::Cow;

use wgpu::naga::ShaderStage;

/// Maps projected corner positions into clip space and forwards the unit
/// texture coordinates.
///
/// `extentParams` is `[min_x, min_y, 2 / width, 2 / height]` of the projected
/// corner extent, so the north edge lands on clip `y = +1`, the first row of
/// the render target.
pub(crate) const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 texCoords;
layout(location = 1) in vec2 corners;

layout(std140, set = 0, binding = 0) uniform WarpParams {
    vec4 extentParams;
} params;

layout(location = 0) out vec2 v_texCoords;

void main() {
    v_texCoords = texCoords;
    gl_Position = vec4(-1.0 + (corners - params.extentParams.xy) * params.extentParams.zw, 0.0, 1.0);
}
";

pub(crate) const FRAGMENT_SHADER_GLSL: &str = r"#version 450
layout(location = 0) in vec2 v_texCoords;
layout(location = 0) out vec4 outColor;

layout(set = 0, binding = 1) uniform texture2D sourceTexture;
layout(set = 0, binding = 2) uniform sampler sourceSampler;

void main() {
    outColor = texture(sampler2D(sourceTexture, sourceSampler), v_texCoords);
}
";

pub(crate) fn compile_vertex_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("geo image warp vertex"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(VERTEX_SHADER_GLSL),
            stage: ShaderStage::Vertex,
            defines: &[],
        },
    })
}

pub(crate) fn compile_fragment_shader(device: &wgpu::Device) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("geo image warp fragment"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Borrowed(FRAGMENT_SHADER_GLSL),
            stage: ShaderStage::Fragment,
            defines: &[],
        },
    })
}
