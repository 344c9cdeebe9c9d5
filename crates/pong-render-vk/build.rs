use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Shared by both pipelines. Must match the vertex input description in
    // pong-render's pipeline module:
    //   - binding 0 (per vertex),   location 0: vec2 position
    //   - binding 1 (per instance), location 1: vec2 offset
    //                               location 2: vec2 dimension
    //                               location 3: vec3 color
    let quad_vert = r#"
#version 450
layout(location = 0) in vec2 inPosition;
layout(location = 1) in vec2 inOffset;
layout(location = 2) in vec2 inDimension;
layout(location = 3) in vec3 inColor;

layout(set = 0, binding = 0) uniform Transforms {
    mat4 model;
    mat4 view;
    mat4 projection;
} u;

layout(location = 0) out vec3 vColor;
layout(location = 1) out vec2 vLocal;

void main() {
    vColor = inColor;
    vLocal = inPosition;
    vec2 world = inOffset + inPosition * inDimension;
    gl_Position = u.projection * u.view * u.model * vec4(world, 0.0, 1.0);
}
"#;

    let paddle_frag = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 1) in vec2 vLocal;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0);
}
"#;

    // Push-constant block is 104 bytes: six vec4 then a vec2 at offset 96.
    let ball_frag = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 1) in vec2 vLocal;
layout(location = 0) out vec4 outColor;

layout(push_constant) uniform Ball {
    vec4 color[6];
    vec2 resolution;
} pc;

void main() {
    if (length(vLocal) > 1.0) {
        discard;
    }
    vec2 uv = gl_FragCoord.xy / pc.resolution;
    int band = clamp(int(uv.x * 6.0), 0, 5);
    outColor = pc.color[band];
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();

    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_3 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let shaders = [
        (quad_vert, shaderc::ShaderKind::Vertex, "quad.vert"),
        (paddle_frag, shaderc::ShaderKind::Fragment, "paddle.frag"),
        (ball_frag, shaderc::ShaderKind::Fragment, "ball.frag"),
    ];
    for (src, kind, name) in shaders {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap();
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
    }

    // Re-run if this file changes (inline sources live here)
    println!("cargo:rerun-if-changed=build.rs");
}
