// SPDX-License-Identifier: CEPL-1.0
use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    // Vertex layout must match `assets::Vertex`:
    //   location 0: R32G32B32_SFLOAT (pos)
    //   location 1: R32G32B32_SFLOAT (color)
    //   location 2: R32G32_SFLOAT    (uv)
    let vs_src = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inColor;
layout(location = 2) in vec2 inUv;

layout(set = 0, binding = 0) uniform FrameData {
    mat4 model;
    mat4 view;
    mat4 proj;
} u;

layout(location = 0) out vec3 vColor;
layout(location = 1) out vec2 vUv;

void main() {
    vColor = inColor;
    vUv = inUv;
    gl_Position = u.proj * u.view * u.model * vec4(inPos, 1.0);
}
"#;

    let fs_src = r#"
#version 450
layout(set = 0, binding = 1) uniform sampler2D tex;

layout(location = 0) in vec3 vColor;
layout(location = 1) in vec2 vUv;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = texture(tex, vUv);
}
"#;

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_3 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let compile = |src: &str, kind: shaderc::ShaderKind, name: &str| {
        comp.compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"))
    };

    let vs_spv = compile(vs_src, shaderc::ShaderKind::Vertex, "mesh.vert");
    let fs_spv = compile(fs_src, shaderc::ShaderKind::Fragment, "mesh.frag");

    fs::write(out.join("mesh.vert.spv"), vs_spv.as_binary_u8()).expect("write mesh.vert.spv");
    fs::write(out.join("mesh.frag.spv"), fs_spv.as_binary_u8()).expect("write mesh.frag.spv");

    println!("cargo:rerun-if-changed=build.rs");
}
