use assert_cmd::prelude::*;
use predicates::str::contains;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::Command;
use tempfile::{tempdir, NamedTempFile, TempDir};

const VERTEX: &str = include_str!("../shaders/vert.glsl");
const FRAGMENT: &str = include_str!("../shaders/frag.glsl");

fn write_shaders(dir: &Path, vertex: &str) {
    let shaders = dir.join("shaders");
    fs::create_dir_all(&shaders).expect("create shader dir");
    fs::write(shaders.join("vert.glsl"), vertex).expect("write vertex shader");
    fs::write(shaders.join("frag.glsl"), FRAGMENT).expect("write fragment shader");
}

fn workspace(vertex: &str) -> TempDir {
    let dir = tempdir().expect("temp dir");
    write_shaders(dir.path(), vertex);
    dir
}

#[test]
fn headless_run_spins_the_default_quad() {
    let dir = workspace(VERTEX);
    let mut cmd = Command::cargo_bin("flycam").expect("binary exists");
    cmd.current_dir(dir.path()).arg("--headless");
    cmd.assert()
        .success()
        .stdout(contains("Rendering 1 mesh(es)"))
        .stdout(contains("Frames rendered: 60"))
        .stdout(contains(
            "Camera eye=(0.00, 0.00, 0.00) direction=(0.00, 0.00, -1.00)",
        ))
        .stdout(contains(
            " - mesh0 pos=(0.00, 0.00, -2.00) rotation=-6.00 scale=0.50",
        ));
}

#[test]
fn config_file_adds_meshes_and_moves_shaders() {
    let dir = workspace(VERTEX);
    let config = format!(
        r#"{{
  "shader_dir": {:?},
  "meshes": [
    {{ "translation": [0.0, 0.0, -2.0], "scale": 0.5 }},
    {{ "translation": [1.0, 0.5, -4.0], "rotation_degrees": 90.0 }}
  ]
}}"#,
        dir.path().join("shaders")
    );
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(config.as_bytes()).expect("write config");

    let mut cmd = Command::cargo_bin("flycam").expect("binary exists");
    cmd.arg("--config")
        .arg(file.path())
        .arg("--headless")
        .arg("--frames")
        .arg("10");
    cmd.assert()
        .success()
        .stdout(contains("Rendering 2 mesh(es)"))
        .stdout(contains("Frames rendered: 10"))
        .stdout(contains(
            " - mesh1 pos=(1.00, 0.50, -4.00) rotation=89.00 scale=1.00",
        ));
}

#[test]
fn shader_without_projection_uniform_fails_startup() {
    let vertex = VERTEX
        .replace("mat4 uProjection;", "")
        .replace("uProjection * ", "");
    let dir = workspace(&vertex);
    let mut cmd = Command::cargo_bin("flycam").expect("binary exists");
    cmd.current_dir(dir.path()).arg("--headless");
    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("failed to initialize renderer (configuration error)"))
        .stderr(contains("uProjection"));
}

#[test]
fn missing_shader_files_fail_to_compile() {
    let dir = tempdir().expect("temp dir");
    let mut cmd = Command::cargo_bin("flycam").expect("binary exists");
    cmd.current_dir(dir.path()).arg("--headless");
    cmd.assert()
        .failure()
        .stderr(contains("configuration error"))
        .stderr(contains("failed to compile vertex shader"));
}

#[test]
fn unknown_arguments_are_rejected() {
    let mut cmd = Command::cargo_bin("flycam").expect("binary exists");
    cmd.arg("--fullscreen");
    cmd.assert()
        .failure()
        .stderr(contains("Unknown argument: --fullscreen"));
}

#[test]
fn config_with_inverted_clip_planes_is_rejected() {
    let dir = workspace(VERTEX);
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "projection": { "near": 10.0, "far": 1.0 } }"#)
        .expect("write config");

    let mut cmd = Command::cargo_bin("flycam").expect("binary exists");
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(file.path())
        .arg("--headless");
    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("invalid projection"));
}
