use assert_cmd::prelude::*;
use predicates::str::contains;
use std::fs;
use std::process::Command;
use tempfile::TempDir;

const TOWEL: &str = "0 0 0  1 0 0  2 0 0  3 0 0 \
                     0 0 1  1 1 1  2 1 1  3 0 1 \
                     0 0 2  1 1 2  2 1 2  3 0 2 \
                     0 0 3  1 0 3  2 0 3  3 0 3";

fn write_scene(dir: &TempDir) -> std::path::PathBuf {
    let scene = format!(
        r#"<scene>
  <water><grid>4</grid><level>-6</level></water>
  <ground>
    <name>dune</name>
    <samples>9</samples>
    <showProps>true</showProps>
  </ground>
  <patch>
    <position>180 -4.8 -5</position>
    <points>{TOWEL}</points>
  </patch>
  <object><name>crate</name></object>
  <object>
    <name>crate-copy</name>
    <instanceOf>crate</instanceOf>
    <move>5 0 0</move>
  </object>
  <object>
    <name>buoy</name>
    <mesh>models/buoy.obj</mesh>
    <swing><step>1</step></swing>
  </object>
</scene>
"#
    );
    let path = dir.path().join("beach.xml");
    fs::write(&path, scene).expect("write scene");
    path
}

#[test]
fn summary_reports_scene_statistics() {
    let dir = TempDir::new().expect("temp dir");
    let scene = write_scene(&dir);
    let mut cmd = Command::cargo_bin("shoreline").expect("binary exists");
    cmd.arg(&scene).arg("--summary-only");
    cmd.assert()
        .success()
        .stdout(contains("Loaded scene with 9 nodes (3 objects, 1 patches)"))
        .stdout(contains("Grounds: dune"))
        .stdout(contains("Terrain triangles: 128"))
        .stdout(contains("Water indices: 54"))
        .stdout(contains("Fallbacks: 1"))
        .stdout(contains(
            "Frame 1: reflection -> refraction -> main -> water (5 draws)",
        ));
}

#[test]
fn summary_runs_requested_frames() {
    let dir = TempDir::new().expect("temp dir");
    let scene = write_scene(&dir);
    let mut cmd = Command::cargo_bin("shoreline").expect("binary exists");
    cmd.arg(&scene).args(["--summary-only", "--frames", "3"]);
    cmd.assert()
        .success()
        .stdout(contains("Frame 3: reflection -> refraction -> main -> water"));
}

#[test]
fn rejects_invalid_scene() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("broken.xml");
    fs::write(&path, "<world></world>").expect("write scene");
    let mut cmd = Command::cargo_bin("shoreline").expect("binary exists");
    cmd.arg(&path).arg("--summary-only");
    cmd.assert()
        .failure()
        .stderr(contains("expected <scene> root"));
}

#[test]
fn rejects_unknown_flags() {
    let mut cmd = Command::cargo_bin("shoreline").expect("binary exists");
    cmd.arg("--wireframe");
    cmd.assert()
        .failure()
        .stderr(contains("Unknown argument: --wireframe"));
}
