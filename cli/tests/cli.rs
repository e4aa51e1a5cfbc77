//! Integration tests driving the built `lvlab` binary.
//!
//! None of these reach a hypervisor: they cover the paths that fail or
//! finish before a connection is opened.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

const MANIFEST: &str = r#"
environment:
  - name: lab1
    libvirt_uri: test:///default
    config_defaults:
      domain: lab.local
    machines:
      - vm_name: web01
        interfaces:
          - ip4: 10.0.0.11/24
      - vm_name: db01
        hostname: db
        interfaces:
          - ip4: 10.0.0.12/24
      - vm_name: scratch
images:
  - name: fedora40
    image_url: https://dl.example.org/Fedora-Cloud-Base-Generic.x86_64-40-1.14.qcow2
"#;

/// Run lvlab with `args` and return (stdout, stderr, success).
fn lvlab(dir: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_lvlab"))
        .args(args)
        .current_dir(dir)
        .env_remove("LVLAB_MANIFEST")
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run lvlab");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn lab_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("Lvlab.yml"), MANIFEST).unwrap();
    dir
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    let (stdout, _, ok) = lvlab(dir.path(), &["version"]);
    assert!(ok);
    assert!(stdout.starts_with("lvlab version "));
}

#[test]
fn test_missing_manifest_fails() {
    let dir = TempDir::new().unwrap();
    let (_, stderr, ok) = lvlab(dir.path(), &["status"]);
    assert!(!ok);
    assert!(stderr.contains("Error:"));
    assert!(stderr.contains("Lvlab.yml"));
}

#[test]
fn test_malformed_manifest_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("Lvlab.yml"), "environment: [ {name: lab1, machines: 3} ]").unwrap();
    let (_, stderr, ok) = lvlab(dir.path(), &["hosts"]);
    assert!(!ok);
    assert!(stderr.contains("Error:"));
}

#[test]
fn test_hosts_block() {
    let dir = lab_dir();
    let (stdout, _, ok) = lvlab(dir.path(), &["hosts"]);
    assert!(ok);
    assert_eq!(
        stdout,
        "# BEGIN lvlab lab1\n\
         10.0.0.11 web01.lab.local web01\n\
         10.0.0.12 db.lab.local db\n\
         # END lvlab lab1\n"
    );
}

#[test]
fn test_manifest_flag_and_env() {
    let dir = lab_dir();
    let other = TempDir::new().unwrap();
    let path = dir.path().join("Lvlab.yml");
    let path = path.to_str().unwrap();

    let (stdout, _, ok) = lvlab(other.path(), &["-f", path, "hosts"]);
    assert!(ok);
    assert!(stdout.contains("# BEGIN lvlab lab1"));

    let output = Command::new(env!("CARGO_BIN_EXE_lvlab"))
        .arg("hosts")
        .current_dir(other.path())
        .env("LVLAB_MANIFEST", path)
        .env("RUST_LOG", "off")
        .output()
        .unwrap();
    assert!(output.status.success());
}

#[test]
fn test_unknown_machine_fails_before_connecting() {
    let dir = lab_dir();
    for args in [
        vec!["up", "nope"],
        vec!["down", "nope"],
        vec!["destroy", "nope", "-y"],
        vec!["snapshot", "list", "nope"],
    ] {
        let (_, stderr, ok) = lvlab(dir.path(), &args);
        assert!(!ok, "{args:?} succeeded");
        assert!(stderr.contains("Machine not found in manifest: nope"), "{stderr}");
    }
}

#[test]
fn test_init_rejects_undeclared_image() {
    let dir = lab_dir();
    let (_, stderr, ok) = lvlab(dir.path(), &["init", "plan9"]);
    assert!(!ok);
    assert!(stderr.contains("Image plan9 is not declared"));
}

#[test]
fn test_init_reports_every_failing_image() {
    let dir = TempDir::new().unwrap();
    let manifest = format!(
        r#"
environment:
  - name: lab1
    config_defaults:
      cloud_image_basedir: {base}
images:
  - name: broken-network
    image_url: https://dl.example.org/a.qcow2
    network_version: 9
  - name: broken-url
    image_url: https://dl.example.org/
"#,
        base = dir.path().display()
    );
    std::fs::write(dir.path().join("Lvlab.yml"), manifest).unwrap();

    let (_, stderr, ok) = lvlab(dir.path(), &["init"]);
    assert!(!ok);
    assert!(stderr.contains("2 image(s) failed"), "{stderr}");
    assert!(stderr.contains("broken-network:"));
    assert!(stderr.contains("broken-url:"));
}

#[test]
fn test_duplicate_vm_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("Lvlab.yml"),
        "environment:\n  - name: lab1\n    machines:\n      - vm_name: web01\n      - vm_name: web01\n",
    )
    .unwrap();

    let (_, stderr, ok) = lvlab(dir.path(), &["destroy", "web01", "-y"]);
    assert!(!ok);
    assert!(stderr.contains("declared more than once"), "{stderr}");
}
