use assert_cmd::Command;
use predicates::prelude::*;

fn manager(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("manager").unwrap();
    cmd.env_clear()
        .env("HOME", home)
        .env("KUBECONFIG", home.join("missing-kubeconfig"))
        .env("RUST_LOG", "info")
        .args(["--metrics-bind-address", "0", "--health-probe-bind-address", "0"]);
    cmd
}

#[test]
fn missing_cluster_config_exits_1() {
    let home = tempfile::tempdir().unwrap();
    manager(home.path()).assert().code(1).stderr(predicate::str::contains("unable to start manager"));
}

#[test]
fn unreadable_config_file_exits_1() {
    let home = tempfile::tempdir().unwrap();
    manager(home.path()).args(["--config", "/nonexistent/onedemo.toml"]).assert().code(1).stderr(predicate::str::contains("failed to read config"));
}

#[test]
fn invalid_bind_address_exits_1() {
    let home = tempfile::tempdir().unwrap();
    manager(home.path()).args(["--metrics-bind-address", ":notaport"]).assert().code(1).stderr(predicate::str::contains(":notaport"));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let home = tempfile::tempdir().unwrap();
    manager(home.path()).arg("--no-such-flag").assert().code(2);
}

#[test]
fn help_lists_flags() {
    Command::cargo_bin("manager")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--metrics-bind-address").and(predicate::str::contains("--leader-elect")));
}

#[test]
fn crd_gen_prints_crd() {
    Command::cargo_bin("crd-gen")
        .unwrap()
        .assert()
        .success()
        .stdout(predicate::str::contains("group: apps.wzy.com").and(predicate::str::contains("kind: App")));
}

#[test]
fn crd_gen_prints_rbac() {
    Command::cargo_bin("crd-gen")
        .unwrap()
        .arg("--rbac")
        .assert()
        .success()
        .stdout(predicate::str::contains("kind: ClusterRole").and(predicate::str::contains("apps/status")).and(predicate::str::contains("leases")));
}
