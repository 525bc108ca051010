//! Exit codes of the `cvs-proxy` binary.
//!
//! | Code | Meaning                                   |
//! |------|-------------------------------------------|
//! |  0   | Success, `--help`, `--version`            |
//! |  1   | Invalid command line or configuration     |
//! | 10   | The listener could not be bound or failed |

use std::io::Write;
use std::net::TcpListener;

use assert_cmd::Command;
use tempfile::NamedTempFile;

fn cvs_proxy() -> Command {
    Command::cargo_bin("cvs-proxy").expect("cvs-proxy binary must be built")
}

#[test]
fn version_exits_zero() {
    let output = cvs_proxy().arg("--version").output().expect("run cvs-proxy");
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("cvs-proxy "));
}

#[test]
fn help_exits_zero() {
    let output = cvs_proxy().arg("--help").output().expect("run cvs-proxy");
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("--local-timeout"));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let output = cvs_proxy().arg("--frobnicate").output().expect("run cvs-proxy");
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
}

#[test]
fn missing_remote_is_a_usage_error() {
    let output = cvs_proxy()
        .args(["--local", "127.0.0.1:2402"])
        .output()
        .expect("run cvs-proxy");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no remote repository endpoint configured"));
}

#[test]
fn broken_config_file_is_a_usage_error() {
    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(b"[upstream]\nendpoint = master\n").expect("write config");

    let output = cvs_proxy()
        .arg("--config")
        .arg(file.path())
        .output()
        .expect("run cvs-proxy");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("line 1"));
}

#[test]
fn occupied_port_is_a_socket_error() {
    let taken = TcpListener::bind("127.0.0.1:0").expect("reserve a port");
    let port = taken.local_addr().expect("reserved address").port().to_string();

    let output = cvs_proxy()
        .args(["--address", "127.0.0.1", "--port", &port, "--remote", "127.0.0.1"])
        .output()
        .expect("run cvs-proxy");
    assert_eq!(output.status.code(), Some(10));
}
