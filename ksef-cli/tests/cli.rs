use std::path::PathBuf;
use std::process::Command;

fn cli_exe() -> &'static str {
    env!("CARGO_BIN_EXE_ksef")
}

fn invoice_fixture() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("invoice.json")
}

#[test]
fn xml_command_prints_document() {
    let output = Command::new(cli_exe())
        .arg("xml")
        .arg("--invoice")
        .arg(invoice_fixture())
        .output()
        .expect("run cli");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8(output.stdout).expect("utf8");
    assert!(stdout.starts_with("<?xml"));
    assert!(stdout.contains("<KodUE>DE</KodUE><NrVatUE>123456789</NrVatUE>"));
    assert!(stdout.contains("<Nazwa>Blumen &amp; Co GmbH</Nazwa>"));
    assert!(stdout.contains("<P_13_6_2>150.00</P_13_6_2>"));
    assert!(stdout.contains("<KursWaluty>4.2771</KursWaluty>"));
}

#[test]
fn xml_command_pretty_prints() {
    let output = Command::new(cli_exe())
        .args(["xml", "--version", "fa3", "--pretty", "--invoice"])
        .arg(invoice_fixture())
        .output()
        .expect("run cli");
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    assert!(stdout.contains("\n  <Naglowek>"));
}

#[test]
fn send_without_token_fails_before_any_request() {
    let output = Command::new(cli_exe())
        .env_remove("KSEF_TOKEN")
        .args(["send", "--base-url", "http://127.0.0.1:9", "--invoice"])
        .arg(invoice_fixture())
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("KSeF token is required"), "stderr: {stderr}");
}

#[test]
fn unknown_environment_is_rejected() {
    let output = Command::new(cli_exe())
        .args(["--env", "staging", "certificates"])
        .output()
        .expect("run cli");
    assert!(!output.status.success());
}

#[test]
fn upo_without_token_fails_before_any_request() {
    let output = Command::new(cli_exe())
        .env_remove("KSEF_TOKEN")
        .args(["upo", "--session", "SES-1", "--base-url", "http://127.0.0.1:9"])
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("KSeF token is required"), "stderr: {stderr}");
}
