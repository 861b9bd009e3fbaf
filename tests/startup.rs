use std::process::Command;

#[test]
fn fails_without_encryption_key() {
    let exe = env!("CARGO_BIN_EXE_deploy-relay");
    let output = Command::new(exe)
        .env_remove("ENCRYPTION_KEY")
        .env("PROVISION_KEY", "provision-secret")
        .output()
        .expect("failed to run deploy-relay binary");
    assert!(!output.status.success());
}

#[test]
fn fails_without_provision_key() {
    let exe = env!("CARGO_BIN_EXE_deploy-relay");
    let output = Command::new(exe)
        .env("ENCRYPTION_KEY", "00".repeat(32))
        .env_remove("PROVISION_KEY")
        .output()
        .expect("failed to run deploy-relay binary");
    assert!(!output.status.success());
}
