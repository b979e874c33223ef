use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;
use tempfile::{NamedTempFile, tempdir};

const CATALOG: &str = "tests/fixtures/economy.json";

#[test]
fn test_cli_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("econ_runtime"));
    cmd.arg(CATALOG).arg("tests/fixtures/commands.csv");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("kind,key,value"))
        .stdout(predicate::str::contains("balance,coin,35"))
        .stdout(predicate::str::contains("balance,gem,50"))
        .stdout(predicate::str::contains("item,sword,"))
        .stdout(predicate::str::contains("item,ore,").not())
        // The oversized removal is reported but does not stop the script
        .stderr(predicate::str::contains("Error processing command"));

    Ok(())
}

#[test]
fn test_cli_reports_malformed_rows_and_continues() {
    let mut script = NamedTempFile::new().unwrap();
    writeln!(script, "op, key, amount, id").unwrap();
    writeln!(script, "steal, coin, 5,").unwrap();
    writeln!(script, "add, coin, 5").unwrap();
    writeln!(script, "buy, missing").unwrap();

    let mut cmd = Command::new(cargo_bin!("econ_runtime"));
    cmd.arg(CATALOG).arg(script.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("balance,coin,5"))
        .stderr(predicate::str::contains("Error reading command"))
        .stderr(predicate::str::contains("Unknown transaction 'missing'"));
}

#[test]
fn test_cli_owned_products_survive_restarts() {
    let dir = tempdir().unwrap();
    let owned = dir.path().join("owned.json");

    let mut script = NamedTempFile::new().unwrap();
    writeln!(script, "op, key, amount, id").unwrap();
    writeln!(script, "buy, starter_pack").unwrap();

    let mut first = Command::new(cargo_bin!("econ_runtime"));
    first.arg(CATALOG).arg(script.path()).arg("--owned-products").arg(&owned);
    first
        .assert()
        .success()
        .stdout(predicate::str::contains("owned,com.game.starter"));

    // The second run refuses to sell the same non-consumable again.
    let mut second = Command::new(cargo_bin!("econ_runtime"));
    second
        .arg(CATALOG)
        .arg(script.path())
        .arg("--owned-products")
        .arg(&owned)
        .arg("--store")
        .arg("google");
    second
        .assert()
        .success()
        .stdout(predicate::str::contains("owned,com.game.starter"))
        .stdout(predicate::str::contains("item,sword,").not())
        .stderr(predicate::str::contains("already owned"));
}

#[test]
fn test_cli_parks_background_purchases_when_disabled() {
    let mut script = NamedTempFile::new().unwrap();
    writeln!(script, "op, key, amount, id").unwrap();
    writeln!(script, "background, com.game.gems").unwrap();

    let mut cmd = Command::new(cargo_bin!("econ_runtime"));
    cmd.arg(CATALOG)
        .arg(script.path())
        .arg("--no-background-purchases");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("balance,gem,0"));

    let mut cmd = Command::new(cargo_bin!("econ_runtime"));
    cmd.arg(CATALOG).arg(script.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("balance,gem,50"));
}

#[test]
fn test_cli_starts_from_saved_state() {
    let mut state = NamedTempFile::new().unwrap();
    write!(
        state,
        r#"{{"balances": [{{"currency": "coin", "amount": 12}}], "items": [{{"definition": "ore", "id": "o1"}}]}}"#
    )
    .unwrap();
    let mut script = NamedTempFile::new().unwrap();
    writeln!(script, "op, key, amount, id").unwrap();
    writeln!(script, "buy, buy_sword").unwrap();

    let mut cmd = Command::new(cargo_bin!("econ_runtime"));
    cmd.arg(CATALOG)
        .arg(script.path())
        .arg("--state")
        .arg(state.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("balance,coin,2"))
        .stdout(predicate::str::contains("item,ore,o1"));
}
