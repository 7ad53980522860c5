use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_demo_settles_and_prints_claims() {
    let mut cmd = Command::new(cargo_bin!("proxyvend"));
    cmd.args(["demo", "--user", "1", "--amount", "100", "--qty", "3"]);

    // 0.50/day upstream, month = 15.00/unit, +20% markup = 18.00.
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("funded: 100"))
        .stdout(predicate::str::contains("quote: 3 x 18.00 = 54.00"))
        .stdout(predicate::str::contains("settled: 3 claim(s)"))
        .stdout(predicate::str::contains("charged: 54.00"))
        .stdout(predicate::str::contains("balance: 46.00"))
        .stdout(predicate::str::contains("public_id,endpoint"));
}

#[test]
fn test_quote_uses_markup_schedule() {
    let mut cmd = Command::new(cargo_bin!("proxyvend"));
    cmd.args(["quote", "--period", "month", "--qty", "2"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("quote: 2 x 18.00 = 36.00 (shared, us, month)"));
}

#[test]
fn test_buy_without_funds_fails() {
    let mut cmd = Command::new(cargo_bin!("proxyvend"));
    cmd.args(["buy", "--user", "1", "--qty", "1"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("insufficient funds"));
}

#[test]
fn test_claims_empty_prints_header_only() {
    let mut cmd = Command::new(cargo_bin!("proxyvend"));
    cmd.args(["claims", "--user", "9"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::starts_with("public_id,endpoint"));
}

#[test]
fn test_deposit_round_trip_credits_balance() {
    let mut cmd = Command::new(cargo_bin!("proxyvend"));
    cmd.args(["deposit", "--user", "1", "--amount", "25"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("invoice: inv-1"))
        .stdout(predicate::str::contains("credited: 25, balance: 25"));
}

#[test]
fn test_rejects_unknown_period() {
    let mut cmd = Command::new(cargo_bin!("proxyvend"));
    cmd.args(["quote", "--period", "fortnight"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("unknown rental period"));
}
