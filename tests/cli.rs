use std::path::Path;
use std::process::{Command, Output};

use anyhow::Result;
use serde_json::Value;
use tempfile::TempDir;

fn kuberan(config: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new(env!("CARGO_BIN_EXE_kuberan"))
        .arg("--config")
        .arg(config)
        .args(args)
        .output()?;
    Ok(output)
}

fn json_ok(config: &Path, args: &[&str]) -> Result<Value> {
    let output = kuberan(config, args)?;
    assert!(output.status.success(), "{args:?} failed: {output:?}");
    Ok(serde_json::from_slice(&output.stdout)?)
}

fn setup() -> Result<(TempDir, std::path::PathBuf)> {
    let temp = TempDir::new()?;
    let config_path = temp.path().join("kuberan.toml");
    std::fs::write(
        &config_path,
        r#"
[display]
currency_grouping = true
"#,
    )?;
    Ok((temp, config_path))
}

/// A brokerage account plus the checking account its trades settle against.
fn add_accounts(config: &Path, cash: i64) -> Result<()> {
    json_ok(
        config,
        &[
            "account", "add", "--user", "u1", "--name", "Brokerage", "--kind", "investment",
            "--id", "brokerage",
        ],
    )?;
    json_ok(
        config,
        &[
            "account", "add", "--user", "u1", "--name", "Checking", "--kind", "cash",
            "--balance", cash.to_string().as_str(), "--id", "chk",
        ],
    )?;
    Ok(())
}

#[test]
fn buy_then_value_portfolio() -> Result<()> {
    let (_temp, config) = setup()?;

    add_accounts(&config, 500_000)?;
    json_ok(
        &config,
        &[
            "security", "add", "--symbol", "VTI", "--name", "Total Market", "--asset-class",
            "etf", "--id", "vti",
        ],
    )?;

    let buy = json_ok(
        &config,
        &[
            "buy", "--account", "brokerage", "--security", "VTI", "--quantity", "10", "--price",
            "10000", "--fee", "500", "--date", "2024-01-02",
        ],
    )?;
    assert_eq!(buy["holding"]["cost_basis"], 100_500);
    assert_eq!(buy["entry"]["kind"], "buy");

    let recorded = json_ok(
        &config,
        &[
            "price", "record", "--security", "vti", "--price", "11000", "--at",
            "2024-01-02T21:00:00Z",
        ],
    )?;
    assert_eq!(recorded["stored"], 1);

    let portfolio = json_ok(&config, &["portfolio", "--user", "u1"])?;
    assert_eq!(portfolio["total_value"], 110_000);
    assert_eq!(portfolio["total_gain_loss"], 9_500);
    assert_eq!(portfolio["display"]["total_value"], "1,100.00");

    let history = json_ok(&config, &["history", "--account", "brokerage", "--security", "vti"])?;
    assert_eq!(history["total_items"], 1);

    let accounts = json_ok(&config, &["account", "list", "--user", "u1"])?;
    let chk = accounts
        .as_array()
        .and_then(|list| list.iter().find(|a| a["id"] == "chk"))
        .expect("checking account listed");
    assert_eq!(chk["balance"], 500_000 - 100_500);

    let snapshot = json_ok(&config, &["snapshot", "run", "--at", "2024-01-03T00:00:00Z"])?;
    assert_eq!(snapshot["recorded"], 1);
    let listed = json_ok(&config, &["snapshot", "list", "--user", "u1"])?;
    assert_eq!(listed["data"][0]["cash_balance"], 500_000 - 100_500);
    assert_eq!(listed["data"][0]["investment_value"], 110_000);
    Ok(())
}

#[test]
fn domain_errors_exit_nonzero_with_code() -> Result<()> {
    let (_temp, config) = setup()?;
    add_accounts(&config, 100_000)?;
    json_ok(
        &config,
        &["security", "add", "--symbol", "VTI", "--name", "VTI", "--asset-class", "etf"],
    )?;
    json_ok(
        &config,
        &["buy", "--account", "brokerage", "--security", "VTI", "--quantity", "1", "--price", "100"],
    )?;

    let output = kuberan(
        &config,
        &["sell", "--account", "brokerage", "--security", "VTI", "--quantity", "2", "--price", "100"],
    )?;
    assert_eq!(output.status.code(), Some(1));
    let json: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["error"]["code"], "INSUFFICIENT_SHARES");

    let output = kuberan(&config, &["history", "--account", "brokerage", "--security", "AAPL"])?;
    assert_eq!(output.status.code(), Some(1));
    let json: Value = serde_json::from_slice(&output.stdout)?;
    assert_eq!(json["error"]["code"], "NOT_FOUND");
    Ok(())
}

#[test]
fn snapshot_run_covers_every_user() -> Result<()> {
    let (_temp, config) = setup()?;
    for (user, id) in [("u1", "chk-1"), ("u2", "chk-2")] {
        json_ok(
            &config,
            &[
                "account", "add", "--user", user, "--name", "Checking", "--kind", "cash",
                "--balance", "2500", "--id", id,
            ],
        )?;
    }

    let at = "2024-06-30T00:00:00Z";
    let batch = json_ok(&config, &["snapshot", "run", "--at", at])?;
    assert_eq!(batch["recorded"], 2);

    let again = json_ok(&config, &["snapshot", "run", "--at", at])?;
    assert_eq!(again["recorded"], 0);
    assert_eq!(again["already_recorded"], 2);

    let listed = json_ok(&config, &["snapshot", "list", "--user", "u2"])?;
    assert_eq!(listed["total_items"], 1);
    assert_eq!(listed["data"][0]["total_net_worth"], 2_500);
    Ok(())
}
