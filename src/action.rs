//! Entry point when running as a GitHub Actions step.

use tracing::error;

use crate::github::api::GitHub;
use crate::workflow::{self, Inputs, RunError};
use crate::Cli;

pub async fn main(cli: Cli) -> eyre::Result<()> {
    let inputs = resolve_inputs(cli)?;
    let api = GitHub::new(&inputs.token);

    match workflow::run(&api, &inputs).await {
        Ok(()) => Ok(()),
        Err(RunError::Failed(message)) => set_failed(&message),
        Err(RunError::Comment(e)) => Err(eyre::Report::new(e)),
    }
}

/// Equivalent of `core.setFailed`: an error workflow command on stdout plus a
/// failing exit status.
fn set_failed(message: &str) -> ! {
    error!("{message}");
    println!("::error::{message}");
    std::process::exit(1)
}

fn resolve_inputs(cli: Cli) -> eyre::Result<Inputs> {
    Ok(Inputs {
        app_id: required("APP_ID", cli.app_id)?,
        issue_number: required("ISSUE_NUMBER", cli.issue_number)?,
        org: required("ORG", cli.org)?,
        repo: required("REPO", cli.repo)?,
        target_repo: required("TARGET_REPO", cli.target_repo)?,
        token: required("TOKEN", cli.token)?,
    })
}

/// Resolve one required input: a CLI flag if given, otherwise `INPUT_<NAME>`
/// (how Actions delivers `with:` inputs), otherwise `<NAME>` directly.
fn required(name: &str, flag: Option<String>) -> eyre::Result<String> {
    let raw = flag
        .or_else(|| std::env::var(format!("INPUT_{name}")).ok())
        .or_else(|| std::env::var(name).ok())
        .unwrap_or_default();

    let value = raw.trim();
    if value.is_empty() {
        return Err(eyre::eyre!("Input required and not supplied: {name}"));
    }
    Ok(value.to_owned())
}
