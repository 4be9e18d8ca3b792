use clap::Parser;
use tracing_subscriber::EnvFilter;

mod action;
mod github;
mod workflow;

/// Install a GitHub App on a repository on behalf of an issue author.
///
/// Meant to run as a GitHub Actions step: every flag can also be provided
/// through the environment, either as the Actions input (INPUT_APP_ID, ...)
/// or as the bare variable (APP_ID, ...).
#[derive(clap::Parser)]
struct Cli {
    /// Identifier of the GitHub App to install.
    #[clap(long)]
    app_id: Option<String>,

    /// Number of the issue that requested the installation.
    #[clap(long)]
    issue_number: Option<String>,

    /// Organization owning both repositories.
    #[clap(long)]
    org: Option<String>,

    /// Repository the issue lives in.
    #[clap(long)]
    repo: Option<String>,

    /// Repository to install the app on.
    #[clap(long)]
    target_repo: Option<String>,

    /// API token used for every call.
    #[clap(long)]
    token: Option<String>,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();

    if std::env::var("LOG_STYLE").as_deref().unwrap_or("human") == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .event_format(tracing_subscriber::fmt::format::json())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }

    let args = Cli::parse();
    action::main(args).await
}
