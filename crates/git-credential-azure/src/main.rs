use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use git_credential_azure_core::auth::{
    browser_available, AuthError, IdentityClient, MicrosoftIdentityProvider, Notifier,
};
use git_credential_azure_core::config::IdentityConfig;
use git_credential_azure_core::pat::PatClient;
use git_credential_azure_core::{
    Action, CredentialHelper, CredentialRequest, CredentialResponse, HelperOptions,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

const ACTIONS_HELP: &str = "Actions:\n  get            Generate credential\n\nConfigure with:\n  git config --global credential.https://dev.azure.com.helper azure";

/// Git credential helper that signs in to Azure DevOps with OAuth.
#[derive(Parser, Debug)]
#[command(
    name = "git-credential-azure",
    author,
    version,
    override_usage = "git credential-azure [<options>] <action>",
    after_help = ACTIONS_HELP
)]
struct Cli {
    /// Log debug information to stderr
    #[arg(long)]
    verbose: bool,
    /// Instead of opening a web browser locally, print a code to enter on another device
    #[arg(long)]
    device: bool,
    /// Credential helper action sent by git (get, store, erase)
    action: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(err) = run(cli).await {
        eprintln!("git-credential-azure: {err:#}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn init_tracing(verbose: bool) {
    let directives = if verbose {
        "warn,git_credential_azure=debug,git_credential_azure_core=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    tracing::debug!("git-credential-azure {}", env!("CARGO_PKG_VERSION"));
    serve(&cli, &mut tokio::io::stdin(), &mut tokio::io::stdout()).await
}

/// Answer one credential request read from `input`; the credential, if any, goes to `output`.
async fn serve<R, W>(cli: &Cli, input: &mut R, output: &mut W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let action = Action::from(cli.action.as_str());

    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .await
        .context("failed to read credential request from stdin")?;
    let request = CredentialRequest::parse(&raw);

    let helper = build_helper(cli)?;
    let response = tokio::select! {
        result = helper.run(&action, &request) => result.context("authentication failed")?,
        _ = tokio::signal::ctrl_c() => return Err(AuthError::Cancelled.into()),
    };
    emit(response.as_ref(), output).await
}

async fn emit<W>(response: Option<&CredentialResponse>, output: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(response) = response else {
        return Ok(());
    };
    output
        .write_all(response.to_string().as_bytes())
        .await
        .context("failed to write credential to stdout")?;
    output.flush().await?;
    Ok(())
}

fn build_helper(cli: &Cli) -> Result<CredentialHelper<MicrosoftIdentityProvider, PatClient>> {
    let config = IdentityConfig::with_defaults().context("invalid identity configuration")?;
    let client = IdentityClient::new(config).context("failed to build identity client")?;
    // Sign-in instructions are shown regardless of --verbose.
    let notify: Notifier = Arc::new(|message: &str| eprintln!("{message}"));
    let provider = MicrosoftIdentityProvider::new(client, notify);
    if !cli.device && !browser_available() {
        tracing::warn!("no local browser detected; consider --device");
    }

    let issuer = PatClient::new().context("failed to build Azure DevOps client")?;
    let options = HelperOptions { device: cli.device };
    Ok(CredentialHelper::new(provider, issuer, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_and_action() {
        let cli = Cli::try_parse_from(["git-credential-azure", "--device", "--verbose", "get"])
            .unwrap();
        assert!(cli.device);
        assert!(cli.verbose);
        assert_eq!(Action::from(cli.action.as_str()), Action::Get);
    }

    #[test]
    fn exactly_one_action_required() {
        let err = Cli::try_parse_from(["git-credential-azure"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);

        let err = Cli::try_parse_from(["git-credential-azure", "get", "store"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
        assert_eq!(err.exit_code(), 2);
    }

    async fn serve_bytes(args: &[&str], input: &str) -> Vec<u8> {
        let cli = Cli::try_parse_from(args.iter().copied()).unwrap();
        let mut output = Vec::new();
        serve(&cli, &mut input.as_bytes(), &mut output).await.unwrap();
        output
    }

    #[tokio::test]
    async fn foreign_host_writes_nothing() {
        let output = serve_bytes(
            &["git-credential-azure", "get"],
            "protocol=https\nhost=github.com\n\n",
        )
        .await;
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn store_and_erase_write_nothing() {
        let input = "protocol=https\nhost=dev.azure.com\npath=myorg/repo.git\npassword=secret\n";
        for action in ["store", "erase"] {
            let output = serve_bytes(&["git-credential-azure", action], input).await;
            assert!(output.is_empty(), "{action} wrote {output:?}");
        }
    }

    #[tokio::test]
    async fn credential_is_written_as_lines() {
        let response = CredentialResponse {
            username: Some("myorg".into()),
            password: "pat123".into(),
            password_expiry_utc: None,
        };
        let mut output = Vec::new();
        emit(Some(&response), &mut output).await.unwrap();
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "password=pat123\nusername=myorg\n"
        );

        let mut output = Vec::new();
        emit(None, &mut output).await.unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn other_actions_are_accepted() {
        let cli = Cli::try_parse_from(["git-credential-azure", "erase"]).unwrap();
        assert_eq!(Action::from(cli.action.as_str()), Action::Erase);
    }
}
