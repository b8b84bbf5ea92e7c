//! authgate - issue authenticated API requests from the shell.
//!
//! Credentials live in the OS keychain (or an encrypted file when
//! `AUTHGATE_VAULT_PASSPHRASE` is set) and are refreshed transparently when
//! the server rejects them.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use authgate_core::api::{ApiClient, Method, Payload};
use authgate_core::auth::{
    CredentialBackend, EncryptedFileBackend, KeyringBackend, Navigator, Session, SessionGate,
    TokenGrant,
};
use authgate_core::{Config, GateDecision};
use serde_json::Value;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

const USAGE: &str = "\
usage:
  authgate get <path>...                      GET one or more paths concurrently
  authgate <post|put|patch|delete> <path> [json-body]
  authgate login <access> <access-exp> [refresh] [refresh-exp]
  authgate logout
  authgate gate <destination> [--protected]
  authgate whoami";

/// Log file name inside `AUTHGATE_LOG_DIR`
const LOG_FILE: &str = "authgate.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, filtered by `RUST_LOG` (default `warn`). When
/// `AUTHGATE_LOG_DIR` is set, a daily rolling file receives the same events;
/// the returned guard must live until exit so buffered lines are flushed.
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os("AUTHGATE_LOG_DIR").map(PathBuf::from) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

/// Prints where the user should go instead of navigating.
struct HintNavigator;

impl Navigator for HintNavigator {
    fn redirect_to(&self, path: &str) {
        eprintln!("Not signed in. Continue at: {}", path);
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Get(Vec<String>),
    Send {
        method: Method,
        path: String,
        body: Option<Value>,
    },
    Login(TokenGrantArgs),
    Logout,
    Gate {
        destination: String,
        protected: bool,
    },
    WhoAmI,
}

#[derive(Debug, PartialEq)]
struct TokenGrantArgs {
    access: String,
    access_exp: String,
    refresh: Option<String>,
    refresh_exp: Option<String>,
}

impl TokenGrantArgs {
    fn into_grant(self) -> TokenGrant {
        TokenGrant {
            access_token: self.access,
            access_token_exp: expiry_arg(self.access_exp),
            refresh_token: self.refresh,
            refresh_token_exp: self.refresh_exp.and_then(expiry_arg),
        }
    }
}

/// `none` (or `-`) stores the credential without an expiry
fn expiry_arg(raw: String) -> Option<Value> {
    match raw.as_str() {
        "none" | "-" => None,
        _ => Some(Value::String(raw)),
    }
}

fn parse_args(args: &[String]) -> Result<Command> {
    let (verb, rest) = match args.split_first() {
        Some((verb, rest)) => (verb.as_str(), rest),
        None => bail!("missing command\n{}", USAGE),
    };

    let command = match verb {
        "get" => {
            if rest.is_empty() {
                bail!("get needs at least one path\n{}", USAGE);
            }
            Command::Get(rest.to_vec())
        }
        "post" | "put" | "patch" | "delete" => {
            let method = match verb {
                "post" => Method::POST,
                "put" => Method::PUT,
                "patch" => Method::PATCH,
                _ => Method::DELETE,
            };
            let path = rest
                .first()
                .with_context(|| format!("{} needs a path\n{}", verb, USAGE))?
                .clone();
            let body = rest
                .get(1)
                .map(|raw| serde_json::from_str(raw).context("request body is not valid JSON"))
                .transpose()?;
            Command::Send { method, path, body }
        }
        "login" => match rest {
            [access, access_exp, others @ ..] if others.len() <= 2 => {
                Command::Login(TokenGrantArgs {
                    access: access.clone(),
                    access_exp: access_exp.clone(),
                    refresh: others.first().cloned(),
                    refresh_exp: others.get(1).cloned(),
                })
            }
            _ => bail!("login needs <access> <access-exp> [refresh] [refresh-exp]\n{}", USAGE),
        },
        "logout" => Command::Logout,
        "gate" => {
            let destination = rest
                .iter()
                .find(|a| !a.starts_with("--"))
                .with_context(|| format!("gate needs a destination\n{}", USAGE))?
                .clone();
            let protected = rest.iter().any(|a| a == "--protected");
            Command::Gate {
                destination,
                protected,
            }
        }
        "whoami" => Command::WhoAmI,
        other => bail!("unknown command {:?}\n{}", other, USAGE),
    };
    Ok(command)
}

fn credential_backend() -> Result<Arc<dyn CredentialBackend>> {
    match std::env::var("AUTHGATE_VAULT_PASSPHRASE") {
        Ok(passphrase) if !passphrase.is_empty() => {
            let vault = EncryptedFileBackend::in_cache_dir(&passphrase)?;
            info!(path = %vault.path().display(), "Using encrypted credential file");
            Ok(Arc::new(vault))
        }
        _ => Ok(Arc::new(KeyringBackend::default())),
    }
}

fn print_payload(payload: Option<Payload>) -> Result<()> {
    match payload {
        Some(Payload::Json(value)) => println!("{}", serde_json::to_string_pretty(&value)?),
        Some(Payload::Text(text)) => println!("{}", text),
        None => bail!("request was not authenticated"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if matches!(args.first().map(String::as_str), Some("-h" | "--help")) {
        println!("{}", USAGE);
        return Ok(());
    }
    let command = parse_args(&args)?;

    let mut config = Config::load()?;
    config.apply_env_overrides()?;

    let session = Arc::new(Session::new(
        &config,
        credential_backend()?,
        Arc::new(HintNavigator),
    ));

    match command {
        Command::Get(paths) => {
            let client = ApiClient::new(&config, session)?;
            let requests = paths.iter().map(|path| client.get(path, None));
            let results = futures::future::join_all(requests).await;

            let mut failed = 0;
            for (path, result) in paths.iter().zip(results) {
                if paths.len() > 1 {
                    println!("# {}", path);
                }
                if let Err(e) = result.map_err(anyhow::Error::from).and_then(print_payload) {
                    eprintln!("{}: {:#}", path, e);
                    failed += 1;
                }
            }
            if failed > 0 {
                bail!("{} of {} requests failed", failed, paths.len());
            }
        }
        Command::Send { method, path, body } => {
            let client = ApiClient::new(&config, session)?;
            let payload = client.request(method, &path, body, None).await?;
            print_payload(payload)?;
        }
        Command::Login(args) => {
            session.establish(&args.into_grant())?;
            println!("Credentials stored");
        }
        Command::Logout => {
            session.logout()?;
            println!("Signed out");
        }
        Command::Gate {
            destination,
            protected,
        } => {
            let gate = SessionGate::from_config(&config);
            let decision = gate.check(&session, &destination, protected);
            match decision {
                GateDecision::Allow => println!("allow"),
                GateDecision::Redirect(path) => println!("redirect {}", path),
                GateDecision::Deny => bail!("navigation to {} denied: no login path configured", destination),
            }
        }
        Command::WhoAmI => {
            let claims = session.claims()?;
            println!("{}", serde_json::to_string_pretty(&claims)?);
        }
    }

    Ok(())
}
