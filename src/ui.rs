// UI layer: runs one command and prints its progress lines.
// Prompts use `dialoguer`; long calls show an `indicatif` spinner.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use dialoguer::{Confirm, Password};
use indicatif::{ProgressBar, ProgressStyle};

use crate::api::ApiClient;
use crate::cli::{Cli, Commands, TokenCommands};
use crate::config::Settings;
use crate::deploy::{DeployOutcome, Deployer};
use crate::error::{DeployError, ScaffoldError};
use crate::scaffold::ScaffoldPlan;
use crate::token::{FileTokenStore, Token, TokenStore};

/// Runs the parsed command. `Ok(false)` means a failure was reported to
/// the user; `Err` is reserved for local faults such as an unreadable
/// working directory.
pub fn run(cli: Cli, settings: Settings) -> Result<bool> {
    let settings = settings.with_api_url(cli.api_url);
    let api = ApiClient::new(&settings).context("Failed to build HTTP client")?;
    let store = FileTokenStore::in_dir(&settings.config_dir);

    match cli.command {
        Commands::Init { dir, force } => init(&api, &project_dir(dir)?, force),
        Commands::Deploy { dir } => Ok(deploy(&api, &store, &project_dir(dir)?)),
        Commands::Token { action } => token(&api, &store, action),
        Commands::Orgs => orgs(&api, &store),
    }
}

fn project_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("Failed to read current directory"),
    }
}

fn spinner(msg: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(msg);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// `init`: fetch the template and write it into `root`.
fn init(api: &ApiClient, root: &Path, force: bool) -> Result<bool> {
    println!();
    println!("- Retrieving files from servers");
    let pb = spinner("Fetching template...");
    let fetched = api.fetch_template();
    pb.finish_and_clear();

    let files = match fetched {
        Ok(files) => files,
        Err(e) => {
            print_failure(&ScaffoldError::from(e).to_string(), &[]);
            return Ok(false);
        }
    };
    println!("- Received files");

    let plan = match ScaffoldPlan::new(root, files) {
        Ok(plan) => plan,
        Err(e) => {
            print_failure(&e.to_string(), &[]);
            return Ok(false);
        }
    };

    let mut overwrite = force;
    if !overwrite && !plan.conflicts().is_empty() {
        let list = plan.conflicts().join(", ");
        overwrite = Confirm::new()
            .with_prompt(format!("Overwrite existing files ({list})?"))
            .default(false)
            .interact()?;
        if !overwrite {
            print_failure("Initialisation cancelled; no files were written", &[]);
            return Ok(false);
        }
    }

    println!("- Writing files");
    if let Err(e) = plan.write(overwrite, |name| println!("  + {name}")) {
        print_failure(&e.to_string(), &[]);
        return Ok(false);
    }
    println!("- Finished initialising project");
    println!();
    Ok(true)
}

/// `deploy`: package `root` and upload it under the stored token.
fn deploy(api: &ApiClient, store: &dyn TokenStore, root: &Path) -> bool {
    println!();
    println!("Deploying project to servers");

    let pb = spinner("Packaging and uploading...");
    let outcome = Deployer::new(api, store).run(root);
    pb.finish_and_clear();

    for (tone, line) in deploy_lines(&outcome) {
        print_line(tone, &line);
    }
    println!();
    outcome.succeeded()
}

/// How a console line is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Plain,
    Success,
    Failure,
}

fn print_line(tone: Tone, line: &str) {
    match tone {
        Tone::Plain => println!("{line}"),
        Tone::Success => println!("{}", line.green()),
        Tone::Failure => println!("{}", line.red()),
    }
}

/// Console lines for a finished deploy.
pub fn deploy_lines(outcome: &DeployOutcome) -> Vec<(Tone, String)> {
    let mut lines = Vec::new();
    if let Some(report) = outcome.archive {
        lines.push((
            Tone::Plain,
            format!(
                "- Zipped package for uploading ({} files, {} bytes)",
                outcome.files, report.compressed_bytes
            ),
        ));
    }
    match &outcome.error {
        None => lines.push((Tone::Success, "- Uploaded package (Congrats!)".to_string())),
        Some(err) => lines.extend(failure_lines(&err.to_string(), &err.details())),
    }
    lines
}

/// Cause line followed by one indented line per detail.
pub fn failure_lines(cause: &str, details: &[String]) -> Vec<(Tone, String)> {
    let mut lines = vec![(Tone::Failure, format!("- {cause}"))];
    lines.extend(details.iter().map(|d| (Tone::Plain, format!("    {d}"))));
    lines
}

fn print_failure(cause: &str, details: &[String]) {
    for (tone, line) in failure_lines(cause, details) {
        print_line(tone, &line);
    }
}

fn stored_token(store: &dyn TokenStore) -> Result<Option<Token>> {
    let token = store.get().context("Failed to read stored token")?;
    if token.is_none() {
        print_failure("No auth token stored; run `assistant token set` first", &[]);
    }
    Ok(token)
}

fn token(api: &ApiClient, store: &dyn TokenStore, action: TokenCommands) -> Result<bool> {
    match action {
        TokenCommands::Set { token } => {
            let raw = match token {
                Some(t) => t,
                None => Password::new().with_prompt("Auth token").interact()?,
            };
            let Some(token) = Token::new(raw) else {
                print_failure("Refusing to store an empty token", &[]);
                return Ok(false);
            };
            store.set(token).context("Failed to store token")?;
            print_line(Tone::Success, "- Token stored");
            Ok(true)
        }
        TokenCommands::Show => {
            let Some(token) = stored_token(store)? else {
                return Ok(false);
            };
            println!("Token: {}", token.masked());
            match token.jwt_claims() {
                Some(claims) => {
                    println!("Claims:");
                    println!("{}", serde_json::to_string_pretty(&claims)?);
                }
                None => println!("(opaque token, no readable claims)"),
            }
            Ok(true)
        }
        TokenCommands::Verify => {
            let Some(token) = stored_token(store)? else {
                return Ok(false);
            };
            let pb = spinner("Verifying...");
            let verified = api.verify_token(&token);
            pb.finish_and_clear();
            match verified {
                Ok(true) => {
                    print_line(Tone::Success, "- Token is valid");
                    Ok(true)
                }
                Ok(false) => {
                    print_failure("Token is not valid", &[]);
                    Ok(false)
                }
                Err(e) => {
                    print_failure("Could not verify token", &[e.to_string()]);
                    Ok(false)
                }
            }
        }
        TokenCommands::Clear => {
            store.clear().context("Failed to clear token")?;
            println!("- Token removed");
            Ok(true)
        }
    }
}

fn orgs(api: &ApiClient, store: &dyn TokenStore) -> Result<bool> {
    let Some(token) = stored_token(store)? else {
        return Ok(false);
    };
    let pb = spinner("Fetching organisations...");
    let fetched = api.organisations(&token);
    pb.finish_and_clear();

    match fetched {
        Ok(orgs) if orgs.is_empty() => {
            println!("No organisations");
            Ok(true)
        }
        Ok(orgs) => {
            for (id, org) in orgs {
                println!("{id}  {}  ({})", org.team_name, org.membership_type);
            }
            Ok(true)
        }
        Err(e) => {
            print_failure("Could not list organisations", &[e.to_string()]);
            Ok(false)
        }
    }
}
