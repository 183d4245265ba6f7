use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use fbls_client::{
    start_client, stop_client, AcquireOutcome, Acquirer, ClientConfig, ProcessLauncher, Prompter,
    SystemPathLookup, UpdateCheckOutcome,
};
use fbls_core::version_dir_name;
use fbls_installer::{
    default_user_prefix, list_installed_versions, reap_old_versions, PreferenceStore,
    StorageLayout,
};
use fbls_release::{GithubReleaseIndex, HttpDownloader, ReleaseSource, UnconfiguredReleaseIndex};
use tracing::debug;

use crate::completion::write_completions_script;
use crate::prompt::{NonInteractivePrompter, TerminalPrompter};
use crate::render::{
    current_progress_style, format_resolved_line, format_status_lines, format_update_outcome,
    TerminalRenderer,
};
use crate::{Cli, Commands, ConfigCommand};

const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

pub(crate) fn run_cli(cli: Cli) -> Result<ExitCode> {
    let renderer = TerminalRenderer::current();

    match cli.command {
        Commands::Resolve { yes } => {
            let layout = open_layout()?;
            let config = load_client_config(&layout, cli.server_path)?;
            run_resolve(&layout, &config, yes, renderer)
        }
        Commands::Serve { args } => {
            let layout = open_layout()?;
            let config = load_client_config(&layout, cli.server_path)?;
            run_serve(&layout, &config, args)
        }
        Commands::Update { yes } => {
            let layout = open_layout()?;
            let config = load_client_config(&layout, cli.server_path)?;
            run_update(&layout, &config, yes, renderer)
        }
        Commands::Status => {
            let layout = open_layout()?;
            let config = load_client_config(&layout, cli.server_path)?;
            let preferences = PreferenceStore::new(layout.preferences_path()).snapshot()?;
            let installed = list_installed_versions(&layout.servers_dir());
            renderer.print_section("status");
            renderer.print_lines(&format_status_lines(
                &layout,
                &preferences,
                config.server_path.as_deref(),
                &installed,
            ));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { setting } => {
            let layout = open_layout()?;
            run_config(&layout, setting, renderer)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Prune => {
            let layout = open_layout()?;
            run_prune(&layout, renderer)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions { shell } => {
            write_completions_script(shell, &mut io::stdout().lock())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_layout() -> Result<StorageLayout> {
    Ok(StorageLayout::new(default_user_prefix()?))
}

/// File settings, then environment, then the `--server-path` flag.
fn load_client_config(
    layout: &StorageLayout,
    server_path_flag: Option<std::path::PathBuf>,
) -> Result<ClientConfig> {
    let mut config = ClientConfig::load(&layout.config_path())?.with_process_env();
    if let Some(path) = server_path_flag.filter(|path| !path.as_os_str().is_empty()) {
        config.server_path = Some(path);
    }
    Ok(config)
}

fn build_acquirer(
    layout: &StorageLayout,
    config: &ClientConfig,
    prompter: Arc<dyn Prompter>,
) -> Result<Acquirer> {
    let releases: Arc<dyn ReleaseSource> = match &config.release_url {
        Some(url) => Arc::new(
            GithubReleaseIndex::new(url.clone())?.with_token(std::env::var(GITHUB_TOKEN_ENV).ok()),
        ),
        None => Arc::new(UnconfiguredReleaseIndex),
    };
    let downloader = HttpDownloader::new()?;
    Ok(Acquirer::new(
        layout.clone(),
        releases,
        Arc::new(downloader),
        prompter,
        Arc::new(SystemPathLookup),
    ))
}

fn run_resolve(
    layout: &StorageLayout,
    config: &ClientConfig,
    assume_yes: bool,
    renderer: TerminalRenderer,
) -> Result<ExitCode> {
    let prompter = Arc::new(TerminalPrompter::new(current_progress_style(), assume_yes));
    let acquirer = build_acquirer(layout, config, prompter.clone())?;

    let acquisition = acquirer.acquire(config.server_path.as_deref());
    prompter.finish_progress();
    let server = match acquisition.outcome {
        AcquireOutcome::Resolved(server) => server,
        AcquireOutcome::Cancelled => {
            renderer.print_status("warn", "download cancelled; no language server available");
            return Ok(ExitCode::FAILURE);
        }
        AcquireOutcome::Failed(err) => {
            return Err(anyhow!(err)).context("failed to acquire flatbuffers-language-server");
        }
    };
    renderer.print_status("ok", &format_resolved_line(&server));

    if let Some(check) = acquisition.update_check {
        debug!("waiting for background update check");
        match check.wait() {
            Some(outcome) => {
                prompter.finish_progress();
                let (status, message) = format_update_outcome(&outcome);
                renderer.print_status(status, &message);
            }
            None => renderer.print_status("warn", "update check aborted unexpectedly"),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_serve(layout: &StorageLayout, config: &ClientConfig, args: Vec<OsString>) -> Result<ExitCode> {
    let acquirer = build_acquirer(layout, config, Arc::new(NonInteractivePrompter))?;
    let launcher = ProcessLauncher::new().with_args(args);
    let Some(mut handle) = start_client(&acquirer, config, &launcher)? else {
        return Err(anyhow!(
            "no flatbuffers-language-server available; run `fbls resolve` to download one"
        ));
    };
    debug!(path = %handle.resolved().path.display(), "relaying editor session");

    let relayed = handle.relay_editor_input(io::stdin().lock());
    let stopped = stop_client(handle);
    let relayed = relayed?;
    debug!(messages = relayed, "editor session ended");
    if let Some(outcome) = stopped? {
        debug!(?outcome, "background update check finished");
    }
    Ok(ExitCode::SUCCESS)
}

fn run_update(
    layout: &StorageLayout,
    config: &ClientConfig,
    assume_yes: bool,
    renderer: TerminalRenderer,
) -> Result<ExitCode> {
    let prompter = Arc::new(TerminalPrompter::new(current_progress_style(), assume_yes));
    let acquirer = build_acquirer(layout, config, prompter.clone())?;

    let Some(outcome) = acquirer.check_for_update() else {
        renderer.print_status("warn", "no cached server installed; run `fbls resolve` first");
        return Ok(ExitCode::FAILURE);
    };
    prompter.finish_progress();

    if let UpdateCheckOutcome::Failed(err) = &outcome {
        return Err(anyhow!(err.clone())).context("update check failed");
    }
    let (status, message) = format_update_outcome(&outcome);
    renderer.print_status(status, &message);
    Ok(ExitCode::SUCCESS)
}

fn run_config(layout: &StorageLayout, setting: ConfigCommand, renderer: TerminalRenderer) -> Result<()> {
    match setting {
        ConfigCommand::AutoDownload { state } => {
            PreferenceStore::new(layout.preferences_path())
                .set_auto_download_enabled(state.enabled())?;
            let message = if state.enabled() {
                "auto-download enabled"
            } else {
                "auto-download disabled"
            };
            renderer.print_status("ok", message);
        }
        ConfigCommand::ServerPath { path, unset } => {
            let config_path = layout.config_path();
            let mut config = ClientConfig::load(&config_path)?;
            config.server_path = if unset { None } else { path };
            config.save(&config_path)?;
            let message = match &config.server_path {
                Some(path) => format!("server path set to {}", path.display()),
                None => "server path cleared".to_string(),
            };
            renderer.print_status("ok", &message);
        }
        ConfigCommand::ReleaseUrl { url, unset } => {
            let config_path = layout.config_path();
            let mut config = ClientConfig::load(&config_path)?;
            config.release_url = if unset {
                None
            } else {
                url.filter(|value| !value.trim().is_empty())
            };
            config.save(&config_path)?;
            let message = match &config.release_url {
                Some(url) => format!("release index set to {url}"),
                None => "release index cleared".to_string(),
            };
            renderer.print_status("ok", &message);
        }
    }
    Ok(())
}

fn run_prune(layout: &StorageLayout, renderer: TerminalRenderer) -> Result<()> {
    let store = PreferenceStore::new(layout.preferences_path());
    let Some(version) = store.cached_version()? else {
        renderer.print_status("warn", "no cached version recorded; nothing pruned");
        return Ok(());
    };
    if !layout.binary_path(&version).is_file() {
        renderer.print_status(
            "warn",
            &format!("cached version {version} is missing on disk; nothing pruned"),
        );
        return Ok(());
    }

    let report = reap_old_versions(&layout.servers_dir(), &version_dir_name(&version));
    for path in &report.removed {
        renderer.print_status("ok", &format!("removed {}", display_name(path)));
    }
    for (path, reason) in &report.failed {
        renderer.print_status("warn", &format!("failed removing {}: {reason}", display_name(path)));
    }
    if report.removed.is_empty() && report.failed.is_empty() {
        renderer.print_status("ok", &format!("only {version} is installed"));
    }
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
