use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use fbls_client::{ResolvedServer, ServerSource, UpdateCheckOutcome};
use fbls_installer::{Preferences, StorageLayout};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

/// Byte progress for one artifact download, drawn on stderr.
pub(crate) struct DownloadProgress {
    style: OutputStyle,
    label: String,
    current: u64,
    total: Option<u64>,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if let Some(line) = render_section_header(self.style, title) {
            println!();
            println!("{}", colorize(section_style(), &line));
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

impl DownloadProgress {
    pub(crate) fn start(style: OutputStyle, label: &str) -> Self {
        let progress_bar = if style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new_spinner();
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        Self {
            style,
            label: label.to_string(),
            current: 0,
            total: None,
            progress_bar,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn set(&mut self, current: u64, total: Option<u64>) {
        self.current = current;
        let Some(progress_bar) = &self.progress_bar else {
            self.total = total;
            return;
        };

        if self.total.is_none() {
            if let Some(total) = total {
                progress_bar.set_length(total.max(1));
                if let Ok(style) = ProgressStyle::with_template(
                    "{spinner:.cyan.bold} {msg:<12} [{bar:20.cyan/blue}] {bytes}/{total_bytes} {elapsed_precise}",
                ) {
                    progress_bar.set_style(style.progress_chars("=>-"));
                }
            }
        }
        self.total = total;
        progress_bar.set_position(current);
    }

    pub(crate) fn finish(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };

        progress_bar.finish_and_clear();
        if let Some(line) = render_progress_line(
            self.style,
            &self.label,
            self.current,
            self.total,
            Some(self.started_at.elapsed()),
        ) {
            eprintln!("{line}");
        }
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(std::io::stdout().is_terminal())
}

/// Progress bars go to stderr, so they follow stderr rather than stdout.
pub(crate) fn current_progress_style() -> OutputStyle {
    resolve_output_style(std::io::stderr().is_terminal())
}

pub(crate) fn resolve_output_style(is_tty: bool) -> OutputStyle {
    if is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => {
            let badge = match status {
                "ok" => "[OK]",
                "warn" => "[WARN]",
                "err" => "[ERR]",
                _ => "[..]",
            };
            format!("{badge} {message}")
        }
    }
}

pub(crate) fn format_resolved_line(server: &ResolvedServer) -> String {
    let origin = match &server.source {
        ServerSource::Configured => "configured path".to_string(),
        ServerSource::SystemPath => "PATH".to_string(),
        ServerSource::Cached { version } => format!("cached {version}"),
        ServerSource::Downloaded { version } => format!("downloaded {version}"),
    };
    format!("using {} ({origin})", server.path.display())
}

/// Status keyword and message for a finished update check.
pub(crate) fn format_update_outcome(outcome: &UpdateCheckOutcome) -> (&'static str, String) {
    match outcome {
        UpdateCheckOutcome::UpToDate => ("ok", "server is up to date".to_string()),
        UpdateCheckOutcome::AlreadySkipped(version) => {
            ("step", format!("{version} is available but was skipped"))
        }
        UpdateCheckOutcome::Skipped(version) => ("step", format!("skipped {version}")),
        UpdateCheckOutcome::Dismissed => ("step", "update postponed".to_string()),
        UpdateCheckOutcome::Installed {
            version,
            restart_requested: true,
            ..
        } => (
            "ok",
            format!("installed {version}; restart the language server to use it"),
        ),
        UpdateCheckOutcome::Installed { version, .. } => (
            "ok",
            format!("installed {version}; it will be used from the next session"),
        ),
        UpdateCheckOutcome::Failed(err) => ("warn", format!("update check failed: {err}")),
    }
}

pub(crate) fn format_status_lines(
    layout: &StorageLayout,
    preferences: &Preferences,
    configured_path: Option<&std::path::Path>,
    installed: &[String],
) -> Vec<String> {
    let mut lines = vec![
        format!("prefix: {}", layout.prefix().display()),
        format!("servers: {}", layout.servers_dir().display()),
        format!(
            "cached version: {}",
            preferences.latest_known_version.as_deref().unwrap_or("none")
        ),
        format!(
            "skipped version: {}",
            preferences.latest_skipped_version.as_deref().unwrap_or("none")
        ),
        format!(
            "auto-download: {}",
            if preferences.auto_download { "on" } else { "off" }
        ),
        format!(
            "server path: {}",
            configured_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "not configured".to_string())
        ),
    ];
    if installed.is_empty() {
        lines.push("installed: none".to_string());
    } else {
        lines.push(format!("installed: {}", installed.join(", ")));
    }
    lines
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn progress_bar_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(format!("== {title} ==")),
    }
}

pub(crate) fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: Option<u64>,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    let width = 18_usize;
    let safe_total = total.unwrap_or(current).max(1);
    let bounded_current = current.min(safe_total);
    let filled = ((bounded_current as usize) * width) / (safe_total as usize);
    let bar = format!(
        "{}{}",
        "=".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    let percent = (bounded_current * 100) / safe_total;
    let counts = match total {
        Some(total) => format!("{}/{}", HumanBytes(current), HumanBytes(total)),
        None => HumanBytes(current).to_string(),
    };
    let suffix = elapsed
        .map(|value| format!(" complete in {}", format_elapsed(value)))
        .unwrap_or_default();

    Some(format!(
        "{} [{}] {:>3}% {}{}",
        colorize(progress_label_style(), label),
        colorize(progress_bar_style(), &bar),
        percent,
        counts,
        suffix
    ))
}
