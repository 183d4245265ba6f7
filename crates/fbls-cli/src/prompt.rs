use std::io::{self, BufRead, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};

use fbls_client::{DownloadDecision, Prompter, RestartDecision, UpdateDecision};
use tracing::info;

use crate::render::{DownloadProgress, OutputStyle};

/// Asks on stderr and reads answers from stdin.
///
/// The terminal commands own no running language server; the session lives
/// in the editor or in a separate `fbls serve` process. A restart offer is
/// therefore never accepted here: it prints how to switch versions and
/// answers [`RestartDecision::Later`], so `restart_requested` stays `false`
/// for updates installed from the terminal.
pub(crate) struct TerminalPrompter {
    progress_style: OutputStyle,
    assume_yes: bool,
    progress: Mutex<Option<DownloadProgress>>,
}

impl TerminalPrompter {
    pub(crate) fn new(progress_style: OutputStyle, assume_yes: bool) -> Self {
        Self {
            progress_style,
            assume_yes,
            progress: Mutex::new(None),
        }
    }

    pub(crate) fn finish_progress(&self) {
        if let Some(progress) = self.progress_slot().take() {
            progress.finish();
        }
    }

    fn progress_slot(&self) -> MutexGuard<'_, Option<DownloadProgress>> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Prompter for TerminalPrompter {
    fn ask_download(&self) -> DownloadDecision {
        if self.assume_yes {
            return DownloadDecision::DownloadOnce;
        }
        let answer = ask(
            "flatbuffers-language-server is not installed. Download it now?\n  \
             [a] download and keep it updated automatically\n  \
             [o] download once\n  \
             [c] cancel\n\
             choice [a/o/C]: ",
        );
        parse_download_choice(answer.as_deref())
    }

    fn ask_update(&self, current_version: &str, latest_version: &str) -> UpdateDecision {
        if self.assume_yes {
            return UpdateDecision::InstallOnce;
        }
        let answer = ask(&format!(
            "flatbuffers-language-server {latest_version} is available (installed: {current_version}).\n  \
             [i] install once\n  \
             [a] install and update automatically from now on\n  \
             [s] skip this version\n\
             choice [i/a/s]: "
        ));
        parse_update_choice(answer.as_deref())
    }

    fn offer_restart(&self, installed_version: &str) -> RestartDecision {
        eprintln!("restart the language server in your editor to switch to {installed_version}");
        RestartDecision::Later
    }

    fn download_progress(&self, version: &str, downloaded: u64, total: Option<u64>) {
        let mut slot = self.progress_slot();
        slot.get_or_insert_with(|| DownloadProgress::start(self.progress_style, version))
            .set(downloaded, total);
    }
}

/// Used when stdin belongs to the language-server stream: nothing is asked,
/// so downloads only happen when auto-download is already on.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct NonInteractivePrompter;

impl Prompter for NonInteractivePrompter {
    fn ask_download(&self) -> DownloadDecision {
        info!("no server binary available and auto-download is off; run `fbls resolve`");
        DownloadDecision::Cancel
    }

    fn ask_update(&self, current_version: &str, latest_version: &str) -> UpdateDecision {
        info!(current_version, latest_version, "newer server available; run `fbls update`");
        UpdateDecision::Dismissed
    }

    fn offer_restart(&self, _installed_version: &str) -> RestartDecision {
        RestartDecision::Later
    }
}

/// `None` when stdin is closed or unreadable.
fn ask(question: &str) -> Option<String> {
    let mut stderr = io::stderr().lock();
    let _ = stderr.write_all(question.as_bytes());
    let _ = stderr.flush();
    drop(stderr);

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line),
    }
}

pub(crate) fn parse_download_choice(answer: Option<&str>) -> DownloadDecision {
    match answer.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        Some("a") | Some("auto") => DownloadDecision::DownloadAndEnableAutoUpdate,
        Some("o") | Some("once") | Some("y") | Some("yes") => DownloadDecision::DownloadOnce,
        _ => DownloadDecision::Cancel,
    }
}

pub(crate) fn parse_update_choice(answer: Option<&str>) -> UpdateDecision {
    match answer.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
        Some("i") | Some("install") | Some("y") | Some("yes") => UpdateDecision::InstallOnce,
        Some("a") | Some("auto") => UpdateDecision::InstallAndEnableAutoUpdate,
        Some("s") | Some("skip") => UpdateDecision::Skip,
        _ => UpdateDecision::Dismissed,
    }
}
