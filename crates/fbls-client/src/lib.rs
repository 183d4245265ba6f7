mod acquire;
mod codec;
mod config;
mod prompt;
mod search_path;
mod session;
mod update;
mod watch;

pub use acquire::{AcquireOutcome, AcquireState, Acquirer, Acquisition, ResolvedServer, ServerSource};
pub use codec::{FrameReader, FrameWriter};
pub use config::ClientConfig;
pub use prompt::{DownloadDecision, Prompter, RestartDecision, UpdateDecision};
pub use search_path::{ExecutableLookup, SystemPathLookup};
pub use session::{
    start_client, stop_client, ClientHandle, LanguageSession, ProcessLauncher,
    ServerCommand, SessionLauncher,
};
pub use update::{UpdateCheck, UpdateCheckOutcome};
pub use watch::{HostFileChange, HostFileEvent, WatchedFilesForwarder};
