use crate::archive::ArchiveType;
use crate::error::AcquireError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Aarch64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
    MacOs,
    Linux,
    Windows,
}

/// One of the (OS, architecture) pairs that releases publish an asset for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetPlatform {
    pub arch: Arch,
    pub os: OsFamily,
}

impl Arch {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
        }
    }
}

impl OsFamily {
    pub fn triple_suffix(self) -> &'static str {
        match self {
            Self::MacOs => "apple-darwin",
            Self::Linux => "unknown-linux-gnu",
            Self::Windows => "pc-windows-msvc",
        }
    }
}

impl TargetPlatform {
    pub const SUPPORTED: [TargetPlatform; 6] = [
        TargetPlatform::new(Arch::X86_64, OsFamily::MacOs),
        TargetPlatform::new(Arch::Aarch64, OsFamily::MacOs),
        TargetPlatform::new(Arch::X86_64, OsFamily::Linux),
        TargetPlatform::new(Arch::Aarch64, OsFamily::Linux),
        TargetPlatform::new(Arch::X86_64, OsFamily::Windows),
        TargetPlatform::new(Arch::Aarch64, OsFamily::Windows),
    ];

    pub const fn new(arch: Arch, os: OsFamily) -> Self {
        Self { arch, os }
    }

    /// Accepts the spelling used by `std::env::consts::{OS, ARCH}`.
    pub fn from_os_arch(os: &str, arch: &str) -> Option<Self> {
        let arch = match arch {
            "x86_64" => Arch::X86_64,
            "aarch64" => Arch::Aarch64,
            _ => return None,
        };
        let os = match os {
            "macos" => OsFamily::MacOs,
            "linux" => OsFamily::Linux,
            "windows" => OsFamily::Windows,
            _ => return None,
        };
        Some(Self { arch, os })
    }

    pub fn triple(self) -> String {
        format!("{}-{}", self.arch.as_str(), self.os.triple_suffix())
    }

    pub fn archive_type(self) -> ArchiveType {
        match self.os {
            OsFamily::Windows => ArchiveType::Zip,
            OsFamily::MacOs | OsFamily::Linux => ArchiveType::TarGz,
        }
    }

    pub fn executable_name(self, binary: &str) -> String {
        match self.os {
            OsFamily::Windows => format!("{binary}.exe"),
            OsFamily::MacOs | OsFamily::Linux => binary.to_string(),
        }
    }

    pub fn asset_name(self, binary: &str, version: &str) -> String {
        format!(
            "{binary}-{version}-{}.{}",
            self.triple(),
            self.archive_type().as_str()
        )
    }
}

/// Maps an (OS, architecture) pair to the release asset it must download.
///
/// Pairs outside [`TargetPlatform::SUPPORTED`] are rejected rather than
/// guessed.
pub fn select_asset_name(
    os: &str,
    arch: &str,
    binary: &str,
    version: &str,
) -> Result<String, AcquireError> {
    TargetPlatform::from_os_arch(os, arch)
        .map(|platform| platform.asset_name(binary, version))
        .ok_or_else(|| AcquireError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        })
}
