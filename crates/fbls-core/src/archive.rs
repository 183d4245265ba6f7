#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArchiveType {
    Zip,
    TarGz,
}

impl ArchiveType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }

    pub fn infer_from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let without_fragment = lower.split('#').next().unwrap_or(&lower);
        let without_query = without_fragment
            .split('?')
            .next()
            .unwrap_or(without_fragment);

        if without_query.ends_with(".zip") {
            return Some(Self::Zip);
        }
        if without_query.ends_with(".tar.gz") || without_query.ends_with(".tgz") {
            return Some(Self::TarGz);
        }
        None
    }
}
