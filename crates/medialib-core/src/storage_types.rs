use std::fmt;
use std::str::FromStr;

/// Driver behind a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    S3,
    /// Process-local backend, for tests and single-process embedding.
    Memory,
}

impl StorageBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
            Self::Memory => "memory",
        }
    }
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Local, Self::S3, Self::Memory]
            .into_iter()
            .find(|driver| s.eq_ignore_ascii_case(driver.as_str()))
            .ok_or_else(|| anyhow::anyhow!("Unknown disk driver '{}'", s))
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
