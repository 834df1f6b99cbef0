use serde::{Deserialize, Serialize};

/// Operating mode of a subject, or of the registry as a whole.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// Normal operation: reads and system-assigned writes.
    Readwrite,
    /// Reads only.
    Readonly,
    /// Reads only, applied globally and overriding subject modes.
    ReadonlyOverride,
    /// Migration mode: callers choose ids and versions, compatibility
    /// checking is skipped.
    Import,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Readwrite
    }
}

impl Mode {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Mode::Readonly | Mode::ReadonlyOverride)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Readwrite => "READWRITE",
            Mode::Readonly => "READONLY",
            Mode::ReadonlyOverride => "READONLY_OVERRIDE",
            Mode::Import => "IMPORT",
        };
        f.write_str(s)
    }
}
