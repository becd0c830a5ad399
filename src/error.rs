//! Error types of the runtime.

use thiserror::Error;

/// Fatal errors reported before a cart starts running.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cart is {size} bytes, larger than the {limit} byte limit")]
    CartTooLarge { size: usize, limit: usize },
    #[error("failed to set up the wasm engine: {0}")]
    Engine(String),
}

/// Errors decoding or applying a [`State`](crate::state::State).
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state snapshot is truncated, expected at least {expected} bytes but got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("state snapshot has {0} trailing bytes")]
    TrailingBytes(usize),
    #[error("memory snapshot must be {expected} bytes, got {actual}")]
    MemorySize { expected: usize, actual: usize },
    #[error("disk snapshot of {0} bytes exceeds the storage size")]
    DiskSize(usize),
    #[error("invalid globals: {0}")]
    Globals(#[from] serde_json::Error),
    #[error("the cart has no global named {0:?}")]
    UnknownGlobal(String),
    #[error("cannot restore global {name:?} from {value:?}")]
    BadGlobalValue { name: String, value: String },
    #[error("no cart is running")]
    NotRunning,
}

/// Errors rewriting a module binary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("not a wasm module")]
    BadMagic,
    #[error("unsupported wasm binary version {0}")]
    UnsupportedVersion(u32),
    #[error("unexpected end of module at offset {0}")]
    UnexpectedEof(usize),
    #[error("malformed LEB128 integer at offset {0}")]
    MalformedLeb128(usize),
    #[error("section {id} at offset {offset} is malformed")]
    MalformedSection { id: u8, offset: usize },
}

/// Errors of a netplay session.
#[derive(Debug, Error)]
pub enum NetplayError {
    #[error("malformed netplay message: {0}")]
    Wire(#[from] bincode::Error),
    #[error("unknown player {0}")]
    UnknownPlayer(usize),
    #[error("all player slots are taken")]
    SessionFull,
    #[error("session has not started yet")]
    NotStarted,
    #[error("invalid start state: {0}")]
    State(#[from] StateError),
}

pub(crate) const CRASH_TITLE: &str = "NETCART ERROR";

/// Why a cart stopped running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrashReason {
    Unreachable,
    OutOfBounds,
    MissingImport,
    Corrupt,
    MissingExport(String),
    Other,
}

impl CrashReason {
    /// Categorize an engine error message.
    ///
    /// `compiling` marks errors raised while the module was decoded and
    /// validated.
    pub fn classify(message: &str, compiling: bool) -> Self {
        if compiling {
            CrashReason::Corrupt
        } else if message.contains("unreachable") {
            CrashReason::Unreachable
        } else if message.contains("out of bounds") {
            CrashReason::OutOfBounds
        } else if message.contains("import") || message.contains("definition") {
            CrashReason::MissingImport
        } else {
            CrashReason::Other
        }
    }

    /// The text shown on the crash screen, wrapped to fit.
    pub fn screen_message(&self) -> String {
        match self {
            CrashReason::Unreachable => {
                "The cartridge has\nreached a code \nsegment marked as\nunreachable.\n\n\n\n\nHit R to reboot."
                    .to_string()
            }
            CrashReason::OutOfBounds => {
                "The cartridge has\nattempted a memory\naccess that is\nout of bounds.\n\n\n\n\nHit R to reboot."
                    .to_string()
            }
            CrashReason::MissingImport => {
                "The cartridge has\ntried to import\na missing function.\n\n\n\nSee console for\nmore details."
                    .to_string()
            }
            CrashReason::Corrupt => {
                "The cartridge is\ncorrupted.\n\n\n\nSee console for\nmore details.".to_string()
            }
            CrashReason::MissingExport(name) => {
                let article = match name.chars().next() {
                    Some('a' | 'e' | 'i' | 'o' | 'u') => "an",
                    _ => "a",
                };
                format!("The cartridge does\nnot export {article}\n\"{name}\" function.")
            }
            CrashReason::Other => {
                "Unknown error.\n\n\n\nSee console for\nmore details.".to_string()
            }
        }
    }
}

impl std::fmt::Display for CrashReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.screen_message().replace('\n', " "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_engine_messages() {
        assert_eq!(
            CrashReason::Unreachable,
            CrashReason::classify("wasm `unreachable` instruction executed", false)
        );
        assert_eq!(
            CrashReason::OutOfBounds,
            CrashReason::classify("out of bounds memory access", false)
        );
        assert_eq!(
            CrashReason::MissingImport,
            CrashReason::classify("cannot find definition for import env::foo", false)
        );
        assert_eq!(CrashReason::Corrupt, CrashReason::classify("anything", true));
        assert_eq!(CrashReason::Other, CrashReason::classify("stack overflow", false));
    }

    #[test]
    fn missing_export_message() {
        assert_eq!(
            "The cartridge does\nnot export an\n\"update\" function.",
            CrashReason::MissingExport("update".into()).screen_message()
        );
        assert_eq!(
            "The cartridge does\nnot export a\n\"start\" function.",
            CrashReason::MissingExport("start".into()).screen_message()
        );
    }

    #[test]
    fn messages_fit_on_screen() {
        for reason in [
            CrashReason::Unreachable,
            CrashReason::OutOfBounds,
            CrashReason::MissingImport,
            CrashReason::Corrupt,
            CrashReason::MissingExport("update".into()),
            CrashReason::Other,
        ] {
            for line in reason.screen_message().lines() {
                // glyphs keep their rightmost column blank, so 19 fit from x = 9
                assert!(line.len() <= 19, "{line:?}");
            }
        }
    }
}
