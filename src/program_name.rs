//! Program name detection for argv[0] support
//!
//! Returns the binary name as invoked so that help text and remediation
//! hints (`av continue`, `av abort`, ...) match what the user actually typed,
//! including symlinked names.

#[cfg(not(test))]
use std::sync::OnceLock;

#[cfg(not(test))]
static PROGRAM_NAME: OnceLock<String> = OnceLock::new();

/// Get the program name as invoked (respects symlinks)
///
/// Returns the basename of argv[0], falling back to "av" if unavailable.
/// The value is memoized on first call. In test mode, always returns "av".
pub fn program_name() -> &'static str {
    #[cfg(test)]
    {
        "av"
    }

    #[cfg(not(test))]
    {
        PROGRAM_NAME.get_or_init(|| {
            std::env::args()
                .next()
                .and_then(|s| {
                    std::path::Path::new(&s)
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(String::from)
                })
                .unwrap_or_else(|| "av".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_name_returns_av_in_tests() {
        assert_eq!(program_name(), "av");
    }
}
