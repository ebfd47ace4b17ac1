//! Content filtering for crawled files
//!
//! This module decides which files are worth fetching and which fetched
//! contents are worth returning:
//! - Path-prefix and extension filtering at enumeration time
//! - Oversize rejection before any fetch is issued
//! - Binary detection over the first 8 KiB of content
//! - UTF-8 validation of the full content

use crate::config::FilterConfig;
use crate::model::{FetchFailure, FetchTask};

/// How many leading bytes the binary heuristic inspects
const BINARY_CHECK_SIZE: usize = 8192;

/// Fraction of non-printable bytes above which content is considered binary
const BINARY_NON_PRINTABLE_RATIO: f64 = 0.30;

/// Extensionless filenames that are always allowed regardless of the
/// extension allow-list
const SPECIAL_FILENAMES: &[&str] = &[
    "dockerfile",
    "makefile",
    "rakefile",
    "gemfile",
    "guardfile",
    "capfile",
    "berksfile",
    "cheffile",
    "vagrantfile",
    "fastfile",
    "appfile",
    "deliverfile",
    "matchfile",
    "gymfile",
    "scanfile",
    "snapfile",
    "podfile",
    "cartfile",
    "brewfile",
    "requirements.txt",
    "setup.py",
    "setup.cfg",
    "pyproject.toml",
    "pipfile",
    "poetry.lock",
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "composer.json",
    "composer.lock",
    "go.mod",
    "go.sum",
    "cargo.toml",
    "cargo.lock",
    "build.gradle",
    "pom.xml",
    "build.sbt",
    "mix.exs",
    "deps.edn",
    "project.clj",
    "stack.yaml",
    "cabal.project",
];

/// Applies the configured content rules to candidate paths and fetched bytes
#[derive(Debug, Clone)]
pub struct ContentFilter {
    max_file_size: u64,
    /// Lowercased, dot-prefixed extensions; empty means everything passes
    allowed_extensions: Vec<String>,
    enable_binary_detection: bool,
}

impl ContentFilter {
    /// Creates a filter from configuration, normalizing the extension list
    /// to lowercase with a leading dot
    pub fn new(config: &FilterConfig) -> Self {
        let allowed_extensions = config
            .allowed_extensions
            .iter()
            .map(|ext| {
                let ext = ext.trim().to_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{}", ext)
                }
            })
            .collect();

        Self {
            max_file_size: config.max_file_size,
            allowed_extensions,
            enable_binary_detection: config.enable_binary_detection,
        }
    }

    /// Decides whether a path is a crawl candidate
    ///
    /// Path-prefix filters are applied conjunctively with the extension
    /// rule: when any prefixes are supplied the path must match at least one,
    /// and in all cases the extension rule must pass.
    pub fn should_enumerate(&self, path: &str, path_prefixes: &[String]) -> bool {
        if !path_prefixes.is_empty()
            && !path_prefixes.iter().any(|prefix| path.starts_with(prefix))
        {
            return false;
        }

        self.is_allowed_file_type(path)
    }

    /// Checks the extension allow-list, always admitting the special
    /// extensionless build/config filenames
    pub fn is_allowed_file_type(&self, path: &str) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }

        let filename = path
            .rsplit('/')
            .next()
            .unwrap_or(path)
            .to_lowercase();

        if SPECIAL_FILENAMES.contains(&filename.as_str()) {
            return true;
        }

        match filename.rfind('.') {
            // A leading dot (".gitignore") is a hidden name, not an extension
            Some(idx) if idx > 0 => {
                let ext = &filename[idx..];
                self.allowed_extensions.iter().any(|allowed| allowed == ext)
            }
            _ => false,
        }
    }

    /// Pre-fetch oversize check against the declared size
    ///
    /// Returns the failure to publish when the declared size exceeds the
    /// limit; a file of exactly the limit is accepted.
    pub fn check_size(&self, task: &FetchTask) -> Option<FetchFailure> {
        if task.size > self.max_file_size {
            Some(FetchFailure::Oversize {
                declared: task.size,
                limit: self.max_file_size,
            })
        } else {
            None
        }
    }

    /// Post-fetch content checks: binary heuristic, then UTF-8 validation
    ///
    /// Returns the decoded text on success.
    pub fn decode_text(&self, content: Vec<u8>) -> Result<String, FetchFailure> {
        if self.enable_binary_detection && is_binary_content(&content) {
            return Err(FetchFailure::BinarySkipped);
        }

        String::from_utf8(content).map_err(|_| FetchFailure::InvalidTextEncoding)
    }
}

/// Detects binary content by inspecting the first 8 KiB
///
/// Content is binary if any byte is 0x00, or if more than 30% of the sampled
/// bytes lie outside {0x09, 0x0A, 0x0D} and [0x20, 0x7E].
pub fn is_binary_content(content: &[u8]) -> bool {
    if content.is_empty() {
        return false;
    }

    let sample = &content[..content.len().min(BINARY_CHECK_SIZE)];

    if sample.contains(&0) {
        return true;
    }

    let non_printable = sample.iter().filter(|&&b| !is_printable(b)).count();

    non_printable as f64 / sample.len() as f64 > BINARY_NON_PRINTABLE_RATIO
}

fn is_printable(b: u8) -> bool {
    matches!(b, 0x09 | 0x0A | 0x0D) || (0x20..=0x7E).contains(&b)
}
