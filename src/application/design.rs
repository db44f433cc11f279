//! Locating and reading the design a fresh run starts from.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

/// Files tried, in order, when no design is given on the command line.
const DEFAULT_CANDIDATES: &[&str] = &["SPEC.md", "spec.md"];
const SPECS_DIR: &str = "specs";

/// The goal text of a run and where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignSource {
    /// Comma-separated file list, or `<inline>`
    pub label: String,
    pub goal_text: String,
}

impl DesignSource {
    /// Resolve the design from command-line arguments, relative to `root`.
    ///
    /// - one existing file: that file
    /// - one directory: every `*.md` inside it, sorted
    /// - several existing files: all of them, in order
    /// - anything else: the arguments joined as inline goal text
    /// - no arguments: `SPEC.md` / `spec.md`, then `specs/*.md`
    pub fn discover(root: &Path, args: &[String]) -> Result<Self> {
        let files = match args {
            [] => default_files(root)?,
            [single] => {
                let path = root.join(single);
                if path.is_file() {
                    vec![path]
                } else if path.is_dir() {
                    markdown_in(&path)?
                } else {
                    Vec::new()
                }
            }
            many => {
                let paths: Vec<PathBuf> = many.iter().map(|a| root.join(a)).collect();
                if paths.iter().all(|p| p.is_file()) {
                    paths
                } else {
                    Vec::new()
                }
            }
        };

        if files.is_empty() {
            if args.is_empty() {
                bail!("no design found (try SPEC.md, specs/*.md, or pass a file)");
            }
            return Ok(Self {
                label: "<inline>".to_string(),
                goal_text: args.join(" "),
            });
        }

        let mut parts = Vec::with_capacity(files.len());
        for file in &files {
            let text = std::fs::read_to_string(file)
                .with_context(|| format!("cannot read design {}", file.display()))?;
            parts.push(text);
        }
        let goal_text = parts.join("\n\n").trim().to_string();
        if goal_text.is_empty() {
            bail!("design files are empty");
        }
        let label = files
            .iter()
            .map(|f| f.strip_prefix(root).unwrap_or(f).display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Ok(Self { label, goal_text })
    }

    /// Content hash of the goal text, used to notice design edits.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.goal_text)
    }
}

pub fn fingerprint(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn default_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found: Vec<PathBuf> = DEFAULT_CANDIDATES
        .iter()
        .map(|c| root.join(c))
        .filter(|p| p.is_file())
        .collect();
    // Case-insensitive filesystems report both candidates for one file.
    found.dedup_by(|a, b| {
        match (a.canonicalize(), b.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    });
    let specs = root.join(SPECS_DIR);
    if specs.is_dir() {
        found.extend(markdown_in(&specs)?);
    }
    Ok(found)
}

fn markdown_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("cannot list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md"))
        .collect();
    files.sort();
    Ok(files)
}
