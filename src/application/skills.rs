//! Skill definitions offered to workers as extra prompt context.
//!
//! A skill is either a `*.md` / `*.txt` file, named after its stem, or a
//! directory holding `SKILL.md`, `skill.md` or `README.md`, named after the
//! directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::domain::models::truncate_chars;

const SKILL_FILES: &[&str] = &["SKILL.md", "skill.md", "README.md"];
const SKILL_CHARS: usize = 1000;

/// `~/.claude/skills`, when a home directory is known.
pub fn default_skills_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude").join("skills"))
}

/// Read every skill under `dir`. A missing directory yields no skills;
/// unreadable entries are skipped with a warning.
pub fn load_skills(dir: &Path) -> BTreeMap<String, String> {
    let mut skills = BTreeMap::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return skills;
    };

    for path in entries.filter_map(|e| e.ok().map(|e| e.path())) {
        let (name, file) = if path.is_dir() {
            let Some(file) = SKILL_FILES.iter().map(|f| path.join(f)).find(|f| f.is_file())
            else {
                continue;
            };
            (path.file_name(), file)
        } else if path
            .extension()
            .is_some_and(|ext| ext == "md" || ext == "txt")
        {
            (path.file_stem(), path.clone())
        } else {
            continue;
        };
        let Some(name) = name.map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };

        match fs::read_to_string(&file) {
            Ok(content) => {
                debug!(skill = %name, "loaded skill");
                skills.insert(name, content.trim().to_string());
            }
            Err(e) => warn!(skill = %name, error = %e, "failed to read skill"),
        }
    }
    skills
}

/// Render skills as a prompt section, or an empty string when there are none.
pub fn format_skills(skills: &BTreeMap<String, String>) -> String {
    if skills.is_empty() {
        return String::new();
    }
    let mut out = String::from("Available skills and patterns:\n");
    for (name, content) in skills {
        let body = if content.chars().count() > SKILL_CHARS {
            format!("{}\n... (truncated)", truncate_chars(content, SKILL_CHARS))
        } else {
            content.clone()
        };
        out.push_str(&format!("\n### /{name}\n{body}\n"));
    }
    out
}
