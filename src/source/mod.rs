//! Source loading: import resolution and literate extraction.
//!
//! A compilation unit starts from one root file. `import X;` lines pull in
//! `X.orl`, or extract `X.tex` when no plain source exists; imports load
//! recursively, depth-first, each file at most once. The loader returns
//! the files in dependency order; the driver concatenates their text into
//! the buffer the scanner reads.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::diag::Fatal;

/// Extension of plain Oriel source.
pub const SOURCE_EXT: &str = "orl";

/// Extension of literate source.
pub const LITERATE_EXT: &str = "tex";

/// One loaded source file.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
}

/// Extract code from a literate envelope: the lines between
/// `\begin{code}` and `\end{code}` markers, in order.
pub fn extract_literate(text: &str) -> String {
    let mut out = String::new();
    let mut copying = false;
    for line in text.lines() {
        if copying {
            if line.starts_with("\\end{code}") {
                copying = false;
            } else {
                out.push_str(line);
                out.push('\n');
            }
        } else if line.starts_with("\\begin{code}") {
            copying = true;
        }
    }
    out
}

/// Scan a buffer for `import X;` clauses and return the imported roots.
/// Imports may list several names separated by commas.
pub fn imports_of(text: &str) -> Vec<String> {
    let mut roots = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed.strip_prefix("import") else {
            continue;
        };
        // Require a word boundary so `imported := 1` is not an import.
        if rest
            .chars()
            .next()
            .map_or(true, |c| c.is_alphanumeric() || c == '_')
        {
            continue;
        }
        for piece in rest.split(',') {
            let name = piece
                .trim()
                .trim_end_matches(';')
                .trim();
            if !name.is_empty() {
                roots.push(name.to_string());
            }
        }
    }
    roots
}

/// Load the root file and, recursively, everything it imports.
///
/// Returns files in scan order: imports precede the file that imports
/// them, matching the reference semantics of textual concatenation.
pub fn load_unit(root: &str, search_dir: &Path) -> Result<Vec<SourceFile>, Fatal> {
    let mut seen = FxHashSet::default();
    let mut files = Vec::new();
    load_root(root, search_dir, &mut seen, &mut files)?;
    Ok(files)
}

fn load_root(
    root: &str,
    search_dir: &Path,
    seen: &mut FxHashSet<String>,
    files: &mut Vec<SourceFile>,
) -> Result<(), Fatal> {
    if !seen.insert(root.to_string()) {
        return Ok(());
    }
    let plain = search_dir.join(format!("{root}.{SOURCE_EXT}"));
    let literate = search_dir.join(format!("{root}.{LITERATE_EXT}"));
    let (path, text) = if plain.is_file() {
        let text = std::fs::read_to_string(&plain)
            .map_err(|e| Fatal::Io(format!("failed to read '{}': {e}", plain.display())))?;
        (plain, text)
    } else if literate.is_file() {
        debug!(file = %literate.display(), "extracting literate source");
        let text = std::fs::read_to_string(&literate)
            .map_err(|e| Fatal::Io(format!("failed to read '{}': {e}", literate.display())))?;
        (literate, extract_literate(&text))
    } else {
        return Err(Fatal::Io(format!(
            "failed to open either '{}' or '{}'",
            plain.display(),
            literate.display()
        )));
    };
    for import in imports_of(&text) {
        load_root(&import, search_dir, seen, files)?;
    }
    files.push(SourceFile { path, text });
    Ok(())
}

/// Strip a known source extension from a command-line argument.
pub fn root_of(arg: &str) -> &str {
    arg.strip_suffix(".orl")
        .or_else(|| arg.strip_suffix(".tex"))
        .unwrap_or(arg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literate_extraction_keeps_only_code() {
        let text = "\
Intro prose.
\\begin{code}
P = [ a ]
\\end{code}
More prose.
\\begin{code}
Q = [ b ]
\\end{code}
";
        assert_eq!(extract_literate(text), "P = [ a ]\nQ = [ b ]\n");
    }

    #[test]
    fn imports_parse_comma_lists() {
        let text = "import util, net;\nimport extra ;\nimported := 1\n";
        assert_eq!(imports_of(text), vec!["util", "net", "extra"]);
    }

    #[test]
    fn root_of_strips_extensions() {
        assert_eq!(root_of("prog.orl"), "prog");
        assert_eq!(root_of("prog.tex"), "prog");
        assert_eq!(root_of("prog"), "prog");
    }

    #[test]
    fn load_unit_orders_imports_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.orl"), "L = [ a ]\n").unwrap();
        std::fs::write(dir.path().join("main.orl"), "import lib;\nM = [ b ]\n").unwrap();
        let files = load_unit("main", dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].path.ends_with("lib.orl"));
        assert!(files[1].path.ends_with("main.orl"));
    }
}
