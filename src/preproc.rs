//! Textual `.include` expansion.
//!
//! Flattens the entry file and everything it transitively includes into one
//! ordered line stream. Each resolved path may be included at most once per
//! compilation, and a file appearing twice on the active include stack is a
//! cycle; both are fatal.

use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use fxhash::FxHashSet;
use miette::Result;

use crate::error;
use crate::line::SrcLine;
use crate::parse::{peel_labels, strip_comment};

/// Flatten `entry` and all of its includes into a line stream with
/// provenance. The `.include` lines themselves are not emitted.
pub fn preprocess(entry: &Path) -> Result<Vec<SrcLine>> {
    let entry_canon = canonical_or_absolute(entry);
    let entry_dir = parent_dir(&entry_canon);
    let mut pp = Preprocessor {
        entry_dir,
        included: FxHashSet::default(),
        stack: Vec::new(),
        out: Vec::new(),
    };
    pp.expand_file(&entry_canon, None)?;
    Ok(pp.out)
}

struct Preprocessor {
    entry_dir: PathBuf,
    /// Canonical paths already included anywhere in the compilation.
    included: FxHashSet<String>,
    /// Canonical paths currently being expanded, entry first.
    stack: Vec<String>,
    out: Vec<SrcLine>,
}

impl Preprocessor {
    fn expand_file(&mut self, path: &Path, at: Option<&SrcLine>) -> Result<()> {
        let canon = canonical_or_absolute(path);
        let canon_s = canon.to_string_lossy().into_owned();

        let err_site = |sl: Option<&SrcLine>| match sl {
            Some(sl) => sl.clone(),
            None => SrcLine::synthetic(canon_s.clone()),
        };

        if self.stack.contains(&canon_s) {
            return Err(error::include_cycle(&self.stack, &canon_s, &err_site(at)));
        }
        if !self.included.insert(canon_s.clone()) {
            return Err(error::duplicate_include(&canon_s, &err_site(at)));
        }
        self.stack.push(canon_s.clone());

        let text = fs::read_to_string(&canon)
            .map_err(|e| error::read_failure(&canon_s, e, &err_site(at)))?;

        for (idx, raw) in text.lines().enumerate() {
            let sl = SrcLine {
                text: raw.to_string(),
                file: canon_s.clone(),
                line_no: (idx + 1) as u32,
                chain: self.stack.clone(),
            };

            let code = strip_comment(raw).trim();
            if code.is_empty() {
                self.out.push(sl);
                continue;
            }

            // A label prefix is allowed on an include line; it vanishes with
            // the directive.
            let (_labels, stmt) = peel_labels(code);
            if let Some(arg) = stmt.strip_prefix(".include") {
                let arg = arg.trim();
                if arg.len() < 2 || !arg.starts_with('"') || !arg.ends_with('"') {
                    return Err(error::bad_include_syntax(&sl));
                }
                let requested = &arg[1..arg.len() - 1];
                let resolved = self.resolve(&canon, requested, &sl)?;
                self.expand_file(&resolved, Some(&sl))?;
                continue;
            }

            self.out.push(sl);
        }

        self.stack.pop();
        Ok(())
    }

    /// Resolution order: absolute path as given, then relative to the
    /// including file's directory, then relative to the entry file's
    /// directory. First existing path wins.
    fn resolve(&self, including: &Path, requested: &str, sl: &SrcLine) -> Result<PathBuf> {
        let rel = Path::new(requested);
        if rel.is_absolute() {
            if rel.exists() {
                return Ok(canonical_or_absolute(rel));
            }
            return Err(error::include_not_found(
                requested,
                &[format!("{requested} (absolute)")],
                sl,
            ));
        }

        let in_including = parent_dir(including).join(rel);
        if in_including.exists() {
            return Ok(canonical_or_absolute(&in_including));
        }
        let in_entry = self.entry_dir.join(rel);
        if in_entry.exists() {
            return Ok(canonical_or_absolute(&in_entry));
        }

        Err(error::include_not_found(
            requested,
            &[
                format!("{} (including file dir)", in_including.display()),
                format!("{} (entry file dir)", in_entry.display()),
            ],
            sl,
        ))
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Best-effort canonicalization that also works for nonexistent paths, so
/// error messages and the include-once set get stable keys.
pub fn canonical_or_absolute(path: &Path) -> PathBuf {
    if let Ok(c) = path.canonicalize() {
        return c;
    }
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|d| d.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut out = PathBuf::new();
    for comp in abs.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
