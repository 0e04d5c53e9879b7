//! Locating configuration and data files.
//!
//! A resource spec is tried, in order:
//! 1. relative to the including file's directory (relative specs only),
//! 2. as given (absolute, or relative to the current directory),
//! 3. under each root listed in `NUFIT_RESOURCES` (colon separated), looking
//!    in `data/`, `scripts/` and `settings/` before the root itself.
//!
//! `~` and `$VAR` / `${VAR}` are expanded in the spec and in every root.
//! The first match wins.

use std::path::{Path, PathBuf};

use nf_core::{Error, Result};

/// Environment variable listing resource roots.
pub const RESOURCES_ENV: &str = "NUFIT_RESOURCES";

/// Sub-directories of a resource root searched before the root itself.
pub const RESOURCES_SUBDIRS: [&str; 3] = ["data", "scripts", "settings"];

/// Find `spec` as given or under `NUFIT_RESOURCES`.
pub fn find_path(spec: &str) -> Result<PathBuf> {
    let roots = std::env::var(RESOURCES_ENV).ok();
    find_in(spec, None, roots.as_deref())
}

/// Find `spec`, trying `base_dir` first for relative specs.
pub fn find_resource(spec: &str, base_dir: Option<&Path>) -> Result<PathBuf> {
    let roots = std::env::var(RESOURCES_ENV).ok();
    find_in(spec, base_dir, roots.as_deref())
}

/// Search with an explicit resource-root list instead of the environment.
pub fn find_in(spec: &str, base_dir: Option<&Path>, roots: Option<&str>) -> Result<PathBuf> {
    tracing::trace!(resource = spec, "searching for resource");
    let expanded = expand_path(spec);

    if expanded.is_relative() {
        if let Some(base) = base_dir {
            let candidate = base.join(&expanded);
            if candidate.exists() {
                tracing::debug!(resource = spec, path = %candidate.display(), "found next to including file");
                return Ok(candidate);
            }
        }
    }

    if expanded.exists() {
        tracing::debug!(resource = spec, path = %expanded.display(), "found as given");
        return Ok(expanded);
    }

    if let Some(roots) = roots {
        tracing::trace!(roots, "searching resource roots");
        for root in roots.split(':').filter(|r| !r.is_empty()) {
            let root = expand_path(root);
            let candidates = RESOURCES_SUBDIRS
                .iter()
                .map(|sub| root.join(sub).join(&expanded))
                .chain(std::iter::once(root.join(&expanded)));
            for candidate in candidates {
                if candidate.exists() {
                    tracing::debug!(resource = spec, path = %candidate.display(), "found under resource root");
                    return Ok(candidate);
                }
            }
        }
    }

    Err(Error::Resource(format!("could not find path \"{spec}\"")))
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references. Unknown variables
/// are left as written.
pub fn expand_path(spec: &str) -> PathBuf {
    PathBuf::from(expand_vars(&expand_user(spec)))
}

fn expand_user(spec: &str) -> String {
    if spec == "~" || spec.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return format!("{home}{}", &spec[1..]);
        }
    }
    spec.to_string()
}

fn expand_vars(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, consumed) = if let Some(inner) = after.strip_prefix('{') {
            match inner.find('}') {
                Some(end) => (&inner[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };
        match std::env::var(name) {
            Ok(v) if !name.is_empty() => {
                out.push_str(&v);
                rest = &after[consumed..];
            }
            _ => {
                out.push('$');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::tmp_dir;

    #[test]
    fn test_subdirs_searched_before_root() {
        let root = tmp_dir("resources");
        std::fs::create_dir_all(root.join("settings/osc")).unwrap();
        std::fs::create_dir_all(root.join("osc")).unwrap();
        std::fs::write(root.join("settings/osc/nufit.cfg"), "a = 1\n").unwrap();
        std::fs::write(root.join("osc/nufit.cfg"), "a = 2\n").unwrap();

        let roots = format!("::{}", root.display());
        let found = find_in("osc/nufit.cfg", None, Some(&roots)).unwrap();
        assert_eq!(found, root.join("settings/osc/nufit.cfg"));

        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_base_dir_first() {
        let base = tmp_dir("resources_base");
        std::fs::write(base.join("local.cfg"), "").unwrap();
        let found = find_in("local.cfg", Some(&base), None).unwrap();
        assert_eq!(found, base.join("local.cfg"));
        let _ = std::fs::remove_dir_all(&base);
    }

    #[test]
    fn test_not_found() {
        let err = find_in("no/such/file.cfg", None, Some("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::Resource(_)));
    }

    #[test]
    fn test_expand_vars() {
        // PATH is set in every test environment.
        let path = std::env::var("PATH").unwrap();
        assert_eq!(expand_vars("$PATH/x"), format!("{path}/x"));
        assert_eq!(expand_vars("${PATH}x"), format!("{path}x"));
        assert_eq!(expand_vars("$NUFIT_SURELY_UNSET_VAR/x"), "$NUFIT_SURELY_UNSET_VAR/x");
        assert_eq!(expand_vars("a$"), "a$");
        assert_eq!(expand_vars("no vars"), "no vars");
    }
}
