//! `${section:key}` / `${key}` substitution.
//!
//! References are textual and resolved once at load time. `${key}` looks in
//! the referencing section, then in `DEFAULT`; `${section:key}` looks in the
//! named section, which must exist, then in `DEFAULT`. `$$` is a literal `$`. Referenced values
//! are themselves interpolated, up to [`MAX_DEPTH`] levels.

use nf_core::{Error, Result};

use crate::document::{ConfigDocument, DEFAULT_SECTION};

/// Maximum nesting of references.
pub const MAX_DEPTH: usize = 10;

impl ConfigDocument {
    /// Copy of the document with every value interpolated.
    pub fn interpolate(&self) -> Result<ConfigDocument> {
        self.map_values(|section, entry| {
            expand(self, section, &entry.value, 0).map_err(|e| with_origin(e, section, &entry.key))
        })
    }

    /// Interpolate `raw` as if it were a value in `section`.
    pub fn resolve_value(&self, section: &str, raw: &str) -> Result<String> {
        expand(self, section, raw, 0)
    }
}

fn with_origin(e: Error, section: &str, key: &str) -> Error {
    match e {
        Error::Reference(msg) => Error::Reference(format!("[{section}] {key}: {msg}")),
        other => other,
    }
}

fn expand(doc: &ConfigDocument, section: &str, text: &str, depth: usize) -> Result<String> {
    if depth > MAX_DEPTH {
        return Err(Error::Reference(format!(
            "references nested deeper than {MAX_DEPTH} levels (cycle?) while expanding {text:?}"
        )));
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        if let Some(r) = after.strip_prefix('$') {
            out.push('$');
            rest = r;
            continue;
        }
        let Some(inner) = after.strip_prefix('{') else {
            return Err(Error::Reference(format!(
                "'$' must be followed by '$' or '{{', found {:?}",
                after.chars().next().map(String::from).unwrap_or_default()
            )));
        };
        let Some(end) = inner.find('}') else {
            return Err(Error::Reference(format!("unterminated reference in {text:?}")));
        };
        let name = &inner[..end];
        let (target_section, key) = split_reference(section, name)?;
        if target_section != DEFAULT_SECTION && !doc.has_section(target_section) {
            return Err(Error::Reference(format!("no section [{target_section}] for ${{{name}}}")));
        }
        let entry = doc.lookup(target_section, key).ok_or_else(|| {
            Error::Reference(format!("no key '{key}' in section [{target_section}] for ${{{name}}}"))
        })?;
        out.push_str(&expand(doc, target_section, &entry.value, depth + 1)?);
        rest = &inner[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn split_reference<'a>(section: &'a str, name: &'a str) -> Result<(&'a str, &'a str)> {
    let parts: Vec<&str> = name.split(':').collect();
    match parts.as_slice() {
        [key] if !key.trim().is_empty() => Ok((section, key.trim())),
        [sec, key] if !sec.trim().is_empty() && !key.trim().is_empty() => {
            Ok((sec.trim(), key.trim()))
        }
        [sec, key] if sec.trim().is_empty() && !key.trim().is_empty() => {
            Ok((DEFAULT_SECTION, key.trim()))
        }
        _ => Err(Error::Reference(format!("malformed reference ${{{name}}}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn doc(text: &str) -> ConfigDocument {
        ConfigDocument::parse_str(text, "<test>").unwrap()
    }

    #[test]
    fn test_cross_section_and_local_refs() {
        let d = doc(
            "unit = units.degree\n[osc]\ntheta12 = 33.44 +/- 0.77 ${unit}\n\
             [osc.prob3]\nparam.theta12 = ${osc:theta12}\nlocal = ${param.theta12}\n",
        );
        let r = d.interpolate().unwrap();
        assert_eq!(r.get("osc.prob3", "param.theta12"), Some("33.44 +/- 0.77 units.degree"));
        assert_eq!(r.get("osc.prob3", "local"), Some("33.44 +/- 0.77 units.degree"));
    }

    #[test]
    fn test_dollar_escape() {
        let r = doc("[s]\ntex = $$\\theta_{23}$$\n").interpolate().unwrap();
        assert_eq!(r.get("s", "tex"), Some("$\\theta_{23}$"));
    }

    #[test]
    fn test_unresolved_reference() {
        let err = doc("[s]\nx = ${osc:theta99}\n").interpolate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("[s] x"), "{msg}");
        assert!(msg.contains("no section [osc]"), "{msg}");

        let err = doc("[osc]\na = 1\n[s]\nx = ${osc:b}\n").interpolate().unwrap_err();
        assert!(err.to_string().contains("no key 'b'"));
    }

    #[test]
    fn test_malformed_references() {
        assert!(doc("[s]\nx = $foo\n").interpolate().is_err());
        assert!(doc("[s]\nx = ${foo\n").interpolate().is_err());
        assert!(doc("[s]\nx = ${a:b:c}\n").interpolate().is_err());
        assert!(doc("[s]\nx = ${}\n").interpolate().is_err());
    }

    #[test]
    fn test_cycle_hits_depth_limit() {
        let err = doc("[s]\na = ${b}\nb = ${a}\n").interpolate().unwrap_err();
        assert!(err.to_string().contains("nested deeper"));
    }

    #[test]
    fn test_reference_into_defaults() {
        let r = doc("depth = 2 units.km\n[s]\nx = ${:depth}\n").interpolate().unwrap();
        assert_eq!(r.get("s", "x"), Some("2 units.km"));
    }

    #[test]
    fn test_unknown_section_does_not_fall_back_to_defaults() {
        let err = doc("depth = 2 units.km
[s]
x = ${typo:depth}
").interpolate().unwrap_err();
        assert!(matches!(err, Error::Reference(_)), "{err:?}");
        assert!(err.to_string().contains("no section [typo]"), "{err}");

        let r = doc("depth = 2 units.km
[osc]
a = 1
[s]
x = ${osc:depth}
").interpolate().unwrap();
        assert_eq!(r.get("s", "x"), Some("2 units.km"));
    }

    proptest! {
        #[test]
        fn prop_text_without_dollar_is_unchanged(s in "[^$\\n]{0,64}") {
            let d = ConfigDocument::default();
            prop_assert_eq!(d.resolve_value("s", &s).unwrap(), s);
        }
    }
}
