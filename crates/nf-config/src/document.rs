//! Line-based parser for nufit configuration text.
//!
//! The format is INI-like:
//!
//! ```text
//! #include settings/osc/nufit_v5.cfg as osc
//! #include settings/binning/example.cfg
//!
//! [pipeline]
//! order = data.simple_data_loader, osc.prob3,
//!     utils.hist
//!
//! [osc.prob3]
//! param.theta12 = ${osc:theta12}
//! ```
//!
//! Parsing keeps the raw (uninterpolated) strings together with where each
//! entry came from; see [`crate::interp`] for `${section:key}` resolution.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use nf_core::{Error, Result};
use serde::Serialize;

use crate::resources;

/// Name of the implicit section holding keys that appear before any header.
pub const DEFAULT_SECTION: &str = "DEFAULT";

const INCLUDE_DIRECTIVE: &str = "#include";

/// One `key = value` line (plus continuation lines).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    /// Key as written.
    pub key: String,
    /// Value text, continuation lines joined with `\n`.
    pub value: String,
    /// File path or label of the source text.
    pub source: String,
    /// 1-based line of the key.
    pub line: usize,
}

impl Entry {
    /// Directory of the file this entry was read from, if it came from a file.
    pub fn source_dir(&self) -> Option<&Path> {
        let p = Path::new(&self.source);
        if p.is_file() {
            p.parent()
        } else {
            None
        }
    }
}

/// A named section and its entries in file order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    /// Section name as written between brackets (or include alias).
    pub name: String,
    /// Entries in file order.
    pub entries: Vec<Entry>,
    /// Source the header was read from.
    pub source: String,
    /// 1-based line of the header or include directive.
    pub line: usize,
}

impl Section {
    fn new(name: &str, source: &str, line: usize) -> Self {
        Self { name: name.to_string(), entries: Vec::new(), source: source.to_string(), line }
    }

    /// Entry for `key`.
    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.key == key)
    }

    /// Value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entry(key).map(|e| e.value.as_str())
    }

    /// Keys in file order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.key.as_str())
    }

    fn push(&mut self, entry: Entry) -> Result<()> {
        if let Some(prev) = self.entry(&entry.key) {
            return Err(Error::parse(
                &entry.source,
                entry.line,
                format!(
                    "duplicate key '{}' in section [{}] (first defined at {}:{})",
                    entry.key, self.name, prev.source, prev.line
                ),
            ));
        }
        self.entries.push(entry);
        Ok(())
    }
}

/// A parsed configuration: defaults, sections in order, and the files read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigDocument {
    defaults: Section,
    sections: Vec<Section>,
    sources: Vec<PathBuf>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self { defaults: Section::new(DEFAULT_SECTION, "", 0), sections: Vec::new(), sources: Vec::new() }
    }
}

impl ConfigDocument {
    /// Parse configuration text. Relative includes are searched from the
    /// current directory and the resource path.
    pub fn parse_str(text: &str, source_name: &str) -> Result<Self> {
        Self::parse_str_with_base(text, source_name, None)
    }

    /// Parse configuration text, resolving relative includes against
    /// `base_dir` first.
    pub fn parse_str_with_base(
        text: &str,
        source_name: &str,
        base_dir: Option<&Path>,
    ) -> Result<Self> {
        let mut doc = Self::default();
        let mut loader = Loader::default();
        loader.load_text(&mut doc, text, source_name, base_dir, Target::Sections)?;
        Ok(doc)
    }

    /// Read and parse a configuration file (plus everything it includes).
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_file_into(path, Target::Sections)
    }

    /// Read a file without section headers as a single section `name`,
    /// the same way `#include <path> as <name>` does.
    pub fn from_file_as_section(path: &Path, name: &str) -> Result<Self> {
        Self::from_file_into(path, Target::Alias { name: name.to_string(), line: 0 })
    }

    fn from_file_into(path: &Path, target: Target) -> Result<Self> {
        let mut doc = Self::default();
        let mut loader = Loader::default();
        loader.load_file(&mut doc, path, target)?;
        Ok(doc)
    }

    /// Section by name. `DEFAULT` returns the defaults.
    pub fn section(&self, name: &str) -> Option<&Section> {
        if name == DEFAULT_SECTION {
            return Some(&self.defaults);
        }
        self.sections.iter().find(|s| s.name == name)
    }

    /// Sections in order of appearance (excluding defaults).
    pub fn sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter()
    }

    /// Section names in order of appearance (excluding defaults).
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Whether a section called `name` exists.
    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    /// Defaults section.
    pub fn defaults(&self) -> &Section {
        &self.defaults
    }

    /// Entry for `key` in `section`, falling back to the defaults.
    pub fn lookup(&self, section: &str, key: &str) -> Option<&Entry> {
        self.section(section).and_then(|s| s.entry(key)).or_else(|| self.defaults.entry(key))
    }

    /// Value for `key` in `section`, falling back to the defaults.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.lookup(section, key).map(|e| e.value.as_str())
    }

    /// Every file read while parsing, top-level file first.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub(crate) fn map_values<F>(&self, mut f: F) -> Result<ConfigDocument>
    where
        F: FnMut(&str, &Entry) -> Result<String>,
    {
        let map_section = |s: &Section, f: &mut F| -> Result<Section> {
            let mut out = Section { entries: Vec::with_capacity(s.entries.len()), ..s.clone() };
            for e in &s.entries {
                out.entries.push(Entry { value: f(&s.name, e)?, ..e.clone() });
            }
            Ok(out)
        };
        let defaults = map_section(&self.defaults, &mut f)?;
        let mut sections = Vec::with_capacity(self.sections.len());
        for s in &self.sections {
            sections.push(map_section(s, &mut f)?);
        }
        Ok(ConfigDocument { defaults, sections, sources: self.sources.clone() })
    }
}

#[derive(Debug, Clone)]
enum Target {
    /// Text may declare its own sections.
    Sections,
    /// Whole text goes into one new section; headers are not allowed.
    Alias { name: String, line: usize },
}

/// Where the most recent entry lives, for continuation lines.
#[derive(Debug, Clone, Copy)]
enum Cursor {
    Defaults,
    Section(usize),
}

#[derive(Default)]
struct Loader {
    /// Canonical paths of files currently being read (include chain).
    stack: Vec<PathBuf>,
    /// Canonical paths of every file read so far.
    seen: HashSet<PathBuf>,
}

impl Loader {
    fn load_file(&mut self, doc: &mut ConfigDocument, path: &Path, target: Target) -> Result<()> {
        let canonical = path.canonicalize().map_err(|e| {
            Error::Resource(format!("{}: {e}", path.display()))
        })?;
        if self.stack.contains(&canonical) {
            let chain: Vec<String> =
                self.stack.iter().map(|p| p.display().to_string()).collect();
            return Err(Error::parse(
                path.display().to_string(),
                0,
                format!("include cycle: {} -> {}", chain.join(" -> "), canonical.display()),
            ));
        }
        if !self.seen.insert(canonical.clone()) {
            return Err(Error::parse(
                path.display().to_string(),
                0,
                format!("file {} is included more than once", canonical.display()),
            ));
        }
        let text = std::fs::read_to_string(&canonical)?;
        tracing::debug!(path = %canonical.display(), "reading config file");
        doc.sources.push(canonical.clone());

        self.stack.push(canonical.clone());
        let base_dir = canonical.parent().map(Path::to_path_buf);
        let result = self.load_text(
            doc,
            &text,
            &canonical.display().to_string(),
            base_dir.as_deref(),
            target,
        );
        self.stack.pop();
        result
    }

    fn load_text(
        &mut self,
        doc: &mut ConfigDocument,
        text: &str,
        source: &str,
        base_dir: Option<&Path>,
        target: Target,
    ) -> Result<()> {
        let alias = match &target {
            Target::Alias { name, line } => {
                open_section(doc, name, source, *line)?;
                Some(name.clone())
            }
            Target::Sections => None,
        };
        let mut current = match &alias {
            Some(_) => Cursor::Section(doc.sections.len() - 1),
            None => Cursor::Defaults,
        };
        // Whether the previous line was an entry that can be continued.
        let mut continuable = false;

        for (i, raw_line) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = raw_line.trim_end();
            let trimmed = line.trim_start();

            if trimmed.is_empty() {
                continuable = false;
                continue;
            }

            if trimmed.starts_with(INCLUDE_DIRECTIVE) {
                let (spec, include_alias) = parse_include(trimmed, source, line_no)?;
                if alias.is_some() {
                    return Err(Error::parse(
                        source,
                        line_no,
                        "#include is not allowed inside a file included with 'as'",
                    ));
                }
                let path = resources::find_resource(&spec, base_dir).map_err(|e| {
                    Error::parse(source, line_no, format!("cannot include '{spec}': {e}"))
                })?;
                tracing::debug!(include = %spec, path = %path.display(), "resolved include");
                let child = match include_alias {
                    Some(name) => Target::Alias { name, line: line_no },
                    None => Target::Sections,
                };
                self.load_file(doc, &path, child)?;
                // Resume in the section this file was in before the include.
                continuable = false;
                continue;
            }

            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }

            let indented = line.len() != trimmed.len();
            if indented && continuable {
                let entry = last_entry_mut(doc, current);
                if let Some(entry) = entry {
                    entry.value.push('\n');
                    entry.value.push_str(trimmed);
                    continue;
                }
            }

            if trimmed.starts_with('[') {
                if alias.is_some() {
                    return Err(Error::parse(
                        source,
                        line_no,
                        "section headers are not allowed in a file included with 'as'",
                    ));
                }
                let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) else {
                    return Err(Error::parse(source, line_no, format!("malformed section header {trimmed:?}")));
                };
                let name = name.trim();
                if name.is_empty() {
                    return Err(Error::parse(source, line_no, "empty section name"));
                }
                current = if name == DEFAULT_SECTION {
                    Cursor::Defaults
                } else {
                    open_section(doc, name, source, line_no)?;
                    Cursor::Section(doc.sections.len() - 1)
                };
                continuable = false;
                continue;
            }

            let Some(idx) = trimmed.find(|c: char| c == '=' || c == ':') else {
                return Err(Error::parse(source, line_no, format!("expected 'key = value', got {trimmed:?}")));
            };
            let key = trimmed[..idx].trim();
            let value = trimmed[idx + 1..].trim();
            if key.is_empty() {
                return Err(Error::parse(source, line_no, "empty key"));
            }
            let entry = Entry {
                key: key.to_string(),
                value: value.to_string(),
                source: source.to_string(),
                line: line_no,
            };
            match current {
                Cursor::Defaults => doc.defaults.push(entry)?,
                Cursor::Section(i) => doc.sections[i].push(entry)?,
            }
            continuable = true;
        }
        Ok(())
    }
}

fn open_section(doc: &mut ConfigDocument, name: &str, source: &str, line: usize) -> Result<()> {
    if let Some(prev) = doc.sections.iter().find(|s| s.name == name) {
        return Err(Error::parse(
            source,
            line,
            format!("duplicate section [{name}] (first defined at {}:{})", prev.source, prev.line),
        ));
    }
    doc.sections.push(Section::new(name, source, line));
    Ok(())
}

fn last_entry_mut(doc: &mut ConfigDocument, cursor: Cursor) -> Option<&mut Entry> {
    match cursor {
        Cursor::Defaults => doc.defaults.entries.last_mut(),
        Cursor::Section(i) => doc.sections.get_mut(i).and_then(|s| s.entries.last_mut()),
    }
}

/// `#include <path>` or `#include <path> as <alias>`.
fn parse_include(line: &str, source: &str, line_no: usize) -> Result<(String, Option<String>)> {
    let rest = &line[INCLUDE_DIRECTIVE.len()..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return Err(Error::parse(source, line_no, format!("malformed include directive {line:?}")));
    }
    let parts: Vec<&str> = rest.split_whitespace().collect();
    match parts.as_slice() {
        [path] => Ok(((*path).to_string(), None)),
        [path, "as", alias] => Ok(((*path).to_string(), Some((*alias).to_string()))),
        _ => Err(Error::parse(
            source,
            line_no,
            format!("expected '#include <path> [as <section>]', got {line:?}"),
        )),
    }
}
