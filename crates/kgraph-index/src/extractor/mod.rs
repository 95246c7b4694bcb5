//! Structural entity extraction: one source file in, one [`FileRecord`] out.
//!
//! Extraction is a pure function of path and content. Files in a language the
//! extractor does not know, and files that fail to parse, yield a record with no
//! entities rather than an error.

mod pattern;
mod python;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::languages::{Lang, detect_language};

/// Structural record of one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub language: Option<Lang>,
    pub imports: BTreeSet<String>,
    pub classes: Vec<ClassRecord>,
    /// Top-level functions. Methods live on their class.
    pub functions: Vec<FunctionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    pub name: String,
    pub qualname: String,
    pub line_start: usize,
    pub line_end: usize,
    pub docstring: String,
    pub source: String,
    pub methods: Vec<FunctionRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    pub name: String,
    pub qualname: String,
    pub class_name: Option<String>,
    pub line_start: usize,
    pub line_end: usize,
    pub docstring: String,
    pub source: String,
    pub calls: BTreeSet<String>,
}

impl FileRecord {
    #[must_use]
    pub fn empty(path: &str, language: Option<Lang>) -> Self {
        Self {
            path: path.to_string(),
            language,
            imports: BTreeSet::new(),
            classes: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Top-level functions followed by every method.
    pub fn all_functions(&self) -> impl Iterator<Item = &FunctionRecord> {
        self.functions
            .iter()
            .chain(self.classes.iter().flat_map(|c| c.methods.iter()))
    }

    /// Pseudo-functions standing in for classes when the file has no functions at all,
    /// so that class-only files stay reachable through function vector search.
    #[must_use]
    pub fn class_shims(&self) -> Vec<FunctionRecord> {
        if self.classes.is_empty() || self.all_functions().next().is_some() {
            return Vec::new();
        }
        self.classes.iter().map(FunctionRecord::class_shim).collect()
    }

    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.classes.len() + self.all_functions().count()
    }
}

impl ClassRecord {
    /// Text fed to the embedding backend.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        format!(
            "# Class: {}\n\n{}\n\n{}",
            self.qualname, self.docstring, self.source
        )
    }
}

impl FunctionRecord {
    /// Text fed to the embedding backend.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        format!(
            "# Function: {}\n\n{}\n\ndef {}(...)\n\n{}",
            self.qualname, self.docstring, self.name, self.source
        )
    }

    #[must_use]
    pub fn class_shim(class: &ClassRecord) -> Self {
        Self {
            name: class.name.clone(),
            qualname: format!("{}.__class__", class.qualname),
            class_name: None,
            line_start: class.line_start,
            line_end: class.line_end,
            docstring: class.docstring.clone(),
            source: class.source.clone(),
            calls: BTreeSet::new(),
        }
    }
}

/// Dotted module path used as the qualname prefix for entities of `path`.
///
/// Separators become dots; Python modules drop their `.py` suffix so that
/// `pkg/mod.py` maps to `pkg.mod`, other languages keep the file name intact.
#[must_use]
pub fn module_path(path: &str, lang: Option<Lang>) -> String {
    let stem = match lang {
        Some(l) if l.module_drops_extension() => path
            .rsplit_once('.')
            .filter(|(_, ext)| !ext.contains('/'))
            .map_or(path, |(stem, _)| stem),
        _ => path,
    };
    stem.replace('/', ".")
}

/// One file handed to a strategy, with its qualname prefix precomputed.
pub(crate) struct SourceUnit<'a> {
    pub path: &'a str,
    pub content: &'a str,
    pub lang: Lang,
    pub module: String,
}

impl SourceUnit<'_> {
    pub fn qualname(&self, scope: &[&str]) -> String {
        let mut q = self.module.clone();
        for part in scope {
            q.push('.');
            q.push_str(part);
        }
        q
    }

    pub fn empty_record(&self) -> FileRecord {
        FileRecord::empty(self.path, Some(self.lang))
    }
}

/// Capability shared by all extraction strategies.
pub(crate) trait Strategy {
    fn extract(&self, unit: &SourceUnit<'_>) -> FileRecord;
}

/// Extract the structural record of one file.
///
/// `path` is the workspace-relative path; backslashes are normalized to `/`.
#[must_use]
pub fn extract(path: &str, content: &str) -> FileRecord {
    let path = path.replace('\\', "/");
    let Some(lang) = detect_language(&path) else {
        return FileRecord::empty(&path, None);
    };

    let unit = SourceUnit {
        path: &path,
        content,
        lang,
        module: module_path(&path, Some(lang)),
    };

    let record = match lang {
        Lang::Python => python::PythonStrategy.extract(&unit),
        other => pattern::PatternStrategy::for_lang(other).extract(&unit),
    };

    tracing::debug!(
        path = %record.path,
        language = lang.id(),
        classes = record.classes.len(),
        functions = record.functions.len(),
        imports = record.imports.len(),
        "extracted"
    );
    record
}

/// 1-based line number of a byte offset.
pub(crate) fn line_of(content: &str, offset: usize) -> usize {
    content[..offset.min(content.len())]
        .bytes()
        .filter(|b| *b == b'\n')
        .count()
        + 1
}
