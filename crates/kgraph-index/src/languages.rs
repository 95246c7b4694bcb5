//! Language detection by file extension.

use serde::{Deserialize, Serialize};

/// Languages the extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    Java,
    CSharp,
    Cpp,
}

impl Lang {
    /// Identifier stored on File nodes.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::CSharp => "csharp",
            Self::Cpp => "cpp",
        }
    }

    /// Tree-sitter grammar, for languages extracted from a syntax tree.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            _ => None,
        }
    }

    /// Whether qualified names drop the file extension (dotted module paths).
    #[must_use]
    pub fn module_drops_extension(self) -> bool {
        matches!(self, Self::Python)
    }
}

/// Map a workspace-relative path to its language by extension.
#[must_use]
pub fn detect_language(path: &str) -> Option<Lang> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = file_name.rsplit_once('.')?;
    match ext {
        "py" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" => Some(Lang::TypeScript),
        "java" => Some(Lang::Java),
        "cs" => Some(Lang::CSharp),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" | "h" => Some(Lang::Cpp),
        _ => None,
    }
}
