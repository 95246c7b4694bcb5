//! Line-anchored pattern strategy for languages without a bundled grammar.
//!
//! Approximate by construction: braces and call-shaped text inside string
//! literals or comments are taken at face value, and a declaration is only
//! recognized when its opening brace is reached by the pattern.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::{ClassRecord, FileRecord, FunctionRecord, SourceUnit, Strategy, line_of};
use crate::languages::Lang;

static JS_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*(?:import|export)\s+(?:[^'";]*?\s+from\s+)?['"](?P<spec>[^'"\n]+)['"]"#)
        .expect("js import regex is valid")
});
static JS_REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\brequire\s*\(\s*['"](?P<spec>[^'"\n]+)['"]\s*\)"#)
        .expect("js require regex is valid")
});
static JAVA_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*import\s+(?:static\s+)?(?P<spec>[A-Za-z_][\w.]*)")
        .expect("java import regex is valid")
});
static CS_USING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:global\s+)?using\s+(?:static\s+)?(?:\w+\s*=\s*)?(?P<spec>[A-Za-z_][\w.]*)\s*;")
        .expect("csharp using regex is valid")
});
static CPP_INCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^[ \t]*#[ \t]*include[ \t]*[<"](?P<spec>[^>"\n]+)[>"]"#)
        .expect("cpp include regex is valid")
});

static JS_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+(?P<name>[A-Za-z_$][\w$]*)[^{;]*\{")
        .expect("js class regex is valid")
});
static JAVA_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:(?:public|private|protected|static|abstract|final|sealed|non-sealed|strictfp)\s+)*(?:class|interface|enum|record)\s+(?P<name>[A-Za-z_]\w*)[^{;]*\{",
    )
    .expect("java class regex is valid")
});
static CS_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:\[[^\]\n]*\]\s*)*(?:(?:public|private|protected|internal|static|abstract|sealed|partial|readonly|unsafe|new)\s+)*(?:class|interface|struct|record|enum)\s+(?P<name>[A-Za-z_]\w*)[^{;]*\{",
    )
    .expect("csharp class regex is valid")
});
static CPP_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:template\s*<[^;{]*>\s*)?(?:class|struct)\s+(?:[A-Z_][A-Z0-9_]*\s+)?(?P<name>[A-Za-z_]\w*)[^{;()]*\{")
        .expect("cpp class regex is valid")
});

static JS_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(?P<name>[A-Za-z_$][\w$]*)\s*(?:<[^>]*>)?\s*\([^)]*\)[^{;]*\{")
        .expect("js function regex is valid")
});
static JS_ARROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:export\s+)?(?:const|let|var)\s+(?P<name>[A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b[^(;{]*\([^)]*\)[^{;]*|(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*(?::[^={;]+)?=>\s*)\{",
    )
    .expect("js arrow regex is valid")
});
static JS_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:(?:public|private|protected|static|async|readonly|override|abstract|get|set)\s+)*\*?(?P<name>[A-Za-z_$][\w$]*)\s*(?:<[^>]*>)?\s*\([^)]*\)\s*(?::[^{;]+)?\{",
    )
    .expect("js method regex is valid")
});
/// Method-shaped declaration of the C family: optional modifiers and return
/// type, a possibly `Type::`-qualified name, a parameter list, then `{`.
static C_LIKE_METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?P<prefix>[A-Za-z_][\w<>\[\],.?*&: \t]*?[ \t*&>\]])?(?P<name>~?[A-Za-z_]\w*(?:::~?[A-Za-z_]\w*)*)[ \t]*\([^;{}]*?\)[^;{}=]*\{",
    )
    .expect("c-like method regex is valid")
});

static CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?P<name>[A-Za-z_][\w$]*(?:\s*\.\s*[A-Za-z_$][\w$]*)*)\s*\(")
        .expect("call regex is valid")
});

/// Words that look like `name(` without being calls or declarations.
const KEYWORDS: &[&str] = &[
    "if", "else", "for", "foreach", "while", "do", "switch", "case", "catch", "try", "return",
    "function", "typeof", "instanceof", "new", "delete", "throw", "await", "yield", "void", "in",
    "of", "with", "sizeof", "alignof", "decltype", "static_cast", "dynamic_cast", "const_cast",
    "reinterpret_cast", "using", "lock", "fixed", "checked", "unchecked", "nameof", "default",
    "synchronized", "super", "this", "assert",
];

struct Rules {
    imports: &'static [&'static LazyLock<Regex>],
    import_root: fn(&str) -> Option<&str>,
    classes: &'static LazyLock<Regex>,
    functions: &'static [&'static LazyLock<Regex>],
    /// Declarations only recognized directly inside a class body.
    methods: Option<&'static LazyLock<Regex>>,
}

static JS_RULES: Rules = Rules {
    imports: &[&JS_IMPORT, &JS_REQUIRE],
    import_root: package_root,
    classes: &JS_CLASS,
    functions: &[&JS_FUNCTION, &JS_ARROW],
    methods: Some(&JS_METHOD),
};

static JAVA_RULES: Rules = Rules {
    imports: &[&JAVA_IMPORT],
    import_root: dotted_root,
    classes: &JAVA_CLASS,
    functions: &[&C_LIKE_METHOD],
    methods: None,
};

static CS_RULES: Rules = Rules {
    imports: &[&CS_USING],
    import_root: dotted_root,
    classes: &CS_CLASS,
    functions: &[&C_LIKE_METHOD],
    methods: None,
};

static CPP_RULES: Rules = Rules {
    imports: &[&CPP_INCLUDE],
    import_root: include_root,
    classes: &CPP_CLASS,
    functions: &[&C_LIKE_METHOD],
    methods: None,
};

/// Regex-driven extraction for one language family.
#[derive(Clone, Copy)]
pub(crate) struct PatternStrategy {
    rules: &'static Rules,
}

impl PatternStrategy {
    pub fn for_lang(lang: Lang) -> Self {
        let rules = match lang {
            Lang::JavaScript | Lang::TypeScript | Lang::Python => &JS_RULES,
            Lang::Java => &JAVA_RULES,
            Lang::CSharp => &CS_RULES,
            Lang::Cpp => &CPP_RULES,
        };
        Self { rules }
    }

    fn imports(&self, content: &str) -> BTreeSet<String> {
        self.rules
            .imports
            .iter()
            .flat_map(|re| re.captures_iter(content))
            .filter_map(|caps| caps.name("spec"))
            .filter_map(|spec| (self.rules.import_root)(spec.as_str().trim()))
            .map(str::to_string)
            .collect()
    }

    fn classes(&self, unit: &SourceUnit<'_>) -> Vec<ClassSpan> {
        let content = unit.content;
        self.rules
            .classes
            .captures_iter(content)
            .filter_map(|caps| {
                let m = caps.get(0)?;
                let name = caps.name("name")?.as_str().to_string();
                let open = m.end() - 1;
                let end = matching_brace_end(content, open);
                let span_end = end.unwrap_or(content.len());
                Some(ClassSpan {
                    open,
                    close: span_end,
                    record: ClassRecord {
                        qualname: unit.qualname(&[name.as_str()]),
                        line_start: line_of(content, m.start()),
                        line_end: line_of(content, span_end.saturating_sub(1)),
                        docstring: String::new(),
                        source: end.map_or_else(String::new, |e| content[m.start()..e].to_string()),
                        methods: Vec::new(),
                        name,
                    },
                })
            })
            .collect()
    }

    fn candidates(&self, content: &str) -> Vec<Candidate> {
        let tagged = self
            .rules
            .functions
            .iter()
            .map(|re| (*re, false))
            .chain(self.rules.methods.map(|re| (re, true)));

        let mut out: Vec<Candidate> = tagged
            .flat_map(|(re, method_only)| {
                re.captures_iter(content)
                    .filter_map(move |caps| Candidate::from_captures(&caps, method_only))
            })
            .collect();
        out.sort_by_key(|c| (c.start, c.open));
        out.dedup_by_key(|c| c.open);
        out
    }
}

impl Strategy for PatternStrategy {
    fn extract(&self, unit: &SourceUnit<'_>) -> FileRecord {
        let content = unit.content;
        let mut record = unit.empty_record();
        record.imports = self.imports(content);

        let mut classes = self.classes(unit);
        let mut bodies: Vec<(usize, usize)> = Vec::new();

        for cand in self.candidates(content) {
            let simple = cand.name.rsplit("::").next().unwrap_or(&cand.name);
            if KEYWORDS.contains(&simple.trim_start_matches('~'))
                || cand.after_new
                || classes.iter().any(|c| c.open == cand.open)
                || bodies.iter().any(|&(o, c)| cand.start > o && cand.start < c)
            {
                continue;
            }

            let enclosing = innermost_class(&classes, cand.start);
            if cand.method_only && enclosing.is_none() {
                continue;
            }

            let end = matching_brace_end(content, cand.open);
            let span_end = end.unwrap_or(content.len());
            bodies.push((cand.open, span_end));

            let (owner, qual_scope) = match cand.name.rsplit_once("::") {
                Some((outer, name)) => {
                    let outer_simple = outer.rsplit("::").next().unwrap_or(outer);
                    let owner = classes.iter().position(|c| c.record.name == outer_simple);
                    (owner, vec![outer.replace("::", "."), name.to_string()])
                }
                None => (enclosing, Vec::new()),
            };

            let name = simple.to_string();
            let qualname = match (owner, qual_scope.is_empty()) {
                (Some(idx), _) => unit.qualname(&[classes[idx].record.name.as_str(), name.as_str()]),
                (None, false) => {
                    let scope: Vec<&str> = qual_scope.iter().map(String::as_str).collect();
                    unit.qualname(&scope)
                }
                (None, true) => unit.qualname(&[name.as_str()]),
            };

            let function = FunctionRecord {
                qualname,
                class_name: owner.map(|idx| classes[idx].record.name.clone()),
                line_start: line_of(content, cand.start),
                line_end: line_of(content, span_end.saturating_sub(1)),
                docstring: String::new(),
                source: end.map_or_else(String::new, |e| content[cand.start..e].to_string()),
                calls: end.map_or_else(BTreeSet::new, |e| scan_calls(&content[cand.open..e])),
                name,
            };

            match owner {
                Some(idx) => classes[idx].record.methods.push(function),
                None => record.functions.push(function),
            }
        }

        record.classes = classes.into_iter().map(|c| c.record).collect();
        record
    }
}

struct ClassSpan {
    open: usize,
    close: usize,
    record: ClassRecord,
}

struct Candidate {
    start: usize,
    open: usize,
    name: String,
    method_only: bool,
    after_new: bool,
}

impl Candidate {
    fn from_captures(caps: &Captures<'_>, method_only: bool) -> Option<Self> {
        let m = caps.get(0)?;
        let after_new = caps.name("prefix").is_some_and(|p| {
            let p = p.as_str().trim_end();
            p == "new" || p.ends_with(" new") || p.ends_with("\tnew")
        });
        Some(Self {
            start: m.start(),
            open: m.end() - 1,
            name: caps.name("name")?.as_str().to_string(),
            method_only,
            after_new,
        })
    }
}

fn innermost_class(classes: &[ClassSpan], pos: usize) -> Option<usize> {
    classes
        .iter()
        .enumerate()
        .filter(|(_, c)| pos > c.open && pos < c.close)
        .max_by_key(|(_, c)| c.open)
        .map(|(idx, _)| idx)
}

/// Byte offset just past the `}` closing the block that opens at `open`,
/// tolerant of nested blocks.
///
/// Returns `None` when `open` is not a `{` or the block never closes; callers
/// then keep the declaration with an empty body.
fn matching_brace_end(src: &str, open: usize) -> Option<usize> {
    let bytes = src.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }
    let mut depth = 0usize;
    for (i, b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn scan_calls(body: &str) -> BTreeSet<String> {
    CALL.captures_iter(body)
        .filter_map(|caps| caps.name("name"))
        .map(|m| {
            m.as_str()
                .split('.')
                .map(str::trim)
                .collect::<Vec<_>>()
                .join(".")
        })
        .filter(|name| {
            let last = name.rsplit('.').next().unwrap_or(name);
            !KEYWORDS.contains(&last)
        })
        .collect()
}

/// npm-style specifier: first segment, or `@scope/pkg`. Relative paths are local.
fn package_root(spec: &str) -> Option<&str> {
    if spec.is_empty() || spec.starts_with('.') || spec.starts_with('/') {
        return None;
    }
    let mut cut = spec.match_indices('/');
    let end = if spec.starts_with('@') {
        cut.nth(1).map_or(spec.len(), |(i, _)| i)
    } else {
        cut.next().map_or(spec.len(), |(i, _)| i)
    };
    Some(&spec[..end])
}

fn dotted_root(spec: &str) -> Option<&str> {
    spec.split('.').next().filter(|s| !s.is_empty())
}

fn include_root(spec: &str) -> Option<&str> {
    if spec.starts_with('.') {
        return None;
    }
    spec.split('/').next().filter(|s| !s.is_empty())
}
