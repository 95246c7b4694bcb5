//! Syntax-tree strategy for Python (tree-sitter).

use std::collections::BTreeSet;

use tree_sitter::{Node, Parser};

use super::{ClassRecord, FileRecord, FunctionRecord, SourceUnit, Strategy};

pub(crate) struct PythonStrategy;

impl Strategy for PythonStrategy {
    fn extract(&self, unit: &SourceUnit<'_>) -> FileRecord {
        let Some(grammar) = unit.lang.grammar() else {
            return unit.empty_record();
        };
        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&grammar) {
            tracing::warn!(path = unit.path, "set_language failed: {e}");
            return unit.empty_record();
        }
        let Some(tree) = parser.parse(unit.content, None) else {
            tracing::warn!(path = unit.path, "python parse failed");
            return unit.empty_record();
        };

        let root = tree.root_node();
        if root.has_error() {
            tracing::warn!(path = unit.path, "python source has syntax errors, skipping entities");
            return unit.empty_record();
        }

        let ctx = Ctx {
            unit,
            lines: unit.content.lines().collect(),
        };
        let mut record = unit.empty_record();
        record.imports = collect_imports(&ctx, root);

        for node in named_children(root) {
            let Some(def) = unwrap_decorated(node) else {
                continue;
            };
            match def.kind() {
                "class_definition" => {
                    if let Some(class) = ctx.class(def) {
                        record.classes.push(class);
                    }
                }
                "function_definition" => {
                    if let Some(function) = ctx.function(def, None) {
                        record.functions.push(function);
                    }
                }
                _ => {}
            }
        }

        record
    }
}

struct Ctx<'a> {
    unit: &'a SourceUnit<'a>,
    lines: Vec<&'a str>,
}

impl Ctx<'_> {
    fn text(&self, node: Node<'_>) -> &str {
        &self.unit.content[node.byte_range()]
    }

    /// Full lines spanned by `node`.
    fn segment(&self, node: Node<'_>) -> String {
        let start = node.start_position().row;
        let end = node.end_position().row.min(self.lines.len().saturating_sub(1));
        if start > end || self.lines.is_empty() {
            return String::new();
        }
        self.lines[start..=end].join("\n")
    }

    fn class(&self, node: Node<'_>) -> Option<ClassRecord> {
        let name = self.text(node.child_by_field_name("name")?).to_string();
        let body = node.child_by_field_name("body");

        let methods = body
            .map(|b| {
                named_children(b)
                    .filter_map(unwrap_decorated)
                    .filter(|n| n.kind() == "function_definition")
                    .filter_map(|n| self.function(n, Some(name.as_str())))
                    .collect()
            })
            .unwrap_or_default();

        Some(ClassRecord {
            qualname: self.unit.qualname(&[name.as_str()]),
            line_start: node.start_position().row + 1,
            line_end: node.end_position().row + 1,
            docstring: body.and_then(|b| self.docstring(b)).unwrap_or_default(),
            source: self.segment(node),
            methods,
            name,
        })
    }

    fn function(&self, node: Node<'_>, class_name: Option<&str>) -> Option<FunctionRecord> {
        let name = self.text(node.child_by_field_name("name")?).to_string();
        let qualname = match class_name {
            Some(cls) => self.unit.qualname(&[cls, name.as_str()]),
            None => self.unit.qualname(&[name.as_str()]),
        };
        let docstring = node
            .child_by_field_name("body")
            .and_then(|b| self.docstring(b))
            .unwrap_or_default();

        Some(FunctionRecord {
            qualname,
            class_name: class_name.map(str::to_string),
            line_start: node.start_position().row + 1,
            line_end: node.end_position().row + 1,
            docstring,
            source: self.segment(node),
            calls: self.calls(node),
            name,
        })
    }

    /// Docstring of a `block`: its first statement, when that is a bare string.
    fn docstring(&self, block: Node<'_>) -> Option<String> {
        let first = named_children(block).find(|n| n.kind() != "comment")?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string = named_children(first).next()?;
        if string.kind() != "string" {
            return None;
        }
        Some(clean_docstring(strip_quotes(self.text(string))))
    }

    /// Simple or dotted names of everything called inside `node`, nested scopes included.
    fn calls(&self, node: Node<'_>) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if n.kind() == "call"
                && let Some(func) = n.child_by_field_name("function")
                && let Some(name) = self.dotted_name(func)
            {
                out.insert(name);
            }
            stack.extend(named_children(n));
        }
        out
    }

    fn dotted_name(&self, node: Node<'_>) -> Option<String> {
        match node.kind() {
            "identifier" => Some(self.text(node).to_string()),
            "attribute" => {
                let object = self.dotted_name(node.child_by_field_name("object")?)?;
                let attr = self.text(node.child_by_field_name("attribute")?);
                Some(format!("{object}.{attr}"))
            }
            _ => None,
        }
    }
}

/// Top-level package names imported anywhere in the module. Relative imports are local and skipped.
fn collect_imports(ctx: &Ctx<'_>, root: Node<'_>) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut stack = vec![root];
    while let Some(n) = stack.pop() {
        match n.kind() {
            "import_statement" => {
                for child in named_children(n) {
                    let dotted = match child.kind() {
                        "dotted_name" => Some(child),
                        "aliased_import" => child.child_by_field_name("name"),
                        _ => None,
                    };
                    if let Some(d) = dotted {
                        insert_top_level(&mut out, ctx.text(d));
                    }
                }
            }
            "import_from_statement" => {
                if let Some(module) = n.child_by_field_name("module_name")
                    && module.kind() == "dotted_name"
                {
                    insert_top_level(&mut out, ctx.text(module));
                }
            }
            _ => stack.extend(named_children(n)),
        }
    }
    out
}

fn insert_top_level(out: &mut BTreeSet<String>, dotted: &str) {
    if let Some(top) = dotted.split('.').next().map(str::trim)
        && !top.is_empty()
    {
        out.insert(top.to_string());
    }
}

fn unwrap_decorated(node: Node<'_>) -> Option<Node<'_>> {
    if node.kind() == "decorated_definition" {
        node.child_by_field_name("definition")
    } else {
        Some(node)
    }
}

fn named_children(node: Node<'_>) -> impl Iterator<Item = Node<'_>> {
    let count = u32::try_from(node.named_child_count()).unwrap_or(u32::MAX);
    (0..count).filter_map(move |i| node.named_child(i))
}

/// Strip string prefixes (`r`, `b`, `u`, `f`) and the surrounding quotes.
fn strip_quotes(raw: &str) -> &str {
    let s = raw.trim_start_matches(['r', 'R', 'b', 'B', 'u', 'U', 'f', 'F']);
    for q in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = s.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner;
        }
    }
    s
}

/// Normalize docstring indentation: first line trimmed, common indentation
/// of the remaining lines removed, leading and trailing blank lines dropped.
fn clean_docstring(doc: &str) -> String {
    let mut lines: Vec<&str> = doc.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let indent = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    out.push(lines.remove(0).trim().to_string());
    for line in lines {
        let cut = indent.min(line.len() - line.trim_start().len());
        out.push(line.get(cut..).unwrap_or(line).trim_end().to_string());
    }
    while out.first().is_some_and(|l| l.is_empty()) {
        out.remove(0);
    }
    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    out.join("\n")
}
