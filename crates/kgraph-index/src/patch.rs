//! Unified-diff application for `patch`-mode changes.

/// Why a patch could not be applied.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("malformed patch: {0}")]
    Parse(#[from] diffy::ParsePatchError),

    #[error("patch does not apply: {0}")]
    Apply(#[from] diffy::ApplyError),
}

/// Apply a unified diff to `base`.
///
/// Preamble lines before the first `---` header (such as `diff --git` or
/// `index` lines) are ignored.
///
/// # Errors
///
/// Returns [`PatchError`] if the patch is malformed or its context does not
/// match `base`.
pub fn apply_patch(base: &str, patch: &str) -> Result<String, PatchError> {
    let body = patch
        .find("--- ")
        .filter(|&i| i == 0 || patch.as_bytes()[i - 1] == b'\n')
        .map_or(patch, |i| &patch[i..]);
    let parsed = diffy::Patch::from_str(body)?;
    Ok(diffy::apply(base, &parsed)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_created_patch() {
        let base = "def foo():\n    pass\n";
        let target = "def foo():\n    return 1\n\ndef bar():\n    foo()\n";
        let patch = diffy::create_patch(base, target).to_string();
        assert_eq!(apply_patch(base, &patch).unwrap(), target);
    }

    #[test]
    fn git_preamble_is_skipped() {
        let base = "a\nb\nc\n";
        let patch = format!(
            "diff --git a/x.py b/x.py\nindex 1..2 100644\n{}",
            diffy::create_patch(base, "a\nB\nc\n")
        );
        assert_eq!(apply_patch(base, &patch).unwrap(), "a\nB\nc\n");
    }

    #[test]
    fn conflicting_base_fails() {
        let patch = diffy::create_patch("a\nb\nc\n", "a\nB\nc\n").to_string();
        assert!(matches!(
            apply_patch("x\ny\nz\n", &patch),
            Err(PatchError::Apply(_))
        ));
    }

    #[test]
    fn garbage_fails() {
        assert!(apply_patch("a\n", "--- a\n+++ b\n@@ nonsense @@\n").is_err());
    }
}
