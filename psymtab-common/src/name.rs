use std::cmp::Ordering;

/// Returns the basename portion of a path, accepting both separators.
///
/// Unlike `std::path`, this never looks at the host platform: debug records
/// carry paths from the build machine, which may not match the analysis
/// host.
pub fn basename(path: &str) -> &str {
    match path.rfind(['/', '\\']) {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Compares two filenames for logical equality.
///
/// Separators are unified; everything else is an exact byte comparison.
pub fn filename_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .all(|(x, y)| x == y || (x == b'/' || x == b'\\') && (y == b'/' || y == b'\\'))
}

/// The language-independent ordered comparison on search names.
///
/// This is the ordering under which the global psymbol list of every
/// partial symtab is sorted, and which the binary search in name lookups
/// uses: case-sensitive lexicographic comparison over the canonicalized
/// search name. It deliberately knows nothing about any language's
/// matching rules; language-specific matchers run only over the narrow
/// candidate range the ordered compare locates.
pub fn ordered_compare(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

/// Canonicalizes a C++ symbol name for search-name purposes.
///
/// Whitespace inside template argument lists and around punctuation is not
/// significant, but compilers are inconsistent about emitting it. This
/// collapses interior whitespace runs and drops spaces adjacent to
/// punctuation so that `foo<int, char>` and `foo<int,char>` produce the
/// same search name. Returns `None` when the input is already canonical.
pub fn canonicalize_cpp_name(name: &str) -> Option<String> {
    fn is_puncture(c: char) -> bool {
        matches!(c, '<' | '>' | ',' | '*' | '&' | '(' | ')' | ':' | '[' | ']')
    }

    if !name.contains(char::is_whitespace) {
        return None;
    }

    let mut out = String::with_capacity(name.len());
    let mut pending_space = false;
    for c in name.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space && !is_puncture(c) && !out.ends_with(is_puncture) {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    if out == name {
        None
    } else {
        Some(out)
    }
}

/// Detects vtable symbol names from the classic C++ ABIs.
///
/// Covers both the gcc 2.x `_vt.` / `_vt$` forms and the cfront-style
/// `__vt_` / `__vtbl_` forms. The caller is expected to have stripped the
/// target's symbol leading character first.
pub fn is_vtable_name(name: &str) -> bool {
    name.strip_prefix("_vt")
        .map(|rest| rest.starts_with('.') || rest.starts_with('$'))
        .unwrap_or(false)
        || name.starts_with("__vt_")
        || name.starts_with("__vtbl_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn test_basename() {
        assert_eq!(basename("proj/src/main.c"), "main.c");
        assert_eq!(basename("main.c"), "main.c");
        assert_eq!(basename("proj\\src\\main.c"), "main.c");
        assert_eq!(basename("proj/src/"), "");
    }

    #[test]
    fn test_filename_eq() {
        assert!(filename_eq("a/b.c", "a/b.c"));
        assert!(filename_eq("a/b.c", "a\\b.c"));
        assert!(!filename_eq("a/b.c", "a/b.h"));
    }

    #[test]
    fn test_ordered_compare() {
        assert_eq!(ordered_compare("alpha", "beta"), Ordering::Less);
        assert_eq!(ordered_compare("beta", "beta"), Ordering::Equal);
        assert_eq!(ordered_compare("Zeta", "alpha"), Ordering::Less);
    }

    #[test]
    fn test_canonicalize_cpp_name() {
        assert_eq!(canonicalize_cpp_name("plain"), None);
        assert_eq!(
            canonicalize_cpp_name("foo<int, char>").as_deref(),
            Some("foo<int,char>")
        );
        assert_eq!(
            canonicalize_cpp_name("ns :: klass").as_deref(),
            Some("ns::klass")
        );
        // Space between identifiers is significant and kept.
        assert_eq!(
            canonicalize_cpp_name("operator  delete").as_deref(),
            Some("operator delete")
        );
    }

    #[test]
    fn test_is_vtable_name() {
        assert!(is_vtable_name("_vt.Foo"));
        assert!(is_vtable_name("_vt$Foo"));
        assert!(is_vtable_name("__vt_3Foo"));
        assert!(is_vtable_name("__vtbl_3Foo"));
        assert!(!is_vtable_name("_vtx"));
        assert!(!is_vtable_name("vtable"));
    }
}
