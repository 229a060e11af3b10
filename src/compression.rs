//! The name-compression resolver for Callgrind's `(N) name` / `(N)` tokens
//!
//! Callgrind compresses repeated file and function names behind small integer tokens. The first
//! time a name is used it is written as `(N) name`, binding `N` to `name`; every later occurrence
//! may shorten to just `(N)`. File-name and function-name tokens live in disjoint numbering
//! spaces, so two independent [`CompressionTable`]s are required per trace.

use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Anchored at the start of the string: a compression token, with an optional trailing name.
    static ref TOKEN_RE: Regex =
        Regex::new(r"^\((?<token>\d+)\)(?:\s+(?<name>\S.*)?)?$").expect("Regex should compile");
}

/// The three shapes a Callgrind name-spec can take, per the format's grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape<'a> {
    /// `(N) some_name` — binds `N` to `some_name`
    Define(u32, &'a str),
    /// `(N)` — refers back to a previously bound `N`
    Reference(u32),
    /// Anything not matching `(digits)` at the start
    Literal,
}

fn classify(input: &str) -> Shape<'_> {
    let Some(caps) = TOKEN_RE.captures(input) else {
        return Shape::Literal;
    };

    // The regex anchors `\d+` so this parse cannot fail.
    let token: u32 = caps["token"].parse().expect("digits should parse");
    match caps.name("name") {
        Some(name) => Shape::Define(token, name.as_str().trim()),
        None => Shape::Reference(token),
    }
}

/// One of the two disjoint numeric-token -> string tables a trace maintains
///
/// One instance tracks file-name contexts (after `fl=`), a second tracks function-name contexts
/// (after `fn=`/`cfn=`). Both are owned by the [`crate::preprocessor::Preprocessor`] running the
/// parse; nothing here is process-global.
#[derive(Debug, Clone, Default)]
pub struct CompressionTable {
    bindings: IndexMap<u32, String>,
}

impl CompressionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a raw `fl=`/`fn=`/`cfn=` value against this table
    ///
    /// - `(N) name` binds `N` to `name` in this table and returns `name`.
    /// - `(N)` returns the string previously bound to `N`, or `input` unchanged if `N` was never
    ///   defined (a malformed-but-survivable trace).
    /// - Anything else is returned unchanged.
    pub fn resolve(&mut self, input: &str) -> String {
        match classify(input) {
            Shape::Define(token, name) => {
                self.bindings.insert(token, name.to_owned());
                name.to_owned()
            }
            Shape::Reference(token) => self
                .bindings
                .get(&token)
                .cloned()
                .unwrap_or_else(|| input.to_owned()),
            Shape::Literal => input.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::CompressionTable;

    #[test]
    fn test_resolver_sequence_from_spec() {
        let mut table = CompressionTable::new();
        assert_eq!(table.resolve("(1) foo"), "foo");
        assert_eq!(table.resolve("(1)"), "foo");
        assert_eq!(table.resolve("(2) bar"), "bar");
        assert_eq!(table.resolve("(1)"), "foo");
    }

    #[test]
    fn test_unbound_reference_returns_raw_input() {
        let mut table = CompressionTable::new();
        assert_eq!(table.resolve("(7)"), "(7)");
    }

    #[rstest]
    #[case::plain_literal("/usr/bin/php", "/usr/bin/php")]
    #[case::entry_point_marker("{main}", "{main}")]
    fn test_literal_passthrough(#[case] input: &str, #[case] expected: &str) {
        let mut table = CompressionTable::new();
        assert_eq!(table.resolve(input), expected);
    }

    #[test]
    fn test_file_and_function_tables_are_independent() {
        let mut files = CompressionTable::new();
        let mut functions = CompressionTable::new();

        assert_eq!(files.resolve("(1) /a/b.php"), "/a/b.php");
        assert_eq!(functions.resolve("(1) foo"), "foo");

        // Token 1 means something different in each table.
        assert_eq!(files.resolve("(1)"), "/a/b.php");
        assert_eq!(functions.resolve("(1)"), "foo");
    }

    #[test]
    fn test_redefinition_overwrites_binding() {
        let mut table = CompressionTable::new();
        assert_eq!(table.resolve("(1) foo"), "foo");
        assert_eq!(table.resolve("(1) renamed"), "renamed");
        assert_eq!(table.resolve("(1)"), "renamed");
    }
}
