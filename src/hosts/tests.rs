//! Unit tests for host range resolution.

use super::*;
use rstest::rstest;

fn names(expression: &str) -> Vec<String> {
    resolve(expression)
        .unwrap_or_else(|err| panic!("'{expression}' should resolve: {err}"))
        .into_iter()
        .map(|host| host.to_string())
        .collect()
}

#[test]
fn empty_expression_resolves_to_no_hosts() {
    let hosts = resolve("").expect("empty expression is valid");
    assert!(hosts.is_empty());
}

#[rstest]
#[case("foo", &["foo"])]
#[case("foo;bar", &["foo", "bar"])]
#[case("foo[1]", &["foo1"])]
#[case("foo[1,2]", &["foo1", "foo2"])]
#[case("foo[1,2]bar", &["foo1bar", "foo2bar"])]
#[case("foo[1,2]bar;baz", &["foo1bar", "foo2bar", "baz"])]
#[case(
    "foo[1,2,5-7]bar;baz",
    &["foo1bar", "foo2bar", "foo5bar", "foo6bar", "foo7bar", "baz"]
)]
#[case("foo[0-2];foo[4-6]", &["foo0", "foo1", "foo2", "foo4", "foo5", "foo6"])]
#[case("[0-2];[4-6]", &["0", "1", "2", "4", "5", "6"])]
#[case("node-[a,b]", &["node-a", "node-b"])]
#[case("val[08-10]", &["val8", "val9", "val10"])]
#[case("m[3-3]", &["m3"])]
fn resolves_expressions_in_written_order(#[case] expression: &str, #[case] expected: &[&str]) {
    assert_eq!(names(expression), expected);
}

#[rstest]
#[case("foo[1];foo[1]", "foo1")]
#[case("foo[1,1]", "foo1")]
#[case("foo1;foo[0-3]", "foo1")]
fn rejects_duplicate_hosts(#[case] expression: &str, #[case] duplicate: &str) {
    let err = resolve(expression).expect_err("duplicates must be rejected");
    assert_eq!(
        err,
        HostRangeError::Duplicate {
            host: duplicate.to_owned()
        }
    );
}

#[rstest]
#[case::reversed_range("foo[5-2]")]
#[case::span_too_large("foo[0-1001]")]
#[case::non_numeric_range("foo[a-b]")]
#[case::negative_start("foo[-1-3]")]
#[case::unclosed_bracket("foo[1")]
#[case::stray_closing_bracket("foo]1")]
#[case::empty_list("foo[]")]
#[case::two_ranges("a[1]b[2]")]
#[case::empty_token("foo[1,,2]")]
#[case::empty_segment("foo;;bar")]
#[case::unsupported_character("foo bar")]
fn rejects_malformed_segments(#[case] expression: &str) {
    let err = resolve(expression).expect_err("malformed expression must fail");
    assert!(
        matches!(err, HostRangeError::Parse { .. }),
        "unexpected error for {expression}: {err}"
    );
}

#[test]
fn accepts_maximum_span() {
    let hosts = resolve("h[0-1000]").expect("span of 1000 is allowed");
    assert_eq!(hosts.len(), 1001);
    assert_eq!(hosts.first().map(HostName::as_str), Some("h0"));
    assert_eq!(hosts.last().map(HostName::as_str), Some("h1000"));
}

#[test]
fn reversed_range_error_names_bounds() {
    let err = resolve("foo[5-2]").expect_err("reversed range");
    assert!(err.to_string().contains("invalid range 5-2"), "{err}");
}
