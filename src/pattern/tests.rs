use regex::Regex;
use serde_json::json;

use super::{compile, MatchOptions, ParamKey, PathRenderer, PathSpec};

fn caps<'a>(pattern: &super::PathPattern, input: &'a str) -> Option<Vec<Option<String>>> {
    pattern.regex.captures(input).map(|c| {
        (1..c.len())
            .map(|i| c.get(i).map(|m| m.as_str().to_string()))
            .collect()
    })
}

#[test]
fn test_named_param_matches_and_extracts() {
    let p = compile(&PathSpec::from("/user/:id"), &MatchOptions::default()).unwrap();
    assert_eq!(p.keys.len(), 1);
    assert_eq!(p.keys[0].name, ParamKey::Name("id".to_string()));
    assert_eq!(caps(&p, "/user/42"), Some(vec![Some("42".to_string())]));
    assert!(caps(&p, "/user").is_none());
    assert!(caps(&p, "/user/42/x").is_none());
}

#[test]
fn test_named_param_rejects_embedded_slash() {
    let p = compile(&PathSpec::from("/user/:id"), &MatchOptions::default()).unwrap();
    assert!(caps(&p, "/user/4/2").is_none());
}

#[test]
fn test_optional_param() {
    let p = compile(&PathSpec::from("/user/:id?"), &MatchOptions::default()).unwrap();
    assert_eq!(caps(&p, "/user"), Some(vec![None]));
    assert_eq!(caps(&p, "/user/42"), Some(vec![Some("42".to_string())]));
}

#[test]
fn test_trailing_slash_is_lenient_by_default() {
    let p = compile(&PathSpec::from("/about"), &MatchOptions::default()).unwrap();
    assert!(p.regex.is_match("/about"));
    assert!(p.regex.is_match("/about/"));

    let p = compile(&PathSpec::from("/about/"), &MatchOptions::default()).unwrap();
    assert!(p.regex.is_match("/about"));
    assert!(p.regex.is_match("/about/"));
}

#[test]
fn test_strict_trailing_slash() {
    let strict = MatchOptions {
        strict: true,
        ..MatchOptions::default()
    };
    let p = compile(&PathSpec::from("/about/"), &strict).unwrap();
    assert!(p.regex.is_match("/about/"));
    assert!(!p.regex.is_match("/about"));

    let p = compile(&PathSpec::from("/about"), &strict).unwrap();
    assert!(p.regex.is_match("/about"));
    assert!(!p.regex.is_match("/about/"));
}

#[test]
fn test_case_insensitive_by_default() {
    let p = compile(&PathSpec::from("/Books"), &MatchOptions::default()).unwrap();
    assert!(p.regex.is_match("/books"));

    let sensitive = MatchOptions {
        sensitive: true,
        ..MatchOptions::default()
    };
    let p = compile(&PathSpec::from("/Books"), &sensitive).unwrap();
    assert!(!p.regex.is_match("/books"));
    assert!(p.regex.is_match("/Books"));
}

#[test]
fn test_non_ending_mode_composes_prefixes() {
    let prefix = MatchOptions {
        end: false,
        ..MatchOptions::default()
    };
    let p = compile(&PathSpec::from("/admin"), &prefix).unwrap();
    assert!(p.regex.is_match("/admin"));
    assert!(p.regex.is_match("/admin/users"));
    assert!(!p.regex.is_match("/administrator"));
}

#[test]
fn test_repeating_param_spans_segments() {
    let p = compile(&PathSpec::from("/files/:path+"), &MatchOptions::default()).unwrap();
    assert_eq!(
        caps(&p, "/files/a/b/c"),
        Some(vec![Some("a/b/c".to_string())])
    );
    assert!(caps(&p, "/files").is_none());
}

#[test]
fn test_zero_or_more_param() {
    let p = compile(&PathSpec::from("/files/:path*"), &MatchOptions::default()).unwrap();
    assert_eq!(caps(&p, "/files"), Some(vec![None]));
    assert_eq!(
        caps(&p, "/files/a/b"),
        Some(vec![Some("a/b".to_string())])
    );
}

#[test]
fn test_inline_custom_pattern() {
    let p = compile(&PathSpec::from(r"/order/:id(\d+)"), &MatchOptions::default()).unwrap();
    assert_eq!(caps(&p, "/order/123"), Some(vec![Some("123".to_string())]));
    assert!(caps(&p, "/order/abc").is_none());
}

#[test]
fn test_anonymous_group_gets_positional_key() {
    let p = compile(&PathSpec::from("/file/(.*)"), &MatchOptions::default()).unwrap();
    assert_eq!(p.keys.len(), 1);
    assert_eq!(p.keys[0].name, ParamKey::Index(0));
    assert_eq!(
        caps(&p, "/file/a/b.txt"),
        Some(vec![Some("a/b.txt".to_string())])
    );
}

#[test]
fn test_bare_wildcard_captures_everything() {
    let p = compile(&PathSpec::from("(.*)"), &MatchOptions::default()).unwrap();
    assert_eq!(caps(&p, "/anything/here"), Some(vec![Some("/anything/here".to_string())]));
}

#[test]
fn test_escaped_character_is_literal() {
    let p = compile(&PathSpec::from(r"/a\(b"), &MatchOptions::default()).unwrap();
    assert!(p.regex.is_match("/a(b"));
    assert_eq!(p.keys.len(), 0);
}

#[test]
fn test_alternatives_union_and_concatenated_keys() {
    let spec = PathSpec::Alternatives(vec!["/a/:x".to_string(), "/b/:y".to_string()]);
    let p = compile(&spec, &MatchOptions::default()).unwrap();
    assert_eq!(p.keys.len(), 2);
    assert_eq!(p.keys[0].name, ParamKey::Name("x".to_string()));
    assert_eq!(p.keys[1].name, ParamKey::Name("y".to_string()));
    assert!(p.regex.is_match("/a/1"));
    assert!(p.regex.is_match("/b/2"));
    assert!(!p.regex.is_match("/c/3"));
}

#[test]
fn test_prebuilt_regex_keys_are_positional() {
    let re = Regex::new(r"^/x/(\d+)/(\w+)$").unwrap();
    let p = compile(&PathSpec::Compiled(re), &MatchOptions::default()).unwrap();
    assert_eq!(p.keys.len(), 2);
    assert_eq!(p.keys[0].name, ParamKey::Index(0));
    assert_eq!(p.keys[1].name, ParamKey::Index(1));
    assert_eq!(
        caps(&p, "/x/7/seven"),
        Some(vec![Some("7".to_string()), Some("seven".to_string())])
    );
}

#[test]
fn test_keys_line_up_with_capture_groups() {
    let p = compile(
        &PathSpec::from("/a/:one/b/:two?/(.*)"),
        &MatchOptions::default(),
    )
    .unwrap();
    assert_eq!(p.keys.len(), p.regex.captures_len() - 1);
}

#[test]
fn test_render_round_trip() {
    let renderer = PathRenderer::new("/user/:id").unwrap();
    let data = json!({"id": "42"});
    assert_eq!(renderer.render(data.as_object().unwrap()).unwrap(), "/user/42");
}

#[test]
fn test_render_missing_required_param_fails() {
    let renderer = PathRenderer::new("/user/:id").unwrap();
    let data = json!({});
    let err = renderer.render(data.as_object().unwrap()).unwrap_err();
    assert!(matches!(err, crate::error::RouterError::Validation { .. }));
}

#[test]
fn test_render_optional_param_skipped() {
    let renderer = PathRenderer::new("/user/:id?").unwrap();
    let data = json!({});
    assert_eq!(renderer.render(data.as_object().unwrap()).unwrap(), "/user");
}

#[test]
fn test_render_encodes_segments() {
    let renderer = PathRenderer::new("/search/:term").unwrap();
    let data = json!({"term": "rust lang"});
    assert_eq!(
        renderer.render(data.as_object().unwrap()).unwrap(),
        "/search/rust%20lang"
    );
}

#[test]
fn test_render_repeating_param_joins_with_delimiter() {
    let renderer = PathRenderer::new("/files/:path+").unwrap();
    let data = json!({"path": ["a", "b", "c"]});
    assert_eq!(
        renderer.render(data.as_object().unwrap()).unwrap(),
        "/files/a/b/c"
    );
}

#[test]
fn test_render_sequence_for_plain_param_fails() {
    let renderer = PathRenderer::new("/user/:id").unwrap();
    let data = json!({"id": ["1", "2"]});
    assert!(renderer.render(data.as_object().unwrap()).is_err());
}

#[test]
fn test_render_empty_sequence_on_required_repeat_fails() {
    let renderer = PathRenderer::new("/files/:path+").unwrap();
    let data = json!({"path": []});
    assert!(renderer.render(data.as_object().unwrap()).is_err());
}

#[test]
fn test_render_validates_against_inline_pattern() {
    let renderer = PathRenderer::new(r"/order/:id(\d+)").unwrap();
    let ok = json!({"id": "12"});
    assert_eq!(renderer.render(ok.as_object().unwrap()).unwrap(), "/order/12");
    let bad = json!({"id": "ab"});
    assert!(renderer.render(bad.as_object().unwrap()).is_err());
}

#[test]
fn test_render_numeric_value() {
    let renderer = PathRenderer::new("/user/:id").unwrap();
    let data = json!({"id": 42});
    assert_eq!(renderer.render(data.as_object().unwrap()).unwrap(), "/user/42");
}
