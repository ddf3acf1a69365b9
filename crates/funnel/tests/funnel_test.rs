//! Integration tests for the Funnel node

use funnel::{Funnel, FunnelOptions, Matcher};
use loam_core::{BuildContext, Error, LinkMode, Node, Settings, Tree};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

fn files_in(root: &Path) -> BTreeSet<String> {
    Tree::from_dir(root)
        .unwrap()
        .files()
        .map(|e| e.relative_path.clone())
        .collect()
}

fn setup() -> (TempDir, Arc<BuildContext>) {
    let temp_dir = tempfile::tempdir().unwrap();
    let ctx = BuildContext::new(temp_dir.path().join("work"), Settings::default());
    (temp_dir, ctx)
}

#[tokio::test]
async fn test_include_glob_selects_js_files() {
    let (temp_dir, ctx) = setup();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.js", "a"), ("b.css", "b"), ("c.js", "c")]);

    let mut funnel = Funnel::new(
        ctx,
        &input,
        FunnelOptions::new().include(Matcher::glob("*.js").unwrap()),
    )
    .unwrap();
    funnel.build().await.unwrap();

    let expected: BTreeSet<String> = ["a.js", "c.js"].iter().map(|s| s.to_string()).collect();
    assert_eq!(files_in(funnel.output_path()), expected);
    assert_eq!(fs::read_to_string(funnel.output_path().join("a.js")).unwrap(), "a");
}

#[tokio::test]
async fn test_second_build_is_a_noop() {
    let (temp_dir, ctx) = setup();
    let input = temp_dir.path().join("in");
    write(&input, &[("lib/a.js", "a"), ("lib/b.js", "b")]);

    let mut funnel = Funnel::new(
        ctx,
        &input,
        FunnelOptions::new().exclude(Matcher::glob("**/b.js").unwrap()),
    )
    .unwrap();

    let first = funnel.build().await.unwrap();
    assert!(!first.is_noop());
    let second = funnel.build().await.unwrap();
    assert!(second.is_noop());
    assert_eq!(files_in(funnel.output_path()), BTreeSet::from(["lib/a.js".to_string()]));
}

#[tokio::test]
async fn test_incremental_add_and_remove() {
    let (temp_dir, ctx) = setup();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.js", "a"), ("gone/b.js", "b")]);

    let mut funnel = Funnel::new(
        ctx,
        &input,
        FunnelOptions::new()
            .include(Matcher::regex(r"\.js$").unwrap())
            .link_mode(LinkMode::Copy),
    )
    .unwrap();
    funnel.build().await.unwrap();

    fs::remove_dir_all(input.join("gone")).unwrap();
    write(&input, &[("new/c.js", "c")]);
    let outcome = funnel.build().await.unwrap();

    assert!(!outcome.is_noop());
    assert_eq!(
        files_in(funnel.output_path()),
        BTreeSet::from(["a.js".to_string(), "new/c.js".to_string()])
    );
    assert!(!funnel.output_path().join("gone").exists());
}

#[tokio::test]
async fn test_missing_src_dir_names_path() {
    let (temp_dir, ctx) = setup();
    let input = temp_dir.path().join("in");
    fs::create_dir_all(&input).unwrap();

    let mut funnel = Funnel::new(ctx, &input, FunnelOptions::new().src_dir("nope")).unwrap();
    let err = funnel.build().await.unwrap_err();

    assert!(matches!(err, Error::MissingInput { .. }));
    assert!(err.to_string().contains("nope"));
}

#[tokio::test]
async fn test_missing_src_dir_allowed_gives_empty_output() {
    let (temp_dir, ctx) = setup();
    let input = temp_dir.path().join("in");
    fs::create_dir_all(&input).unwrap();

    let mut funnel = Funnel::new(
        ctx,
        &input,
        FunnelOptions::new().src_dir("nope").allow_empty(true),
    )
    .unwrap();
    funnel.build().await.unwrap();

    assert!(funnel.output_path().is_dir());
    assert!(files_in(funnel.output_path()).is_empty());
}

#[tokio::test]
async fn test_nothing_matched_is_an_error() {
    let (temp_dir, ctx) = setup();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.css", "a")]);

    let mut funnel = Funnel::new(
        ctx.clone(),
        &input,
        FunnelOptions::new().include(Matcher::glob("*.js").unwrap()),
    )
    .unwrap();
    let err = funnel.build().await.unwrap_err();
    assert!(matches!(err, Error::NothingMatched { .. }));
    assert!(err.to_string().contains("*.js"));

    let mut allowed = Funnel::new(
        ctx,
        &input,
        FunnelOptions::new()
            .include(Matcher::glob("*.js").unwrap())
            .allow_empty(true),
    )
    .unwrap();
    assert!(allowed.build().await.is_ok());
}

#[tokio::test]
async fn test_passthrough_links_whole_tree() {
    let (temp_dir, ctx) = setup();
    let input = temp_dir.path().join("in");
    write(&input, &[("app/a.js", "a")]);

    let mut funnel = Funnel::new(
        ctx,
        &input,
        FunnelOptions::new().src_dir("app").dest_dir("assets"),
    )
    .unwrap();
    assert_eq!(funnel.build().await.unwrap().changes, 1);

    let out = funnel.output_path().join("assets");
    assert_eq!(fs::read_to_string(out.join("a.js")).unwrap(), "a");

    // Files added later are visible through the link without a relink
    write(&input, &[("app/b.js", "b")]);
    if cfg!(unix) {
        assert!(funnel.build().await.unwrap().is_noop());
    } else {
        funnel.build().await.unwrap();
    }
    assert_eq!(fs::read_to_string(out.join("b.js")).unwrap(), "b");
}

#[tokio::test]
async fn test_passthrough_follows_root_disappearing() {
    let (temp_dir, ctx) = setup();
    let input = temp_dir.path().join("in");
    write(&input, &[("app/a.js", "a")]);

    let mut funnel = Funnel::new(
        ctx,
        &input,
        FunnelOptions::new().src_dir("app").allow_empty(true),
    )
    .unwrap();
    funnel.build().await.unwrap();
    assert!(funnel.output_path().join("a.js").exists());

    fs::remove_dir_all(input.join("app")).unwrap();
    assert_eq!(funnel.build().await.unwrap().changes, 1);
    assert!(funnel.output_path().is_dir());
    assert!(files_in(funnel.output_path()).is_empty());
}

#[tokio::test]
async fn test_files_list_and_destination_mapping() {
    let (temp_dir, ctx) = setup();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.js", "a"), ("b.js", "b"), ("c.js", "c")]);

    let mut funnel = Funnel::new(
        ctx,
        &input,
        FunnelOptions::new()
            .files(["a.js", "c.js", "missing.js"])
            .dest_dir("out")
            .get_destination_path(|p| format!("renamed-{p}")),
    )
    .unwrap();
    funnel.build().await.unwrap();

    assert_eq!(
        files_in(funnel.output_path()),
        BTreeSet::from(["out/renamed-a.js".to_string(), "out/renamed-c.js".to_string()])
    );
}

#[tokio::test]
async fn test_destination_collision_is_rejected() {
    let (temp_dir, ctx) = setup();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.js", "a"), ("b.js", "b")]);

    let mut funnel = Funnel::new(
        ctx,
        &input,
        FunnelOptions::new().get_destination_path(|_| "same.js".to_string()),
    )
    .unwrap();
    let err = funnel.build().await.unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("same.js"));
}

#[tokio::test]
async fn test_changed_source_is_relinked() {
    let (temp_dir, ctx) = setup();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.js", "one")]);

    let mut funnel = Funnel::new(
        ctx,
        &input,
        FunnelOptions::new()
            .include(Matcher::glob("*.js").unwrap())
            .link_mode(LinkMode::Copy),
    )
    .unwrap();
    funnel.build().await.unwrap();

    fs::write(input.join("a.js"), "two, longer").unwrap();
    let outcome = funnel.build().await.unwrap();
    assert_eq!(outcome.changes, 1);
    assert_eq!(
        fs::read_to_string(funnel.output_path().join("a.js")).unwrap(),
        "two, longer"
    );
}
