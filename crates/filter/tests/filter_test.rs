//! Integration tests for the Persistent Filter node

use filter::{ContentTransformer, FilterOptions, PersistentFilter, TransformResult};
use loam_core::{BuildContext, Error, LinkMode, Node, Settings};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Uppercases content and counts invocations
struct Shout {
    calls: Arc<AtomicUsize>,
}

impl ContentTransformer for Shout {
    fn name(&self) -> &str {
        "shout"
    }

    fn process_string(&self, content: &str, relative_path: &str) -> anyhow::Result<TransformResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if content.contains("syntax error") {
            anyhow::bail!("unexpected token in {relative_path}");
        }
        Ok(content.to_uppercase().into())
    }
}

/// Keeps only the first line, so trailing edits do not change the output
struct FirstLine;

impl ContentTransformer for FirstLine {
    fn name(&self) -> &str {
        "first-line"
    }

    fn process_string(&self, content: &str, _: &str) -> anyhow::Result<TransformResult> {
        Ok(content.lines().next().unwrap_or_default().into())
    }
}

/// Drops every result in post-processing
struct Forgetful;

impl ContentTransformer for Forgetful {
    fn name(&self) -> &str {
        "forgetful"
    }

    fn process_string(&self, content: &str, _: &str) -> anyhow::Result<TransformResult> {
        Ok(content.into())
    }

    fn post_process(&self, _: TransformResult, _: &str) -> anyhow::Result<Option<TransformResult>> {
        Ok(None)
    }
}

/// Takes a while per file
struct Slow;

impl ContentTransformer for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn process_string(&self, content: &str, _: &str) -> anyhow::Result<TransformResult> {
        std::thread::sleep(Duration::from_millis(100));
        Ok(content.into())
    }
}

fn write(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }
}

fn settings(cache_root: &Path) -> Settings {
    Settings {
        cache_root: cache_root.to_path_buf(),
        persistence_allowed: true,
        ..Settings::default()
    }
}

fn shout(calls: &Arc<AtomicUsize>) -> Arc<dyn ContentTransformer> {
    Arc::new(Shout {
        calls: calls.clone(),
    })
}

#[tokio::test]
async fn test_transforms_and_mirrors_tree() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.txt", "hello"), ("lib/b.txt", "world"), ("logo.png", "png")]);
    let ctx = BuildContext::new(temp_dir.path().join("work"), settings(&temp_dir.path().join("cache")));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut node = PersistentFilter::new(
        ctx,
        &input,
        shout(&calls),
        FilterOptions::new().extensions(["txt"]),
    )
    .unwrap();
    node.build().await.unwrap();

    let out = node.output_path();
    assert_eq!(fs::read_to_string(out.join("a.txt")).unwrap(), "HELLO");
    assert_eq!(fs::read_to_string(out.join("lib/b.txt")).unwrap(), "WORLD");
    assert_eq!(fs::read_to_string(out.join("logo.png")).unwrap(), "png");
    assert_eq!(node.stats().processed, 2);
    assert_eq!(node.stats().linked, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_second_build_touches_nothing() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.txt", "hello")]);
    let ctx = BuildContext::new(temp_dir.path().join("work"), settings(&temp_dir.path().join("cache")));
    let calls = Arc::new(AtomicUsize::new(0));

    let mut node = PersistentFilter::new(ctx, &input, shout(&calls), FilterOptions::new()).unwrap();
    node.build().await.unwrap();
    let before = fs::read(node.output_path().join("a.txt")).unwrap();

    let outcome = node.build().await.unwrap();
    assert!(outcome.is_noop());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fs::read(node.output_path().join("a.txt")).unwrap(), before);
}

#[tokio::test]
async fn test_persistent_cache_survives_new_instance() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    let cache_root = temp_dir.path().join("cache");
    write(&input, &[("a.txt", "hello")]);
    let calls = Arc::new(AtomicUsize::new(0));

    for round in 0..2 {
        // A fresh context per round behaves like a new process
        let ctx = BuildContext::new(temp_dir.path().join(format!("work{round}")), settings(&cache_root));
        let mut node = PersistentFilter::new(
            ctx,
            &input,
            shout(&calls),
            FilterOptions::new().persist(true),
        )
        .unwrap();
        assert!(node.cache().is_persistent());
        node.build().await.unwrap();
        assert_eq!(fs::read_to_string(node.output_path().join("a.txt")).unwrap(), "HELLO");

        let stats = node.stats();
        if round == 0 {
            assert_eq!(stats.cache_misses, 1);
        } else {
            assert_eq!(stats.cache_hits, 1);
        }
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // New content is a new key
    write(&input, &[("a.txt", "hello again")]);
    let ctx = BuildContext::new(temp_dir.path().join("work-final"), settings(&cache_root));
    let mut node = PersistentFilter::new(ctx, &input, shout(&calls), FilterOptions::new().persist(true)).unwrap();
    node.build().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_ci_without_force_does_not_persist() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.txt", "hello")]);
    let mut ci = settings(&temp_dir.path().join("cache"));
    ci.persistence_allowed = false;
    let ctx = BuildContext::new(temp_dir.path().join("work"), ci);
    let calls = Arc::new(AtomicUsize::new(0));

    let node = PersistentFilter::new(ctx, &input, shout(&calls), FilterOptions::new().persist(true)).unwrap();
    assert!(!node.cache().is_persistent());
}

#[tokio::test]
async fn test_change_with_identical_output_skips_write() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.txt", "title\nbody")]);
    let ctx = BuildContext::new(temp_dir.path().join("work"), Settings::default());

    let mut node = PersistentFilter::new(ctx, &input, Arc::new(FirstLine), FilterOptions::new()).unwrap();
    node.build().await.unwrap();

    let output = node.output_path().join("a.txt");
    let old = filetime::FileTime::from_system_time(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000));
    filetime::set_file_mtime(&output, old).unwrap();

    write(&input, &[("a.txt", "title\nmuch longer body")]);
    let outcome = node.build().await.unwrap();

    assert_eq!(outcome.changes, 1);
    assert_eq!(node.stats().skipped_writes, 1);
    assert_eq!(node.stats().writes, 0);
    let mtime = filetime::FileTime::from_last_modification_time(&fs::metadata(&output).unwrap());
    assert_eq!(mtime, old);

    // A different first line is written
    write(&input, &[("a.txt", "new title\nmuch longer body")]);
    node.build().await.unwrap();
    assert_eq!(node.stats().writes, 1);
    assert_eq!(fs::read_to_string(&output).unwrap(), "new title");
}

#[tokio::test]
async fn test_transform_error_is_annotated() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    write(&input, &[("ok.txt", "fine"), ("lib/bad.txt", "syntax error here")]);
    let ctx = BuildContext::new(temp_dir.path().join("work"), Settings::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut node = PersistentFilter::new(ctx, &input, shout(&calls), FilterOptions::new()).unwrap();
    let err = node.build().await.unwrap_err();

    match &err {
        Error::Transform {
            relative_path,
            src_dir,
            ..
        } => {
            assert_eq!(relative_path, "lib/bad.txt");
            assert_eq!(src_dir, &input);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("unexpected token"));

    // The failed build is retried in full once the input is fixed
    write(&input, &[("lib/bad.txt", "now fine")]);
    node.build().await.unwrap();
    assert_eq!(fs::read_to_string(node.output_path().join("lib/bad.txt")).unwrap(), "NOW FINE");
    assert_eq!(fs::read_to_string(node.output_path().join("ok.txt")).unwrap(), "FINE");
}

#[tokio::test]
async fn test_missing_post_process_output_is_fatal() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.txt", "x")]);
    let ctx = BuildContext::new(temp_dir.path().join("work"), Settings::default());

    let mut node = PersistentFilter::new(ctx, &input, Arc::new(Forgetful), FilterOptions::new()).unwrap();
    let err = node.build().await.unwrap_err();
    assert!(matches!(err, Error::MissingPostProcessOutput { .. }));
    assert!(err.is_config());
}

#[tokio::test]
async fn test_target_extension_and_unlink() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    write(&input, &[("src/a.ts", "let a"), ("src/b.ts", "let b"), ("readme.md", "docs")]);
    let ctx = BuildContext::new(temp_dir.path().join("work"), Settings::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut node = PersistentFilter::new(
        ctx,
        &input,
        shout(&calls),
        FilterOptions::new()
            .extensions(["ts"])
            .target_extension("js")
            .link_mode(LinkMode::Copy),
    )
    .unwrap();
    node.build().await.unwrap();

    let out = node.output_path().to_path_buf();
    assert_eq!(fs::read_to_string(out.join("src/a.js")).unwrap(), "LET A");
    assert!(!out.join("src/a.ts").exists());
    assert_eq!(fs::read_to_string(out.join("readme.md")).unwrap(), "docs");

    fs::remove_file(input.join("src/b.ts")).unwrap();
    fs::remove_file(input.join("readme.md")).unwrap();
    node.build().await.unwrap();
    assert!(!out.join("src/b.js").exists());
    assert!(!out.join("readme.md").exists());
    assert!(out.join("src/a.js").exists());
}

#[tokio::test]
async fn test_inline_mode_matches_queued_mode() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    let files: Vec<(String, String)> = (0..20)
        .map(|i| (format!("d{}/f{i}.txt", i % 4), format!("file {i}")))
        .collect();
    let refs: Vec<(&str, &str)> = files.iter().map(|(p, c)| (p.as_str(), c.as_str())).collect();
    write(&input, &refs);
    let ctx = BuildContext::new(temp_dir.path().join("work"), Settings::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut queued = PersistentFilter::new(
        ctx.clone(),
        &input,
        shout(&calls),
        FilterOptions::new().concurrency(3),
    )
    .unwrap();
    let mut inline = PersistentFilter::new(ctx, &input, shout(&calls), FilterOptions::new().async_mode(false)).unwrap();
    queued.build().await.unwrap();
    inline.build().await.unwrap();

    for (path, content) in &files {
        let expected = content.to_uppercase();
        assert_eq!(fs::read_to_string(queued.output_path().join(path)).unwrap(), expected);
        assert_eq!(fs::read_to_string(inline.output_path().join(path)).unwrap(), expected);
    }
}

#[tokio::test]
async fn test_slow_transform_is_awaited_without_timeout() {
    // Nodes impose no per-file deadline: a slow transform simply delays
    // the build until it finishes.
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.txt", "a"), ("b.txt", "b")]);
    let ctx = BuildContext::new(temp_dir.path().join("work"), Settings::default());

    let mut node = PersistentFilter::new(ctx, &input, Arc::new(Slow), FilterOptions::new().concurrency(1)).unwrap();
    let started = std::time::Instant::now();
    node.build().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(fs::read_to_string(node.output_path().join("b.txt")).unwrap(), "b");
}

#[tokio::test]
async fn test_boxed_node_builds_on_spawned_task() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    write(&input, &[("a.txt", "one"), ("b.txt", "two"), ("c/d.txt", "three")]);
    let ctx = BuildContext::new(temp_dir.path().join("work"), Settings::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut node: Box<dyn Node> = Box::new(
        PersistentFilter::new(ctx, &input, shout(&calls), FilterOptions::new().concurrency(2)).unwrap(),
    );
    let node = tokio::spawn(async move {
        node.build().await.unwrap();
        node
    })
    .await
    .unwrap();

    assert_eq!(fs::read_to_string(node.output_path().join("c/d.txt")).unwrap(), "THREE");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failed_build_does_not_leave_stale_output() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    let parked = temp_dir.path().join("parked.txt");
    write(&input, &[("a.txt", "alpha"), ("b.txt", "beta")]);
    let ctx = BuildContext::new(temp_dir.path().join("work"), Settings::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut node = PersistentFilter::new(ctx, &input, shout(&calls), FilterOptions::new()).unwrap();
    node.build().await.unwrap();

    // The unlink of a.txt lands before b.txt fails to transform
    fs::rename(input.join("a.txt"), &parked).unwrap();
    write(&input, &[("b.txt", "syntax error")]);
    node.build().await.unwrap_err();

    // Restoring a.txt keeps its size and mtime, so only a rebuild from
    // scratch brings it back
    fs::rename(&parked, input.join("a.txt")).unwrap();
    write(&input, &[("b.txt", "fine")]);
    node.build().await.unwrap();

    let out = node.output_path();
    assert_eq!(fs::read_to_string(out.join("a.txt")).unwrap(), "ALPHA");
    assert_eq!(fs::read_to_string(out.join("b.txt")).unwrap(), "FINE");
}

#[tokio::test]
async fn test_invalid_utf8_is_decoded_lossily() {
    let temp_dir = tempfile::tempdir().unwrap();
    let input = temp_dir.path().join("in");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("latin1.txt"), b"caf\xe9 au lait").unwrap();
    let ctx = BuildContext::new(temp_dir.path().join("work"), Settings::default());
    let calls = Arc::new(AtomicUsize::new(0));

    let mut node = PersistentFilter::new(ctx, &input, shout(&calls), FilterOptions::new()).unwrap();
    node.build().await.unwrap();

    assert_eq!(
        fs::read_to_string(node.output_path().join("latin1.txt")).unwrap(),
        "CAF\u{FFFD} AU LAIT"
    );
}
