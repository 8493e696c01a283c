use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::*;
use crate::test_support::{FakeCompressor, FakeVolume};

struct Harness {
    engine: FileDecisionEngine,
    cache: Arc<ChangeCache>,
    stats: Arc<RunStatistics>,
    compressor: Arc<FakeCompressor>,
    volume: Arc<FakeVolume>,
}

fn harness_with(compressor: FakeCompressor, volume: Arc<FakeVolume>) -> Harness {
    let cache = Arc::new(ChangeCache::in_memory());
    let stats = Arc::new(RunStatistics::new());
    let compressor = Arc::new(compressor);
    let engine = FileDecisionEngine::new(
        Arc::clone(&cache),
        Arc::clone(&stats),
        Arc::clone(&compressor) as Arc<dyn Compressor>,
        Arc::clone(&volume) as Arc<dyn Volume>,
        ExtensionFilter::from_extensions([".tmp"]),
    );
    Harness {
        engine,
        cache,
        stats,
        compressor,
        volume,
    }
}

fn harness() -> Harness {
    harness_with(FakeCompressor::new(), Arc::new(FakeVolume::new()))
}

fn id(path: &str) -> PathIdentity {
    PathIdentity::new(Path::new(path))
}

#[test]
fn excluded_extension_is_skipped_without_compression() {
    let h = harness();
    h.volume.set_file("/data/b.tmp", 300, 512);

    let outcome = h.engine.handle(Path::new("/data/b.tmp")).unwrap();

    assert_eq!(outcome, Outcome::SkippedExtension);
    assert!(h.compressor.calls().is_empty());
    assert!(h.cache.is_empty());
    let snap = h.stats.snapshot();
    assert_eq!(snap.skipped_extension, 1);
    assert_eq!(snap.logical_bytes, 300);
    assert_eq!(snap.physical_bytes, 512);
}

#[test]
fn system_file_is_skipped() {
    let h = harness();
    h.volume.set_file("/data/pagefile.sys", 4096, 4096);
    h.volume.mark_system("/data/pagefile.sys");

    let outcome = h.engine.handle(Path::new("/data/pagefile.sys")).unwrap();

    assert_eq!(outcome, Outcome::SkippedAttribute);
    assert!(h.compressor.calls().is_empty());
    assert_eq!(h.stats.snapshot().skipped_attribute, 1);
}

#[test]
fn extension_check_wins_over_attribute_check() {
    let h = harness();
    h.volume.set_file("/data/x.tmp", 10, 10);
    h.volume.mark_system("/data/x.tmp");

    assert_eq!(
        h.engine.handle(Path::new("/data/x.tmp")).unwrap(),
        Outcome::SkippedExtension
    );
}

#[test]
fn uncached_file_is_processed_and_cached() {
    let h = harness();
    h.volume.set_file("/data/a.txt", 500, 512);

    let outcome = h.engine.handle(Path::new("/data/a.txt")).unwrap();

    assert_eq!(outcome, Outcome::Processed);
    assert_eq!(
        h.compressor.calls(),
        vec![(PathBuf::from("/data/a.txt"), false)]
    );
    assert_eq!(h.cache.lookup(id("/data/a.txt")), Some(500));
    let snap = h.stats.snapshot();
    assert_eq!(snap.processed, 1);
    assert_eq!(snap.bytes_read, 512);
    assert_eq!(snap.bytes_written, 512);
}

#[test]
fn unchanged_size_is_skipped() {
    let h = harness();
    h.volume.set_file("/data/a.txt", 500, 512);
    h.cache.upsert(id("/data/a.txt"), 500);

    let outcome = h.engine.handle(Path::new("/data/a.txt")).unwrap();

    assert_eq!(outcome, Outcome::SkippedUnchanged);
    assert!(h.compressor.calls().is_empty());
    assert_eq!(h.cache.lookup(id("/data/a.txt")), Some(500));
    assert_eq!(h.stats.snapshot().physical_bytes, 512);
}

#[test]
fn changed_size_is_processed_and_cache_updated() {
    let h = harness();
    h.volume.set_file("/data/a.txt", 700, 1024);
    h.cache.upsert(id("/data/a.txt"), 500);

    let outcome = h.engine.handle(Path::new("/data/a.txt")).unwrap();

    assert_eq!(outcome, Outcome::Processed);
    assert_eq!(h.cache.lookup(id("/data/a.txt")), Some(700));
}

#[test]
fn zero_length_file_is_never_compressed() {
    let h = harness();
    h.volume.set_file("/data/empty.txt", 0, 0);

    let outcome = h.engine.handle(Path::new("/data/empty.txt")).unwrap();

    assert_eq!(outcome, Outcome::Empty);
    assert!(h.compressor.calls().is_empty());
    assert!(h.cache.is_empty());
    assert_eq!(h.stats.snapshot().empty, 1);
}

#[test]
fn weaker_compression_is_cleared_and_forced() {
    let h = harness();
    h.volume.set_file("/data/old.txt", 800, 512);
    h.volume.mark_compressed("/data/old.txt");

    h.engine.handle(Path::new("/data/old.txt")).unwrap();

    assert_eq!(h.volume.cleared(), vec![PathBuf::from("/data/old.txt")]);
    assert_eq!(
        h.compressor.calls(),
        vec![(PathBuf::from("/data/old.txt"), true)]
    );
}

#[test]
fn post_compression_size_is_measured_again() {
    let volume = Arc::new(FakeVolume::new());
    volume.set_file("/data/a.txt", 10_000, 12_288);
    let shrink = Arc::clone(&volume);
    let compressor = FakeCompressor::new().on_compress(move |path| {
        shrink.set_file(path.to_path_buf(), 10_000, 4096);
    });
    let h = harness_with(compressor, volume);

    h.engine.handle(Path::new("/data/a.txt")).unwrap();

    let snap = h.stats.snapshot();
    assert_eq!(snap.bytes_read, 12_288);
    assert_eq!(snap.bytes_written, 4096);
    assert_eq!(snap.physical_bytes, 4096);
    assert_eq!(snap.logical_bytes, 10_000);
    assert_eq!(snap.inflated, 0);
}

#[test]
fn growth_after_compression_is_counted_not_fatal() {
    let volume = Arc::new(FakeVolume::new());
    volume.set_file("/data/a.bin", 100, 4096);
    let grow = Arc::clone(&volume);
    let compressor = FakeCompressor::new().on_compress(move |path| {
        grow.set_file(path.to_path_buf(), 100, 8192);
    });
    let h = harness_with(compressor, volume);

    let outcome = h.engine.handle(Path::new("/data/a.bin")).unwrap();

    assert_eq!(outcome, Outcome::Processed);
    assert_eq!(h.stats.snapshot().inflated, 1);
}

#[test]
fn failed_invocation_still_records_the_file() {
    let volume = Arc::new(FakeVolume::new());
    volume.set_file("/data/a.txt", 500, 512);
    let h = harness_with(FakeCompressor::new().failing_exit(), volume);

    assert_eq!(
        h.engine.handle(Path::new("/data/a.txt")).unwrap(),
        Outcome::Processed
    );
    assert_eq!(h.cache.lookup(id("/data/a.txt")), Some(500));
}

#[test]
fn unlaunchable_compressor_still_records_the_file() {
    let volume = Arc::new(FakeVolume::new());
    volume.set_file("/data/a.txt", 500, 512);
    let h = harness_with(FakeCompressor::new().failing_spawn(), volume);

    assert_eq!(
        h.engine.handle(Path::new("/data/a.txt")).unwrap(),
        Outcome::Processed
    );
    assert_eq!(h.stats.snapshot().processed, 1);
}

#[test]
fn unreadable_file_counts_as_failure() {
    let h = harness();

    assert_eq!(h.engine.visit(Path::new("/definitely/not/here.txt")), None);

    let snap = h.stats.snapshot();
    assert_eq!(snap.failed, 1);
    assert_eq!(snap.skipped() + snap.processed, 0);
    assert_eq!(snap.logical_bytes, 0);
}

#[test]
fn failed_remeasure_adds_no_bytes() {
    let volume = Arc::new(FakeVolume::new());
    volume.set_file("/data/vanishing.txt", 700, 1024);
    let drop_override = Arc::clone(&volume);
    let compressor = FakeCompressor::new().on_compress(move |path| {
        drop_override.forget(path);
    });
    let h = harness_with(compressor, volume);

    assert_eq!(h.engine.visit(Path::new("/data/vanishing.txt")), None);

    let snap = h.stats.snapshot();
    assert_eq!(snap.failed, 1);
    assert_eq!(snap.processed, 0);
    assert_eq!(snap.logical_bytes, 0);
    assert_eq!(snap.physical_bytes, 0);
    assert_eq!(snap.bytes_read, 0);
    assert!(h.cache.lookup(id("/data/vanishing.txt")).is_none());
}

#[test]
fn physical_total_is_the_sum_of_per_file_contributions() {
    let h = harness();
    h.volume.set_file("/data/a.txt", 500, 512);
    h.volume.set_file("/data/b.tmp", 100, 4096);
    h.volume.set_file("/data/c.txt", 0, 0);
    h.volume.set_file("/data/d.txt", 900, 1024);
    h.cache.upsert(id("/data/d.txt"), 900);

    for path in ["/data/a.txt", "/data/b.tmp", "/data/c.txt", "/data/d.txt"] {
        h.engine.visit(Path::new(path)).unwrap();
    }

    let snap = h.stats.snapshot();
    assert_eq!(snap.physical_bytes, 512 + 4096 + 1024);
    assert_eq!(snap.logical_bytes, 500 + 100 + 900);
    assert_eq!(snap.files_visited(), 4);
}
