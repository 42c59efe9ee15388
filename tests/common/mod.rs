//! Shared fixtures for bundlemerge integration tests.
//!
//! Every test gets its own store in a temp directory.

#![allow(dead_code)]

use std::path::Path;
use std::process::{Command, Output};

use bundle_store::{
    BundleId, BundleStore, DirBundleStore, MemoryCollection, ResourceCollection, Retention,
};
use tempfile::TempDir;

/// A fresh directory-backed store. Keep the `TempDir` alive for the test.
pub fn fixture_store(device: &str) -> (TempDir, DirBundleStore) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let store = DirBundleStore::open(dir.path().join("store"), device).expect("open store");
    (dir, store)
}

pub fn id(s: &str) -> BundleId {
    s.parse().expect("valid bundle id")
}

/// A read-only in-memory collection of `(name, content)` pairs.
pub fn collection(files: &[(&str, &str)]) -> MemoryCollection {
    files
        .iter()
        .fold(MemoryCollection::new(), |c, (name, body)| c.with_file(name, body))
        .into_read_only()
}

/// Publish `files` under a fixed identity.
pub fn seed(store: &DirBundleStore, bundle: &str, parents: &[&str], files: &[(&str, &str)]) {
    store
        .insert_bundle(
            &id(bundle),
            parents.iter().map(|p| id(p)).collect(),
            &collection(files),
            Retention::Standard,
        )
        .expect("seed bundle");
}

/// Content of `name` in a published bundle, or `None` if absent.
pub fn read(store: &impl BundleStore, bundle: &BundleId, name: &str) -> Option<String> {
    store
        .collection(bundle)
        .expect("open bundle")
        .read_bytes(name)
        .expect("read resource")
        .map(|bytes| String::from_utf8(bytes).expect("utf-8 content"))
}

/// Content of `name` in any collection.
pub fn read_from(collection: &dyn ResourceCollection, name: &str) -> Option<String> {
    collection
        .read_bytes(name)
        .expect("read resource")
        .map(|bytes| String::from_utf8(bytes).expect("utf-8 content"))
}

/// Run the `bundlemerge` binary in `dir` with logging and config isolated.
pub fn bundlemerge_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_bundlemerge"))
        .args(args)
        .current_dir(dir)
        .env_remove("BUNDLEMERGE_LOG")
        .env_remove("BUNDLEMERGE_CONFIG")
        .output()
        .expect("failed to execute bundlemerge")
}

/// Run bundlemerge and assert it succeeds. Returns trimmed stdout.
pub fn bundlemerge_ok(dir: &Path, args: &[&str]) -> String {
    let out = bundlemerge_in(dir, args);
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        out.status.success(),
        "bundlemerge {} failed:\nstdout: {stdout}\nstderr: {stderr}",
        args.join(" ")
    );
    stdout.trim().to_owned()
}

/// Write `files` into `dir`, creating it.
pub fn write_dir(dir: &Path, files: &[(&str, &str)]) {
    std::fs::create_dir_all(dir).expect("create dir");
    for (name, body) in files {
        std::fs::write(dir.join(name), body).expect("write file");
    }
}

/// Run bundlemerge and assert it fails. Returns stderr.
pub fn bundlemerge_fails(dir: &Path, args: &[&str]) -> String {
    let out = bundlemerge_in(dir, args);
    assert!(
        !out.status.success(),
        "expected bundlemerge {} to fail, but it succeeded.\nstdout: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stdout),
    );
    String::from_utf8_lossy(&out.stderr).into_owned()
}
