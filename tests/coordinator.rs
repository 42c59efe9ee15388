//! N-way fork reduction and all-or-nothing publication.

mod common;

use std::io::{self, Read};
use std::time::SystemTime;

use bundle_store::{
    BundleGraph, BundleId, BundleManifest, BundleSpec, BundleStore, MemoryBundleStore,
    ResourceCollection, ResourceSink, Retention, StoreError,
};
use bundlemerge::merge::{CoordinatorError, MergeCoordinator};

use common::{collection, fixture_store, id, read, read_from, seed};

#[test]
fn three_forks_reduce_to_one_snapshot() {
    let (_dir, mut store) = fixture_store("desk");
    seed(&store, "desk-100-data", &[], &[("1.dat", "A=1\nB=1\nC=1\n")]);
    seed(&store, "desk-200-data", &["desk-100-data"], &[("1.dat", "A=2\nB=1\nC=1\n")]);
    seed(&store, "phone-300-data", &["desk-100-data"], &[("1.dat", "A=1\nB=2\nC=1\n")]);
    seed(&store, "tablet-400-data", &["desk-100-data"], &[("1.dat", "A=1\nB=1\nC=2\n")]);

    let forks = [id("tablet-400-data"), id("desk-200-data"), id("phone-300-data")];
    let outcome = MergeCoordinator::new(&mut store).merge_forks(&forks).unwrap();

    assert_eq!(read(&store, &outcome.bundle, "1.dat").unwrap(), "A=2\nB=2\nC=2\n");

    // Rounds run in creation order, each against the shared base.
    let merged: Vec<_> = outcome.rounds.iter().map(|r| r.fork.to_string()).collect();
    assert_eq!(merged, ["phone-300-data", "tablet-400-data"]);
    for round in &outcome.rounds {
        assert_eq!(round.ancestor, Some(id("desk-100-data")));
    }
    assert_eq!(store.manifest(&outcome.bundle).unwrap().parents, forks);
}

#[test]
fn duplicate_forks_collapse() {
    let (_dir, mut store) = fixture_store("desk");
    seed(&store, "desk-100-data", &[], &[("1.dat", "A=1\n")]);
    seed(&store, "desk-200-data", &["desk-100-data"], &[("1.dat", "A=2\n")]);
    seed(&store, "phone-300-data", &["desk-100-data"], &[("2.dat", "B=1\n")]);

    let outcome = MergeCoordinator::new(&mut store)
        .merge_forks(&[
            id("desk-200-data"),
            id("phone-300-data"),
            id("desk-200-data"),
        ])
        .unwrap();

    assert_eq!(outcome.rounds.len(), 1);
    assert_eq!(
        store.manifest(&outcome.bundle).unwrap().parents,
        [id("desk-200-data"), id("phone-300-data")]
    );
}

#[test]
fn merge_of_merges_finds_the_previous_snapshot() {
    let (_dir, mut store) = fixture_store("desk");
    seed(&store, "desk-100-data", &[], &[("1.dat", "A=1\nB=1\n")]);
    seed(&store, "desk-200-data", &["desk-100-data"], &[("1.dat", "A=2\nB=1\n")]);
    seed(&store, "phone-300-data", &["desk-100-data"], &[("1.dat", "A=1\nB=2\n")]);
    let first = MergeCoordinator::new(&mut store)
        .merge_forks(&[id("desk-200-data"), id("phone-300-data")])
        .unwrap()
        .bundle;

    // phone keeps editing from its own fork while desk moves on from the merge.
    let phone_next = id("phone-900000000000000-data");
    store
        .insert_bundle(
            &phone_next,
            vec![id("phone-300-data")],
            &collection(&[("1.dat", "A=1\nB=3\n")]),
            Retention::Standard,
        )
        .unwrap();

    let outcome = MergeCoordinator::new(&mut store)
        .merge_forks(&[first, phone_next])
        .unwrap();

    assert_eq!(outcome.rounds[0].ancestor, Some(id("phone-300-data")));
    assert_eq!(read(&store, &outcome.bundle, "1.dat").unwrap(), "A=2\nB=3\n");
}

#[test]
fn search_depth_bounds_ancestor_discovery() {
    let (_dir, mut store) = fixture_store("desk");
    seed(&store, "desk-100-data", &[], &[("1.dat", "A=1\nB=1\n")]);
    seed(&store, "desk-200-data", &["desk-100-data"], &[("1.dat", "A=1\nB=1\n")]);
    seed(&store, "desk-300-data", &["desk-200-data"], &[("1.dat", "A=2\nB=1\n")]);
    seed(&store, "phone-400-data", &["desk-100-data"], &[("1.dat", "A=1\nB=2\n")]);
    let forks = [id("desk-300-data"), id("phone-400-data")];

    let shallow = MergeCoordinator::new(&mut store)
        .max_depth(1)
        .merge_forks(&forks)
        .unwrap();
    assert_eq!(shallow.rounds[0].ancestor, None);
    // Without a base every differing key is a conflict, so phone wins both.
    assert_eq!(read(&store, &shallow.bundle, "1.dat").unwrap(), "A=1\nB=2\n");

    let deep = MergeCoordinator::new(&mut store).merge_forks(&forks).unwrap();
    assert_eq!(deep.rounds[0].ancestor, Some(id("desk-100-data")));
    assert_eq!(read(&store, &deep.bundle, "1.dat").unwrap(), "A=2\nB=2\n");
}

#[test]
fn missing_fork_publishes_nothing() {
    let (dir, mut store) = fixture_store("desk");
    seed(&store, "desk-100-data", &[], &[("1.dat", "A=1\n")]);
    let before = store.list().unwrap();

    let result = MergeCoordinator::new(&mut store)
        .scratch_root(dir.path())
        .merge_forks(&[id("desk-100-data"), id("phone-200-data")]);

    assert!(matches!(result, Err(CoordinatorError::Store(ref e)) if e.is_not_found()));
    assert_eq!(store.list().unwrap(), before);
    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers, ["store"]);
}

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// A store that fails reads of one bundle's content, loses one bundle's
/// content while still knowing its parents, or fails every publish.
struct FaultyStore {
    inner: MemoryBundleStore,
    unreadable: Option<BundleId>,
    collected: Option<BundleId>,
    refuse_publish: bool,
}

impl BundleGraph for FaultyStore {
    fn parents(&self, id: &BundleId) -> bundle_store::Result<Vec<BundleId>> {
        self.inner.parents(id)
    }
}

impl BundleStore for FaultyStore {
    fn collection(&self, id: &BundleId) -> bundle_store::Result<Box<dyn ResourceCollection>> {
        if self.collected.as_ref() == Some(id) {
            return Err(StoreError::not_found(format!("bundle `{id}`")));
        }
        let content = self.inner.collection(id)?;
        if self.unreadable.as_ref() == Some(id) {
            return Ok(Box::new(Unreadable(content)));
        }
        Ok(content)
    }

    fn manifest(&self, id: &BundleId) -> bundle_store::Result<BundleManifest> {
        self.inner.manifest(id)
    }

    fn store_bundle(&mut self, spec: BundleSpec<'_>) -> bundle_store::Result<BundleId> {
        if self.refuse_publish {
            return Err(io::Error::other("disk full").into());
        }
        self.inner.store_bundle(spec)
    }

    fn list(&self) -> bundle_store::Result<Vec<BundleId>> {
        self.inner.list()
    }
}

/// Lists and checksums normally, but every read fails.
struct Unreadable(Box<dyn ResourceCollection>);

impl ResourceCollection for Unreadable {
    fn list_names(&self) -> bundle_store::Result<Vec<String>> {
        self.0.list_names()
    }

    fn checksum(&self, name: &str) -> bundle_store::Result<Option<u64>> {
        self.0.checksum(name)
    }

    fn last_modified(&self, name: &str) -> bundle_store::Result<Option<SystemTime>> {
        self.0.last_modified(name)
    }

    fn open_read(&self, _name: &str) -> bundle_store::Result<Option<Box<dyn Read + '_>>> {
        Err(io::Error::other("bad sector").into())
    }

    fn open_write(
        &mut self,
        name: &str,
        _modified: SystemTime,
    ) -> bundle_store::Result<Box<dyn ResourceSink + '_>> {
        Err(StoreError::ReadOnly {
            name: name.to_owned(),
        })
    }
}

fn faulty_store() -> FaultyStore {
    let mut inner = MemoryBundleStore::new("desk");
    for (bundle, parents, body) in [
        ("desk-100-data", vec![], "A=1\nB=1\n"),
        ("desk-200-data", vec![id("desk-100-data")], "A=2\nB=1\n"),
        ("phone-300-data", vec![id("desk-100-data")], "A=1\nB=2\n"),
    ] {
        inner
            .insert_bundle(id(bundle), parents, &collection(&[("1.dat", body)]), Retention::Standard)
            .unwrap();
    }
    FaultyStore {
        inner,
        unreadable: None,
        collected: None,
        refuse_publish: false,
    }
}

#[test]
fn read_failure_mid_merge_publishes_nothing() {
    let scratch = tempfile::tempdir().unwrap();
    let mut store = faulty_store();
    store.unreadable = Some(id("phone-300-data"));

    let result = MergeCoordinator::new(&mut store)
        .scratch_root(scratch.path())
        .merge_forks(&[id("desk-200-data"), id("phone-300-data")]);

    let Err(CoordinatorError::Merge { fork, .. }) = &result else {
        panic!("expected a merge failure, got {result:?}");
    };
    assert_eq!(*fork, id("phone-300-data"));
    assert_eq!(store.list().unwrap().len(), 3);
    assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
}

#[test]
fn publish_failure_is_reported() {
    let mut store = faulty_store();
    store.refuse_publish = true;

    let result = MergeCoordinator::new(&mut store)
        .merge_forks(&[id("desk-200-data"), id("phone-300-data")]);

    assert!(matches!(result, Err(CoordinatorError::Store(StoreError::Io(_)))));
    assert_eq!(store.list().unwrap().len(), 3);
}

#[test]
fn ancestor_collected_mid_merge_falls_back_to_empty_parent() {
    let mut store = faulty_store();
    store.collected = Some(id("desk-100-data"));

    let outcome = MergeCoordinator::new(&mut store)
        .merge_forks(&[id("desk-200-data"), id("phone-300-data")])
        .unwrap();

    // The search still names the base; its content is gone, so every
    // differing key is a conflict and the later fork wins.
    assert_eq!(outcome.rounds[0].ancestor, Some(id("desk-100-data")));
    let merged = store.inner.collection(&outcome.bundle).unwrap();
    assert_eq!(read_from(merged.as_ref(), "1.dat").unwrap(), "A=1\nB=2\n");
}
