//! Property-based tests for the branch graph.
//!
//! These tests use proptest to drive random sequences of upserts and
//! deletes through [`BranchTx`] and check that whatever was accepted leaves
//! a well-formed graph behind. The same sequences run against the in-memory
//! backend and against a real repository, so the two must agree on what
//! they accept.
//!
//! [`BranchTx`]: spindle::state::BranchTx

use std::collections::BTreeMap;
use std::sync::Arc;

use proptest::prelude::*;
use tempfile::TempDir;

use spindle::core::types::RefName;
use spindle::git::{Git, Signature};
use spindle::state::{InitStoreRequest, Store, UpsertRequest};
use spindle::storage::{
    Db, GitBackend, GitBackendConfig, MemoryBackend, RetryPolicy, DEFAULT_STORE_REF,
};

const TRUNK: &str = "main";
/// `f` nests over `f/g` and `f/h`, which a git tree cannot hold at once.
const NAMES: &[&str] = &["a", "b", "c", "d", "e", "f", "f/g", "f/h"];

#[derive(Debug, Clone)]
enum Op {
    /// Track or move `NAMES[name]` onto `NAMES[base]`, or the trunk.
    Upsert { name: usize, base: Option<usize> },
    Delete { name: usize },
    Commit,
}

fn op() -> impl Strategy<Value = Op> {
    let name = 0..NAMES.len();
    prop_oneof![
        4 => (name.clone(), prop::option::of(0..NAMES.len()))
            .prop_map(|(name, base)| Op::Upsert { name, base }),
        2 => name.prop_map(|name| Op::Delete { name }),
        1 => Just(Op::Commit),
    ]
}

fn base_name(base: Option<usize>) -> &'static str {
    base.map_or(TRUNK, |i| NAMES[i])
}

/// Every base is the trunk or tracked, and every branch reaches the trunk.
fn check_graph(store: &Store) -> Result<(), TestCaseError> {
    let bases: BTreeMap<String, String> = store
        .list_branches()
        .unwrap()
        .into_iter()
        .map(|name| {
            let base = store.lookup_branch(&name).unwrap().base;
            (name, base)
        })
        .collect();

    for name in bases.keys() {
        let nested = bases.keys().find(|other| other.starts_with(&format!("{name}/")));
        prop_assert!(nested.is_none(), "{name} and {nested:?} both tracked");
    }

    for (name, base) in &bases {
        prop_assert!(
            base == TRUNK || bases.contains_key(base),
            "{name} is based on untracked {base}"
        );

        let mut current = name.as_str();
        let mut steps = 0;
        while current != TRUNK {
            prop_assert!(steps <= bases.len(), "cycle through {name}");
            current = &bases[current];
            steps += 1;
        }
    }
    Ok(())
}

/// Apply `ops` through one transaction, committing at every `Commit` and
/// at the end, checking the graph after each commit.
fn run_ops(store: &Store, ops: Vec<Op>) -> Result<(), TestCaseError> {
    let mut tx = store.begin_branch_tx();

    for op in ops {
        match op {
            Op::Upsert { name, base } => {
                let _ = tx.upsert(UpsertRequest::new(NAMES[name]).base(base_name(base)));
            }
            Op::Delete { name } => {
                let _ = tx.delete(NAMES[name]);
            }
            Op::Commit => {
                tx.commit("step").unwrap();
                check_graph(store)?;
            }
        }
    }

    let pending = tx.branches().unwrap();
    tx.commit("final").unwrap();
    check_graph(store)?;
    prop_assert_eq!(store.list_branches().unwrap(), pending);
    Ok(())
}

fn memory_store() -> Store {
    let db = Db::new(Arc::new(MemoryBackend::new()));
    Store::init(db, InitStoreRequest::new(TRUNK)).unwrap()
}

fn git_store() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let git = Git::init(dir.path()).unwrap();
    let config = GitBackendConfig {
        refname: RefName::new(DEFAULT_STORE_REF).unwrap(),
        signature: Signature::new("Test User", "test@example.com"),
        retry: RetryPolicy::default(),
    };
    let db = Db::new(Arc::new(GitBackend::new(git, config)));
    let store = Store::init(db, InitStoreRequest::new(TRUNK)).unwrap();
    (dir, store)
}

proptest! {
    /// Accepted operations never produce cycles, dangling bases or name
    /// conflicts, whether they are committed one at a time or in batches.
    #[test]
    fn graph_stays_well_formed(ops in prop::collection::vec(op(), 1..40)) {
        run_ops(&memory_store(), ops)?;
    }

    /// Upserting a branch onto something it already supports is rejected
    /// and leaves the transaction untouched.
    #[test]
    fn cycles_rejected(depth in 2usize..6) {
        let store = memory_store();
        let mut tx = store.begin_branch_tx();

        let chain: Vec<String> = (0..depth).map(|i| format!("b{i}")).collect();
        let mut base = TRUNK.to_string();
        for name in &chain {
            tx.upsert(UpsertRequest::new(name).base(&base)).unwrap();
            base = name.clone();
        }

        let top = chain.last().unwrap();
        let err = tx.upsert(UpsertRequest::new(&chain[0]).base(top)).unwrap_err();
        let expected = format!("{} -> {}", chain[0], chain[1]);
        prop_assert!(err.to_string().contains(&expected), "{}", err);

        tx.commit("chain").unwrap();
        prop_assert_eq!(store.lookup_branch(&chain[0]).unwrap().base, TRUNK);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// The same sequences against a real repository.
    #[test]
    fn graph_stays_well_formed_in_git(ops in prop::collection::vec(op(), 1..40)) {
        let (_dir, store) = git_store();
        run_ops(&store, ops)?;
    }
}
