//! Write-path invariants: batch atomicity, last-writer-wins, engine
//! timestamping, and validation at the execute boundary.

use std::sync::atomic::{AtomicBool, Ordering};

use crudo::{Context, CrudError, MemStore, Record, Store, Value};

/// Delegating store whose commits can be failed on demand, for observing
/// what a failed execute leaves behind.
struct FlakyStore {
    inner: MemStore,
    fail_commits: AtomicBool,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemStore::new(),
            fail_commits: AtomicBool::new(false),
        }
    }
}

impl Store for FlakyStore {
    fn init(&mut self, config: &str) -> crudo::Result<()> {
        self.inner.init(config)
    }

    fn commit(&self, records: &[Record]) -> crudo::Result<()> {
        if self.fail_commits.load(Ordering::Acquire) {
            return Err(CrudError::Store("injected commit failure".into()));
        }
        self.inner.commit(records)
    }

    fn is_new(&self, kind: &str, id: &str) -> crudo::Result<bool> {
        self.inner.is_new(kind, id)
    }

    fn get_entity(&self, kind: &str, id: &str) -> crudo::Result<Vec<Record>> {
        self.inner.get_entity(kind, id)
    }
}

#[test]
fn execute_then_read_reflects_every_scalar() {
    let ctx = Context::new(MemStore::new());
    let mut update = crudo::get("Post", "post_a");
    update
        .set_source("uid_a")
        .set("body", "first draft")
        .set("body", "final draft")
        .set("url", "www.example.com");
    update.execute(&ctx).expect("execute");

    let post = ctx.read_entity("Post", "post_a").expect("read");
    assert_eq!(post.scalar("body"), Some(&Value::Str("final draft".into())));
    assert_eq!(post.scalar("url"), Some(&Value::Str("www.example.com".into())));
}

#[test]
fn latest_batch_wins_across_commits() {
    let ctx = Context::new(MemStore::new());
    let mut update = crudo::get("Post", "post_a");
    update.set_source("uid_a").set("body", "old");
    update.execute(&ctx).expect("first commit");

    let mut update = crudo::get("Post", "post_a");
    update.set_source("uid_b").set("body", "new");
    update.execute(&ctx).expect("second commit");

    let post = ctx.read_entity("Post", "post_a").expect("read");
    assert_eq!(post.scalar("body"), Some(&Value::Str("new".into())));
    assert_eq!(post.scalars["body"].source, "uid_b");

    // The overwritten value stays in history.
    let history = ctx.read_history("Post", "post_a").expect("history");
    let bodies: Vec<_> = history
        .iter()
        .filter(|rec| rec.predicate == "body")
        .map(|rec| &rec.value)
        .collect();
    assert_eq!(bodies, vec![&Value::Str("old".into()), &Value::Str("new".into())]);
}

#[test]
fn failed_execute_leaves_no_records_behind() {
    let store = FlakyStore::new();
    store.fail_commits.store(true, Ordering::Release);
    let ctx = Context::new(store);

    let mut update = crudo::get("User", "uid_a");
    update.set_source("uid_a").set("name", "ghost");
    update.add_child("Post").set("body", "never lands");
    let err = update.execute(&ctx).expect_err("injected failure");
    assert!(matches!(err, CrudError::Store(_)));

    assert!(ctx.store().is_new("User", "uid_a").expect("is_new"));
    let user = ctx.read_entity("User", "uid_a").expect("read");
    assert!(!user.exists());
}

#[test]
fn create_asserts_id_is_unused() {
    let ctx = Context::new(MemStore::new());
    let mut update = crudo::create("User", "uid_a");
    update.set_source("uid_a").set("name", "first");
    update.execute(&ctx).expect("first create");

    let mut update = crudo::create("User", "uid_a");
    update.set_source("uid_b").set("name", "second");
    let err = update.execute(&ctx).expect_err("collision");
    assert!(matches!(err, CrudError::Collision { .. }));

    // Append mode keeps working on the same id.
    let mut update = crudo::get("User", "uid_a");
    update.set_source("uid_b").set("name", "appended");
    update.execute(&ctx).expect("append");
}

#[test]
fn nanotime_is_nondecreasing_and_batch_scoped() {
    let ctx = Context::new(MemStore::new());
    for round in 0..5 {
        let mut update = crudo::get("Post", "post_a");
        update
            .set_source("uid_a")
            .set("body", format!("round {round}"))
            .set("url", "www.example.com");
        update.execute(&ctx).expect("commit");
    }

    let history = ctx.read_history("Post", "post_a").expect("history");
    assert_eq!(history.len(), 10);
    let mut last = (i64::MIN, 0u32);
    for rec in &history {
        assert!(rec.ord_key() > last);
        last = rec.ord_key();
    }
    // One nanotime per batch; ties broken by seq.
    let first_batch: Vec<_> = history.iter().take(2).collect();
    assert_eq!(first_batch[0].nanotime, first_batch[1].nanotime);
    assert!(first_batch[0].seq < first_batch[1].seq);
}

#[test]
fn empty_batch_is_rejected() {
    let ctx = Context::new(MemStore::new());
    let mut update = crudo::get("User", "uid_a");
    update.set_source("uid_a");
    let err = update.execute(&ctx).expect_err("nothing staged");
    assert!(matches!(err, CrudError::Validation(_)));
}

#[test]
fn delete_in_same_batch_keeps_scalars_in_history() {
    let ctx = Context::new(MemStore::new());
    let mut update = crudo::get("Like", "like_a");
    update.set_source("uid_a").set("thumb", 1).mark_deleted();
    update.execute(&ctx).expect("commit");

    let like = ctx.read_entity("Like", "like_a").expect("read");
    assert!(like.deleted);
    assert_eq!(like.scalar("thumb"), Some(&Value::Int(1)));

    let history = ctx.read_history("Like", "like_a").expect("history");
    assert_eq!(history.len(), 2);
    assert!(history.iter().any(|rec| rec.value == Value::Tombstone));
}

#[test]
fn minted_child_is_readable_under_parent() {
    let ctx = Context::new(MemStore::new());
    let mut update = crudo::get("User", "uid_a");
    update.set_source("uid_a");
    let child_id = {
        let child = update.add_child("Post").set("body", "hello");
        // The handle itself reports the minted identity: the child kind is
        // the predicate that created it.
        assert_eq!(child.kind(), "Post");
        assert!(child.id().starts_with("post_"));
        child.id().to_owned()
    };
    update.execute(&ctx).expect("commit");

    let user = ctx.read_entity("User", "uid_a").expect("read user");
    assert_eq!(user.children.len(), 1);
    assert_eq!(user.children[0].kind, "Post");
    assert_eq!(user.children[0].id, child_id);

    let post = ctx.read_entity("Post", &child_id).expect("read post");
    assert_eq!(post.scalar("body"), Some(&Value::Str("hello".into())));
}
