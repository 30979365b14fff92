//! CRUD workload benchmarks over the in-memory backend.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use crudo::{Context, MemStore, Query};

const FANOUT: usize = 8;

struct CrudHarness {
    ctx: Context,
    root: String,
    counter: u64,
}

impl CrudHarness {
    fn new() -> Self {
        let ctx = Context::new(MemStore::new());
        let root = "uid_bench".to_owned();
        let mut harness = Self {
            ctx,
            root,
            counter: 0,
        };
        harness.seed();
        harness
    }

    /// User → FANOUT posts, each with FANOUT comments carrying a like.
    fn seed(&mut self) {
        let mut update = crudo::get("User", &self.root);
        update.set_source(&self.root).set("name", "bench user");
        let mut post_ids = Vec::with_capacity(FANOUT);
        for i in 0..FANOUT {
            let post = update
                .add_child("Post")
                .set("body", format!("post {i}"))
                .set("url", "www.example.com");
            post_ids.push(post.id().to_owned());
        }
        update.execute(&self.ctx).expect("seed user");

        for post_id in &post_ids {
            let mut update = crudo::get("Post", post_id);
            update.set_source("uid_seed");
            for i in 0..FANOUT {
                update
                    .add_child("Comment")
                    .set("body", format!("comment {i}"))
                    .add_child("Like")
                    .set("thumb", 1);
            }
            update.execute(&self.ctx).expect("seed comments");
        }
    }

    fn commit_batch(&mut self) {
        self.counter += 1;
        let mut update = crudo::get("Post", &format!("post_hot_{}", self.counter % 64));
        update
            .set_source("uid_writer")
            .set("body", format!("revision {}", self.counter))
            .set("rank", self.counter as i64);
        update.add_child("Like").set("thumb", 1);
        update.execute(&self.ctx).expect("commit batch");
    }

    fn deep_read(&self) -> usize {
        let mut query = Query::new("User", &self.root);
        query.upto_depth(10);
        let result = query.run(&self.ctx).expect("run query");
        result.children_of("Post").len()
    }

    fn point_read(&self) -> bool {
        self.ctx
            .read_entity("User", &self.root)
            .expect("read entity")
            .exists()
    }
}

fn crud_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("crud");

    group.throughput(Throughput::Elements(1));
    group.bench_function("commit_batch", |b| {
        let mut harness = CrudHarness::new();
        b.iter(|| harness.commit_batch());
    });

    group.bench_function("read_entity", |b| {
        let harness = CrudHarness::new();
        b.iter(|| black_box(harness.point_read()));
    });

    group.bench_function("deep_tree_query", |b| {
        let harness = CrudHarness::new();
        b.iter(|| black_box(harness.deep_read()));
    });

    group.finish();
}

criterion_group!(benches, crud_benchmarks);
criterion_main!(benches);
