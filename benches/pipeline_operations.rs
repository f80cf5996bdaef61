//! Benchmark suite for toggles, channel stats and listings

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use engagedb::content::NewVideo;
use engagedb::{Collection, Document, DocumentStore, Engine, MemoryStore, PageRequest, SledStore, VideoQuery};
use tempfile::TempDir;

const CHANNEL: &str = "channel-0";

/// One channel with `video_count` videos, each liked and commented on by
/// a handful of users
fn populate<S: DocumentStore>(engine: &Engine<S>, video_count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(video_count);
    for i in 0..video_count {
        let video = engine
            .publish_video(
                CHANNEL,
                NewVideo {
                    title: format!("video {}", i),
                    description: format!("description {}", i),
                    ..Default::default()
                },
            )
            .unwrap();

        for u in 0..(i % 5) {
            let user = format!("user-{}", u);
            engine.toggle_video_like(&user, &video.id).unwrap();
            engine.add_comment(&user, &video.id, "nice").unwrap();
        }
        ids.push(video.id);
    }

    for u in 0..50 {
        let user = format!("user-{}", u);
        let mut doc = Document::new();
        doc.insert("_id".to_string(), user.clone().into());
        doc.insert("username".to_string(), format!("name {}", u).into());
        engine.store().create(Collection::Users, doc).unwrap();
        engine.toggle_subscription(&user, CHANNEL).unwrap();
    }
    ids
}

fn memory_engine(video_count: usize) -> (Engine<MemoryStore>, Vec<String>) {
    let engine = Engine::new(MemoryStore::new());
    let ids = populate(&engine, video_count);
    (engine, ids)
}

fn sled_engine(video_count: usize) -> (TempDir, Engine<SledStore>, Vec<String>) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::new(SledStore::open(dir.path()).unwrap());
    let ids = populate(&engine, video_count);
    (dir, engine, ids)
}

fn bench_toggle(c: &mut Criterion) {
    let mut group = c.benchmark_group("toggle_video_like");

    let engine = Engine::new(MemoryStore::new());
    group.bench_function("memory", |b| {
        b.iter(|| engine.toggle_video_like(black_box("user-1"), black_box("video-1")).unwrap());
    });

    let dir = TempDir::new().unwrap();
    let engine = Engine::new(SledStore::open(dir.path()).unwrap());
    group.bench_function("sled", |b| {
        b.iter(|| engine.toggle_video_like(black_box("user-1"), black_box("video-1")).unwrap());
    });

    group.finish();
}

fn bench_channel_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_stats");

    for size in [10, 100, 1000] {
        let (engine, _) = memory_engine(size);
        group.bench_with_input(BenchmarkId::new("memory", size), &size, |b, _| {
            b.iter(|| engine.channel_stats(black_box(CHANNEL)).unwrap());
        });
    }

    let (_dir, engine, _) = sled_engine(100);
    group.bench_function("sled/100", |b| {
        b.iter(|| engine.channel_stats(black_box(CHANNEL)).unwrap());
    });

    group.finish();
}

fn bench_paginated_listing(c: &mut Criterion) {
    let mut group = c.benchmark_group("paginated_listing");

    for size in [100, 1000] {
        let (engine, ids) = memory_engine(size);
        let busiest = ids[4].clone();

        group.bench_with_input(BenchmarkId::new("channel_videos", size), &size, |b, _| {
            let query = VideoQuery {
                sort_by: Some("title".to_string()),
                page: PageRequest::new(3, 10),
                ..Default::default()
            };
            b.iter(|| engine.channel_videos(black_box(CHANNEL), &query).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("video_comments", size), &size, |b, _| {
            b.iter(|| engine.video_comments(black_box(&busiest), PageRequest::new(1, 10)).unwrap());
        });
    }

    group.finish();
}

fn bench_joined_listing(c: &mut Criterion) {
    let mut group = c.benchmark_group("joined_listing");

    for size in [100, 1000] {
        let (engine, _) = memory_engine(size);
        group.bench_with_input(BenchmarkId::new("liked_videos", size), &size, |b, _| {
            b.iter(|| engine.liked_videos(black_box("user-1")).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("channel_subscribers", size), &size, |b, _| {
            b.iter(|| engine.channel_subscribers(black_box(CHANNEL)).unwrap());
        });
    }

    let (_dir, engine, _) = sled_engine(100);
    group.bench_function("liked_videos/sled/100", |b| {
        b.iter(|| engine.liked_videos(black_box("user-1")).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_toggle,
    bench_channel_stats,
    bench_paginated_listing,
    bench_joined_listing,
);

criterion_main!(benches);
