use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cirrus_collab::{
    color_for_user, Collaborator, Dispatcher, EventKind, InboundEvent, OfflineQueue, OutboundRequest,
    PresenceRegistry, Vec2,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn cursor_event(user: usize) -> InboundEvent {
    InboundEvent::CursorMoved {
        resource_id: "file-1".into(),
        user_id: format!("user-{user}"),
        position: Vec2::new(user as f32, 42.0),
    }
}

fn bench_event_decode(c: &mut Criterion) {
    let frame = cursor_event(7).encode().unwrap();

    c.bench_function("event_decode_cursor", |b| {
        b.iter(|| black_box(InboundEvent::decode(black_box(&frame)).unwrap()))
    });
}

fn bench_request_encode(c: &mut Criterion) {
    let request = OutboundRequest::CursorUpdate {
        resource_id: "file-1".into(),
        user_id: "u1".into(),
        position: Vec2::new(120.0, 80.0),
    };

    c.bench_function("request_encode_cursor", |b| {
        b.iter(|| black_box(black_box(&request).encode().unwrap()))
    });
}

fn bench_dispatch_fanout(c: &mut Criterion) {
    let dispatcher = Dispatcher::new();
    let counter = Arc::new(AtomicU64::new(0));
    let _subs: Vec<_> = (0..100)
        .map(|_| {
            let counter = Arc::clone(&counter);
            dispatcher.subscribe(EventKind::CursorMoved, move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();
    let event = cursor_event(1);

    c.bench_function("dispatch_1_event_100_handlers", |b| {
        b.iter(|| black_box(dispatcher.publish(black_box(&event))))
    });
}

fn bench_presence_cursor_storm(c: &mut Criterion) {
    let mut registry = PresenceRegistry::new();
    for user in 0..50 {
        registry.apply_join("file-1", Collaborator::new(format!("user-{user}"), "Name"));
    }
    let events: Vec<InboundEvent> = (0..1000).map(|i| cursor_event(i % 50)).collect();

    c.bench_function("presence_1K_cursor_moves_50_users", |b| {
        b.iter(|| {
            for event in &events {
                registry.apply_event(black_box(event));
            }
        })
    });
}

fn bench_color_for_user(c: &mut Criterion) {
    c.bench_function("color_for_user", |b| {
        b.iter(|| black_box(color_for_user(black_box("0b7d8c0e-user-identifier"))))
    });
}

fn bench_offline_replay(c: &mut Criterion) {
    c.bench_function("offline_queue_replay_1K", |b| {
        b.iter(|| {
            let mut queue = OfflineQueue::new(1000);
            for i in 0..1000 {
                queue.enqueue(OutboundRequest::RequestSync {
                    file_id: format!("file-{i}"),
                    user_id: "u1".into(),
                });
            }
            black_box(queue.drain())
        })
    });
}

criterion_group!(
    benches,
    bench_event_decode,
    bench_request_encode,
    bench_dispatch_fanout,
    bench_presence_cursor_storm,
    bench_color_for_user,
    bench_offline_replay,
);
criterion_main!(benches);
