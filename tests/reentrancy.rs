//! Allocator events delivered to a subscriber that itself allocates from the
//! same heap.
//!
//! Every event handled here allocates a buffer of the largest size class and
//! keeps it, so handling a "superblock mapped" event maps another superblock.

use pagehoard::PageHoard;
use pagehoard::size_class::{LEVELS, MAX_ALLOC};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{span, Event, Metadata, Subscriber};

#[global_allocator]
static GLOBAL: PageHoard = PageHoard;

static EVENTS: AtomicUsize = AtomicUsize::new(0);
static SINK: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

const SINK_FILL: u8 = 0x5a;

/// Fixed so the sink itself never reallocates into a large object.
const SINK_SLOTS: usize = 64;

/// Holds on to one allocation per event, replacing the oldest once the sink
/// is full.
struct Hoarding;

impl Subscriber for Hoarding {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn new_span(&self, _span: &span::Attributes<'_>) -> span::Id {
        span::Id::from_u64(1)
    }

    fn record(&self, _span: &span::Id, _values: &span::Record<'_>) {}

    fn record_follows_from(&self, _span: &span::Id, _follows: &span::Id) {}

    fn event(&self, _event: &Event<'_>) {
        let seen = EVENTS.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut sink) = SINK.lock() {
            let buf = vec![SINK_FILL; MAX_ALLOC - 48];
            if sink.len() < SINK_SLOTS {
                sink.push(buf);
            } else {
                sink[seen % SINK_SLOTS] = buf;
            }
        }
    }

    fn enter(&self, _span: &span::Id) {}

    fn exit(&self, _span: &span::Id) {}
}

fn sink_intact() -> bool {
    SINK.lock()
        .map(|sink| sink.iter().all(|buf| buf.iter().all(|&b| b == SINK_FILL)))
        .unwrap_or(false)
}

fn test_pool_growth_with_allocating_subscriber() {
    let before = EVENTS.load(Ordering::Relaxed);
    let boxes: Vec<Box<[u8; MAX_ALLOC]>> = (0..32u8).map(|i| Box::new([i; MAX_ALLOC])).collect();
    for (i, b) in boxes.iter().enumerate() {
        assert!(b.iter().all(|&x| x == i as u8), "box {i}");
    }
    assert!(EVENTS.load(Ordering::Relaxed) > before);
    assert!(sink_intact());
    assert!(GLOBAL.check_invariants());
    drop(boxes);
    assert!(GLOBAL.check_invariants());
    for level in 0..LEVELS {
        assert!(GLOBAL.pool_stats(level).whole_superblocks <= 2, "level {level}");
    }
}

fn test_large_objects_with_allocating_subscriber() {
    let live = GLOBAL.large_objects();
    let before = EVENTS.load(Ordering::Relaxed);
    let big: Vec<u8> = vec![7; 100_000];
    assert_eq!(GLOBAL.large_objects(), live + 1);
    assert!(big.iter().all(|&b| b == 7));
    drop(big);
    assert_eq!(GLOBAL.large_objects(), live);
    assert!(EVENTS.load(Ordering::Relaxed) >= before + 2);
    assert!(sink_intact());
    assert!(GLOBAL.check_invariants());
}

fn test_interleaved_sizes_with_allocating_subscriber() {
    let mut live: Vec<Vec<u8>> = Vec::new();
    for round in 0..200usize {
        let size = match round % 5 {
            0 => MAX_ALLOC,
            1 => 3 * MAX_ALLOC,
            _ => 1 + (round * 97) % MAX_ALLOC,
        };
        live.push(vec![round as u8; size]);
        if round % 3 == 0 {
            live.swap_remove(round % live.len());
        }
    }
    for buf in &live {
        let tag = buf[0];
        assert!(buf.iter().all(|&b| b == tag));
    }
    drop(live);
    assert!(sink_intact());
    assert!(GLOBAL.check_invariants());
}

fn main() {
    if let Ok(mut sink) = SINK.lock() {
        sink.reserve_exact(SINK_SLOTS);
    }
    if tracing::subscriber::set_global_default(Hoarding).is_err() {
        panic!("a global subscriber is already installed");
    }

    let tests: &[(&str, fn())] = &[
        ("test_pool_growth_with_allocating_subscriber", test_pool_growth_with_allocating_subscriber),
        ("test_large_objects_with_allocating_subscriber", test_large_objects_with_allocating_subscriber),
        ("test_interleaved_sizes_with_allocating_subscriber", test_interleaved_sizes_with_allocating_subscriber),
    ];
    for (name, test) in tests {
        test();
        println!("test {name} ... ok");
    }
    println!("\ntest result: ok. {} passed", tests.len());
}
