//! Basic integration test: use pagehoard as the global allocator and exercise
//! standard Rust collections.
//!
//! The allocator refuses a second thread, so this runs without the libtest
//! harness: `main` calls each test on the main thread.

use pagehoard::PageHoard;
use std::process::Command;

#[global_allocator]
static GLOBAL: PageHoard = PageHoard;

const CHILD_ENV: &str = "PAGEHOARD_BASIC_CHILD";

fn test_box() {
    let b = Box::new(42u64);
    assert_eq!(*b, 42);
    drop(b);
}

fn test_vec() {
    let mut v = Vec::new();
    for i in 0..1000 {
        v.push(i);
    }
    assert_eq!(v.len(), 1000);
    assert_eq!(v[500], 500);
    v.clear();
}

fn test_string() {
    let mut s = String::new();
    for _ in 0..100 {
        s.push_str("hello world ");
    }
    assert!(s.len() > 100);
}

fn test_hashmap() {
    use std::collections::HashMap;
    let mut map = HashMap::new();
    for i in 0..500 {
        map.insert(i, format!("value_{}", i));
    }
    assert_eq!(map.len(), 500);
    assert_eq!(map[&42], "value_42");
}

fn test_vec_of_strings() {
    let v: Vec<String> = (0..200).map(|i| format!("item_{}", i)).collect();
    assert_eq!(v.len(), 200);
    assert_eq!(v[100], "item_100");
}

fn test_nested_collections() {
    let mut v: Vec<Vec<u32>> = Vec::new();
    for i in 0..50 {
        let inner: Vec<u32> = (0..i).collect();
        v.push(inner);
    }
    assert_eq!(v[49].len(), 49);
}

fn test_large_allocation() {
    // Above 2 KiB goes through the direct mapping path
    let before = GLOBAL.large_objects();
    let v: Vec<u8> = vec![0xAB; 512 * 1024];
    assert_eq!(GLOBAL.large_objects(), before + 1);
    assert_eq!(v.len(), 512 * 1024);
    assert!(v.iter().all(|&b| b == 0xAB));
    drop(v);
    assert_eq!(GLOBAL.large_objects(), before);
}

fn test_various_sizes() {
    // Exercise every size class and both sides of the large boundary
    let _a: Box<[u8; 1]> = Box::new([0; 1]);
    let _b: Box<[u8; 32]> = Box::new([0; 32]);
    let _c: Box<[u8; 64]> = Box::new([0; 64]);
    let _d: Box<[u8; 128]> = Box::new([0; 128]);
    let _e: Box<[u8; 256]> = Box::new([0; 256]);
    let _f: Box<[u8; 1024]> = Box::new([0; 1024]);
    let _g: Box<[u8; 2048]> = Box::new([0; 2048]);
    let _h: Box<[u8; 2049]> = Box::new([0; 2049]);
    let _i: Box<[u8; 65536]> = Box::new([0; 65536]);
}

fn test_alloc_free_cycle() {
    for _ in 0..100 {
        let v: Vec<u64> = (0..100).collect();
        assert_eq!(v.len(), 100);
        drop(v);
    }
}

fn test_overaligned() {
    #[repr(align(256))]
    struct Aligned([u8; 8]);
    let boxes: Vec<Box<Aligned>> = (0..20).map(|_| Box::new(Aligned([1; 8]))).collect();
    for b in &boxes {
        assert_eq!(&**b as *const Aligned as usize % 256, 0);
        assert_eq!(b.0, [1; 8]);
    }
}

fn test_growing_vec_reallocates() {
    let mut v: Vec<u8> = Vec::with_capacity(1);
    for i in 0..10_000u32 {
        v.push(i as u8);
    }
    assert!(v.iter().enumerate().all(|(i, &b)| b == i as u8));
    v.shrink_to_fit();
    assert_eq!(v.len(), 10_000);
}

fn test_invariants_hold() {
    assert!(GLOBAL.check_invariants());
}

/// Re-run this binary in a mode that starts a thread, and check that the
/// process is terminated with the refusal status.
fn test_second_thread_is_refused() {
    let exe = std::env::current_exe().unwrap();
    let output = Command::new(exe).env(CHILD_ENV, "1").output().unwrap();
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(pagehoard::guard::EXIT_STATUS & 0xff));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("single-threaded"), "stderr: {stderr}");
}

fn spawn_allocating_thread() -> ! {
    let warm = Box::new(1u8);
    std::hint::black_box(&warm);
    let handle = std::thread::spawn(|| {
        let b = Box::new([7u8; 100]);
        std::hint::black_box(b);
    });
    let _ = handle.join();
    // Unreachable when the guard works.
    std::process::exit(0)
}

fn main() {
    if std::env::var_os(CHILD_ENV).is_some() {
        spawn_allocating_thread();
    }

    let tests: &[(&str, fn())] = &[
        ("test_box", test_box),
        ("test_vec", test_vec),
        ("test_string", test_string),
        ("test_hashmap", test_hashmap),
        ("test_vec_of_strings", test_vec_of_strings),
        ("test_nested_collections", test_nested_collections),
        ("test_large_allocation", test_large_allocation),
        ("test_various_sizes", test_various_sizes),
        ("test_alloc_free_cycle", test_alloc_free_cycle),
        ("test_overaligned", test_overaligned),
        ("test_growing_vec_reallocates", test_growing_vec_reallocates),
        ("test_invariants_hold", test_invariants_hold),
        ("test_second_thread_is_refused", test_second_thread_is_refused),
    ];
    for (name, test) in tests {
        test();
        println!("test {name} ... ok");
    }
    println!("\ntest result: ok. {} passed", tests.len());
}
