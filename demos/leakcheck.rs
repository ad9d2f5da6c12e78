//! Leaks on purpose, so the leak check has something to clean up. Try
//! `SAFEALLOC_CAPACITY=0` to see the same run without tracking.

use safealloc::{logging, Tracker, TrackerConfig};

fn main() {
    logging::init();

    let config = TrackerConfig::new()
        .with_capacity(4)
        .with_env_overrides()
        .expect("SAFEALLOC_* variables should be well-formed");
    let mut tracker = Tracker::new(config);

    let kept = tracker.allocate(16).expect("16 bytes");
    let list = tracker.allocate_zeroed(8, 4).expect("32 bytes");
    let list = unsafe { tracker.resize(list.as_ptr(), 4096) }
        .expect("4 KiB")
        .expect("non-zero resize");
    unsafe { tracker.release(kept.as_ptr()) };
    println!("never releasing {list:p}");

    match tracker.leak_check() {
        Ok(()) => println!("no leaks"),
        Err(e) => println!("{e}"),
    }
}
