//! Producer and consumer on separate threads

use std::thread;

use neuroloop_core::ring_buffer::RingBuffer;
use neuroloop_core::types::{EegSample, Fixed24_8};

const TOTAL: u32 = 100_000;

#[test]
fn test_threaded_fifo_order() {
    let (mut tx, mut rx) = RingBuffer::<u32>::new(64).unwrap().split();

    let producer = thread::spawn(move || {
        let mut next = 0;
        while next < TOTAL {
            if tx.write(next).is_ok() {
                next += 1;
            } else {
                thread::yield_now();
            }
        }
    });

    let mut expected = 0;
    let mut out = 0;
    while expected < TOTAL {
        if rx.read(&mut out).is_ok() {
            assert_eq!(out, expected);
            expected += 1;
        } else {
            thread::yield_now();
        }
    }

    producer.join().unwrap();
    assert!(rx.is_empty());
    assert!(rx.stats().peak_usage <= 63);
}

#[test]
fn test_threaded_bulk_eeg_samples() {
    let (mut tx, mut rx) = RingBuffer::<EegSample>::new(512).unwrap().split();
    let count = 20_000u32;

    let producer = thread::spawn(move || {
        let mut batch = Vec::with_capacity(32);
        let mut seq = 0u32;
        while seq < count {
            batch.clear();
            for i in seq..(seq + 32).min(count) {
                let mut sample = EegSample::new(u64::from(i) * 4_000, i);
                sample.channels[0] = Fixed24_8::from_raw(i as i32);
                batch.push(sample);
            }
            let mut sent = 0;
            while sent < batch.len() {
                let n = tx.write_bulk(&batch[sent..]);
                if n == 0 {
                    thread::yield_now();
                }
                sent += n;
            }
            seq += batch.len() as u32;
        }
    });

    let mut out = vec![EegSample::default(); 48];
    let mut expected = 0u32;
    while expected < count {
        let n = rx.read_bulk(&mut out);
        if n == 0 {
            thread::yield_now();
            continue;
        }
        for sample in &out[..n] {
            assert_eq!(sample.sequence, expected);
            assert_eq!(sample.channels[0].to_raw(), expected as i32);
            expected += 1;
        }
    }

    producer.join().unwrap();
    assert_eq!(rx.available(), 0);
}
