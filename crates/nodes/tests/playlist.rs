// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Playlist sequencing over real files.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use aircast_core::{PcmBlock, PcmProducer, StudioConfig};
use aircast_nodes::Playlist;

const SAMPLE_RATE: u32 = 44_100;

fn config() -> StudioConfig {
    StudioConfig { frames_per_block: 512, sample_rate: SAMPLE_RATE, ..StudioConfig::default() }
}

#[test]
fn test_next_track_callback_chains_files() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("first.wav");
    let second = dir.path().join("second.wav");
    common::write_sine_wav(&first, 0.15, 1, SAMPLE_RATE);
    common::write_sine_wav(&second, 0.15, 1, SAMPLE_RATE);

    let playlist = Arc::new(Playlist::new(&config()));

    let blocks = Arc::new(Mutex::new(Vec::<PcmBlock>::new()));
    let storage = blocks.clone();
    playlist.subscribe(Box::new(move |block: &PcmBlock| {
        storage.lock().unwrap().push(block.clone());
    }));

    // First end-of-track queues the second file; the second ends the test.
    let advances = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = mpsc::channel();
    {
        let playlist = Arc::clone(&playlist);
        let advances = advances.clone();
        let second = second.clone();
        playlist.clone().set_next_callback(Some(Arc::new(move || {
            if advances.fetch_add(1, Ordering::SeqCst) == 0 {
                playlist.set_file(&second).unwrap();
            } else {
                let _ = done_tx.send(());
            }
        })));
    }

    playlist.set_file(&first).unwrap();
    done_rx.recv_timeout(Duration::from_secs(10)).expect("both tracks to finish");

    assert_eq!(advances.load(Ordering::SeqCst), 2);
    // Blocks from both files were forwarded through the playlist's fanout.
    let forwarded = blocks.lock().unwrap().len();
    assert!(forwarded >= 2 * (0.15 * f64::from(SAMPLE_RATE) / 512.0) as usize);
}

#[test]
fn test_pause_suppresses_advancement() {
    let dir = tempfile::tempdir().unwrap();
    let track = dir.path().join("track.wav");
    common::write_sine_wav(&track, 0.1, 1, SAMPLE_RATE);

    let playlist = Playlist::new(&config());
    let advances = Arc::new(AtomicUsize::new(0));
    let counter = advances.clone();
    playlist.set_next_callback(Some(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })));

    playlist.pause();
    playlist.set_file(&track).unwrap();

    // Paused: the file does not start, so nothing finishes.
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(advances.load(Ordering::SeqCst), 0);
    assert!(playlist.current_time().abs() < f64::EPSILON);

    // Resume and let the short track run out.
    playlist.play();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while advances.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(advances.load(Ordering::SeqCst), 1);
}

#[test]
fn test_channels_follow_current_file() {
    let dir = tempfile::tempdir().unwrap();
    let stereo = dir.path().join("stereo.wav");
    common::write_sine_wav(&stereo, 0.1, 2, SAMPLE_RATE);

    let playlist = Playlist::new(&config());
    assert_eq!(playlist.channels(), 2);

    playlist.pause();
    playlist.set_file(&stereo).unwrap();
    assert_eq!(playlist.channels(), 2);
}
