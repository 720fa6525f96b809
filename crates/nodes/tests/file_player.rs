// SPDX-FileCopyrightText: © 2025 aircast contributors
//
// SPDX-License-Identifier: MPL-2.0

//! End-to-end file player behavior over a synthesized WAV.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_precision_loss)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use aircast_core::{AircastError, PcmBlock, PcmProducer, StudioConfig};
use aircast_nodes::FilePlayer;

const SAMPLE_RATE: u32 = 44_100;

fn config(frames_per_block: usize) -> StudioConfig {
    StudioConfig { frames_per_block, sample_rate: SAMPLE_RATE, ..StudioConfig::default() }
}

#[test]
fn test_end_of_track_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.wav");
    let frames = common::write_sine_wav(&path, 0.25, 2, SAMPLE_RATE);

    let frames_per_block = 512;
    let player = FilePlayer::open(&path, &config(frames_per_block)).unwrap();
    assert_eq!(player.channels(), 2);
    assert!((player.duration() - 0.25).abs() < 0.01);

    let blocks = Arc::new(Mutex::new(Vec::<PcmBlock>::new()));
    let storage = blocks.clone();
    player.subscribe(Box::new(move |block: &PcmBlock| {
        storage.lock().unwrap().push(block.clone());
    }));

    let end_count = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = mpsc::channel();
    let counter = end_count.clone();
    player.set_end_callback(Some(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        let _ = done_tx.send(());
    })));

    let started = Instant::now();
    player.play();
    done_rx.recv_timeout(Duration::from_secs(10)).expect("end-of-track callback");

    assert!(!player.is_playing());
    assert_eq!(end_count.load(Ordering::SeqCst), 1);

    // Whole blocks only; the trailing partial block is not published.
    let expected_blocks = (frames / frames_per_block as u64) as usize;
    let blocks = blocks.lock().unwrap();
    assert_eq!(blocks.len(), expected_blocks);
    for block in blocks.iter() {
        assert_eq!(block.channels(), 2);
        assert_eq!(block.frames(), frames_per_block);
    }

    // Real-time pacing: the run takes roughly the audio duration.
    let audio_secs = expected_blocks as f64 * frames_per_block as f64 / f64::from(SAMPLE_RATE);
    let elapsed = started.elapsed().as_secs_f64();
    let block_secs = frames_per_block as f64 / f64::from(SAMPLE_RATE);
    assert!(
        elapsed + block_secs + 0.05 >= audio_secs,
        "played {audio_secs:.3}s of audio in {elapsed:.3}s"
    );
}

#[test]
fn test_pause_retains_position() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.wav");
    common::write_sine_wav(&path, 0.5, 1, SAMPLE_RATE);

    let player = FilePlayer::open(&path, &config(256)).unwrap();
    let (block_tx, block_rx) = mpsc::channel();
    player.subscribe(Box::new(move |_: &PcmBlock| {
        let _ = block_tx.send(());
    }));

    let ended = Arc::new(AtomicUsize::new(0));
    let counter = ended.clone();
    player.set_end_callback(Some(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })));

    player.play();
    block_rx.recv_timeout(Duration::from_secs(5)).expect("first block");
    player.pause();
    let position = player.position();
    assert!(position > 0.0);

    // Give the worker time to wind down; pausing fires no end callback.
    std::thread::sleep(Duration::from_millis(100));
    assert!(!player.is_playing());
    assert_eq!(ended.load(Ordering::SeqCst), 0);
    assert!((player.position() - position).abs() < 0.05);
}

#[test]
fn test_seek_forward_and_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.wav");
    common::write_sine_wav(&path, 0.5, 1, SAMPLE_RATE);

    let player = FilePlayer::open(&path, &config(256)).unwrap();

    player.set_position(0.25).unwrap();
    assert!((player.position() - 0.25).abs() < 0.01);

    // Backwards: reopens and skips forward again.
    player.set_position(0.1).unwrap();
    assert!((player.position() - 0.1).abs() < 0.01);

    // Past the end: clamps at the stream tail.
    player.set_position(10.0).unwrap();
    assert!(player.position() <= 0.51);
}

#[test]
fn test_stop_rewinds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.wav");
    common::write_sine_wav(&path, 0.5, 1, SAMPLE_RATE);

    let player = FilePlayer::open(&path, &config(256)).unwrap();
    player.set_position(0.2).unwrap();
    player.stop().unwrap();
    assert!(player.position().abs() < f64::EPSILON);
}

#[test]
fn test_open_missing_file_fails() {
    let result = FilePlayer::open(std::path::Path::new("/nonexistent/track.wav"), &config(256));
    assert!(matches!(result, Err(AircastError::DecodeFailed(_))));
}
