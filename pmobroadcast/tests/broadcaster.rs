//! Scénarios de diffusion de bout en bout avec un encodeur scripté.

mod common;

use common::{
    heard, settings, silent_wav, system_ffmpeg, tracks, wait_until, Heard, ScriptedEncoder,
    StaticScanner,
};
use pmobroadcast::{
    BroadcastChunk, BroadcasterState, EncoderSettings, Error, FfmpegEncoder, Station,
    StationSettings, Subscriber, SubscriberRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn listen(subscriber: &mut Subscriber, count: usize) -> Vec<Heard> {
    let mut out = Vec::with_capacity(count);
    while out.len() < count {
        let chunk = subscriber.recv().await.expect("stream still open");
        out.push(heard(&chunk));
    }
    out
}

fn titles(heard: &[Heard]) -> Vec<&str> {
    heard.iter().map(|h| h.title.as_str()).collect()
}

#[tokio::test(start_paused = true)]
async fn every_listener_hears_the_same_ordered_stream() {
    let encoder = ScriptedEncoder::new(5, Duration::from_millis(20));
    let (station, broadcaster) = Station::new(
        settings(),
        StaticScanner::new(&[]),
        encoder.clone(),
        tracks(&["a", "b"]),
    );
    let mut listeners: Vec<_> = (0..3).map(|_| station.subscribe().unwrap()).collect();

    let cancel = CancellationToken::new();
    let task = broadcaster.spawn(cancel.clone());

    let mut streams = Vec::new();
    for listener in listeners.iter_mut() {
        streams.push(listen(listener, 10).await);
    }

    let expected: Vec<(String, usize)> = ["a", "b"]
        .iter()
        .flat_map(|t| (0..5).map(move |i| (t.to_string(), i)))
        .collect();
    for stream in &streams {
        let got: Vec<(String, usize)> = stream.iter().map(|h| (h.title.clone(), h.index)).collect();
        assert_eq!(got, expected);
        // pas de doublon ni d'inversion
        assert!(stream.windows(2).all(|w| w[0].serial < w[1].serial));
    }
    assert_eq!(streams[0], streams[1]);
    assert_eq!(streams[1], streams[2]);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn slow_listener_gets_an_ordered_subsequence() {
    let encoder = ScriptedEncoder::new(1_000, Duration::from_millis(10));
    let station_settings = StationSettings {
        queue_capacity: 2,
        ..settings()
    };
    let (station, broadcaster) = Station::new(
        station_settings,
        StaticScanner::new(&[]),
        encoder.clone(),
        tracks(&["long"]),
    );
    let mut fast = station.subscribe().unwrap();
    let mut slow = station.subscribe().unwrap();

    let cancel = CancellationToken::new();
    let task = broadcaster.spawn(cancel.clone());

    let fast_heard = listen(&mut fast, 20).await;
    assert!(fast_heard.windows(2).all(|w| w[1].serial == w[0].serial + 1));

    // le lent n'a rien lu : sa file a gardé les deux premiers chunks
    let mut slow_heard = Vec::new();
    while let Some(chunk) = slow.try_recv() {
        slow_heard.push(heard(&chunk));
    }
    assert_eq!(slow_heard.len(), 2);
    slow_heard.extend(listen(&mut slow, 5).await);

    assert!(slow_heard.windows(2).all(|w| w[0].serial < w[1].serial));
    assert!(slow.dropped_chunks() > 0);
    assert!(station.status().chunks_dropped > 0);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reload_keeps_the_current_track_playing() {
    let encoder = ScriptedEncoder::new(4, Duration::from_millis(20));
    let (station, broadcaster) = Station::new(
        settings(),
        StaticScanner::new(&[]),
        encoder.clone(),
        tracks(&["a", "b", "c"]),
    );
    let mut listener = station.subscribe().unwrap();
    let cancel = CancellationToken::new();
    let task = broadcaster.spawn(cancel.clone());

    let first = listen(&mut listener, 1).await;
    assert_eq!(first[0].title, "a");

    // "a" disparaît : la piste continue, la suivante vient de la nouvelle liste
    let report = station.reload_with(tracks(&["x", "y"]));
    assert_eq!(report.track_count, 2);
    assert_eq!(station.now_playing().map(|t| t.title), Some("a".to_string()));

    let rest = listen(&mut listener, 3 + 4).await;
    assert_eq!(titles(&rest), ["a", "a", "a", "x", "x", "x", "x"]);
    assert_eq!(&encoder.started()[..2], ["a", "x"]);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reload_repositions_on_the_playing_track() {
    let encoder = ScriptedEncoder::new(3, Duration::from_millis(20));
    let (station, broadcaster) = Station::new(
        settings(),
        StaticScanner::new(&[]),
        encoder.clone(),
        tracks(&["a", "b", "c"]),
    );
    let mut listener = station.subscribe().unwrap();
    let cancel = CancellationToken::new();
    let task = broadcaster.spawn(cancel.clone());

    listen(&mut listener, 1).await;
    // "a" reste, "b" disparaît : après "a" vient "c"
    station.reload_with(tracks(&["z", "a", "c"]));

    let rest = listen(&mut listener, 2 + 3 + 3).await;
    assert_eq!(
        titles(&rest),
        ["a", "a", "c", "c", "c", "z", "z", "z"]
    );

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn empty_reload_idles_then_resumes() {
    let encoder = ScriptedEncoder::new(2, Duration::from_millis(20));
    let scanner = StaticScanner::new(&["a"]);
    let (station, broadcaster) = Station::open(settings(), scanner.clone(), encoder.clone())
        .await
        .unwrap();
    let mut listener = station.subscribe().unwrap();
    let cancel = CancellationToken::new();
    let task = broadcaster.spawn(cancel.clone());

    listen(&mut listener, 1).await;
    let report = station.reload_with(Vec::new());
    assert_eq!(report.track_count, 0);

    assert!(wait_until(|| station.state() == BroadcasterState::Idle, Duration::from_secs(5)).await);
    let status = station.status();
    assert!(status.current_track.is_none());
    assert_eq!(status.total_tracks, 0);

    // l'auditeur reste connecté pendant le silence
    scanner.set(&["b"]);
    station.reload().await.unwrap();
    let resumed = listen(&mut listener, 2).await;
    assert_eq!(titles(&resumed), ["a", "b"]);
    assert_eq!(station.state(), BroadcasterState::Playing);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn decode_error_skips_to_next_track_after_bounded_pause() {
    let encoder = ScriptedEncoder::new(2, Duration::from_millis(10));
    let (station, broadcaster) = Station::new(
        settings(),
        StaticScanner::new(&[]),
        encoder.clone(),
        tracks(&["bad", "a"]),
    );
    let mut listener = station.subscribe().unwrap();
    let cancel = CancellationToken::new();
    let started = tokio::time::Instant::now();
    let task = broadcaster.spawn(cancel.clone());

    let first = listen(&mut listener, 1).await;
    let elapsed = started.elapsed();

    assert_eq!(first[0].title, "a");
    let pause = settings().fault_pause;
    assert!(elapsed >= pause, "skipped too early: {elapsed:?}");
    assert!(elapsed < pause + Duration::from_millis(200), "skip took {elapsed:?}");

    let status = station.status();
    assert_eq!(status.track_failures, 1);
    assert_eq!(status.state, BroadcasterState::Playing);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn broken_sources_never_stop_the_station() {
    let dir = tempfile::tempdir().unwrap();
    let corrupt = dir.path().join("corrupt.mp3");
    std::fs::write(&corrupt, b"\x00\x01 definitely not mpeg audio").unwrap();
    let missing = dir.path().join("missing.flac");

    let station_settings = StationSettings {
        fault_pause: Duration::from_millis(10),
        ..settings()
    };
    // ffmpeg introuvable : chaque piste échoue au lancement
    let encoder = Arc::new(FfmpegEncoder::new(EncoderSettings {
        ffmpeg_path: dir.path().join("no-ffmpeg-here"),
        ..Default::default()
    }));
    let descriptors = vec![
        pmobroadcast::TrackDescriptor::untagged(missing).unwrap(),
        pmobroadcast::TrackDescriptor::untagged(corrupt).unwrap(),
    ];
    let (station, broadcaster) =
        Station::new(station_settings, StaticScanner::new(&[]), encoder, descriptors);
    let cancel = CancellationToken::new();
    let task = broadcaster.spawn(cancel.clone());

    assert!(wait_until(|| station.status().track_failures >= 4, Duration::from_secs(5)).await);
    assert!(!task.is_finished());
    assert!(station.subscribe().is_ok());

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("broadcaster stops")
        .unwrap();
}

#[tokio::test]
async fn corrupt_file_is_skipped_by_real_ffmpeg() {
    let Some(ffmpeg) = system_ffmpeg() else {
        eprintln!("ffmpeg with libmp3lame not available, skipping");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let corrupt = dir.path().join("corrupt.mp3");
    std::fs::write(&corrupt, b"\x00\x01 definitely not mpeg audio").unwrap();
    let tone = dir.path().join("tone.wav");
    std::fs::write(&tone, silent_wav(5)).unwrap();

    let station_settings = StationSettings {
        fault_pause: Duration::from_millis(50),
        ..settings()
    };
    let encoder = Arc::new(FfmpegEncoder::new(EncoderSettings {
        ffmpeg_path: ffmpeg,
        ..Default::default()
    }));
    let descriptors = vec![
        pmobroadcast::TrackDescriptor::untagged(corrupt).unwrap(),
        pmobroadcast::TrackDescriptor::untagged(tone).unwrap(),
    ];
    let (station, broadcaster) =
        Station::new(station_settings, StaticScanner::new(&[]), encoder, descriptors);
    let mut listener = station.subscribe().unwrap();
    let cancel = CancellationToken::new();
    let task = broadcaster.spawn(cancel.clone());

    let chunk = tokio::time::timeout(Duration::from_secs(10), listener.recv())
        .await
        .expect("audio from the next track")
        .expect("stream still open");
    assert!(!chunk.is_empty());

    let status = station.status();
    assert_eq!(status.track_failures, 1);
    assert_eq!(status.tracks_played, 0);
    assert_eq!(
        status.current_track.map(|t| t.filename),
        Some("tone.wav".to_string())
    );

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("broadcaster stops")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_the_active_pipeline() {
    let encoder = ScriptedEncoder::new(0, Duration::from_millis(20));
    let (station, broadcaster) = Station::new(
        settings(),
        StaticScanner::new(&[]),
        encoder.clone(),
        tracks(&["endless"]),
    );
    let mut listener = station.subscribe().unwrap();
    let cancel = CancellationToken::new();
    let task = broadcaster.spawn(cancel.clone());

    listen(&mut listener, 3).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("broadcaster stops promptly")
        .unwrap();

    assert_eq!(encoder.cancelled(), 1);
    assert_eq!(station.state(), BroadcasterState::Stopped);
    assert!(station.now_playing().is_none());
    // les auditeurs voient la fin du flux, les nouveaux sont refusés
    while listener.recv().await.is_some() {}
    assert!(matches!(station.subscribe(), Err(Error::Closed)));
}

#[tokio::test]
async fn subscribe_at_capacity_is_refused() {
    let station_settings = StationSettings {
        max_listeners: 2,
        ..settings()
    };
    let (station, _broadcaster) = Station::new(
        station_settings,
        StaticScanner::new(&[]),
        ScriptedEncoder::new(1, Duration::ZERO),
        Vec::new(),
    );

    let a = station.subscribe().unwrap();
    let _b = station.subscribe().unwrap();
    match station.subscribe() {
        Err(Error::CapacityExceeded { max }) => assert_eq!(max, 2),
        other => panic!("expected CapacityExceeded, got {other:?}"),
    }
    assert_eq!(station.status().active_subscribers, 2);

    drop(a);
    assert_eq!(station.status().active_subscribers, 1);
    assert!(station.subscribe().is_ok());
}

#[test]
fn delivery_never_waits_on_full_queues() {
    let registry = Arc::new(SubscriberRegistry::new(1, 10_000));
    let stalled: Vec<_> = (0..5_000).map(|_| registry.subscribe().unwrap()).collect();

    let chunk = BroadcastChunk::new(0, vec![0u8; 1024]);
    let first = registry.deliver(&chunk);
    assert_eq!(first.delivered, stalled.len());

    // toutes les files sont pleines : chaque diffusion abandonne sans attendre
    for _ in 0..100 {
        let report = registry.deliver(&chunk);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, stalled.len());
    }
    assert!(stalled.iter().all(|s| s.dropped_chunks() == 100));
}

#[tokio::test(start_paused = true)]
async fn pipeline_keeps_pace_with_stalled_listeners() {
    let encoder = ScriptedEncoder::new(200, Duration::from_millis(1));
    let station_settings = StationSettings {
        queue_capacity: 1,
        max_listeners: 1_000,
        ..settings()
    };
    let (station, broadcaster) = Station::new(
        station_settings,
        StaticScanner::new(&[]),
        encoder.clone(),
        tracks(&["a"]),
    );
    let stalled: Vec<_> = (0..500).map(|_| station.subscribe().unwrap()).collect();
    let cancel = CancellationToken::new();
    let task = broadcaster.spawn(cancel.clone());

    assert!(
        wait_until(|| station.status().tracks_played >= 3, Duration::from_secs(5)).await,
        "pipeline stalled behind full queues"
    );
    assert!(station.status().chunks_dropped >= 500 * 599);

    cancel.cancel();
    task.await.unwrap();
    drop(stalled);
}
