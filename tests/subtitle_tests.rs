// Subtitle emission end to end: cue synthesis plus the SRT/VTT files it
// leaves on disk.

use std::time::Duration;

use lingostream::subtitle::writer::{SrtWriter, VttWriter};
use lingostream::subtitle::{SubtitleEmitter, MIN_CUE_DURATION};

#[test]
fn srt_file_reflects_backend_timing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.srt");

    let srt = SrtWriter::create(&path).unwrap();
    let mut emitter = SubtitleEmitter::new(Some(srt), None);

    // offset 100 ms, duration 1 s, in 100 ns ticks
    emitter
        .emit("Hello world", Some(1_000_000), Some(10_000_000))
        .unwrap()
        .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(
        contents,
        "1\n00:00:00,100 --> 00:00:01,100\nHello world\n\n"
    );
}

#[test]
fn vtt_file_has_header_and_dot_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.vtt");

    let vtt = VttWriter::create(&path).unwrap();
    let mut emitter = SubtitleEmitter::new(None, Some(vtt));

    emitter
        .emit("Bonjour", Some(0), Some(5_000_000))
        .unwrap()
        .unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.starts_with("WEBVTT\n\n"));
    assert!(contents.contains("00:00:00.000 --> 00:00:00.500"));
    assert!(contents.contains("Bonjour"));
}

#[test]
fn untimed_cues_never_overlap_and_honor_min_duration() {
    let dir = tempfile::tempdir().unwrap();
    let srt = SrtWriter::create(&dir.path().join("out.srt")).unwrap();
    let mut emitter = SubtitleEmitter::new(Some(srt), None);

    let mut cues = Vec::new();
    for text in ["one", "two", "three", "four"] {
        cues.push(emitter.emit(text, None, None).unwrap().unwrap());
    }

    for pair in cues.windows(2) {
        assert!(pair[1].start >= pair[0].end, "cues must not overlap");
    }
    for cue in &cues {
        assert!(cue.end - cue.start >= MIN_CUE_DURATION);
        assert!(cue.end > cue.start);
    }
}

#[test]
fn mixed_timed_and_untimed_sequence_stays_monotonic() {
    let mut emitter = SubtitleEmitter::new(None, None);

    let timed = emitter
        .emit("timed", Some(50_000_000), Some(20_000_000)) // 5 s - 7 s
        .unwrap()
        .unwrap();
    let untimed = emitter.emit("untimed", None, None).unwrap().unwrap();
    // Backend timing that would jump backwards is clamped forward.
    let late = emitter
        .emit("late", Some(10_000_000), Some(5_000_000)) // claims 1 s - 1.5 s
        .unwrap()
        .unwrap();

    assert_eq!(timed.end, Duration::from_secs(7));
    assert_eq!(untimed.start, timed.end);
    assert!(late.start >= untimed.end);
    assert!(late.end >= late.start + MIN_CUE_DURATION);
}

#[test]
fn both_formats_receive_every_cue() {
    let dir = tempfile::tempdir().unwrap();
    let srt_path = dir.path().join("dual.srt");
    let vtt_path = dir.path().join("dual.vtt");

    let srt = SrtWriter::create(&srt_path).unwrap();
    let vtt = VttWriter::create(&vtt_path).unwrap();
    let mut emitter = SubtitleEmitter::new(Some(srt), Some(vtt));

    emitter.emit("first", None, None).unwrap().unwrap();
    emitter.emit("second", None, None).unwrap().unwrap();

    let srt_contents = std::fs::read_to_string(&srt_path).unwrap();
    let vtt_contents = std::fs::read_to_string(&vtt_path).unwrap();
    for text in ["first", "second"] {
        assert!(srt_contents.contains(text));
        assert!(vtt_contents.contains(text));
    }
    // SRT numbers its cues; VTT does not.
    assert!(srt_contents.starts_with("1\n"));
    assert!(srt_contents.contains("\n2\n"));
}
