//! End-to-end renders through the public engine API.

use beatgrid_core::channel::EngineHandle;
use beatgrid_core::config::EngineConfig;
use beatgrid_core::dsp::voice::BuiltinVoiceFactory;
use beatgrid_core::engine::{AudioProcessor, create_engine};
use beatgrid_core::messages::{ControlMessage, StatusEvent, TransportState};
use beatgrid_core::project::{
    AutomationCurve, AutomationPoint, Clip, EffectDefinition, Event, PatternDefinition, Project,
    SettingValue, Timeline, TimelineEffect, TimelineTrack, TimelineTrackKind, Track, ViewMode,
};
use beatgrid_core::render::{RenderOutput, render_frames, render_project};

const SR: f64 = 8000.0;
const KICK: &str = "__pattern_p1_kick";

fn event(id: &str, time: f64, track: &str) -> Event {
    Event {
        id: id.into(),
        time,
        velocity: 1.0,
        pitch: 36.0,
        duration: None,
        instrument_id: track.into(),
    }
}

fn timeline_track(id: &str, kind: TimelineTrackKind, pattern: Option<&str>) -> TimelineTrack {
    TimelineTrack {
        id: id.into(),
        kind,
        pattern_id: pattern.map(str::to_string),
        volume: 1.0,
        mute: false,
        solo: false,
        order: 0,
    }
}

/// A one-bar kick pattern placed over a 16-beat arrangement, with an effect
/// lane holding `reverb` (if any) for the whole song.
fn kick_arrangement(reverb: Option<(f64, f64)>) -> Project {
    let mut project = Project {
        view_mode: ViewMode::Arrangement,
        patterns: vec![PatternDefinition {
            id: "p1".into(),
            base_meter: Some(4.0),
        }],
        ..Project::default()
    };
    project.tracks.push(Track::new(KICK, "kick"));
    project.events.push(event("k", 0.0, KICK));

    let mut timeline = Timeline {
        tracks: vec![
            timeline_track("lane", TimelineTrackKind::Pattern, Some("p1")),
            timeline_track("fx", TimelineTrackKind::Effect, None),
        ],
        clips: vec![Clip {
            id: "c1".into(),
            start_beat: 0.0,
            duration: 16.0,
            track_id: "lane".into(),
            pattern_id: None,
        }],
        total_length: 16.0,
        ..Timeline::default()
    };
    if let Some((wet, dry)) = reverb {
        project.effects.push(EffectDefinition {
            id: "verb".into(),
            effect_type: "reverb".into(),
            settings: [
                ("wet".to_string(), SettingValue::Number(wet)),
                ("dry".to_string(), SettingValue::Number(dry)),
                ("roomSize".to_string(), SettingValue::Number(0.8)),
            ]
            .into_iter()
            .collect(),
        });
        timeline.effects.push(TimelineEffect {
            id: "verb-1".into(),
            start_beat: 0.0,
            duration: 16.0,
            track_id: "fx".into(),
            effect_id: "verb".into(),
            target_track_id: None,
        });
    }
    project.timeline = Some(timeline);
    project
}

fn render(project: Project, seconds: f64) -> RenderOutput {
    render_project(
        project,
        EngineConfig::new(SR, 128),
        Box::new(BuiltinVoiceFactory),
        seconds,
    )
    .unwrap()
}

#[test]
fn reverb_tail_reaches_the_end_of_the_song() {
    let dry = render(kick_arrangement(None), 8.0);
    let wet = render(kick_arrangement(Some((1.0, 0.0))), 8.0);
    assert_eq!(dry.len(), 64000);

    // last 100 ms of a 16-beat song at 120 BPM
    let tail = 63200..64000;
    assert!(dry.left[tail.clone()].iter().all(|s| *s == 0.0));
    assert!(dry.right[tail.clone()].iter().all(|s| *s == 0.0));
    assert!(wet.left[tail.clone()].iter().any(|s| *s != 0.0));
    assert!(wet.right[tail].iter().any(|s| *s != 0.0));
}

#[test]
fn transparent_effect_changes_nothing() {
    let plain = render(kick_arrangement(None), 3.0);
    let transparent = render(kick_arrangement(Some((0.0, 1.0))), 3.0);
    assert!(plain.left.iter().any(|s| *s != 0.0));
    assert_eq!(plain, transparent);
}

fn kick_loop() -> Project {
    let mut project = Project::default();
    project.tracks.push(Track::new("kick", "kick"));
    project.events = vec![event("k0", 0.0, "kick"), event("k2", 2.0, "kick")];
    project
}

#[test]
fn every_loop_highlights_each_note_once() {
    let (mut handle, mut processor) =
        create_engine(EngineConfig::new(SR, 128), Box::new(BuiltinVoiceFactory)).unwrap();
    handle
        .send(ControlMessage::LoadProject(Box::new(kick_loop())))
        .unwrap();
    handle
        .send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();

    // three 2-second loops, drained once per loop
    let mut ids = Vec::new();
    for _ in 0..3 {
        render_frames(&mut processor, 16000);
        for status in handle.drain_status() {
            if let StatusEvent::PlaybackUpdate { event_ids, .. } = status {
                ids.extend(event_ids);
            }
        }
    }
    assert_eq!(ids, ["k0", "k2", "k0", "k2", "k0", "k2"]);
    assert_eq!(processor.playback().loop_count(), 2);
}

#[test]
fn play_from_zero_after_stop_matches_a_fresh_start() {
    let fresh = render(kick_loop(), 0.5);

    let (mut handle, mut processor) =
        create_engine(EngineConfig::new(SR, 128), Box::new(BuiltinVoiceFactory)).unwrap();
    handle
        .send(ControlMessage::LoadProject(Box::new(kick_loop())))
        .unwrap();
    handle
        .send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();
    render_frames(&mut processor, 9000);
    handle
        .send(ControlMessage::SetTransport {
            state: TransportState::Stop,
            position: 0.0,
        })
        .unwrap();
    handle
        .send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();
    let restarted = render_frames(&mut processor, 4000);

    for (i, (a, b)) in fresh.left.iter().zip(&restarted.left).enumerate() {
        assert!((a - b).abs() < 1e-6, "frame {i}: {a} vs {b}");
    }
}

fn two_tracks(mute: [bool; 2], solo: [bool; 2]) -> Project {
    let mut project = Project::default();
    for (i, (id, kind)) in [("kick", "kick"), ("lead", "tone")].into_iter().enumerate() {
        let mut track = Track::new(id, kind);
        track.mute = mute[i];
        track.solo = solo[i];
        project.tracks.push(track);
        project.events.push(event(&format!("{id}-0"), 0.0, id));
    }
    project
}

#[test]
fn mute_and_solo_select_audible_tracks() {
    let both = render(two_tracks([false, false], [false, false]), 0.25);
    let kick_only = render(two_tracks([false, true], [false, false]), 0.25);
    let kick_solo = render(two_tracks([false, false], [true, false]), 0.25);
    let muted_solo = render(two_tracks([true, false], [true, false]), 0.25);

    assert_eq!(kick_only, kick_solo);
    assert_ne!(both, kick_only);
    assert!(kick_only.left.iter().any(|s| *s != 0.0));
    // a soloed but muted track stays silent, and the others are not soloed
    assert!(muted_solo.left.iter().all(|s| *s == 0.0));
}

#[test]
fn silence_in_arrangement_is_reported() {
    let mut project = kick_arrangement(None);
    if let Some(timeline) = project.timeline.as_mut() {
        timeline.clips[0].duration = 4.0;
    }
    let (mut handle, mut processor) =
        create_engine(EngineConfig::new(SR, 128), Box::new(BuiltinVoiceFactory)).unwrap();
    handle
        .send(ControlMessage::LoadProject(Box::new(project)))
        .unwrap();
    handle
        .send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();

    let mut quiet = Vec::new();
    for _ in 0..8 {
        render_frames(&mut processor, 8000);
        for status in handle.drain_status() {
            if let StatusEvent::QuietPeriod {
                beat,
                duration_seconds,
            } = status
            {
                quiet.push((beat, duration_seconds));
            }
        }
    }
    assert_eq!(quiet.len(), 1, "one report per quiet run: {quiet:?}");
    let (beat, seconds) = quiet[0];
    assert!(beat > 0.5 && beat < 4.0, "quiet from beat {beat}");
    assert!(seconds >= 0.5);
}

#[test]
fn json_messages_drive_the_engine() {
    let (mut handle, mut processor) =
        create_engine(EngineConfig::new(SR, 128), Box::new(BuiltinVoiceFactory)).unwrap();
    handle
        .send_json(
            r#"{"type":"loadProject","bpm":60,"tracks":[{"id":"t","instrumentType":"tone"}],
                "events":[{"id":"a","time":0,"velocity":100,"pitch":69,"instrumentId":"t"}]}"#,
        )
        .unwrap();
    handle
        .send_json(r#"{"type":"setTransport","state":"play","position":0}"#)
        .unwrap();
    let out = render_frames(&mut processor, 2000);
    assert_eq!(processor.playback().bpm(), 60.0);
    assert!(out.left.iter().any(|s| *s != 0.0));
}

/// Load `project`, apply `setup`, and start playing from zero.
fn playing(project: Project, setup: Vec<ControlMessage>) -> (EngineHandle, AudioProcessor) {
    let (mut handle, processor) =
        create_engine(EngineConfig::new(SR, 128), Box::new(BuiltinVoiceFactory)).unwrap();
    handle
        .send(ControlMessage::LoadProject(Box::new(project)))
        .unwrap();
    for message in setup {
        handle.send(message).unwrap();
    }
    handle
        .send(ControlMessage::SetTransport {
            state: TransportState::Play,
            position: 0.0,
        })
        .unwrap();
    (handle, processor)
}

#[test]
fn track_volume_automation_takes_effect_at_its_beat() {
    let curve = AutomationCurve {
        points: vec![
            AutomationPoint { beat: 0.0, value: 1.0 },
            AutomationPoint { beat: 1.0, value: 1.0 },
            AutomationPoint { beat: 1.5, value: 0.5 },
        ],
        min: None,
        max: None,
    };
    let (_h, mut plain) = playing(kick_loop(), Vec::new());
    let (_h2, mut automated) = playing(
        kick_loop(),
        vec![ControlMessage::SetAutomation {
            key: "track:kick:volume".into(),
            curve: Some(curve),
        }],
    );
    // one beat is 4000 frames at 120 BPM
    let a = render_frames(&mut plain, 12000);
    let b = render_frames(&mut automated, 12000);

    assert!(a.left[..4000].iter().any(|s| *s != 0.0));
    assert_eq!(a.left[..4000], b.left[..4000], "full volume before the ramp");
    let second_kick = 8000..12000;
    assert!(a.left[second_kick.clone()].iter().any(|s| s.abs() > 0.01));
    for i in second_kick {
        assert!((b.left[i] - 0.5 * a.left[i]).abs() < 1e-6, "frame {i}: {} vs {}", b.left[i], a.left[i]);
    }
}

#[test]
fn adding_a_track_keeps_the_reverb_tail() {
    let (_h, mut steady) = playing(kick_arrangement(Some((1.0, 0.0))), Vec::new());
    let (mut handle, mut edited) = playing(kick_arrangement(Some((1.0, 0.0))), Vec::new());

    // the kick at beat 0 is ringing through the reverb at 1 s
    render_frames(&mut steady, 8000);
    render_frames(&mut edited, 8000);
    handle
        .send(ControlMessage::UpdateTrack {
            track_id: "hat".into(),
            track: Track::new("hat", "tone"),
        })
        .unwrap();

    let expected = render_frames(&mut steady, 4000);
    let got = render_frames(&mut edited, 4000);
    assert!(expected.left.iter().any(|s| *s != 0.0), "reverb tail is audible");
    for (i, (a, b)) in expected.left.iter().zip(&got.left).enumerate() {
        assert!((a - b).abs() < 1e-6, "frame {i}: {a} vs {b}");
    }
}
