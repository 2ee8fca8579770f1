//! Input port behaviour through the mixer API
//!
//! Ticks are driven by hand with `process_tick`; period is 4 frames and each
//! ring holds 4 periods (64 bytes of 16-bit stereo).

mod helpers;

use helpers::*;
use submix::mixer::{OutputFlags, PortMessage, PortOptions, PortSlot, PortState, MESSAGE_QUEUE_CAPACITY};
use submix::{MixerConfig, MixerError, PcmConfig, SampleFormat};

const PERIOD: usize = 4;
const PERIOD_BYTES: usize = PERIOD * 4;

fn stereo() -> PcmConfig {
    PcmConfig::stereo_s16(RATE)
}

fn open(t: &TestMixer, flags: OutputFlags) -> PortSlot {
    t.mixer
        .create_input_port(stereo(), flags, PortOptions::default())
        .expect("port should open")
}

#[test]
fn test_write_then_read_loses_nothing() {
    let t = test_mixer(PERIOD);
    let slot = open(&t, OutputFlags::PRIMARY);
    assert_eq!(slot, PortSlot::System);

    let data = ramp_stereo(10, 0);
    assert_eq!(t.mixer.write(slot, &data).unwrap(), data.len());

    let mut out = vec![0u8; 64];
    assert_eq!(t.mixer.read(slot, &mut out[..24]).unwrap(), 24);
    assert_eq!(t.mixer.read(slot, &mut out[24..]).unwrap(), 16);
    assert_eq!(&out[..40], &data[..]);
    assert_eq!(t.mixer.read(slot, &mut out).unwrap(), 0);
    assert_eq!(t.mixer.consumed_frames(slot).unwrap(), 10);
}

#[test]
fn test_short_write_when_ring_full() {
    let t = test_mixer(PERIOD);
    let slot = open(&t, OutputFlags::PRIMARY);

    let data = ramp_stereo(25, 0);
    assert_eq!(t.mixer.write(slot, &data).unwrap(), 64);
    assert_eq!(t.mixer.write(slot, &data[64..]).unwrap(), 0);

    let mut out = vec![0u8; 16];
    assert_eq!(t.mixer.read(slot, &mut out).unwrap(), 16);
    assert_eq!(&out[..], &data[..16]);

    // room for exactly 4 more frames; the rest is retried later
    assert_eq!(t.mixer.write(slot, &data[64..84]).unwrap(), 16);

    let mut rest = vec![0u8; 64];
    assert_eq!(t.mixer.read(slot, &mut rest).unwrap(), 64);
    assert_eq!(&rest[..48], &data[16..64]);
    assert_eq!(&rest[48..], &data[64..80]);
}

#[test]
fn test_partial_frames_are_not_accepted() {
    let t = test_mixer(PERIOD);
    let slot = open(&t, OutputFlags::PRIMARY);

    assert_eq!(t.mixer.write(slot, &[1, 2, 3, 4, 5, 6]).unwrap(), 4);
    assert_eq!(t.mixer.write(slot, &[1, 2, 3]).unwrap(), 0);
}

#[test]
fn test_first_write_activates_port() {
    let t = test_mixer(PERIOD);
    let observer = RecordingObserver::new();
    let slot = t
        .mixer
        .create_input_port(
            stereo(),
            OutputFlags::PRIMARY,
            PortOptions::default().with_observer(observer.clone()),
        )
        .unwrap();

    assert_eq!(t.mixer.inport_state(slot).unwrap(), PortState::Created);
    t.mixer.write(slot, &constant_stereo(PERIOD, 7)).unwrap();
    assert_eq!(t.mixer.inport_state(slot).unwrap(), PortState::Active);
    assert_eq!(observer.states(), vec![PortState::Active]);

    t.mixer.write(slot, &constant_stereo(PERIOD, 7)).unwrap();
    assert_eq!(observer.states().len(), 1, "already active");
}

#[test]
fn test_presentation_monotonic_and_reset_by_flush() {
    let t = test_mixer(PERIOD);
    let slot = open(&t, OutputFlags::PRIMARY);

    assert!(matches!(
        t.mixer.presentation_position(slot),
        Err(MixerError::TimestampUnavailable(PortSlot::System))
    ));

    t.mixer.write(slot, &ramp_stereo(2 * PERIOD, 0)).unwrap();
    t.mixer.process_tick().unwrap();
    let (first, _) = t.mixer.presentation_position(slot).unwrap();
    assert_eq!(first, 4);

    t.mixer.process_tick().unwrap();
    let (second, _) = t.mixer.presentation_position(slot).unwrap();
    assert_eq!(second, 8);

    // starved tick: no new data, position holds
    t.mixer.process_tick().unwrap();
    let (third, _) = t.mixer.presentation_position(slot).unwrap();
    assert_eq!(third, 8);

    t.mixer.write(slot, &ramp_stereo(PERIOD, 0)).unwrap();
    t.mixer.post_message(slot, PortMessage::Flush).unwrap();
    let report = t.mixer.process_tick().unwrap();
    assert_eq!(report.flushed, vec![PortSlot::System]);
    assert_eq!(t.mixer.inport_state(slot).unwrap(), PortState::Flushed);
    assert_eq!(t.mixer.frames_since_flush(slot).unwrap(), 0);
    assert_eq!(t.mixer.consumed_frames(slot).unwrap(), 0);
    assert_eq!(t.mixer.port(slot).unwrap().occupied_bytes(), 0);
    assert!(t.mixer.presentation_position(slot).is_err());

    // counting resumes from the position held at the flush
    t.mixer.write(slot, &ramp_stereo(PERIOD, 0)).unwrap();
    assert_eq!(t.mixer.inport_state(slot).unwrap(), PortState::Active);
    t.mixer.process_tick().unwrap();
    let (after, _) = t.mixer.presentation_position(slot).unwrap();
    assert_eq!(after, 12);
    assert_eq!(t.mixer.frames_since_flush(slot).unwrap(), 4);
}

#[test]
fn test_padding_frames_not_counted() {
    let t = test_mixer(PERIOD);
    let slot = open(&t, OutputFlags::PRIMARY);
    t.mixer.set_padding_bytes(slot, PERIOD_BYTES).unwrap();
    assert_eq!(t.mixer.port(slot).unwrap().padding_frames(), 4);

    t.mixer.write(slot, &constant_stereo(2 * PERIOD, 100)).unwrap();

    let report = t.mixer.process_tick().unwrap();
    assert_eq!(report.mixed, vec![PortSlot::System]);
    assert_eq!(t.capture.len(), PERIOD_BYTES, "padding is still played");
    assert_eq!(t.mixer.consumed_frames(slot).unwrap(), 0);
    assert!(t.mixer.presentation_position(slot).is_err());

    t.mixer.process_tick().unwrap();
    assert_eq!(t.mixer.consumed_frames(slot).unwrap(), 4);
    assert_eq!(t.mixer.presentation_position(slot).unwrap().0, 4);
}

#[test]
fn test_pause_fades_direct_port_over_one_period() {
    let t = test_mixer(PERIOD);
    let observer = RecordingObserver::new();
    let slot = t
        .mixer
        .create_input_port(
            stereo(),
            OutputFlags::DIRECT,
            PortOptions::default().with_observer(observer.clone()),
        )
        .unwrap();
    assert_eq!(slot, PortSlot::Direct);

    t.mixer.write(slot, &constant_stereo(3 * PERIOD, 1000)).unwrap();
    t.mixer.process_tick().unwrap();
    assert_eq!(t.capture.samples_s16(), vec![1000; 8]);
    t.capture.clear();

    t.mixer.post_message(slot, PortMessage::Pause).unwrap();
    t.mixer.process_tick().unwrap();
    assert_eq!(
        t.capture.samples_s16(),
        vec![1000, 1000, 750, 750, 500, 500, 250, 250]
    );
    assert_eq!(t.mixer.inport_state(slot).unwrap(), PortState::Paused);
    t.capture.clear();

    // paused: nothing is read and nothing is written
    let report = t.mixer.process_tick().unwrap();
    assert!(!report.had_data());
    assert!(t.capture.bytes().is_empty());
    assert_eq!(t.mixer.port(slot).unwrap().occupied_bytes(), PERIOD_BYTES);

    t.mixer.post_message(slot, PortMessage::Resume).unwrap();
    t.mixer.process_tick().unwrap();
    assert_eq!(t.capture.samples_s16(), vec![0, 0, 250, 250, 500, 500, 750, 750]);
    assert_eq!(t.mixer.inport_state(slot).unwrap(), PortState::Active);

    assert_eq!(
        observer.states(),
        vec![
            PortState::Active,
            PortState::Pausing,
            PortState::Paused,
            PortState::Resuming,
            PortState::Active,
        ]
    );
}

#[test]
fn test_system_port_ignores_pause() {
    let t = test_mixer(PERIOD);
    let slot = open(&t, OutputFlags::PRIMARY);
    t.mixer.write(slot, &constant_stereo(2 * PERIOD, 1000)).unwrap();

    t.mixer.post_message(slot, PortMessage::Pause).unwrap();
    let report = t.mixer.process_tick().unwrap();

    assert_eq!(report.mixed, vec![PortSlot::System]);
    assert_eq!(t.capture.samples_s16(), vec![1000; 8]);
    assert_eq!(t.mixer.inport_state(slot).unwrap(), PortState::Active);
    assert_eq!(t.mixer.port(slot).unwrap().pending_messages(), 0);
}

#[test]
fn test_message_during_fade_is_deferred() {
    let t = test_mixer_with(
        MixerConfig {
            period_frames: PERIOD,
            fade_periods: 2,
            ..Default::default()
        },
        stereo(),
    );
    let slot = open(&t, OutputFlags::DIRECT);
    t.mixer.write(slot, &constant_stereo(4 * PERIOD, 800)).unwrap();

    t.mixer.post_message(slot, PortMessage::Pause).unwrap();
    t.mixer.post_message(slot, PortMessage::Resume).unwrap();
    let port = t.mixer.port(slot).unwrap();

    t.mixer.process_tick().unwrap();
    assert_eq!(port.state(), PortState::Pausing);
    assert_eq!(port.pending_messages(), 1);

    // RESUME waits while the fade-out finishes
    t.mixer.process_tick().unwrap();
    assert_eq!(port.state(), PortState::Paused);
    assert_eq!(port.pending_messages(), 1);

    t.mixer.process_tick().unwrap();
    assert_eq!(port.state(), PortState::Resuming);
    assert_eq!(port.pending_messages(), 0);

    t.mixer.process_tick().unwrap();
    assert_eq!(port.state(), PortState::Active);
}

#[test]
fn test_flush_on_created_port_is_dropped() {
    let t = test_mixer(PERIOD);
    let slot = open(&t, OutputFlags::PRIMARY);
    t.mixer.post_message(slot, PortMessage::Flush).unwrap();

    let report = t.mixer.process_tick().unwrap();
    assert!(report.flushed.is_empty());
    assert_eq!(t.mixer.inport_state(slot).unwrap(), PortState::Created);
    assert_eq!(t.mixer.port(slot).unwrap().pending_messages(), 0);
}

#[test]
fn test_message_queue_overflow() {
    let t = test_mixer(PERIOD);
    let slot = open(&t, OutputFlags::DIRECT);

    for _ in 0..MESSAGE_QUEUE_CAPACITY {
        t.mixer.post_message(slot, PortMessage::Pause).unwrap();
    }
    assert!(matches!(
        t.mixer.post_message(slot, PortMessage::Resume),
        Err(MixerError::ResourceExhausted(_))
    ));
}

#[test]
fn test_volume_validation() {
    let t = test_mixer(PERIOD);
    let slot = open(&t, OutputFlags::PRIMARY);

    assert!(matches!(
        t.mixer.set_volume(slot, 1.5),
        Err(MixerError::InvalidArgument(_))
    ));
    assert!(matches!(
        t.mixer.set_volume(slot, -0.1),
        Err(MixerError::InvalidArgument(_))
    ));
    assert_eq!(t.mixer.volume(slot).unwrap(), 1.0);

    t.mixer.set_volume(slot, 0.25).unwrap();
    assert_eq!(t.mixer.volume(slot).unwrap(), 0.25);

    let rejected = t.mixer.create_input_port(
        stereo(),
        OutputFlags::DIRECT,
        PortOptions::default().with_volume(2.0),
    );
    assert!(matches!(rejected, Err(MixerError::InvalidArgument(_))));
    assert!(!t.mixer.has_port(PortSlot::Direct));
}

#[test]
fn test_missing_port_and_bad_slot() {
    let t = test_mixer(PERIOD);

    assert!(matches!(
        t.mixer.write(PortSlot::Direct, &[0; 4]),
        Err(MixerError::InvalidArgument(_))
    ));
    assert!(matches!(
        t.mixer.destroy_input_port(PortSlot::System),
        Err(MixerError::InvalidArgument(_))
    ));
    assert!(matches!(
        submix::AudioMixer::slot_at(2),
        Err(MixerError::InvalidArgument(_))
    ));
    assert_eq!(submix::AudioMixer::slot_at(1).unwrap(), PortSlot::Direct);
}

#[test]
fn test_unsupported_port_configs() {
    let t = test_mixer(PERIOD);

    for config in [
        PcmConfig::new(RATE, 2, SampleFormat::S24Packed),
        PcmConfig::new(RATE, 2, SampleFormat::F32),
        PcmConfig::new(RATE, 6, SampleFormat::S16),
        PcmConfig::new(44_100, 2, SampleFormat::S16),
    ] {
        let result = t
            .mixer
            .create_input_port(config, OutputFlags::PRIMARY, PortOptions::default());
        assert!(
            matches!(result, Err(MixerError::UnsupportedConfiguration(_))),
            "{} should be rejected",
            config
        );
    }

    let hwsync_on_system = t.mixer.create_input_port(
        stereo(),
        OutputFlags::PRIMARY,
        PortOptions::default().with_metadata_provider(ScriptedDrift::new()),
    );
    assert!(matches!(hwsync_on_system, Err(MixerError::InvalidArgument(_))));
}

#[test]
fn test_recreate_replaces_port() {
    let t = test_mixer(PERIOD);
    let slot = open(&t, OutputFlags::PRIMARY);
    t.mixer.write(slot, &constant_stereo(PERIOD, 5)).unwrap();

    let again = open(&t, OutputFlags::PRIMARY | OutputFlags::DEEP_BUFFER);
    assert_eq!(again, slot);
    assert_eq!(t.mixer.inport_state(slot).unwrap(), PortState::Created);
    assert_eq!(t.mixer.port(slot).unwrap().occupied_bytes(), 0);
    assert_eq!(t.mixer.snapshot().ports.len(), 1);

    t.mixer.destroy_input_port(slot).unwrap();
    assert!(!t.mixer.has_port(slot));
}

#[test]
fn test_latency_counts_queued_frames_plus_period() {
    let t = test_mixer(PERIOD);
    let slot = open(&t, OutputFlags::PRIMARY);
    assert_eq!(t.mixer.inport_latency_frames(slot).unwrap(), 4);

    t.mixer.write(slot, &constant_stereo(2 * PERIOD, 1)).unwrap();
    assert_eq!(t.mixer.inport_latency_frames(slot).unwrap(), 12);
    assert_eq!(t.mixer.mixer_latency_frames(), 4);
}

#[test]
fn test_input_available_notified_every_tick() {
    let t = test_mixer(PERIOD);
    let observer = RecordingObserver::new();
    let slot = t
        .mixer
        .create_input_port(
            stereo(),
            OutputFlags::PRIMARY,
            PortOptions::default().with_observer(observer.clone()),
        )
        .unwrap();

    t.mixer.process_tick().unwrap();
    assert_eq!(observer.available_count(), 1, "starved ports are told to refill");

    t.mixer.write(slot, &constant_stereo(PERIOD, 1)).unwrap();
    t.mixer.process_tick().unwrap();
    assert_eq!(observer.available_count(), 2);
}

#[test]
fn test_mono_port_rings_hold_mono_frames() {
    let t = test_mixer(PERIOD);
    let slot = t
        .mixer
        .create_input_port(
            PcmConfig::new(RATE, 1, SampleFormat::S16),
            OutputFlags::PRIMARY,
            PortOptions::default(),
        )
        .unwrap();

    let port = t.mixer.port(slot).unwrap();
    assert_eq!(port.period_bytes(), PERIOD * 2);
    assert_eq!(port.capacity(), PERIOD * 2 * 4);

    assert_eq!(t.mixer.write(slot, &s16_bytes(&[1, 2, 3])).unwrap(), 6);
}
