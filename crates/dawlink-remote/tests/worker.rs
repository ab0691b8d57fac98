//! Drives the dawlink-worker binary across a real process boundary.

use std::process::Command;

use dawlink_core::Sample;
use dawlink_plugin::MidiEvent;
use dawlink_remote::RemoteHost;

fn worker_command() -> Command {
    Command::new(env!("CARGO_BIN_EXE_dawlink-worker"))
}

#[test]
fn test_worker_process_lifecycle() {
    let mut host = RemoteHost::new(48000, 8).expect("host");
    host.spawn_worker(&mut worker_command()).expect("spawn");
    assert!(host.is_ready());
    assert!(host.worker_alive());

    let input: Vec<Sample> = (0..16).map(|i| i as Sample).collect();
    let mut output = vec![0.0; 16];
    host.process(&input, &mut output, true).expect("process");
    assert_eq!(output, input);

    host.process_midi_event(MidiEvent::new(MidiEvent::NOTE_ON, 0, 60, 100), 0)
        .expect("midi");

    // Clean shutdown: the worker must exit 0 on ClosePlugin.
    let code = host.close().expect("close");
    assert_eq!(code, Some(0));
}

#[test]
fn test_worker_survives_buffer_resize() {
    let mut host = RemoteHost::new(48000, 4).expect("host");
    host.spawn_worker(&mut worker_command()).expect("spawn");

    let small: Vec<Sample> = vec![0.25; 8];
    let mut small_out = vec![0.0; 8];
    host.process(&small, &mut small_out, true).expect("small");
    assert_eq!(small_out, small);

    host.update_buffer_size(16).expect("resize");
    let large: Vec<Sample> = (0..32).map(|i| i as Sample * 0.5).collect();
    let mut large_out = vec![0.0; 32];
    host.process(&large, &mut large_out, true).expect("large");
    assert_eq!(large_out, large);

    assert_eq!(host.close().expect("close"), Some(0));
}
