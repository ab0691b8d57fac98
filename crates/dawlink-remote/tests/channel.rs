//! End-to-end channel tests, with the host and worker endpoints driven
//! from two threads of one process. The shared-memory transport does not
//! care whether its two ends live in different processes; threads keep the
//! scenarios deterministic.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use dawlink_core::Sample;
use dawlink_plugin::{Dsp, MidiEvent};
use dawlink_remote::{
    ChannelError, ClientState, Dispatcher, Message, MessageId, RemoteClient, RemoteHost, ShmFifo,
};

/// What the worker-side DSP observed, readable from the test thread.
#[derive(Default)]
struct Probe {
    sample_rate: AtomicU32,
    buffer_size: AtomicUsize,
    midi: Mutex<Vec<(MidiEvent, i32)>>,
}

/// Copies inputs to outputs and records every configuration callback.
struct Mirror {
    probe: Arc<Probe>,
}

impl Dsp for Mirror {
    fn process(&mut self, inputs: &[Sample], outputs: &mut [Sample]) {
        let copied = inputs.len().min(outputs.len());
        outputs[..copied].copy_from_slice(&inputs[..copied]);
        outputs[copied..].fill(0.0);
    }

    fn update_sample_rate(&mut self, sample_rate: u32) {
        self.probe.sample_rate.store(sample_rate, Ordering::SeqCst);
    }

    fn update_buffer_size(&mut self, frames: usize) {
        self.probe.buffer_size.store(frames, Ordering::SeqCst);
    }

    fn process_midi_event(&mut self, event: MidiEvent, offset: i32) {
        self.probe.midi.lock().push((event, offset));
    }

    fn save_settings_to_string(&mut self) -> String {
        "mirror-settings".to_owned()
    }
}

fn start_worker(
    host: &RemoteHost,
    probe: Arc<Probe>,
) -> JoinHandle<Result<ClientState, ChannelError>> {
    let (uplink, downlink) = host.keys();
    thread::spawn(move || {
        let mut client = RemoteClient::connect(uplink, downlink, Box::new(Mirror { probe }))?;
        client.run()?;
        Ok(client.state())
    })
}

/// Request/reply against the worker; once the reply is back, everything the
/// host sent earlier is guaranteed dispatched.
fn sync_with_worker(host: &mut RemoteHost) {
    let settings = host.save_settings_to_string().expect("settings round-trip");
    assert_eq!(settings, "mirror-settings");
}

#[test]
fn test_handshake_pushes_current_configuration() {
    let mut host = RemoteHost::new(44100, 256).expect("host");
    let probe = Arc::new(Probe::default());
    let worker = start_worker(&host, Arc::clone(&probe));

    host.wait_until_ready().expect("ready");
    assert!(host.is_ready());

    sync_with_worker(&mut host);
    assert_eq!(probe.sample_rate.load(Ordering::SeqCst), 44100);
    assert_eq!(probe.buffer_size.load(Ordering::SeqCst), 256);

    host.close().expect("close");
    assert_eq!(worker.join().expect("join").expect("worker"), ClientState::Detached);
}

#[test]
fn test_block_roundtrip_through_audio_region() {
    let mut host = RemoteHost::new(44100, 4).expect("host");
    let probe = Arc::new(Probe::default());
    let worker = start_worker(&host, Arc::clone(&probe));
    host.wait_until_ready().expect("ready");

    let input: Vec<Sample> = vec![1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0];
    let mut output = vec![0.0; 8];
    host.process(&input, &mut output, true).expect("process");
    assert_eq!(output, input);

    host.close().expect("close");
    worker.join().expect("join").expect("worker");
}

#[test]
fn test_deferred_wait_for_processing() {
    let mut host = RemoteHost::new(44100, 4).expect("host");
    let probe = Arc::new(Probe::default());
    let worker = start_worker(&host, Arc::clone(&probe));
    host.wait_until_ready().expect("ready");

    let input: Vec<Sample> = (0..8).map(|i| i as Sample).collect();
    let mut output = vec![0.0; 8];
    host.process(&input, &mut output, false).expect("start");
    assert_eq!(output, vec![0.0; 8]);
    host.wait_for_processing(&mut output).expect("finish");
    assert_eq!(output, input);

    host.close().expect("close");
    worker.join().expect("join").expect("worker");
}

#[test]
fn test_buffer_resize_replaces_audio_region() {
    let mut host = RemoteHost::new(44100, 256).expect("host");
    let probe = Arc::new(Probe::default());
    let worker = start_worker(&host, Arc::clone(&probe));
    host.wait_until_ready().expect("ready");

    // Establish the small region first.
    let small: Vec<Sample> = vec![0.5; 512];
    let mut small_out = vec![0.0; 512];
    host.process(&small, &mut small_out, true).expect("small block");
    assert_eq!(small_out, small);

    // Growing the block size swaps in a fresh region under a new key.
    host.update_buffer_size(512).expect("resize");
    sync_with_worker(&mut host);
    assert_eq!(probe.buffer_size.load(Ordering::SeqCst), 512);

    let mut large = vec![3.0; 1024];
    large[512..].fill(4.0);
    let mut large_out = vec![0.0; 1024];
    host.process(&large, &mut large_out, true).expect("large block");
    assert_eq!(large_out, large);

    host.close().expect("close");
    worker.join().expect("join").expect("worker");
}

#[test]
fn test_midi_event_reaches_dsp_hook() {
    let mut host = RemoteHost::new(44100, 4).expect("host");
    let probe = Arc::new(Probe::default());
    let worker = start_worker(&host, Arc::clone(&probe));
    host.wait_until_ready().expect("ready");

    let note_on = MidiEvent::new(MidiEvent::NOTE_ON, 0, 60, 100);
    host.process_midi_event(note_on, 0).expect("midi");
    sync_with_worker(&mut host);

    let seen = probe.midi.lock().clone();
    assert_eq!(seen, vec![(note_on, 0)]);

    host.close().expect("close");
    worker.join().expect("join").expect("worker");
}

#[test]
fn test_channel_count_renegotiation() {
    let mut host = RemoteHost::new(44100, 8).expect("host");
    let (uplink, downlink) = host.keys();
    let probe = Arc::new(Probe::default());
    let worker = {
        let probe = Arc::clone(&probe);
        thread::spawn(move || -> Result<(), ChannelError> {
            let mut client = RemoteClient::connect(uplink, downlink, Box::new(Mirror { probe }))?;
            client.set_input_count(1)?;
            client.set_output_count(1)?;
            client.run()
        })
    };

    host.wait_until_ready().expect("ready");
    assert_eq!(host.input_count(), 1);
    assert_eq!(host.output_count(), 1);

    let input: Vec<Sample> = (0..8).map(|i| i as Sample).collect();
    let mut output = vec![0.0; 8];
    host.process(&input, &mut output, true).expect("mono block");
    assert_eq!(output, input);

    host.close().expect("close");
    worker.join().expect("join").expect("worker");
}

/// Minimal stand-in for a host that violates the protocol.
struct RawPeer {
    endpoint: dawlink_remote::Endpoint,
}

impl Dispatcher for RawPeer {
    fn endpoint(&self) -> &dawlink_remote::Endpoint {
        &self.endpoint
    }

    fn dispatch(&mut self, _message: &Message) -> Result<bool, ChannelError> {
        Ok(true)
    }
}

#[test]
fn test_start_processing_before_configuration_is_rejected() {
    let uplink = ShmFifo::create().expect("uplink");
    let downlink = ShmFifo::create().expect("downlink");
    let (uplink_key, downlink_key) = (uplink.key(), downlink.key());
    let mut peer = RawPeer {
        endpoint: dawlink_remote::Endpoint::new(uplink, downlink),
    };

    let probe = Arc::new(Probe::default());
    let worker = {
        let probe = Arc::clone(&probe);
        thread::spawn(move || -> Result<ClientState, ChannelError> {
            let mut client =
                RemoteClient::connect(uplink_key, downlink_key, Box::new(Mirror { probe }))?;
            client.run()?;
            Ok(client.state())
        })
    };

    // Swallow the startup queries and the readiness notice without ever
    // answering them, then start processing on the unconfigured worker.
    peer.wait_for_reply(MessageId::InitDone, false).expect("init");
    peer.send(&Message::new(MessageId::StartProcessing)).expect("send");

    let reply = peer.fetch_and_dispatch_one().expect("reply");
    assert!(reply.is(MessageId::GeneralFailure));
    assert_eq!(worker.join().expect("join").expect("worker"), ClientState::Detached);
}
