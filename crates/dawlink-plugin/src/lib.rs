//! Plugin abstraction layer.
//!
//! This crate defines the `Dsp` trait that plugin code running inside a
//! worker process implements. The transport layer drives the trait from
//! control messages sent by the host; plugin authors only deal with audio
//! blocks, MIDI events, and configuration callbacks.

use dawlink_core::{Frames, Sample, SampleRate};

/// A raw MIDI event as it travels over the control channel.
///
/// The transport treats the four fields as opaque integers; their meaning
/// follows the usual MIDI conventions (status nibble, channel, two data
/// bytes) but nothing here enforces that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiEvent {
    pub kind: i32,
    pub channel: i32,
    pub data1: i32,
    pub data2: i32,
}

impl MidiEvent {
    /// Note-off status nibble
    pub const NOTE_OFF: i32 = 8;
    /// Note-on status nibble
    pub const NOTE_ON: i32 = 9;
    /// Polyphonic aftertouch status nibble
    pub const KEY_PRESSURE: i32 = 10;
    /// Control change status nibble
    pub const CONTROL_CHANGE: i32 = 11;
    /// Pitch bend status nibble
    pub const PITCH_BEND: i32 = 14;

    pub const fn new(kind: i32, channel: i32, data1: i32, data2: i32) -> Self {
        Self {
            kind,
            channel,
            data1,
            data2,
        }
    }
}

/// DSP callbacks a worker-side plugin implements.
///
/// `process` is the only required method; everything else has a no-op
/// default so trivial plugins stay trivial. Blocks are channel-major:
/// all frames of channel 0, then all frames of channel 1, and so on.
/// Input and output channel counts (and thus slice lengths) are whatever
/// the embedding client negotiated with the host.
pub trait Dsp: Send {
    /// Process one block. `inputs` holds `input_channels * frames` samples,
    /// `outputs` holds `output_channels * frames` samples.
    fn process(&mut self, inputs: &[Sample], outputs: &mut [Sample]);

    /// The host changed the sample rate.
    fn update_sample_rate(&mut self, _sample_rate: SampleRate) {}

    /// The host changed the block size.
    fn update_buffer_size(&mut self, _frames: Frames) {}

    /// An incoming MIDI event, with its frame offset into the current block.
    fn process_midi_event(&mut self, _event: MidiEvent, _offset: i32) {}

    /// The host asked the plugin to show its editor UI.
    fn show_ui(&mut self) {}

    /// The host asked the plugin to hide its editor UI.
    fn hide_ui(&mut self) {}

    /// Serialize plugin state; the result is sent back to the host.
    fn save_settings_to_string(&mut self) -> String {
        String::new()
    }

    /// Persist plugin state to the given file path.
    fn save_settings_to_file(&mut self, _path: &str) {}

    /// Restore plugin state from a serialized string.
    fn load_settings_from_string(&mut self, _settings: &str) {}

    /// Restore plugin state from the given file path.
    fn load_settings_from_file(&mut self, _path: &str) {}

    /// Load a preset from the given file path.
    fn load_preset_from_file(&mut self, _path: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Gain(f32);

    impl Dsp for Gain {
        fn process(&mut self, inputs: &[Sample], outputs: &mut [Sample]) {
            for (o, i) in outputs.iter_mut().zip(inputs) {
                *o = i * self.0;
            }
        }
    }

    #[test]
    fn test_default_hooks_are_noops() {
        let mut dsp = Gain(0.5);
        dsp.update_sample_rate(48000);
        dsp.update_buffer_size(128);
        dsp.process_midi_event(MidiEvent::new(MidiEvent::NOTE_ON, 0, 60, 100), 0);
        assert_eq!(dsp.save_settings_to_string(), "");
    }

    #[test]
    fn test_process_applies_gain() {
        let mut dsp = Gain(2.0);
        let inputs = [1.0, -0.5, 0.25, 0.0];
        let mut outputs = [0.0; 4];
        dsp.process(&inputs, &mut outputs);
        assert_eq!(outputs, [2.0, -1.0, 0.5, 0.0]);
    }
}
