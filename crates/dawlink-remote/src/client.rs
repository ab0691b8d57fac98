//! Worker-side endpoint.
//!
//! A `RemoteClient` attaches to the host's FIFOs, announces itself, and
//! dispatches control messages into the embedded [`Dsp`]. Audio blocks are
//! exchanged through the shared region the host manages; the client only
//! ever attaches and detaches it on request.

use std::mem;
use std::slice;

use dawlink_core::{ChannelCount, DEFAULT_BLOCK_SIZE, DEFAULT_CHANNELS, Frames, Sample, SampleRate};
use dawlink_plugin::{Dsp, MidiEvent};

use crate::endpoint::{Dispatcher, Endpoint};
use crate::error::ChannelError;
use crate::fifo::ShmFifo;
use crate::message::{Message, MessageId};
use crate::shm::SharedSegment;

/// Lifecycle of a worker endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// FIFOs attached; sample rate and block size not yet both received.
    AwaitingConfig,
    /// Fully configured and between blocks.
    Idle,
    /// Inside the DSP callback for the current block.
    Processing,
    /// Terminal wind-down after `ClosePlugin` or a failure.
    Closing,
    /// Audio region released, message loop finished.
    Detached,
}

/// The worker side of the remote plugin channel.
pub struct RemoteClient {
    endpoint: Endpoint,
    dsp: Box<dyn Dsp>,
    audio: Option<SharedSegment>,
    inputs: ChannelCount,
    outputs: ChannelCount,
    frames: Frames,
    have_sample_rate: bool,
    have_buffer_size: bool,
    state: ClientState,
}

impl RemoteClient {
    /// Attach to the host's FIFOs by the keys passed on the command line:
    /// `uplink` carries our messages to the host, `downlink` the host's
    /// messages to us. The current sample rate and block size are queried
    /// immediately; the answers arrive once [`run`](Self::run) dispatches.
    pub fn connect(
        uplink_key: i32,
        downlink_key: i32,
        dsp: Box<dyn Dsp>,
    ) -> Result<Self, ChannelError> {
        let outgoing = ShmFifo::attach(uplink_key)?;
        let incoming = ShmFifo::attach(downlink_key)?;
        let client = Self {
            endpoint: Endpoint::new(incoming, outgoing),
            dsp,
            audio: None,
            inputs: DEFAULT_CHANNELS,
            outputs: DEFAULT_CHANNELS,
            frames: DEFAULT_BLOCK_SIZE,
            have_sample_rate: false,
            have_buffer_size: false,
            state: ClientState::AwaitingConfig,
        };
        client.send(&Message::new(MessageId::SampleRateInformation))?;
        client.send(&Message::new(MessageId::BufferSizeInformation))?;
        Ok(client)
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Block size last pushed by the host.
    pub fn buffer_size(&self) -> Frames {
        self.frames
    }

    /// Renegotiate the input channel count with the host.
    pub fn set_input_count(&mut self, count: ChannelCount) -> Result<(), ChannelError> {
        self.inputs = count;
        self.send(&Message::new(MessageId::ChangeInputCount).with_int(count as i32))
    }

    /// Renegotiate the output channel count with the host.
    pub fn set_output_count(&mut self, count: ChannelCount) -> Result<(), ChannelError> {
        self.outputs = count;
        self.send(&Message::new(MessageId::ChangeOutputCount).with_int(count as i32))
    }

    /// Announce readiness, then dispatch messages until the host closes the
    /// channel.
    ///
    /// A dispatch error is reported to the host as `GeneralFailure` before
    /// tearing down, per the propagation policy of the protocol.
    pub fn run(&mut self) -> Result<(), ChannelError> {
        self.send(&Message::new(MessageId::InitDone))?;
        loop {
            let message = self.endpoint.receive();
            match self.dispatch(&message) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    tracing::error!(error = %err, "dispatch failed, shutting down");
                    let _ = self.send(&Message::new(MessageId::GeneralFailure));
                    self.audio = None;
                    self.state = ClientState::Detached;
                    return Err(err);
                }
            }
        }
        // Detach before the host destroys the region.
        self.audio = None;
        self.state = ClientState::Detached;
        Ok(())
    }

    fn configured(&self) -> bool {
        self.have_sample_rate && self.have_buffer_size
    }

    fn note_configured(&mut self) {
        if self.state == ClientState::AwaitingConfig && self.configured() {
            self.state = ClientState::Idle;
        }
    }

    /// Swap the audio region mapping. Key 0 means detach only.
    fn change_audio_region(&mut self, key: i32, size: i32) -> Result<(), ChannelError> {
        self.audio = None;
        if key == 0 {
            return Ok(());
        }
        let region = SharedSegment::attach(key)?;
        if region.size() < size as usize {
            return Err(ChannelError::Protocol(format!(
                "audio region {key} is {} bytes, host announced {size}",
                region.size()
            )));
        }
        tracing::debug!(key, size, "attached audio region");
        self.audio = Some(region);
        Ok(())
    }

    /// Run the DSP over the shared region for one block.
    #[allow(unsafe_code)]
    fn process_block(&mut self) {
        let Some(region) = self.audio.as_ref() else {
            tracing::warn!("StartProcessing without an audio region, producing nothing");
            return;
        };
        let floats = region.size() / mem::size_of::<Sample>();
        // Ownership of the region flipped to us with StartProcessing and
        // flips back when ProcessingDone is sent.
        let samples =
            unsafe { slice::from_raw_parts_mut(region.as_ptr().cast::<Sample>(), floats) };
        let split = (self.inputs * self.frames).min(floats);
        let (inputs, rest) = samples.split_at_mut(split);
        let out_len = (self.outputs * self.frames).min(rest.len());
        self.dsp.process(inputs, &mut rest[..out_len]);
    }
}

impl Dispatcher for RemoteClient {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn dispatch(&mut self, message: &Message) -> Result<bool, ChannelError> {
        match MessageId::from_raw(message.id) {
            Some(MessageId::GeneralFailure) | Some(MessageId::ClosePlugin) => {
                self.state = ClientState::Closing;
                Ok(false)
            }
            Some(MessageId::SampleRateInformation) => {
                self.dsp
                    .update_sample_rate(message.int_arg(0).max(0) as SampleRate);
                self.have_sample_rate = true;
                self.note_configured();
                Ok(true)
            }
            Some(MessageId::BufferSizeInformation) => {
                let frames = message.int_arg(0);
                if frames > 0 {
                    self.frames = frames as Frames;
                    self.dsp.update_buffer_size(self.frames);
                }
                self.have_buffer_size = true;
                self.note_configured();
                Ok(true)
            }
            Some(MessageId::MidiEvent) => {
                let event = MidiEvent::new(
                    message.int_arg(0),
                    message.int_arg(1),
                    message.int_arg(2),
                    message.int_arg(3),
                );
                self.dsp.process_midi_event(event, message.int_arg(4));
                Ok(true)
            }
            Some(MessageId::StartProcessing) => {
                if self.state == ClientState::AwaitingConfig {
                    // Processing before configuration is a protocol breach;
                    // report it and wind down.
                    tracing::error!("StartProcessing before configuration");
                    self.send(&Message::new(MessageId::GeneralFailure))?;
                    self.state = ClientState::Closing;
                    return Ok(false);
                }
                self.state = ClientState::Processing;
                self.process_block();
                self.state = ClientState::Idle;
                self.send(&Message::new(MessageId::ProcessingDone))?;
                Ok(true)
            }
            Some(MessageId::ChangeSharedMemoryKey) => {
                self.change_audio_region(message.int_arg(0), message.int_arg(1))?;
                Ok(true)
            }
            Some(MessageId::ShowUi) => {
                self.dsp.show_ui();
                Ok(true)
            }
            Some(MessageId::HideUi) => {
                self.dsp.hide_ui();
                Ok(true)
            }
            Some(MessageId::SaveSettingsToString) => {
                let settings = self.dsp.save_settings_to_string();
                self.send(&Message::new(MessageId::SaveSettingsToString).with_str(settings))?;
                Ok(true)
            }
            Some(MessageId::SaveSettingsToFile) => {
                self.dsp.save_settings_to_file(message.str_arg(0));
                Ok(true)
            }
            Some(MessageId::LoadSettingsFromString) => {
                self.dsp.load_settings_from_string(message.str_arg(0));
                Ok(true)
            }
            Some(MessageId::LoadSettingsFromFile) => {
                self.dsp.load_settings_from_file(message.str_arg(0));
                Ok(true)
            }
            Some(MessageId::LoadPresetFromFile) => {
                self.dsp.load_preset_from_file(message.str_arg(0));
                Ok(true)
            }
            Some(MessageId::Undefined) => Ok(true),
            _ => {
                tracing::warn!(id = message.id, "dropping unexpected message");
                Ok(true)
            }
        }
    }
}
