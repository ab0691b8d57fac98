//! Host-side endpoint.
//!
//! The host creates both control FIFOs, hands their keys to a worker
//! process, owns the shared audio region (growing it when the block size or
//! channel counts change), and drives block processing: write inputs, send
//! `StartProcessing`, wait for `ProcessingDone`, read outputs.

use std::mem;
use std::process::{Child, Command};
use std::slice;
use std::thread;
use std::time::{Duration, Instant};

use dawlink_core::{ChannelCount, DEFAULT_CHANNELS, Frames, Sample, SampleRate};
use dawlink_plugin::MidiEvent;

use crate::endpoint::{BUSY_SERVICE_INTERVAL, Dispatcher, Endpoint};
use crate::error::ChannelError;
use crate::fifo::ShmFifo;
use crate::message::{Message, MessageId};
use crate::shm::SharedSegment;

/// How long `close` waits for the worker to exit before killing it.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);
const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// The host side of the remote plugin channel.
///
/// Spawning stays with the caller: build the worker `Command` however
/// plugin discovery demands, then let [`spawn_worker`](Self::spawn_worker)
/// append the two FIFO keys and wait for the worker to come up. Dropping
/// the host tears the whole channel down.
pub struct RemoteHost {
    endpoint: Endpoint,
    worker: Option<Child>,
    audio: Option<SharedSegment>,
    inputs: ChannelCount,
    outputs: ChannelCount,
    frames: Frames,
    sample_rate: SampleRate,
    initialized: bool,
    failed: bool,
    closed: bool,
    event_pump: Option<Box<dyn FnMut() + Send>>,
}

impl RemoteHost {
    /// Create both control FIFOs. The worker is attached separately.
    pub fn new(sample_rate: SampleRate, frames: Frames) -> Result<Self, ChannelError> {
        let uplink = ShmFifo::create()?;
        let downlink = ShmFifo::create()?;
        tracing::debug!(
            uplink = uplink.key(),
            downlink = downlink.key(),
            "created control FIFOs"
        );
        Ok(Self {
            endpoint: Endpoint::new(uplink, downlink),
            worker: None,
            audio: None,
            inputs: DEFAULT_CHANNELS,
            outputs: DEFAULT_CHANNELS,
            frames,
            sample_rate,
            initialized: false,
            failed: false,
            closed: false,
            event_pump: None,
        })
    }

    /// Install a callback that pumps host-side events (UI, timers) while
    /// this endpoint busy-waits for a reply. The callback should spend up
    /// to roughly [`BUSY_SERVICE_INTERVAL`] per call; without one, waits
    /// simply block on the FIFO.
    pub fn set_event_pump(&mut self, pump: impl FnMut() + Send + 'static) {
        self.event_pump = Some(Box::new(pump));
    }

    /// `(uplink, downlink)` keys a worker needs on its command line.
    pub fn keys(&self) -> (i32, i32) {
        (self.endpoint.incoming_key(), self.endpoint.outgoing_key())
    }

    /// Append the FIFO keys to `command`, spawn it, and wait for the worker
    /// to report `InitDone` (answering its startup queries on the way).
    pub fn spawn_worker(&mut self, command: &mut Command) -> Result<(), ChannelError> {
        let (uplink, downlink) = self.keys();
        let child = command
            .arg(uplink.to_string())
            .arg(downlink.to_string())
            .spawn()
            .map_err(ChannelError::Worker)?;
        tracing::debug!(pid = child.id(), "spawned worker");
        self.worker = Some(child);
        self.wait_until_ready()
    }

    /// Block until the worker reports `InitDone`. With an event pump
    /// installed the wait is busy so the host thread stays responsive.
    pub fn wait_until_ready(&mut self) -> Result<(), ChannelError> {
        let busy = self.event_pump.is_some();
        self.wait_for_reply(MessageId::InitDone, busy)?;
        if self.failed {
            return Err(ChannelError::PeerFailure);
        }
        Ok(())
    }

    /// Whether the worker has reported readiness and no failure since.
    pub fn is_ready(&self) -> bool {
        self.initialized && !self.failed
    }

    /// Whether the worker has reported `GeneralFailure`.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub fn input_count(&self) -> ChannelCount {
        self.inputs
    }

    pub fn output_count(&self) -> ChannelCount {
        self.outputs
    }

    pub fn frames_per_block(&self) -> Frames {
        self.frames
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// Push a new sample rate to the worker.
    pub fn update_sample_rate(&mut self, sample_rate: SampleRate) -> Result<(), ChannelError> {
        self.sample_rate = sample_rate;
        self.send(&Message::new(MessageId::SampleRateInformation).with_int(sample_rate as i32))
    }

    /// Push a new block size to the worker and regrow the audio region.
    pub fn update_buffer_size(&mut self, frames: Frames) -> Result<(), ChannelError> {
        self.frames = frames;
        self.send(&Message::new(MessageId::BufferSizeInformation).with_int(frames as i32))?;
        self.ensure_audio_region()
    }

    /// Forward one MIDI event with its frame offset into the current block.
    pub fn process_midi_event(&self, event: MidiEvent, offset: i32) -> Result<(), ChannelError> {
        self.send(
            &Message::new(MessageId::MidiEvent)
                .with_int(event.kind)
                .with_int(event.channel)
                .with_int(event.data1)
                .with_int(event.data2)
                .with_int(offset),
        )
    }

    pub fn show_ui(&self) -> Result<(), ChannelError> {
        self.send(&Message::new(MessageId::ShowUi))
    }

    pub fn hide_ui(&self) -> Result<(), ChannelError> {
        self.send(&Message::new(MessageId::HideUi))
    }

    /// Ask the worker to serialize its state and wait for the payload.
    pub fn save_settings_to_string(&mut self) -> Result<String, ChannelError> {
        self.send(&Message::new(MessageId::SaveSettingsToString))?;
        let reply = self.wait_for_reply(MessageId::SaveSettingsToString, false)?;
        if reply.is(MessageId::GeneralFailure) {
            return Err(ChannelError::PeerFailure);
        }
        Ok(reply.str_arg(0).to_owned())
    }

    pub fn save_settings_to_file(&self, path: &str) -> Result<(), ChannelError> {
        self.send(&Message::new(MessageId::SaveSettingsToFile).with_str(path))
    }

    pub fn load_settings_from_string(&self, settings: &str) -> Result<(), ChannelError> {
        self.send(&Message::new(MessageId::LoadSettingsFromString).with_str(settings))
    }

    pub fn load_settings_from_file(&self, path: &str) -> Result<(), ChannelError> {
        self.send(&Message::new(MessageId::LoadSettingsFromFile).with_str(path))
    }

    pub fn load_preset_from_file(&self, path: &str) -> Result<(), ChannelError> {
        self.send(&Message::new(MessageId::LoadPresetFromFile).with_str(path))
    }

    /// Run one block through the worker.
    ///
    /// Copies `in_block` into the input half of the audio region and sends
    /// `StartProcessing`. With `wait` set this blocks until the worker is
    /// done and fills `out_block`; otherwise the caller must follow up with
    /// [`wait_for_processing`](Self::wait_for_processing) before touching
    /// the outputs or starting another block.
    #[allow(unsafe_code)]
    pub fn process(
        &mut self,
        in_block: &[Sample],
        out_block: &mut [Sample],
        wait: bool,
    ) -> Result<(), ChannelError> {
        if self.failed {
            return Err(ChannelError::PeerFailure);
        }
        let expected_in = self.inputs * self.frames;
        if in_block.len() != expected_in {
            return Err(ChannelError::BlockSize {
                expected: expected_in,
                actual: in_block.len(),
            });
        }
        let expected_out = self.outputs * self.frames;
        if out_block.len() != expected_out {
            return Err(ChannelError::BlockSize {
                expected: expected_out,
                actual: out_block.len(),
            });
        }

        self.ensure_audio_region()?;
        if let Some(region) = &self.audio {
            // Input half is host-owned until StartProcessing goes out.
            unsafe {
                ptr_copy_into(region, 0, in_block);
            }
        }
        self.send(&Message::new(MessageId::StartProcessing))?;
        if wait {
            self.wait_for_processing(out_block)
        } else {
            Ok(())
        }
    }

    /// Wait for the in-flight block and copy the worker's output out of the
    /// audio region.
    #[allow(unsafe_code)]
    pub fn wait_for_processing(&mut self, out_block: &mut [Sample]) -> Result<(), ChannelError> {
        let reply = self.wait_for_reply(MessageId::ProcessingDone, false)?;
        if reply.is(MessageId::GeneralFailure) {
            return Err(ChannelError::PeerFailure);
        }
        if let Some(region) = &self.audio {
            unsafe {
                ptr_copy_from(region, self.inputs * self.frames, out_block);
            }
        }
        Ok(())
    }

    /// Grow the audio region to the currently negotiated geometry and tell
    /// the worker about the new key.
    ///
    /// No acknowledgement is awaited: the downlink FIFO is ordered, so the
    /// worker re-attaches before it can see the next `StartProcessing`.
    fn ensure_audio_region(&mut self) -> Result<(), ChannelError> {
        let bytes = (self.inputs + self.outputs) * self.frames * mem::size_of::<Sample>();
        if bytes == 0 {
            return Ok(());
        }
        if let Some(region) = &self.audio {
            if region.size() >= bytes {
                return Ok(());
            }
        }
        // Drop the old region first; the worker keeps its stale mapping
        // alive until it dispatches the key change and detaches.
        self.audio = None;
        let region = SharedSegment::create(bytes)?;
        let notice = Message::new(MessageId::ChangeSharedMemoryKey)
            .with_int(region.key())
            .with_int(bytes as i32);
        tracing::debug!(key = region.key(), bytes, "resized audio region");
        self.audio = Some(region);
        self.send(&notice)
    }

    /// Whether the worker process is still running.
    pub fn worker_alive(&mut self) -> bool {
        self.worker
            .as_mut()
            .is_some_and(|child| child.try_wait().ok().flatten().is_none())
    }

    /// Ask the worker to shut down, reap it, and release the channel.
    ///
    /// Returns the worker's exit code when one was attached and observed.
    pub fn close(&mut self) -> Result<Option<i32>, ChannelError> {
        if self.closed {
            return Ok(None);
        }
        self.closed = true;
        let _ = self.send(&Message::new(MessageId::ClosePlugin));

        let Some(mut child) = self.worker.take() else {
            return Ok(None);
        };
        let deadline = Instant::now() + SHUTDOWN_GRACE;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(?status, "worker exited");
                    return Ok(status.code());
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(SHUTDOWN_POLL),
                Ok(None) => {
                    tracing::warn!("worker ignored ClosePlugin, killing it");
                    let _ = child.kill();
                    let status = child.wait().map_err(ChannelError::Worker)?;
                    return Ok(status.code());
                }
                Err(err) => return Err(ChannelError::Worker(err)),
            }
        }
    }
}

/// Copy a block into the region at a float offset.
#[allow(unsafe_code)]
unsafe fn ptr_copy_into(region: &SharedSegment, offset: usize, block: &[Sample]) {
    debug_assert!((offset + block.len()) * mem::size_of::<Sample>() <= region.size());
    let base = region.as_ptr().cast::<Sample>();
    let dest = unsafe { slice::from_raw_parts_mut(base.add(offset), block.len()) };
    dest.copy_from_slice(block);
}

/// Copy a block out of the region at a float offset.
#[allow(unsafe_code)]
unsafe fn ptr_copy_from(region: &SharedSegment, offset: usize, block: &mut [Sample]) {
    debug_assert!((offset + block.len()) * mem::size_of::<Sample>() <= region.size());
    let base = region.as_ptr().cast::<Sample>();
    let src = unsafe { slice::from_raw_parts(base.add(offset), block.len()) };
    block.copy_from_slice(src);
}

impl Dispatcher for RemoteHost {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn service_events(&mut self) {
        match &mut self.event_pump {
            Some(pump) => pump(),
            None => thread::sleep(BUSY_SERVICE_INTERVAL),
        }
    }

    fn dispatch(&mut self, message: &Message) -> Result<bool, ChannelError> {
        match MessageId::from_raw(message.id) {
            Some(MessageId::GeneralFailure) => {
                tracing::error!("worker reported general failure");
                self.failed = true;
                Ok(true)
            }
            Some(MessageId::InitDone) => {
                self.initialized = true;
                Ok(true)
            }
            // Released by the wait_for_reply in wait_for_processing.
            Some(MessageId::ProcessingDone) => Ok(true),
            // The argument-less forms are the worker querying our current
            // configuration; answer with the one-argument form.
            Some(MessageId::SampleRateInformation) if message.args.is_empty() => {
                let sample_rate = self.sample_rate;
                self.send(
                    &Message::new(MessageId::SampleRateInformation).with_int(sample_rate as i32),
                )?;
                Ok(true)
            }
            Some(MessageId::BufferSizeInformation) if message.args.is_empty() => {
                let frames = self.frames;
                self.send(&Message::new(MessageId::BufferSizeInformation).with_int(frames as i32))?;
                Ok(true)
            }
            Some(MessageId::ChangeInputCount) => {
                self.inputs = message.int_arg(0).max(0) as ChannelCount;
                self.ensure_audio_region()?;
                Ok(true)
            }
            Some(MessageId::ChangeOutputCount) => {
                self.outputs = message.int_arg(0).max(0) as ChannelCount;
                self.ensure_audio_region()?;
                Ok(true)
            }
            // The payload is consumed by the caller blocked in
            // save_settings_to_string.
            Some(MessageId::SaveSettingsToString) => Ok(true),
            Some(MessageId::Undefined) => Ok(true),
            _ => {
                tracing::warn!(id = message.id, "dropping unexpected message");
                Ok(true)
            }
        }
    }
}

impl Drop for RemoteHost {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_nonexistent_worker_fails() {
        let mut host = RemoteHost::new(44100, 256).expect("host");
        let result = host.spawn_worker(&mut Command::new("/nonexistent/dawlink-worker"));
        assert!(matches!(result, Err(ChannelError::Worker(_))));
    }

    #[test]
    fn test_keys_are_distinct() {
        let host = RemoteHost::new(44100, 256).expect("host");
        let (uplink, downlink) = host.keys();
        assert_ne!(uplink, downlink);
        assert!(uplink > 0 && downlink > 0);
    }

    #[test]
    fn test_process_rejects_wrong_block_size() {
        let mut host = RemoteHost::new(44100, 4).expect("host");
        let input = vec![0.0; 3];
        let mut output = vec![0.0; 8];
        assert!(matches!(
            host.process(&input, &mut output, true),
            Err(ChannelError::BlockSize { expected: 8, actual: 3 })
        ));
    }
}
