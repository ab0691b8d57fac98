//! Pass-through plugin worker.
//!
//! Hosts a trivial copy-input-to-output DSP behind a `RemoteClient`, so the
//! channel can be exercised end to end across a real process boundary.
//!
//! Usage: dawlink-worker <uplink-key> <downlink-key>
//!
//! The two keys arrive on the command line from the host that spawned us.
//! Exits 0 on a clean `ClosePlugin` shutdown, non-zero on any failure.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dawlink_core::Sample;
use dawlink_plugin::{Dsp, MidiEvent};
use dawlink_remote::RemoteClient;

/// Pass-through dawlink worker process
#[derive(Parser, Debug)]
#[command(name = "dawlink-worker")]
#[command(about = "Pass-through dawlink worker process", long_about = None)]
struct Args {
    /// Key of the uplink FIFO (worker -> host)
    uplink_key: i32,

    /// Key of the downlink FIFO (host -> worker)
    downlink_key: i32,
}

/// Copies inputs to outputs, zero-fills any extra output channels.
struct Passthrough;

impl Dsp for Passthrough {
    fn process(&mut self, inputs: &[Sample], outputs: &mut [Sample]) {
        let copied = inputs.len().min(outputs.len());
        outputs[..copied].copy_from_slice(&inputs[..copied]);
        outputs[copied..].fill(0.0);
    }

    fn process_midi_event(&mut self, event: MidiEvent, offset: i32) {
        tracing::debug!(?event, offset, "midi event");
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dawlink=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    tracing::info!(
        uplink = args.uplink_key,
        downlink = args.downlink_key,
        "worker starting"
    );

    let mut client = RemoteClient::connect(args.uplink_key, args.downlink_key, Box::new(Passthrough))?;
    client.run()?;

    tracing::info!("worker shut down cleanly");
    Ok(())
}
