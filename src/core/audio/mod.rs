//! Tone commands and the synthesizer that renders them.
//!
//! The logical tick thread owns an [`AudioInterface`] and pushes commands into a
//! bounded queue. The render side owns a [`Synthesizer`], which drains the queue
//! before every buffer it fills. Nothing else crosses between the two.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};

use log::warn;

mod apu;
#[cfg(feature = "cpal-output")]
mod output;
mod tone;

pub use apu::{Apu, DEFAULT_SAMPLE_RATE, MAX_VOLUME, MAX_VOLUME_TRIANGLE};
#[cfg(feature = "cpal-output")]
pub use output::CpalOutput;
pub use tone::{ChannelKind, Mode, Pan, Tone};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AudioCommand {
    Tone(Tone),
    /// One logical frame has passed.
    Tick,
}

/// Sending half of the command queue.
#[derive(Clone, Debug)]
pub struct AudioInterface {
    command_sender: mpsc::SyncSender<AudioCommand>,
    muted: Arc<AtomicBool>,
}

/// Receiving half of the command queue.
pub type CommandReceiver = mpsc::Receiver<AudioCommand>;

/// Create a bounded command queue.
pub fn command_queue(capacity: usize) -> (AudioInterface, CommandReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    let api = AudioInterface {
        command_sender: tx,
        muted: Arc::new(AtomicBool::new(false)),
    };
    (api, rx)
}

impl AudioInterface {
    fn do_send(&self, cmd: AudioCommand) {
        if self.is_muted() {
            return;
        }
        match self.command_sender.try_send(cmd) {
            Ok(()) => {}
            Err(mpsc::TrySendError::Full(cmd)) => {
                warn!("audio command queue is full, dropping {:?}", cmd)
            }
            // nobody renders audio, which is fine for headless runs
            Err(mpsc::TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn tone(&self, frequency: u32, duration: u32, volume: u32, flags: u32) {
        self.do_send(AudioCommand::Tone(Tone::from_raw(
            frequency, duration, volume, flags,
        )));
    }

    pub fn tick(&self) {
        self.do_send(AudioCommand::Tick);
    }

    /// While muted every command is dropped at the source.
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }
}

/// Source of commands for the synthesizer, polled without blocking.
pub trait AudioCommandPoller {
    fn poll(&mut self) -> Option<AudioCommand>;
}

impl AudioCommandPoller for mpsc::Receiver<AudioCommand> {
    fn poll(&mut self) -> Option<AudioCommand> {
        self.try_recv().ok()
    }
}

impl AudioCommandPoller for std::collections::VecDeque<AudioCommand> {
    fn poll(&mut self) -> Option<AudioCommand> {
        self.pop_front()
    }
}

/// Renders interleaved sample buffers from queued commands.
pub struct Synthesizer<P: AudioCommandPoller> {
    apu: Apu,
    command_receiver: P,
}

impl<P: AudioCommandPoller> Synthesizer<P> {
    pub fn new(sample_rate: u32, command_receiver: P) -> Self {
        Self {
            apu: Apu::new(sample_rate),
            command_receiver,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.apu.set_sample_rate(sample_rate);
    }

    pub fn apu(&self) -> &Apu {
        &self.apu
    }

    /// Apply every pending command.
    pub fn process_commands(&mut self) {
        while let Some(cmd) = self.command_receiver.poll() {
            match cmd {
                AudioCommand::Tone(tone) => self.apu.tone(&tone),
                AudioCommand::Tick => self.apu.tick(),
            }
        }
    }

    /// Fill `data` with frames of `audio_channels` interleaved samples.
    ///
    /// The first two samples of each frame get left and right; a mono
    /// output gets the left side only and any extra channels stay silent.
    pub fn render_audio(&mut self, audio_channels: u16, data: &mut [f32]) {
        self.process_commands();

        if audio_channels == 0 {
            return;
        }

        for frame in data.chunks_mut(audio_channels as usize) {
            let (left, right) = self.apu.next_sample();
            let mut samples = frame.iter_mut();
            for value in [left, right] {
                if let Some(sample) = samples.next() {
                    *sample = value;
                }
            }
            for sample in samples {
                *sample = 0.0;
            }
        }
    }
}
