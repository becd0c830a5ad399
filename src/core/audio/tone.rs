use crate::core::wasm4::{
    TONE_MODE1, TONE_MODE2, TONE_MODE3, TONE_MODE4, TONE_NOISE, TONE_NOTE_MODE, TONE_PAN_LEFT,
    TONE_PAN_RIGHT, TONE_PULSE1, TONE_PULSE2, TONE_TRIANGLE,
};

/// One of the four voices of the sound chip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ChannelKind {
    #[default]
    Pulse1,
    Pulse2,
    Triangle,
    Noise,
}

impl ChannelKind {
    fn from_tone_flags(flags: u32) -> Self {
        match flags & 0b11 {
            TONE_PULSE1 => Self::Pulse1,
            TONE_PULSE2 => Self::Pulse2,
            TONE_TRIANGLE => Self::Triangle,
            TONE_NOISE => Self::Noise,
            _ => unreachable!(),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Pulse duty cycle.
#[allow(clippy::enum_variant_names)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Mode1_12,
    Mode2_25,
    Mode3_50,
    Mode4_75,
}

impl Mode {
    fn from_tone_flags(flags: u32) -> Self {
        match flags & 0b00_00_11_00 {
            TONE_MODE1 => Mode::Mode1_12,
            TONE_MODE2 => Mode::Mode2_25,
            TONE_MODE3 => Mode::Mode3_50,
            TONE_MODE4 => Mode::Mode4_75,
            _ => unreachable!(),
        }
    }

    pub fn duty_cycle(self) -> f32 {
        match self {
            Mode::Mode1_12 => 0.125,
            Mode::Mode2_25 => 0.25,
            Mode::Mode3_50 => 0.5,
            Mode::Mode4_75 => 0.75,
        }
    }
}

/// Stereo placement. The value names the side that stays audible:
/// flag value 1 plays on the left only, 2 on the right only, 0 and 3
/// on both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Pan {
    #[default]
    Center,
    Left,
    Right,
}

impl Pan {
    fn from_tone_flags(flags: u32) -> Self {
        match flags & 0b00_11_00_00 {
            TONE_PAN_LEFT => Pan::Left,
            TONE_PAN_RIGHT => Pan::Right,
            _ => Pan::Center,
        }
    }

    pub fn plays_left(self) -> bool {
        self != Pan::Right
    }

    pub fn plays_right(self) -> bool {
        self != Pan::Left
    }
}

/// The arguments of a `tone` call, decoded.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Tone {
    /// Start frequency in Hz.
    pub start_freq: f32,
    /// End frequency in Hz, 0 for no glide.
    pub end_freq: f32,
    pub attack: u8,
    pub decay: u8,
    pub sustain: u8,
    pub release: u8,
    /// Sustain volume in percent, `0..=100`.
    pub sustain_volume: u8,
    /// Peak volume in percent, `0..=100`. 0 selects full volume.
    pub peak_volume: u8,
    pub channel: ChannelKind,
    pub mode: Mode,
    pub pan: Pan,
}

impl Tone {
    /// Decode the raw `tone(frequency, duration, volume, flags)` arguments.
    pub fn from_raw(frequency: u32, duration: u32, volume: u32, flags: u32) -> Self {
        let freq1 = (frequency & 0xffff) as u16;
        let freq2 = (frequency >> 16) as u16;

        let (start_freq, end_freq) = if flags & TONE_NOTE_MODE != 0 {
            (
                midi_freq(freq1),
                if freq2 == 0 { 0.0 } else { midi_freq(freq2) },
            )
        } else {
            (freq1 as f32, freq2 as f32)
        };

        let [sustain, release, decay, attack] = duration.to_le_bytes();
        let [sustain_volume, peak_volume, _, _] = volume.to_le_bytes();

        Self {
            start_freq,
            end_freq,
            attack,
            decay,
            sustain,
            release,
            sustain_volume: sustain_volume.min(100),
            peak_volume: peak_volume.min(100),
            channel: ChannelKind::from_tone_flags(flags),
            mode: Mode::from_tone_flags(flags),
            pan: Pan::from_tone_flags(flags),
        }
    }
}

/// Frequency of a note value: the low byte is the MIDI note, the high byte
/// a pitch bend in 1/256 semitones.
fn midi_freq(note: u16) -> f32 {
    let bend = (note >> 8) as f32;
    let note = (note & 0xff) as f32;
    2f32.powf((note - 69.0 + bend / 256.0) / 12.0) * 440.0
}
