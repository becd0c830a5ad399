//! The four channel synthesizer core.
//!
//! Time is counted in two clocks: `time` advances once per rendered sample,
//! `ticks` once per logical frame. Envelope section boundaries are estimated
//! in samples when a tone starts, and the switch from sustain to release is
//! re-anchored on the tick clock so both domains agree on where it happens.

use num_traits::Float;

use super::tone::{ChannelKind, Pan, Tone};

pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
pub const TICKS_PER_SECOND: u32 = 60;

/// Peak amplitude of the pulse and noise channels.
pub const MAX_VOLUME: f32 = 0.15;
/// The triangle channel sounds quieter than the others, so it gets more headroom.
pub const MAX_VOLUME_TRIANGLE: f32 = 0.25;

#[derive(Clone, Debug)]
struct Channel {
    kind: ChannelKind,

    /// Starting frequency.
    freq1: f32,
    /// Ending frequency, or zero for no frequency transition.
    freq2: f32,

    start_time: u64,
    attack_time: u64,
    decay_time: u64,
    /// End of sustain, re-anchored by the tick clock.
    sustain_time: u64,
    /// End of release including the fade, re-anchored by the tick clock.
    release_time: u64,
    /// End of release as estimated when the tone started.
    est_release_time: u64,
    /// Tick on which the tone switches over to release.
    sustain_tick: u64,

    sustain_volume: f32,
    peak_volume: f32,

    phase: f32,
    pan: Pan,
    duty_cycle: f32,

    /// Xorshift state, shifted as a signed 32 bit integer.
    noise_seed: i32,
    noise_last_random: f32,
}

impl Channel {
    fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            freq1: 0.0,
            freq2: 0.0,
            start_time: 0,
            attack_time: 0,
            decay_time: 0,
            sustain_time: 0,
            release_time: 0,
            est_release_time: 0,
            sustain_tick: 0,
            sustain_volume: 0.0,
            peak_volume: 0.0,
            phase: 0.0,
            pan: Pan::Center,
            duty_cycle: 0.125,
            noise_seed: 0x0001,
            noise_last_random: 0.0,
        }
    }

    fn max_volume(&self) -> f32 {
        match self.kind {
            ChannelKind::Triangle => MAX_VOLUME_TRIANGLE,
            _ => MAX_VOLUME,
        }
    }
}

/// Sound chip state: four channels plus the sample and tick clocks.
#[derive(Clone, Debug)]
pub struct Apu {
    sample_rate: u32,
    time: u64,
    ticks: u64,
    channels: [Channel; 4],
}

impl Default for Apu {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl Apu {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            time: 0,
            ticks: 0,
            channels: [
                Channel::new(ChannelKind::Pulse1),
                Channel::new(ChannelKind::Pulse2),
                Channel::new(ChannelKind::Triangle),
                Channel::new(ChannelKind::Noise),
            ],
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Changing the rate only affects tones started afterwards.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1);
    }

    /// Length of the fade applied to tones without a release, 1 ms.
    pub fn fade_samples(&self) -> u64 {
        (self.sample_rate / 1000) as u64
    }

    /// Number of samples per tick, rounded down.
    pub fn samples_per_tick(&self) -> u64 {
        (self.sample_rate / TICKS_PER_SECOND) as u64
    }

    fn ticks_to_samples(&self, ticks: u8) -> u64 {
        self.sample_rate as u64 * ticks as u64 / TICKS_PER_SECOND as u64
    }

    /// Start a tone, preempting whatever the channel was playing.
    pub fn tone(&mut self, tone: &Tone) {
        let time = self.time;
        let ticks = self.ticks;
        let attack = self.ticks_to_samples(tone.attack);
        let decay = self.ticks_to_samples(tone.decay);
        let sustain = self.ticks_to_samples(tone.sustain);
        let release = self.ticks_to_samples(tone.release);
        let fade = if tone.release == 0 {
            self.fade_samples()
        } else {
            0
        };

        let playing = self.is_playing(tone.channel.index());
        let channel = &mut self.channels[tone.channel.index()];

        // keep the phase of a playing channel so glides stay click free
        if !playing {
            channel.phase = if channel.kind == ChannelKind::Triangle {
                0.25
            } else {
                0.0
            };
        }

        channel.freq1 = tone.start_freq;
        channel.freq2 = tone.end_freq;
        channel.start_time = time;
        channel.attack_time = channel.start_time + attack;
        channel.decay_time = channel.attack_time + decay;
        channel.sustain_time = channel.decay_time + sustain;
        channel.est_release_time = channel.sustain_time + release;
        channel.release_time = channel.est_release_time + fade;
        channel.sustain_tick = ticks + tone.attack as u64 + tone.decay as u64 + tone.sustain as u64;
        channel.pan = tone.pan;
        channel.duty_cycle = tone.mode.duty_cycle();

        let max_volume = channel.max_volume();
        channel.sustain_volume = max_volume * tone.sustain_volume as f32 / 100.0;
        channel.peak_volume = if tone.peak_volume != 0 {
            max_volume * tone.peak_volume as f32 / 100.0
        } else {
            max_volume
        };
    }

    /// Advance the tick clock by one logical frame.
    ///
    /// The host sends a frame's tones before its tick, so a tone started
    /// on tick `t` with a sustain of `n` holds through tick `t + n` and
    /// releases on the tick after.
    pub fn tick(&mut self) {
        let time = self.time;
        let ticks = self.ticks;
        for channel in &mut self.channels {
            if ticks == channel.sustain_tick {
                let delta = time as i64 - channel.sustain_time as i64;
                channel.sustain_time = time;
                channel.release_time = (channel.release_time as i64 + delta).max(0) as u64;
            }
        }

        self.ticks += 1;
    }

    pub fn is_playing(&self, channel: usize) -> bool {
        let channel = &self.channels[channel];
        self.time < channel.release_time || self.ticks <= channel.sustain_tick
    }

    /// Envelope volume of a channel at the current sample, 0 when silent.
    pub fn channel_volume(&self, channel: usize) -> f32 {
        if !self.is_playing(channel) {
            return 0.0;
        }
        self.current_volume(&self.channels[channel])
    }

    fn ramp(&self, value1: f32, value2: f32, time1: u64, time2: u64) -> f32 {
        if self.time >= time2 {
            return value2;
        }
        let t = (self.time as f64 - time1 as f64) / (time2 as f64 - time1 as f64);
        lerp(value1, value2, t as f32)
    }

    fn current_frequency(&self, channel: &Channel) -> f32 {
        if channel.freq2 > 0.0 {
            self.ramp(
                channel.freq1,
                channel.freq2,
                channel.start_time,
                channel.est_release_time,
            )
        } else {
            channel.freq1
        }
    }

    fn current_volume(&self, channel: &Channel) -> f32 {
        if self.ticks > channel.sustain_tick {
            self.ramp(
                channel.sustain_volume,
                0.0,
                channel.sustain_time,
                channel.release_time,
            )
        } else if self.time >= channel.decay_time {
            channel.sustain_volume
        } else if self.time >= channel.attack_time {
            self.ramp(
                channel.peak_volume,
                channel.sustain_volume,
                channel.attack_time,
                channel.decay_time,
            )
        } else {
            self.ramp(0.0, channel.peak_volume, channel.start_time, channel.attack_time)
        }
    }

    /// Render one stereo sample and advance the sample clock.
    pub fn next_sample(&mut self) -> (f32, f32) {
        let mut mix_left = 0.0;
        let mut mix_right = 0.0;

        for idx in 0..self.channels.len() {
            if !self.is_playing(idx) {
                continue;
            }

            let freq = self.current_frequency(&self.channels[idx]);
            let volume = self.current_volume(&self.channels[idx]);
            let sample_rate = self.sample_rate as f32;
            let channel = &mut self.channels[idx];

            let sample = match channel.kind {
                ChannelKind::Noise => {
                    channel.phase += freq * freq / (1_000_000.0 / 44100.0 * sample_rate);
                    while channel.phase > 0.0 {
                        channel.phase -= 1.0;
                        channel.noise_seed = xorshift(channel.noise_seed);
                        channel.noise_last_random = if channel.noise_seed & 0x1 == 1 {
                            1.0
                        } else {
                            -1.0
                        };
                    }
                    volume * channel.noise_last_random
                }
                ChannelKind::Triangle => {
                    channel.phase = advance_phase(channel.phase, freq / sample_rate);
                    volume * (2.0 * (2.0 * channel.phase - 1.0).abs() - 1.0)
                }
                ChannelKind::Pulse1 | ChannelKind::Pulse2 => {
                    let phase_inc = freq / sample_rate;
                    let phase = advance_phase(channel.phase, phase_inc);
                    channel.phase = phase;

                    // map each half of the duty cycle to 0..1
                    let duty = channel.duty_cycle;
                    let (duty_phase, duty_phase_inc, multiplier) = if phase < duty {
                        (phase / duty, phase_inc / duty, volume)
                    } else {
                        (
                            (phase - duty) / (1.0 - duty),
                            phase_inc / (1.0 - duty),
                            -volume,
                        )
                    };
                    multiplier * polyblep(duty_phase, duty_phase_inc)
                }
            };

            if channel.pan.plays_left() {
                mix_left += sample;
            }
            if channel.pan.plays_right() {
                mix_right += sample;
            }
        }

        self.time += 1;
        (mix_left, mix_right)
    }
}

fn advance_phase(phase: f32, phase_inc: f32) -> f32 {
    let phase = phase + phase_inc;
    if phase >= 1.0 {
        phase.fract()
    } else {
        phase
    }
}

fn xorshift(mut seed: i32) -> i32 {
    seed ^= seed >> 7;
    seed ^= seed << 9;
    seed ^= seed >> 13;
    seed
}

fn lerp<F: Float>(value1: F, value2: F, t: F) -> F {
    value1 + t * (value2 - value1)
}

/// Polynomial band limited step, smooths the edge around phase 0 and 1.
fn polyblep(phase: f32, phase_inc: f32) -> f32 {
    if phase < phase_inc {
        let t = phase / phase_inc;
        t + t - t * t
    } else if phase > 1.0 - phase_inc {
        let t = (phase - (1.0 - phase_inc)) / phase_inc;
        1.0 - (t + t - t * t)
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::wasm4::{TONE_MODE3, TONE_NOISE, TONE_PAN_LEFT, TONE_PAN_RIGHT, TONE_TRIANGLE};

    /// One host frame: the tick, then the samples until the next one.
    fn render_tick(apu: &mut Apu) -> Vec<(f32, f32)> {
        apu.tick();
        (0..apu.samples_per_tick())
            .map(|_| apu.next_sample())
            .collect()
    }

    #[test]
    fn silent_without_tones() {
        let mut apu = Apu::default();
        for _ in 0..100 {
            assert_eq!((0.0, 0.0), apu.next_sample());
        }
        assert!(!apu.is_playing(0));
    }

    #[test]
    fn sustain_holds_for_exactly_n_ticks_then_fades() {
        for (frequency, flags) in [(440, 0), (1000, TONE_TRIANGLE), (7000, TONE_NOISE)] {
            let mut apu = Apu::default();
            let n = 5;
            apu.tone(&Tone::from_raw(frequency, n, 50, flags));
            let channel = (flags & 0b11) as usize;
            let sustain = apu.channels[channel].sustain_volume;

            for tick in 0..n {
                apu.tick();
                for _ in 0..apu.samples_per_tick() {
                    assert_eq!(sustain, apu.channel_volume(channel), "tick {tick}");
                    apu.next_sample();
                }
            }

            // after the last sustain tick only the fixed fade remains
            apu.tick();
            let fade = apu.fade_samples();
            let mut previous = sustain;
            for _ in 0..fade {
                assert!(apu.is_playing(channel));
                let volume = apu.channel_volume(channel);
                assert!(volume <= previous);
                previous = volume;
                apu.next_sample();
            }
            assert!(!apu.is_playing(channel));
            assert_eq!(0.0, apu.channel_volume(channel));
        }
    }

    #[test]
    fn envelope_sections() {
        let mut apu = Apu::default();
        // attack 2, decay 2, sustain 2, release 2 ticks; sustain 50%, peak 100%
        apu.tone(&Tone::from_raw(440, 0x0202_0202, 0x6432, 0));
        let spt = apu.samples_per_tick();

        assert_eq!(0.0, apu.channel_volume(0));
        for _ in 0..2 * spt {
            apu.next_sample();
        }
        assert!((apu.channel_volume(0) - MAX_VOLUME).abs() < 1e-6);
        for _ in 0..2 * spt {
            apu.next_sample();
        }
        assert!((apu.channel_volume(0) - MAX_VOLUME * 0.5).abs() < 1e-6);
    }

    #[test]
    fn peak_never_exceeds_max_volume() {
        let mut apu = Apu::default();
        apu.tone(&Tone::from_raw(440, 0x0000_0a0a, 0x6450, 0));

        let mut peak: f32 = 0.0;
        for _ in 0..25 {
            for (left, right) in render_tick(&mut apu) {
                peak = peak.max(left.abs()).max(right.abs());
            }
        }
        assert!(peak > 0.0);
        assert!(peak <= MAX_VOLUME + f32::EPSILON);
        assert!(!apu.is_playing(0));
    }

    #[test]
    fn pan_mutes_the_other_side() {
        let mut apu = Apu::default();
        apu.tone(&Tone::from_raw(440, 30, 100, TONE_PAN_LEFT | TONE_MODE3));
        let samples = render_tick(&mut apu);
        assert!(samples.iter().all(|(_, right)| *right == 0.0));
        assert!(samples.iter().any(|(left, _)| *left != 0.0));

        let mut apu = Apu::default();
        apu.tone(&Tone::from_raw(440, 30, 100, TONE_PAN_RIGHT));
        let samples = render_tick(&mut apu);
        assert!(samples.iter().all(|(left, _)| *left == 0.0));
        assert!(samples.iter().any(|(_, right)| *right != 0.0));
    }

    #[test]
    fn retrigger_keeps_phase_while_playing() {
        let mut apu = Apu::default();
        apu.tone(&Tone::from_raw(440, 30, 100, TONE_TRIANGLE));
        assert_eq!(0.25, apu.channels[2].phase);
        for _ in 0..10 {
            apu.next_sample();
        }
        let phase = apu.channels[2].phase;
        apu.tone(&Tone::from_raw(880, 30, 100, TONE_TRIANGLE));
        assert_eq!(phase, apu.channels[2].phase);
    }

    #[test]
    fn noise_is_deterministic() {
        let render = || {
            let mut apu = Apu::default();
            apu.tone(&Tone::from_raw(3000, 10, 100, TONE_NOISE));
            render_tick(&mut apu)
        };
        assert_eq!(render(), render());
    }

    #[test]
    fn noise_seed_uses_the_full_word() {
        let mut seed = 0x0001;
        let mut seeds = Vec::new();
        for _ in 0..4 {
            seed = xorshift(seed);
            seeds.push(seed);
        }
        assert_eq!(vec![0x201, 0x40825, 0x804_2a16, 0x2051_a4c7], seeds);
    }

    #[test]
    fn polyblep_smooths_edges() {
        assert_eq!(1.0, polyblep(0.5, 0.01));
        assert_eq!(0.0, polyblep(0.0, 0.01));
        assert!(polyblep(0.999, 0.01) < 1.0);
    }
}
