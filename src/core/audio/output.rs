use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    OutputCallbackInfo, Stream,
};
use log::{info, warn};

use super::{AudioCommandPoller, Synthesizer};

/// A running output stream on the default audio device.
///
/// Audio plays for as long as this value is alive.
pub struct CpalOutput {
    stream: Stream,
}

impl CpalOutput {
    pub fn start<P>(mut synthesizer: Synthesizer<P>) -> anyhow::Result<Self>
    where
        P: AudioCommandPoller + Send + 'static,
    {
        let host = cpal::default_host();
        let device = match host.default_output_device() {
            None => return Err(anyhow::anyhow!("no default output device present")),
            Some(d) => d,
        };
        let supported_config = device.default_output_config()?;
        let config = supported_config.config();
        info!(
            "audio output: {} channel(s) at {} Hz",
            config.channels, config.sample_rate.0
        );

        synthesizer.set_sample_rate(config.sample_rate.0);
        let channels = config.channels;
        let data_callback = move |data: &mut [f32], _: &OutputCallbackInfo| {
            synthesizer.render_audio(channels, data)
        };
        let error_callback = move |err| warn!("{}", err);
        let stream = device.build_output_stream(&config, data_callback, error_callback, None)?;
        stream.play()?;

        Ok(CpalOutput { stream })
    }

    pub fn pause(&self) -> anyhow::Result<()> {
        self.stream.pause()?;
        Ok(())
    }
}
