use petalstream::{AudioContext, PetalStreamConfig, PlayState};
use std::io::{self, Read};
use std::time::Duration;

/// Finite 16-bit stereo sine wave, generated on demand
struct SineSource {
    frequency: f32,
    sample_rate: u32,
    frames_left: usize,
    phase: f32,
    pending: Vec<u8>,
}

impl SineSource {
    fn new(frequency: f32, sample_rate: u32, duration: Duration) -> Self {
        Self {
            frequency,
            sample_rate,
            frames_left: (duration.as_secs_f64() * sample_rate as f64) as usize,
            phase: 0.0,
            pending: Vec::new(),
        }
    }

    fn next_frame(&mut self) -> [u8; 4] {
        let sample = (self.phase * 2.0 * std::f32::consts::PI).sin() * 0.2; // Low volume
        self.phase += self.frequency / self.sample_rate as f32;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        let [lo, hi] = ((sample * i16::MAX as f32) as i16).to_le_bytes();
        [lo, hi, lo, hi]
    }
}

impl Read for SineSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pending.len() < buf.len() && self.frames_left > 0 {
            let frame = self.next_frame();
            self.pending.extend_from_slice(&frame);
            self.frames_left -= 1;
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .init();

    let config = PetalStreamConfig::new().sample_rate(48000).channels(2);
    log::info!(
        "Sink buffer of {} bytes holds {:?} of audio",
        config.buffer_size,
        config.latency()
    );
    let context = AudioContext::new(config.clone())?;

    let player = context.new_player(SineSource::new(
        440.0,
        config.sample_rate,
        Duration::from_secs(4),
    ));

    log::info!("Playing 440Hz sine wave");
    player.play();
    std::thread::sleep(Duration::from_secs(1));

    log::info!("Pausing for half a second");
    player.pause();
    std::thread::sleep(Duration::from_millis(500));

    log::info!("Resuming at half volume");
    player.play();
    player.set_volume(0.5);
    std::thread::sleep(Duration::from_secs(1));

    log::info!("Resetting: queued audio is dropped, the tone carries on");
    player.reset();
    player.play();

    while player.state() == PlayState::Playing {
        std::thread::sleep(Duration::from_millis(50));
    }

    player.close()?;
    log::info!("✓ Playback finished");
    Ok(())
}
