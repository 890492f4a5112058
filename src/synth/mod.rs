//! Procedural noise synthesis.
//!
//! This module provides:
//! - Flavor parsing from `synthetic://<flavor>` locators
//! - `NoiseSynthesizer`, a restartable generator of 16-bit stereo PCM
//! - `SynthPlayer`, which drives a synthesizer on its own thread

mod player;

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::sound::SYNTHETIC_SCHEME;

pub use player::SynthPlayer;

/// Flavor used when neither a locator flavor nor a fallback is available.
pub const DEFAULT_FLAVOR: &str = "white";

/// Minimum low-pass cutoff (Hz).
const MIN_CUTOFF_HZ: f64 = 50.0;

/// Extracts the flavor text for a synthetic track.
///
/// Uses the trimmed, lower-cased text after `synthetic://` when present and
/// non-empty. Otherwise the fallback (normally the track id) is returned
/// as is, and `white` only when the fallback is missing or empty.
///
/// # Example
///
/// ```
/// use sleepsounds::synth::parse_synthetic_flavor;
///
/// assert_eq!(parse_synthetic_flavor(Some("synthetic:// Pink "), None), "pink");
/// assert_eq!(parse_synthetic_flavor(None, Some("white-noise")), "white-noise");
/// assert_eq!(parse_synthetic_flavor(None, None), "white");
/// ```
pub fn parse_synthetic_flavor(url: Option<&str>, fallback_id: Option<&str>) -> String {
    let from_url = url
        .and_then(|u| u.strip_prefix(SYNTHETIC_SCHEME))
        .map(|f| f.trim().to_lowercase())
        .filter(|f| !f.is_empty());

    match (from_url, fallback_id) {
        (Some(flavor), _) => flavor,
        (None, Some(id)) if !id.is_empty() => id.to_string(),
        _ => DEFAULT_FLAVOR.to_string(),
    }
}

// ============================================================================
// NoiseFlavor
// ============================================================================

/// Keyword match over a flavor text.
///
/// Matching is substring based, so `"airplane-cabin"` and `"cabin"` both
/// select the airplane profile and any text without a colour keyword
/// renders as white.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoiseFlavor {
    text: String,
    pink: bool,
    brown: bool,
    box_fan: bool,
    airplane: bool,
}

/// Modulated low-pass profile.
#[derive(Debug, Clone, Copy, PartialEq)]
struct LowPass {
    base_hz: f64,
    depth_hz: f64,
    rate_hz: f64,
}

impl LowPass {
    /// Cutoff at `phase` seconds, floored at 50 Hz.
    fn cutoff_at(&self, phase: f64) -> f64 {
        let swing = self.depth_hz * (2.0 * PI * self.rate_hz * phase).sin();
        (self.base_hz + swing).max(MIN_CUTOFF_HZ)
    }
}

const BOX_FAN_FILTER: LowPass = LowPass {
    base_hz: 1000.0,
    depth_hz: 200.0,
    rate_hz: 0.5,
};

const AIRPLANE_FILTER: LowPass = LowPass {
    base_hz: 2000.0,
    depth_hz: 0.0,
    rate_hz: 0.0,
};

/// Base colour before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseColor {
    White,
    Pink,
    Brown,
}

impl NoiseFlavor {
    /// Classifies a flavor text.
    pub fn parse(text: &str) -> Self {
        Self {
            text: text.to_string(),
            pink: text.contains("pink"),
            brown: text.contains("brown"),
            box_fan: text.contains("fan"),
            airplane: text.contains("airplane") || text.contains("cabin"),
        }
    }

    /// The flavor text as given.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Base colour. Pink wins over brown; airplane uses the brown base.
    pub fn color(&self) -> NoiseColor {
        if self.pink {
            NoiseColor::Pink
        } else if self.brown || self.airplane {
            NoiseColor::Brown
        } else {
            NoiseColor::White
        }
    }

    /// Output trim applied before quantization.
    pub fn trim(&self) -> f32 {
        match self.color() {
            NoiseColor::Pink => 0.9,
            NoiseColor::Brown => 0.35,
            NoiseColor::White => 0.25,
        }
    }

    fn filter(&self) -> Option<LowPass> {
        if self.box_fan {
            Some(BOX_FAN_FILTER)
        } else if self.airplane {
            Some(AIRPLANE_FILTER)
        } else {
            None
        }
    }
}

// ============================================================================
// NoiseSynthesizer
// ============================================================================

/// Filter memory for one synthesizer.
#[derive(Debug, Clone, Default)]
struct SynthesisState {
    pink: [f32; 7],
    brown: f32,
    lowpass_left: f32,
    lowpass_right: f32,
    /// Seconds since the synthesizer was created.
    phase: f64,
}

/// Generates an endless stream of interleaved 16-bit stereo noise.
///
/// Every synthesizer owns its own filter state; a fresh one starts from
/// zeroed state.
pub struct NoiseSynthesizer {
    flavor: NoiseFlavor,
    state: SynthesisState,
    dt: f64,
    rng: StdRng,
}

impl NoiseSynthesizer {
    /// Creates a synthesizer seeded from the OS entropy source.
    pub fn new(flavor: NoiseFlavor, sample_rate: u32) -> Self {
        Self::with_rng(flavor, sample_rate, StdRng::from_entropy())
    }

    /// Creates a deterministic synthesizer.
    pub fn with_seed(flavor: NoiseFlavor, sample_rate: u32, seed: u64) -> Self {
        Self::with_rng(flavor, sample_rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(flavor: NoiseFlavor, sample_rate: u32, rng: StdRng) -> Self {
        Self {
            flavor,
            state: SynthesisState::default(),
            dt: 1.0 / f64::from(sample_rate.max(1)),
            rng,
        }
    }

    pub fn flavor(&self) -> &NoiseFlavor {
        &self.flavor
    }

    /// Elapsed synthesis time in seconds.
    pub fn phase(&self) -> f64 {
        self.state.phase
    }

    /// Resets the filter state and phase clock.
    pub fn reset(&mut self) {
        self.state = SynthesisState::default();
    }

    /// Generates `frames` stereo frames.
    pub fn generate_block(&mut self, frames: usize) -> Vec<i16> {
        let mut block = vec![0; frames * 2];
        self.fill_block(&mut block);
        block
    }

    /// Fills an interleaved stereo buffer. A trailing odd sample is left
    /// untouched.
    pub fn fill_block(&mut self, out: &mut [i16]) {
        let color = self.flavor.color();
        let filter = self.flavor.filter();
        let trim = self.flavor.trim();

        for frame in out.chunks_exact_mut(2) {
            let x: f32 = self.rng.gen_range(-1.0..=1.0);
            let mut s = self.base_sample(color, x);

            if let Some(lp) = filter {
                s = self.lowpass(lp, s);
            }

            let v = quantize(s * trim);
            frame[0] = v;
            frame[1] = v;
            self.state.phase += self.dt;
        }
    }

    fn base_sample(&mut self, color: NoiseColor, x: f32) -> f32 {
        match color {
            NoiseColor::Pink => {
                let b = &mut self.state.pink;
                b[0] = 0.99886 * b[0] + x * 0.0555179;
                b[1] = 0.99332 * b[1] + x * 0.0750759;
                b[2] = 0.96900 * b[2] + x * 0.1538520;
                b[3] = 0.86650 * b[3] + x * 0.3104856;
                b[4] = 0.55000 * b[4] + x * 0.5329522;
                b[5] = -0.7616 * b[5] - x * 0.0168980;
                let s = b.iter().sum::<f32>() + x * 0.5362;
                // Carried into the next sample's sum.
                b[6] = x * 0.115926;
                s * 0.11
            }
            NoiseColor::Brown => {
                self.state.brown = (self.state.brown + 0.02 * x) / 1.02;
                self.state.brown * 3.5
            }
            NoiseColor::White => x,
        }
    }

    fn lowpass(&mut self, lp: LowPass, s: f32) -> f32 {
        let cutoff = lp.cutoff_at(self.state.phase);
        let rc = 1.0 / (2.0 * PI * cutoff);
        let alpha = (self.dt / (rc + self.dt)) as f32;

        let st = &mut self.state;
        st.lowpass_left += alpha * (s - st.lowpass_left);
        st.lowpass_right += alpha * (s - st.lowpass_right);
        st.lowpass_left
    }
}

impl std::fmt::Debug for NoiseSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoiseSynthesizer")
            .field("flavor", &self.flavor.text())
            .field("phase", &self.state.phase)
            .finish_non_exhaustive()
    }
}

/// Scales a `[-1, 1]` sample to 16 bits with rounding and saturation.
pub fn quantize(sample: f32) -> i16 {
    let scaled = (sample * 32767.0).round();
    scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}
