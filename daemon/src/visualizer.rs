//! Audio level visualizer
//!
//! Frames are a pure function of the current volume and whether a call is
//! active. Active frames are resampled from scratch on every update, so
//! nothing needs to be retained between calls.

use std::fmt::Write as _;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Bars per half of the mirrored display
pub const BAR_COUNT: usize = 50;
/// Height of every bar while idle
pub const BASELINE_HEIGHT: f32 = 5.0;
/// Height of a bar at full volume and maximal sample
pub const MAX_HEIGHT: f32 = 150.0;

const VIEW_WIDTH: f32 = 1000.0;
const VIEW_HEIGHT: f32 = 200.0;
const BAR_WIDTH: f32 = 10.0;
const BAR_STRIDE: f32 = 20.0;

/// Inputs the visualizer draws from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub volume: f32,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Style {
    Idle,
    Active,
}

/// What the call button does when pressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallControl {
    Start,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub bars: Vec<f32>,
    pub style: Style,
    pub control: CallControl,
    /// Active but silent: the mic button should pulse
    pub pulse: bool,
}

/// Render one frame for `signal`
pub fn render<R: Rng + ?Sized>(signal: Signal, rng: &mut R) -> Frame {
    if !signal.active {
        return Frame {
            bars: vec![BASELINE_HEIGHT; BAR_COUNT],
            style: Style::Idle,
            control: CallControl::Start,
            pulse: false,
        };
    }

    let volume = clamp_volume(signal.volume);
    let bars = (0..BAR_COUNT)
        .map(|_| rng.gen::<f32>() * volume * MAX_HEIGHT)
        .collect();

    Frame {
        bars,
        style: Style::Active,
        control: CallControl::Stop,
        pulse: volume == 0.0,
    }
}

/// Clamp a reported level into `[0, 1]`, mapping NaN to silence
pub fn clamp_volume(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

impl Frame {
    /// SVG rendering with bars mirrored around the horizontal centre
    pub fn to_svg(&self) -> String {
        let class = match self.style {
            Style::Idle => "bar idle",
            Style::Active => "bar active",
        };
        let centre_x = VIEW_WIDTH / 2.0;
        let centre_y = VIEW_HEIGHT / 2.0;

        let mut svg = format!(
            r#"<svg width="100%" height="100%" viewBox="0 0 {VIEW_WIDTH} {VIEW_HEIGHT}" preserveAspectRatio="xMidYMid meet">"#
        );
        for (index, height) in self.bars.iter().enumerate() {
            let offset = index as f32 * BAR_STRIDE;
            let y = centre_y - height / 2.0;
            for x in [centre_x + offset - 490.0, centre_x - offset - BAR_WIDTH] {
                let _ = write!(
                    svg,
                    r#"<rect class="{class}" x="{x}" y="{y}" width="{BAR_WIDTH}" height="{height}"/>"#
                );
            }
        }
        svg.push_str("</svg>");
        svg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn mean(frame: &Frame) -> f32 {
        frame.bars.iter().sum::<f32>() / frame.bars.len() as f32
    }

    #[test]
    fn test_inactive_is_flat_baseline() {
        let mut rng = StdRng::seed_from_u64(7);
        let frame = render(Signal { volume: 0.9, active: false }, &mut rng);

        assert_eq!(frame.bars, vec![BASELINE_HEIGHT; BAR_COUNT]);
        assert_eq!(frame.style, Style::Idle);
        assert_eq!(frame.control, CallControl::Start);
        assert!(!frame.pulse);
    }

    #[test]
    fn test_active_bars_scale_with_volume() {
        let mut rng = StdRng::seed_from_u64(42);
        let levels = [0.0, 0.5, 0.9];
        let frames: Vec<Frame> = levels
            .iter()
            .map(|&volume| render(Signal { volume, active: true }, &mut rng))
            .collect();

        assert!(frames.iter().all(|f| f.bars.len() == BAR_COUNT));
        assert!(frames.iter().all(|f| f.style == Style::Active));
        assert!(frames[0].bars.iter().all(|&h| h == 0.0));
        assert!(frames[0].pulse);
        assert!(mean(&frames[1]) > mean(&frames[0]));
        assert!(mean(&frames[2]) > mean(&frames[1]));

        for (frame, volume) in frames.iter().zip(levels) {
            assert!(frame.bars.iter().all(|&h| h >= 0.0 && h <= volume * MAX_HEIGHT));
        }
    }

    #[test]
    fn test_active_frames_are_resampled() {
        let mut rng = StdRng::seed_from_u64(1);
        let signal = Signal { volume: 1.0, active: true };
        assert_ne!(render(signal, &mut rng).bars, render(signal, &mut rng).bars);
    }

    #[test]
    fn test_volume_is_clamped() {
        assert_eq!(clamp_volume(3.0), 1.0);
        assert_eq!(clamp_volume(-1.0), 0.0);
        assert_eq!(clamp_volume(f32::NAN), 0.0);
    }

    #[test]
    fn test_svg_mirrors_every_bar() {
        let mut rng = StdRng::seed_from_u64(3);
        let frame = render(Signal { volume: 0.5, active: true }, &mut rng);
        let svg = frame.to_svg();

        assert_eq!(svg.matches("<rect").count(), BAR_COUNT * 2);
        assert!(svg.contains("bar active"));
        assert!(!svg.contains("bar idle"));
    }
}
