use std::{
    io::{BufRead, Write},
    num::ParseFloatError,
    path::PathBuf,
};

use anyhow::{Context, Result};
use log::warn;

use crate::{denoise::NoiseReduction, note::Scale};

/// Run-level settings of the processing chain.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub duration_secs: f32,
    pub highpass_hz: f64,
    pub lowpass_hz: f64,
    pub filter_order: usize,
    pub notch_hz: f64,
    pub notch_q: f64,
    /// Length of the leading slice used as the noise profile.
    pub noise_clip_secs: f32,
    pub noise_reduction: NoiseReduction,
    pub pre_gain: f32,
    pub echo_delay_ms: f32,
    pub scale: Scale,
    pub raw_path: PathBuf,
    pub output_path: PathBuf,
    /// Where plots go; `None` disables them.
    pub plot_dir: Option<PathBuf>,
    pub playback: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            duration_secs: 170.0,
            highpass_hz: 100.0,
            lowpass_hz: 8000.0,
            filter_order: 4,
            notch_hz: 50.0,
            notch_q: 30.0,
            noise_clip_secs: 0.5,
            noise_reduction: NoiseReduction::default(),
            pre_gain: 2.0,
            echo_delay_ms: 400.0,
            scale: Scale::default(),
            raw_path: PathBuf::from("raw_recording.wav"),
            output_path: PathBuf::from("processed_output.wav"),
            plot_dir: Some(PathBuf::from("plots")),
            playback: true,
        }
    }
}

/// Effect settings chosen by the user for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectParams {
    pub volume: f32,
    pub echo_decay: f32,
    pub reverb_amount: f32,
    pub pitch_steps: f32,
    pub autotune: bool,
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            volume: 1.0,
            echo_decay: 0.4,
            reverb_amount: 0.3,
            pitch_steps: 0.0,
            autotune: false,
        }
    }
}

const QUESTIONS: [&str; 5] = [
    "Volume multiplier (0.0-3.0, default 1.0): ",
    "Echo decay (0.0-1.0, default 0.4): ",
    "Reverb amount (0.0-0.7, default 0.3): ",
    "Pitch shift in semitones (-5 to 5, default 0.0): ",
    "Apply autotune? (yes/no, default no): ",
];

impl EffectParams {
    /// Interpret the answers to the five questions, in order: volume, echo
    /// decay, reverb amount, pitch shift and autotune.
    ///
    /// Blank answers take the default. If any number fails to parse, every
    /// setting falls back to its default and autotune is off.
    pub fn from_answers(answers: [&str; 5]) -> Self {
        match Self::parse(answers) {
            Ok(params) => params,
            Err(e) => {
                warn!("invalid input ({e}), using default settings");
                Self::default()
            }
        }
    }

    fn parse(answers: [&str; 5]) -> Result<Self, ParseFloatError> {
        let defaults = Self::default();
        Ok(Self {
            volume: number(answers[0], defaults.volume)?,
            echo_decay: number(answers[1], defaults.echo_decay)?,
            reverb_amount: number(answers[2], defaults.reverb_amount)?,
            pitch_steps: number(answers[3], defaults.pitch_steps)?,
            autotune: answers[4].trim().eq_ignore_ascii_case("yes"),
        })
    }

    /// Ask the questions on `writer` and read one line per answer from
    /// `reader`. A closed input counts as blank answers.
    pub fn prompt(mut reader: impl BufRead, mut writer: impl Write) -> Result<Self> {
        let mut answers: [String; 5] = Default::default();
        for (question, answer) in QUESTIONS.iter().zip(answers.iter_mut()) {
            write!(writer, "{question}")?;
            writer.flush()?;
            reader
                .read_line(answer)
                .context("failed to read effect settings")?;
        }
        Ok(Self::from_answers(answers.each_ref().map(|a| a.as_str())))
    }
}

fn number(answer: &str, default: f32) -> Result<f32, ParseFloatError> {
    let answer = answer.trim();
    if answer.is_empty() {
        Ok(default)
    } else {
        answer.parse()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn blank_answers_take_defaults() {
        assert_eq!(EffectParams::from_answers([""; 5]), EffectParams::default());
    }

    #[test]
    fn parses_answers() {
        let params = EffectParams::from_answers(["1.5", " 0.2 ", "0", "-3", " YES "]);
        assert_eq!(
            params,
            EffectParams {
                volume: 1.5,
                echo_decay: 0.2,
                reverb_amount: 0.0,
                pitch_steps: -3.0,
                autotune: true,
            }
        );
    }

    #[test]
    fn only_yes_enables_autotune() {
        assert!(!EffectParams::from_answers(["", "", "", "", "y"]).autotune);
        assert!(!EffectParams::from_answers(["", "", "", "", "no"]).autotune);
        assert!(EffectParams::from_answers(["", "", "", "", "Yes"]).autotune);
    }

    #[test]
    fn bad_number_resets_everything() {
        let params = EffectParams::from_answers(["2.0", "loud", "0.1", "1", "yes"]);
        assert_eq!(params, EffectParams::default());
        assert!(!params.autotune);
    }

    #[test]
    fn ranges_are_not_enforced() {
        assert_eq!(EffectParams::from_answers(["9", "", "", "", ""]).volume, 9.0);
    }

    #[test]
    fn prompt_reads_lines() {
        let input = Cursor::new("0.5\n\n0.1\n2\nyes\n");
        let mut output = vec![];
        let params = EffectParams::prompt(input, &mut output).unwrap();
        assert_eq!(params.volume, 0.5);
        assert_eq!(params.echo_decay, 0.4);
        assert_eq!(params.reverb_amount, 0.1);
        assert_eq!(params.pitch_steps, 2.0);
        assert!(params.autotune);
        assert!(String::from_utf8(output).unwrap().contains("Apply autotune?"));
    }

    #[test]
    fn prompt_on_closed_input() {
        let params = EffectParams::prompt(Cursor::new(""), std::io::sink()).unwrap();
        assert_eq!(params, EffectParams::default());
    }
}
