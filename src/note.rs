//! Note names, MIDI numbers and the scale lattice pitch correction snaps to.

use anyhow::{anyhow, Result};

const A4_HZ: f32 = 440.0;
const A4_MIDI: f32 = 69.0;

/// Parse a note name (`"C"`, `"F#3"`, `"Bb5"`, `"E♭"`) into a MIDI note number.
///
/// A name without an octave is placed in octave 0, so `"C"` is 12 and `"A"` is 21.
pub fn note_to_midi(note: &str) -> Option<i32> {
    let (pitch_class, octave) = parse_note(note)?;
    Some((octave.unwrap_or(0) + 1) * 12 + pitch_class)
}

/// Split a note name into its semitone offset from C and its octave, if given.
fn parse_note(note: &str) -> Option<(i32, Option<i32>)> {
    let note = note.trim();
    let mut chars = note.chars();
    let mut semitone = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };

    let mut rest = chars.as_str();
    while let Some(c) = rest.chars().next() {
        match c {
            '#' | '♯' => semitone += 1,
            'b' | '♭' => semitone -= 1,
            _ => break,
        }
        rest = &rest[c.len_utf8()..];
    }

    let octave = if rest.is_empty() {
        None
    } else {
        Some(rest.parse().ok()?)
    };
    Some((semitone, octave))
}

pub fn note_to_hz(note: &str) -> Option<f32> {
    note_to_midi(note).map(|m| midi_to_hz(m as f32))
}

/// Continuous MIDI number of a frequency: 12 units per octave, A4 = 69.
pub fn hz_to_midi(hz: f32) -> f32 {
    12.0 * (hz / A4_HZ).log2() + A4_MIDI
}

pub fn midi_to_hz(midi: f32) -> f32 {
    A4_HZ * 2.0f32.powf((midi - A4_MIDI) / 12.0)
}

/// Ordered set of target semitones.
#[derive(Debug, Clone, PartialEq)]
pub struct Scale {
    tones: Vec<f32>,
}

impl Scale {
    /// Build the lattice from note names.
    ///
    /// A name with an octave adds that one tone. A bare pitch class adds the
    /// class in every octave of the MIDI range, octave by octave, keeping the
    /// order of `names` within an octave.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let parsed = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                parse_note(name).ok_or_else(|| anyhow!("invalid note name {name:?}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::lattice(&parsed))
    }

    fn lattice(parsed: &[(i32, Option<i32>)]) -> Self {
        let mut tones = vec![];
        for &(pitch_class, octave) in parsed {
            if let Some(octave) = octave {
                tones.push(((octave + 1) * 12 + pitch_class) as f32);
            }
        }
        for octave in -1..=9 {
            for &(pitch_class, given) in parsed {
                let midi = (octave + 1) * 12 + pitch_class;
                if given.is_none() && (0..=127).contains(&midi) {
                    tones.push(midi as f32);
                }
            }
        }
        Self { tones }
    }

    /// Use the given MIDI numbers as they are.
    pub fn from_midi(tones: Vec<f32>) -> Self {
        Self { tones }
    }

    pub fn tones(&self) -> &[f32] {
        &self.tones
    }

    /// The tone closest to `midi`. On a tie the tone met first wins.
    pub fn nearest(&self, midi: f32) -> Option<f32> {
        let mut best: Option<(f32, f32)> = None;
        for &tone in &self.tones {
            let distance = (tone - midi).abs();
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((tone, distance));
            }
        }
        best.map(|(tone, _)| tone)
    }
}

impl Default for Scale {
    /// C major: the seven natural notes.
    fn default() -> Self {
        Self::lattice(&[0, 2, 4, 5, 7, 9, 11].map(|pitch_class| (pitch_class, None)))
    }
}
