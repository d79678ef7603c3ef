//! The step grid: which instrument fires on which 16th note.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of instrument rows in a pattern.
pub const INSTRUMENTS: usize = 10;
/// Number of steps (16th notes) in one bar.
pub const STEPS: usize = 16;

/// The fixed drum kit, in grid row order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Instrument {
    Kick,
    Snare,
    Hihat,
    Openhat,
    Clap,
    Tom,
    Lowtom,
    Rim,
    Cowbell,
    Crash,
}

impl Instrument {
    pub const ALL: [Instrument; INSTRUMENTS] = [
        Instrument::Kick,
        Instrument::Snare,
        Instrument::Hihat,
        Instrument::Openhat,
        Instrument::Clap,
        Instrument::Tom,
        Instrument::Lowtom,
        Instrument::Rim,
        Instrument::Cowbell,
        Instrument::Crash,
    ];

    /// Row index of this instrument in a pattern.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Instrument> {
        Self::ALL.get(index).copied()
    }

    /// Stable lowercase identifier (`"kick"`, `"openhat"`, ...).
    pub fn id(self) -> &'static str {
        match self {
            Instrument::Kick => "kick",
            Instrument::Snare => "snare",
            Instrument::Hihat => "hihat",
            Instrument::Openhat => "openhat",
            Instrument::Clap => "clap",
            Instrument::Tom => "tom",
            Instrument::Lowtom => "lowtom",
            Instrument::Rim => "rim",
            Instrument::Cowbell => "cowbell",
            Instrument::Crash => "crash",
        }
    }

    /// Human-readable label.
    pub fn name(self) -> &'static str {
        match self {
            Instrument::Kick => "Kick",
            Instrument::Snare => "Snare",
            Instrument::Hihat => "Hi-Hat",
            Instrument::Openhat => "Open Hat",
            Instrument::Clap => "Clap",
            Instrument::Tom => "Tom",
            Instrument::Lowtom => "Low Tom",
            Instrument::Rim => "Rim",
            Instrument::Cowbell => "Cowbell",
            Instrument::Crash => "Crash",
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Instrument {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|i| i.id().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown instrument '{s}'"))
    }
}

/// An `INSTRUMENTS × STEPS` activation matrix.
///
/// Serializes as a JSON array of 10 rows of 16 booleans. Any other shape
/// fails to deserialize, so a loaded pattern always has the fixed
/// dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pattern {
    cells: [[bool; STEPS]; INSTRUMENTS],
}

impl Pattern {
    /// An empty pattern.
    pub fn new() -> Self {
        Pattern::default()
    }

    pub fn from_rows(cells: [[bool; STEPS]; INSTRUMENTS]) -> Self {
        Pattern { cells }
    }

    /// Whether `instrument` fires at `step` (wraps modulo `STEPS`).
    pub fn is_active(&self, instrument: Instrument, step: usize) -> bool {
        self.cells[instrument.index()][step % STEPS]
    }

    pub fn set(&mut self, instrument: Instrument, step: usize, active: bool) {
        self.cells[instrument.index()][step % STEPS] = active;
    }

    /// Flip one cell and return its new value.
    pub fn toggle(&mut self, instrument: Instrument, step: usize) -> bool {
        let cell = &mut self.cells[instrument.index()][step % STEPS];
        *cell = !*cell;
        *cell
    }

    pub fn clear(&mut self) {
        self.cells = [[false; STEPS]; INSTRUMENTS];
    }

    pub fn row(&self, instrument: Instrument) -> &[bool; STEPS] {
        &self.cells[instrument.index()]
    }

    pub fn rows(&self) -> &[[bool; STEPS]; INSTRUMENTS] {
        &self.cells
    }

    /// Instruments that fire at `step`, in row order.
    pub fn active_at(&self, step: usize) -> impl Iterator<Item = Instrument> + '_ {
        let step = step % STEPS;
        Instrument::ALL
            .into_iter()
            .filter(move |i| self.cells[i.index()][step])
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().all(|row| row.iter().all(|&c| !c))
    }

    /// Total number of active cells.
    pub fn active_count(&self) -> usize {
        self.cells.iter().flatten().filter(|&&c| c).count()
    }
}

/// A named built-in pattern.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PresetPattern {
    pub name: &'static str,
    pub pattern: Pattern,
}

const fn row(steps: &[usize]) -> [bool; STEPS] {
    let mut out = [false; STEPS];
    let mut i = 0;
    while i < steps.len() {
        out[steps[i]] = true;
        i += 1;
    }
    out
}

const EMPTY: [bool; STEPS] = [false; STEPS];

/// Patterns shipped with the drum machine.
pub const PRESETS: [PresetPattern; 3] = [
    PresetPattern {
        name: "Hip Hop 1",
        pattern: Pattern {
            cells: [
                row(&[0, 8]),
                row(&[4, 12]),
                row(&[2, 6, 10, 14]),
                EMPTY,
                EMPTY,
                EMPTY,
                EMPTY,
                EMPTY,
                EMPTY,
                EMPTY,
            ],
        },
    },
    PresetPattern {
        name: "Hip Hop 2",
        pattern: Pattern {
            cells: [
                row(&[0, 6, 12]),
                row(&[4, 12]),
                row(&[0, 2, 4, 6, 8, 10, 12, 14]),
                row(&[15]),
                row(&[4, 12]),
                EMPTY,
                EMPTY,
                row(&[7]),
                EMPTY,
                EMPTY,
            ],
        },
    },
    PresetPattern {
        name: "Techno 1",
        pattern: Pattern {
            cells: [
                row(&[0, 4, 8, 12]),
                row(&[4, 12]),
                row(&[0, 2, 4, 6, 8, 10, 12, 14]),
                row(&[7, 15]),
                EMPTY,
                EMPTY,
                EMPTY,
                EMPTY,
                EMPTY,
                EMPTY,
            ],
        },
    },
];

/// Look up a built-in pattern by name (case-insensitive).
pub fn preset(name: &str) -> Option<Pattern> {
    PRESETS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
        .map(|p| p.pattern)
}
