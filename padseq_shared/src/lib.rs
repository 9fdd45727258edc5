use serde::{Deserialize, Serialize};

pub mod grid;

pub use grid::{GridSnapshot, StepGrid};

/// Columns in one pattern loop. Steps are 16th notes, so one pattern is one
/// bar of 4/4.
pub const STEPS_PER_PATTERN: usize = 16;

/// Pad rows per category. Each row is bound to one sample slot.
pub const TRACKS_PER_CATEGORY: usize = 12;

/// Number of sound categories (machine slots).
pub const CATEGORY_COUNT: usize = 9;

/// Transport tempo range in beats per minute. Setters clamp into this range
/// rather than failing.
pub const MIN_BPM: f32 = 60.0;
pub const MAX_BPM: f32 = 200.0;

/// Reference tempo at which tempo-following categories play at their natural
/// pitch (playback rate 1.0).
pub const NEUTRAL_BPM: f32 = 120.0;

/// Identifier for one sound category.
///
/// Declaration order is fixed and doubles as the fire order during step
/// resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CategoryId {
    Drums,
    Bass,
    Keys,
    Lead,
    Pluck,
    Chords,
    Arp,
    Vox,
    Fx,
}

impl CategoryId {
    /// All categories in declaration order.
    pub const ALL: [CategoryId; CATEGORY_COUNT] = [
        CategoryId::Drums,
        CategoryId::Bass,
        CategoryId::Keys,
        CategoryId::Lead,
        CategoryId::Pluck,
        CategoryId::Chords,
        CategoryId::Arp,
        CategoryId::Vox,
        CategoryId::Fx,
    ];

    /// Position of this category in declaration order.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Static descriptor for this category.
    pub fn def(self) -> &'static CategoryDef {
        &CATEGORIES[self as usize]
    }
}

/// Static description of one category.
///
/// Behavior differences between categories are data on this record, not
/// subtypes: currently just the tempo-rate policy.
#[derive(Debug, Clone, Copy)]
pub struct CategoryDef {
    pub id: CategoryId,
    /// Short lowercase name, also used as the sample sub-directory.
    pub name: &'static str,
    /// When set, triggers in this category play at `bpm / NEUTRAL_BPM`, so
    /// melodic material transposes proportionally with the transport tempo.
    /// Percussive categories keep a fixed rate of 1.0 to stay pitch-stable.
    pub rate_follows_tempo: bool,
}

/// Descriptor table, indexed by `CategoryId::index`.
pub const CATEGORIES: [CategoryDef; CATEGORY_COUNT] = [
    CategoryDef { id: CategoryId::Drums, name: "drums", rate_follows_tempo: false },
    CategoryDef { id: CategoryId::Bass, name: "bass", rate_follows_tempo: true },
    CategoryDef { id: CategoryId::Keys, name: "keys", rate_follows_tempo: true },
    CategoryDef { id: CategoryId::Lead, name: "lead", rate_follows_tempo: true },
    CategoryDef { id: CategoryId::Pluck, name: "pluck", rate_follows_tempo: true },
    CategoryDef { id: CategoryId::Chords, name: "chords", rate_follows_tempo: true },
    CategoryDef { id: CategoryId::Arp, name: "arp", rate_follows_tempo: true },
    CategoryDef { id: CategoryId::Vox, name: "vox", rate_follows_tempo: true },
    CategoryDef { id: CategoryId::Fx, name: "fx", rate_follows_tempo: true },
];
