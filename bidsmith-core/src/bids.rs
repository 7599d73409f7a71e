//! BIDS vocabulary: datatypes, suffixes, entities and phase-encoding labels

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Top-level BIDS datatype (the directory a file lands in)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    Anat,
    Func,
    Dwi,
    Fmap,
    Pet,
    Meg,
    Beh,
}

impl Datatype {
    pub const ALL: &'static [Datatype] = &[
        Datatype::Anat,
        Datatype::Func,
        Datatype::Dwi,
        Datatype::Fmap,
        Datatype::Pet,
        Datatype::Meg,
        Datatype::Beh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Datatype::Anat => "anat",
            Datatype::Func => "func",
            Datatype::Dwi => "dwi",
            Datatype::Fmap => "fmap",
            Datatype::Pet => "pet",
            Datatype::Meg => "meg",
            Datatype::Beh => "beh",
        }
    }

    /// Case-insensitive parse
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL.iter().copied().find(|d| d.as_str() == lower)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// BIDS filename suffix (the role of a file within its datatype)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Suffix {
    T1w,
    T2w,
    PDw,
    T2starw,
    Flair,
    Angio,
    InplaneT1,
    InplaneT2,
    Pdt2,
    T1map,
    T2map,
    T2starmap,
    R1map,
    R2map,
    R2starmap,
    PDmap,
    Unit1,
    Megre,
    Mese,
    Mp2rage,
    Irt1,
    Vfa,
    Bold,
    Cbv,
    Sbref,
    Events,
    Physio,
    Stim,
    Dwi,
    Epi,
    Magnitude1,
    Magnitude2,
    Phasediff,
    Phase1,
    Phase2,
    Magnitude,
    Fieldmap,
    Tb1tfl,
    Tb1dam,
    Tb1epi,
    Pet,
    Blood,
    Meg,
    Channels,
    Beh,
}

impl Suffix {
    pub const ALL: &'static [Suffix] = &[
        Suffix::T1w,
        Suffix::T2w,
        Suffix::PDw,
        Suffix::T2starw,
        Suffix::Flair,
        Suffix::Angio,
        Suffix::InplaneT1,
        Suffix::InplaneT2,
        Suffix::Pdt2,
        Suffix::T1map,
        Suffix::T2map,
        Suffix::T2starmap,
        Suffix::R1map,
        Suffix::R2map,
        Suffix::R2starmap,
        Suffix::PDmap,
        Suffix::Unit1,
        Suffix::Megre,
        Suffix::Mese,
        Suffix::Mp2rage,
        Suffix::Irt1,
        Suffix::Vfa,
        Suffix::Bold,
        Suffix::Cbv,
        Suffix::Sbref,
        Suffix::Events,
        Suffix::Physio,
        Suffix::Stim,
        Suffix::Dwi,
        Suffix::Epi,
        Suffix::Magnitude1,
        Suffix::Magnitude2,
        Suffix::Phasediff,
        Suffix::Phase1,
        Suffix::Phase2,
        Suffix::Magnitude,
        Suffix::Fieldmap,
        Suffix::Tb1tfl,
        Suffix::Tb1dam,
        Suffix::Tb1epi,
        Suffix::Pet,
        Suffix::Blood,
        Suffix::Meg,
        Suffix::Channels,
        Suffix::Beh,
    ];

    /// Spelling used in BIDS filenames
    pub fn as_str(&self) -> &'static str {
        match self {
            Suffix::T1w => "T1w",
            Suffix::T2w => "T2w",
            Suffix::PDw => "PDw",
            Suffix::T2starw => "T2starw",
            Suffix::Flair => "FLAIR",
            Suffix::Angio => "angio",
            Suffix::InplaneT1 => "inplaneT1",
            Suffix::InplaneT2 => "inplaneT2",
            Suffix::Pdt2 => "PDT2",
            Suffix::T1map => "T1map",
            Suffix::T2map => "T2map",
            Suffix::T2starmap => "T2starmap",
            Suffix::R1map => "R1map",
            Suffix::R2map => "R2map",
            Suffix::R2starmap => "R2starmap",
            Suffix::PDmap => "PDmap",
            Suffix::Unit1 => "UNIT1",
            Suffix::Megre => "MEGRE",
            Suffix::Mese => "MESE",
            Suffix::Mp2rage => "MP2RAGE",
            Suffix::Irt1 => "IRT1",
            Suffix::Vfa => "VFA",
            Suffix::Bold => "bold",
            Suffix::Cbv => "cbv",
            Suffix::Sbref => "sbref",
            Suffix::Events => "events",
            Suffix::Physio => "physio",
            Suffix::Stim => "stim",
            Suffix::Dwi => "dwi",
            Suffix::Epi => "epi",
            Suffix::Magnitude1 => "magnitude1",
            Suffix::Magnitude2 => "magnitude2",
            Suffix::Phasediff => "phasediff",
            Suffix::Phase1 => "phase1",
            Suffix::Phase2 => "phase2",
            Suffix::Magnitude => "magnitude",
            Suffix::Fieldmap => "fieldmap",
            Suffix::Tb1tfl => "TB1TFL",
            Suffix::Tb1dam => "TB1DAM",
            Suffix::Tb1epi => "TB1EPI",
            Suffix::Pet => "pet",
            Suffix::Blood => "blood",
            Suffix::Meg => "meg",
            Suffix::Channels => "channels",
            Suffix::Beh => "beh",
        }
    }

    /// Exact (case-sensitive) parse of a filename suffix
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|x| x.as_str() == s)
    }

    /// Case-insensitive parse, for hand-edited documents
    pub fn parse_loose(s: &str) -> Option<Self> {
        Self::parse(s).or_else(|| {
            Self::ALL
                .iter()
                .copied()
                .find(|x| x.as_str().eq_ignore_ascii_case(s))
        })
    }
}

impl fmt::Display for Suffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Suffix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Suffix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Suffix::parse_loose(&s).ok_or_else(|| de::Error::custom(format!("unknown suffix '{}'", s)))
    }
}

/// BIDS entity, declared in canonical filename order
///
/// The derived `Ord` is the order entities appear in a BIDS filename, so an
/// `EntityMap` always iterates canonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    Subject,
    Session,
    Task,
    Acquisition,
    Ceagent,
    Tracer,
    Reconstruction,
    Direction,
    Run,
    Echo,
    Flip,
    Inversion,
    Mtransfer,
    Part,
    Processing,
    Split,
    Recording,
    Chunk,
}

impl Entity {
    pub const ALL: &'static [Entity] = &[
        Entity::Subject,
        Entity::Session,
        Entity::Task,
        Entity::Acquisition,
        Entity::Ceagent,
        Entity::Tracer,
        Entity::Reconstruction,
        Entity::Direction,
        Entity::Run,
        Entity::Echo,
        Entity::Flip,
        Entity::Inversion,
        Entity::Mtransfer,
        Entity::Part,
        Entity::Processing,
        Entity::Split,
        Entity::Recording,
        Entity::Chunk,
    ];

    /// Short key used in filenames (`task` in `task-rest`)
    pub fn key(&self) -> &'static str {
        match self {
            Entity::Subject => "sub",
            Entity::Session => "ses",
            Entity::Task => "task",
            Entity::Acquisition => "acq",
            Entity::Ceagent => "ce",
            Entity::Tracer => "trc",
            Entity::Reconstruction => "rec",
            Entity::Direction => "dir",
            Entity::Run => "run",
            Entity::Echo => "echo",
            Entity::Flip => "flip",
            Entity::Inversion => "inv",
            Entity::Mtransfer => "mt",
            Entity::Part => "part",
            Entity::Processing => "proc",
            Entity::Split => "split",
            Entity::Recording => "recording",
            Entity::Chunk => "chunk",
        }
    }

    /// Full entity name
    pub fn name(&self) -> &'static str {
        match self {
            Entity::Subject => "subject",
            Entity::Session => "session",
            Entity::Task => "task",
            Entity::Acquisition => "acquisition",
            Entity::Ceagent => "ceagent",
            Entity::Tracer => "tracer",
            Entity::Reconstruction => "reconstruction",
            Entity::Direction => "direction",
            Entity::Run => "run",
            Entity::Echo => "echo",
            Entity::Flip => "flip",
            Entity::Inversion => "inversion",
            Entity::Mtransfer => "mtransfer",
            Entity::Part => "part",
            Entity::Processing => "processing",
            Entity::Split => "split",
            Entity::Recording => "recording",
            Entity::Chunk => "chunk",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let lower = key.to_ascii_lowercase();
        Self::ALL.iter().copied().find(|e| e.key() == lower)
    }

    /// Accepts either the full name or the short key
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.name() == lower || e.key() == lower)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Entity::parse(&s).ok_or_else(|| de::Error::custom(format!("unknown entity '{}'", s)))
    }
}

/// Entity labels, always iterated in canonical order
pub type EntityMap = BTreeMap<Entity, String>;

/// Render an entity map as a filename fragment (`task-rest_run-1`)
pub fn entity_string(entities: &EntityMap) -> String {
    entities
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{}-{}", k.key(), v))
        .collect::<Vec<_>>()
        .join("_")
}

/// Voxel axis named in `PhaseEncodingDirection`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    I,
    J,
    K,
}

/// Parsed `PhaseEncodingDirection` (`j`, `j-`, `i`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhaseEncoding {
    pub axis: Axis,
    pub reversed: bool,
}

impl PhaseEncoding {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (axis_part, reversed) = match s.strip_suffix('-') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        let axis = match axis_part {
            "i" => Axis::I,
            "j" => Axis::J,
            "k" => Axis::K,
            _ => return None,
        };
        Some(Self { axis, reversed })
    }

    /// Label used for the `dir` entity
    pub fn direction_label(&self) -> &'static str {
        match (self.axis, self.reversed) {
            (Axis::I, false) => "LR",
            (Axis::I, true) => "RL",
            (Axis::J, false) => "PA",
            (Axis::J, true) => "AP",
            (Axis::K, false) => "IS",
            (Axis::K, true) => "SI",
        }
    }

    /// Same axis, opposite polarity
    pub fn is_opposite(&self, other: &PhaseEncoding) -> bool {
        self.axis == other.axis && self.reversed != other.reversed
    }
}

impl fmt::Display for PhaseEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let axis = match self.axis {
            Axis::I => "i",
            Axis::J => "j",
            Axis::K => "k",
        };
        write!(f, "{}{}", axis, if self.reversed { "-" } else { "" })
    }
}
