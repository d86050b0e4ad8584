//! Item types and product bundles accepted by the ordering service.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Canonical item types. Only these values are valid in an order request.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemType {
    PSScene,
    REOrthoTile,
    REScene,
    SkySatScene,
    SkySatCollect,
    SkySatVideo,
    PelicanScene,
    TanagerScene,
    TanagerMethane,
}

/// Search-only names and the canonical item type they are ordered as.
const ALIASES: &[(&str, ItemType)] = &[
    ("PSScene3Band", ItemType::PSScene),
    ("PSScene4Band", ItemType::PSScene),
];

impl ItemType {
    pub const ALL: [ItemType; 9] = [
        Self::PSScene,
        Self::REOrthoTile,
        Self::REScene,
        Self::SkySatScene,
        Self::SkySatCollect,
        Self::SkySatVideo,
        Self::PelicanScene,
        Self::TanagerScene,
        Self::TanagerMethane,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::PSScene => "PSScene",
            Self::REOrthoTile => "REOrthoTile",
            Self::REScene => "REScene",
            Self::SkySatScene => "SkySatScene",
            Self::SkySatCollect => "SkySatCollect",
            Self::SkySatVideo => "SkySatVideo",
            Self::PelicanScene => "PelicanScene",
            Self::TanagerScene => "TanagerScene",
            Self::TanagerMethane => "TanagerMethane",
        }
    }

    /// Maps a canonical name or a search alias to its canonical item type.
    /// Canonical names map to themselves.
    pub fn normalize(name: &str) -> Result<Self, Error> {
        if let Some(item_type) = Self::ALL.iter().find(|t| t.key() == name) {
            return Ok(*item_type);
        }
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, item_type)| *item_type)
            .ok_or_else(|| Error::UnsupportedItemType(name.to_string()))
    }

    pub fn bundles(&self) -> &'static [Bundle] {
        use Bundle::*;
        match self {
            Self::PSScene => &[
                AnalyticUdm2,
                Analytic3bUdm2,
                Analytic8bUdm2,
                Visual,
                BasicAnalyticUdm2,
                BasicAnalytic8bUdm2,
                AnalyticSrUdm2,
                Analytic8bSrUdm2,
            ],
            Self::REOrthoTile => &[Analytic, AnalyticSr, Visual],
            Self::REScene => &[BasicAnalytic],
            Self::SkySatScene => &[
                AnalyticUdm2,
                AnalyticSrUdm2,
                Visual,
                BasicAnalyticUdm2,
                Panchromatic,
                BasicPanchromatic,
            ],
            Self::SkySatCollect => &[
                AnalyticUdm2,
                AnalyticSrUdm2,
                Visual,
                Panchromatic,
                PansharpenedUdm2,
            ],
            Self::SkySatVideo => &[VideoFile, VideoFrames],
            Self::PelicanScene => &[AnalyticUdm2, AnalyticSrUdm2, Visual],
            Self::TanagerScene => &[BasicRadianceHdf5, RadianceHdf5, SurfaceReflectanceHdf5],
            Self::TanagerMethane => &[MethaneHdf5],
        }
    }

    pub fn supports(&self, bundle: Bundle) -> bool {
        self.bundles().contains(&bundle)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ItemType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Bundle {
    Analytic,
    AnalyticSr,
    AnalyticUdm2,
    #[serde(rename = "analytic_3b_udm2")]
    Analytic3bUdm2,
    #[serde(rename = "analytic_8b_udm2")]
    Analytic8bUdm2,
    AnalyticSrUdm2,
    #[serde(rename = "analytic_8b_sr_udm2")]
    Analytic8bSrUdm2,
    BasicAnalytic,
    BasicAnalyticUdm2,
    #[serde(rename = "basic_analytic_8b_udm2")]
    BasicAnalytic8bUdm2,
    Visual,
    Panchromatic,
    BasicPanchromatic,
    PansharpenedUdm2,
    VideoFile,
    VideoFrames,
    BasicRadianceHdf5,
    RadianceHdf5,
    SurfaceReflectanceHdf5,
    MethaneHdf5,
}

impl Bundle {
    pub const ALL: [Bundle; 20] = [
        Self::Analytic,
        Self::AnalyticSr,
        Self::AnalyticUdm2,
        Self::Analytic3bUdm2,
        Self::Analytic8bUdm2,
        Self::AnalyticSrUdm2,
        Self::Analytic8bSrUdm2,
        Self::BasicAnalytic,
        Self::BasicAnalyticUdm2,
        Self::BasicAnalytic8bUdm2,
        Self::Visual,
        Self::Panchromatic,
        Self::BasicPanchromatic,
        Self::PansharpenedUdm2,
        Self::VideoFile,
        Self::VideoFrames,
        Self::BasicRadianceHdf5,
        Self::RadianceHdf5,
        Self::SurfaceReflectanceHdf5,
        Self::MethaneHdf5,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Analytic => "analytic",
            Self::AnalyticSr => "analytic_sr",
            Self::AnalyticUdm2 => "analytic_udm2",
            Self::Analytic3bUdm2 => "analytic_3b_udm2",
            Self::Analytic8bUdm2 => "analytic_8b_udm2",
            Self::AnalyticSrUdm2 => "analytic_sr_udm2",
            Self::Analytic8bSrUdm2 => "analytic_8b_sr_udm2",
            Self::BasicAnalytic => "basic_analytic",
            Self::BasicAnalyticUdm2 => "basic_analytic_udm2",
            Self::BasicAnalytic8bUdm2 => "basic_analytic_8b_udm2",
            Self::Visual => "visual",
            Self::Panchromatic => "panchromatic",
            Self::BasicPanchromatic => "basic_panchromatic",
            Self::PansharpenedUdm2 => "pansharpened_udm2",
            Self::VideoFile => "video_file",
            Self::VideoFrames => "video_frames",
            Self::BasicRadianceHdf5 => "basic_radiance_hdf5",
            Self::RadianceHdf5 => "radiance_hdf5",
            Self::SurfaceReflectanceHdf5 => "surface_reflectance_hdf5",
            Self::MethaneHdf5 => "methane_hdf5",
        }
    }
}

impl fmt::Display for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Bundle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|b| b.key() == s)
            .copied()
            .ok_or_else(|| format!("Unknown bundle: {s}"))
    }
}

/// Checks a raw bundle name against a canonical item type.
pub fn validate_bundle(item_type: ItemType, bundle: &str) -> Result<Bundle, Error> {
    let invalid = || Error::InvalidBundle {
        item_type: item_type.to_string(),
        bundle: bundle.to_string(),
    };
    let parsed: Bundle = bundle.parse().map_err(|_| invalid())?;
    if !item_type.supports(parsed) {
        return Err(invalid());
    }
    Ok(parsed)
}
