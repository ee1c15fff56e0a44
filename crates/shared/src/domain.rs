use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::transformation::TransformationConfig;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ImageId);

/// Credits a new account starts with.
pub const DEFAULT_CREDIT_BALANCE: i64 = 10;
/// Plan assigned to accounts created through identity sync.
pub const DEFAULT_PLAN_ID: i64 = 1;
/// Credits charged per applied transformation.
pub const TRANSFORMATION_CREDIT_FEE: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransformationType {
    #[serde(rename = "restore")]
    Restore,
    #[serde(rename = "fill")]
    Fill,
    #[serde(rename = "remove")]
    Remove,
    #[serde(rename = "recolor")]
    Recolor,
    #[serde(rename = "removeBackground")]
    RemoveBackground,
}

impl TransformationType {
    pub const ALL: [TransformationType; 5] = [
        TransformationType::Restore,
        TransformationType::Fill,
        TransformationType::Remove,
        TransformationType::Recolor,
        TransformationType::RemoveBackground,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Restore => "restore",
            Self::Fill => "fill",
            Self::Remove => "remove",
            Self::Recolor => "recolor",
            Self::RemoveBackground => "removeBackground",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Restore => "Restore Image",
            Self::Fill => "Generative Fill",
            Self::Remove => "Object Remove",
            Self::Recolor => "Object Recolor",
            Self::RemoveBackground => "Background Remove",
        }
    }

    pub fn subtitle(self) -> &'static str {
        match self {
            Self::Restore => "Refine images by removing noise and imperfections",
            Self::Fill => "Enhance an image's dimensions using AI outpainting",
            Self::Remove => "Identify and eliminate objects from images",
            Self::Recolor => "Identify and recolor objects from the image",
            Self::RemoveBackground => "Removes the background of the image using AI",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Self::Restore => "image.svg",
            Self::Fill => "stars.svg",
            Self::Remove => "scan.svg",
            Self::Recolor => "filter.svg",
            Self::RemoveBackground => "camera.svg",
        }
    }

    /// Provider parameters a freshly selected transformation of this type starts from.
    pub fn config_template(self) -> TransformationConfig {
        let value = match self {
            Self::Restore => json!({ "restore": true }),
            Self::Fill => json!({ "fillBackground": true }),
            Self::Remove => json!({
                "remove": { "prompt": "", "removeShadow": true, "multiple": true }
            }),
            Self::Recolor => json!({
                "recolor": { "prompt": "", "to": "", "multiple": true }
            }),
            Self::RemoveBackground => json!({ "removeBackground": true }),
        };
        TransformationConfig::from_value(value).unwrap_or_default()
    }

    /// Whether the form for this type exposes a prompt field.
    pub fn takes_prompt(self) -> bool {
        matches!(self, Self::Remove | Self::Recolor)
    }
}

impl fmt::Display for TransformationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownKey {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for TransformationType {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.key() == s)
            .ok_or_else(|| UnknownKey {
                kind: "transformation type",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AspectRatioOption {
    Square,
    Portrait,
    Landscape,
}

impl AspectRatioOption {
    pub const ALL: [AspectRatioOption; 3] = [
        AspectRatioOption::Square,
        AspectRatioOption::Portrait,
        AspectRatioOption::Landscape,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Square => "square",
            Self::Portrait => "portrait",
            Self::Landscape => "landscape",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Square => "Square (1:1)",
            Self::Portrait => "Standard Portrait (3:4)",
            Self::Landscape => "Landscape (16:9)",
        }
    }

    pub fn width(self) -> u32 {
        match self {
            Self::Square | Self::Portrait => 1000,
            Self::Landscape => 1778,
        }
    }

    pub fn height(self) -> u32 {
        match self {
            Self::Square | Self::Landscape => 1000,
            Self::Portrait => 1334,
        }
    }

    pub fn aspect_ratio(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait => "3:4",
            Self::Landscape => "16:9",
        }
    }

    /// Resolves either the option key or its ratio string.
    pub fn lookup(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|option| option.key() == key || option.aspect_ratio() == key)
    }
}

impl FromStr for AspectRatioOption {
    type Err = UnknownKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::lookup(s).ok_or_else(|| UnknownKey {
            kind: "aspect ratio",
            value: s.to_string(),
        })
    }
}
