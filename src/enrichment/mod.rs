//! Vehicle Metadata Enrichment
//!
//! Cosmetic per-vehicle data (image, abbreviation, drivetrain) resolved once
//! per model id and memoized for the process lifetime. Lookups run alongside
//! the tick and never feed back into ranking.

pub mod cache;
pub mod catalog;

use std::fmt;
use serde::{Serialize, Deserialize};

pub use cache::EnrichmentCache;
pub use catalog::{CatalogError, LfsApiCatalog, VehicleCatalog};

/// Drivetrain layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriveType {
    /// Front-wheel drive
    Fwd,
    /// Rear-wheel drive
    Rwd,
    /// All-wheel drive
    Awd,
}

impl DriveType {
    /// Map a catalog drive value: `1`/`2`/`3` or the text form.
    pub fn from_catalog(value: &serde_json::Value) -> Option<Self> {
        if let Some(code) = value.as_u64() {
            return match code {
                1 => Some(DriveType::Fwd),
                2 => Some(DriveType::Rwd),
                3 => Some(DriveType::Awd),
                _ => None,
            };
        }
        match value.as_str()?.trim().to_ascii_lowercase().as_str() {
            "fwd" => Some(DriveType::Fwd),
            "rwd" => Some(DriveType::Rwd),
            "awd" => Some(DriveType::Awd),
            _ => None,
        }
    }
}

impl fmt::Display for DriveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DriveType::Fwd => "FWD",
            DriveType::Rwd => "RWD",
            DriveType::Awd => "AWD",
        };
        f.write_str(label)
    }
}

/// Resolved metadata for one vehicle model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleInfo {
    /// Image reference (absolute URL or site-relative path)
    pub image_url: String,
    /// Three-letter code of a stock car
    pub abbrev: Option<String>,
    /// Attachment id of a mod
    pub mod_attachment_id: Option<String>,
    /// Drivetrain, when the catalog knows it
    pub drive_type: Option<DriveType>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_drive_type_mapping() {
        assert_eq!(DriveType::from_catalog(&json!(1)), Some(DriveType::Fwd));
        assert_eq!(DriveType::from_catalog(&json!(2)), Some(DriveType::Rwd));
        assert_eq!(DriveType::from_catalog(&json!(3)), Some(DriveType::Awd));
        assert_eq!(DriveType::from_catalog(&json!(0)), None);
        assert_eq!(DriveType::from_catalog(&json!("AWD")), Some(DriveType::Awd));
        assert_eq!(DriveType::from_catalog(&json!(null)), None);
        assert_eq!(DriveType::Rwd.to_string(), "RWD");
    }
}
