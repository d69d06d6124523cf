//! Enrichment Cache
//!
//! Resolution chain for a vehicle model id:
//!
//! 1. Three-letter stock code: showroom image.
//! 2. Numeric mod id (`123`, `m123`, `m_123`): attachment thumbnail.
//! 3. Catalog record: first usable image-like field.
//! 4. Local fallback keyed by the raw id.
//!
//! The catalog, when configured, is asked once per model regardless of the
//! local rules because it is the only source of drivetrain data. Failures
//! and timeouts degrade to the local rules; nothing is retried.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::{debug, info};

use crate::enrichment::catalog::{vehicle_record, CatalogError, VehicleCatalog};
use crate::enrichment::{DriveType, VehicleInfo};

/// Showroom image of a stock car.
pub fn showroom_image(abbrev: &str) -> String {
    format!("/static/showroom/cars160/{}.png", abbrev)
}

/// Thumbnail of a mod attachment.
pub fn attachment_image(attachment_id: &str) -> String {
    format!("https://www.lfs.net/attachment/{}/thumb", attachment_id)
}

/// Last-resort local asset.
pub fn fallback_image(model_id: &str) -> String {
    format!("/car_images/{}.png", model_id)
}

/// Uppercased code if `value` is a three-letter stock car code.
pub fn stock_abbrev(value: &str) -> Option<String> {
    let s = value.trim();
    if s.len() == 3 && s.bytes().all(|b| b.is_ascii_alphabetic()) {
        Some(s.to_ascii_uppercase())
    } else {
        None
    }
}

/// Attachment digits if `value` looks like a mod id.
pub fn mod_attachment_id(value: &str) -> Option<String> {
    let s = value.trim();
    let digits = s.strip_prefix('m')
        .map(|rest| rest.strip_prefix('_').unwrap_or(rest))
        .unwrap_or(s);

    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(digits.to_string())
    } else {
        None
    }
}

fn is_image_ref(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with('/')
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_field<'a>(record: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| record.get(*k))
        .find(|v| scalar_text(v).is_some())
}

/// What a catalog record contributes.
#[derive(Debug, Default, PartialEq)]
struct CatalogHints {
    abbrev: Option<String>,
    image_url: Option<String>,
    mod_attachment_id: Option<String>,
    drive_type: Option<DriveType>,
}

fn scan_record(record: &Value) -> CatalogHints {
    let mut hints = CatalogHints::default();

    hints.abbrev = first_field(record, &["code", "abbr", "shortName", "abbrev", "model"])
        .and_then(scalar_text)
        .and_then(|code| stock_abbrev(&code));

    let mut candidates: Vec<String> = ["thumb", "thumbnail", "image", "imageUrl"]
        .iter()
        .filter_map(|k| record.get(*k).and_then(scalar_text))
        .collect();

    if let Some(images) = record.get("images").and_then(Value::as_array) {
        candidates.extend(images.iter().filter_map(scalar_text));
    }
    if let Some(media) = record.get("media").and_then(Value::as_array) {
        for item in media {
            candidates.extend(["url", "image"].iter().filter_map(|k| item.get(*k).and_then(scalar_text)));
        }
    }
    if let Some(attach) = first_field(record, &["attachment_id", "attachmentId", "attach"]).and_then(scalar_text) {
        candidates.push(format!("/attachment/{}/thumb", attach));
    }
    if let Some(mod_id) = first_field(record, &["modid", "modId"]).and_then(scalar_text) {
        let digits: String = mod_id.chars().filter(char::is_ascii_digit).collect();
        if !digits.is_empty() {
            candidates.push(attachment_image(&digits));
            hints.mod_attachment_id = Some(digits);
        }
    }

    hints.image_url = candidates.into_iter().find(|c| is_image_ref(c));
    hints.drive_type = ["drive", "driveType"]
        .iter()
        .filter_map(|k| record.get(*k))
        .find(|v| !v.is_null())
        .and_then(DriveType::from_catalog);

    hints
}

/// Resolve one model id. Never fails: catalog errors fall back locally.
pub async fn resolve_vehicle(
    catalog: Option<&dyn VehicleCatalog>,
    model_id: &str,
    lookup_timeout: Duration,
) -> VehicleInfo {
    let mut abbrev = stock_abbrev(model_id);
    let mut attachment = if abbrev.is_none() { mod_attachment_id(model_id) } else { None };
    let mut image_url = abbrev.as_deref().map(showroom_image)
        .or_else(|| attachment.as_deref().map(attachment_image));
    let mut drive_type = None;

    if let Some(catalog) = catalog {
        let outcome = match tokio::time::timeout(lookup_timeout, catalog.lookup(model_id)).await {
            Ok(result) => result,
            Err(_) => Err(CatalogError::Timeout),
        };

        match outcome {
            Ok(document) => {
                let hints = scan_record(vehicle_record(&document));
                drive_type = hints.drive_type;
                if image_url.is_none() {
                    abbrev = abbrev.or(hints.abbrev);
                    attachment = attachment.or(hints.mod_attachment_id);
                    image_url = hints.image_url
                        .or_else(|| abbrev.as_deref().map(showroom_image))
                        .or_else(|| attachment.as_deref().map(attachment_image));
                }
            }
            Err(e) => debug!("Catalog lookup for {} failed: {}", model_id, e),
        }
    }

    VehicleInfo {
        image_url: image_url.unwrap_or_else(|| fallback_image(model_id)),
        abbrev,
        mod_attachment_id: attachment,
        drive_type,
    }
}

/// Memoized model id -> vehicle metadata.
pub struct EnrichmentCache {
    entries: BTreeMap<String, VehicleInfo>,
    catalog: Option<Arc<dyn VehicleCatalog>>,
    lookup_timeout: Duration,
}

impl EnrichmentCache {
    /// Create an empty cache. Without a catalog only local rules apply.
    pub fn new(catalog: Option<Arc<dyn VehicleCatalog>>, lookup_timeout: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            catalog,
            lookup_timeout,
        }
    }

    /// Resolved metadata for a model, if any.
    pub fn get(&self, model_id: &str) -> Option<&VehicleInfo> {
        self.entries.get(model_id)
    }

    /// Whether a model has been resolved.
    pub fn is_resolved(&self, model_id: &str) -> bool {
        self.entries.contains_key(model_id)
    }

    /// Number of resolved models.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been resolved yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve every not-yet-known model concurrently and wait for all.
    ///
    /// Duplicates are collapsed, so concurrency is bounded by the number of
    /// distinct unresolved models. Returns how many entries were added.
    pub async fn resolve_missing<I>(&mut self, model_ids: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let pending: BTreeSet<String> = model_ids.into_iter()
            .filter(|m| !m.is_empty() && !self.entries.contains_key(m))
            .collect();
        if pending.is_empty() {
            return 0;
        }

        let catalog = self.catalog.as_deref();
        let timeout = self.lookup_timeout;
        let resolved = join_all(pending.into_iter().map(|model_id| async move {
            let info = resolve_vehicle(catalog, &model_id, timeout).await;
            (model_id, info)
        }))
        .await;

        let added = resolved.len();
        for (model_id, info) in resolved {
            if let Some(drive) = info.drive_type {
                info!("Fetched drive type for {}: {}", model_id, drive);
            }
            self.entries.insert(model_id, info);
        }
        added
    }
}
