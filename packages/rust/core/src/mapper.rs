//! Catalog tree → problem document.
//!
//! [`map_catalog`] is pure: one option per retained style, keyed by style id,
//! in tree order. Template columns are copied unchanged. Loading the template
//! is a separate step ([`load_template`]).

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use tracing::{debug, info, instrument, warn};

use catalogsync_shared::{
    CatalogSyncError, Make, Model, ProblemDocument, ProblemOption, Result, Style, StyleId, measure,
};

/// Value keys derived from a style.
pub const DERIVED_KEYS: [&str; 6] = [
    "price",
    "engineSize",
    "power",
    "MPGCombined",
    "averageRating",
    "reviewsCount",
];

/// Highway share of the combined fuel economy figure; city gets the rest.
const HIGHWAY_WEIGHT: f64 = 0.45;
const CITY_WEIGHT: f64 = 0.55;

/// A mapped document plus the style ids dropped as duplicates.
#[derive(Debug, Clone)]
pub struct MapOutcome {
    pub document: ProblemDocument,
    pub duplicates: Vec<StyleId>,
}

/// Read the problem template (subject and columns).
///
/// Any options in the template are discarded; the mapper supplies them.
pub fn load_template(path: &Path) -> Result<ProblemDocument> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CatalogSyncError::mapper_input(path, e.to_string()))?;
    let mut template: ProblemDocument = serde_json::from_str(&content)
        .map_err(|e| CatalogSyncError::mapper_input(path, format!("invalid template: {e}")))?;
    template.options.clear();
    debug!(path = %path.display(), columns = template.columns.len(), "template loaded");
    Ok(template)
}

/// Build the problem document for `makes` on top of `template`.
#[instrument(skip_all, fields(makes = makes.len()))]
pub fn map_catalog(makes: &[Make], template: &ProblemDocument) -> MapOutcome {
    let underived: Vec<&str> = template
        .column_keys()
        .filter(|key| !DERIVED_KEYS.contains(key))
        .collect();
    if !underived.is_empty() {
        warn!(columns = ?underived, "template columns have no derivation, values will be null");
    }

    let mut seen = HashSet::new();
    let mut options = Vec::new();
    let mut duplicates = Vec::new();

    for make in makes {
        for model in &make.models {
            let Some(style) = model.retained_style() else {
                continue;
            };
            if !seen.insert(style.id) {
                warn!(
                    style_id = style.id,
                    make = %make.name,
                    model = %model.name,
                    "duplicate style id, keeping first"
                );
                duplicates.push(style.id);
                continue;
            }

            let mut values = derive_values(style);
            for key in &underived {
                values.insert((*key).to_string(), None);
            }
            options.push(option_for(make, model, style, values));
        }
    }

    info!(options = options.len(), duplicates = duplicates.len(), "catalog mapped");

    let mut document = template.clone();
    document.options = options;
    MapOutcome {
        document,
        duplicates,
    }
}

fn option_for(
    make: &Make,
    model: &Model,
    style: &Style,
    values: BTreeMap<String, Option<f64>>,
) -> ProblemOption {
    ProblemOption {
        key: style.id,
        name: format!("{} {}", make.name, model.name),
        description: style.name.clone(),
        values,
    }
}

fn derive_values(style: &Style) -> BTreeMap<String, Option<f64>> {
    let engine = style.engine.as_ref();
    let rating = style.rating.as_ref();
    let mpg = style.mpg.as_ref();

    BTreeMap::from([
        (
            "price".to_string(),
            style.price.as_ref().and_then(|p| measure(&p.base_msrp)),
        ),
        ("engineSize".to_string(), engine.and_then(|e| measure(&e.size))),
        ("power".to_string(), engine.and_then(|e| measure(&e.horsepower))),
        (
            "MPGCombined".to_string(),
            mpg.and_then(|m| combined_mpg(measure(&m.highway)?, measure(&m.city)?)),
        ),
        (
            "averageRating".to_string(),
            rating.and_then(|r| measure(&r.average_rating)),
        ),
        (
            "reviewsCount".to_string(),
            rating.and_then(|r| measure(&r.reviews_count)),
        ),
    ])
}

/// Weighted highway/city figure, rounded half away from zero.
pub fn combined_mpg(highway: f64, city: f64) -> Option<f64> {
    let combined = (highway * HIGHWAY_WEIGHT + city * CITY_WEIGHT).round();
    combined.is_finite().then_some(combined)
}
