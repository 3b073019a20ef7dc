//! Catalog tree types: make → model → year → style.
//!
//! These mirror the JSON returned by the vehicle catalog service. Only the
//! fields the pipeline reads are typed; everything else is kept in `extra`
//! so the raw snapshot round-trips the remote payload.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Catalog identifier of a vehicle style. Used as the problem option key.
pub type StyleId = u64;

// ---------------------------------------------------------------------------
// Tree nodes
// ---------------------------------------------------------------------------

/// A vehicle make with its models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Make {
    /// Display name, e.g. `Aston Martin`.
    pub name: String,
    /// URL slug, e.g. `aston-martin`.
    pub nice_name: String,
    #[serde(default)]
    pub models: Vec<Model>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A model of a make, with its model-year entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    pub name: String,
    pub nice_name: String,
    #[serde(default)]
    pub years: Vec<ModelYear>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One model year. `styles` is filled in by the crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelYear {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles: Option<Vec<Style>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A concrete trim/style of a model year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub id: StyleId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<Engine>,
    #[serde(rename = "MPG", default, skip_serializing_if = "Option::is_none")]
    pub mpg: Option<Mpg>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    #[serde(
        rename = "baseMSRP",
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub base_msrp: Option<Measure>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Engine {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub size: Option<Measure>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub horsepower: Option<Measure>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fuel economy. The service reports these as strings, e.g. `"34"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mpg {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub highway: Option<Measure>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub city: Option<Measure>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Aggregate owner rating for a make/model/year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub average_rating: Option<Measure>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub reviews_count: Option<Measure>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

impl Model {
    /// The single style kept for this model, if the crawl found one.
    pub fn retained_style(&self) -> Option<&Style> {
        self.years
            .first()
            .and_then(|y| y.styles.as_deref())
            .and_then(|styles| styles.first())
    }

    /// Mutable access to the retained style.
    pub fn retained_style_mut(&mut self) -> Option<&mut Style> {
        self.years
            .first_mut()
            .and_then(|y| y.styles.as_mut())
            .and_then(|styles| styles.first_mut())
    }

    /// Store `style` as the only style of the first model year, creating the
    /// year entry when the listing did not include one.
    pub fn retain_style(&mut self, style: Style, year: u32) {
        if self.years.is_empty() {
            self.years.push(ModelYear {
                year: Some(year),
                styles: None,
                extra: Map::new(),
            });
        }
        self.years[0].styles = Some(vec![style]);
    }
}

impl Style {
    /// Drop the raw color list, which dwarfs the rest of the record.
    pub fn strip_colors(&mut self) {
        self.extra.remove("colors");
    }
}

impl Rating {
    /// Drop the raw review texts; only the aggregates are kept.
    pub fn strip_reviews(&mut self) {
        self.extra.remove("reviews");
    }
}

// ---------------------------------------------------------------------------
// Lenient numbers
// ---------------------------------------------------------------------------

/// A numeric field exactly as the service sent it.
///
/// The service mixes JSON numbers and numeric strings (`"34"`), and sometimes
/// sends placeholders like `"n/a"`. The raw value is kept so the snapshot
/// round-trips; [`Measure::value`] reads it as a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Measure(pub Value);

impl Measure {
    /// The value as a finite number, if it is one.
    pub fn value(&self) -> Option<f64> {
        number_from_value(&self.0)
    }
}

/// Read a measure from an optional field.
pub fn measure(field: &Option<Measure>) -> Option<f64> {
    field.as_ref().and_then(Measure::value)
}

/// Interpret a JSON value as a finite number, accepting numeric strings.
pub fn number_from_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// A present key is `Some`, even when its value is `null`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Measure>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(|v| Some(Measure(v)))
}
