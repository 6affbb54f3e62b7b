use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Local, NaiveDate};
use serde::Serialize;
use serde_json::Value;

use super::domain::{
    FieldWarning, ItemField, ItemPayload, ItemStatus, PromotionTag, TransactionType,
};
use super::lifecycle::required_fields_for;

const MIN_IDENTITY_LEN: usize = 3;
const MIN_DESCRIPTION_LEN: usize = 10;
const MIN_IMAGES: usize = 3;

const MIN_PRICE: f64 = 100.0;
const PRICE_REVIEW_THRESHOLD: f64 = 10_000_000.0;
const PRICE_CONFIRM_THRESHOLD: f64 = 100_000_000.0;

const MAX_ROOM_COUNT: f64 = 100.0;
const ROOM_COUNT_REVIEW_THRESHOLD: f64 = 50.0;

const AREA_REVIEW_THRESHOLD: f64 = 20_000.0;
const AREA_CONFIRM_THRESHOLD: f64 = 50_000.0;

const MAX_YEARS_AHEAD: i64 = 5;
const YEAR_REVIEW_THRESHOLD: i64 = 1700;
const YEAR_HERITAGE_THRESHOLD: i64 = 1600;

const PHOTO_EXTENSIONS: [&str; 10] = [
    "jpg", "jpeg", "png", "webp", "gif", "avif", "heic", "bmp", "tif", "tiff",
];

/// Outcome of validating one field.
///
/// `error` blocks a non-draft write. `warning` never blocks; when `severe` is set the item is
/// flagged for mandatory moderator review. Thresholds stack, so the warning text is the most
/// specific tier that fired while `severe` stays set once any review tier is crossed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldCheck {
    pub error: Option<String>,
    pub warning: Option<String>,
    pub severe: bool,
}

impl FieldCheck {
    pub fn ok() -> Self {
        Self::default()
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    fn warning(message: impl Into<String>, severe: bool) -> Self {
        Self {
            error: None,
            warning: Some(message.into()),
            severe,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-field errors and warnings for a whole payload under a target status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: BTreeMap<ItemField, String>,
    pub warnings: Vec<FieldWarning>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn requires_review(&self) -> bool {
        self.warnings.iter().any(|warning| warning.severe)
    }
}

/// Pure field validator. The reference year anchors the `yearBuilt` rules.
#[derive(Debug, Clone, Copy)]
pub struct FieldValidator {
    reference_year: i32,
}

impl Default for FieldValidator {
    fn default() -> Self {
        Self::for_today()
    }
}

impl FieldValidator {
    pub fn new(reference_year: i32) -> Self {
        Self { reference_year }
    }

    pub fn for_today() -> Self {
        Self::new(Local::now().year())
    }

    pub fn reference_year(&self) -> i32 {
        self.reference_year
    }

    pub fn validate(&self, field: ItemField, value: &Value) -> FieldCheck {
        match field {
            ItemField::Title
            | ItemField::Slug
            | ItemField::Location
            | ItemField::Address
            | ItemField::PropertyType => identity_text(field, value),
            ItemField::Price => price(value),
            ItemField::Bedrooms | ItemField::Bathrooms => room_count(field, value),
            ItemField::SquareFootage => square_footage(value),
            ItemField::YearBuilt => self.year_built(value),
            ItemField::Description => description(value),
            ItemField::Images => images(value),
            ItemField::Features | ItemField::Amenities | ItemField::Facilities => {
                tag_set(field, value)
            }
            ItemField::AvailableFrom => calendar_date(value),
            ItemField::ParkingAvailable => match parse_bool(value) {
                Some(_) => FieldCheck::ok(),
                None => FieldCheck::error("Parking availability is required (yes or no)"),
            },
            ItemField::TransactionType => match parse_text(value)
                .as_deref()
                .and_then(TransactionType::parse)
            {
                Some(_) => FieldCheck::ok(),
                None => FieldCheck::error("Transaction type must be sale, rent, or auction"),
            },
            ItemField::Tag => promotion_tag(value),
        }
    }

    /// Validate every relevant field of `payload` for an item in `status`.
    ///
    /// Required fields are always checked. Optional fields are checked only when they carry a
    /// value. Drafts never collect errors, only warnings.
    pub fn review(&self, payload: &ItemPayload, status: ItemStatus) -> ValidationReport {
        let required = required_fields_for(status);
        let mut report = ValidationReport::default();

        for field in ItemField::ALL {
            let value = payload.value(field);
            if !required.contains(&field) && is_blank(value) {
                continue;
            }

            let check = self.validate(field, value);
            if let Some(error) = check.error {
                if !status.is_draft() {
                    report.errors.insert(field, error);
                }
                continue;
            }
            if let Some(message) = check.warning {
                report.warnings.push(FieldWarning {
                    field,
                    message,
                    severe: check.severe,
                });
            }
        }

        report
    }

    fn year_built(&self, value: &Value) -> FieldCheck {
        let year = match parse_number(value) {
            Some(year) if year.fract() != 0.0 => {
                return FieldCheck::error("Year built must be a whole year")
            }
            Some(year) => year as i64,
            None => return FieldCheck::error("Year built is required and must be a number"),
        };

        let current = i64::from(self.reference_year);
        if year < 0 {
            FieldCheck::error("Year built cannot be negative")
        } else if year > current + MAX_YEARS_AHEAD {
            FieldCheck::error(format!(
                "Year built cannot be more than {MAX_YEARS_AHEAD} years in the future"
            ))
        } else if year > current {
            FieldCheck::warning("Year built is in the future", false)
        } else if year < YEAR_HERITAGE_THRESHOLD {
            FieldCheck::warning(
                format!(
                    "Built before {YEAR_HERITAGE_THRESHOLD}? Confirm this is a heritage property"
                ),
                true,
            )
        } else if year < YEAR_REVIEW_THRESHOLD {
            FieldCheck::warning(
                format!("Year built before {YEAR_REVIEW_THRESHOLD} requires admin review"),
                true,
            )
        } else {
            FieldCheck::ok()
        }
    }
}

fn identity_text(field: ItemField, value: &Value) -> FieldCheck {
    let length = parse_text(value).map_or(0, |text| text.chars().count());
    if length < MIN_IDENTITY_LEN {
        FieldCheck::error(format!(
            "{} must be at least {MIN_IDENTITY_LEN} characters",
            field.label()
        ))
    } else {
        FieldCheck::ok()
    }
}

fn description(value: &Value) -> FieldCheck {
    let length = parse_text(value).map_or(0, |text| text.chars().count());
    if length < MIN_DESCRIPTION_LEN {
        FieldCheck::error(format!(
            "Description must be at least {MIN_DESCRIPTION_LEN} characters"
        ))
    } else {
        FieldCheck::ok()
    }
}

fn price(value: &Value) -> FieldCheck {
    match parse_price(value) {
        Some(amount) if amount >= MIN_PRICE => {
            if amount > PRICE_CONFIRM_THRESHOLD {
                FieldCheck::warning("Price is extremely high, please confirm", true)
            } else if amount > PRICE_REVIEW_THRESHOLD {
                FieldCheck::warning("Price above 10,000,000 requires admin review", true)
            } else {
                FieldCheck::ok()
            }
        }
        _ => FieldCheck::error("Price is required and must be at least 100"),
    }
}

fn room_count(field: ItemField, value: &Value) -> FieldCheck {
    let label = field.label();
    match parse_number(value) {
        None => FieldCheck::error(format!("{label} is required and must be a number")),
        Some(count) if count < 0.0 => FieldCheck::error(format!("{label} cannot be negative")),
        Some(count) if count.fract() != 0.0 => {
            FieldCheck::error(format!("{label} must be a whole number"))
        }
        Some(count) if count > MAX_ROOM_COUNT => {
            FieldCheck::error(format!("{label} cannot exceed {MAX_ROOM_COUNT}"))
        }
        Some(count) if count > ROOM_COUNT_REVIEW_THRESHOLD => FieldCheck::warning(
            format!("{label} above {ROOM_COUNT_REVIEW_THRESHOLD} requires admin review"),
            true,
        ),
        Some(_) => FieldCheck::ok(),
    }
}

fn square_footage(value: &Value) -> FieldCheck {
    match parse_number(value) {
        None => FieldCheck::error("Square footage is required and must be a number"),
        Some(area) if area < 0.0 => FieldCheck::error("Square footage cannot be negative"),
        Some(area) if area > AREA_CONFIRM_THRESHOLD => FieldCheck::warning(
            "Square footage above 50,000, please double-check",
            true,
        ),
        Some(area) if area > AREA_REVIEW_THRESHOLD => FieldCheck::warning(
            "Square footage above 20,000 requires admin review",
            true,
        ),
        Some(_) => FieldCheck::ok(),
    }
}

fn images(value: &Value) -> FieldCheck {
    let entries = match value {
        Value::Array(entries) if entries.len() >= MIN_IMAGES => entries,
        _ => return FieldCheck::error(format!("At least {MIN_IMAGES} images are required")),
    };

    if entries
        .iter()
        .all(|entry| image_filename(entry).is_some_and(has_photo_extension))
    {
        FieldCheck::ok()
    } else {
        FieldCheck::error(format!(
            "Every image must be one of: {}",
            PHOTO_EXTENSIONS.join(", ")
        ))
    }
}

fn image_filename(entry: &Value) -> Option<&str> {
    match entry {
        Value::String(reference) => Some(reference),
        Value::Object(object) => object
            .get("originalName")
            .or_else(|| object.get("staged"))
            .and_then(Value::as_str),
        _ => None,
    }
}

fn has_photo_extension(reference: &str) -> bool {
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => {
            let extension = extension.to_ascii_lowercase();
            PHOTO_EXTENSIONS.contains(&extension.as_str())
        }
        _ => false,
    }
}

fn tag_set(field: ItemField, value: &Value) -> FieldCheck {
    if parse_tag_set(value).is_empty() {
        FieldCheck::error(format!("{} needs at least one entry", field.label()))
    } else {
        FieldCheck::ok()
    }
}

fn calendar_date(value: &Value) -> FieldCheck {
    match parse_date(value) {
        Some(_) => FieldCheck::ok(),
        None => FieldCheck::error("Available from must be a valid date (YYYY-MM-DD)"),
    }
}

fn promotion_tag(value: &Value) -> FieldCheck {
    if value.is_null() {
        return FieldCheck::ok();
    }
    match parse_text(value).map(|raw| PromotionTag::parse(&raw)) {
        Some(Ok(_)) => FieldCheck::ok(),
        _ => FieldCheck::error("Tag must be featured, auction, sponsored, or none"),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        Value::Array(entries) => entries.is_empty(),
        _ => false,
    }
}

/// Trimmed text for string values; numbers are accepted in their display form.
pub(crate) fn parse_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub(crate) fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|number| number.is_finite())
}

/// Price parsing strips everything except digits and the decimal point, so `"$1,250"` reads
/// as `1250`.
pub(crate) fn parse_price(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let digits: String = text
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if digits.is_empty() {
                None
            } else {
                digits.parse::<f64>().ok()
            }
        }
        _ => None,
    }
    .filter(|amount| amount.is_finite())
}

pub(crate) fn parse_whole(value: &Value) -> Option<i64> {
    parse_number(value)
        .filter(|number| number.fract() == 0.0 && number.abs() < i64::MAX as f64)
        .map(|number| number as i64)
}

pub(crate) fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => match number.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" | "on" => Some(true),
            "false" | "no" | "n" | "0" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn parse_date(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|timestamp| timestamp.date_naive())
        })
}

/// Non-empty, trimmed tag entries. A comma separated string is accepted as a list.
pub(crate) fn parse_tag_set(value: &Value) -> BTreeSet<String> {
    let entries: Vec<&str> = match value {
        Value::Array(entries) => entries.iter().filter_map(Value::as_str).collect(),
        Value::String(text) => text.split(',').collect(),
        _ => Vec::new(),
    };

    entries
        .into_iter()
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
