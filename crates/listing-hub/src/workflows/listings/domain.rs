use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::validation::{
    parse_bool, parse_date, parse_number, parse_price, parse_tag_set, parse_text, parse_whole,
};

/// Identifier wrapper for catalog items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Weak reference to the user that owns an item. The user record itself lives elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

const MAX_USER_ID_LEN: usize = 64;

impl UserId {
    pub fn parse(raw: &str) -> Result<Self, UserIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(UserIdError::Empty);
        }
        if trimmed.len() > MAX_USER_ID_LEN {
            return Err(UserIdError::TooLong);
        }
        if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(UserIdError::InvalidCharacters);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UserIdError {
    #[error("user id is empty")]
    Empty,
    #[error("user id exceeds 64 characters")]
    TooLong,
    #[error("user id may only contain letters, digits, '-' and '_'")]
    InvalidCharacters,
}

/// Canonical item status set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Draft,
    Published,
    Pending,
    Approved,
    Rejected,
    Archived,
}

impl ItemStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ItemStatus::Draft => "draft",
            ItemStatus::Published => "published",
            ItemStatus::Pending => "pending",
            ItemStatus::Approved => "approved",
            ItemStatus::Rejected => "rejected",
            ItemStatus::Archived => "archived",
        }
    }

    /// Parse a status label, mapping the labels used by the older listing schema onto the
    /// canonical set.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(ItemStatus::Draft),
            "published" | "active" | "listed" => Some(ItemStatus::Published),
            "pending" | "submitted" | "under_review" | "in_review" => Some(ItemStatus::Pending),
            "approved" => Some(ItemStatus::Approved),
            "rejected" | "denied" => Some(ItemStatus::Rejected),
            "archived" | "inactive" | "retired" => Some(ItemStatus::Archived),
            _ => None,
        }
    }

    pub const fn is_draft(self) -> bool {
        matches!(self, ItemStatus::Draft)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Sale,
    Rent,
    Auction,
}

impl TransactionType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sale" => Some(TransactionType::Sale),
            "rent" => Some(TransactionType::Rent),
            "auction" => Some(TransactionType::Auction),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            TransactionType::Sale => "sale",
            TransactionType::Rent => "rent",
            TransactionType::Auction => "auction",
        }
    }
}

/// Promotional badge shown on a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionTag {
    Featured,
    Auction,
    Sponsored,
}

impl PromotionTag {
    /// `Ok(None)` covers the explicit "none" label and blank input.
    pub fn parse(raw: &str) -> Result<Option<Self>, UnknownPromotionTag> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(None),
            "featured" => Ok(Some(PromotionTag::Featured)),
            "auction" => Ok(Some(PromotionTag::Auction)),
            "sponsored" => Ok(Some(PromotionTag::Sponsored)),
            other => Err(UnknownPromotionTag(other.to_string())),
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            PromotionTag::Featured => "featured",
            PromotionTag::Auction => "auction",
            PromotionTag::Sponsored => "sponsored",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown promotional tag '{0}'")]
pub struct UnknownPromotionTag(pub String);

/// Every editable item field, keyed by its wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemField {
    Title,
    Slug,
    Price,
    Location,
    Address,
    Bedrooms,
    Bathrooms,
    SquareFootage,
    PropertyType,
    YearBuilt,
    ParkingAvailable,
    TransactionType,
    AvailableFrom,
    Description,
    Images,
    Features,
    Amenities,
    Facilities,
    Tag,
}

impl ItemField {
    pub const ALL: [ItemField; 19] = [
        ItemField::Title,
        ItemField::Slug,
        ItemField::Price,
        ItemField::Location,
        ItemField::Address,
        ItemField::Bedrooms,
        ItemField::Bathrooms,
        ItemField::SquareFootage,
        ItemField::PropertyType,
        ItemField::YearBuilt,
        ItemField::ParkingAvailable,
        ItemField::TransactionType,
        ItemField::AvailableFrom,
        ItemField::Description,
        ItemField::Images,
        ItemField::Features,
        ItemField::Amenities,
        ItemField::Facilities,
        ItemField::Tag,
    ];

    pub const fn key(self) -> &'static str {
        match self {
            ItemField::Title => "title",
            ItemField::Slug => "slug",
            ItemField::Price => "price",
            ItemField::Location => "location",
            ItemField::Address => "address",
            ItemField::Bedrooms => "bedrooms",
            ItemField::Bathrooms => "bathrooms",
            ItemField::SquareFootage => "squareFootage",
            ItemField::PropertyType => "propertyType",
            ItemField::YearBuilt => "yearBuilt",
            ItemField::ParkingAvailable => "parkingAvailable",
            ItemField::TransactionType => "transactionType",
            ItemField::AvailableFrom => "availableFrom",
            ItemField::Description => "description",
            ItemField::Images => "images",
            ItemField::Features => "features",
            ItemField::Amenities => "amenities",
            ItemField::Facilities => "facilities",
            ItemField::Tag => "tag",
        }
    }

    /// Human label used in validation messages.
    pub const fn label(self) -> &'static str {
        match self {
            ItemField::Title => "Title",
            ItemField::Slug => "Slug",
            ItemField::Price => "Price",
            ItemField::Location => "Location",
            ItemField::Address => "Address",
            ItemField::Bedrooms => "Bedrooms",
            ItemField::Bathrooms => "Bathrooms",
            ItemField::SquareFootage => "Square footage",
            ItemField::PropertyType => "Property type",
            ItemField::YearBuilt => "Year built",
            ItemField::ParkingAvailable => "Parking availability",
            ItemField::TransactionType => "Transaction type",
            ItemField::AvailableFrom => "Available from",
            ItemField::Description => "Description",
            ItemField::Images => "Images",
            ItemField::Features => "Features",
            ItemField::Amenities => "Amenities",
            ItemField::Facilities => "Facilities",
            ItemField::Tag => "Tag",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|field| field.key() == key)
    }
}

impl fmt::Display for ItemField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// An image attached to an item: either an ingested artifact or a raw upload still waiting
/// in the staging area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageRef {
    Stored(String),
    Staged {
        staged: String,
        #[serde(rename = "originalName")]
        original_name: String,
    },
}

impl ImageRef {
    pub fn is_staged(&self) -> bool {
        matches!(self, ImageRef::Staged { .. })
    }

    fn to_value(&self) -> Value {
        match self {
            ImageRef::Stored(reference) => Value::String(reference.clone()),
            ImageRef::Staged {
                staged,
                original_name,
            } => json!({ "staged": staged, "originalName": original_name }),
        }
    }
}

/// Collapse repeated slashes in a stored reference, keeping the `scheme://` separator.
pub fn normalize_reference(raw: &str) -> String {
    let trimmed = raw.trim();
    let (prefix, rest) = match trimmed.find("://") {
        Some(index) => trimmed.split_at(index + 3),
        None => ("", trimmed),
    };

    let mut normalized = String::with_capacity(trimmed.len());
    normalized.push_str(prefix);
    for c in rest.chars() {
        if c == '/' && normalized.ends_with('/') && normalized.len() > prefix.len() {
            continue;
        }
        normalized.push(c);
    }
    normalized
}

/// Raw, partially specified item fields as received from a client.
///
/// Keys use the wire names from [`ItemField::key`]. Values are kept as entered so the field
/// validator sees exactly what the publisher typed; typed [`ItemFields`] are derived from the
/// payload only after validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemPayload(pub Map<String, Value>);

impl ItemPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: ItemField, value: Value) -> Self {
        self.0.insert(field.key().to_string(), value);
        self
    }

    pub fn value(&self, field: ItemField) -> &Value {
        self.0.get(field.key()).unwrap_or(&Value::Null)
    }

    pub fn contains(&self, field: ItemField) -> bool {
        self.0.contains_key(field.key())
    }

    /// Keys that do not name an editable field (e.g. `status`, `id`).
    pub fn unknown_keys(&self) -> Vec<String> {
        self.0
            .keys()
            .filter(|key| ItemField::from_key(key).is_none())
            .cloned()
            .collect()
    }

    /// Merge `patch` over `self`; explicit `null` values clear a field.
    pub fn merged_with(&self, patch: &ItemPayload) -> ItemPayload {
        let mut merged = self.0.clone();
        for field in ItemField::ALL {
            if let Some(value) = patch.0.get(field.key()) {
                if value.is_null() {
                    merged.remove(field.key());
                } else {
                    merged.insert(field.key().to_string(), value.clone());
                }
            }
        }
        ItemPayload(merged)
    }
}

/// Typed item fields. Every field is optional so drafts can be stored without placeholders;
/// non-draft records are guaranteed complete by the lifecycle before they are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemFields {
    pub title: Option<String>,
    pub price: Option<f64>,
    pub location: Option<String>,
    pub address: Option<String>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<u32>,
    pub square_footage: Option<f64>,
    pub property_type: Option<String>,
    pub year_built: Option<i32>,
    pub parking_available: Option<bool>,
    pub transaction_type: Option<TransactionType>,
    pub available_from: Option<NaiveDate>,
    pub description: Option<String>,
    pub images: Vec<ImageRef>,
    pub features: BTreeSet<String>,
    pub amenities: BTreeSet<String>,
    pub facilities: BTreeSet<String>,
    pub tag: Option<PromotionTag>,
}

impl ItemFields {
    /// Build typed fields from a payload. Values that cannot be coerced are dropped; callers
    /// decide beforehand whether such values are acceptable for the target status.
    pub fn from_payload(payload: &ItemPayload) -> Result<Self, String> {
        let text = |field: ItemField| {
            parse_text(payload.value(field)).filter(|value| !value.is_empty())
        };

        Ok(Self {
            title: text(ItemField::Title),
            price: parse_price(payload.value(ItemField::Price)),
            location: text(ItemField::Location),
            address: text(ItemField::Address),
            bedrooms: parse_whole(payload.value(ItemField::Bedrooms))
                .and_then(|count| u32::try_from(count).ok()),
            bathrooms: parse_whole(payload.value(ItemField::Bathrooms))
                .and_then(|count| u32::try_from(count).ok()),
            square_footage: parse_number(payload.value(ItemField::SquareFootage))
                .filter(|area| *area >= 0.0),
            property_type: text(ItemField::PropertyType),
            year_built: parse_whole(payload.value(ItemField::YearBuilt))
                .and_then(|year| i32::try_from(year).ok()),
            parking_available: parse_bool(payload.value(ItemField::ParkingAvailable)),
            transaction_type: parse_text(payload.value(ItemField::TransactionType))
                .and_then(|raw| TransactionType::parse(&raw)),
            available_from: parse_date(payload.value(ItemField::AvailableFrom)),
            description: text(ItemField::Description),
            images: parse_image_refs(payload.value(ItemField::Images))?,
            features: parse_tag_set(payload.value(ItemField::Features)),
            amenities: parse_tag_set(payload.value(ItemField::Amenities)),
            facilities: parse_tag_set(payload.value(ItemField::Facilities)),
            tag: parse_text(payload.value(ItemField::Tag))
                .and_then(|raw| PromotionTag::parse(&raw).ok().flatten()),
        })
    }

    /// The wire representation of a single field, `null` when unset.
    pub fn value_of(&self, field: ItemField) -> Value {
        fn opt<T: Serialize>(value: &Option<T>) -> Value {
            value.as_ref().map_or(Value::Null, |inner| json!(inner))
        }

        fn set(values: &BTreeSet<String>) -> Value {
            if values.is_empty() {
                Value::Null
            } else {
                json!(values)
            }
        }

        match field {
            ItemField::Title => opt(&self.title),
            ItemField::Slug => Value::Null,
            ItemField::Price => opt(&self.price),
            ItemField::Location => opt(&self.location),
            ItemField::Address => opt(&self.address),
            ItemField::Bedrooms => opt(&self.bedrooms),
            ItemField::Bathrooms => opt(&self.bathrooms),
            ItemField::SquareFootage => opt(&self.square_footage),
            ItemField::PropertyType => opt(&self.property_type),
            ItemField::YearBuilt => opt(&self.year_built),
            ItemField::ParkingAvailable => opt(&self.parking_available),
            ItemField::TransactionType => {
                opt(&self.transaction_type.map(TransactionType::label))
            }
            ItemField::AvailableFrom => opt(
                &self
                    .available_from
                    .map(|date| date.format("%Y-%m-%d").to_string()),
            ),
            ItemField::Description => opt(&self.description),
            ItemField::Images => {
                if self.images.is_empty() {
                    Value::Null
                } else {
                    Value::Array(self.images.iter().map(ImageRef::to_value).collect())
                }
            }
            ItemField::Features => set(&self.features),
            ItemField::Amenities => set(&self.amenities),
            ItemField::Facilities => set(&self.facilities),
            ItemField::Tag => opt(&self.tag.map(PromotionTag::label)),
        }
    }

    pub fn to_payload(&self) -> ItemPayload {
        let mut map = Map::new();
        for field in ItemField::ALL {
            let value = self.value_of(field);
            if !value.is_null() {
                map.insert(field.key().to_string(), value);
            }
        }
        ItemPayload(map)
    }
}

/// Parse the `images` value: strings are stored references, objects carrying a `staged`
/// name are uploads still waiting in the staging area. Anything else is rejected.
pub(crate) fn parse_image_refs(value: &Value) -> Result<Vec<ImageRef>, String> {
    let entries = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries,
        _ => return Err("Images must be a list of image references".to_string()),
    };

    entries
        .iter()
        .map(|entry| match entry {
            Value::String(reference) if !reference.trim().is_empty() => {
                Ok(ImageRef::Stored(normalize_reference(reference)))
            }
            Value::Object(object) => {
                let staged = object
                    .get("staged")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| "Image uploads must name a staged file".to_string())?;
                let original_name = object
                    .get("originalName")
                    .and_then(Value::as_str)
                    .unwrap_or(staged);
                Ok(ImageRef::Staged {
                    staged: staged.to_string(),
                    original_name: original_name.to_string(),
                })
            }
            other => Err(format!("Unsupported image reference: {other}")),
        })
        .collect()
}

/// Non-blocking validation finding recorded on the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldWarning {
    pub field: ItemField,
    pub message: String,
    pub severe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationDecision {
    Approved,
    Rejected,
}

impl ModerationDecision {
    pub const fn target_status(self) -> ItemStatus {
        match self {
            ModerationDecision::Approved => ItemStatus::Approved,
            ModerationDecision::Rejected => ItemStatus::Rejected,
        }
    }
}

/// Most recent moderation decision. Earlier decisions are not retained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationNote {
    pub decision: ModerationDecision,
    pub decided_by: UserId,
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Stored item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemRecord {
    pub id: ItemId,
    pub slug: Option<String>,
    /// Whether `slug` was supplied by the publisher rather than derived from the title.
    #[serde(default)]
    pub explicit_slug: bool,
    pub status: ItemStatus,
    #[serde(flatten)]
    pub fields: ItemFields,
    pub created_by: UserId,
    pub requires_review: bool,
    pub review_notes: Vec<FieldWarning>,
    pub moderation: Option<ModerationNote>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ItemRecord {
    /// Editable fields in wire form. A title-derived slug is left out so it follows the title.
    pub fn to_payload(&self) -> ItemPayload {
        let mut payload = self.fields.to_payload();
        if let Some(slug) = self.slug.as_ref().filter(|_| self.explicit_slug) {
            payload
                .0
                .insert(ItemField::Slug.key().to_string(), Value::String(slug.clone()));
        }
        payload
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.created_by == user
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerRole {
    Publisher,
    Moderator,
}

impl CallerRole {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "publisher" | "user" | "owner" => Some(CallerRole::Publisher),
            "moderator" | "admin" => Some(CallerRole::Moderator),
            _ => None,
        }
    }
}

/// Verified caller identity attached by the upstream authenticator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: UserId,
    pub role: CallerRole,
}

impl CallerIdentity {
    pub fn publisher(user_id: UserId) -> Self {
        Self {
            user_id,
            role: CallerRole::Publisher,
        }
    }

    pub fn moderator(user_id: UserId) -> Self {
        Self {
            user_id,
            role: CallerRole::Moderator,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_normalization_collapses_duplicate_slashes() {
        assert_eq!(
            normalize_reference("https://cdn.example.com//media///a.jpg"),
            "https://cdn.example.com/media/a.jpg"
        );
        assert_eq!(normalize_reference("//media//b.jpg "), "/media/b.jpg");
        assert_eq!(normalize_reference("media/c.jpg"), "media/c.jpg");
    }

    #[test]
    fn legacy_status_labels_map_to_canonical_set() {
        assert_eq!(ItemStatus::parse("Active"), Some(ItemStatus::Published));
        assert_eq!(ItemStatus::parse("under_review"), Some(ItemStatus::Pending));
        assert_eq!(ItemStatus::parse("denied"), Some(ItemStatus::Rejected));
        assert_eq!(ItemStatus::parse("retired"), Some(ItemStatus::Archived));
        assert_eq!(ItemStatus::parse("sold"), None);
    }

    #[test]
    fn user_ids_reject_malformed_input() {
        assert!(UserId::parse("64f1c2a9e13b").is_ok());
        assert_eq!(UserId::parse("  "), Err(UserIdError::Empty));
        assert_eq!(
            UserId::parse("robert'); drop table"),
            Err(UserIdError::InvalidCharacters)
        );
        assert_eq!(UserId::parse(&"a".repeat(65)), Err(UserIdError::TooLong));
    }

    #[test]
    fn payload_merge_overlays_and_clears() {
        let stored = ItemPayload::new()
            .with(ItemField::Title, json!("Harbor loft"))
            .with(ItemField::Price, json!(250000));
        let patch = ItemPayload::new()
            .with(ItemField::Price, Value::Null)
            .with(ItemField::Location, json!("Old Town"));

        let merged = stored.merged_with(&patch);
        assert_eq!(merged.value(ItemField::Title), &json!("Harbor loft"));
        assert!(merged.value(ItemField::Price).is_null());
        assert_eq!(merged.value(ItemField::Location), &json!("Old Town"));
    }

    #[test]
    fn image_refs_accept_strings_and_staged_objects() {
        let refs = parse_image_refs(&json!([
            "/media//1-a.jpg",
            { "staged": "raw-1", "originalName": "porch.png" }
        ]))
        .expect("valid refs");
        assert_eq!(refs[0], ImageRef::Stored("/media/1-a.jpg".to_string()));
        assert!(refs[1].is_staged());

        assert!(parse_image_refs(&json!([42])).is_err());
        assert!(parse_image_refs(&json!({ "url": "x.jpg" })).is_err());
    }

    #[test]
    fn fields_round_trip_through_payload() {
        let payload = ItemPayload::new()
            .with(ItemField::Title, json!(" Cedar cottage "))
            .with(ItemField::Price, json!("$1,250"))
            .with(ItemField::Bedrooms, json!("3"))
            .with(ItemField::TransactionType, json!("Rent"))
            .with(ItemField::AvailableFrom, json!("2026-11-01"))
            .with(ItemField::Features, json!(["garden", " ", "fireplace"]));

        let fields = ItemFields::from_payload(&payload).expect("coerces");
        assert_eq!(fields.title.as_deref(), Some("Cedar cottage"));
        assert_eq!(fields.price, Some(1250.0));
        assert_eq!(fields.bedrooms, Some(3));
        assert_eq!(fields.transaction_type, Some(TransactionType::Rent));
        assert_eq!(fields.features.len(), 2);

        let again = ItemFields::from_payload(&fields.to_payload()).expect("coerces again");
        assert_eq!(again, fields);
    }
}
