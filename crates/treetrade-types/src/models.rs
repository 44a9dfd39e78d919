use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Avatar shown for sellers whose profile row is missing.
pub const DEFAULT_AVATAR: &str =
    "https://images.unsplash.com/photo-1535713875002-d1d0cf377fde?auto=format&fit=crop&q=80&w=100";

/// Campus default used for new drafts and as the map center.
pub const DEFAULT_LOCATION: (f64, f64) = (37.4275, -122.1697);

/// Categories offered by the post form. Stored listings may carry any text.
pub const CATEGORIES: &[&str] = &["Books", "Electronics", "Furniture", "Clothing", "Other"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    New,
    LikeNew,
    Good,
    Fair,
    Poor,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::LikeNew => "like-new",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "like-new" => Ok(Self::LikeNew),
            "good" => Ok(Self::Good),
            "fair" => Ok(Self::Fair),
            "poor" => Ok(Self::Poor),
            other => Err(format!("unknown condition '{}'", other)),
        }
    }
}

/// A latitude or longitude as it arrives from the backend: either a JSON
/// number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinate {
    Number(f64),
    Text(String),
}

impl Coordinate {
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }
}

impl From<f64> for Coordinate {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: Coordinate,
    pub lng: Coordinate,
}

impl Location {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat: Coordinate::Number(lat),
            lng: Coordinate::Number(lng),
        }
    }

    /// Returns `(lat, lng)` if both parse and fall inside the valid ranges.
    pub fn resolve(&self) -> Option<(f64, f64)> {
        let lat = self.lat.value()?;
        let lng = self.lng.value()?;
        is_valid_coordinate(lat, lng).then_some((lat, lng))
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::new(DEFAULT_LOCATION.0, DEFAULT_LOCATION.1)
    }
}

pub fn is_valid_coordinate(lat: f64, lng: f64) -> bool {
    lat.is_finite()
        && lng.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lng)
}

/// A user's public profile. `is_admin` is the server-side role; clients
/// never decide it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub avatar: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Seller snapshot denormalized onto each listing at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerProfile {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub avatar: String,
}

impl SellerProfile {
    /// Builds the snapshot from possibly-missing joined profile columns.
    pub fn from_join(
        id: Uuid,
        name: Option<String>,
        username: Option<String>,
        avatar: Option<String>,
    ) -> Self {
        Self {
            id,
            name: name.unwrap_or_else(|| "Unknown User".to_string()),
            username: username.unwrap_or_else(|| "unknown".to_string()),
            avatar: avatar.unwrap_or_else(|| DEFAULT_AVATAR.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub price: String,
    pub category: String,
    pub condition: Condition,
    pub images: Vec<String>,
    pub location: Location,
    pub seller: SellerProfile,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Listing {
    /// Only the first image is ever displayed.
    pub fn primary_image(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }

    /// The editable fields of this listing, as the edit form starts out.
    pub fn to_draft(&self) -> ListingDraft {
        ListingDraft {
            title: self.title.clone(),
            description: self.description.clone(),
            price: self.price.clone(),
            category: self.category.clone(),
            condition: self.condition,
            images: self.images.clone(),
            location: self.location.clone(),
        }
    }
}

/// Client-editable listing fields. Identity, owner, seller snapshot and
/// timestamps are assigned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub title: String,
    pub description: String,
    pub price: String,
    pub category: String,
    pub condition: Condition,
    pub images: Vec<String>,
    pub location: Location,
}

impl Default for ListingDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            price: String::new(),
            category: "Books".to_string(),
            condition: Condition::LikeNew,
            images: Vec::new(),
            location: Location::default(),
        }
    }
}

impl ListingDraft {
    /// Title, description and price are required.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title is required".to_string());
        }
        if self.description.trim().is_empty() {
            return Err("description is required".to_string());
        }
        if self.price.trim().is_empty() {
            return Err("price is required".to_string());
        }
        Ok(())
    }
}

/// Participant snapshot joined onto a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantProfile {
    pub name: String,
    pub username: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingSummary {
    pub title: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub updated_at: DateTime<Utc>,
    pub listing: ListingSummary,
    pub buyer: ParticipantProfile,
    pub seller: ParticipantProfile,
    pub last_message: Option<LastMessage>,
}

impl Conversation {
    /// The participant on the other side from `user_id`.
    pub fn counterpart(&self, user_id: Uuid) -> &ParticipantProfile {
        if user_id == self.buyer_id {
            &self.seller
        } else {
            &self.buyer
        }
    }

    pub fn involves(&self, user_id: Uuid) -> bool {
        self.buyer_id == user_id || self.seller_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
}
