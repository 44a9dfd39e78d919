use tracing::debug;
use uuid::Uuid;

use treetrade_types::models::{DEFAULT_LOCATION, Listing};

/// Where the map opens.
pub const DEFAULT_CENTER: (f64, f64) = DEFAULT_LOCATION;

#[derive(Debug, Clone, PartialEq)]
pub struct MapPin {
    pub listing_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub title: String,
    pub price: String,
    pub image: Option<String>,
}

/// One pin per listing with a usable position. Listings whose coordinates
/// don't parse or fall out of range are left off the map.
pub fn pins<'a>(listings: impl IntoIterator<Item = &'a Listing>) -> Vec<MapPin> {
    listings
        .into_iter()
        .filter_map(|listing| {
            let Some((lat, lng)) = listing.location.resolve() else {
                debug!("Listing {} has no usable location", listing.id);
                return None;
            };
            Some(MapPin {
                listing_id: listing.id,
                lat,
                lng,
                title: listing.title.clone(),
                price: listing.price.clone(),
                image: listing.primary_image().map(str::to_string),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use treetrade_types::models::{Condition, Coordinate, Location, SellerProfile};

    fn listing_at(location: Location) -> Listing {
        let owner = Uuid::new_v4();
        Listing {
            id: Uuid::new_v4(),
            user_id: owner,
            title: "Bike".into(),
            description: "Red".into(),
            price: "80".into(),
            category: "Other".into(),
            condition: Condition::Good,
            images: vec!["a.png".into(), "b.png".into()],
            location,
            seller: SellerProfile::from_join(owner, None, None, None),
            created_at: Utc::now(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn accepts_numbers_and_numeric_strings() {
        let listings = vec![
            listing_at(Location::new(37.43, -122.17)),
            listing_at(Location {
                lat: Coordinate::Text("37.5".into()),
                lng: Coordinate::Text(" -122.2 ".into()),
            }),
        ];
        let pins = pins(&listings);
        assert_eq!(pins.len(), 2);
        assert_eq!((pins[1].lat, pins[1].lng), (37.5, -122.2));
        assert_eq!(pins[0].image.as_deref(), Some("a.png"));
    }

    #[test]
    fn drops_unusable_locations() {
        let listings = vec![
            listing_at(Location {
                lat: Coordinate::Text("north".into()),
                lng: Coordinate::Number(0.0),
            }),
            listing_at(Location::new(91.0, 0.0)),
            listing_at(Location::new(f64::NAN, 0.0)),
        ];
        assert!(pins(&listings).is_empty());
    }
}
