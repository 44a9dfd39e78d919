#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use treetrade_client::inbox::InboxState;
use treetrade_client::{AdminStore, ClientConfig, LocalBackend, Marketplace, Session};
use treetrade_types::models::{Condition, ListingDraft, Location, Profile};

pub const ADMIN_KEY: &str = "campus-moderators-only";
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const WAIT: Duration = Duration::from_secs(5);

pub fn temp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-{}", prefix, Uuid::new_v4()))
}

/// Fresh in-memory backend with a temp bucket and an admin key configured.
pub async fn backend() -> LocalBackend {
    let config = ClientConfig {
        db_path: None,
        bucket_dir: temp_dir("treetrade-test-bucket"),
        admin_key: Some(ADMIN_KEY.to_string()),
        poll_interval: POLL_INTERVAL,
        ..ClientConfig::default()
    };
    LocalBackend::open(&config).await.unwrap()
}

pub fn profile(username: &str) -> Profile {
    Profile {
        id: Uuid::new_v4(),
        name: format!("{} Tree", username),
        username: username.to_string(),
        avatar: format!("https://avatars.example/{}.png", username),
        is_admin: false,
    }
}

/// A signed-in handle onto `base` for a new user.
pub async fn user(base: &LocalBackend, username: &str) -> (LocalBackend, Profile) {
    let handle = base.new_session();
    let profile = profile(username);
    handle.sign_in(&profile).await.unwrap();
    (handle, profile)
}

pub async fn marketplace(base: &LocalBackend, username: &str) -> (Marketplace<LocalBackend>, Profile) {
    let (handle, profile) = user(base, username).await;
    let session = Session::new(Some(profile.id), AdminStore::memory());
    (Marketplace::new(handle, session, POLL_INTERVAL), profile)
}

pub fn lamp_draft() -> ListingDraft {
    ListingDraft {
        title: "Desk Lamp".into(),
        description: "Adjustable, warm white bulb included".into(),
        price: "15".into(),
        category: "Electronics".into(),
        condition: Condition::Good,
        images: vec![],
        location: Location::new(37.4275, -122.1697),
    }
}

/// Wait until the inbox state satisfies `pred`.
pub async fn wait_until<F>(rx: &mut watch::Receiver<InboxState>, pred: F) -> InboxState
where
    F: FnMut(&InboxState) -> bool,
{
    let state = tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("timed out waiting for inbox state")
        .expect("inbox state channel closed");
    state.clone()
}
