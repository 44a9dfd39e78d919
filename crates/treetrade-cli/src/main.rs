mod commands;

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, bail};
use chrono::{DateTime, Local, Utc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use treetrade_client::inbox::{InboxState, InboxView};
use treetrade_client::lifecycle::listing_remaining;
use treetrade_client::live::Inbox;
use treetrade_client::upload::guess_content_type;
use treetrade_client::{AdminStore, ClientConfig, LocalBackend, Marketplace, Session};
use treetrade_types::models::{DEFAULT_AVATAR, Listing, ListingDraft, Profile};

use commands::{Command, HELP};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the prompt output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "treetrade=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ClientConfig::from_env()?;
    let backend = LocalBackend::open(&config).await?;

    let profile = identity_from_env()?;
    backend.sign_in(&profile).await?;
    let session = Session::for_backend(&backend, AdminStore::file(&config.state_path));

    let mut market = Marketplace::new(backend, session, config.poll_interval);
    if let Err(e) = market.sync_role().await {
        warn!("Could not check the admin role: {}", e);
    }
    market.refresh().await;
    info!("TreeTrade ready for @{}", profile.username);

    println!("Signed in as {} (@{}). Type 'help' for commands.", profile.name, profile.username);
    if market.session().is_admin() {
        println!("Admin mode is on.");
    }

    Repl::new(market).run().await
}

fn identity_from_env() -> anyhow::Result<Profile> {
    let id = match std::env::var("TREETRADE_USER_ID") {
        Ok(raw) => raw.parse().context("TREETRADE_USER_ID must be a UUID")?,
        Err(_) => {
            let id = Uuid::new_v4();
            warn!("TREETRADE_USER_ID not set; using a one-off identity {}", id);
            id
        }
    };
    let username = std::env::var("TREETRADE_USERNAME")
        .or_else(|_| std::env::var("USER"))
        .unwrap_or_else(|_| "student".into());
    let name = std::env::var("TREETRADE_NAME").unwrap_or_else(|_| username.clone());
    let avatar = std::env::var("TREETRADE_AVATAR").unwrap_or_else(|_| DEFAULT_AVATAR.into());

    Ok(Profile {
        id,
        name,
        username,
        avatar,
        is_admin: false,
    })
}

struct Repl {
    market: Marketplace<LocalBackend>,
    inbox: Option<Inbox<LocalBackend>>,
    /// Listing ids in the order of the last `list`
    shown: Vec<Uuid>,
    /// Image URLs waiting for the next post or edit
    pending_images: Option<Vec<String>>,
    thread: Option<Uuid>,
    printed: HashSet<Uuid>,
    seen_activity: Option<DateTime<Utc>>,
}

impl Repl {
    fn new(market: Marketplace<LocalBackend>) -> Self {
        Self {
            market,
            inbox: None,
            shown: Vec::new(),
            pending_images: None,
            thread: None,
            printed: HashSet::new(),
            seen_activity: None,
        }
    }

    async fn run(mut self) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let mut updates = self.inbox.as_ref().map(Inbox::watch);

            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    match commands::parse(&line) {
                        Ok(None) => {}
                        Ok(Some(Command::Quit)) => break,
                        Ok(Some(command)) => {
                            if let Err(e) = self.execute(command).await {
                                println!("! {}", e);
                            }
                            self.render_inbox();
                        }
                        Err(msg) => println!("! {}", msg),
                    }
                }
                Some(()) = inbox_changed(&mut updates) => self.render_inbox(),
            }
        }

        if let Some(inbox) = self.inbox.take() {
            inbox.close();
        }
        println!("Bye.");
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> anyhow::Result<()> {
        match command {
            Command::List(query) => {
                self.market.refresh().await;
                let now = Utc::now();
                let results = self.market.listings().search(query.as_deref().unwrap_or(""));
                self.shown = results.iter().map(|l| l.id).collect();

                if results.is_empty() {
                    println!("No listings found.");
                }
                for (i, listing) in results.iter().enumerate() {
                    println!(
                        "{:>3}. {} - ${} · {} · {} · @{} · {} left",
                        i + 1,
                        listing.title,
                        listing.price,
                        listing.category,
                        listing.condition,
                        listing.seller.username,
                        listing_remaining(listing, now),
                    );
                }
                println!("{} on the map.", self.market.pins().len());
            }
            Command::Show(n) => {
                let listing = self.listing_at(n)?;
                print_listing(listing);
                if self.market.session().can_manage(listing) {
                    println!("    (you can edit or delete this listing)");
                }
            }
            Command::Post(mut draft) => {
                if let Some(images) = self.pending_images.take() {
                    draft.images = images;
                }
                let listing = self.market.post_listing(draft).await?;
                println!("Posted '{}', expires in {}.", listing.title, listing_remaining(&listing, Utc::now()));
            }
            Command::Edit(n, fields) => {
                let existing = self.listing_at(n)?.clone();
                let draft = self.edited_draft(&existing, &fields)?;
                self.market.edit_listing(existing.id, draft).await?;
                println!("Updated '{}'.", existing.title);
            }
            Command::Delete(n) => {
                let listing = self.listing_at(n)?.clone();
                self.market.delete_listing(listing.id).await?;
                println!("Deleted '{}'.", listing.title);
            }
            Command::Upload(path) => {
                let url = self.upload(&path).await?;
                println!("Image attached: {}", url);
            }
            Command::Message(n) => {
                let listing_id = self.listing_at(n)?.id;
                let inbox = self.market.message_seller(listing_id).await?;
                self.set_inbox(inbox);
            }
            Command::Inbox => {
                let inbox = self.market.open_inbox().await?;
                self.set_inbox(inbox);
                self.print_conversations();
            }
            Command::Open(n) => {
                let inbox = self.require_inbox()?;
                let snapshot = inbox.snapshot();
                let Some(conversation) = snapshot.conversations.get(n) else {
                    bail!("no conversation {}", n + 1);
                };
                inbox.select(conversation.id).await;
            }
            Command::Send(text) => {
                let inbox = self.require_inbox()?;
                match inbox.send_text(text).await {
                    Ok(Some(_)) => {}
                    Ok(None) => println!("(nothing to send)"),
                    Err(e) => {
                        println!("! failed to send: {}", e);
                        println!("  draft kept: {}", inbox.snapshot().composer);
                    }
                }
            }
            Command::Back => {
                self.require_inbox()?.back();
            }
            Command::Admin(key) => {
                self.market.enter_admin(&key).await?;
                println!("Admin mode on.");
            }
            Command::Unadmin => {
                self.market.exit_admin().await?;
                println!("Admin mode off.");
            }
            Command::SignOut => {
                if let Some(inbox) = self.inbox.take() {
                    inbox.close();
                }
                self.market.sign_out().await?;
                println!("Signed out.");
            }
            Command::Help => println!("{}", HELP),
            Command::Quit => {}
        }
        Ok(())
    }

    fn listing_at(&self, n: usize) -> anyhow::Result<&Listing> {
        self.shown
            .get(n)
            .and_then(|id| self.market.listings().get(*id))
            .with_context(|| format!("no listing {}; run 'list' first", n + 1))
    }

    fn edited_draft(&mut self, existing: &Listing, fields: &str) -> anyhow::Result<ListingDraft> {
        let mut draft = existing.to_draft();
        commands::apply_fields(&mut draft, fields).map_err(anyhow::Error::msg)?;
        if let Some(images) = self.pending_images.take() {
            draft.images = images;
        }
        Ok(draft)
    }

    async fn upload(&mut self, path: &Path) -> anyhow::Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image");

        let mut draft = ListingDraft::default();
        let url = self
            .market
            .attach_image(file_name, guess_content_type(file_name), bytes, &mut draft)
            .await?;
        self.pending_images = Some(draft.images);
        Ok(url)
    }

    fn require_inbox(&self) -> anyhow::Result<&Inbox<LocalBackend>> {
        self.inbox.as_ref().context("open the inbox first")
    }

    fn set_inbox(&mut self, inbox: Inbox<LocalBackend>) {
        if let Some(previous) = self.inbox.replace(inbox) {
            previous.close();
        }
        self.thread = None;
        self.printed.clear();
        self.seen_activity = None;
    }

    fn print_conversations(&mut self) {
        let Some(inbox) = &self.inbox else {
            return;
        };
        let state = inbox.snapshot();
        if state.conversations.is_empty() {
            println!("No conversations yet.");
        }
        for (i, conversation) in state.conversations.iter().enumerate() {
            let other = conversation.counterpart(state.user_id);
            let preview = conversation
                .last_message
                .as_ref()
                .map(|m| m.content.as_str())
                .unwrap_or("(no messages yet)");
            println!(
                "{:>3}. @{} about '{}': {}",
                i + 1,
                other.username,
                conversation.listing.title,
                preview
            );
        }
        self.seen_activity = latest_activity(&state);
    }

    /// Print whatever changed in the inbox since the last render.
    fn render_inbox(&mut self) {
        let Some(inbox) = &self.inbox else {
            return;
        };
        let state = inbox.snapshot();

        match state.view {
            InboxView::Thread(conversation_id) => {
                if self.thread != Some(conversation_id) {
                    self.thread = Some(conversation_id);
                    self.printed.clear();
                    match state.selected() {
                        Some(c) => println!(
                            "-- @{} about '{}' --",
                            c.counterpart(state.user_id).username,
                            c.listing.title
                        ),
                        None => println!("-- conversation {} --", conversation_id),
                    }
                }
                for message in state.transcript.messages() {
                    if !self.printed.insert(message.id) {
                        continue;
                    }
                    let who = if message.sender_id == state.user_id {
                        "you".to_string()
                    } else {
                        state
                            .selected()
                            .map(|c| format!("@{}", c.counterpart(state.user_id).username))
                            .unwrap_or_else(|| "them".to_string())
                    };
                    let at: DateTime<Local> = message.created_at.into();
                    println!("[{}] {}: {}", at.format("%H:%M"), who, message.content);
                }
            }
            InboxView::List => {
                if self.thread.take().is_some() {
                    self.printed.clear();
                    self.print_conversations();
                    return;
                }
                let latest = latest_activity(&state);
                if latest > self.seen_activity {
                    if self.seen_activity.is_some() {
                        println!("(new activity in your inbox)");
                    }
                    self.seen_activity = latest;
                }
            }
        }
    }
}

fn latest_activity(state: &InboxState) -> Option<DateTime<Utc>> {
    state.conversations.iter().map(|c| c.updated_at).max()
}

async fn inbox_changed(updates: &mut Option<watch::Receiver<InboxState>>) -> Option<()> {
    match updates {
        Some(rx) => rx.changed().await.ok(),
        None => std::future::pending().await,
    }
}

fn print_listing(listing: &Listing) {
    println!("{} - ${}", listing.title, listing.price);
    println!("    {} · {}", listing.category, listing.condition);
    println!("    {}", listing.description);
    println!("    seller: {} (@{})", listing.seller.name, listing.seller.username);
    match listing.location.resolve() {
        Some((lat, lng)) => println!("    location: {:.4}, {:.4}", lat, lng),
        None => println!("    location: unknown"),
    }
    if let Some(image) = listing.primary_image() {
        println!("    image: {}", image);
    }
    println!("    expires in {}", listing_remaining(listing, Utc::now()));
}
