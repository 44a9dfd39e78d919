mod common;

use std::time::Duration;

use uuid::Uuid;

use treetrade_client::inbox::InboxView;
use treetrade_client::live::Inbox;
use treetrade_client::messaging::ConversationGateway;
use treetrade_client::{AdminStore, Backend, ClientConfig, ClientError, ErrorKind, LocalBackend, Session};
use treetrade_types::api::NewMessage;

use common::{POLL_INTERVAL, lamp_draft, marketplace, wait_until};

#[tokio::test]
async fn buyer_message_reaches_seller_thread() {
    let base = common::backend().await;
    let (mut seller, seller_profile) = marketplace(&base, "sam").await;
    let (mut buyer, buyer_profile) = marketplace(&base, "bea").await;
    let lamp = seller.post_listing(lamp_draft()).await.unwrap();
    buyer.refresh().await;

    // "Message seller" creates the conversation and opens it.
    let buyer_inbox = buyer.message_seller(lamp.id).await.unwrap();
    let mut buyer_rx = buyer_inbox.watch();
    let state = wait_until(&mut buyer_rx, |s| matches!(s.view, InboxView::Thread(_))).await;
    let conversation = state.selected().unwrap().clone();
    assert_eq!(conversation.listing_id, lamp.id);
    assert_eq!(conversation.buyer_id, buyer_profile.id);
    assert_eq!(conversation.seller_id, seller_profile.id);
    assert_eq!(conversation.listing.title, "Desk Lamp");
    assert_eq!(conversation.counterpart(buyer_profile.id).username, "sam");

    let sent = buyer_inbox.send_text("Is this available?").await.unwrap().unwrap();
    assert_eq!(sent.content, "Is this available?");
    assert!(buyer_inbox.snapshot().composer.is_empty());
    assert_eq!(buyer_inbox.snapshot().transcript.len(), 1);

    // Exactly one stored row.
    let stored = seller.backend().fetch_messages(conversation.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].sender_id, buyer_profile.id);

    let seller_inbox = seller.open_inbox().await.unwrap();
    let mut seller_rx = seller_inbox.watch();
    let state = wait_until(&mut seller_rx, |s| s.conversations.len() == 1).await;
    let last = state.conversations[0].last_message.as_ref().unwrap();
    assert_eq!(last.content, "Is this available?");

    seller_inbox.select(conversation.id).await;
    let state = wait_until(&mut seller_rx, |s| s.transcript.len() == 1).await;
    assert_eq!(state.transcript.messages().next().unwrap().id, sent.id);

    // A reply shows up on the buyer's open thread.
    seller_inbox.send_text("Yes, still here").await.unwrap();
    let state = wait_until(&mut buyer_rx, |s| s.transcript.len() == 2).await;
    let contents: Vec<_> = state.transcript.messages().map(|m| m.content.clone()).collect();
    assert_eq!(contents, vec!["Is this available?", "Yes, still here"]);
}

#[tokio::test]
async fn resolving_twice_reuses_the_conversation() {
    let base = common::backend().await;
    let (mut seller, _) = marketplace(&base, "sam").await;
    let (mut buyer, buyer_profile) = marketplace(&base, "bea").await;
    let lamp = seller.post_listing(lamp_draft()).await.unwrap();
    buyer.refresh().await;
    let listing = buyer.listings().get(lamp.id).unwrap().clone();

    let gateway = ConversationGateway::new(buyer.backend().clone());
    let first = gateway
        .resolve_or_create_conversation(buyer.session(), &listing)
        .await
        .unwrap();
    let second = gateway
        .resolve_or_create_conversation(buyer.session(), &listing)
        .await
        .unwrap();
    assert_eq!(first, second);

    // Racing calls land on the same row too.
    let (a, b) = tokio::join!(
        gateway.resolve_or_create_conversation(buyer.session(), &listing),
        gateway.resolve_or_create_conversation(buyer.session(), &listing),
    );
    assert_eq!(a.unwrap(), first);
    assert_eq!(b.unwrap(), first);

    let conversations = gateway.list_conversations(buyer_profile.id).await.unwrap();
    assert_eq!(conversations.len(), 1);
}

#[tokio::test]
async fn messaging_yourself_is_rejected() {
    let base = common::backend().await;
    let (mut seller, seller_profile) = marketplace(&base, "sam").await;
    let lamp = seller.post_listing(lamp_draft()).await.unwrap();

    let err = seller.message_seller(lamp.id).await.err().unwrap();
    assert!(matches!(err, ClientError::SelfMessage));
    assert_eq!(err.kind(), ErrorKind::Precondition);

    let conversations = seller
        .backend()
        .fetch_conversations(seller_profile.id)
        .await
        .unwrap();
    assert!(conversations.is_empty());
}

#[tokio::test]
async fn failed_send_restores_the_composer() {
    let base = common::backend().await;
    let (buyer, _) = marketplace(&base, "bea").await;
    let inbox = buyer.open_inbox().await.unwrap();

    // Nothing open: nothing sent, text stays.
    inbox.set_composer("hello?");
    assert!(inbox.send().await.unwrap().is_none());
    assert_eq!(inbox.snapshot().composer, "hello?");

    // A thread the backend doesn't know about.
    inbox.select(Uuid::new_v4()).await;
    inbox.set_composer("  Is this available?\n");
    let err = inbox.send().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(inbox.snapshot().composer, "  Is this available?\n");
    assert!(inbox.snapshot().transcript.is_empty());

    // Blank input is a no-op and is left alone.
    inbox.set_composer("   ");
    assert!(inbox.send().await.unwrap().is_none());
    assert_eq!(inbox.snapshot().composer, "   ");
}

#[tokio::test]
async fn back_stops_the_thread() {
    let base = common::backend().await;
    let (mut seller, _) = marketplace(&base, "sam").await;
    let (mut buyer, _) = marketplace(&base, "bea").await;
    let lamp = seller.post_listing(lamp_draft()).await.unwrap();
    buyer.refresh().await;

    let buyer_inbox = buyer.message_seller(lamp.id).await.unwrap();
    let mut rx = buyer_inbox.watch();
    let state = wait_until(&mut rx, |s| s.active_conversation().is_some()).await;
    let conversation_id = state.active_conversation().unwrap();

    buyer_inbox.back();
    let state = buyer_inbox.snapshot();
    assert_eq!(state.view, InboxView::List);
    assert!(state.transcript.is_empty());

    // New messages bump the list but no longer land in a transcript.
    let seller_inbox = seller.open_inbox().await.unwrap();
    seller_inbox.select(conversation_id).await;
    seller_inbox.send_text("Still available").await.unwrap();

    let state = wait_until(&mut rx, |s| {
        s.conversations
            .first()
            .and_then(|c| c.last_message.as_ref())
            .is_some_and(|m| m.content == "Still available")
    })
    .await;
    assert!(state.transcript.is_empty());
    tokio::time::sleep(POLL_INTERVAL * 4).await;
    assert!(buyer_inbox.snapshot().transcript.is_empty());

    // The deep link does not fire again on later refreshes.
    buyer_inbox.refresh_conversations().await;
    assert_eq!(buyer_inbox.snapshot().view, InboxView::List);
}

#[tokio::test]
async fn deleting_a_listing_clears_its_conversation() {
    let base = common::backend().await;
    let (mut seller, _) = marketplace(&base, "sam").await;
    let (mut buyer, _) = marketplace(&base, "bea").await;
    let lamp = seller.post_listing(lamp_draft()).await.unwrap();
    buyer.refresh().await;

    let buyer_inbox = buyer.message_seller(lamp.id).await.unwrap();
    let mut rx = buyer_inbox.watch();
    let state = wait_until(&mut rx, |s| s.conversations.len() == 1).await;
    let conversation_id = state.conversations[0].id;
    wait_until(&mut rx, |s| s.active_conversation() == Some(conversation_id)).await;

    seller.delete_listing(lamp.id).await.unwrap();
    let state = wait_until(&mut rx, |s| s.conversations.is_empty()).await;
    assert_eq!(state.view, InboxView::List);
    assert!(state.transcript.is_empty());

    // The thread stays closed once polling would have fired again.
    tokio::time::sleep(POLL_INTERVAL * 6).await;
    assert_eq!(buyer_inbox.snapshot().view, InboxView::List);
}

#[tokio::test]
async fn open_thread_polls_for_messages_without_a_push() {
    // Two backends over one database file: each has its own change stream,
    // like two processes sharing the store.
    let dir = common::temp_dir("treetrade-shared");
    let config = ClientConfig {
        db_path: Some(dir.join("treetrade.db")),
        bucket_dir: dir.join("storage"),
        poll_interval: POLL_INTERVAL,
        ..ClientConfig::default()
    };
    std::fs::create_dir_all(&dir).unwrap();
    let here = LocalBackend::open(&config).await.unwrap();
    let elsewhere = LocalBackend::open(&config).await.unwrap();

    let (mut seller, seller_profile) = marketplace(&here, "sam").await;
    let (mut buyer, _) = marketplace(&here, "bea").await;
    let lamp = seller.post_listing(lamp_draft()).await.unwrap();
    buyer.refresh().await;

    let buyer_inbox = buyer.message_seller(lamp.id).await.unwrap();
    let mut rx = buyer_inbox.watch();
    let state = wait_until(&mut rx, |s| s.active_conversation().is_some()).await;
    let conversation_id = state.active_conversation().unwrap();
    assert!(state.transcript.is_empty());

    // The seller replies through the other backend; no event reaches `here`.
    let remote = elsewhere.new_session();
    remote.sign_in(&seller_profile).await.unwrap();
    let reply = remote
        .insert_message(NewMessage {
            conversation_id,
            sender_id: seller_profile.id,
            content: "Yes, still here".into(),
        })
        .await
        .unwrap();

    let state = wait_until(&mut rx, |s| s.transcript.contains(reply.id)).await;
    assert_eq!(state.transcript.len(), 1);
    assert_eq!(state.transcript.last().unwrap().content, "Yes, still here");

    drop(buyer_inbox);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn inbox_requires_a_user_and_stops_when_closed() {
    let base = common::backend().await;
    let signed_out = Session::new(None, AdminStore::memory());
    let err = Inbox::open(base.clone(), &signed_out, POLL_INTERVAL, None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ClientError::NotSignedIn));

    let (buyer, _) = marketplace(&base, "bea").await;
    let inbox = buyer.open_inbox().await.unwrap();
    let listeners = base.dispatcher().subscriber_count();
    assert!(listeners >= 1);

    inbox.close();
    assert!(inbox.is_closed());
    drop(inbox);
    tokio::time::timeout(Duration::from_secs(5), async {
        while base.dispatcher().subscriber_count() >= listeners {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}
