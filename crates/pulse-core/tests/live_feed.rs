//! End-to-end feed flow: multiple screens over one gateway, events
//! propagating through live channels.

use std::sync::Arc;
use std::time::Duration;

use pulse_core::channels::ChannelManager;
use pulse_core::gateway::memory::MemoryGateway;
use pulse_core::gateway::FeedStore;
use pulse_core::screens::{ComposeScreen, FeedScreen, ScreenContext};
use pulse_core::session::SessionManager;
use pulse_core::types::NewPost;

async fn client(gw: Arc<MemoryGateway>, email: &str, password: &str) -> ScreenContext {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let session = Arc::new(SessionManager::new(gw.clone(), gw.clone()));
    session.start().await.unwrap();
    session.sign_in(email, password).await.unwrap();
    ScreenContext::new(gw, session, Arc::new(ChannelManager::new()))
}

async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_post_reaches_other_client_feed() {
    let gw = Arc::new(MemoryGateway::new());
    gw.seed_user("ada@example.com", "pw", "ada");
    gw.seed_user("bob@example.com", "pw", "bob");

    let ada = client(gw.clone(), "ada@example.com", "pw").await;
    let bob = client(gw.clone(), "bob@example.com", "pw").await;

    let ada_feed = FeedScreen::new(ada.clone());
    let bob_feed = FeedScreen::new(bob.clone());
    ada_feed.mount().await.unwrap();
    bob_feed.mount().await.unwrap();

    let composer = ComposeScreen::new(ada);
    let post = composer.submit("hello from ada", None).await.unwrap();

    wait_for(|| bob_feed.posts().iter().any(|p| p.id == post.id)).await;
    wait_for(|| ada_feed.posts().iter().any(|p| p.id == post.id)).await;
}

#[tokio::test]
async fn test_feed_is_newest_first() {
    let gw = Arc::new(MemoryGateway::new());
    gw.seed_user("ada@example.com", "pw", "ada");
    let ada = client(gw.clone(), "ada@example.com", "pw").await;
    let user = ada.session.current_user().unwrap();

    for content in ["first", "second", "third"] {
        gw.create_post(NewPost {
            author_id: user,
            content: content.to_string(),
            image_url: None,
        })
        .await
        .unwrap();
    }

    let feed = FeedScreen::new(ada);
    feed.mount().await.unwrap();
    let contents: Vec<String> = feed.posts().iter().map(|p| p.content.clone()).collect();
    assert_eq!(contents, vec!["third", "second", "first"]);
}

#[tokio::test]
async fn test_delete_propagates_to_other_feeds() {
    let gw = Arc::new(MemoryGateway::new());
    gw.seed_user("ada@example.com", "pw", "ada");
    gw.seed_user("bob@example.com", "pw", "bob");

    let ada = client(gw.clone(), "ada@example.com", "pw").await;
    let bob = client(gw.clone(), "bob@example.com", "pw").await;

    let ada_feed = FeedScreen::new(ada.clone());
    let bob_feed = FeedScreen::new(bob);
    ada_feed.mount().await.unwrap();
    bob_feed.mount().await.unwrap();

    let post = ComposeScreen::new(ada)
        .submit("soon gone", None)
        .await
        .unwrap();
    wait_for(|| bob_feed.posts().len() == 1).await;

    ada_feed.delete_post(post.id).await.unwrap();
    wait_for(|| bob_feed.posts().is_empty()).await;
    wait_for(|| ada_feed.posts().is_empty()).await;
}

#[tokio::test]
async fn test_like_count_propagates_as_update() {
    let gw = Arc::new(MemoryGateway::new());
    gw.seed_user("ada@example.com", "pw", "ada");
    gw.seed_user("bob@example.com", "pw", "bob");

    let ada = client(gw.clone(), "ada@example.com", "pw").await;
    let bob = client(gw.clone(), "bob@example.com", "pw").await;

    let ada_feed = FeedScreen::new(ada.clone());
    ada_feed.mount().await.unwrap();
    let post = ComposeScreen::new(ada).submit("like me", None).await.unwrap();
    wait_for(|| ada_feed.posts().len() == 1).await;

    let bob_feed = FeedScreen::new(bob);
    bob_feed.mount().await.unwrap();
    wait_for(|| bob_feed.posts().len() == 1).await;
    bob_feed.toggle_like(post.id).await;

    // Ada never touched the like; her copy updates through the channel.
    wait_for(|| ada_feed.posts().first().map_or(false, |p| p.like_count == 1)).await;
    assert!(!ada_feed.is_liked(post.id));
    assert!(bob_feed.is_liked(post.id));
}

#[tokio::test]
async fn test_lapse_recovers_missed_posts() {
    let gw = Arc::new(MemoryGateway::new());
    gw.seed_user("ada@example.com", "pw", "ada");
    let ada = client(gw.clone(), "ada@example.com", "pw").await;
    let user = ada.session.current_user().unwrap();

    let feed = FeedScreen::new(ada.clone());
    feed.mount().await.unwrap();

    // Simulate a disconnect window: the subscription lapses and a post
    // created before resync completes must still surface.
    gw.create_post(NewPost {
        author_id: user,
        content: "during outage".to_string(),
        image_url: None,
    })
    .await
    .unwrap();
    gw.lapse_subscriptions();

    wait_for(|| feed.posts().iter().any(|p| p.content == "during outage")).await;
}
