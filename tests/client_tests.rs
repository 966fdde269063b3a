use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::timeout;

use realtime_chat::api::{create_router, AppState, RateLimiter};
use realtime_chat::client::{
    ActionOutcome, ChatApi, ChatStore, ChatView, ClientError, FetchOutcome, Frame, HttpChatApi,
    NewMessage, RowBody,
};
use realtime_chat::config::Config;
use realtime_chat::db::{self, User};
use realtime_chat::live::{LiveEvent, LiveHub};

async fn start_server() -> (String, oneshot::Sender<()>) {
    let config = Arc::new(Config::for_testing());
    let pool = db::connect(&config).await.expect("connect db");
    let limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute, 60));
    let state = AppState {
        db: pool,
        config,
        hub: LiveHub::new(),
    };
    let app = create_router(state, limiter);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind server");
    let addr = listener.local_addr().expect("server addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
    tokio::spawn(async move {
        let _ = server.await;
    });

    (format!("http://{}", addr), shutdown_tx)
}

async fn session(base: &str, name: &str, email: &str) -> (Arc<HttpChatApi>, User) {
    let api = HttpChatApi::new(base).expect("client");
    let user = api.signup(name, email, "secret123").await.expect("signup");
    assert!(api.has_session());
    (Arc::new(api), user)
}

async fn wait_for<F: FnMut() -> bool>(mut condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_auth_round_trip() {
    let (base, _shutdown) = start_server().await;
    let (api, ada) = session(&base, "Ada", "ada@example.com").await;

    assert_eq!(api.check().await.unwrap().id, ada.id);

    let updated = api.update_profile("https://img.example/ada.png").await.unwrap();
    assert_eq!(updated.profile_pic, "https://img.example/ada.png");

    api.logout().await.unwrap();
    let err = api.check().await.unwrap_err();
    assert_eq!(err.status(), Some(401));

    let again = api.login("ada@example.com", "secret123").await.unwrap();
    assert_eq!(again.id, ada.id);

    let bad = api.login("ada@example.com", "wrong-password").await.unwrap_err();
    assert!(matches!(bad, ClientError::Status { status: 400, ref message } if message == "Invalid credentials"));
}

#[tokio::test]
async fn test_store_loads_and_sends() {
    let (base, _shutdown) = start_server().await;
    let (ada_api, ada) = session(&base, "Ada", "ada@example.com").await;
    let (bob_api, bob) = session(&base, "Bob", "bob@example.com").await;

    bob_api
        .send_message(&ada.id, &NewMessage { text: Some("hi ada".into()), image: None })
        .await
        .unwrap();

    let store = ChatStore::new(ada_api.clone());
    let users = store.get_users().await.unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, bob.id);

    store.select_user(Some(bob.clone()));
    assert_eq!(store.get_messages(&bob.id).await.unwrap(), FetchOutcome::Loaded(1));

    let sent = store
        .send_message(NewMessage { text: Some("hello bob".into()), image: None })
        .await
        .unwrap();
    let texts: Vec<_> = store.messages().into_iter().filter_map(|m| m.text).collect();
    assert_eq!(texts, vec!["hi ada", "hello bob"]);

    assert_eq!(sent.sender_id, ada.id);
    let history = bob_api.get_messages(&ada.id).await.unwrap();
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_live_feed_delivers_to_both_participants() {
    let (base, _shutdown) = start_server().await;
    let (ada_api, ada) = session(&base, "Ada", "ada@example.com").await;
    let (bob_api, bob) = session(&base, "Bob", "bob@example.com").await;
    let (carol_api, _) = session(&base, "Carol", "carol@example.com").await;

    let mut bob_feed = bob_api.live_feed().await.unwrap();
    let mut carol_feed = carol_api.live_feed().await.unwrap();

    let sent = ada_api
        .send_message(&bob.id, &NewMessage { text: Some("ping".into()), image: None })
        .await
        .unwrap();

    let received = timeout(Duration::from_secs(5), async {
        loop {
            match bob_feed.recv().await {
                Some(LiveEvent::NewMessage { message }) => break message,
                Some(_) => continue,
                None => panic!("feed closed"),
            }
        }
    })
    .await
    .expect("live message");
    assert_eq!(received, sent);
    assert_eq!(received.sender_id, ada.id);

    // Carol only ever sees roster updates
    let carol_saw_message = timeout(Duration::from_millis(200), async {
        while let Some(event) = carol_feed.recv().await {
            if event.message().is_some() {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(!carol_saw_message);
}

#[tokio::test]
async fn test_live_feed_requires_session() {
    let (base, _shutdown) = start_server().await;
    let anonymous = HttpChatApi::new(&base).unwrap();
    assert!(anonymous.live_feed().await.is_err());
}

#[tokio::test]
async fn test_view_edit_and_delete_against_server() {
    let (base, _shutdown) = start_server().await;
    let (ada_api, ada) = session(&base, "Ada", "ada@example.com").await;
    let (bob_api, bob) = session(&base, "Bob", "bob@example.com").await;

    let mut view = ChatView::new(ChatStore::new(ada_api.clone()), ada.clone());
    view.select_peer(bob.clone()).await.unwrap();
    assert!(matches!(view.render(), Frame::Ready { ref rows, .. } if rows.is_empty()));

    assert_eq!(view.send("first draft", None).await, ActionOutcome::Applied);
    let id = view.store().messages()[0].id.clone();

    assert_eq!(view.begin_edit(&id), ActionOutcome::Applied);
    view.set_draft("final text");
    assert_eq!(view.save_edit().await, ActionOutcome::Applied);

    let seen_by_bob = bob_api.get_messages(&ada.id).await.unwrap();
    assert_eq!(seen_by_bob[0].text.as_deref(), Some("final text"));
    assert!(seen_by_bob[0].edited);

    assert_eq!(view.delete(&id).await, ActionOutcome::Applied);
    assert_eq!(view.delete(&id).await, ActionOutcome::Applied);
    let Frame::Ready { rows, .. } = view.render() else {
        panic!("expected ready frame");
    };
    assert_eq!(rows[0].body, RowBody::Deleted);
    assert!(!rows[0].controls);

    let seen_by_bob = bob_api.get_messages(&ada.id).await.unwrap();
    assert!(seen_by_bob[0].deleted);
}

#[tokio::test]
async fn test_view_receives_peer_messages_live() {
    let (base, _shutdown) = start_server().await;
    let (ada_api, ada) = session(&base, "Ada", "ada@example.com").await;
    let (bob_api, bob) = session(&base, "Bob", "bob@example.com").await;

    let mut view = ChatView::new(ChatStore::new(ada_api.clone()), ada.clone());
    view.select_peer(bob.clone()).await.unwrap();
    let store = view.store().clone();
    assert!(wait_for(|| store.is_online(&ada.id)).await);

    bob_api
        .send_message(&ada.id, &NewMessage { text: Some("are you there?".into()), image: None })
        .await
        .unwrap();

    assert!(wait_for(|| store.messages().len() == 1).await);
    let scroll = view.take_scroll_request().expect("scroll to new message");
    assert_eq!(scroll.message_id, store.messages()[0].id);

    view.unmount();
    assert!(!store.is_subscribed());
}
