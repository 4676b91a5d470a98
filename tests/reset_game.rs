#![allow(non_snake_case)]

use std::sync::{
    Arc,
    atomic::Ordering,
};

use mystic_forest::{
    client::{
        AppController,
        GameOp,
    },
    story_client::GameState,
    test_helpers::{
        OfflineFetcher,
        ScriptedBackend,
        fast_policy,
        server_error,
        story_state,
    },
    wallets::NoProvider,
};
use tokio::sync::mpsc;

fn controller_with(backend: Arc<ScriptedBackend>) -> AppController {
    let (tx, _rx) = mpsc::unbounded_channel();
    AppController::from_parts(
        backend,
        Arc::new(NoProvider),
        Arc::new(OfflineFetcher::new()),
        tx,
    )
    .with_retry_policy(fast_policy())
}

fn unusable_state() -> GameState {
    GameState {
        situation: String::new(),
        score: 0,
        choices: Vec::new(),
        is_end: false,
        ending_category: None,
        image_url: None,
        manga_image_url: None,
        summary_image_url: None,
    }
}

#[tokio::test]
async fn reset_game__renders_the_fresh_state() {
    // given
    let backend = Arc::new(ScriptedBackend::new());
    let mut start = story_state();
    start.situation = "You wake at the forest edge once more.".into();
    start.score = 0;
    backend.queue_reset(Ok(start));
    let mut controller = controller_with(backend.clone());
    controller.update_game_state().await;

    // when
    controller.reset_game().await;

    // then
    assert_eq!(backend.reset_calls.load(Ordering::SeqCst), 1);
    let screen = controller.snapshot().screen.unwrap();
    assert_eq!(screen.situation, "You wake at the forest edge once more.");
    assert_eq!(screen.score, 0);
}

#[tokio::test]
async fn reset_game__unusable_response_falls_back_to_explicit_fetch() {
    // given a reset whose reply carries nothing usable
    let backend = Arc::new(ScriptedBackend::new());
    backend.queue_reset(Ok(unusable_state()));
    backend.queue_fetch(Ok(story_state()));
    let mut controller = controller_with(backend.clone());

    // when
    controller.reset_game().await;

    // then the state was fetched explicitly instead
    assert_eq!(backend.reset_calls.load(Ordering::SeqCst), 1);
    assert_eq!(backend.fetch_calls.load(Ordering::SeqCst), 1);
    let snapshot = controller.snapshot();
    assert!(snapshot.screen.is_some());
    assert!(snapshot.busy.is_none());
}

#[tokio::test]
async fn reset_game__exhausted_retries_surface_manual_recovery() {
    let backend = Arc::new(ScriptedBackend::new());
    for _ in 0..3 {
        backend.queue_reset(Err(server_error()));
    }
    let mut controller = controller_with(backend.clone());

    controller.reset_game().await;

    assert_eq!(backend.reset_calls.load(Ordering::SeqCst), 3);
    let snapshot = controller.snapshot();
    let failure = snapshot.failure.expect("terminal failure expected");
    assert_eq!(failure.op, GameOp::Reset);
    assert!(snapshot.busy.is_none());
}

#[tokio::test]
async fn reload__starts_over_from_the_initial_fetch() {
    // given a rendered state and a stale failure
    let backend = Arc::new(ScriptedBackend::new());
    let mut controller = controller_with(backend.clone());
    controller.update_game_state().await;

    // when
    controller.reload().await;

    // then everything client-side was rebuilt from a fresh fetch
    assert_eq!(backend.fetch_calls.load(Ordering::SeqCst), 2);
    let snapshot = controller.snapshot();
    assert!(snapshot.screen.is_some());
    assert!(snapshot.failure.is_none());
    assert_eq!(snapshot.selected_choice, 0);
}
