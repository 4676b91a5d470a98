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
    render::Body,
    test_helpers::{
        CooperativeWallet,
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

#[tokio::test]
async fn fetch_state__renders_one_control_per_choice_in_served_order() {
    // given
    let backend = Arc::new(ScriptedBackend::new());
    backend.queue_fetch(Ok(story_state()));
    let mut controller = controller_with(backend.clone());

    // when
    controller.update_game_state().await;

    // then
    let snapshot = controller.snapshot();
    let screen = snapshot.screen.expect("state should have rendered");
    let Body::Story { choices } = screen.body else {
        panic!("expected story body");
    };
    let served = story_state();
    assert_eq!(choices.len(), served.choices.len());
    for (position, control) in choices.iter().enumerate() {
        assert_eq!(control.index, position);
        assert_eq!(control.label, served.choices[position].text);
    }
    assert_eq!(screen.reset_label, "Reset Game");
    assert!(snapshot.busy.is_none());
}

#[tokio::test]
async fn fetch_state__succeeds_on_third_attempt_after_two_500s() {
    // given a server that is down for exactly two requests
    let backend = Arc::new(ScriptedBackend::new());
    backend.queue_fetch(Err(server_error()));
    backend.queue_fetch(Err(server_error()));
    backend.queue_fetch(Ok(story_state()));
    let mut controller = controller_with(backend.clone());

    // when
    controller.update_game_state().await;

    // then
    assert_eq!(backend.fetch_calls.load(Ordering::SeqCst), 3);
    let snapshot = controller.snapshot();
    assert!(snapshot.screen.is_some());
    assert!(snapshot.failure.is_none());
}

#[tokio::test]
async fn fetch_state__exhausted_retries_surface_manual_recovery() {
    // given a server that never comes back
    let backend = Arc::new(ScriptedBackend::new());
    for _ in 0..3 {
        backend.queue_fetch(Err(server_error()));
    }
    let mut controller = controller_with(backend.clone());

    // when
    controller.update_game_state().await;

    // then exactly max_attempts requests went out and the failure is manual
    assert_eq!(backend.fetch_calls.load(Ordering::SeqCst), 3);
    let snapshot = controller.snapshot();
    let failure = snapshot.failure.expect("terminal failure expected");
    assert_eq!(failure.op, GameOp::FetchState);
    assert!(failure.message.contains("Error loading game state"));
    assert!(snapshot.busy.is_none(), "busy indicator must clear on failure");
    assert!(snapshot.screen.is_none());
}

#[tokio::test]
async fn fetch_state__retry_control_runs_the_fetch_again() {
    // given a terminal failure on screen
    let backend = Arc::new(ScriptedBackend::new());
    for _ in 0..3 {
        backend.queue_fetch(Err(server_error()));
    }
    backend.queue_fetch(Ok(story_state()));
    let mut controller = controller_with(backend.clone());
    controller.update_game_state().await;
    assert!(controller.snapshot().failure.is_some());

    // when the player picks the manual retry control
    controller.retry_failed().await;

    // then the fetch ran again and rendered
    assert_eq!(backend.fetch_calls.load(Ordering::SeqCst), 4);
    let snapshot = controller.snapshot();
    assert!(snapshot.failure.is_none());
    assert!(snapshot.screen.is_some());
}

#[tokio::test]
async fn fetch_state__new_cycle_supersedes_previous_render() {
    // given a rendered story state
    let backend = Arc::new(ScriptedBackend::new());
    backend.queue_fetch(Ok(story_state()));
    let mut controller = controller_with(backend.clone());
    controller.update_game_state().await;
    controller.select_next_choice();
    assert_eq!(controller.snapshot().selected_choice, 1);

    // when another fetch lands
    let mut next = story_state();
    next.situation = "Deeper among the trees.".into();
    next.choices.truncate(2);
    backend.queue_fetch(Ok(next));
    controller.update_game_state().await;

    // then the old transient selection is gone with the old screen
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.selected_choice, 0);
    let screen = snapshot.screen.unwrap();
    assert_eq!(screen.situation, "Deeper among the trees.");
    let Body::Story { choices } = screen.body else {
        panic!("expected story body");
    };
    assert_eq!(choices.len(), 2);
}

#[tokio::test]
async fn fetch_state__startup_probe_connects_exposed_wallet() {
    // given a wallet that already exposes an account
    let backend = Arc::new(ScriptedBackend::new());
    let wallet = Arc::new(CooperativeWallet::new());
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut controller = AppController::from_parts(
        backend,
        wallet.clone(),
        Arc::new(OfflineFetcher::new()),
        tx,
    )
    .with_retry_policy(fast_policy());

    // when
    controller.startup_wallet_probe().await;

    // then the connection value object carries address and balance
    let snapshot = controller.snapshot();
    assert!(snapshot.wallet.connected());
    assert_eq!(snapshot.wallet.balance, Some(1.0));
}
