use std::{
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use chrono::{
    DateTime,
    Utc,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use sha2::{
    Digest,
    Sha256,
};
use tokio::{
    sync::mpsc,
    time,
};
use tracing::{
    error,
    info,
    warn,
};

use crate::{
    images::{
        HttpFetcher,
        ImageFetcher,
        ImageRequest,
        ImageSlots,
        SlotId,
        SlotState,
        SlotUpdate,
    },
    render::{
        self,
        Body,
        Screen,
    },
    retry::{
        self,
        RetryFailure,
        RetryPolicy,
    },
    story_client::{
        GameRecord,
        GameState,
        SaveRecord,
        StoryBackend,
        StoryClient,
    },
    ui,
    wallets::{
        self,
        NetworkOutcome,
        POLKADOT_HUB_TESTNET,
        WalletConnection,
        WalletError,
        WalletProvider,
    },
};

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";

const NOTIFICATION_TTL: Duration = Duration::from_secs(3);
const LOW_BALANCE_THRESHOLD: f64 = 0.1;
const REDRAW_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_url: String,
    pub wallet_rpc_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug)]
struct Notification {
    message: String,
    kind: NotificationKind,
    created: Instant,
}

impl Notification {
    fn expired(&self) -> bool {
        self.created.elapsed() >= NOTIFICATION_TTL
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameOp {
    FetchState,
    SubmitChoice,
    Reset,
}

/// A request that exhausted its retries. Drives the manual recovery controls;
/// nothing retries automatically past this point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedOp {
    pub op: GameOp,
    pub choice_index: Option<usize>,
    pub message: String,
}

/// Immutable view the drawing layer consumes each frame.
#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub screen: Option<Screen>,
    pub failure: Option<FailedOp>,
    pub busy: Option<String>,
    pub wallet: WalletConnection,
    pub wallet_available: bool,
    pub notifications: Vec<(String, NotificationKind)>,
    pub slot_states: Vec<(SlotId, SlotState)>,
    pub share_url: Option<String>,
    pub share_open: bool,
    pub selected_choice: usize,
}

impl AppSnapshot {
    pub fn slot(&self, slot: SlotId) -> Option<&SlotState> {
        self.slot_states
            .iter()
            .find(|(id, _)| *id == slot)
            .map(|(_, state)| state)
    }
}

pub struct AppController {
    backend: Arc<dyn StoryBackend>,
    provider: Arc<dyn WalletProvider>,
    slots: ImageSlots,
    current_state: Option<GameState>,
    screen: Option<Screen>,
    failure: Option<FailedOp>,
    busy: Option<String>,
    wallet: WalletConnection,
    notifications: Vec<Notification>,
    selected_choice: usize,
    share_open: bool,
    share_url: Option<String>,
    retry_policy: RetryPolicy,
}

impl AppController {
    pub fn new(
        config: &AppConfig,
        slot_updates: mpsc::UnboundedSender<SlotUpdate>,
    ) -> Result<Self> {
        let backend = StoryClient::new(config.api_url.clone())
            .wrap_err("failed to set up story backend client")?;
        let provider = wallets::detect_provider(config.wallet_rpc_url.as_deref())?;
        let fetcher: Arc<dyn ImageFetcher> = Arc::new(HttpFetcher::new()?);
        Ok(Self::from_parts(
            Arc::new(backend),
            provider,
            fetcher,
            slot_updates,
        ))
    }

    /// Assembly seam for tests: any backend, provider and fetcher.
    pub fn from_parts(
        backend: Arc<dyn StoryBackend>,
        provider: Arc<dyn WalletProvider>,
        fetcher: Arc<dyn ImageFetcher>,
        slot_updates: mpsc::UnboundedSender<SlotUpdate>,
    ) -> Self {
        AppController {
            backend,
            provider,
            slots: ImageSlots::new(fetcher, slot_updates),
            current_state: None,
            screen: None,
            failure: None,
            busy: None,
            wallet: WalletConnection::default(),
            notifications: Vec::new(),
            selected_choice: 0,
            share_open: false,
            share_url: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Tests swap in millisecond-scale delays here.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn snapshot(&self) -> AppSnapshot {
        let mut slot_states = Vec::new();
        for slot in [SlotId::Story, SlotId::Manga, SlotId::Summary, SlotId::Share] {
            if let Some(state) = self.slots.state(slot) {
                slot_states.push((slot, state.clone()));
            }
        }
        AppSnapshot {
            screen: self.screen.clone(),
            failure: self.failure.clone(),
            busy: self.busy.clone(),
            wallet: self.wallet.clone(),
            wallet_available: self.provider.available(),
            notifications: self
                .notifications
                .iter()
                .map(|n| (n.message.clone(), n.kind))
                .collect(),
            slot_states,
            share_url: self.share_url.clone(),
            share_open: self.share_open,
            selected_choice: self.selected_choice,
        }
    }

    pub fn begin_busy(&mut self, text: impl Into<String>) {
        self.busy = Some(text.into());
    }

    fn end_busy(&mut self) {
        self.busy = None;
    }

    pub fn is_busy(&self) -> bool {
        self.busy.is_some()
    }

    fn notify(&mut self, kind: NotificationKind, message: impl Into<String>) {
        self.notifications.push(Notification {
            message: message.into(),
            kind,
            created: Instant::now(),
        });
    }

    pub fn prune_notifications(&mut self) {
        self.notifications.retain(|n| !n.expired());
    }

    // ------------------------------------------------------------------
    // The three game operations. Same shape throughout: busy indicator on,
    // bounded retries, render on success, manual-recovery failure otherwise,
    // busy indicator off no matter what.
    // ------------------------------------------------------------------

    pub async fn update_game_state(&mut self) {
        self.begin_busy("Loading your adventure");
        let policy = self.retry_policy.clone();
        let outcome = retry::execute(&policy, || self.backend.fetch_state()).await;
        match outcome {
            Ok(state) => self.apply_state(state),
            Err(failure) => self.record_failure(GameOp::FetchState, None, failure),
        }
        self.end_busy();
    }

    pub async fn handle_choice(&mut self, index: usize) {
        info!(index, "submitting choice");
        self.begin_busy("Submitting your choice...");
        let policy = self.retry_policy.clone();
        let outcome =
            retry::execute(&policy, || self.backend.submit_choice(index)).await;
        match outcome {
            Ok(state) => {
                self.apply_state(state);
                // Best-effort side channel; never allowed to disturb the
                // state that just rendered.
                self.save_progress().await;
            }
            Err(failure) => {
                self.record_failure(GameOp::SubmitChoice, Some(index), failure);
            }
        }
        self.end_busy();
    }

    pub async fn reset_game(&mut self) {
        info!("resetting game");
        self.begin_busy("Resetting game...");
        self.close_share();
        let policy = self.retry_policy.clone();
        let outcome = retry::execute(&policy, || self.backend.reset()).await;
        match outcome {
            Ok(state) if state_is_usable(&state) => self.apply_state(state),
            Ok(state) => {
                // Reset acknowledged but the returned state is unusable;
                // fetch it explicitly instead.
                warn!(?state, "reset returned an unusable state; refetching");
                self.end_busy();
                self.update_game_state().await;
                return;
            }
            Err(failure) => self.record_failure(GameOp::Reset, None, failure),
        }
        self.end_busy();
    }

    pub async fn retry_failed(&mut self) {
        let Some(failed) = self.failure.take() else {
            return;
        };
        match failed.op {
            GameOp::FetchState => self.update_game_state().await,
            GameOp::SubmitChoice => {
                let index = failed.choice_index.unwrap_or(0);
                self.handle_choice(index).await;
            }
            GameOp::Reset => self.reset_game().await,
        }
    }

    /// The terminal-client stand-in for a page reload: throw away everything
    /// client-side and start from the initial fetch.
    pub async fn reload(&mut self) {
        self.screen = None;
        self.current_state = None;
        self.failure = None;
        self.close_share();
        self.slots.clear();
        self.update_game_state().await;
    }

    fn apply_state(&mut self, state: GameState) {
        let screen = render::build_screen(&state);
        // One state on screen at a time: drop every transient left over from
        // the previous cycle before applying the new one.
        self.failure = None;
        self.close_share();
        self.slots.clear();
        self.selected_choice = 0;
        for request in screen.image_requests() {
            self.slots.load(request);
        }
        if matches!(screen.body, Body::NoChoices) {
            error!("state has no choices and is not an ending");
        }
        self.screen = Some(screen);
        self.current_state = Some(state);
    }

    fn record_failure(
        &mut self,
        op: GameOp,
        choice_index: Option<usize>,
        failure: RetryFailure,
    ) {
        error!(?op, %failure, "operation failed after retries");
        let message = match op {
            GameOp::FetchState => format!(
                "Error loading game state: {}. Please try reset or refresh.",
                failure.last_error
            ),
            GameOp::SubmitChoice => format!(
                "Error making choice: {}. Please try again or reset.",
                failure.last_error
            ),
            GameOp::Reset => format!(
                "Error resetting game: {}. Please reload.",
                failure.last_error
            ),
        };
        self.failure = Some(FailedOp {
            op,
            choice_index,
            message,
        });
    }

    // ------------------------------------------------------------------
    // Choice selection
    // ------------------------------------------------------------------

    fn choice_count(&self) -> usize {
        match self.screen.as_ref().map(|s| &s.body) {
            Some(Body::Story { choices }) => choices.len(),
            _ => 0,
        }
    }

    pub fn select_next_choice(&mut self) {
        let count = self.choice_count();
        if count > 0 {
            self.selected_choice = (self.selected_choice + 1) % count;
        }
    }

    pub fn select_prev_choice(&mut self) {
        let count = self.choice_count();
        if count > 0 {
            self.selected_choice = (self.selected_choice + count - 1) % count;
        }
    }

    pub fn selected_choice(&self) -> Option<usize> {
        match self.screen.as_ref().map(|s| &s.body) {
            Some(Body::Story { choices }) => {
                choices.get(self.selected_choice).map(|c| c.index)
            }
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Images
    // ------------------------------------------------------------------

    pub fn apply_slot_update(&mut self, update: SlotUpdate) {
        self.slots.apply_update(update);
    }

    pub fn retry_image(&mut self, slot: SlotId) {
        self.slots.retry(slot);
    }

    // ------------------------------------------------------------------
    // Share flow
    // ------------------------------------------------------------------

    pub async fn open_share(&mut self) {
        if !matches!(self.screen.as_ref().map(|s| &s.body), Some(Body::End(_))) {
            return;
        }
        self.slots.register(SlotId::Share);
        self.share_open = true;
        let url = match self.backend.share_image_url().await {
            Ok(Some(url)) => url,
            Ok(None) => {
                info!("backend provided no share image; using generation fallback");
                render::share_fallback_url()
            }
            Err(err) => {
                info!(%err, "share image request failed; using generation fallback");
                render::share_fallback_url()
            }
        };
        self.share_url = Some(url.clone());
        self.slots.load(ImageRequest {
            slot: SlotId::Share,
            url: Some(url),
            alt: "Shareable manga story".into(),
        });
    }

    pub fn close_share(&mut self) {
        if self.share_open {
            self.slots.release(SlotId::Share);
            self.share_open = false;
            self.share_url = None;
        }
    }

    // ------------------------------------------------------------------
    // Wallet
    // ------------------------------------------------------------------

    pub async fn connect_wallet(&mut self) {
        if !self.provider.available() {
            self.notify(
                NotificationKind::Error,
                "No wallet provider configured. Wallet features are disabled.",
            );
            return;
        }
        let accounts = match self.provider.request_accounts().await {
            Ok(accounts) => accounts,
            Err(WalletError::Rejected) => {
                self.notify(
                    NotificationKind::Error,
                    "Wallet connection rejected by user",
                );
                return;
            }
            Err(err) => {
                self.notify(
                    NotificationKind::Error,
                    format!("Failed to connect wallet: {err}"),
                );
                return;
            }
        };
        let Some(address) = accounts.into_iter().next() else {
            self.notify(
                NotificationKind::Error,
                "No accounts found. Please unlock your wallet.",
            );
            return;
        };
        info!(%address, "wallet connected");
        self.wallet.address = Some(address);
        self.ensure_wallet_network().await;
        self.refresh_balance().await;
        self.notify(
            NotificationKind::Success,
            "Wallet connected to Polkadot ecosystem!",
        );
    }

    pub fn disconnect_wallet(&mut self) {
        info!("wallet disconnected");
        self.wallet = WalletConnection::default();
        self.notify(NotificationKind::Info, "Wallet disconnected");
    }

    /// Silent startup probe: reconnect an already-exposed account, settle the
    /// network, and surface any prior saves.
    pub async fn startup_wallet_probe(&mut self) {
        if !self.provider.available() {
            self.notify(
                NotificationKind::Info,
                "No wallet provider detected. Wallet features are disabled.",
            );
            return;
        }
        let accounts = match self.provider.accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!(%err, "wallet startup probe failed");
                return;
            }
        };
        let Some(address) = accounts.into_iter().next() else {
            return;
        };
        info!(%address, "wallet already connected");
        self.wallet.address = Some(address.clone());
        self.ensure_wallet_network().await;
        self.refresh_balance().await;
        match self.backend.load_records(&address).await {
            Ok(saved) if !saved.records.is_empty() => {
                info!(count = saved.records.len(), "loaded prior saves");
                self.notify(
                    NotificationKind::Info,
                    format!(
                        "Found {} saved adventure(s) for this wallet",
                        saved.records.len()
                    ),
                );
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "loading prior saves failed"),
        }
    }

    async fn ensure_wallet_network(&mut self) {
        match wallets::ensure_network(self.provider.as_ref()).await {
            Ok(NetworkOutcome::OnTarget) => {}
            Ok(NetworkOutcome::AddedTarget) => {
                self.notify(
                    NotificationKind::Info,
                    format!("{} added to wallet", POLKADOT_HUB_TESTNET.chain_name),
                );
            }
            Ok(NetworkOutcome::FellBack) => {
                self.notify(
                    NotificationKind::Warning,
                    "Target network not available. Using fallback network.",
                );
            }
            Err(err) => {
                // Connection survives a network mismatch; the player just
                // gets told about it.
                self.notify(
                    NotificationKind::Error,
                    format!("Error checking/switching network: {err}"),
                );
            }
        }
    }

    async fn refresh_balance(&mut self) {
        let Some(address) = self.wallet.address.clone() else {
            return;
        };
        match self.provider.balance(&address).await {
            Ok(raw) => {
                let native =
                    wallets::to_native_units(raw, POLKADOT_HUB_TESTNET.currency_decimals);
                self.wallet.balance = Some(native);
                if native < LOW_BALANCE_THRESHOLD {
                    self.notify(
                        NotificationKind::Info,
                        "Low balance detected. Consider getting test tokens from the faucet.",
                    );
                }
            }
            Err(err) => warn!(%err, "reading wallet balance failed"),
        }
    }

    /// Best-effort persistence of the current outcome. Every failure path
    /// ends in at most a notification; gameplay never sees an error.
    pub async fn save_progress(&mut self) {
        if !self.wallet.connected() {
            return;
        }
        let Some(state) = self.current_state.clone() else {
            return;
        };
        let Some(address) = self.wallet.address.clone() else {
            return;
        };
        let record = build_game_record(&state, Utc::now());
        let message = format!(
            "Mystic Forest Adventure - Score: {}, Ending: {}, Timestamp: {}",
            record.score,
            record.ending_category,
            record.timestamp.timestamp_millis(),
        );
        let signature = match self.provider.personal_sign(&message, &address).await {
            Ok(signature) => signature,
            Err(err) => {
                warn!(%err, "signing game record failed");
                self.notify(
                    NotificationKind::Error,
                    format!("Failed to save to blockchain: {err}"),
                );
                return;
            }
        };
        let save = SaveRecord {
            wallet_address: address,
            game_data: record,
            signature,
            message,
        };
        match self.backend.save_record(&save).await {
            Ok(ack) if ack.success => {
                self.notify(
                    NotificationKind::Success,
                    "Game saved to blockchain successfully!",
                );
                self.score_notifications(&state);
            }
            Ok(ack) => {
                warn!(message = ?ack.message, "blockchain save not acknowledged");
                self.notify(
                    NotificationKind::Error,
                    "Failed to save to blockchain: not acknowledged",
                );
            }
            Err(err) => {
                warn!(%err, "blockchain save failed");
                self.notify(
                    NotificationKind::Error,
                    format!("Failed to save to blockchain: {err}"),
                );
            }
        }
    }

    fn score_notifications(&mut self, state: &GameState) {
        if state.score >= 8 {
            self.notify(
                NotificationKind::Success,
                "Champion! You've mastered the blockchain adventure!",
            );
        } else if state.score >= 5 {
            self.notify(
                NotificationKind::Info,
                "Explorer! Great progress in the ecosystem!",
            );
        } else {
            self.notify(
                NotificationKind::Info,
                "Connected! Your adventure is being saved to the blockchain.",
            );
        }
    }
}

/// The reset endpoint occasionally replies before the new session state is
/// readable; a state with nothing in it means "go fetch".
fn state_is_usable(state: &GameState) -> bool {
    !(state.situation.is_empty() && state.choices.is_empty() && state.score == 0)
}

pub fn build_game_record(state: &GameState, timestamp: DateTime<Utc>) -> GameRecord {
    let ending_category = state
        .ending_category
        .clone()
        .unwrap_or_else(|| "Adventure Complete".to_string());
    let digest =
        record_digest(state.score, &ending_category, &state.situation, timestamp);
    GameRecord {
        score: state.score,
        ending_category,
        situation: state.situation.clone(),
        is_end: state.is_end,
        timestamp,
        network: POLKADOT_HUB_TESTNET.chain_name.to_string(),
        digest,
    }
}

fn record_digest(
    score: i64,
    category: &str,
    situation: &str,
    timestamp: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(score.to_le_bytes());
    hasher.update(category.as_bytes());
    hasher.update(situation.as_bytes());
    hasher.update(timestamp.to_rfc3339().as_bytes());
    hasher.update(POLKADOT_HUB_TESTNET.chain_name.as_bytes());
    format!("0x{}", hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// App entry and event loop
// ---------------------------------------------------------------------------

pub async fn run_app(config: AppConfig) -> Result<()> {
    let (slot_tx, slot_rx) = mpsc::unbounded_channel();
    let mut controller = AppController::new(&config, slot_tx)?;
    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!(api_url = %config.api_url, "starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(&mut controller, &mut ui_state, &mut input_events, slot_rx).await;
    ui::terminal_exit()?;
    res
}

fn show_busy(
    controller: &mut AppController,
    ui_state: &mut ui::UiState,
    text: &str,
    context: &'static str,
) -> Result<()> {
    controller.begin_busy(text);
    ui::draw(ui_state, &controller.snapshot()).wrap_err(context)
}

async fn run_loop(
    controller: &mut AppController,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
    mut slot_rx: mpsc::UnboundedReceiver<SlotUpdate>,
) -> Result<()> {
    controller.startup_wallet_probe().await;
    show_busy(
        controller,
        ui_state,
        "Loading your adventure",
        "initial draw failed",
    )?;
    controller.update_game_state().await;

    let mut ticker = time::interval(REDRAW_INTERVAL);
    loop {
        controller.prune_notifications();
        let snapshot = controller.snapshot();
        ui::draw(ui_state, &snapshot).wrap_err("frame draw failed")?;

        tokio::select! {
            maybe_update = slot_rx.recv() => {
                if let Some(update) = maybe_update {
                    controller.apply_slot_update(update);
                }
            }
            _ = ticker.tick() => {
                // Spinner animation frame and notification expiry.
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(ui_state, &snapshot, event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => {}
                    ui::UserEvent::NextChoice => controller.select_next_choice(),
                    ui::UserEvent::PrevChoice => controller.select_prev_choice(),
                    ui::UserEvent::ConfirmChoice => {
                        if let Some(index) = controller.selected_choice() {
                            show_busy(
                                controller,
                                ui_state,
                                "Submitting your choice...",
                                "draw before choice submission failed",
                            )?;
                            controller.handle_choice(index).await;
                        }
                    }
                    ui::UserEvent::Reset => {
                        show_busy(
                            controller,
                            ui_state,
                            "Resetting game...",
                            "draw before reset failed",
                        )?;
                        controller.reset_game().await;
                    }
                    ui::UserEvent::RetryFailed => {
                        show_busy(
                            controller,
                            ui_state,
                            "Attempting to reconnect...",
                            "draw before retry failed",
                        )?;
                        controller.retry_failed().await;
                    }
                    ui::UserEvent::Reload => {
                        show_busy(
                            controller,
                            ui_state,
                            "Reloading game...",
                            "draw before reload failed",
                        )?;
                        controller.reload().await;
                    }
                    ui::UserEvent::RetryImage(slot) => controller.retry_image(slot),
                    ui::UserEvent::OpenShare => controller.open_share().await,
                    ui::UserEvent::CloseShare => controller.close_share(),
                    ui::UserEvent::ConnectWallet => controller.connect_wallet().await,
                    ui::UserEvent::DisconnectWallet => controller.disconnect_wallet(),
                    ui::UserEvent::SaveToChain => controller.save_progress().await,
                }
            }
        }
    }
    Ok(())
}
