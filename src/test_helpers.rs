//! Scripted stand-ins for the network collaborators, shared by the unit and
//! integration tests.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{
            AtomicU32,
            Ordering,
        },
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    images::ImageFetcher,
    retry::{
        RequestError,
        RetryPolicy,
    },
    story_client::{
        Choice,
        GameState,
        SaveAck,
        SaveRecord,
        SavedRecords,
        StoryBackend,
    },
    wallets::{
        ChainDescriptor,
        POLKADOT_HUB_TESTNET,
        WalletError,
        WalletProvider,
    },
};

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(2),
        delay_cap: Duration::from_millis(10),
        transport_step: Duration::from_millis(1),
        attempt_timeout: Duration::from_millis(500),
        ..RetryPolicy::default()
    }
}

pub fn server_error() -> RequestError {
    RequestError::Status {
        code: 500,
        body: "internal error".into(),
    }
}

pub fn story_state() -> GameState {
    GameState {
        situation: "You stand at the edge of a mystic forest.".into(),
        score: 2,
        choices: vec![
            Choice {
                text: "Enter the forest".into(),
                index: 0,
            },
            Choice {
                text: "Follow the stream".into(),
                index: 1,
            },
            Choice {
                text: "Climb a tree to look around".into(),
                index: 2,
            },
        ],
        is_end: false,
        ending_category: None,
        image_url: Some("https://img.example/scene.jpg".into()),
        manga_image_url: None,
        summary_image_url: None,
    }
}

pub fn ending_state(score: i64) -> GameState {
    GameState {
        situation: "The forest falls silent as your journey ends.".into(),
        score,
        choices: Vec::new(),
        is_end: true,
        ending_category: Some("Forest Guardian".into()),
        image_url: Some("https://img.example/final.jpg".into()),
        manga_image_url: None,
        summary_image_url: None,
    }
}

type Scripted = Mutex<VecDeque<Result<GameState, RequestError>>>;

/// Story backend with a queue of responses per operation. An exhausted queue
/// keeps serving `story_state()` so happy-path tests stay short.
pub struct ScriptedBackend {
    fetch_responses: Scripted,
    choice_responses: Scripted,
    reset_responses: Scripted,
    pub share_url: Mutex<Option<String>>,
    pub share_fails: Mutex<bool>,
    pub save_succeeds: Mutex<bool>,
    pub fetch_calls: AtomicU32,
    pub choice_calls: AtomicU32,
    pub reset_calls: AtomicU32,
    pub save_calls: AtomicU32,
    pub submitted_indices: Mutex<Vec<usize>>,
    pub saved_records: Mutex<Vec<SaveRecord>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        ScriptedBackend {
            fetch_responses: Mutex::new(VecDeque::new()),
            choice_responses: Mutex::new(VecDeque::new()),
            reset_responses: Mutex::new(VecDeque::new()),
            share_url: Mutex::new(None),
            share_fails: Mutex::new(false),
            save_succeeds: Mutex::new(true),
            fetch_calls: AtomicU32::new(0),
            choice_calls: AtomicU32::new(0),
            reset_calls: AtomicU32::new(0),
            save_calls: AtomicU32::new(0),
            submitted_indices: Mutex::new(Vec::new()),
            saved_records: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_fetch(&self, response: Result<GameState, RequestError>) {
        self.fetch_responses.lock().unwrap().push_back(response);
    }

    pub fn queue_choice(&self, response: Result<GameState, RequestError>) {
        self.choice_responses.lock().unwrap().push_back(response);
    }

    pub fn queue_reset(&self, response: Result<GameState, RequestError>) {
        self.reset_responses.lock().unwrap().push_back(response);
    }

    fn pop(queue: &Scripted) -> Result<GameState, RequestError> {
        queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(story_state()))
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoryBackend for ScriptedBackend {
    async fn fetch_state(&self) -> Result<GameState, RequestError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Self::pop(&self.fetch_responses)
    }

    async fn submit_choice(&self, index: usize) -> Result<GameState, RequestError> {
        self.choice_calls.fetch_add(1, Ordering::SeqCst);
        self.submitted_indices.lock().unwrap().push(index);
        Self::pop(&self.choice_responses)
    }

    async fn reset(&self) -> Result<GameState, RequestError> {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
        Self::pop(&self.reset_responses)
    }

    async fn share_image_url(&self) -> Result<Option<String>, RequestError> {
        if *self.share_fails.lock().unwrap() {
            return Err(server_error());
        }
        Ok(self.share_url.lock().unwrap().clone())
    }

    async fn save_record(&self, record: &SaveRecord) -> Result<SaveAck, RequestError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        self.saved_records.lock().unwrap().push(record.clone());
        if *self.save_succeeds.lock().unwrap() {
            Ok(SaveAck {
                success: true,
                blockchain_hash: Some("0xdeadbeef".into()),
                message: Some("saved".into()),
            })
        } else {
            Err(RequestError::Network("persistence offline".into()))
        }
    }

    async fn load_records(
        &self,
        _wallet_address: &str,
    ) -> Result<SavedRecords, RequestError> {
        Ok(SavedRecords {
            records: Vec::new(),
            latest: None,
            message: None,
        })
    }
}

/// Fetcher that never succeeds; image behavior is covered by unit tests, the
/// integration tests only need load attempts to resolve quickly.
pub struct OfflineFetcher {
    pub calls: AtomicU32,
}

impl OfflineFetcher {
    pub fn new() -> Self {
        OfflineFetcher {
            calls: AtomicU32::new(0),
        }
    }
}

impl Default for OfflineFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageFetcher for OfflineFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err("image host offline".into())
    }
}

/// Wallet provider that always cooperates: one account, already on the target
/// chain, signs anything.
pub struct CooperativeWallet {
    pub address: String,
    pub signed_messages: Mutex<Vec<String>>,
}

impl CooperativeWallet {
    pub fn new() -> Self {
        CooperativeWallet {
            address: "0x1234567890abcdef1234567890abcdef12345678".into(),
            signed_messages: Mutex::new(Vec::new()),
        }
    }
}

impl Default for CooperativeWallet {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletProvider for CooperativeWallet {
    fn available(&self) -> bool {
        true
    }

    async fn accounts(&self) -> Result<Vec<String>, WalletError> {
        Ok(vec![self.address.clone()])
    }

    async fn request_accounts(&self) -> Result<Vec<String>, WalletError> {
        Ok(vec![self.address.clone()])
    }

    async fn chain_id(&self) -> Result<String, WalletError> {
        Ok(POLKADOT_HUB_TESTNET.chain_id.to_string())
    }

    async fn switch_chain(&self, _chain_id: &str) -> Result<(), WalletError> {
        Ok(())
    }

    async fn add_chain(&self, _chain: &ChainDescriptor) -> Result<(), WalletError> {
        Ok(())
    }

    async fn balance(&self, _address: &str) -> Result<u128, WalletError> {
        // One whole native unit; comfortably above the faucet threshold.
        Ok(1_000_000_000_000_000_000)
    }

    async fn personal_sign(
        &self,
        message: &str,
        _address: &str,
    ) -> Result<String, WalletError> {
        self.signed_messages.lock().unwrap().push(message.to_string());
        Ok("0xsigned".into())
    }
}
