use std::fmt;

use async_trait::async_trait;
use chrono::{
    DateTime,
    Utc,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use reqwest::Response;
use serde::{
    Deserialize,
    Serialize,
};

use crate::retry::RequestError;

const ERROR_BODY_LIMIT: usize = 200;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Choice {
    pub text: String,
    /// Position in the served list; echoed back verbatim on selection.
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GameState {
    pub situation: String,
    pub score: i64,
    pub choices: Vec<Choice>,
    pub is_end: bool,
    pub ending_category: Option<String>,
    pub image_url: Option<String>,
    pub manga_image_url: Option<String>,
    pub summary_image_url: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub score: i64,
    pub ending_category: String,
    pub situation: String,
    pub is_end: bool,
    pub timestamp: DateTime<Utc>,
    pub network: String,
    pub digest: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRecord {
    pub wallet_address: String,
    pub game_data: GameRecord,
    pub signature: String,
    pub message: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAck {
    #[serde(default)]
    pub success: bool,
    pub blockchain_hash: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SavedRecords {
    #[serde(default)]
    pub records: Vec<serde_json::Value>,
    pub latest: Option<serde_json::Value>,
    pub message: Option<String>,
}

/// The story backend as the controller sees it. `StoryClient` is the HTTP
/// implementation; tests script their own.
#[async_trait]
pub trait StoryBackend: Send + Sync {
    async fn fetch_state(&self) -> Result<GameState, RequestError>;
    async fn submit_choice(&self, index: usize) -> Result<GameState, RequestError>;
    async fn reset(&self) -> Result<GameState, RequestError>;
    async fn share_image_url(&self) -> Result<Option<String>, RequestError>;
    async fn save_record(&self, record: &SaveRecord) -> Result<SaveAck, RequestError>;
    async fn load_records(
        &self,
        wallet_address: &str,
    ) -> Result<SavedRecords, RequestError>;
}

#[derive(Clone)]
pub struct StoryClient {
    base_url: String,
    http: reqwest::Client,
}

impl StoryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        // The backend keys game sessions off a cookie, so the client must
        // carry a jar across requests.
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .wrap_err("failed to build HTTP client for story backend")?;
        Ok(Self { base_url, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(self.url(path))
            .header("Cache-Control", "no-cache")
            .header("Pragma", "no-cache")
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(self.url(path))
            .header("Cache-Control", "no-cache")
            .header("Pragma", "no-cache")
    }

    async fn state_from_response(res: Response) -> Result<GameState, RequestError> {
        let bytes = success_body(res).await?;
        decode_state(&bytes)
    }
}

impl fmt::Display for StoryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_url)
    }
}

#[async_trait]
impl StoryBackend for StoryClient {
    async fn fetch_state(&self) -> Result<GameState, RequestError> {
        let res = self.get("/api/state").send().await.map_err(network_error)?;
        Self::state_from_response(res).await
    }

    async fn submit_choice(&self, index: usize) -> Result<GameState, RequestError> {
        let res = self
            .post("/api/choice")
            .json(&serde_json::json!({ "choice_index": index }))
            .send()
            .await
            .map_err(network_error)?;
        Self::state_from_response(res).await
    }

    async fn reset(&self) -> Result<GameState, RequestError> {
        let res = self.post("/api/reset").send().await.map_err(network_error)?;
        Self::state_from_response(res).await
    }

    async fn share_image_url(&self) -> Result<Option<String>, RequestError> {
        #[derive(Deserialize)]
        struct ShareDto {
            share_image_url: Option<String>,
        }
        let res = self
            .get("/api/share-image")
            .send()
            .await
            .map_err(network_error)?;
        let bytes = success_body(res).await?;
        let dto: ShareDto = serde_json::from_slice(&bytes)
            .map_err(|e| RequestError::MalformedPayload(e.to_string()))?;
        Ok(dto.share_image_url.filter(|url| !url.is_empty()))
    }

    async fn save_record(&self, record: &SaveRecord) -> Result<SaveAck, RequestError> {
        let res = self
            .post("/api/save-to-blockchain")
            .json(record)
            .send()
            .await
            .map_err(network_error)?;
        let bytes = success_body(res).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RequestError::MalformedPayload(e.to_string()))
    }

    async fn load_records(
        &self,
        wallet_address: &str,
    ) -> Result<SavedRecords, RequestError> {
        let res = self
            .get("/api/load-from-blockchain")
            .query(&[("walletAddress", wallet_address)])
            .send()
            .await
            .map_err(network_error)?;
        let bytes = success_body(res).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RequestError::MalformedPayload(e.to_string()))
    }
}

fn network_error(err: reqwest::Error) -> RequestError {
    RequestError::Network(err.to_string())
}

async fn success_body(res: Response) -> Result<Vec<u8>, RequestError> {
    let status = res.status();
    let bytes = res
        .bytes()
        .await
        .map_err(|e| RequestError::Network(e.to_string()))?;
    if !status.is_success() {
        let body = String::from_utf8_lossy(&bytes).into_owned();
        return Err(RequestError::Status {
            code: status.as_u16(),
            body: clip(body, ERROR_BODY_LIMIT),
        });
    }
    Ok(bytes.to_vec())
}

fn clip(mut s: String, limit: usize) -> String {
    if s.len() > limit {
        let mut end = limit;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

// ---------------------------------------------------------------------------
// Wire shapes. The backend has served two generations of the state payload:
// node fields either flat at the top level or nested under `current_node`,
// and the score under either `current_score` or `score`. Everything funnels
// into one canonical GameState here; top-level values win.
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ChoiceDto {
    text: Option<String>,
}

#[derive(Default, Deserialize)]
struct NodeDto {
    situation: Option<String>,
    choices: Option<Vec<ChoiceDto>>,
    is_end: Option<bool>,
    ending_category: Option<String>,
    image_url: Option<String>,
    manga_image_url: Option<String>,
    summary_image_url: Option<String>,
}

#[derive(Deserialize)]
struct StateDto {
    situation: Option<String>,
    score: Option<i64>,
    current_score: Option<i64>,
    choices: Option<Vec<ChoiceDto>>,
    is_end: Option<bool>,
    ending_category: Option<String>,
    image_url: Option<String>,
    manga_image_url: Option<String>,
    summary_image_url: Option<String>,
    current_node: Option<NodeDto>,
}

impl From<StateDto> for GameState {
    fn from(dto: StateDto) -> Self {
        let node = dto.current_node.unwrap_or_default();
        let choices = dto
            .choices
            .or(node.choices)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, c)| Choice {
                text: c
                    .text
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| format!("Choice {}", index + 1)),
                index,
            })
            .collect();
        GameState {
            situation: dto.situation.or(node.situation).unwrap_or_default(),
            score: dto.current_score.or(dto.score).unwrap_or(0),
            choices,
            is_end: dto.is_end.or(node.is_end).unwrap_or(false),
            ending_category: dto.ending_category.or(node.ending_category),
            image_url: dto.image_url.or(node.image_url),
            manga_image_url: dto.manga_image_url.or(node.manga_image_url),
            summary_image_url: dto.summary_image_url.or(node.summary_image_url),
        }
    }
}

pub(crate) fn decode_state(bytes: &[u8]) -> Result<GameState, RequestError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| RequestError::MalformedPayload(e.to_string()))?;
    if value.as_object().is_some_and(|obj| obj.is_empty()) {
        return Err(RequestError::MalformedPayload(
            "empty response from server".into(),
        ));
    }
    let dto: StateDto = serde_json::from_value(value)
        .map_err(|e| RequestError::MalformedPayload(e.to_string()))?;
    Ok(dto.into())
}
