use std::{
    collections::HashMap,
    sync::Arc,
};

use async_trait::async_trait;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use tokio::sync::mpsc;
use tracing::warn;

// Preview cells are terminal columns; two thumbnail rows collapse into one
// drawn row of half-blocks, so the thumbnail budget is rows * 2.
pub const PREVIEW_COLS: u32 = 56;
pub const PREVIEW_ROWS: u32 = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotId {
    Story,
    Manga,
    Summary,
    Share,
}

impl SlotId {
    pub fn label(&self) -> &'static str {
        match self {
            SlotId::Story => "Scene",
            SlotId::Manga => "Manga",
            SlotId::Summary => "Summary",
            SlotId::Share => "Share",
        }
    }
}

/// One load attempt. Retries issue a fresh request; a failed one is never
/// mutated in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRequest {
    pub slot: SlotId,
    pub url: Option<String>,
    pub alt: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preview {
    pub source_width: u32,
    pub source_height: u32,
    /// Downscaled RGB rows, row-major, at most PREVIEW_COLS wide.
    pub rows: Vec<Vec<(u8, u8, u8)>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    /// No source URL: dimmed placeholder with a disabled, non-actionable
    /// retry affordance. Never touches the network.
    Empty { alt: String },
    Loading { url: String, alt: String },
    Loaded { preview: Preview, alt: String },
    /// Dimmed placeholder plus exactly one actionable retry affordance.
    Failed {
        url: String,
        alt: String,
        error: String,
    },
}

impl SlotState {
    pub fn retry_actionable(&self) -> bool {
        matches!(self, SlotState::Failed { .. })
    }

    pub fn retry_disabled(&self) -> bool {
        matches!(self, SlotState::Empty { .. })
    }
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, String>;
}

pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .wrap_err("failed to build HTTP client for image loads")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, String> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;
        let bytes = res.bytes().await.map_err(|e| e.to_string())?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug)]
pub struct SlotUpdate {
    pub slot: SlotId,
    pub generation: u64,
    pub outcome: Result<Preview, String>,
}

struct SlotEntry {
    state: SlotState,
    generation: u64,
}

impl SlotEntry {
    fn new() -> Self {
        SlotEntry {
            state: SlotState::Idle,
            generation: 0,
        }
    }
}

/// Registry of display slots. Each `load` supersedes whatever the slot was
/// doing: the generation counter fences off completions from earlier loads,
/// so a slot can never accumulate stale spinners or duplicate retry controls.
pub struct ImageSlots {
    entries: HashMap<SlotId, SlotEntry>,
    fetcher: Arc<dyn ImageFetcher>,
    updates: mpsc::UnboundedSender<SlotUpdate>,
}

impl ImageSlots {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        updates: mpsc::UnboundedSender<SlotUpdate>,
    ) -> Self {
        let mut entries = HashMap::new();
        for slot in [SlotId::Story, SlotId::Manga, SlotId::Summary] {
            entries.insert(slot, SlotEntry::new());
        }
        ImageSlots {
            entries,
            fetcher,
            updates,
        }
    }

    /// The share slot only exists while the share modal is open.
    pub fn register(&mut self, slot: SlotId) {
        self.entries.entry(slot).or_insert_with(SlotEntry::new);
    }

    pub fn release(&mut self, slot: SlotId) {
        self.entries.remove(&slot);
    }

    pub fn state(&self, slot: SlotId) -> Option<&SlotState> {
        self.entries.get(&slot).map(|entry| &entry.state)
    }

    /// Drops every slot back to Idle. Called when a new game state supersedes
    /// the current render cycle.
    pub fn clear(&mut self) {
        for entry in self.entries.values_mut() {
            entry.generation += 1;
            entry.state = SlotState::Idle;
        }
    }

    pub fn load(&mut self, request: ImageRequest) {
        let Some(entry) = self.entries.get_mut(&request.slot) else {
            warn!(slot = ?request.slot, url = ?request.url, "image load for unregistered slot");
            return;
        };
        entry.generation += 1;
        let Some(url) = request.url else {
            warn!(slot = ?request.slot, "image load with no source URL");
            entry.state = SlotState::Empty { alt: request.alt };
            return;
        };
        entry.state = SlotState::Loading {
            url: url.clone(),
            alt: request.alt,
        };
        let generation = entry.generation;
        let slot = request.slot;
        let fetcher = Arc::clone(&self.fetcher);
        let updates = self.updates.clone();
        tokio::spawn(async move {
            let outcome = match fetcher.fetch(&url).await {
                Ok(bytes) => build_preview(&bytes),
                Err(err) => Err(err),
            };
            // Receiver gone means the app is shutting down.
            let _ = updates.send(SlotUpdate {
                slot,
                generation,
                outcome,
            });
        });
    }

    /// Re-issues a fresh load for the same source URI. Only meaningful on a
    /// failed slot; the disabled affordance on an empty slot stays inert.
    pub fn retry(&mut self, slot: SlotId) {
        let Some(entry) = self.entries.get(&slot) else {
            return;
        };
        if let SlotState::Failed { url, alt, .. } = &entry.state {
            let request = ImageRequest {
                slot,
                url: Some(url.clone()),
                alt: alt.clone(),
            };
            self.load(request);
        }
    }

    pub fn apply_update(&mut self, update: SlotUpdate) {
        let Some(entry) = self.entries.get_mut(&update.slot) else {
            return;
        };
        if entry.generation != update.generation {
            // Superseded by a newer load; drop silently.
            return;
        }
        let SlotState::Loading { url, alt } = entry.state.clone() else {
            return;
        };
        entry.state = match update.outcome {
            Ok(preview) => SlotState::Loaded { preview, alt },
            Err(error) => {
                warn!(slot = ?update.slot, %error, url, "image load failed");
                SlotState::Failed { url, alt, error }
            }
        };
    }
}

/// Decode off-screen; only a successfully decoded image ever reaches a slot.
fn build_preview(bytes: &[u8]) -> Result<Preview, String> {
    let decoded = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
    let source_width = decoded.width();
    let source_height = decoded.height();
    let thumb = decoded
        .thumbnail(PREVIEW_COLS, PREVIEW_ROWS * 2)
        .to_rgb8();
    let rows = thumb
        .rows()
        .map(|row| row.map(|px| (px.0[0], px.0[1], px.0[2])).collect())
        .collect();
    Ok(Preview {
        source_width,
        source_height,
        rows,
    })
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use std::{
        io::Cursor,
        sync::atomic::{
            AtomicU32,
            Ordering,
        },
    };

    struct ScriptedFetcher {
        calls: AtomicU32,
        response: Result<Vec<u8>, String>,
    }

    impl ScriptedFetcher {
        fn failing() -> Self {
            ScriptedFetcher {
                calls: AtomicU32::new(0),
                response: Err("connection reset".into()),
            }
        }

        fn with_png() -> Self {
            ScriptedFetcher {
                calls: AtomicU32::new(0),
                response: Ok(tiny_png()),
            }
        }
    }

    #[async_trait]
    impl ImageFetcher for ScriptedFetcher {
        async fn fetch(&self, _url: &str) -> Result<Vec<u8>, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([120, 200, 80]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn request(slot: SlotId, url: Option<&str>) -> ImageRequest {
        ImageRequest {
            slot,
            url: url.map(String::from),
            alt: "Story scene".into(),
        }
    }

    #[tokio::test]
    async fn load__missing_url_never_touches_network() {
        // given
        let fetcher = Arc::new(ScriptedFetcher::failing());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut slots = ImageSlots::new(fetcher.clone(), tx);

        // when
        slots.load(request(SlotId::Story, None));

        // then
        let state = slots.state(SlotId::Story).unwrap();
        assert!(state.retry_disabled());
        assert!(!state.retry_actionable());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn load__successful_decode_swaps_into_slot() {
        // given
        let fetcher = Arc::new(ScriptedFetcher::with_png());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slots = ImageSlots::new(fetcher, tx);

        // when
        slots.load(request(SlotId::Story, Some("https://img.example/a.png")));
        assert!(matches!(
            slots.state(SlotId::Story),
            Some(SlotState::Loading { .. })
        ));
        let update = rx.recv().await.unwrap();
        slots.apply_update(update);

        // then
        match slots.state(SlotId::Story).unwrap() {
            SlotState::Loaded { preview, .. } => {
                assert_eq!(preview.source_width, 4);
                assert!(!preview.rows.is_empty());
            }
            other => panic!("expected loaded slot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn load__failure_leaves_single_actionable_retry() {
        let fetcher = Arc::new(ScriptedFetcher::failing());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slots = ImageSlots::new(fetcher, tx);

        slots.load(request(SlotId::Manga, Some("https://img.example/m.png")));
        let update = rx.recv().await.unwrap();
        slots.apply_update(update);

        let state = slots.state(SlotId::Manga).unwrap();
        assert!(state.retry_actionable());
    }

    #[tokio::test]
    async fn load__reissue_discards_stale_completion() {
        // given a failed first load
        let fetcher = Arc::new(ScriptedFetcher::failing());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slots = ImageSlots::new(fetcher, tx);
        slots.load(request(SlotId::Summary, Some("https://img.example/1.png")));
        let first = rx.recv().await.unwrap();

        // when a second load supersedes it before the first completion lands
        slots.load(request(SlotId::Summary, Some("https://img.example/2.png")));
        slots.apply_update(first);

        // then the stale failure is discarded and no retry control appears
        let state = slots.state(SlotId::Summary).unwrap();
        assert!(matches!(state, SlotState::Loading { url, .. } if url.ends_with("2.png")));
        assert!(!state.retry_actionable());

        // and the second completion is the one that sticks
        let second = rx.recv().await.unwrap();
        slots.apply_update(second);
        assert!(slots.state(SlotId::Summary).unwrap().retry_actionable());
    }

    #[tokio::test]
    async fn retry__reuses_failed_source_uri() {
        let fetcher = Arc::new(ScriptedFetcher::failing());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slots = ImageSlots::new(fetcher.clone(), tx);
        slots.load(request(SlotId::Story, Some("https://img.example/a.png")));
        let update = rx.recv().await.unwrap();
        slots.apply_update(update);

        slots.retry(SlotId::Story);

        assert!(matches!(
            slots.state(SlotId::Story),
            Some(SlotState::Loading { url, .. }) if url == "https://img.example/a.png"
        ));
        let update = rx.recv().await.unwrap();
        assert_eq!(update.generation, 2);
    }

    #[tokio::test]
    async fn load__unregistered_slot_is_ignored() {
        let fetcher = Arc::new(ScriptedFetcher::failing());
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut slots = ImageSlots::new(fetcher.clone(), tx);

        slots.load(request(SlotId::Share, Some("https://img.example/s.png")));

        assert!(slots.state(SlotId::Share).is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
