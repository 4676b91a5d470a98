use url::form_urlencoded;

use crate::{
    images::{
        ImageRequest,
        SlotId,
    },
    story_client::GameState,
};

pub const MAX_SCORE: i64 = 10;
pub const GENERATION_HOST: &str = "https://image.pollinations.ai/prompt/";

const MANGA_SNIPPET: usize = 70;
const SUMMARY_SNIPPET: usize = 80;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChoiceControl {
    pub index: usize,
    pub label: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndScreen {
    pub category: String,
    pub situation: String,
    pub score: i64,
    pub stars: u8,
    pub message: &'static str,
    pub manga: ImageRequest,
    pub summary: ImageRequest,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Body {
    Story { choices: Vec<ChoiceControl> },
    /// Not an ending, but the server offered nothing to pick. Only a reset
    /// gets the player out of here.
    NoChoices,
    End(EndScreen),
}

/// Complete description of the game-facing UI for one state. A new screen
/// replaces the previous one wholesale; nothing is patched incrementally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Screen {
    pub score: i64,
    pub situation: String,
    pub reset_label: &'static str,
    pub scene: ImageRequest,
    pub body: Body,
}

impl Screen {
    pub fn image_requests(&self) -> Vec<ImageRequest> {
        let mut requests = vec![self.scene.clone()];
        if let Body::End(end) = &self.body {
            requests.push(end.manga.clone());
            requests.push(end.summary.clone());
        }
        requests
    }
}

pub fn build_screen(state: &GameState) -> Screen {
    let situation = if state.situation.is_empty() {
        "Loading...".to_string()
    } else {
        state.situation.clone()
    };
    let scene = ImageRequest {
        slot: SlotId::Story,
        url: state.image_url.clone(),
        alt: "Story scene".into(),
    };
    let body = if state.is_end {
        Body::End(build_end_screen(state))
    } else if state.choices.is_empty() {
        Body::NoChoices
    } else {
        Body::Story {
            choices: state
                .choices
                .iter()
                .map(|choice| ChoiceControl {
                    index: choice.index,
                    label: choice.text.clone(),
                })
                .collect(),
        }
    };
    Screen {
        score: state.score,
        situation,
        reset_label: if state.is_end { "Play Again" } else { "Reset Game" },
        scene,
        body,
    }
}

fn build_end_screen(state: &GameState) -> EndScreen {
    let category = state
        .ending_category
        .clone()
        .unwrap_or_else(|| "Adventure Complete".to_string());
    let situation = if state.situation.is_empty() {
        "A mysterious outcome.".to_string()
    } else {
        state.situation.clone()
    };
    let manga_url = state
        .manga_image_url
        .clone()
        .unwrap_or_else(|| manga_fallback_url(&category, &situation));
    let summary_url = state
        .summary_image_url
        .clone()
        .unwrap_or_else(|| summary_fallback_url(&category, &situation));
    EndScreen {
        stars: star_rating(state.score),
        message: ending_message(state.score),
        score: state.score,
        manga: ImageRequest {
            slot: SlotId::Manga,
            url: Some(manga_url),
            alt: "Story manga".into(),
        },
        summary: ImageRequest {
            slot: SlotId::Summary,
            url: Some(summary_url),
            alt: "Story summary".into(),
        },
        category,
        situation,
    }
}

/// Discrete rating over a fixed max score of 10: clamp(ceil(score / 2), 1, 5).
pub fn star_rating(score: i64) -> u8 {
    (score + 1).div_euclid(2).clamp(1, 5) as u8
}

pub fn star_bar(stars: u8) -> String {
    let filled = stars.min(5) as usize;
    "\u{2605}".repeat(filled) + &"\u{2606}".repeat(5 - filled)
}

pub fn ending_message(score: i64) -> &'static str {
    if score >= 8 {
        "Remarkable! You've mastered this adventure with exceptional choices."
    } else if score >= 5 {
        "Well done! Your journey through the forest was quite successful."
    } else if score >= 2 {
        "You've completed your journey with some wisdom gained along the way."
    } else {
        "The forest has taught you some difficult lessons. Perhaps another path would lead to a different fate."
    }
}

fn snippet(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

fn encode_prompt(prompt: &str) -> String {
    // byte_serialize is form encoding; the generation host takes the prompt
    // as a path segment, so spaces must be %20 rather than '+'.
    form_urlencoded::byte_serialize(prompt.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

pub fn generation_url(prompt: &str) -> String {
    format!("{GENERATION_HOST}{}", encode_prompt(prompt))
}

pub fn manga_fallback_url(category: &str, situation: &str) -> String {
    generation_url(&format!(
        "manga comic, 4 panels, depicting: {}, story highlight: {}, fantasy forest adventure, clear English speech bubbles, vibrant colors, detailed art",
        category.to_lowercase(),
        snippet(situation, MANGA_SNIPPET),
    ))
}

pub fn summary_fallback_url(category: &str, situation: &str) -> String {
    generation_url(&format!(
        "cinematic digital painting, summary of: {}, visualising the key moment: {}, epic fantasy forest, atmospheric lighting, high detail, professional artwork",
        category.to_lowercase(),
        snippet(situation, SUMMARY_SNIPPET),
    ))
}

pub fn share_fallback_url() -> String {
    generation_url(
        "manga comic, fantasy forest adventure, expressive characters, clear English speech bubbles, 4 panels, high quality, dramatic, adventure, professional comic layout",
    )
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use crate::story_client::Choice;
    use proptest::prelude::*;

    fn base_state() -> GameState {
        GameState {
            situation: "You stand at the forest edge.".into(),
            score: 3,
            choices: vec![
                Choice {
                    text: "Enter the forest".into(),
                    index: 0,
                },
                Choice {
                    text: "Walk along the edge".into(),
                    index: 1,
                },
                Choice {
                    text: "Turn back".into(),
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

    #[test]
    fn build_screen__one_control_per_choice_in_served_order() {
        // given
        let state = base_state();

        // when
        let screen = build_screen(&state);

        // then
        let Body::Story { choices } = &screen.body else {
            panic!("expected story body");
        };
        assert_eq!(choices.len(), 3);
        for (position, control) in choices.iter().enumerate() {
            assert_eq!(control.index, position);
            assert_eq!(control.label, state.choices[position].text);
        }
    }

    #[test]
    fn build_screen__always_carries_exactly_one_reset_control() {
        let mut state = base_state();
        assert_eq!(build_screen(&state).reset_label, "Reset Game");

        state.is_end = true;
        assert_eq!(build_screen(&state).reset_label, "Play Again");
    }

    #[test]
    fn build_screen__empty_choices_without_end_is_terminal_inconsistency() {
        let mut state = base_state();
        state.choices.clear();

        let screen = build_screen(&state);

        assert_eq!(screen.body, Body::NoChoices);
    }

    #[test]
    fn build_screen__blank_situation_falls_back_to_loading() {
        let mut state = base_state();
        state.situation.clear();

        assert_eq!(build_screen(&state).situation, "Loading...");
    }

    #[test]
    fn build_screen__end_uses_served_image_urls_when_present() {
        let mut state = base_state();
        state.is_end = true;
        state.manga_image_url = Some("https://img.example/manga.jpg".into());
        state.summary_image_url = Some("https://img.example/summary.jpg".into());

        let Body::End(end) = build_screen(&state).body else {
            panic!("expected end body");
        };
        assert_eq!(end.manga.url.as_deref(), Some("https://img.example/manga.jpg"));
        assert_eq!(
            end.summary.url.as_deref(),
            Some("https://img.example/summary.jpg")
        );
    }

    #[test]
    fn build_screen__end_synthesizes_deterministic_fallback_urls() {
        let mut state = base_state();
        state.is_end = true;
        state.ending_category = Some("Heroic Savior".into());

        let Body::End(first) = build_screen(&state).body else {
            panic!("expected end body");
        };
        let Body::End(second) = build_screen(&state).body else {
            panic!("expected end body");
        };

        assert_eq!(first.manga.url, second.manga.url);
        let manga_url = first.manga.url.unwrap();
        assert!(manga_url.starts_with(GENERATION_HOST));
        assert!(manga_url.contains("heroic%20savior"));
        assert!(!manga_url.contains(' '));
        assert!(!manga_url.contains('+'));
    }

    #[test]
    fn star_rating__matches_reference_points() {
        assert_eq!(star_rating(0), 1);
        assert_eq!(star_rating(1), 1);
        assert_eq!(star_rating(2), 1);
        assert_eq!(star_rating(3), 2);
        assert_eq!(star_rating(4), 2);
        assert_eq!(star_rating(7), 4);
        assert_eq!(star_rating(10), 5);
        // Scores can go negative on the wire; the rating floor holds.
        assert_eq!(star_rating(-4), 1);
    }

    #[test]
    fn star_bar__renders_filled_and_hollow_stars() {
        assert_eq!(star_bar(2), "\u{2605}\u{2605}\u{2606}\u{2606}\u{2606}");
    }

    #[test]
    fn ending_message__uses_four_score_bands() {
        assert!(ending_message(10).starts_with("Remarkable"));
        assert!(ending_message(8).starts_with("Remarkable"));
        assert!(ending_message(7).starts_with("Well done"));
        assert!(ending_message(5).starts_with("Well done"));
        assert!(ending_message(4).starts_with("You've completed"));
        assert!(ending_message(2).starts_with("You've completed"));
        assert!(ending_message(1).starts_with("The forest"));
        assert!(ending_message(0).starts_with("The forest"));
    }

    proptest! {
        #[test]
        fn star_rating__equals_clamped_ceiling_over_score_range(score in 0i64..=MAX_SCORE) {
            let expected = ((score as f64 / 2.0).ceil() as i64).clamp(1, 5) as u8;
            prop_assert_eq!(star_rating(score), expected);
        }
    }
}
