//! Keyword and lexicon text classifier for the support chat.
//!
//! [`classify`] is a pure function: same text, same answer. It is a triage
//! aid, not a model. Crisis phrases always win over polarity.

use std::collections::BTreeMap;

use axum::{Json, extract::rejection::JsonRejection, response::IntoResponse};

use zenzone_types::api::{Classification, CrisisLevel, Sentiment, SentimentRequest};

use crate::error::ApiError;

const CRISIS_PHRASES: &[&str] = &[
    "suicide",
    "suicidal",
    "kill myself",
    "end it",
    "end it all",
    "self harm",
    "hurt myself",
    "overdose",
    "end my life",
    "want to die",
    "no reason to live",
    "cut myself",
];

const POSITIVE: &[&str] = &[
    "good", "great", "happy", "glad", "grateful", "thankful", "relieved", "calm", "better",
    "hopeful", "proud", "love", "excited", "peaceful", "okay", "fine", "confident", "content",
];

const NEGATIVE: &[&str] = &[
    "bad", "sad", "awful", "terrible", "depressed", "anxious", "lonely", "hopeless",
    "worthless", "miserable", "angry", "scared", "afraid", "tired", "exhausted", "stressed",
    "overwhelmed", "hate", "empty", "numb", "worried", "cry", "crying", "hurt",
];

const NEGATIONS: &[&str] = &["not", "no", "never", "dont", "don't", "cant", "can't", "isnt", "isn't"];

const EMOTIONS: &[(&str, &[&str])] = &[
    ("joy", &["happy", "glad", "grateful", "thankful", "relieved", "content", "joy", "excited", "proud", "peaceful"]),
    ("sadness", &["sad", "down", "depressed", "numb", "crying", "tears", "lonely", "empty", "hopeless", "worthless", "miserable", "grief"]),
    ("anger", &["angry", "mad", "furious", "rage", "irritated", "annoyed", "frustrated", "resentful", "hate"]),
    ("fear", &["afraid", "fear", "scared", "terrified", "panic", "panicking", "phobia", "worried", "worry"]),
    ("anxiety", &["anxiety", "anxious", "nervous", "on edge", "racing thoughts", "overthinking", "uneasy", "restless", "tense"]),
    ("stress", &["stress", "stressed", "overwhelmed", "pressure", "burned out", "exhausted", "cant cope", "too much", "breakdown"]),
    ("loneliness", &["lonely", "isolated", "alone", "no one", "left out", "abandoned", "disconnected"]),
    ("hope", &["hope", "hopeful", "optimistic", "improving", "better", "progress", "recover", "healing", "confident"]),
];

/// Normalization constant for mapping a raw valence sum into [-1, 1].
const ALPHA: f64 = 15.0;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Count whole-word occurrences of a (possibly multi-word) phrase.
fn count_phrase(tokens: &[String], phrase: &str) -> usize {
    let words: Vec<&str> = phrase.split(' ').collect();
    if words.is_empty() || tokens.len() < words.len() {
        return 0;
    }
    tokens
        .windows(words.len())
        .filter(|window| window.iter().zip(&words).all(|(t, w)| t == w))
        .count()
}

fn compound(tokens: &[String]) -> f64 {
    let mut sum = 0.0;
    for (i, token) in tokens.iter().enumerate() {
        let valence = if POSITIVE.contains(&token.as_str()) {
            1.0
        } else if NEGATIVE.contains(&token.as_str()) {
            -1.0
        } else {
            continue;
        };
        // A negation within the previous two words flips the valence
        let negated = tokens[i.saturating_sub(2)..i]
            .iter()
            .any(|t| NEGATIONS.contains(&t.as_str()));
        sum += if negated { -valence } else { valence };
    }
    if sum == 0.0 {
        0.0
    } else {
        sum / (sum * sum + ALPHA).sqrt()
    }
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

pub fn classify(text: &str) -> Classification {
    let tokens = tokenize(text);

    let crisis_detected = CRISIS_PHRASES.iter().any(|p| count_phrase(&tokens, p) > 0);
    let compound = round3(compound(&tokens));

    let raw: BTreeMap<&str, usize> = EMOTIONS
        .iter()
        .map(|(emotion, words)| {
            let score = words.iter().map(|w| count_phrase(&tokens, w)).sum();
            (*emotion, score)
        })
        .collect();
    let max = raw.values().copied().max().unwrap_or(0);
    let emotions: BTreeMap<String, f64> = raw
        .iter()
        .map(|(emotion, &score)| {
            let normalized = if max > 0 { round3(score as f64 / max as f64) } else { 0.0 };
            (emotion.to_string(), normalized)
        })
        .collect();

    let mut ranked: Vec<(&String, &f64)> = emotions.iter().filter(|(_, v)| **v > 0.0).collect();
    // Stable sort keeps alphabetical order among equal scores
    ranked.sort_by(|a, b| b.1.total_cmp(a.1));
    let top_emotions = ranked.into_iter().take(3).map(|(k, _)| k.clone()).collect();

    let sentiment = if crisis_detected {
        Sentiment::Concerning
    } else if compound >= 0.05 {
        Sentiment::Positive
    } else if compound <= -0.05 {
        Sentiment::Negative
    } else {
        Sentiment::Neutral
    };

    let crisis_level = if crisis_detected {
        CrisisLevel::Emergency
    } else if compound <= -0.4 {
        CrisisLevel::Medium
    } else {
        CrisisLevel::Low
    };

    Classification {
        sentiment,
        compound,
        crisis_level,
        crisis_detected,
        supportive_response_needed: crisis_detected || compound < 0.0,
        emotions,
        top_emotions,
    }
}

/// POST /api/sentiment
pub async fn analyze(
    payload: Result<Json<SentimentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let text = req
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::validation("Missing text"))?;

    Ok(Json(classify(&text)))
}
