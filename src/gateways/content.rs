//! Question and challenge catalog.

use std::{fs, path::Path};

use indexmap::IndexMap;
use rand::seq::{IndexedRandom, SliceRandom};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use utoipa::ToSchema;

use crate::dao::models::{ChallengeSnapshot, ProofKind, TodChoice};

/// Multiple-choice quiz question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Question {
    /// Stable id, referenced by bound rounds.
    pub id: u32,
    pub category: String,
    /// Question shown to both players.
    pub text: String,
    /// Answer choices, in display order.
    pub options: Vec<String>,
    /// Index into `options`.
    pub correct: u8,
}

/// Public view of a question, without the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct QuestionView {
    pub id: u32,
    pub category: String,
    pub text: String,
    pub options: Vec<String>,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id,
            category: question.category.clone(),
            text: question.text.clone(),
            options: question.options.clone(),
        }
    }
}

/// Truth or dare prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Challenge {
    pub id: u32,
    pub kind: TodChoice,
    pub category: String,
    pub text: String,
    #[serde(default = "default_proof")]
    pub proof_kind: ProofKind,
    #[serde(default)]
    pub coin_reward: Option<i64>,
    #[serde(default)]
    pub xp_reward: Option<i64>,
}

fn default_proof() -> ProofKind {
    ProofKind::Text
}

impl Challenge {
    /// Freeze the challenge for a turn, filling missing rewards with the defaults.
    pub fn snapshot(&self, default_coins: i64, default_xp: i64) -> ChallengeSnapshot {
        ChallengeSnapshot {
            id: self.id,
            kind: self.kind,
            text: self.text.clone(),
            proof_kind: self.proof_kind,
            coin_reward: self.coin_reward.unwrap_or(default_coins),
            xp_reward: self.xp_reward.unwrap_or(default_xp),
        }
    }
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("category {category} has {available} questions, {requested} requested")]
    Insufficient {
        category: String,
        available: usize,
        requested: usize,
    },
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse catalog {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Source of questions and challenges.
pub trait ContentProvider: Send + Sync {
    /// Quiz categories in catalog order.
    fn categories(&self) -> Vec<String>;
    /// Random challenge of `kind`, preferring `category` and falling back to any category.
    fn draw_challenge(&self, kind: TodChoice, category: Option<&str>) -> Option<Challenge>;
    /// `count` distinct random questions of `category`.
    fn draw_questions(&self, category: &str, count: usize) -> Result<Vec<Question>, ContentError>;
    /// Questions by id, in the order requested. Unknown ids are skipped.
    fn questions(&self, ids: &[u32]) -> Vec<Question>;
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    questions: Vec<Question>,
    #[serde(default)]
    challenges: Vec<Challenge>,
}

/// Catalog held in memory, grouped by category.
#[derive(Debug, Default)]
pub struct ContentCatalog {
    questions: IndexMap<String, Vec<Question>>,
    challenges: Vec<Challenge>,
}

impl ContentCatalog {
    /// Read the JSON catalog at `path`.
    pub fn load(path: &Path) -> Result<Self, ContentError> {
        let shown = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|source| ContentError::Io {
            path: shown.clone(),
            source,
        })?;
        let file: CatalogFile = serde_json::from_str(&raw).map_err(|source| ContentError::Parse {
            path: shown.clone(),
            source,
        })?;
        let catalog = Self::from_parts(file.questions, file.challenges);
        info!(
            path = %shown,
            categories = catalog.questions.len(),
            challenges = catalog.challenges.len(),
            "loaded content catalog"
        );
        Ok(catalog)
    }

    pub fn from_parts(questions: Vec<Question>, challenges: Vec<Challenge>) -> Self {
        let mut grouped: IndexMap<String, Vec<Question>> = IndexMap::new();
        for question in questions {
            grouped
                .entry(question.category.clone())
                .or_default()
                .push(question);
        }
        Self {
            questions: grouped,
            challenges,
        }
    }
}

impl ContentProvider for ContentCatalog {
    fn categories(&self) -> Vec<String> {
        self.questions.keys().cloned().collect()
    }

    fn draw_challenge(&self, kind: TodChoice, category: Option<&str>) -> Option<Challenge> {
        let mut rng = rand::rng();
        let of_kind: Vec<&Challenge> = self
            .challenges
            .iter()
            .filter(|challenge| challenge.kind == kind)
            .collect();

        let in_category: Vec<&Challenge> = match category {
            Some(category) => of_kind
                .iter()
                .copied()
                .filter(|challenge| challenge.category.eq_ignore_ascii_case(category))
                .collect(),
            None => Vec::new(),
        };

        in_category
            .choose(&mut rng)
            .or_else(|| of_kind.choose(&mut rng))
            .map(|challenge| (*challenge).clone())
    }

    fn draw_questions(&self, category: &str, count: usize) -> Result<Vec<Question>, ContentError> {
        let pool = self
            .questions
            .get(category)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if pool.len() < count {
            return Err(ContentError::Insufficient {
                category: category.to_owned(),
                available: pool.len(),
                requested: count,
            });
        }

        let mut drawn = pool.to_vec();
        drawn.shuffle(&mut rand::rng());
        drawn.truncate(count);
        Ok(drawn)
    }

    fn questions(&self, ids: &[u32]) -> Vec<Question> {
        ids.iter()
            .filter_map(|id| {
                self.questions
                    .values()
                    .flatten()
                    .find(|question| question.id == *id)
                    .cloned()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn question(id: u32, category: &str) -> Question {
        Question {
            id,
            category: category.into(),
            text: format!("question {id}"),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct: 0,
        }
    }

    fn challenge(id: u32, kind: TodChoice, category: &str) -> Challenge {
        Challenge {
            id,
            kind,
            category: category.into(),
            text: format!("challenge {id}"),
            proof_kind: ProofKind::Text,
            coin_reward: None,
            xp_reward: Some(5),
        }
    }

    #[test]
    fn loads_the_shipped_catalog() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/content.json");
        let catalog = ContentCatalog::load(&path).unwrap();
        assert_eq!(catalog.categories().len(), 4);
        assert!(catalog.draw_questions("science", 5).is_ok());
    }

    #[test]
    fn missing_catalog_names_the_path() {
        let err = ContentCatalog::load(Path::new("no/such/content.json")).unwrap_err();
        assert!(matches!(err, ContentError::Io { ref path, .. } if path.ends_with("content.json")));
    }

    #[test]
    fn draws_distinct_questions_of_one_category() {
        let catalog = ContentCatalog::from_parts(
            (1..=6).map(|id| question(id, "science")).chain([question(7, "art")]).collect(),
            Vec::new(),
        );
        let drawn = catalog.draw_questions("science", 4).unwrap();
        let ids: HashSet<_> = drawn.iter().map(|q| q.id).collect();
        assert_eq!(ids.len(), 4);
        assert!(drawn.iter().all(|q| q.category == "science"));
        assert_eq!(catalog.categories(), vec!["science".to_owned(), "art".to_owned()]);
    }

    #[test]
    fn too_small_category_is_refused() {
        let catalog = ContentCatalog::from_parts(vec![question(1, "art")], Vec::new());
        assert!(matches!(
            catalog.draw_questions("art", 4),
            Err(ContentError::Insufficient {
                available: 1,
                requested: 4,
                ..
            })
        ));
    }

    #[test]
    fn challenge_falls_back_to_any_category() {
        let catalog = ContentCatalog::from_parts(
            Vec::new(),
            vec![
                challenge(1, TodChoice::Dare, "party"),
                challenge(2, TodChoice::Truth, "deep"),
            ],
        );
        let drawn = catalog.draw_challenge(TodChoice::Dare, Some("romance")).unwrap();
        assert_eq!(drawn.id, 1);
        assert!(catalog.draw_challenge(TodChoice::Truth, None).is_some());
    }

    #[test]
    fn snapshot_fills_default_rewards() {
        let snapshot = challenge(3, TodChoice::Truth, "deep").snapshot(10, 20);
        assert_eq!(snapshot.coin_reward, 10);
        assert_eq!(snapshot.xp_reward, 5);
    }

    #[test]
    fn lookup_preserves_requested_order() {
        let catalog = ContentCatalog::from_parts(
            vec![question(1, "a"), question(2, "a"), question(3, "b")],
            Vec::new(),
        );
        let ids: Vec<_> = catalog.questions(&[3, 9, 1]).iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![3, 1]);
    }
}
