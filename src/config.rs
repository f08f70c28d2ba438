//! Application-level configuration loading: economy constants, deadlines and worker sizing.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PAIRPLAY_CONFIG_PATH";
/// Default location of the question and challenge catalog.
const DEFAULT_CONTENT_PATH: &str = "config/content.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Queue and pairing policy.
    pub matchmaking: MatchmakingConfig,
    /// 1v1 quiz policy.
    pub quiz: QuizConfig,
    /// Truth-or-dare policy.
    pub tod: TodConfig,
    /// Group game policy.
    pub group: GroupConfig,
    /// Worker pool and sweeper sizing.
    pub dispatch: DispatchConfig,
    /// JSON catalog of questions and challenges.
    pub content_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            matchmaking: MatchmakingConfig::default(),
            quiz: QuizConfig::default(),
            tod: TodConfig::default(),
            group: GroupConfig::default(),
            dispatch: DispatchConfig::default(),
            content_path: PathBuf::from(DEFAULT_CONTENT_PATH),
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        workers = config.dispatch.workers,
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Matchmaking costs and pairing windows.
pub struct MatchmakingConfig {
    /// Coins debited when a search starts.
    pub search_cost: i64,
    /// How long a search may run before it is abandoned with a half refund.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub search_timeout: Duration,
    /// Delay between two candidate lookups of a running search.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
    /// Free interaction window of a fresh pairing.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub pairing_timeout: Duration,
    /// Coins charged per relayed message once the pairing timed out.
    pub message_cost: i64,
    /// Experience granted to both sides when a pairing ends.
    pub end_xp: i64,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            search_cost: 5,
            search_timeout: Duration::from_secs(5 * 60),
            poll_interval: Duration::from_secs(2),
            pairing_timeout: Duration::from_secs(5 * 60),
            message_cost: 1,
            end_xp: 10,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// 1v1 quiz rounds, deadlines and payouts.
pub struct QuizConfig {
    pub rounds: u8,
    pub questions_per_round: u8,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub category_timeout: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub question_timeout: Duration,
    /// Pause between a finished round and the next category prompt. Zero advances inline.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub round_break: Duration,
    /// Non-terminal sessions untouched for this long are timed out by the sweeper.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub inactivity_timeout: Duration,
    pub winner_coins: i64,
    pub winner_xp: i64,
    pub loser_xp: i64,
    pub draw_coins: i64,
    pub draw_xp: i64,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            rounds: 4,
            questions_per_round: 4,
            category_timeout: Duration::from_secs(30),
            question_timeout: Duration::from_secs(25),
            round_break: Duration::from_secs(3),
            inactivity_timeout: Duration::from_secs(10 * 60),
            winner_coins: 100,
            winner_xp: 30,
            loser_xp: 10,
            draw_coins: 50,
            draw_xp: 20,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Truth-or-dare turn policy and economy.
pub struct TodConfig {
    /// Rounds before the game completes; zero plays until someone quits.
    pub max_rounds: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub turn_timeout: Duration,
    /// The deadline warning fires once this close to the deadline.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub warning_lead: Duration,
    /// Reward used when a challenge does not carry its own.
    pub default_coin_reward: i64,
    pub default_xp_reward: i64,
    pub reject_penalty: i64,
    pub winner_coins: i64,
    pub draw_coins: i64,
    pub afk_penalty: i64,
    pub afk_compensation: i64,
    pub quit_penalty: i64,
    pub quit_compensation: i64,
    /// Items of each kind a player owns before their first use.
    pub starter_items: u32,
    /// Unfair verdicts after which the judge is warned.
    pub judge_warning_threshold: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub action_retention: Duration,
}

impl Default for TodConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            turn_timeout: Duration::from_secs(60),
            warning_lead: Duration::from_secs(30),
            default_coin_reward: 10,
            default_xp_reward: 20,
            reject_penalty: 5,
            winner_coins: 50,
            draw_coins: 20,
            afk_penalty: 20,
            afk_compensation: 30,
            quit_penalty: 10,
            quit_compensation: 20,
            starter_items: 1,
            judge_warning_threshold: 3,
            action_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Group game policy.
pub struct GroupConfig {
    /// Coins paid to the turn user when the host confirms the turn.
    pub turn_reward: i64,
    pub min_players: usize,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            turn_reward: 15,
            min_players: 2,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// Dispatch worker pool and background sweep cadence.
pub struct DispatchConfig {
    pub workers: usize,
    /// Bounded inbox size of each worker.
    pub queue_capacity: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub sweep_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            queue_capacity: 256,
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "matchmaking": { "search_cost": 7, "poll_interval": 500 }, "tod": { "max_rounds": 0 } }"#,
        )
        .unwrap();

        assert_eq!(config.matchmaking.search_cost, 7);
        assert_eq!(config.matchmaking.poll_interval, Duration::from_millis(500));
        assert_eq!(config.matchmaking.search_timeout, Duration::from_secs(300));
        assert_eq!(config.tod.max_rounds, 0);
        assert_eq!(config.tod.turn_timeout, Duration::from_secs(60));
        assert_eq!(config.quiz.rounds, 4);
        assert_eq!(config.content_path, PathBuf::from(DEFAULT_CONTENT_PATH));
    }

    #[test]
    fn durations_are_read_in_their_declared_unit() {
        let config: AppConfig = serde_json::from_str(
            r#"{ "quiz": { "question_timeout": 10, "round_break": 0 }, "dispatch": { "sweep_interval": 250 } }"#,
        )
        .unwrap();

        assert_eq!(config.quiz.question_timeout, Duration::from_secs(10));
        assert_eq!(config.quiz.round_break, Duration::ZERO);
        assert_eq!(config.dispatch.sweep_interval, Duration::from_millis(250));
    }

    #[test]
    fn empty_object_yields_defaults() {
        let config: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.group.turn_reward, 15);
        assert_eq!(config.matchmaking.message_cost, 1);
    }
}
