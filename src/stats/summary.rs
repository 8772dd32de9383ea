//! Stats summary normalisation
//!
//! Upstream payloads arrive in several shapes: the raw statistics resource,
//! the `{stats, eligibility}` pair the aggregator produces, the `userStats`
//! document stored by earlier relays, and the compact `{progress, tier, ...,
//! raw}` object UIs send with `DASHBOARD_LOG`. [`normalize`] accepts all of
//! them and yields one [`StatsSummary`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tier label used when the payload carries none
pub const UNKNOWN_TIER: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub progress_percentage: f64,
    pub tier_name: String,
    pub weekly_points: f64,
    pub total_completed_quests: usize,
    pub completed_quest_names: Vec<String>,
}

impl Default for StatsSummary {
    fn default() -> Self {
        Self {
            progress_percentage: 0.0,
            tier_name: UNKNOWN_TIER.to_string(),
            weekly_points: 0.0,
            total_completed_quests: 0,
            completed_quest_names: Vec::new(),
        }
    }
}

impl StatsSummary {
    /// Fold the raw statistics resource
    pub fn from_stats(stats: &Value) -> Self {
        let mut total = 0usize;
        let mut names: Vec<String> = Vec::new();

        let games = stats.get("games").and_then(Value::as_array);
        for game in games.into_iter().flatten() {
            let quests = game.get("quests").and_then(Value::as_array);
            for quest in quests.into_iter().flatten() {
                if !is_completed(quest) {
                    continue;
                }
                total += 1;
                if let Some(name) = quest.get("name").and_then(Value::as_str) {
                    if !name.is_empty() && !names.iter().any(|n| n == name) {
                        names.push(name.to_string());
                    }
                }
            }
        }

        Self {
            progress_percentage: number(stats.get("percentageToNextTier")),
            tier_name: label(stats.get("predictedRarity")),
            weekly_points: number(stats.get("weeklyPoints")),
            total_completed_quests: total,
            completed_quest_names: names,
        }
    }

    /// Read a stored `{userStats, weeklyPoints}` document
    fn from_user_stats(doc: &Value, user_stats: &Value) -> Self {
        let names = string_list(user_stats.get("targetQuestsCompleted"));
        let total = user_stats
            .get("totalInGameQuestsCompleted")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(names.len());
        Self {
            progress_percentage: number(user_stats.get("progressPercentage")),
            tier_name: label(user_stats.get("bucketName")),
            weekly_points: number(doc.get("weeklyPoints")),
            total_completed_quests: total,
            completed_quest_names: dedup(names),
        }
    }

    /// Read the compact UI object when it carries no raw payload
    fn from_compact(doc: &Value) -> Self {
        let names = string_list(doc.get("completed"));
        Self {
            progress_percentage: number(doc.get("progress")),
            tier_name: label(doc.get("tier")),
            weekly_points: number(doc.get("points")),
            total_completed_quests: names.len(),
            completed_quest_names: dedup(names),
        }
    }
}

/// Known eligibility criteria; absent criteria stay `None`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_kyc_exempt: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_not_sybil: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_not_sanctioned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub have_played_any_in_game_quest: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub have_linked_any_social_media: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub have_verified_phone: Option<bool>,
}

impl EligibilityRules {
    /// Criteria are read from `rules` when present, otherwise from the root.
    /// Values are coerced by truthiness; unknown keys are ignored.
    pub fn from_payload(payload: &Value) -> Self {
        let fields = match payload.get("rules") {
            Some(rules) if truthy(rules) => rules,
            _ => payload,
        };
        let Some(map) = fields.as_object() else {
            return Self::default();
        };
        let read = |key: &str| map.get(key).map(truthy);

        Self {
            is_kyc_exempt: read("is_kyc_exempt"),
            is_not_sybil: read("is_not_sybil"),
            is_not_sanctioned: read("is_not_sanctioned"),
            have_played_any_in_game_quest: read("have_played_any_in_game_quest"),
            have_linked_any_social_media: read("have_linked_any_social_media"),
            have_verified_phone: read("have_verified_phone"),
        }
    }

    /// Present criteria as `(key, value)` in display order
    pub fn entries(&self) -> Vec<(&'static str, bool)> {
        [
            ("is_kyc_exempt", self.is_kyc_exempt),
            ("is_not_sybil", self.is_not_sybil),
            ("is_not_sanctioned", self.is_not_sanctioned),
            ("have_played_any_in_game_quest", self.have_played_any_in_game_quest),
            ("have_linked_any_social_media", self.have_linked_any_social_media),
            ("have_verified_phone", self.have_verified_phone),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Summary plus eligibility extracted from one payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub summary: StatsSummary,
    pub eligibility: EligibilityRules,
}

/// Normalise any accepted payload shape
pub fn normalize(payload: &Value) -> Normalized {
    // Compact UI object wrapping the raw pair
    if let Some(raw) = payload.get("raw").filter(|r| r.is_object()) {
        if let Some(stats) = raw.get("stats").filter(|s| s.is_object()) {
            return Normalized {
                summary: StatsSummary::from_stats(stats),
                eligibility: eligibility_of(raw, &["elig", "eligibility"]),
            };
        }
    }

    if let Some(stats) = payload.get("stats").filter(|s| s.is_object()) {
        return Normalized {
            summary: StatsSummary::from_stats(stats),
            eligibility: eligibility_of(payload, &["eligibility", "elig"]),
        };
    }

    if let Some(user_stats) = payload.get("userStats").filter(|s| s.is_object()) {
        return Normalized {
            summary: StatsSummary::from_user_stats(payload, user_stats),
            eligibility: eligibility_of(payload, &["eligibility"]),
        };
    }

    let compact = ["progress", "tier", "points", "completed"]
        .iter()
        .any(|k| payload.get(k).is_some());
    if compact {
        return Normalized {
            summary: StatsSummary::from_compact(payload),
            eligibility: EligibilityRules::default(),
        };
    }

    Normalized {
        summary: StatsSummary::from_stats(payload),
        eligibility: EligibilityRules::default(),
    }
}

fn eligibility_of(container: &Value, keys: &[&str]) -> EligibilityRules {
    keys.iter()
        .find_map(|k| container.get(*k).filter(|v| v.is_object()))
        .map(EligibilityRules::from_payload)
        .unwrap_or_default()
}

/// A quest counts as completed with a completion timestamp or a positive counter
fn is_completed(quest: &Value) -> bool {
    let stamped = quest.get("lastCompletedAt").map(truthy).unwrap_or(false);
    let counted = quest
        .get("timesCompleted")
        .and_then(Value::as_f64)
        .map(|n| n > 0.0)
        .unwrap_or(false);
    stamped || counted
}

fn number(value: Option<&Value>) -> f64 {
    value
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

fn label(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(UNKNOWN_TIER)
        .to_string()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn dedup(names: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !name.is_empty() && !out.contains(&name) {
            out.push(name);
        }
    }
    out
}

/// Loose truthiness of a JSON value
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
