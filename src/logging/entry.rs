//! Log entries
//!
//! One entry per distinct `(token, progress, tier)` observation. The raw
//! token is not part of the entry; only its idempotency key is.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::stats::{normalize, EligibilityRules, StatsSummary};
use crate::store::{Document, Fields, FsValue};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Idempotency key, doubles as the document id
    pub log_id: String,
    pub ip: String,
    pub user_agent: String,
    pub device_type: String,
    pub summary: StatsSummary,
    pub eligibility: EligibilityRules,
    pub weekly_points: f64,
    pub captured_at: DateTime<Utc>,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
}

impl LogEntry {
    /// Create a new entry captured now
    pub fn new(log_id: String, summary: StatsSummary, eligibility: EligibilityRules) -> Self {
        Self {
            log_id,
            ip: crate::stats::UNKNOWN_IP.to_string(),
            user_agent: String::new(),
            device_type: "Desktop".to_string(),
            weekly_points: summary.weekly_points,
            summary,
            eligibility,
            captured_at: Utc::now(),
            user_id: None,
            user_email: None,
        }
    }

    /// Set the caller's public IP
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = ip.into();
        self
    }

    /// Set the reporting agent and device class
    pub fn with_agent(mut self, user_agent: impl Into<String>, device_type: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self.device_type = device_type.into();
        self
    }

    /// Set the signed-in user
    pub fn with_user(mut self, user_id: Option<String>, user_email: Option<String>) -> Self {
        self.user_id = user_id;
        self.user_email = user_email;
        self
    }

    /// Override the capture time
    pub fn captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }

    /// Stats document in the layout earlier relays stored
    fn stats_json(&self) -> Value {
        json!({
            "userStats": {
                "progressPercentage": self.summary.progress_percentage,
                "bucketName": self.summary.tier_name,
                "totalInGameQuestsCompleted": self.summary.total_completed_quests,
                "targetQuestsCompleted": self.summary.completed_quest_names,
            },
            "eligibility": self.eligibility,
            "weeklyPoints": self.weekly_points,
        })
    }

    /// Encode as document fields
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        fields.insert("logId".into(), self.log_id.as_str().into());
        fields.insert("ip".into(), self.ip.as_str().into());
        fields.insert("userAgent".into(), self.user_agent.as_str().into());
        fields.insert("deviceType".into(), self.device_type.as_str().into());
        fields.insert("stats".into(), FsValue::from_json(&self.stats_json()));
        fields.insert(
            "timestamp".into(),
            FsValue::Timestamp(self.captured_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        fields.insert("weeklyPoints".into(), FsValue::from_json(&json!(self.weekly_points)));
        fields.insert(
            "progressPercentage".into(),
            FsValue::from_json(&json!(self.summary.progress_percentage)),
        );
        fields.insert("tier".into(), self.summary.tier_name.as_str().into());
        fields.insert("userId".into(), self.user_id.clone().into());
        fields.insert("userEmail".into(), self.user_email.clone().into());
        fields
    }

    /// Decode a stored document; `None` when it is not a log entry
    pub fn from_document(doc: &Document) -> Option<Self> {
        let stats = doc.get("stats")?.to_json();
        let normalized = normalize(&stats);

        let captured_at = doc
            .get_str("timestamp")
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let text = |field: &str| doc.get_str(field).map(str::to_string);
        let weekly_points = doc
            .get("weeklyPoints")
            .and_then(FsValue::as_f64)
            .unwrap_or(normalized.summary.weekly_points);

        Some(Self {
            log_id: text("logId").unwrap_or_else(|| doc.id().to_string()),
            ip: text("ip").unwrap_or_default(),
            user_agent: text("userAgent").unwrap_or_default(),
            device_type: text("deviceType").unwrap_or_default(),
            summary: normalized.summary,
            eligibility: normalized.eligibility,
            weekly_points,
            captured_at,
            user_id: text("userId"),
            user_email: text("userEmail"),
        })
    }
}
