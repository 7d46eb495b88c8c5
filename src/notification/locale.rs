//! Message catalog for the languages notifications can be rendered in.

use crate::core::EntityType;
use crate::error::NotifyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Japanese,
}

impl Language {
    /// Parses a recipient language code such as `en` or `ja-JP`.
    pub fn parse(code: &str) -> Option<Self> {
        let primary = code.split(&['-', '_'][..]).next().unwrap_or_default();
        match primary.to_ascii_lowercase().as_str() {
            "en" => Some(Language::English),
            "ja" => Some(Language::Japanese),
            _ => None,
        }
    }
}

/// Keys of the fixed notification texts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    DomainEventHeader,
    FeatureStaleHeader,
    ExperimentRunningHeader,
    MauCountHeader,
    Editor,
    Event,
    Environment,
    Month,
    EventCount,
    UserCount,
    Ends,
}

/// Looks up texts in one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Localizer {
    language: Language,
}

impl Localizer {
    pub fn new(language: &str) -> Result<Self, NotifyError> {
        Language::parse(language)
            .map(|language| Self { language })
            .ok_or_else(|| NotifyError::UnsupportedLanguage(language.to_string()))
    }

    pub fn text(&self, message: Message) -> &'static str {
        use Language::*;
        use Message::*;
        match (self.language, message) {
            (English, DomainEventHeader) => "A change was made",
            (Japanese, DomainEventHeader) => "変更がありました",
            (English, FeatureStaleHeader) => "The following feature flags have not been used for a while.",
            (Japanese, FeatureStaleHeader) => "以下のフィーチャーフラグはしばらく使用されていません。",
            (English, ExperimentRunningHeader) => "The following experiments are still running.",
            (Japanese, ExperimentRunningHeader) => "以下のエクスペリメントは実行中です。",
            (English, MauCountHeader) => "Monthly active users",
            (Japanese, MauCountHeader) => "月間アクティブユーザー",
            (English, Editor) => "Editor",
            (Japanese, Editor) => "編集者",
            (English, Event) => "Event",
            (Japanese, Event) => "イベント",
            (English, Environment) => "Environment",
            (Japanese, Environment) => "環境",
            (English, Month) => "Month",
            (Japanese, Month) => "対象月",
            (English, EventCount) => "Event count",
            (Japanese, EventCount) => "イベント数",
            (English, UserCount) => "User count",
            (Japanese, UserCount) => "ユーザー数",
            (English, Ends) => "ends",
            (Japanese, Ends) => "終了予定",
        }
    }

    /// A human readable name of an entity type.
    pub fn entity_type(&self, entity_type: EntityType) -> &'static str {
        match self.language {
            Language::English => match entity_type {
                EntityType::Feature => "Feature flag",
                EntityType::Goal => "Goal",
                EntityType::Experiment => "Experiment",
                EntityType::Account => "Account",
                EntityType::Apikey => "API key",
                EntityType::Segment => "Segment",
                EntityType::Environment => "Environment",
                EntityType::AdminAccount => "Admin account",
                EntityType::AutoopsRule => "Auto operation",
                EntityType::Push => "Push",
                EntityType::Subscription => "Notification",
                EntityType::AdminSubscription => "Admin notification",
                EntityType::Project => "Project",
                EntityType::Webhook => "Webhook",
                EntityType::ProgressiveRollout => "Progressive rollout",
                EntityType::Organization => "Organization",
                EntityType::FlagTrigger => "Flag trigger",
                EntityType::Tag => "Tag",
                EntityType::CodeRef => "Code reference",
                EntityType::Team => "Team",
                EntityType::Unknown => "Unknown",
            },
            Language::Japanese => match entity_type {
                EntityType::Feature => "フィーチャーフラグ",
                EntityType::Goal => "ゴール",
                EntityType::Experiment => "エクスペリメント",
                EntityType::Account => "アカウント",
                EntityType::Apikey => "APIキー",
                EntityType::Segment => "セグメント",
                EntityType::Environment => "環境",
                EntityType::AdminAccount => "管理者アカウント",
                EntityType::AutoopsRule => "自動オペレーション",
                EntityType::Push => "プッシュ",
                EntityType::Subscription => "通知",
                EntityType::AdminSubscription => "管理者通知",
                EntityType::Project => "プロジェクト",
                EntityType::Webhook => "Webhook",
                EntityType::ProgressiveRollout => "プログレッシブロールアウト",
                EntityType::Organization => "組織",
                EntityType::FlagTrigger => "フラグトリガー",
                EntityType::Tag => "タグ",
                EntityType::CodeRef => "コード参照",
                EntityType::Team => "チーム",
                EntityType::Unknown => "不明",
            },
        }
    }
}
