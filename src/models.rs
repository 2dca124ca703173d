//! Domain entities and enumerations
//!
//! Durable entities for the community, sharing and sync subsystems. All
//! categorical columns are stored as text; enums here carry the parsing and
//! formatting for them so services can stay on typed values.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Enumerations
// ============================================================================

/// Categorical user interaction with a bookmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    View,
    Click,
    Save,
    Share,
    Like,
    Dismiss,
    Report,
    Follow,
    Unfollow,
}

impl ActionType {
    pub const ALL: &'static [ActionType] = &[
        ActionType::View,
        ActionType::Click,
        ActionType::Save,
        ActionType::Share,
        ActionType::Like,
        ActionType::Dismiss,
        ActionType::Report,
        ActionType::Follow,
        ActionType::Unfollow,
    ];

    /// Significant actions feed trending and the counter columns of
    /// social metrics; the rest are recorded but not aggregated.
    pub fn is_significant(self) -> bool {
        matches!(
            self,
            ActionType::View
                | ActionType::Click
                | ActionType::Save
                | ActionType::Share
                | ActionType::Like
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::View => "view",
            ActionType::Click => "click",
            ActionType::Save => "save",
            ActionType::Share => "share",
            ActionType::Like => "like",
            ActionType::Dismiss => "dismiss",
            ActionType::Report => "report",
            ActionType::Follow => "follow",
            ActionType::Unfollow => "unfollow",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "view" => Ok(ActionType::View),
            "click" => Ok(ActionType::Click),
            "save" => Ok(ActionType::Save),
            "share" => Ok(ActionType::Share),
            "like" => Ok(ActionType::Like),
            "dismiss" => Ok(ActionType::Dismiss),
            "report" => Ok(ActionType::Report),
            "follow" => Ok(ActionType::Follow),
            "unfollow" => Ok(ActionType::Unfollow),
            other => Err(Error::InvalidAction {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trending aggregation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl TimeWindow {
    pub const ALL: &'static [TimeWindow] = &[
        TimeWindow::Hourly,
        TimeWindow::Daily,
        TimeWindow::Weekly,
        TimeWindow::Monthly,
    ];

    /// Window length
    pub fn length(self) -> Duration {
        match self {
            TimeWindow::Hourly => Duration::hours(1),
            TimeWindow::Daily => Duration::hours(24),
            TimeWindow::Weekly => Duration::days(7),
            TimeWindow::Monthly => Duration::days(30),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeWindow::Hourly => "hourly",
            TimeWindow::Daily => "daily",
            TimeWindow::Weekly => "weekly",
            TimeWindow::Monthly => "monthly",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "hourly" => Ok(TimeWindow::Hourly),
            "daily" => Ok(TimeWindow::Daily),
            "weekly" => Ok(TimeWindow::Weekly),
            "monthly" => Ok(TimeWindow::Monthly),
            other => Err(Error::InvalidTimeWindow {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recommendation strategy / reason type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    Collaborative,
    ContentBased,
    Trending,
    Popularity,
    Category,
    Hybrid,
    SimilarUsers,
}

impl Algorithm {
    /// Strategies that may be requested for generation. `SimilarUsers`
    /// only appears as a stored reason type.
    pub const GENERATABLE: &'static [Algorithm] = &[
        Algorithm::Collaborative,
        Algorithm::ContentBased,
        Algorithm::Trending,
        Algorithm::Popularity,
        Algorithm::Category,
        Algorithm::Hybrid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Collaborative => "collaborative",
            Algorithm::ContentBased => "content_based",
            Algorithm::Trending => "trending",
            Algorithm::Popularity => "popularity",
            Algorithm::Category => "category",
            Algorithm::Hybrid => "hybrid",
            Algorithm::SimilarUsers => "similar_users",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "collaborative" => Ok(Algorithm::Collaborative),
            "content_based" => Ok(Algorithm::ContentBased),
            "trending" => Ok(Algorithm::Trending),
            "popularity" => Ok(Algorithm::Popularity),
            "category" => Ok(Algorithm::Category),
            "hybrid" => Ok(Algorithm::Hybrid),
            "similar_users" => Ok(Algorithm::SimilarUsers),
            other => Err(Error::InvalidAlgorithm {
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Follow relationship status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowStatus {
    Active,
    Blocked,
    Muted,
}

impl FollowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FollowStatus::Active => "active",
            FollowStatus::Blocked => "blocked",
            FollowStatus::Muted => "muted",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(FollowStatus::Active),
            "blocked" => Ok(FollowStatus::Blocked),
            "muted" => Ok(FollowStatus::Muted),
            other => Err(Error::InvalidValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for FollowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feed entry provenance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedSourceType {
    Following,
    Trending,
    Recommended,
    All,
}

impl FeedSourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedSourceType::Following => "following",
            FeedSourceType::Trending => "trending",
            FeedSourceType::Recommended => "recommended",
            FeedSourceType::All => "all",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "following" => Ok(FeedSourceType::Following),
            "trending" => Ok(FeedSourceType::Trending),
            "recommended" => Ok(FeedSourceType::Recommended),
            "all" => Ok(FeedSourceType::All),
            other => Err(Error::InvalidValue {
                field: "source_type",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for FeedSourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How broadly a share is exposed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareType {
    Public,
    Private,
    Shared,
    Collaborate,
}

impl ShareType {
    /// Share types whose presence makes the underlying collection forkable
    pub fn allows_forking(self) -> bool {
        matches!(
            self,
            ShareType::Public | ShareType::Shared | ShareType::Collaborate
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShareType::Public => "public",
            ShareType::Private => "private",
            ShareType::Shared => "shared",
            ShareType::Collaborate => "collaborate",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "public" => Ok(ShareType::Public),
            "private" => Ok(ShareType::Private),
            "shared" => Ok(ShareType::Shared),
            "collaborate" => Ok(ShareType::Collaborate),
            other => Err(Error::InvalidValue {
                field: "share_type",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ShareType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission granted by a share or collaboration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharePermission {
    View,
    Comment,
    Edit,
    Admin,
}

impl SharePermission {
    pub fn as_str(self) -> &'static str {
        match self {
            SharePermission::View => "view",
            SharePermission::Comment => "comment",
            SharePermission::Edit => "edit",
            SharePermission::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "view" => Ok(SharePermission::View),
            "comment" => Ok(SharePermission::Comment),
            "edit" => Ok(SharePermission::Edit),
            "admin" => Ok(SharePermission::Admin),
            other => Err(Error::InvalidValue {
                field: "permission",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for SharePermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collaboration invite lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollaboratorStatus {
    Pending,
    Accepted,
    Declined,
}

impl CollaboratorStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CollaboratorStatus::Pending => "pending",
            CollaboratorStatus::Accepted => "accepted",
            CollaboratorStatus::Declined => "declined",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(CollaboratorStatus::Pending),
            "accepted" => Ok(CollaboratorStatus::Accepted),
            "declined" => Ok(CollaboratorStatus::Declined),
            other => Err(Error::InvalidValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for CollaboratorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activity recorded against a share
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    View,
    Comment,
    Edit,
    Fork,
}

impl ActivityType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityType::View => "view",
            ActivityType::Comment => "comment",
            ActivityType::Edit => "edit",
            ActivityType::Fork => "fork",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "view" => Ok(ActivityType::View),
            "comment" => Ok(ActivityType::Comment),
            "edit" => Ok(ActivityType::Edit),
            "fork" => Ok(ActivityType::Fork),
            other => Err(Error::InvalidValue {
                field: "activity_type",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CRUD action carried by a sync event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Create,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncAction::Create => "create",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "create" => Ok(SyncAction::Create),
            "update" => Ok(SyncAction::Update),
            "delete" => Ok(SyncAction::Delete),
            other => Err(Error::InvalidValue {
                field: "action",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource kinds a sync event may reference
pub const SYNC_EVENT_TYPES: &[&str] = &["bookmark", "collection", "tag"];

// ============================================================================
// Entities
// ============================================================================

/// Immutable append-only behavior event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBehavior {
    pub id: i64,
    pub user_id: String,
    pub bookmark_id: i64,
    pub action: ActionType,
    pub duration_secs: i64,
    pub context: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl UserBehavior {
    pub fn validate(&self) -> Result<()> {
        if self.user_id.is_empty() {
            return Err(Error::InvalidUserId);
        }
        if self.bookmark_id <= 0 {
            return Err(Error::InvalidBookmarkId);
        }
        if self.duration_secs < 0 {
            return Err(Error::InvalidValue {
                field: "duration_secs",
                value: self.duration_secs.to_string(),
            });
        }
        Ok(())
    }
}

/// Per-bookmark aggregate counters and derived scores
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SocialMetrics {
    pub bookmark_id: i64,
    pub views: i64,
    pub clicks: i64,
    pub saves: i64,
    pub shares: i64,
    pub likes: i64,
    pub unique_viewers: i64,
    pub engagement_rate: f64,
    pub virality_score: f64,
    pub quality_score: f64,
    pub last_calculated: Option<DateTime<Utc>>,
}

impl SocialMetrics {
    /// Fresh aggregate with zero counters
    pub fn new(bookmark_id: i64) -> Self {
        Self {
            bookmark_id,
            ..Default::default()
        }
    }

    /// Bump the counter matching `action`; non-counter actions are ignored
    pub fn apply(&mut self, action: ActionType) {
        match action {
            ActionType::View => self.views += 1,
            ActionType::Click => self.clicks += 1,
            ActionType::Save => self.saves += 1,
            ActionType::Share => self.shares += 1,
            ActionType::Like => self.likes += 1,
            _ => {}
        }
    }

    /// Recompute engagement rate, virality and quality from the counters.
    ///
    /// engagement = (clicks + saves + shares + likes) / views, 0 when no views
    /// virality   = 2·shares + 1.5·saves
    /// quality    = 0.6·engagement + 0.4·(likes / views), 0 when no views
    pub fn recompute_derived(&mut self) {
        if self.views > 0 {
            let views = self.views as f64;
            let interactions = (self.clicks + self.saves + self.shares + self.likes) as f64;
            self.engagement_rate = interactions / views;
            self.quality_score =
                0.6 * self.engagement_rate + 0.4 * (self.likes as f64 / views);
        } else {
            self.engagement_rate = 0.0;
            self.quality_score = 0.0;
        }
        self.virality_score = 2.0 * self.shares as f64 + 1.5 * self.saves as f64;
    }
}

/// Per-bookmark, per-window trending aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingBookmark {
    pub id: i64,
    pub bookmark_id: i64,
    pub views: i64,
    pub clicks: i64,
    pub saves: i64,
    pub shares: i64,
    pub likes: i64,
    pub trending_score: f64,
    pub time_window: TimeWindow,
    pub calculated_at: DateTime<Utc>,
}

/// A stored recommendation for a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkRecommendation {
    pub id: i64,
    pub user_id: String,
    pub bookmark_id: i64,
    pub score: f64,
    pub reason_type: Algorithm,
    pub reason_data: serde_json::Value,
    pub viewed: bool,
    pub clicked: bool,
    pub dismissed: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl BookmarkRecommendation {
    pub fn validate(&self) -> Result<()> {
        if self.user_id.is_empty() {
            return Err(Error::InvalidUserId);
        }
        if self.bookmark_id <= 0 {
            return Err(Error::InvalidBookmarkId);
        }
        if !(0.0..=1.0).contains(&self.score) {
            return Err(Error::InvalidScore { value: self.score });
        }
        Ok(())
    }
}

/// Follow edge between two users
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFollow {
    pub id: i64,
    pub follower_id: String,
    pub followee_id: String,
    pub status: FollowStatus,
    pub created_at: DateTime<Utc>,
}

impl UserFollow {
    pub fn validate(&self) -> Result<()> {
        if self.follower_id.is_empty() || self.followee_id.is_empty() {
            return Err(Error::InvalidUserId);
        }
        if self.follower_id == self.followee_id {
            return Err(Error::CannotFollowSelf);
        }
        Ok(())
    }
}

/// Materialized feed entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFeedEntry {
    pub id: i64,
    pub user_id: String,
    pub bookmark_id: i64,
    pub source_type: FeedSourceType,
    pub source_id: Option<String>,
    pub score: f64,
    pub position: i32,
    pub viewed: bool,
    pub clicked: bool,
    pub created_at: DateTime<Utc>,
}

/// A share of a collection, resolvable by its token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionShare {
    pub id: i64,
    pub user_id: String,
    pub collection_id: i64,
    pub token: String,
    pub share_type: ShareType,
    pub permission: SharePermission,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Argon2id PHC string; never the plaintext password
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub view_count: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CollectionShare {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }
}

/// Pending or resolved collaboration invite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionCollaborator {
    pub id: i64,
    pub collection_id: i64,
    pub user_id: String,
    pub inviter_id: String,
    pub permission: SharePermission,
    pub status: CollaboratorStatus,
    pub message: Option<String>,
    pub invited_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

/// Record of a collection fork
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionFork {
    pub id: i64,
    pub original_collection_id: i64,
    pub forked_collection_id: i64,
    pub user_id: String,
    pub fork_reason: Option<String>,
    pub preserve_bookmarks: bool,
    pub preserve_structure: bool,
    pub created_at: DateTime<Utc>,
}

/// Append-only share activity record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareActivity {
    pub id: i64,
    pub share_id: i64,
    pub user_id: Option<String>,
    pub activity: ActivityType,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A change flowing through the sync fabric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: i64,
    pub user_id: String,
    pub event_type: String,
    pub resource_id: String,
    pub action: SyncAction,
    pub device_id: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Change captured while a device was offline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineQueuedChange {
    pub id: i64,
    pub user_id: String,
    pub device_id: String,
    pub event_type: String,
    pub resource_id: String,
    pub action: SyncAction,
    pub payload: serde_json::Value,
    pub queued_at: DateTime<Utc>,
}

/// Per-device sync checkpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub user_id: String,
    pub device_id: String,
    pub last_sync_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip() {
        for action in ActionType::ALL {
            assert_eq!(ActionType::parse(action.as_str()).unwrap(), *action);
        }
        assert!(ActionType::parse("purchase").is_err());
    }

    #[test]
    fn test_significant_actions() {
        assert!(ActionType::View.is_significant());
        assert!(ActionType::Like.is_significant());
        assert!(!ActionType::Dismiss.is_significant());
        assert!(!ActionType::Report.is_significant());
        assert!(!ActionType::Follow.is_significant());
    }

    #[test]
    fn test_window_lengths() {
        assert_eq!(TimeWindow::Hourly.length(), Duration::hours(1));
        assert_eq!(TimeWindow::Daily.length(), Duration::hours(24));
        assert_eq!(TimeWindow::Weekly.length(), Duration::days(7));
        assert_eq!(TimeWindow::Monthly.length(), Duration::days(30));
    }

    #[test]
    fn test_metrics_derived_fields() {
        let mut metrics = SocialMetrics::new(42);
        for _ in 0..3 {
            metrics.apply(ActionType::View);
        }
        metrics.apply(ActionType::Share);
        metrics.recompute_derived();

        assert_eq!(metrics.views, 3);
        assert_eq!(metrics.shares, 1);
        assert!((metrics.engagement_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((metrics.virality_score - 2.0).abs() < 1e-9);
        assert!((metrics.quality_score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_zero_views() {
        let mut metrics = SocialMetrics::new(1);
        metrics.apply(ActionType::Like);
        metrics.recompute_derived();
        assert_eq!(metrics.engagement_rate, 0.0);
        assert_eq!(metrics.quality_score, 0.0);
    }

    #[test]
    fn test_non_counter_actions_leave_counters_untouched() {
        let mut metrics = SocialMetrics::new(7);
        metrics.apply(ActionType::Dismiss);
        metrics.apply(ActionType::Report);
        assert_eq!(metrics.views + metrics.clicks + metrics.saves, 0);
    }

    #[test]
    fn test_self_follow_rejected() {
        let follow = UserFollow {
            id: 0,
            follower_id: "u-1".to_string(),
            followee_id: "u-1".to_string(),
            status: FollowStatus::Active,
            created_at: Utc::now(),
        };
        assert!(matches!(follow.validate(), Err(Error::CannotFollowSelf)));
    }

    #[test]
    fn test_recommendation_score_bounds() {
        let mut rec = BookmarkRecommendation {
            id: 0,
            user_id: "u-1".to_string(),
            bookmark_id: 1,
            score: 0.5,
            reason_type: Algorithm::Trending,
            reason_data: serde_json::json!({}),
            viewed: false,
            clicked: false,
            dismissed: false,
            expires_at: Utc::now(),
            created_at: Utc::now(),
        };
        assert!(rec.validate().is_ok());
        rec.score = 1.0000001;
        assert!(matches!(rec.validate(), Err(Error::InvalidScore { .. })));
    }

    #[test]
    fn test_share_expiry() {
        let now = Utc::now();
        let share = CollectionShare {
            id: 1,
            user_id: "u-1".to_string(),
            collection_id: 7,
            token: "ab".repeat(16),
            share_type: ShareType::Public,
            permission: SharePermission::View,
            title: None,
            description: None,
            password_hash: None,
            expires_at: Some(now - Duration::seconds(1)),
            view_count: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(share.is_expired(now));
    }

    #[test]
    fn test_fork_gate_share_types() {
        assert!(ShareType::Public.allows_forking());
        assert!(ShareType::Shared.allows_forking());
        assert!(ShareType::Collaborate.allows_forking());
        assert!(!ShareType::Private.allows_forking());
    }
}
