// Domain types - Pure, no I/O, no side effects
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors surfaced to the actor that initiated an operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    InvalidExchange(String),

    #[error("Cannot move {entity} from {from} to {to}")]
    IllegalTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("{0}")]
    UnauthorizedActor(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Dependency failure: {0}")]
    DependencyFailure(String),
}

impl MarketError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_exchange(msg: impl Into<String>) -> Self {
        Self::InvalidExchange(msg.into())
    }
}

/// Current time at the precision the store keeps
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// New types for compile-time safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(pub String);

impl ProfileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwapId(pub String);

impl SwapId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of lowercase wire values, checked at the boundary.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = MarketError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(MarketError::Validation(format!(
                        "Unknown {} '{}'",
                        $label, other
                    ))),
                }
            }
        }
    };
}

text_enum!(Category, "category" {
    Men => "men",
    Women => "women",
    Kids => "kids",
    Unisex => "unisex",
});

text_enum!(Condition, "condition" {
    Excellent => "excellent",
    Good => "good",
    Fair => "fair",
    Poor => "poor",
});

text_enum!(
    /// Moderation state of an item
    ItemStatus, "item status" {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

text_enum!(
    /// Swap state machine
    SwapStatus, "swap status" {
    Pending => "pending",
    Accepted => "accepted",
    Completed => "completed",
    Cancelled => "cancelled",
    Rejected => "rejected",
});

text_enum!(ExchangeKind, "exchange type" {
    DirectSwap => "direct_swap",
    PointRedemption => "point_redemption",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub points: i64,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    /// Validate sign-up fields and build a fresh profile
    pub fn register(
        email: &str,
        display_name: Option<&str>,
        starting_points: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, MarketError> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(MarketError::validation("A valid email address is required"));
        }
        if starting_points < 0 {
            return Err(MarketError::validation("Starting points cannot be negative"));
        }

        Ok(Self {
            id: ProfileId::generate(),
            email: email.to_string(),
            display_name: non_blank(display_name),
            avatar_url: None,
            points: starting_points,
            created_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub owner_id: ProfileId,
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub condition: Condition,
    pub size: Option<String>,
    pub point_value: i64,
    pub status: ItemStatus,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Discoverable by users other than the owner
    pub fn is_visible(&self) -> bool {
        self.status == ItemStatus::Approved && self.is_available
    }

    pub fn is_visible_to(&self, viewer: Option<&ProfileId>) -> bool {
        self.is_visible() || viewer == Some(&self.owner_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemImage {
    pub id: String,
    pub item_id: ItemId,
    pub image_url: String,
    pub is_primary: bool,
    pub position: u32,
    pub created_at: DateTime<Utc>,
}

/// Listing form fields, before an id or point value is assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDraft {
    pub title: String,
    pub description: Option<String>,
    pub category: Category,
    pub condition: Condition,
    pub size: Option<String>,
}

impl ItemDraft {
    pub fn validate(self) -> Result<Self, MarketError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(MarketError::validation("Title is required"));
        }
        if title.chars().count() > 200 {
            return Err(MarketError::validation(
                "Title must be 200 characters or less",
            ));
        }

        Ok(Self {
            title,
            description: non_blank(self.description.as_deref()),
            size: non_blank(self.size.as_deref()),
            ..self
        })
    }

    /// Items always start pending and available
    pub fn into_item(self, owner_id: ProfileId, point_value: i64, now: DateTime<Utc>) -> Item {
        Item {
            id: ItemId::generate(),
            owner_id,
            title: self.title,
            description: self.description,
            category: self.category,
            condition: self.condition,
            size: self.size,
            point_value,
            status: ItemStatus::Pending,
            is_available: true,
            created_at: now,
            updated_at: now,
        }
    }
}

impl ItemStatus {
    /// Transition: pending → approved | rejected
    pub fn moderate(self, decision: ItemStatus) -> Result<ItemStatus, MarketError> {
        if decision == ItemStatus::Pending {
            return Err(MarketError::validation(
                "Moderation decision must be approved or rejected",
            ));
        }
        match self {
            ItemStatus::Pending => Ok(decision),
            from => Err(MarketError::IllegalTransition {
                entity: "item",
                from: from.to_string(),
                to: decision.to_string(),
            }),
        }
    }
}

/// What the requester gives in return. Exactly one payload per kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "exchange_type", rename_all = "snake_case")]
pub enum Exchange {
    DirectSwap { offered_item_id: ItemId },
    PointRedemption { points_used: i64 },
}

impl Exchange {
    pub fn kind(&self) -> ExchangeKind {
        match self {
            Self::DirectSwap { .. } => ExchangeKind::DirectSwap,
            Self::PointRedemption { .. } => ExchangeKind::PointRedemption,
        }
    }

    pub fn offered_item_id(&self) -> Option<&ItemId> {
        match self {
            Self::DirectSwap { offered_item_id } => Some(offered_item_id),
            Self::PointRedemption { .. } => None,
        }
    }

    pub fn points_used(&self) -> Option<i64> {
        match self {
            Self::DirectSwap { .. } => None,
            Self::PointRedemption { points_used } => Some(*points_used),
        }
    }

    /// Rebuild from the nullable column pair, rejecting inconsistent rows
    pub fn from_parts(
        kind: ExchangeKind,
        offered_item_id: Option<ItemId>,
        points_used: Option<i64>,
    ) -> Result<Self, MarketError> {
        match (kind, offered_item_id, points_used) {
            (ExchangeKind::DirectSwap, Some(offered_item_id), None) => {
                Ok(Self::DirectSwap { offered_item_id })
            }
            (ExchangeKind::PointRedemption, None, Some(points_used)) if points_used > 0 => {
                Ok(Self::PointRedemption { points_used })
            }
            (kind, _, _) => Err(MarketError::validation(format!(
                "Inconsistent payload for {} exchange",
                kind
            ))),
        }
    }
}

/// What a requester asks for, before any precondition is checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    Item(ItemId),
    Points,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRequest {
    pub item_id: ItemId,
    pub offer: Offer,
    pub message: Option<String>,
}

impl SwapRequest {
    pub fn new(
        item_id: ItemId,
        kind: ExchangeKind,
        offered_item_id: Option<ItemId>,
        message: Option<&str>,
    ) -> Result<Self, MarketError> {
        let offer = match (kind, offered_item_id) {
            (ExchangeKind::DirectSwap, Some(id)) => Offer::Item(id),
            (ExchangeKind::DirectSwap, None) => {
                return Err(MarketError::validation(
                    "A direct swap needs an offered item",
                ))
            }
            (ExchangeKind::PointRedemption, None) => Offer::Points,
            (ExchangeKind::PointRedemption, Some(_)) => {
                return Err(MarketError::validation(
                    "A point redemption cannot offer an item",
                ))
            }
        };

        Ok(Self {
            item_id,
            offer,
            message: non_blank(message),
        })
    }
}

/// The current actor, passed explicitly into every operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: ProfileId,
}

impl Actor {
    pub fn new(id: ProfileId) -> Self {
        Self { id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Owner,
    Requester,
    Bystander,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Swap {
    pub id: SwapId,
    pub item_id: ItemId,
    pub requester_id: ProfileId,
    pub owner_id: ProfileId,
    #[serde(flatten)]
    pub exchange: Exchange,
    pub status: SwapStatus,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Swap {
    pub fn role_of(&self, actor: &Actor) -> ActorRole {
        if actor.id == self.owner_id {
            ActorRole::Owner
        } else if actor.id == self.requester_id {
            ActorRole::Requester
        } else {
            ActorRole::Bystander
        }
    }
}

/// Check every precondition of a swap request and build the pending swap.
/// `offered` must be the loaded item when the offer is `Offer::Item`.
pub fn open_swap(
    requester: &Profile,
    item: &Item,
    request: SwapRequest,
    offered: Option<&Item>,
    now: DateTime<Utc>,
) -> Result<Swap, MarketError> {
    if requester.id == item.owner_id {
        return Err(MarketError::invalid_exchange(
            "You cannot request your own item",
        ));
    }
    if !item.is_visible() {
        return Err(MarketError::invalid_exchange(
            "This item is not available for exchange",
        ));
    }

    let exchange = match request.offer {
        Offer::Item(offered_id) => {
            let offered = offered
                .filter(|o| o.id == offered_id)
                .ok_or_else(|| MarketError::NotFound(format!("Item {}", offered_id)))?;
            if offered.id == item.id {
                return Err(MarketError::invalid_exchange(
                    "An item cannot be swapped for itself",
                ));
            }
            if offered.owner_id != requester.id {
                return Err(MarketError::invalid_exchange(
                    "You can only offer items you own",
                ));
            }
            if !offered.is_available {
                return Err(MarketError::invalid_exchange(
                    "The offered item is no longer available",
                ));
            }
            if offered.status == ItemStatus::Rejected {
                return Err(MarketError::invalid_exchange(
                    "A rejected item cannot be offered",
                ));
            }
            Exchange::DirectSwap {
                offered_item_id: offered.id.clone(),
            }
        }
        Offer::Points => {
            if item.point_value <= 0 {
                return Err(MarketError::invalid_exchange(
                    "This item cannot be redeemed with points",
                ));
            }
            if requester.points < item.point_value {
                return Err(MarketError::invalid_exchange(format!(
                    "Not enough points: {} needed, {} available",
                    item.point_value, requester.points
                )));
            }
            Exchange::PointRedemption {
                points_used: item.point_value,
            }
        }
    };

    Ok(Swap {
        id: SwapId::generate(),
        item_id: item.id.clone(),
        requester_id: requester.id.clone(),
        owner_id: item.owner_id.clone(),
        exchange,
        status: SwapStatus::Pending,
        message: request.message,
        created_at: now,
        updated_at: now,
    })
}

/// Pure state transitions - no side effects!
impl SwapStatus {
    pub fn next_states(self) -> &'static [SwapStatus] {
        match self {
            Self::Pending => &[Self::Accepted, Self::Cancelled],
            Self::Accepted => &[Self::Completed, Self::Cancelled],
            // Rejected is terminal and has no edge leading into it
            Self::Completed | Self::Cancelled | Self::Rejected => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next_states().is_empty()
    }

    /// Pending or accepted, i.e. still in flight
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }

    /// Edge existence is checked before the actor, so a terminal swap always
    /// reports an illegal transition.
    pub fn transition(self, next: SwapStatus, role: ActorRole) -> Result<SwapStatus, MarketError> {
        if !self.next_states().contains(&next) {
            return Err(MarketError::IllegalTransition {
                entity: "swap",
                from: self.to_string(),
                to: next.to_string(),
            });
        }
        if role != ActorRole::Owner {
            return Err(MarketError::UnauthorizedActor(format!(
                "Only the item owner can move a swap to {}",
                next
            )));
        }
        Ok(next)
    }
}

/// Balance movement from payer to payee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointTransfer {
    pub amount: i64,
}

impl PointTransfer {
    pub fn new(amount: i64) -> Self {
        Self { amount }
    }

    /// Returns (payer_after, payee_after)
    pub fn apply(&self, payer: i64, payee: i64) -> Result<(i64, i64), MarketError> {
        if self.amount <= 0 {
            return Err(MarketError::invalid_exchange(
                "Point transfers must be positive",
            ));
        }
        if payer < self.amount {
            return Err(MarketError::invalid_exchange(format!(
                "Not enough points: {} needed, {} available",
                self.amount, payer
            )));
        }
        let payee_after = payee
            .checked_add(self.amount)
            .ok_or_else(|| MarketError::invalid_exchange("Point balance overflow"))?;
        Ok((payer - self.amount, payee_after))
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(points: i64) -> Profile {
        Profile::register("someone@example.com", Some("Someone"), points, Utc::now()).unwrap()
    }

    fn item_of(owner: &Profile, point_value: i64) -> Item {
        let mut item = ItemDraft {
            title: "Denim jacket".to_string(),
            description: Some("Barely worn".to_string()),
            category: Category::Unisex,
            condition: Condition::Good,
            size: Some("M".to_string()),
        }
        .into_item(owner.id.clone(), point_value, Utc::now());
        item.status = ItemStatus::Approved;
        item
    }

    #[test]
    fn test_visibility_requires_approval_and_availability() {
        let owner = profile(0);
        let mut item = item_of(&owner, 10);

        for status in ItemStatus::ALL {
            for available in [true, false] {
                item.status = *status;
                item.is_available = available;
                assert_eq!(
                    item.is_visible(),
                    *status == ItemStatus::Approved && available
                );
            }
        }
    }

    #[test]
    fn test_owner_sees_own_pending_item() {
        let owner = profile(0);
        let mut item = item_of(&owner, 10);
        item.status = ItemStatus::Pending;

        assert!(item.is_visible_to(Some(&owner.id)));
        assert!(!item.is_visible_to(Some(&ProfileId::new("stranger"))));
        assert!(!item.is_visible_to(None));
    }

    #[test]
    fn test_text_enums_parse_case_insensitively() {
        assert_eq!("Women".parse::<Category>().unwrap(), Category::Women);
        assert_eq!(" poor ".parse::<Condition>().unwrap(), Condition::Poor);
        assert_eq!(
            "point_redemption".parse::<ExchangeKind>().unwrap(),
            ExchangeKind::PointRedemption
        );
        assert!(matches!(
            "vintage".parse::<Condition>(),
            Err(MarketError::Validation(_))
        ));
    }

    #[test]
    fn test_draft_requires_title() {
        let draft = ItemDraft {
            title: "   ".to_string(),
            description: None,
            category: Category::Kids,
            condition: Condition::Fair,
            size: None,
        };
        assert!(matches!(draft.validate(), Err(MarketError::Validation(_))));
    }

    #[test]
    fn test_draft_trims_optional_fields() {
        let draft = ItemDraft {
            title: "  Wool scarf ".to_string(),
            description: Some("  ".to_string()),
            category: Category::Women,
            condition: Condition::Excellent,
            size: Some(" S ".to_string()),
        }
        .validate()
        .unwrap();

        assert_eq!(draft.title, "Wool scarf");
        assert_eq!(draft.description, None);
        assert_eq!(draft.size.as_deref(), Some("S"));
    }

    #[test]
    fn test_valid_swap_transitions() {
        let status = SwapStatus::Pending;
        let status = status
            .transition(SwapStatus::Accepted, ActorRole::Owner)
            .unwrap();
        let status = status
            .transition(SwapStatus::Completed, ActorRole::Owner)
            .unwrap();
        assert!(status.is_terminal());

        assert_eq!(
            SwapStatus::Pending.transition(SwapStatus::Cancelled, ActorRole::Owner),
            Ok(SwapStatus::Cancelled)
        );
        assert_eq!(
            SwapStatus::Accepted.transition(SwapStatus::Cancelled, ActorRole::Owner),
            Ok(SwapStatus::Cancelled)
        );
    }

    #[test]
    fn test_terminal_states_have_no_edges() {
        for from in [SwapStatus::Completed, SwapStatus::Cancelled, SwapStatus::Rejected] {
            for to in SwapStatus::ALL {
                for role in [ActorRole::Owner, ActorRole::Requester, ActorRole::Bystander] {
                    assert!(matches!(
                        from.transition(*to, role),
                        Err(MarketError::IllegalTransition { .. })
                    ));
                }
            }
        }
    }

    #[test]
    fn test_completed_to_accepted_is_illegal() {
        let result = SwapStatus::Completed.transition(SwapStatus::Accepted, ActorRole::Owner);
        assert!(matches!(
            result,
            Err(MarketError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn test_rejected_is_terminal_and_unreachable() {
        assert!(SwapStatus::Rejected.is_terminal());
        assert!(!SwapStatus::Rejected.is_active());
        for from in SwapStatus::ALL {
            assert!(!from.next_states().contains(&SwapStatus::Rejected));
        }
        assert!(matches!(
            SwapStatus::Pending.transition(SwapStatus::Rejected, ActorRole::Owner),
            Err(MarketError::IllegalTransition { .. })
        ));
        assert_eq!("rejected".parse::<SwapStatus>().unwrap(), SwapStatus::Rejected);
    }

    #[test]
    fn test_pending_cannot_skip_to_completed() {
        let result = SwapStatus::Pending.transition(SwapStatus::Completed, ActorRole::Owner);
        assert!(matches!(
            result,
            Err(MarketError::IllegalTransition { .. })
        ));
    }

    #[test]
    fn test_only_owner_moves_swaps() {
        for role in [ActorRole::Requester, ActorRole::Bystander] {
            let result = SwapStatus::Pending.transition(SwapStatus::Accepted, role);
            assert!(matches!(result, Err(MarketError::UnauthorizedActor(_))));
        }
    }

    #[test]
    fn test_point_redemption_requires_balance() {
        let owner = profile(0);
        let requester = profile(15);
        let item = item_of(&owner, 20);

        let request =
            SwapRequest::new(item.id.clone(), ExchangeKind::PointRedemption, None, None).unwrap();
        let result = open_swap(&requester, &item, request, None, Utc::now());

        assert!(matches!(result, Err(MarketError::InvalidExchange(_))));
    }

    #[test]
    fn test_point_redemption_records_point_value() {
        let owner = profile(0);
        let requester = profile(15);
        let item = item_of(&owner, 10);

        let request = SwapRequest::new(
            item.id.clone(),
            ExchangeKind::PointRedemption,
            None,
            Some("  "),
        )
        .unwrap();
        let swap = open_swap(&requester, &item, request, None, Utc::now()).unwrap();

        assert_eq!(swap.status, SwapStatus::Pending);
        assert_eq!(swap.exchange.points_used(), Some(10));
        assert_eq!(swap.exchange.offered_item_id(), None);
        assert_eq!(swap.owner_id, owner.id);
        assert_eq!(swap.message, None);
    }

    #[test]
    fn test_self_swap_rejected() {
        let owner = profile(100);
        let item = item_of(&owner, 10);

        let request =
            SwapRequest::new(item.id.clone(), ExchangeKind::PointRedemption, None, None).unwrap();
        let result = open_swap(&owner, &item, request, None, Utc::now());

        assert!(matches!(result, Err(MarketError::InvalidExchange(_))));
    }

    #[test]
    fn test_direct_swap_checks_offered_item() {
        let owner = profile(0);
        let requester = profile(0);
        let item = item_of(&owner, 10);
        let someone_elses = item_of(&owner, 10);
        let mut mine = item_of(&requester, 10);

        let request = SwapRequest::new(
            item.id.clone(),
            ExchangeKind::DirectSwap,
            Some(someone_elses.id.clone()),
            None,
        )
        .unwrap();
        let result = open_swap(&requester, &item, request, Some(&someone_elses), Utc::now());
        assert!(matches!(result, Err(MarketError::InvalidExchange(_))));

        mine.is_available = false;
        let request = SwapRequest::new(
            item.id.clone(),
            ExchangeKind::DirectSwap,
            Some(mine.id.clone()),
            None,
        )
        .unwrap();
        let result = open_swap(&requester, &item, request.clone(), Some(&mine), Utc::now());
        assert!(matches!(result, Err(MarketError::InvalidExchange(_))));

        mine.is_available = true;
        mine.status = ItemStatus::Rejected;
        let result = open_swap(&requester, &item, request.clone(), Some(&mine), Utc::now());
        assert!(matches!(result, Err(MarketError::InvalidExchange(_))));

        mine.status = ItemStatus::Approved;
        let swap = open_swap(&requester, &item, request, Some(&mine), Utc::now()).unwrap();
        assert_eq!(swap.exchange.offered_item_id(), Some(&mine.id));
        assert_eq!(swap.exchange.points_used(), None);
    }

    #[test]
    fn test_swap_request_payload_must_match_kind() {
        let item_id = ItemId::new("item");
        assert!(SwapRequest::new(item_id.clone(), ExchangeKind::DirectSwap, None, None).is_err());
        assert!(SwapRequest::new(
            item_id,
            ExchangeKind::PointRedemption,
            Some(ItemId::new("other")),
            None
        )
        .is_err());
    }

    #[test]
    fn test_exchange_from_parts_rejects_inconsistent_rows() {
        assert!(Exchange::from_parts(ExchangeKind::PointRedemption, None, Some(0)).is_err());
        assert!(Exchange::from_parts(ExchangeKind::DirectSwap, None, None).is_err());
        assert!(Exchange::from_parts(
            ExchangeKind::DirectSwap,
            Some(ItemId::new("a")),
            Some(5)
        )
        .is_err());
        assert_eq!(
            Exchange::from_parts(ExchangeKind::PointRedemption, None, Some(5)).unwrap(),
            Exchange::PointRedemption { points_used: 5 }
        );
    }

    #[test]
    fn test_point_transfer_conserves_balance() {
        let transfer = PointTransfer::new(10);
        let (payer, payee) = transfer.apply(15, 3).unwrap();
        assert_eq!(payer, 5);
        assert_eq!(payee, 13);
        assert_eq!(payer + payee, 15 + 3);

        assert!(transfer.apply(9, 0).is_err());
        assert!(PointTransfer::new(0).apply(10, 0).is_err());
    }

    #[test]
    fn test_item_moderation() {
        assert_eq!(
            ItemStatus::Pending.moderate(ItemStatus::Approved),
            Ok(ItemStatus::Approved)
        );
        assert!(matches!(
            ItemStatus::Approved.moderate(ItemStatus::Rejected),
            Err(MarketError::IllegalTransition { .. })
        ));
        assert!(matches!(
            ItemStatus::Pending.moderate(ItemStatus::Pending),
            Err(MarketError::Validation(_))
        ));
    }

    #[test]
    fn test_swap_serialization_flattens_exchange() {
        let owner = profile(0);
        let requester = profile(50);
        let item = item_of(&owner, 10);
        let request =
            SwapRequest::new(item.id.clone(), ExchangeKind::PointRedemption, None, None).unwrap();
        let swap = open_swap(&requester, &item, request, None, Utc::now()).unwrap();

        let json = serde_json::to_value(&swap).unwrap();
        assert_eq!(json["exchange_type"], "point_redemption");
        assert_eq!(json["points_used"], 10);
        assert_eq!(json["status"], "pending");

        let back: Swap = serde_json::from_value(json).unwrap();
        assert_eq!(back, swap);
    }
}
