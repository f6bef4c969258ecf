//! Profile snapshot types.
//!
//! A [`Profile`] is the row a profile store returns for a subject, plus the
//! seller verification sub-record when the account is a seller. Snapshots are
//! never mutated after they are fetched: a refresh replaces the whole value.

use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Accepts `null` or a missing field as the default account type.
fn deserialize_account_type<'de, D>(deserializer: D) -> Result<AccountType, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<AccountType>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// Account Type
// =============================================================================

/// Kind of marketplace account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Purchases and retires credits.
    #[default]
    Buyer,
    /// Lists carbon projects for sale; carries a verification record.
    Seller,
    /// Platform operator.
    Admin,
}

/// Review status of a seller verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
    UnderReview,
}

// =============================================================================
// Seller Verification
// =============================================================================

/// Verification documents and review state for a seller account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellerVerification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: VerificationStatus,
    pub company_registration_document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environmental_certification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_documents: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_notes: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub reviewed_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<Uuid>,
}

// =============================================================================
// Profile
// =============================================================================

/// Application-level user profile.
///
/// Deserializes directly from a profile store row. Columns that are not
/// modelled here are kept in [`Profile::extra`] rather than dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Subject identifier; the same id the identity provider puts in `sub`.
    pub id: String,

    /// Primary email address.
    pub email: String,

    /// Account kind. Stored as `type`; `null` means buyer.
    #[serde(
        rename = "type",
        default,
        deserialize_with = "deserialize_account_type"
    )]
    pub account_type: AccountType,

    #[serde(default)]
    pub company_name: String,

    #[serde(default)]
    pub industry: String,

    #[serde(default)]
    pub location: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,

    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,

    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<OffsetDateTime>,

    /// Present only for seller accounts that have submitted verification.
    #[serde(default)]
    pub seller_verification: Option<SellerVerification>,

    /// Store columns without a dedicated field.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Profile {
    /// Creates a minimal buyer profile.
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            account_type: AccountType::Buyer,
            company_name: String::new(),
            industry: String::new(),
            location: String::new(),
            full_name: None,
            phone: None,
            created_at: None,
            updated_at: None,
            seller_verification: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Sets the account type.
    #[must_use]
    pub fn with_account_type(mut self, account_type: AccountType) -> Self {
        self.account_type = account_type;
        self
    }

    /// Attaches a seller verification record.
    #[must_use]
    pub fn with_verification(mut self, verification: SellerVerification) -> Self {
        self.seller_verification = Some(verification);
        self
    }

    /// Returns `true` for seller accounts.
    #[must_use]
    pub fn is_seller(&self) -> bool {
        self.account_type == AccountType::Seller
    }

    /// Drops the verification sub-record from non-seller profiles.
    ///
    /// Stores may join the verification table unconditionally; only sellers
    /// carry a verification record in the resolved profile.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if !self.is_seller() {
            self.seller_verification = None;
        }
        self
    }
}
