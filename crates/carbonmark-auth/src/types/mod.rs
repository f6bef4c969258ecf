//! Common types shared across the identity resolution modules.
//!
//! ## Domain Types
//!
//! - [`Profile`] - Application-level user profile snapshot
//! - [`AccountType`] - Buyer, seller, or admin account
//! - [`SellerVerification`] - Verification sub-record attached to seller profiles

pub mod profile;

pub use profile::{AccountType, Profile, SellerVerification, VerificationStatus};
