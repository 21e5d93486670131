//! Contacts
//!
//! Phone number normalization, recipient addresses, address-book
//! reconciliation and segment tags.

mod address;
mod reconcile;
mod segments;

pub use address::{
    RecipientAddress, USER_DOMAIN, is_international, is_valid_number, normalize_number,
    strip_international_prefix,
};
pub use reconcile::{Contact, RawContact, reconcile};
pub use segments::SegmentStore;
