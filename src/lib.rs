//! Asynchronous client for the Lightweight Directory Access Protocol,
//! version 3 (RFC 4511).
//!
//! A connection is opened with one of the [`LdapConnAsync`](struct.LdapConnAsync.html)
//! constructors and driven on its own task, while the accompanying
//! [`Ldap`](struct.Ldap.html) handle submits operations: Bind, Search, Add,
//! Delete, Modify, ModifyDN, Compare, Abandon, and Extended. Operations
//! submitted concurrently are multiplexed over the single connection and
//! matched to server responses by message ID, so responses may resolve in
//! any order; a Search yields its entries through a
//! [`SearchStream`](struct.SearchStream.html) as they arrive.

pub type RequestId = i32;

pub mod asn1 {
    //! ASN.1 structure construction and parsing.
    //!
    //! These are re-exports from the BER crate, needed when implementing
    //! a custom control or extended operation.
    pub use berkit::common::TagClass;
    pub use berkit::parse::{parse_tag, parse_uint};
    pub use berkit::structure::{StructureTag, PL};
    pub use berkit::structures::{
        ASNTag, Boolean, Enumerated, ExplicitTag, Integer, Null, OctetString, Sequence, Set, Tag,
    };
    pub use berkit::universal::Types;
    pub use berkit::write;
}

mod abandon;
mod add;
mod bind;
mod compare;
mod conn;
pub mod controls;
mod delete;
pub mod exop;
mod extended;
mod filter;
mod ldap;
mod modify;
mod modifydn;
mod protocol;
pub mod result;
mod search;
mod unbind;
mod util;

pub use conn::{LdapConnAsync, LdapConnSettings};
pub use filter::Filter;
pub use ldap::Ldap;
pub use modify::Mod;
pub use result::{
    CompareResult, ExopResult, LdapError, LdapResult, Result, SearchResult,
};
pub use search::{
    parse_refs, DerefAliases, ResultEntry, Scope, SearchEntry, SearchOptions, SearchStream,
};
pub use util::ldap_escape;

/// Drive a connection on a spawned task, logging the terminating error,
/// if any.
#[macro_export]
macro_rules! drive {
    ($conn:expr) => {
        tokio::spawn(async move {
            if let Err(e) = $conn.drive().await {
                log::warn!("LDAP connection error: {}", e);
            }
        })
    };
}
