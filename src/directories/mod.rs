//! External directory clients (§4.D): the identity service (UAA
//! equivalent) and the resource catalog (Cloud Controller equivalent).
//! Both are pluggable audience-resolution collaborators — spec.md §1
//! treats their actual wire implementation as out of scope, so only the
//! trait contract plus a `reqwest`-backed implementation are provided.

mod catalog;
mod identity;

pub use catalog::{CatalogClient, CatalogError, HttpCatalogClient, Membership, Role};
pub use identity::{HttpIdentityClient, IdentityClient, IdentityError, UserInfo};
