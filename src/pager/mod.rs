//! The pager: page cache, allocation, and the persisted free-list on
//! top of the raw file primitive in [`crate::storage`].

mod cache;
mod pager;

pub use pager::Pager;
