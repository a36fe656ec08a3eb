//! # Physical Page Allocation
//!
//! Every physical 4 KiB frame of the machine has one [`Page`] record in a
//! flat array, indexed by frame number. The [`PageArena`] hands frames out
//! from a singly linked free list threaded through those records and keeps
//! a reference count per frame.
//!
//! ```text
//!  pages: [ Page0 | Page1 | Page2 | ... | PageN-1 ]
//!                              ▲
//!  free_head ──► PageN-1 ──► ... ──► Page2 ──► ∅
//! ```
//!
//! ## Policy
//!
//! Frames are always pushed at the head of the free list. The boot rebuild
//! walks the records from low to high, so the highest frame is handed out
//! first and low memory stays free the longest.
//!
//! ## Reference counts
//!
//! A frame leaves [`PageArena::alloc`] with a count of zero. Every page-table
//! entry pointing at it holds one reference; [`PageArena::decref`] returns the
//! frame to the free list when the last one goes away.
//!
//! ```rust
//! use kernel_alloc::{Page, PageArena};
//!
//! let mut records = [Page::EMPTY; 4];
//! let mut arena = PageArena::new(&mut records);
//! let page = arena.alloc().unwrap();
//! assert_eq!(page.index(), 3);
//! arena.incref(page);
//! arena.decref(page);
//! assert_eq!(arena.free_count(), 4);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod arena;
mod boot;
pub mod phys_mapper;

pub use crate::arena::{Page, PageArena, PageHandle};
pub use crate::phys_mapper::DirectMap;
