//! Tandem watch-party runtime
//!
//! Glues the relay, the playback sync coordinator and the peer mesh into a
//! [`Party`]. The [`loopback`] module runs whole rooms in one process.
//!
//! ```rust,ignore
//! let party = Party::new(&config, UserId::generate(), capabilities, factory, observer);
//! party.start(RoomId::from("movie-night"))?;
//! tokio::spawn(Arc::clone(&party).run(relay_texts, page_urls, cancel));
//! ```

pub mod error;
pub mod loopback;
pub mod party;

pub use error::{Error, Result};
pub use party::{Dispatch, Party};
