//! Conversion protocol -- the per-file session state machine and its wire shapes.
//!
//! - [`messages`] - Command enum, control message shapes, endpoint URL
//! - [`chunking`] - Chunk size selection and payload splitting
//! - [`progress`] - Progress bands and the monotonic tracker
//! - [`session`] - [`ProtocolClient`], one session per image

pub mod chunking;
pub mod messages;
pub mod progress;
pub mod session;


pub use chunking::{choose_chunk_size, chunk_count};
pub use messages::{Command, RemoteEvent};
pub use session::{ProtocolClient, SessionOutcome, SessionRequest};
