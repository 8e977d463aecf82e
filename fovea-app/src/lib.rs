//! Fovea app shell
//!
//! Keeps a client in lockstep with a backend curation session: the
//! transport listener consumes the server push channel, the reducer
//! turns snapshots into canonical state plus a URL, the router bridge
//! applies that URL to history, and the setter registry round-trips
//! local edits through the backend.

pub mod mutations;
pub mod queries;
pub mod reducer;
pub mod router;
pub mod session;
pub mod setters;
pub mod store;
pub mod transport;

pub use session::{Session, SessionDeps, SessionHooks};
pub use store::SessionStore;
