//! In-memory repositories. Each store owns its map; nothing outside the
//! store mutates it.

pub mod challenges;
pub mod peers;
pub mod sessions;

pub use challenges::ChallengeRepository;
pub use peers::PeerRepository;
pub use sessions::SessionRepository;
