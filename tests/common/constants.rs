//! Shared constants for integration tests

/// External id of "The Matrix".
pub const MATRIX_EXTERNAL_ID: i64 = 603;
pub const MATRIX_TITLE: &str = "The Matrix";

/// External id of "Fight Club".
pub const FIGHT_CLUB_EXTERNAL_ID: i64 = 550;
pub const FIGHT_CLUB_TITLE: &str = "Fight Club";

pub const HD_URL: &str = "https://autoembed.example/movie/603";
pub const FULL_HD_URL: &str = "https://2embed.example/movie/603";
pub const UHD_URL: &str = "https://embedsu.example/movie/603";

/// Poll interval used while waiting for the scheduler to drain.
pub const IDLE_POLL_MS: u64 = 10;
