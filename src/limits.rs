/// Most diners a single availability or reservation request may name.
pub const MAX_PARTY_SIZE: usize = 64;

/// Longest accepted raw diner-id list (`"1,2,3"`), in bytes.
pub const MAX_DINER_IDS_LEN: usize = 1024;

/// Longest restriction or endorsement label, in bytes.
pub const MAX_LABEL_LEN: usize = 128;

/// Longest restaurant display name, in bytes.
pub const MAX_NAME_LEN: usize = 256;

/// Half-width of the conflict window around a requested reservation time.
pub const CONFLICT_WINDOW_HOURS: i64 = 2;
