//! Constants and configuration defaults for the radix engine

/// Node is one of the two permanent sentinels of a head.
pub const RJF_ROOT: u8 = 0x02;
/// Node currently represents a live entry.
pub const RJF_ACTIVE: u8 = 0x04;

/// Keys carry their own length in the first byte.
pub const MAX_KEYLEN: usize = u8::MAX as usize;

/// Default size of the zero/one sentinel keys and of every stored key.
pub const DEFAULT_MAX_KEYLEN: usize = 40;

/// Main head skips the length byte; the mask head tests from bit 0.
pub const DEFAULT_KEY_OFFSET_BITS: u16 = 8;
pub const MASK_HEAD_OFFSET_BITS: u16 = 0;

/// Slot value used for the unused child links of a leaf.
pub const NIL_SLOT: u32 = u32::MAX;

/// Metric names
pub const METRIC_ROUTES_ADDED: &str = "radij_routes_added_total";
pub const METRIC_ROUTES_DELETED: &str = "radij_routes_deleted_total";
pub const METRIC_MATCHES: &str = "radij_matches_total";
pub const METRIC_MATCH_MISSES: &str = "radij_match_misses_total";
pub const METRIC_ORPHANED_MASKS: &str = "radij_orphaned_masks_total";
pub const METRIC_MASKS_NOT_ENTERED: &str = "radij_masks_not_entered_total";
pub const METRIC_DESCRIPTORS_IN_USE: &str = "radij_mask_descriptors_in_use";
