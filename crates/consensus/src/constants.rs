//! Consensus-wide constants shared across the codec and the script engine.

/// Size of a serialized block header in bytes.
pub const BLOCK_HEADER_SIZE: usize = 80;
/// The maximum allowed weight for a block (BIP141).
pub const MAX_BLOCK_WEIGHT: u32 = 4_000_000;
/// Upper bound on a single archive record; anything larger is treated as corruption.
pub const MAX_BLOCK_SERIALIZED_SIZE: u32 = MAX_BLOCK_WEIGHT;
/// Maximum script size (consensus).
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// Maximum size of a single stack element.
pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
/// Maximum number of non-push operations per script.
pub const MAX_OPS_PER_SCRIPT: usize = 201;
/// Maximum number of public keys per multisig.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;
/// Maximum combined height of the main and alt stacks.
pub const MAX_STACK_SIZE: usize = 1_000;
/// Threshold for nLockTime: below this value it is interpreted as block number,
/// otherwise as UNIX timestamp.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;
/// Setting nSequence to this value for every input disables nLockTime.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;
/// If this flag is set, nSequence is not interpreted as a relative lock-time (BIP68).
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
/// If set, the relative lock-time is time-based, otherwise block-based.
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
/// Mask applied to extract the relative lock-time value.
pub const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;
