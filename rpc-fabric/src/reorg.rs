//! The static `MAX_REORG_DISTANCE` table (spec §6).
//!
//! This ships entries for the EVM chains the reference system itself lists
//! support for. A chain that isn't here can still be used if the embedding
//! binary supplies an override via [`crate::config::RegistryConfig::reorg_overrides`];
//! a chain with neither a built-in nor a configured entry is a construction
//! error (spec §7, "no reorg-distance entry").

/// Built-in reorg distances, in blocks. These are deliberately conservative;
/// an operator who has a tighter finality model for a given chain should
/// override via configuration rather than this crate guessing wrong.
pub fn built_in_max_reorg_distance(chain_id: u64) -> Option<u64> {
    match chain_id {
        1 => Some(64),        // Ethereum mainnet, ~2 epochs
        10 => Some(0),        // Optimism, single sequencer, no reorgs expected
        56 => Some(15),       // BNB Smart Chain
        137 => Some(256),     // Polygon PoS, deep reorgs have happened historically
        8453 => Some(0),      // Base, single sequencer
        42161 => Some(0),     // Arbitrum One, single sequencer
        43114 => Some(0),     // Avalanche C-Chain, sub-second finality
        _ => None,
    }
}
