multiversx_sc::imports!();
multiversx_sc::derive_imports!();

/// Symbols are opaque four-byte identifiers, compared bitwise.
pub const SYMBOL_LENGTH: usize = 4;

pub type TickerSymbol<M> = ManagedByteArray<M, SYMBOL_LENGTH>;

// ============================================================
// Cycle — a bounded voting window with its escrow pool
// ============================================================

#[type_abi]
#[derive(TopEncode, TopDecode, NestedEncode, NestedDecode, Clone, Debug)]
pub struct Cycle<M: ManagedTypeApi> {
    pub id: u64,
    pub start_block: u64,
    /// `start_block + block_length`; votes are accepted on the closed
    /// interval `[start_block, end_block]`.
    pub end_block: u64,
    pub vote_price: BigUint<M>,
    pub creator: ManagedAddress<M>,
    /// Running vote counter; equals the total number of votes placed.
    pub next_vote_id: u64,
    /// Value escrowed for this cycle, in EGLD.
    pub balance: BigUint<M>,
}

// ============================================================
// Vote — a single fee paid on a symbol at a block height
// ============================================================

#[type_abi]
#[derive(TopEncode, TopDecode, NestedEncode, NestedDecode, Clone, Debug)]
pub struct Vote<M: ManagedTypeApi> {
    pub vote_id: u64,
    pub symbol: TickerSymbol<M>,
    pub placer: ManagedAddress<M>,
    /// Set exactly once, by a successful claim. The only mutable field.
    pub claimed: bool,
    pub cycle_id: u64,
    pub placed_at_block: u64,
}

// ============================================================
// TopThree — positions of the leading symbols
// ============================================================

/// One-based positions into the cycle's symbol index for the symbols
/// currently ranked first, second and third. With fewer than three
/// distinct symbols the unused slots alias the next rank up (one symbol:
/// `p1 = p2 = p0`; two symbols: `p2 = p1`).
#[type_abi]
#[derive(TopEncode, TopDecode, NestedEncode, NestedDecode, Clone, Copy, PartialEq, Debug)]
pub struct TopThree {
    pub p0: u32,
    pub p1: u32,
    pub p2: u32,
}
