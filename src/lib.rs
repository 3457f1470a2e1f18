#![no_std]

multiversx_sc::imports!();

pub mod fixed_point;
pub mod types;

use fixed_point::{FixedPointError, Fp64x64};
use types::{Cycle, TickerSymbol, TopThree, Vote, SYMBOL_LENGTH};

// ============================================================
// Contract
// ============================================================

#[multiversx_sc::contract]
pub trait Racer {
    // ========================================================
    // Init / Upgrade
    // ========================================================

    #[init]
    fn init(&self) {}

    #[upgrade]
    fn upgrade(&self) {}

    // ========================================================
    // ENDPOINT: createCycle
    // Opens a voting window [start, start + length] with a fixed
    // per-vote fee. Anyone can create a cycle.
    // ========================================================

    #[endpoint(createCycle)]
    fn create_cycle(&self, start_block: u64, block_length: u64, vote_price: BigUint) -> u64 {
        require!(vote_price > 0u64, "Vote price must be greater than zero");
        let end_block = match start_block.checked_add(block_length) {
            Some(end) => end,
            None => sc_panic!("Cycle end block overflows"),
        };

        let caller = self.blockchain().get_caller();
        let cycle_id = self.next_cycle_id().get();
        let cycle = Cycle {
            id: cycle_id,
            start_block,
            end_block,
            vote_price: vote_price.clone(),
            creator: caller.clone(),
            next_vote_id: 0,
            balance: BigUint::zero(),
        };

        self.cycles(cycle_id).set(&cycle);
        self.next_cycle_id().set(cycle_id + 1);

        self.cycle_created_event(&caller, cycle_id, start_block, block_length, &vote_price);

        cycle_id
    }

    // ========================================================
    // ENDPOINT: placeVote
    // Pays the cycle fee on a symbol. The fee must match exactly;
    // it is escrowed into the cycle pool.
    // ========================================================

    #[endpoint(placeVote)]
    #[payable("EGLD")]
    fn place_vote(&self, cycle_id: u64, symbol: TickerSymbol<Self::Api>) -> u64 {
        let mut cycle = self.require_cycle(cycle_id);

        let now = self.blockchain().get_block_nonce();
        require!(
            now >= cycle.start_block && now <= cycle.end_block,
            "Cycle is not open for voting"
        );

        let payment = self.call_value().egld_value().clone_value();
        require!(
            payment == cycle.vote_price,
            "Wrong vote fee, required: {}",
            (cycle.vote_price)
        );

        let caller = self.blockchain().get_caller();
        let vote_id = cycle.next_vote_id;
        let vote = Vote {
            vote_id,
            symbol: symbol.clone(),
            placer: caller.clone(),
            claimed: false,
            cycle_id,
            placed_at_block: now,
        };

        self.votes(cycle_id, vote_id).set(&vote);
        self.symbol_vote_ids(cycle_id, &symbol).push(&vote_id);
        self.insert_symbol(cycle_id, &symbol);

        cycle.next_vote_id += 1;
        cycle.balance += &payment;
        self.cycles(cycle_id).set(&cycle);

        self.refresh_top_three(cycle_id);

        self.vote_placed_event(&caller, cycle_id, &symbol, vote_id);

        vote_id
    }

    // ========================================================
    // ENDPOINT: claimReward
    // Pays out a single vote of an ended cycle. Guarded against
    // re-entrancy; the claimed flag and the pool deduction are
    // written before the transfer.
    // ========================================================

    #[endpoint(claimReward)]
    fn claim_reward(&self, cycle_id: u64, vote_id: u64) {
        require!(!self.claim_in_progress().get(), "Reentrant call");
        self.claim_in_progress().set(true);

        self.claim_single(cycle_id, vote_id);

        self.claim_in_progress().clear();
    }

    // ========================================================
    // ENDPOINT: batchClaimReward
    // claimReward semantics per id, one guard for the whole batch.
    // Any failure aborts the entire transaction.
    // ========================================================

    #[endpoint(batchClaimReward)]
    fn batch_claim_reward(&self, cycle_id: u64, vote_ids: MultiValueEncoded<u64>) {
        require!(!self.claim_in_progress().get(), "Reentrant call");
        self.claim_in_progress().set(true);

        for vote_id in vote_ids {
            self.claim_single(cycle_id, vote_id);
        }

        self.claim_in_progress().clear();
    }

    // ========================================================
    // VIEW: isClaimAvailable
    // True when the caller could claim this vote right now: the
    // cycle ended, the symbol ranks in the top three, and the
    // late-vote rule points at the caller.
    // ========================================================

    #[view(isClaimAvailable)]
    fn is_claim_available(&self, cycle_id: u64, vote_id: u64) -> bool {
        if self.cycles(cycle_id).is_empty() {
            return false;
        }
        let cycle = self.cycles(cycle_id).get();
        if self.blockchain().get_block_nonce() <= cycle.end_block {
            return false;
        }
        if self.votes(cycle_id, vote_id).is_empty() {
            return false;
        }
        let vote = self.votes(cycle_id, vote_id).get();
        let place = match self.place_of(cycle_id, &vote.symbol) {
            Some(place) => place,
            None => return false,
        };
        match self.entitled_claimer(&cycle, &vote, place) {
            Ok(entitled) => self.blockchain().get_caller() == entitled,
            Err(_) => false,
        }
    }

    // ========================================================
    // INTERNAL: claim execution
    // ========================================================

    fn claim_single(&self, cycle_id: u64, vote_id: u64) {
        let mut cycle = self.require_cycle(cycle_id);

        let now = self.blockchain().get_block_nonce();
        require!(now > cycle.end_block, "Cycle has not ended yet");

        let vote_mapper = self.votes(cycle_id, vote_id);
        require!(!vote_mapper.is_empty(), "Vote does not exist");
        let mut vote = vote_mapper.get();
        require!(!vote.claimed, "Vote already claimed");

        let place = match self.place_of(cycle_id, &vote.symbol) {
            Some(place) => place,
            None => sc_panic!("Vote symbol is not in the top three"),
        };

        let caller = self.blockchain().get_caller();
        let entitled = self.unwrap_fp(self.entitled_claimer(&cycle, &vote, place));
        require!(caller == entitled, "Vote reward is not claimable by caller");

        let reward_amount = self.unwrap_fp(self.calculate_reward(&cycle, &vote, place));
        let reward = BigUint::from(reward_amount);

        // Rounding of the normalization factor can overshoot the pool;
        // the deduction saturates at zero while the full reward is paid.
        if cycle.balance >= reward {
            cycle.balance -= &reward;
        } else {
            cycle.balance = BigUint::zero();
        }
        vote.claimed = true;
        self.votes(cycle_id, vote_id).set(&vote);
        self.cycles(cycle_id).set(&cycle);

        self.send().direct_egld(&caller, &reward);

        self.vote_claimed_event(&caller, cycle_id, &vote.symbol, &reward);
    }

    // ========================================================
    // INTERNAL: symbol index
    // Insertion-ordered set of the symbols observed in a cycle.
    // Positions are one-based and stable for the cycle's lifetime.
    // ========================================================

    fn insert_symbol(&self, cycle_id: u64, symbol: &TickerSymbol<Self::Api>) {
        let position_mapper = self.symbol_position(cycle_id, symbol);
        if position_mapper.is_empty() {
            let position = self.symbol_index(cycle_id).push(symbol);
            position_mapper.set(position as u32);
        }
    }

    // ========================================================
    // INTERNAL: top-three tracker
    // One linear scan over the symbol index in insertion order.
    // A symbol displaces an occupied slot only on a strictly
    // greater vote count, so ties keep the earlier symbol.
    // ========================================================

    fn refresh_top_three(&self, cycle_id: u64) {
        let index = self.symbol_index(cycle_id);
        // slot 0 means empty; positions are one-based
        let mut slots = [0u32; 3];
        let mut counts = [0u64; 3];

        for position in 1..=index.len() {
            let symbol = index.get(position);
            let vote_count = self.symbol_vote_ids(cycle_id, &symbol).len() as u64;

            if slots[0] == 0 || vote_count > counts[0] {
                slots[2] = slots[1];
                counts[2] = counts[1];
                slots[1] = slots[0];
                counts[1] = counts[0];
                slots[0] = position as u32;
                counts[0] = vote_count;
            } else if slots[1] == 0 || vote_count > counts[1] {
                slots[2] = slots[1];
                counts[2] = counts[1];
                slots[1] = position as u32;
                counts[1] = vote_count;
            } else if slots[2] == 0 || vote_count > counts[2] {
                slots[2] = position as u32;
                counts[2] = vote_count;
            }
        }

        let p0 = slots[0];
        let p1 = if slots[1] == 0 { p0 } else { slots[1] };
        let p2 = if slots[2] == 0 { p1 } else { slots[2] };
        self.top_three(cycle_id).set(&TopThree { p0, p1, p2 });
    }

    /// Rank of a symbol within the stored top three, matching aliased
    /// slots to the highest place they stand in for.
    fn place_of(&self, cycle_id: u64, symbol: &TickerSymbol<Self::Api>) -> Option<u8> {
        let top = self.top_three(cycle_id).get();
        let index = self.symbol_index(cycle_id);
        if *symbol == index.get(top.p0 as usize) {
            return Some(0);
        }
        if *symbol == index.get(top.p1 as usize) {
            return Some(1);
        }
        if *symbol == index.get(top.p2 as usize) {
            return Some(2);
        }
        None
    }

    // ========================================================
    // INTERNAL: reward engine
    // All arithmetic in Q64.64; faults surface as contract errors
    // at the endpoint boundary.
    // ========================================================

    /// Normalized position of the vote's block within the cycle, in [0, 1].
    fn timeliness(
        &self,
        cycle: &Cycle<Self::Api>,
        vote: &Vote<Self::Api>,
    ) -> Result<Fp64x64, FixedPointError> {
        Fp64x64::divu(
            vote.placed_at_block - cycle.start_block,
            cycle.end_block - cycle.start_block,
        )
    }

    /// Quadratic timeliness penalty for a given place: early votes on a
    /// winning symbol score close to the curve's maximum, late ones
    /// close to zero.
    fn curve_point(&self, t: Fp64x64, place: u8) -> Result<Fp64x64, FixedPointError> {
        match place {
            0 => t.sub(Fp64x64::ONE)?.pow(2),
            1 => t
                .div(Fp64x64::from_uint(2)?)?
                .sub(Fp64x64::divu(1, 2)?)?
                .pow(2),
            _ => t
                .div(Fp64x64::from_uint(3)?)?
                .sub(Fp64x64::divu(1, 3)?)?
                .pow(2),
        }
    }

    /// Pool divided by total votes.
    fn base_reward(&self, cycle: &Cycle<Self::Api>) -> Result<Fp64x64, FixedPointError> {
        let pool = match cycle.balance.to_u64() {
            Some(value) => value,
            None => return Err(FixedPointError::Overflow),
        };
        Fp64x64::divu(pool, cycle.next_vote_id)
    }

    /// Reciprocal of the average curve point across top-three voters.
    /// The third term is guarded by `p2 != p0`, not `p2 != p1`: with
    /// exactly two distinct symbols the aliased `p2` re-counts rank-2
    /// votes under the third-place curve.
    fn normalization_factor(
        &self,
        cycle: &Cycle<Self::Api>,
    ) -> Result<Fp64x64, FixedPointError> {
        let top = self.top_three(cycle.id).get();
        let index = self.symbol_index(cycle.id);

        let mut sum = self.curve_sum(cycle, &index.get(top.p0 as usize), 0)?;
        if top.p1 != top.p0 {
            sum = sum.add(self.curve_sum(cycle, &index.get(top.p1 as usize), 1)?)?;
        }
        if top.p2 != top.p0 {
            sum = sum.add(self.curve_sum(cycle, &index.get(top.p2 as usize), 2)?)?;
        }

        let average = sum.div(Fp64x64::from_uint(cycle.next_vote_id)?)?;
        Fp64x64::ONE.div(average)
    }

    /// Sum of curve points over every vote of one symbol.
    fn curve_sum(
        &self,
        cycle: &Cycle<Self::Api>,
        symbol: &TickerSymbol<Self::Api>,
        place: u8,
    ) -> Result<Fp64x64, FixedPointError> {
        let mut sum = Fp64x64::ZERO;
        let vote_ids = self.symbol_vote_ids(cycle.id, symbol);
        for i in 1..=vote_ids.len() {
            let vote = self.votes(cycle.id, vote_ids.get(i)).get();
            let t = self.timeliness(cycle, &vote)?;
            sum = sum.add(self.curve_point(t, place)?)?;
        }
        Ok(sum)
    }

    /// Payable amount for one vote: `to_uint(B * phi * N)`. Pure over
    /// post-expiry state; recomputing yields the same value bit-for-bit.
    fn calculate_reward(
        &self,
        cycle: &Cycle<Self::Api>,
        vote: &Vote<Self::Api>,
        place: u8,
    ) -> Result<u64, FixedPointError> {
        let base = self.base_reward(cycle)?;
        let t = self.timeliness(cycle, vote)?;
        let curve = self.curve_point(t, place)?;
        let normalization = self.normalization_factor(cycle)?;
        base.mul(curve)?.mul(normalization)?.to_uint()
    }

    // ========================================================
    // INTERNAL: late-vote rule
    // Second- and third-place votes past their timeliness
    // threshold are claimable by the cycle creator instead of
    // the placer. First place always belongs to the placer.
    // ========================================================

    fn entitled_claimer(
        &self,
        cycle: &Cycle<Self::Api>,
        vote: &Vote<Self::Api>,
        place: u8,
    ) -> Result<ManagedAddress<Self::Api>, FixedPointError> {
        if place == 0 {
            return Ok(vote.placer.clone());
        }
        let t = self.timeliness(cycle, vote)?;
        let threshold = match place {
            1 => Fp64x64::divu(2, 3)?,
            _ => Fp64x64::divu(1, 3)?,
        };
        if t >= threshold {
            Ok(cycle.creator.clone())
        } else {
            Ok(vote.placer.clone())
        }
    }

    // ========================================================
    // INTERNAL: helpers
    // ========================================================

    fn require_cycle(&self, cycle_id: u64) -> Cycle<Self::Api> {
        let mapper = self.cycles(cycle_id);
        require!(!mapper.is_empty(), "Cycle does not exist");
        mapper.get()
    }

    fn unwrap_fp<T>(&self, result: Result<T, FixedPointError>) -> T {
        match result {
            Ok(value) => value,
            Err(FixedPointError::Overflow) => sc_panic!("Fixed point overflow"),
            Err(FixedPointError::DivByZero) => sc_panic!("Fixed point division by zero"),
            Err(FixedPointError::Negative) => sc_panic!("Fixed point negative value"),
        }
    }

    // ========================================================
    // VIEWS — read-only queries
    // ========================================================

    #[view(getCycle)]
    fn get_cycle(&self, cycle_id: u64) -> Cycle<Self::Api> {
        self.require_cycle(cycle_id)
    }

    #[view(getCycleCount)]
    fn get_cycle_count(&self) -> u64 {
        self.next_cycle_id().get()
    }

    #[view(getSymbolVoteCount)]
    fn symbol_vote_count(&self, cycle_id: u64, symbol: TickerSymbol<Self::Api>) -> u64 {
        self.require_cycle(cycle_id);
        self.symbol_vote_ids(cycle_id, &symbol).len() as u64
    }

    #[view(getTotalVoteCount)]
    fn total_vote_count(&self, cycle_id: u64) -> u64 {
        self.require_cycle(cycle_id).next_vote_id
    }

    #[view(getCycleBalance)]
    fn cycle_balance(&self, cycle_id: u64) -> BigUint {
        self.require_cycle(cycle_id).balance
    }

    #[view(getTopThreeSymbols)]
    fn top_three_symbols(
        &self,
        cycle_id: u64,
    ) -> MultiValue3<TickerSymbol<Self::Api>, TickerSymbol<Self::Api>, TickerSymbol<Self::Api>>
    {
        let cycle = self.require_cycle(cycle_id);
        if cycle.next_vote_id == 0 {
            let blank = TickerSymbol::new_from_bytes(&[0u8; SYMBOL_LENGTH]);
            return (blank.clone(), blank.clone(), blank).into();
        }
        let top = self.top_three(cycle_id).get();
        let index = self.symbol_index(cycle_id);
        (
            index.get(top.p0 as usize),
            index.get(top.p1 as usize),
            index.get(top.p2 as usize),
        )
            .into()
    }

    #[view(getVote)]
    fn get_vote(&self, cycle_id: u64, vote_id: u64) -> Vote<Self::Api> {
        self.require_cycle(cycle_id);
        let mapper = self.votes(cycle_id, vote_id);
        require!(!mapper.is_empty(), "Vote does not exist");
        mapper.get()
    }

    #[view(getVotes)]
    fn get_votes(
        &self,
        cycle_id: u64,
        from: u64,
        count: u64,
    ) -> MultiValueEncoded<Vote<Self::Api>> {
        let cycle = self.require_cycle(cycle_id);
        let mut result = MultiValueEncoded::new();
        if count == 0 || from >= cycle.next_vote_id {
            return result;
        }
        let end = core::cmp::min(from.saturating_add(count), cycle.next_vote_id);
        for vote_id in from..end {
            result.push(self.votes(cycle_id, vote_id).get());
        }
        result
    }

    #[view(getSymbols)]
    fn get_symbols(&self, cycle_id: u64) -> MultiValueEncoded<TickerSymbol<Self::Api>> {
        self.require_cycle(cycle_id);
        let mut result = MultiValueEncoded::new();
        let index = self.symbol_index(cycle_id);
        for position in 1..=index.len() {
            result.push(index.get(position));
        }
        result
    }

    // ========================================================
    // EVENTS
    // ========================================================

    #[event("cycleCreated")]
    fn cycle_created_event(
        &self,
        #[indexed] creator: &ManagedAddress,
        #[indexed] cycle_id: u64,
        #[indexed] start_block: u64,
        #[indexed] block_length: u64,
        vote_price: &BigUint,
    );

    #[event("votePlaced")]
    fn vote_placed_event(
        &self,
        #[indexed] placer: &ManagedAddress,
        #[indexed] cycle_id: u64,
        #[indexed] symbol: &TickerSymbol<Self::Api>,
        vote_id: u64,
    );

    #[event("voteClaimed")]
    fn vote_claimed_event(
        &self,
        #[indexed] claimer: &ManagedAddress,
        #[indexed] cycle_id: u64,
        #[indexed] symbol: &TickerSymbol<Self::Api>,
        amount: &BigUint,
    );

    // ========================================================
    // STORAGE
    // ========================================================

    // ── Cycle registry ──

    #[storage_mapper("nextCycleId")]
    fn next_cycle_id(&self) -> SingleValueMapper<u64>;

    #[storage_mapper("cycles")]
    fn cycles(&self, cycle_id: u64) -> SingleValueMapper<Cycle<Self::Api>>;

    // ── Vote store ──

    #[storage_mapper("votes")]
    fn votes(&self, cycle_id: u64, vote_id: u64) -> SingleValueMapper<Vote<Self::Api>>;

    #[storage_mapper("symbolVoteIds")]
    fn symbol_vote_ids(
        &self,
        cycle_id: u64,
        symbol: &TickerSymbol<Self::Api>,
    ) -> VecMapper<u64>;

    // ── Symbol index ──

    #[storage_mapper("symbolIndex")]
    fn symbol_index(&self, cycle_id: u64) -> VecMapper<TickerSymbol<Self::Api>>;

    #[storage_mapper("symbolPosition")]
    fn symbol_position(
        &self,
        cycle_id: u64,
        symbol: &TickerSymbol<Self::Api>,
    ) -> SingleValueMapper<u32>;

    // ── Ranking ──

    #[storage_mapper("topThree")]
    fn top_three(&self, cycle_id: u64) -> SingleValueMapper<TopThree>;

    // ── Re-entrancy guard ──

    #[storage_mapper("claimInProgress")]
    fn claim_in_progress(&self) -> SingleValueMapper<bool>;
}
