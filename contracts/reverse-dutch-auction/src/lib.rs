#![no_std]
use soroban_sdk::{
    contract, contracterror, contractimpl, contracttype, log, symbol_short, token, Address, Env,
};

#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DataKey {
    SwapCount,
    Swap(u64), // swap_id -> Swap
}

/// A single auction: the seller's offer and the decaying price asked for it.
///
/// Everything except `buyer` is fixed at initiation. `buyer` is written once,
/// by the settlement that fills the swap.
#[contracttype]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Swap {
    pub id: u64,
    pub seller: Address,
    pub sell_asset: Address,
    pub buy_asset: Address,
    pub sell_amount: i128,
    pub start_price: i128,
    /// Price drop per second, 18-decimal fixed point in buy asset units.
    pub decrease_rate: i128,
    pub start_time: u64,
    pub duration: u64,
    pub buyer: Option<Address>,
}

impl Swap {
    pub fn end_time(&self) -> u64 {
        // initiate_swap rejects swaps whose end time overflows.
        self.start_time + self.duration
    }

    pub fn is_filled(&self) -> bool {
        self.buyer.is_some()
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.end_time()
    }

    pub fn status(&self, now: u64) -> SwapStatus {
        if self.is_filled() {
            SwapStatus::Filled
        } else if self.is_expired(now) {
            SwapStatus::Expired
        } else {
            SwapStatus::Open
        }
    }
}

#[contracttype]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SwapStatus {
    Open,
    Filled,
    Expired,
}

#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    /// Filled, expired or never created. Callers cannot tell which.
    SwapEnded = 1,
    InsufficientFunds = 2,
    SwapFailed = 3,
    SwapNotFound = 4,
    InvalidAmount = 5,
    InvalidDuration = 6,
    SameAsset = 7,
    ArithmeticOverflow = 8,
}

/// Fixed point scale of `decrease_rate` (18 decimals).
pub const RATE_SCALE: i128 = 1_000_000_000_000_000_000;

const DAY_IN_LEDGERS: u32 = 17280;
const BUMP_AMOUNT: u32 = 30 * DAY_IN_LEDGERS;
const LIFETIME_THRESHOLD: u32 = BUMP_AMOUNT - DAY_IN_LEDGERS;

#[contract]
pub struct ReverseDutchAuction;

#[contractimpl]
impl ReverseDutchAuction {
    /// Open a new auction for `sell_amount` of `sell_asset`, priced in `buy_asset`.
    ///
    /// The price starts at `start_price` and drops by `decrease_rate / RATE_SCALE`
    /// per second for `duration` seconds. Funds stay with the seller until a buyer
    /// accepts, so the seller only has to hold and approve `sell_amount` here.
    pub fn initiate_swap(
        env: Env,
        seller: Address,
        sell_asset: Address,
        buy_asset: Address,
        sell_amount: i128,
        start_price: i128,
        decrease_rate: i128,
        duration: u64,
    ) -> Result<u64, Error> {
        seller.require_auth();

        // Validate auction parameters
        if sell_amount <= 0 || start_price <= 0 || decrease_rate < 0 {
            return Err(Error::InvalidAmount);
        }
        if duration == 0 {
            return Err(Error::InvalidDuration);
        }
        if sell_asset == buy_asset {
            return Err(Error::SameAsset);
        }

        // Swap::end_time relies on this sum fitting in a u64
        let start_time = env.ledger().timestamp();
        let end_time = start_time
            .checked_add(duration)
            .ok_or(Error::ArithmeticOverflow)?;
        check_decay_bounds(decrease_rate, duration)?;

        // Seller keeps custody, but must be able to deliver
        if !Self::can_spend(&env, &sell_asset, &seller, sell_amount) {
            return Err(Error::InsufficientFunds);
        }

        let swap_id = next_swap_id(&env);
        let swap = Swap {
            id: swap_id,
            seller: seller.clone(),
            sell_asset: sell_asset.clone(),
            buy_asset: buy_asset.clone(),
            sell_amount,
            start_price,
            decrease_rate,
            start_time,
            duration,
            buyer: None,
        };
        write_swap(&env, &swap);

        log!(&env, "swap initiated", swap_id, start_time, end_time);
        env.events().publish(
            (symbol_short!("swap_init"), swap_id),
            (seller, sell_asset, buy_asset, sell_amount, start_price),
        );

        Ok(swap_id)
    }

    /// Current asking price of an open swap.
    pub fn get_current_swap_price(env: Env, swap_id: u64) -> Result<i128, Error> {
        let swap = read_swap(&env, swap_id).ok_or(Error::SwapEnded)?;
        Self::live_price(&env, &swap)
    }

    /// Fill a swap at the current price.
    ///
    /// Moves `sell_amount` of the sell asset from seller to buyer and the current
    /// price of the buy asset from buyer to seller. Returns both amounts. Any
    /// error leaves balances and the swap record untouched.
    pub fn buy_swap(env: Env, swap_id: u64, buyer: Address) -> Result<(i128, i128), Error> {
        buyer.require_auth();

        // Unknown, filled and expired swaps all report SwapEnded
        let mut swap = read_swap(&env, swap_id).ok_or(Error::SwapEnded)?;
        let price = Self::live_price(&env, &swap)?;

        // Check both sides can settle
        if !Self::can_spend(&env, &swap.buy_asset, &buyer, price) {
            return Err(Error::InsufficientFunds);
        }
        if !Self::can_spend(&env, &swap.sell_asset, &swap.seller, swap.sell_amount) {
            return Err(Error::SwapFailed);
        }

        // Mark filled before moving funds
        swap.buyer = Some(buyer.clone());
        write_swap(&env, &swap);

        // Execute both legs
        Self::transfer_leg(&env, &swap.sell_asset, &swap.seller, &buyer, swap.sell_amount)?;
        Self::transfer_leg(&env, &swap.buy_asset, &buyer, &swap.seller, price)?;

        log!(&env, "swap filled", swap_id, price);
        env.events().publish(
            (symbol_short!("swap_fill"), swap_id),
            (buyer, swap.sell_amount, price),
        );

        Ok((swap.sell_amount, price))
    }

    /// Get the stored swap record
    pub fn get_swap(env: Env, swap_id: u64) -> Result<Swap, Error> {
        read_swap(&env, swap_id).ok_or(Error::SwapNotFound)
    }

    /// Get the derived lifecycle state of a swap
    pub fn get_swap_status(env: Env, swap_id: u64) -> Result<SwapStatus, Error> {
        let swap = read_swap(&env, swap_id).ok_or(Error::SwapNotFound)?;
        Ok(swap.status(env.ledger().timestamp()))
    }

    /// Number of swaps created so far, which is also the last assigned id
    pub fn get_swap_count(env: Env) -> u64 {
        extend_instance(&env);
        swap_count(&env)
    }

    fn live_price(env: &Env, swap: &Swap) -> Result<i128, Error> {
        let now = env.ledger().timestamp();
        if swap.is_filled() || swap.is_expired(now) {
            return Err(Error::SwapEnded);
        }
        // now >= start_time always holds once the swap exists.
        current_price(swap.start_price, swap.decrease_rate, now - swap.start_time)
    }

    /// Whether `owner` holds `amount` of `asset` and lets this contract move it.
    fn can_spend(env: &Env, asset: &Address, owner: &Address, amount: i128) -> bool {
        let token_client = token::Client::new(env, asset);
        token_client.balance(owner) >= amount
            && token_client.allowance(owner, &env.current_contract_address()) >= amount
    }

    fn transfer_leg(
        env: &Env,
        asset: &Address,
        from: &Address,
        to: &Address,
        amount: i128,
    ) -> Result<(), Error> {
        // Nothing to move once the price hits the floor
        if amount == 0 {
            return Ok(());
        }
        let token_client = token::Client::new(env, asset);
        match token_client.try_transfer_from(&env.current_contract_address(), from, to, &amount) {
            Ok(Ok(())) => Ok(()),
            _ => Err(Error::SwapFailed),
        }
    }
}

/// Price after `elapsed` seconds of linear decay.
///
/// `start_price - decrease_rate * elapsed / RATE_SCALE`, floored at zero.
fn current_price(start_price: i128, decrease_rate: i128, elapsed: u64) -> Result<i128, Error> {
    let price_drop = decrease_rate
        .checked_mul(elapsed as i128)
        .ok_or(Error::ArithmeticOverflow)?
        .checked_div(RATE_SCALE)
        .ok_or(Error::ArithmeticOverflow)?;

    if price_drop >= start_price {
        return Ok(0);
    }

    start_price
        .checked_sub(price_drop)
        .ok_or(Error::ArithmeticOverflow)
}

/// `decrease_rate * duration` must fit in an `i128`; every in-window
/// `current_price` call is then overflow free.
fn check_decay_bounds(decrease_rate: i128, duration: u64) -> Result<(), Error> {
    decrease_rate
        .checked_mul(duration as i128)
        .map(|_| ())
        .ok_or(Error::ArithmeticOverflow)
}

fn extend_instance(env: &Env) {
    env.storage()
        .instance()
        .extend_ttl(LIFETIME_THRESHOLD, BUMP_AMOUNT);
}

fn swap_count(env: &Env) -> u64 {
    env.storage()
        .instance()
        .get(&DataKey::SwapCount)
        .unwrap_or(0)
}

/// Allocates the next swap id. Ids start at 1 and are never reused.
fn next_swap_id(env: &Env) -> u64 {
    let id = swap_count(env) + 1;
    env.storage().instance().set(&DataKey::SwapCount, &id);
    id
}

/// Reads keep both the contract instance and the record alive.
fn read_swap(env: &Env, swap_id: u64) -> Option<Swap> {
    extend_instance(env);
    let key = DataKey::Swap(swap_id);
    let swap: Option<Swap> = env.storage().persistent().get(&key);
    if swap.is_some() {
        env.storage()
            .persistent()
            .extend_ttl(&key, LIFETIME_THRESHOLD, BUMP_AMOUNT);
    }
    swap
}

fn write_swap(env: &Env, swap: &Swap) {
    extend_instance(env);
    let key = DataKey::Swap(swap.id);
    env.storage().persistent().set(&key, swap);
    env.storage()
        .persistent()
        .extend_ttl(&key, LIFETIME_THRESHOLD, BUMP_AMOUNT);
}
