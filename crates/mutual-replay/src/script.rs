//! Replay script format
//!
//! A script names the protocol configuration, the pool parameters and a
//! list of timed steps. Each step is one pool entry point called by one
//! account. Commands are externally tagged so that 128-bit amounts parse
//! as plain JSON integers:
//!
//! ```json
//! {
//!   "start": 786240000,
//!   "protocol": { "global_capacity_ratio": 20000, "global_min_price_ratio": 100,
//!                 "products": { "1": { "initial_price_ratio": 1000, "capacity_reduction_ratio": 0 } } },
//!   "pool": { "manager": "manager", "allocator": "cover", "pool_fee": 10, "max_pool_fee": 40 },
//!   "steps": [
//!     { "at": 786240000, "caller": "alice",
//!       "command": { "deposit": { "amount": 1000000000000000000000, "tranche_id": 100 } } }
//!   ]
//! }
//! ```

use mutual_common::{AccountId, AllocationId, AllocationUnits, BucketId, ProductId, Result, Timestamp};
use mutual_staking::{
    AllocationOutcome, AllocationRequest, BurnReceipt, DepositReceipt, DepositRequest,
    ExpirationProgress, ExtendRequest, PartialRelease, PoolParams, ProductParams, StakingPool,
    StaticProtocolConfig, WithdrawReceipt, WithdrawRequest,
};
use serde::{Deserialize, Serialize};

/// A complete replay scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    /// Pool creation time
    pub start: Timestamp,
    #[serde(default)]
    pub protocol: StaticProtocolConfig,
    pub pool: PoolParams,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// One timed call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub at: Timestamp,
    pub caller: AccountId,
    pub command: Command,
}

/// Pool entry points a script can call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Deposit(DepositRequest),
    ExtendDeposit(ExtendRequest),
    Withdraw(WithdrawRequest),
    Allocate(AllocationRequest),
    Deallocate {
        allocation_id: AllocationId,
    },
    BurnStake {
        amount: u128,
        #[serde(default)]
        release: Option<PartialRelease>,
    },
    MintRewards {
        amount: u128,
    },
    StreamRewards {
        amount: u128,
        expiry_bucket: BucketId,
    },
    SetProducts {
        products: Vec<ProductParams>,
    },
    RecalculateEffectiveWeights {
        product_ids: Vec<ProductId>,
    },
    SetPoolFee {
        pool_fee: u8,
    },
    ProcessExpirations {
        #[serde(default)]
        force: bool,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deposit(_) => "deposit",
            Self::ExtendDeposit(_) => "extend_deposit",
            Self::Withdraw(_) => "withdraw",
            Self::Allocate(_) => "allocate",
            Self::Deallocate { .. } => "deallocate",
            Self::BurnStake { .. } => "burn_stake",
            Self::MintRewards { .. } => "mint_rewards",
            Self::StreamRewards { .. } => "stream_rewards",
            Self::SetProducts { .. } => "set_products",
            Self::RecalculateEffectiveWeights { .. } => "recalculate_effective_weights",
            Self::SetPoolFee { .. } => "set_pool_fee",
            Self::ProcessExpirations { .. } => "process_expirations",
        }
    }
}

/// Return value of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Deposited(DepositReceipt),
    Withdrawn(WithdrawReceipt),
    Allocated(AllocationOutcome),
    Released { units: AllocationUnits },
    Burned(BurnReceipt),
    Minted { distributed: bool },
    Streamed { minted: u128 },
    Expirations(ExpirationProgress),
    Done,
}

/// Run one step against the pool
pub fn apply(pool: &mut StakingPool<StaticProtocolConfig>, step: &Step) -> Result<Outcome> {
    let caller = &step.caller;
    let now = step.at;

    let outcome = match &step.command {
        Command::Deposit(request) => Outcome::Deposited(pool.deposit(caller, request.clone(), now)?),
        Command::ExtendDeposit(request) => {
            Outcome::Deposited(pool.extend_deposit(caller, request.clone(), now)?)
        }
        Command::Withdraw(request) => Outcome::Withdrawn(pool.withdraw(caller, request.clone(), now)?),
        Command::Allocate(request) => Outcome::Allocated(pool.allocate(caller, *request, now)?),
        Command::Deallocate { allocation_id } => Outcome::Released {
            units: pool.deallocate(caller, *allocation_id, now)?,
        },
        Command::BurnStake { amount, release } => {
            Outcome::Burned(pool.burn_stake(caller, *amount, *release, now)?)
        }
        Command::MintRewards { amount } => Outcome::Minted {
            distributed: pool.mint_rewards(caller, *amount, now)?,
        },
        Command::StreamRewards {
            amount,
            expiry_bucket,
        } => Outcome::Streamed {
            minted: pool.stream_rewards(caller, *amount, *expiry_bucket, now)?,
        },
        Command::SetProducts { products } => {
            pool.set_products(caller, products, now)?;
            Outcome::Done
        }
        Command::RecalculateEffectiveWeights { product_ids } => {
            pool.recalculate_effective_weights(product_ids, now)?;
            Outcome::Done
        }
        Command::SetPoolFee { pool_fee } => {
            pool.set_pool_fee(caller, *pool_fee, now)?;
            Outcome::Done
        }
        Command::ProcessExpirations { force } => {
            Outcome::Expirations(pool.process_expirations(now, *force)?)
        }
    };
    Ok(outcome)
}
