//! # Instructions
//!
//! Typed committee instructions and their string-array wire form as carried
//! in beacon block bodies.
//!
//! Every variant is built by a constructor that validates it completely, so
//! the processor only ever sees well-formed instructions. Keys travel as
//! fingerprints and are rebuilt with [`ValidatorKey::from_fingerprint`].
//!
//! | kind | fields |
//! |---|---|
//! | `stake` | keys, `beacon`/`shard`, receivers, auto-stake flags, amounts |
//! | `stopautostake` | keys |
//! | `unstake` | keys |
//! | `swap` | in keys, out keys, chain wire id, `replace`/`normal` |
//! | `assign` | `fingerprint:sid` pairs |
//! | `random` | number, timestamp, nonce |
//! | `slashing` | keys |
//!
//! List fields are comma separated; an empty string is an empty list.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use shared_types::{ChainId, ShardId, ValidatorKey};

use super::errors::InstructionError;

/// Wire form of one instruction.
pub type RawInstruction = Vec<String>;

const STAKE: &str = "stake";
const STOP_AUTO_STAKE: &str = "stopautostake";
const UNSTAKE: &str = "unstake";
const SWAP: &str = "swap";
const ASSIGN: &str = "assign";
const RANDOM: &str = "random";
const SLASHING: &str = "slashing";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StakeChain {
    Beacon,
    Shard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeInstruction {
    pub chain: StakeChain,
    pub public_keys: Vec<ValidatorKey>,
    pub reward_receivers: Vec<String>,
    pub auto_stake: Vec<bool>,
    pub amounts: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapInstruction {
    pub chain: ChainId,
    pub in_keys: Vec<ValidatorKey>,
    pub out_keys: Vec<ValidatorKey>,
    pub is_replace: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomInstruction {
    pub number: u64,
    pub timestamp: i64,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Stake(StakeInstruction),
    StopAutoStake { public_keys: Vec<ValidatorKey> },
    Unstake { public_keys: Vec<ValidatorKey> },
    Swap(SwapInstruction),
    /// Replays placements for keys left in the current-random pool. A
    /// `Random` processed here assigns and drains that pool itself, so this
    /// only moves keys in snapshots restored with a non-empty pool.
    Assign { shard_candidates: Vec<(ValidatorKey, ShardId)> },
    Random(RandomInstruction),
    Slashing { public_keys: Vec<ValidatorKey> },
}

impl Instruction {
    // -------------------------------------------------------------------------
    // Constructors
    // -------------------------------------------------------------------------

    pub fn stake(
        chain: StakeChain,
        public_keys: Vec<ValidatorKey>,
        reward_receivers: Vec<String>,
        auto_stake: Vec<bool>,
        amounts: Vec<u64>,
    ) -> Result<Self, InstructionError> {
        require_keys(STAKE, &public_keys)?;
        let n = public_keys.len();
        if reward_receivers.len() != n || auto_stake.len() != n || amounts.len() != n {
            return Err(InstructionError::LengthMismatch { kind: STAKE });
        }
        if let Some((key, _)) = public_keys.iter().zip(&amounts).find(|(_, amount)| **amount == 0) {
            return Err(InstructionError::ZeroStake(key.fingerprint().clone()));
        }
        Ok(Instruction::Stake(StakeInstruction {
            chain,
            public_keys,
            reward_receivers,
            auto_stake,
            amounts,
        }))
    }

    pub fn stop_auto_stake(public_keys: Vec<ValidatorKey>) -> Result<Self, InstructionError> {
        require_keys(STOP_AUTO_STAKE, &public_keys)?;
        Ok(Instruction::StopAutoStake { public_keys })
    }

    pub fn unstake(public_keys: Vec<ValidatorKey>) -> Result<Self, InstructionError> {
        require_keys(UNSTAKE, &public_keys)?;
        Ok(Instruction::Unstake { public_keys })
    }

    /// A normal swap may leave both lists empty; the processor then applies
    /// whatever the active rule computes.
    pub fn swap(
        chain: ChainId,
        in_keys: Vec<ValidatorKey>,
        out_keys: Vec<ValidatorKey>,
        is_replace: bool,
    ) -> Result<Self, InstructionError> {
        let mut all = in_keys.clone();
        all.extend(out_keys.iter().cloned());
        reject_duplicates(&all)?;
        if is_replace {
            if in_keys.is_empty() {
                return Err(InstructionError::NoKeys { kind: SWAP });
            }
            if in_keys.len() != out_keys.len() {
                return Err(InstructionError::LengthMismatch { kind: SWAP });
            }
        }
        Ok(Instruction::Swap(SwapInstruction {
            chain,
            in_keys,
            out_keys,
            is_replace,
        }))
    }

    pub fn assign(shard_candidates: Vec<(ValidatorKey, ShardId)>) -> Result<Self, InstructionError> {
        let keys: Vec<ValidatorKey> = shard_candidates.iter().map(|(k, _)| k.clone()).collect();
        require_keys(ASSIGN, &keys)?;
        Ok(Instruction::Assign { shard_candidates })
    }

    pub fn random(number: u64, timestamp: i64, nonce: u64) -> Self {
        Instruction::Random(RandomInstruction {
            number,
            timestamp,
            nonce,
        })
    }

    pub fn slashing(public_keys: Vec<ValidatorKey>) -> Result<Self, InstructionError> {
        require_keys(SLASHING, &public_keys)?;
        Ok(Instruction::Slashing { public_keys })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::Stake(_) => STAKE,
            Instruction::StopAutoStake { .. } => STOP_AUTO_STAKE,
            Instruction::Unstake { .. } => UNSTAKE,
            Instruction::Swap(_) => SWAP,
            Instruction::Assign { .. } => ASSIGN,
            Instruction::Random(_) => RANDOM,
            Instruction::Slashing { .. } => SLASHING,
        }
    }

    // -------------------------------------------------------------------------
    // Wire form
    // -------------------------------------------------------------------------

    pub fn from_raw(raw: &[String]) -> Result<Self, InstructionError> {
        let kind = raw.first().ok_or(InstructionError::Empty)?;
        match kind.as_str() {
            STAKE => parse_stake(raw),
            STOP_AUTO_STAKE => Self::stop_auto_stake(parse_keys(field(raw, 1, STOP_AUTO_STAKE, "keys")?)?),
            UNSTAKE => Self::unstake(parse_keys(field(raw, 1, UNSTAKE, "keys")?)?),
            SWAP => parse_swap(raw),
            ASSIGN => parse_assign(raw),
            RANDOM => parse_random(raw),
            SLASHING => Self::slashing(parse_keys(field(raw, 1, SLASHING, "keys")?)?),
            other => Err(InstructionError::UnknownKind(other.to_string())),
        }
    }

    pub fn to_raw(&self) -> RawInstruction {
        match self {
            Instruction::Stake(stake) => vec![
                STAKE.to_string(),
                join_keys(&stake.public_keys),
                match stake.chain {
                    StakeChain::Beacon => "beacon".to_string(),
                    StakeChain::Shard => "shard".to_string(),
                },
                stake.reward_receivers.join(","),
                join_display(&stake.auto_stake),
                join_display(&stake.amounts),
            ],
            Instruction::StopAutoStake { public_keys } => {
                vec![STOP_AUTO_STAKE.to_string(), join_keys(public_keys)]
            }
            Instruction::Unstake { public_keys } => vec![UNSTAKE.to_string(), join_keys(public_keys)],
            Instruction::Swap(swap) => vec![
                SWAP.to_string(),
                join_keys(&swap.in_keys),
                join_keys(&swap.out_keys),
                swap.chain.as_wire().to_string(),
                if swap.is_replace { "replace" } else { "normal" }.to_string(),
            ],
            Instruction::Assign { shard_candidates } => vec![
                ASSIGN.to_string(),
                shard_candidates
                    .iter()
                    .map(|(key, sid)| format!("{}:{}", key.fingerprint(), sid))
                    .collect::<Vec<_>>()
                    .join(","),
            ],
            Instruction::Random(random) => vec![
                RANDOM.to_string(),
                random.number.to_string(),
                random.timestamp.to_string(),
                random.nonce.to_string(),
            ],
            Instruction::Slashing { public_keys } => vec![SLASHING.to_string(), join_keys(public_keys)],
        }
    }
}

// =============================================================================
// Parsers
// =============================================================================

fn parse_stake(raw: &[String]) -> Result<Instruction, InstructionError> {
    let keys = parse_keys(field(raw, 1, STAKE, "keys")?)?;
    let chain = match field(raw, 2, STAKE, "chain")? {
        "beacon" => StakeChain::Beacon,
        "shard" => StakeChain::Shard,
        other => return Err(InstructionError::BadChain(other.to_string())),
    };
    let receivers = split_list(field(raw, 3, STAKE, "reward_receivers")?)
        .map(str::to_string)
        .collect();
    let auto_stake = split_list(field(raw, 4, STAKE, "auto_stake")?)
        .map(|v| match v {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(InstructionError::BadNumber {
                field: "auto_stake",
                value: other.to_string(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let amounts = split_list(field(raw, 5, STAKE, "amounts")?)
        .map(|v| parse_number::<u64>("amounts", v))
        .collect::<Result<Vec<_>, _>>()?;
    Instruction::stake(chain, keys, receivers, auto_stake, amounts)
}

fn parse_swap(raw: &[String]) -> Result<Instruction, InstructionError> {
    let in_keys = parse_keys(field(raw, 1, SWAP, "in_keys")?)?;
    let out_keys = parse_keys(field(raw, 2, SWAP, "out_keys")?)?;
    let wire = field(raw, 3, SWAP, "chain")?;
    let chain = parse_number::<i32>("chain", wire)
        .ok()
        .and_then(ChainId::from_wire)
        .ok_or_else(|| InstructionError::BadChain(wire.to_string()))?;
    let is_replace = match field(raw, 4, SWAP, "mode")? {
        "replace" => true,
        "normal" => false,
        other => return Err(InstructionError::Rejected(format!("unknown swap mode {}", other))),
    };
    Instruction::swap(chain, in_keys, out_keys, is_replace)
}

fn parse_assign(raw: &[String]) -> Result<Instruction, InstructionError> {
    let pairs = split_list(field(raw, 1, ASSIGN, "pairs")?)
        .map(|pair| {
            let (fingerprint, sid) = pair.rsplit_once(':').ok_or_else(|| InstructionError::BadNumber {
                field: "pairs",
                value: pair.to_string(),
            })?;
            let key = ValidatorKey::from_fingerprint(fingerprint)?;
            Ok((key, parse_number::<ShardId>("pairs", sid)?))
        })
        .collect::<Result<Vec<_>, InstructionError>>()?;
    Instruction::assign(pairs)
}

fn parse_random(raw: &[String]) -> Result<Instruction, InstructionError> {
    Ok(Instruction::random(
        parse_number("number", field(raw, 1, RANDOM, "number")?)?,
        parse_number("timestamp", field(raw, 2, RANDOM, "timestamp")?)?,
        parse_number("nonce", field(raw, 3, RANDOM, "nonce")?)?,
    ))
}

fn field<'a>(
    raw: &'a [String],
    index: usize,
    kind: &'static str,
    name: &'static str,
) -> Result<&'a str, InstructionError> {
    raw.get(index)
        .map(String::as_str)
        .ok_or(InstructionError::MissingField { kind, field: name })
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').filter(|item| !item.is_empty())
}

fn parse_keys(value: &str) -> Result<Vec<ValidatorKey>, InstructionError> {
    split_list(value)
        .map(|fp| ValidatorKey::from_fingerprint(fp).map_err(InstructionError::from))
        .collect()
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, InstructionError> {
    value.parse().map_err(|_| InstructionError::BadNumber {
        field,
        value: value.to_string(),
    })
}

fn join_keys(keys: &[ValidatorKey]) -> String {
    keys.iter()
        .map(|key| key.fingerprint().as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn join_display<T: ToString>(values: &[T]) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

fn require_keys(kind: &'static str, keys: &[ValidatorKey]) -> Result<(), InstructionError> {
    if keys.is_empty() {
        return Err(InstructionError::NoKeys { kind });
    }
    reject_duplicates(keys)
}

fn reject_duplicates(keys: &[ValidatorKey]) -> Result<(), InstructionError> {
    let mut seen = HashSet::new();
    match keys.iter().find(|key| !seen.insert(key.fingerprint())) {
        Some(key) => Err(InstructionError::DuplicateKey(key.fingerprint().clone())),
        None => Ok(()),
    }
}
