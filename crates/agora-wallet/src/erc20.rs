//! ERC-20 Transfer decode and transfer-calldata encode for the canonical
//! token contract.

use ethabi::ethereum_types::{H160, H256, U256};
use ethabi::{Event, EventParam, ParamType, RawLog, Token};

use agora_core::{MarketError, UsdcUnits};

use crate::evm::Receipt;

/// One decoded `Transfer(from, to, value)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erc20Transfer {
    /// EIP-55 is not required here; comparisons are case-insensitive.
    pub from: String,
    pub to: String,
    pub value: UsdcUnits,
}

fn transfer_event() -> Event {
    Event {
        name: "Transfer".into(),
        inputs: vec![
            EventParam { name: "from".into(), kind: ParamType::Address, indexed: true },
            EventParam { name: "to".into(), kind: ParamType::Address, indexed: true },
            EventParam { name: "value".into(), kind: ParamType::Uint(256), indexed: false },
        ],
        anonymous: false,
    }
}

fn parse_h256(s: &str) -> Result<H256, MarketError> {
    let bytes = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| MarketError::ChainTx(format!("bad log topic: {e}")))?;
    if bytes.len() != 32 {
        return Err(MarketError::ChainTx("bad log topic length".into()));
    }
    Ok(H256::from_slice(&bytes))
}

fn h160_hex(address: H160) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

/// Decode every Transfer emitted by `token_contract` in the receipt. Events
/// from other contracts and non-Transfer logs are skipped.
pub fn decode_transfers(
    receipt: &Receipt,
    token_contract: &str,
) -> Result<Vec<Erc20Transfer>, MarketError> {
    let event = transfer_event();
    let topic0 = event.signature();
    let token = token_contract.to_lowercase();

    let mut transfers = Vec::new();
    for log in &receipt.logs {
        if log.address.to_lowercase() != token {
            continue;
        }
        let topics: Vec<H256> = log
            .topics
            .iter()
            .map(|t| parse_h256(t))
            .collect::<Result<_, _>>()?;
        if topics.first() != Some(&topic0) {
            continue;
        }
        let data = hex::decode(log.data.trim_start_matches("0x"))
            .map_err(|e| MarketError::ChainTx(format!("bad log data: {e}")))?;
        let parsed = event
            .parse_log(RawLog { topics, data })
            .map_err(|e| MarketError::ChainTx(format!("undecodable Transfer log: {e}")))?;

        let mut from = None;
        let mut to = None;
        let mut value = None;
        for param in parsed.params {
            match (param.name.as_str(), param.value) {
                ("from", Token::Address(a)) => from = Some(h160_hex(a)),
                ("to", Token::Address(a)) => to = Some(h160_hex(a)),
                ("value", Token::Uint(v)) => value = Some(v),
                _ => {}
            }
        }
        let (from, to, value) = match (from, to, value) {
            (Some(f), Some(t), Some(v)) => (f, t, v),
            _ => return Err(MarketError::ChainTx("incomplete Transfer log".into())),
        };
        if value > U256::from(u64::MAX) {
            return Err(MarketError::ChainTx("transfer amount out of range".into()));
        }
        transfers.push(Erc20Transfer { from, to, value: UsdcUnits(value.as_u64()) });
    }
    Ok(transfers)
}

/// ABI-encoded calldata for `transfer(to, value)`.
pub fn transfer_calldata(to: &[u8; 20], value: UsdcUnits) -> Vec<u8> {
    let selector = ethabi::short_signature(
        "transfer",
        &[ParamType::Address, ParamType::Uint(256)],
    );
    let args = ethabi::encode(&[
        Token::Address(H160::from_slice(to)),
        Token::Uint(U256::from(value.0)),
    ]);
    let mut calldata = selector.to_vec();
    calldata.extend_from_slice(&args);
    calldata
}
