//! Settlement payload: the hex string replicas agree on in
//! TxPreparation, carrying everything needed to execute the Safe
//! transaction.
//!
//! Layout (hex characters):
//!
//! | field | chars |
//! |---|---|
//! | safe_tx_hash | 64 |
//! | ether_value | 64 |
//! | safe_tx_gas | 64 |
//! | to (checksummed, `0x`-prefixed) | 42 |
//! | operation | 2 |
//! | base_gas | 64 |
//! | safe_gas_price | 64 |
//! | gas_token | 42 |
//! | refund_receiver | 42 |
//! | use_flashbots | 64 |
//! | gas_limit | 64 |
//! | raise_on_failed_simulation | 64 |
//! | data | rest |

use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::to_checksum;

use super::builder::TxBatch;
use crate::types::{Operation, SwappingError};

const WORD: usize = 64;
const ADDRESS: usize = 42;
const OPERATION: usize = 2;
const HEADER_LEN: usize = 3 * WORD + ADDRESS + OPERATION + 2 * WORD + 2 * ADDRESS + 3 * WORD;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPayload {
    pub safe_tx_hash: H256,
    pub ether_value: U256,
    pub safe_tx_gas: U256,
    pub to: Address,
    pub operation: Operation,
    pub base_gas: U256,
    pub safe_gas_price: U256,
    pub gas_token: Address,
    pub refund_receiver: Address,
    pub use_flashbots: bool,
    pub gas_limit: U256,
    pub raise_on_failed_simulation: bool,
    pub data: Bytes,
}

impl SettlementPayload {
    /// Payload for an assembled batch: no value, no refund, no gas limits.
    pub fn from_batch(batch: &TxBatch) -> Self {
        Self {
            safe_tx_hash: batch.safe_tx_hash,
            ether_value: U256::zero(),
            safe_tx_gas: U256::zero(),
            to: batch.to,
            operation: batch.operation,
            base_gas: U256::zero(),
            safe_gas_price: U256::zero(),
            gas_token: Address::zero(),
            refund_receiver: Address::zero(),
            use_flashbots: false,
            gas_limit: U256::zero(),
            raise_on_failed_simulation: false,
            data: batch.multisend_data.clone(),
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(HEADER_LEN + self.data.len() * 2);
        out.push_str(&hex::encode(self.safe_tx_hash.as_bytes()));
        out.push_str(&word(self.ether_value));
        out.push_str(&word(self.safe_tx_gas));
        out.push_str(&to_checksum(&self.to, None));
        out.push_str(&format!("{:02x}", self.operation.as_u8()));
        out.push_str(&word(self.base_gas));
        out.push_str(&word(self.safe_gas_price));
        out.push_str(&to_checksum(&self.gas_token, None));
        out.push_str(&to_checksum(&self.refund_receiver, None));
        out.push_str(&word(U256::from(self.use_flashbots as u8)));
        out.push_str(&word(self.gas_limit));
        out.push_str(&word(U256::from(self.raise_on_failed_simulation as u8)));
        out.push_str(&hex::encode(&self.data));
        out
    }

    pub fn decode(payload: &str) -> Result<Self, SwappingError> {
        if payload.len() < HEADER_LEN || !payload.is_ascii() {
            return Err(SwappingError::Settlement(format!(
                "payload of {} chars is shorter than the {HEADER_LEN}-char header",
                payload.len()
            )));
        }

        let mut cursor = Cursor { text: payload, pos: 0 };
        let safe_tx_hash = H256::from_slice(&cursor.hex_bytes(WORD)?);
        let ether_value = cursor.word()?;
        let safe_tx_gas = cursor.word()?;
        let to = cursor.address()?;
        let op = cursor.hex_bytes(OPERATION)?[0];
        let operation = Operation::from_u8(op)
            .ok_or_else(|| SwappingError::Settlement(format!("unknown operation {op}")))?;
        let base_gas = cursor.word()?;
        let safe_gas_price = cursor.word()?;
        let gas_token = cursor.address()?;
        let refund_receiver = cursor.address()?;
        let use_flashbots = !cursor.word()?.is_zero();
        let gas_limit = cursor.word()?;
        let raise_on_failed_simulation = !cursor.word()?.is_zero();
        let data = hex::decode(&payload[cursor.pos..])
            .map_err(|e| SwappingError::Settlement(format!("data: {e}")))?;

        Ok(Self {
            safe_tx_hash,
            ether_value,
            safe_tx_gas,
            to,
            operation,
            base_gas,
            safe_gas_price,
            gas_token,
            refund_receiver,
            use_flashbots,
            gas_limit,
            raise_on_failed_simulation,
            data: Bytes::from(data),
        })
    }
}

fn word(value: U256) -> String {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    hex::encode(buf)
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> &'a str {
        let field = &self.text[self.pos..self.pos + len];
        self.pos += len;
        field
    }

    fn hex_bytes(&mut self, len: usize) -> Result<Vec<u8>, SwappingError> {
        let at = self.pos;
        hex::decode(self.take(len))
            .map_err(|e| SwappingError::Settlement(format!("field at {at}: {e}")))
    }

    fn word(&mut self) -> Result<U256, SwappingError> {
        Ok(U256::from_big_endian(&self.hex_bytes(WORD)?))
    }

    fn address(&mut self) -> Result<Address, SwappingError> {
        let at = self.pos;
        self.take(ADDRESS)
            .parse()
            .map_err(|e| SwappingError::Settlement(format!("address at {at}: {e}")))
    }
}
