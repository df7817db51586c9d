//! Bridge event types and parsing
//!
//! Decodes the two logs the bridge flows depend on:
//! - `NewPriorityRequest` emitted by the diamond proxy on L1 for every deposit,
//!   carrying the canonical hash of the L2 transaction it will create
//! - `L1MessageSent` emitted by the L1 messenger on L2 for every withdrawal,
//!   carrying the message later proven on L1

use crate::contracts::L1_MESSENGER_ADDRESS;
use crate::error::{BridgeError, BridgeResult};

use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, Log, H256, U256};
use serde::{Deserialize, Serialize};

/// Events relevant to bridge operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeEvent {
    /// Priority operation queued on L1
    NewPriorityRequest {
        tx_id: U256,
        l2_tx_hash: H256,
        expiration_timestamp: u64,
    },

    /// L2 -> L1 message sent
    L1MessageSent {
        sender: Address,
        hash: H256,
        message: Bytes,
    },

    /// Unknown event
    Unknown { address: Address, topic: H256 },
}

impl BridgeEvent {
    /// Get event name for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            BridgeEvent::NewPriorityRequest { .. } => "new_priority_request",
            BridgeEvent::L1MessageSent { .. } => "l1_message_sent",
            BridgeEvent::Unknown { .. } => "unknown",
        }
    }
}

/// Event topic signatures (keccak256 of event signature)
pub mod topics {
    use ethers::types::H256;
    use ethers::utils::keccak256;
    use lazy_static::lazy_static;

    lazy_static! {
        pub static ref NEW_PRIORITY_REQUEST: H256 = H256(keccak256(
            "NewPriorityRequest(uint256,bytes32,uint64,(uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256,uint256[4],bytes,bytes,uint256[],bytes,bytes),bytes[])"
        ));
        pub static ref L1_MESSAGE_SENT: H256 =
            H256(keccak256("L1MessageSent(address,bytes32,bytes)"));
    }
}

/// Parser for logs emitted by the bridge contracts
#[derive(Debug, Clone)]
pub struct EventParser {
    diamond_proxy: Address,
}

impl EventParser {
    /// Create a new event parser for the chain behind `diamond_proxy`
    pub fn new(diamond_proxy: Address) -> Self {
        Self { diamond_proxy }
    }

    /// Parse a log entry into a BridgeEvent
    pub fn parse_log(&self, log: &Log) -> BridgeResult<BridgeEvent> {
        let topic = log.topics.first().copied().unwrap_or_default();

        if log.address == self.diamond_proxy && topic == *topics::NEW_PRIORITY_REQUEST {
            return parse_new_priority_request(log);
        }

        if log.address == L1_MESSENGER_ADDRESS && topic == *topics::L1_MESSAGE_SENT {
            return parse_l1_message_sent(log);
        }

        Ok(BridgeEvent::Unknown {
            address: log.address,
            topic,
        })
    }

    /// Canonical L2 hash of the priority operation queued by an L1 receipt
    pub fn priority_op_l2_hash(&self, logs: &[Log]) -> Option<H256> {
        logs.iter().find_map(|log| match self.parse_log(log) {
            Ok(BridgeEvent::NewPriorityRequest { l2_tx_hash, .. }) => Some(l2_tx_hash),
            _ => None,
        })
    }

    /// The `index`-th L2 -> L1 message in a list of L2 logs, with its log position
    pub fn l1_message(&self, logs: &[Log], index: usize) -> Option<(usize, BridgeEvent)> {
        logs.iter()
            .enumerate()
            .filter_map(|(pos, log)| match self.parse_log(log) {
                Ok(event @ BridgeEvent::L1MessageSent { .. }) => Some((pos, event)),
                _ => None,
            })
            .nth(index)
    }
}

/// Parse NewPriorityRequest; every field is non-indexed and the first three are static
fn parse_new_priority_request(log: &Log) -> BridgeResult<BridgeEvent> {
    let data = log.data.as_ref();
    if data.len() < 96 {
        return Err(BridgeError::Contract(format!(
            "NewPriorityRequest data too short: {} bytes",
            data.len()
        )));
    }

    let tx_id = U256::from_big_endian(&data[0..32]);
    let l2_tx_hash = H256::from_slice(&data[32..64]);
    let expiration_timestamp = U256::from_big_endian(&data[64..96]).low_u64();

    Ok(BridgeEvent::NewPriorityRequest {
        tx_id,
        l2_tx_hash,
        expiration_timestamp,
    })
}

/// Parse L1MessageSent(address indexed, bytes32 indexed, bytes)
fn parse_l1_message_sent(log: &Log) -> BridgeResult<BridgeEvent> {
    let sender = log
        .topics
        .get(1)
        .map(|t| Address::from_slice(&t.0[12..32]))
        .ok_or_else(|| BridgeError::Contract("L1MessageSent missing sender topic".into()))?;

    let hash = log
        .topics
        .get(2)
        .copied()
        .ok_or_else(|| BridgeError::Contract("L1MessageSent missing hash topic".into()))?;

    let tokens = abi::decode(&[ParamType::Bytes], log.data.as_ref())?;
    let message = match tokens.into_iter().next() {
        Some(Token::Bytes(bytes)) => Bytes::from(bytes),
        _ => return Err(BridgeError::Contract("L1MessageSent data is not bytes".into())),
    };

    Ok(BridgeEvent::L1MessageSent {
        sender,
        hash,
        message,
    })
}

/// Build a NewPriorityRequest log the way the diamond proxy emits it
#[cfg(test)]
pub(crate) fn priority_request_log(diamond_proxy: Address, tx_id: u64, l2_tx_hash: H256) -> Log {
    let mut data = Vec::with_capacity(160);
    data.extend_from_slice(&abi::encode(&[Token::Uint(U256::from(tx_id))]));
    data.extend_from_slice(l2_tx_hash.as_bytes());
    data.extend_from_slice(&abi::encode(&[Token::Uint(U256::from(1_700_000_000u64))]));
    // offsets of the dynamic tail; never read
    data.extend_from_slice(&abi::encode(&[Token::Uint(U256::from(160u64))]));
    data.extend_from_slice(&abi::encode(&[Token::Uint(U256::from(192u64))]));

    Log {
        address: diamond_proxy,
        topics: vec![*topics::NEW_PRIORITY_REQUEST],
        data: Bytes::from(data),
        ..Default::default()
    }
}

/// Build an L1MessageSent log the way the messenger emits it
#[cfg(test)]
pub(crate) fn l1_message_log(sender: Address, message: &[u8]) -> Log {
    let mut sender_topic = [0u8; 32];
    sender_topic[12..].copy_from_slice(sender.as_bytes());

    Log {
        address: L1_MESSENGER_ADDRESS,
        topics: vec![
            *topics::L1_MESSAGE_SENT,
            H256(sender_topic),
            H256(ethers::utils::keccak256(message)),
        ],
        data: Bytes::from(abi::encode(&[Token::Bytes(message.to_vec())])),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_request_yields_l2_hash() {
        let diamond = Address::repeat_byte(0xd1);
        let l2_hash = H256::repeat_byte(0x42);
        let parser = EventParser::new(diamond);

        let log = priority_request_log(diamond, 7, l2_hash);
        match parser.parse_log(&log).unwrap() {
            BridgeEvent::NewPriorityRequest { tx_id, l2_tx_hash, .. } => {
                assert_eq!(tx_id, U256::from(7u64));
                assert_eq!(l2_tx_hash, l2_hash);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(parser.priority_op_l2_hash(&[log]), Some(l2_hash));
    }

    #[test]
    fn test_priority_request_from_other_contract_is_ignored() {
        let parser = EventParser::new(Address::repeat_byte(0xd1));
        let log = priority_request_log(Address::repeat_byte(0xee), 7, H256::repeat_byte(1));

        assert_eq!(parser.priority_op_l2_hash(&[log.clone()]), None);
        assert_eq!(parser.parse_log(&log).unwrap().name(), "unknown");
    }

    #[test]
    fn test_l1_message_decodes_sender_and_body() {
        let parser = EventParser::new(Address::zero());
        let sender = Address::repeat_byte(0xab);
        let unrelated = priority_request_log(Address::zero(), 1, H256::zero());
        let logs = vec![unrelated, l1_message_log(sender, b"withdraw-me")];

        let (pos, event) = parser.l1_message(&logs, 0).unwrap();
        assert_eq!(pos, 1);
        match event {
            BridgeEvent::L1MessageSent { sender: s, message, .. } => {
                assert_eq!(s, sender);
                assert_eq!(message.as_ref(), b"withdraw-me");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(parser.l1_message(&logs, 1).is_none());
    }
}
