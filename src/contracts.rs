//! Contract ABIs used by the bridge flows
//!
//! Only the functions the orchestrators touch are declared. Overloaded entry
//! points (ETH-based vs custom gas token chains) live in separate ABIs so name
//! lookups stay unambiguous.

use crate::error::BridgeResult;

use ethers::abi::{parse_abi, Detokenize, Tokenize};
use ethers::contract::BaseContract;
use ethers::types::{Address, Bytes, H160};
use lazy_static::lazy_static;

/// L1 messenger system contract on L2
pub const L1_MESSENGER_ADDRESS: Address = H160([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x80, 0x08,
]);

/// Base token system contract on L2
pub const L2_BASE_TOKEN_ADDRESS: Address = H160([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x80, 0x0a,
]);

fn abi(signatures: &[&str]) -> BaseContract {
    BaseContract::from(parse_abi(signatures).expect("static ABI definitions are valid"))
}

lazy_static! {
    pub static ref ERC20: BaseContract = abi(&[
        "function balanceOf(address owner) view returns (uint256)",
        "function allowance(address owner, address spender) view returns (uint256)",
        "function approve(address spender, uint256 amount) returns (bool)",
    ]);

    /// L1 ERC-20 bridge on ETH-based chains, fee paid as msg.value
    pub static ref L1_ERC20_BRIDGE: BaseContract = abi(&[
        "function deposit(address _l2Receiver, address _l1Token, uint256 _amount, uint256 _l2TxGasLimit, uint256 _l2TxGasPerPubdataByte, address _refundRecipient) payable returns (bytes32)",
        "function finalizeWithdrawal(uint256 _l2BatchNumber, uint256 _l2MessageIndex, uint16 _l2TxNumberInBatch, bytes _message, bytes32[] _merkleProof)",
        "function isWithdrawalFinalized(uint256 _l2BatchNumber, uint256 _l2MessageIndex) view returns (bool)",
    ]);

    /// L1 ERC-20 bridge on custom gas token chains, fee paid in the base token
    pub static ref L1_ERC20_BRIDGE_CUSTOM_GAS: BaseContract = abi(&[
        "function deposit(address _l2Receiver, address _l1Token, uint256 _amount, uint256 _l2TxGasLimit, uint256 _l2TxGasPerPubdataByte, address _refundRecipient, uint256 _l1Amount) returns (bytes32)",
    ]);

    pub static ref DIAMOND_PROXY: BaseContract = abi(&[
        "function l2TransactionBaseCost(uint256 _gasPrice, uint256 _l2GasLimit, uint256 _l2GasPerPubdataByteLimit) view returns (uint256)",
        "function requestL2Transaction(address _contractL2, uint256 _l2Value, bytes _calldata, uint256 _l2GasLimit, uint256 _l2GasPerPubdataByteLimit, bytes[] _factoryDeps, address _refundRecipient) payable returns (bytes32)",
        "function finalizeEthWithdrawal(uint256 _l2BatchNumber, uint256 _l2MessageIndex, uint16 _l2TxNumberInBatch, bytes _message, bytes32[] _merkleProof)",
        "function isEthWithdrawalFinalized(uint256 _l2BatchNumber, uint256 _l2MessageIndex) view returns (bool)",
    ]);

    pub static ref DIAMOND_PROXY_CUSTOM_GAS: BaseContract = abi(&[
        "struct L2Transaction { address l2Contract; uint256 l2Value; uint256 l2GasLimit; uint256 l2GasPerPubdataByteLimit; }",
        "function requestL2Transaction(L2Transaction _l2tx, bytes _calldata, bytes[] _factoryDeps, address _refundRecipient, uint256 _baseAmount) returns (bytes32)",
    ]);

    pub static ref L2_ERC20_BRIDGE: BaseContract = abi(&[
        "function withdraw(address _l1Receiver, address _l2Token, uint256 _amount)",
        "function l2TokenAddress(address _l1Token) view returns (address)",
    ]);

    pub static ref L2_BASE_TOKEN: BaseContract = abi(&[
        "function withdraw(address _l1Receiver) payable",
    ]);
}

/// ABI-encode a call to `name` on `contract`
pub fn encode<T: Tokenize>(contract: &BaseContract, name: &str, args: T) -> BridgeResult<Bytes> {
    Ok(contract.encode(name, args)?)
}

/// Decode the return data of `name` on `contract`
pub fn decode_output<D: Detokenize>(
    contract: &BaseContract,
    name: &str,
    data: &Bytes,
) -> BridgeResult<D> {
    Ok(contract.decode_output(name, data)?)
}

/// Whether `data` starts with the selector of `name` on `contract`
pub fn is_call_to(contract: &BaseContract, name: &str, data: &[u8]) -> bool {
    contract
        .abi()
        .function(name)
        .map(|f| data.len() >= 4 && data[..4] == f.short_signature())
        .unwrap_or(false)
}
