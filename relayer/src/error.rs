// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::types::{Address as EthAddress, U256};

/// All errors a relay cycle can produce. Every variant is contained within
/// the cycle that produced it; only `FatalTimeout` terminates a pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    // Transient source or destination RPC failure. Retried next cycle.
    Rpc(String),
    // The provider answered but the response is unusable (missing fields,
    // wrong shape). Usually points at a misconfigured endpoint.
    Provider(String),
    // Wallet balance below the projected gas cost of the submission.
    InsufficientFunds {
        balance: U256,
        required: U256,
    },
    // The signer was asked to sign for an address the wallet does not own.
    SignerAddressMismatch {
        requested: EthAddress,
        wallet: EthAddress,
    },
    // Adapter produced empty bytes or an otherwise unusable payload.
    Encoding(String),
    // ForkResolver walked to height zero (or past the rewind bound) without
    // finding a hash the destination knows.
    ForkExhausted,
    // Watchdog expired without forward progress.
    FatalTimeout {
        idle_secs: u64,
    },
    // Init payload rejected by the destination contract.
    InitFailure(String),
    // Verify-server or beacon REST failure.
    Http(String),
    // Uncategorized error
    Generic(String),
}

impl RelayError {
    /// Short stable string identifying the error type for metrics labels.
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayError::Rpc(_) => "rpc",
            RelayError::Provider(_) => "provider",
            RelayError::InsufficientFunds { .. } => "insufficient_funds",
            RelayError::SignerAddressMismatch { .. } => "signer_address_mismatch",
            RelayError::Encoding(_) => "encoding",
            RelayError::ForkExhausted => "fork_exhausted",
            RelayError::FatalTimeout { .. } => "fatal_timeout",
            RelayError::InitFailure(_) => "init_failure",
            RelayError::Http(_) => "http",
            RelayError::Generic(_) => "generic",
        }
    }

    /// Whether the cycle loop may simply retry after the error delay.
    pub fn is_transient(&self) -> bool {
        !matches!(self, RelayError::FatalTimeout { .. })
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

impl From<ethers::providers::ProviderError> for RelayError {
    fn from(e: ethers::providers::ProviderError) -> Self {
        RelayError::Rpc(format!("{e}"))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        RelayError::Http(format!("{e}"))
    }
}

impl From<rlp::DecoderError> for RelayError {
    fn from(e: rlp::DecoderError) -> Self {
        RelayError::Encoding(format!("{e}"))
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayError::InsufficientFunds { balance, required } => write!(
                f,
                "wallet balance {balance} below projected gas cost {required}"
            ),
            RelayError::SignerAddressMismatch { requested, wallet } => write!(
                f,
                "signer asked for {requested:?} but wallet owns {wallet:?}"
            ),
            RelayError::FatalTimeout { idle_secs } => {
                write!(f, "no forward progress for {idle_secs}s, giving up")
            }
            other => write!(f, "{other:?}"),
        }
    }
}

impl std::error::Error for RelayError {}
