//! thirdweb MarketplaceV3 integration.
//!
//! Reads and writes go straight to the contracts over JSON-RPC through an
//! alloy HTTP provider. Transactions are signed locally with the holder's
//! private key and carry fixed EIP-1559 fee caps.
//!
//! Contracts:
//! - the ERC-1155 edition (balance, operator approval)
//! - the MarketplaceV3 `DirectListings` extension (createListing)
//! - ERC-20 payment currencies (spender approval)

use alloy::network::{EthereumWallet, ReceiptResponse};
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionReceipt;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::transports::http::reqwest::Url;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use super::Marketplace;
use crate::types::{ListingRequest, TxReceipt};

sol! {
    #[sol(rpc)]
    interface IERC1155 {
        function balanceOf(address account, uint256 id) external view returns (uint256);
        function isApprovedForAll(address account, address operator) external view returns (bool);
        function setApprovalForAll(address operator, bool approved) external;
    }

    #[sol(rpc)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
    }

    #[sol(rpc)]
    interface IDirectListings {
        struct ListingParameters {
            address assetContract;
            uint256 tokenId;
            uint256 quantity;
            address currency;
            uint256 pricePerToken;
            uint128 startTimestamp;
            uint128 endTimestamp;
            bool reserved;
        }

        function createListing(ListingParameters memory _params) external returns (uint256 listingId);
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// EIP-1559 fee caps applied to every transaction, in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasSettings {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl Default for GasSettings {
    fn default() -> Self {
        Self {
            max_fee_per_gas: 5_000_000_000,          // 5 gwei
            max_priority_fee_per_gas: 1_000_000_000, // 1 gwei
        }
    }
}

/// Contract addresses for one edition on one marketplace.
#[derive(Debug, Clone, Copy)]
pub struct Contracts {
    pub edition: Address,
    pub marketplace: Address,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ThirdwebMarketplace {
    provider: DynProvider,
    holder: Address,
    contracts: Contracts,
    gas: GasSettings,
}

impl ThirdwebMarketplace {
    /// Build a signing provider for `rpc_url` from the holder's key.
    pub fn connect(
        rpc_url: &str,
        private_key: &SecretString,
        contracts: Contracts,
        gas: GasSettings,
    ) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .expose_secret()
            .trim()
            .parse()
            .context("PRIVATE_KEY is not a valid secp256k1 key")?;
        let holder = signer.address();

        let url = rpc_url
            .parse::<Url>()
            .with_context(|| format!("Invalid RPC URL: {rpc_url}"))?;

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        info!(
            holder = %holder,
            edition = %contracts.edition,
            marketplace = %contracts.marketplace,
            "Marketplace client connected"
        );

        Ok(Self {
            provider,
            holder,
            contracts,
            gas,
        })
    }

    fn edition(&self) -> IERC1155::IERC1155Instance<DynProvider> {
        IERC1155::new(self.contracts.edition, self.provider.clone())
    }
}

/// Convert a receipt, rejecting reverted transactions.
fn into_receipt(receipt: TransactionReceipt, what: &str) -> Result<TxReceipt> {
    if !receipt.status() {
        bail!("{what} reverted in {}", receipt.transaction_hash);
    }
    Ok(TxReceipt {
        transaction_hash: receipt.transaction_hash.to_string(),
        gas_used: u128::from(receipt.gas_used),
    })
}

#[async_trait]
impl Marketplace for ThirdwebMarketplace {
    fn holder(&self) -> Address {
        self.holder
    }

    async fn token_balance(&self, holder: Address, token_id: U256) -> Result<u64> {
        let balance = self
            .edition()
            .balanceOf(holder, token_id)
            .call()
            .await
            .context("balanceOf call failed")?;
        u64::try_from(balance).map_err(|_| anyhow!("balance {balance} does not fit in u64"))
    }

    async fn is_marketplace_approved(&self, holder: Address) -> Result<bool> {
        self.edition()
            .isApprovedForAll(holder, self.contracts.marketplace)
            .call()
            .await
            .context("isApprovedForAll call failed")
    }

    async fn set_approval_for_all(&self, approved: bool) -> Result<TxReceipt> {
        let receipt = self
            .edition()
            .setApprovalForAll(self.contracts.marketplace, approved)
            .max_fee_per_gas(self.gas.max_fee_per_gas)
            .max_priority_fee_per_gas(self.gas.max_priority_fee_per_gas)
            .send()
            .await
            .context("setApprovalForAll submission failed")?
            .get_receipt()
            .await
            .context("setApprovalForAll receipt unavailable")?;
        into_receipt(receipt, "setApprovalForAll")
    }

    async fn approve_spender(&self, token: Address, amount: U256) -> Result<TxReceipt> {
        let receipt = IERC20::new(token, self.provider.clone())
            .approve(self.contracts.marketplace, amount)
            .max_fee_per_gas(self.gas.max_fee_per_gas)
            .max_priority_fee_per_gas(self.gas.max_priority_fee_per_gas)
            .send()
            .await
            .context("approve submission failed")?
            .get_receipt()
            .await
            .context("approve receipt unavailable")?;
        into_receipt(receipt, "approve")
    }

    async fn create_listing(&self, request: &ListingRequest) -> Result<TxReceipt> {
        let price_per_token = request.currency.to_base_units(request.unit_price)?;
        let params = IDirectListings::ListingParameters {
            assetContract: self.contracts.edition,
            tokenId: request.token_id,
            quantity: U256::from(request.quantity),
            currency: request.currency.contract_address,
            pricePerToken: price_per_token,
            startTimestamp: request.start_time.timestamp().max(0) as u128,
            endTimestamp: request.end_time.timestamp().max(0) as u128,
            reserved: false,
        };

        debug!(
            listing = request.listing_number,
            price_per_token = %price_per_token,
            currency = %request.currency.contract_address,
            "Submitting createListing"
        );

        let receipt = IDirectListings::new(self.contracts.marketplace, self.provider.clone())
            .createListing(params)
            .max_fee_per_gas(self.gas.max_fee_per_gas)
            .max_priority_fee_per_gas(self.gas.max_priority_fee_per_gas)
            .send()
            .await
            .context("createListing submission failed")?
            .get_receipt()
            .await
            .context("createListing receipt unavailable")?;
        into_receipt(receipt, "createListing")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
