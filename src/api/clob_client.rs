//! Polymarket CLOB (Central Limit Order Book) client for order execution.
//!
//! The CLOB is Polymarket's off-chain order matching engine that settles on Polygon.
//! This client handles:
//! - L2 request authentication (HMAC-SHA256 over the API secret)
//! - Order signing using EIP-712 typed data
//! - Order book reads and limit order submission

use alloy_primitives::{Address, U256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

use crate::models::TradeSide;
use crate::security::ApiCredentials;

use super::types::{OrderBook, OrderRequest, PlacedOrder};
use super::{Exchange, ExchangeConnector};

type HmacSha256 = Hmac<Sha256>;

/// CLOB API base URL
pub const CLOB_URL: &str = "https://clob.polymarket.com";

/// Polygon mainnet
pub const POLYGON_CHAIN_ID: u64 = 137;

/// Polymarket CTF Exchange contract on Polygon
pub const CTF_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// USDC and outcome shares both use 6 decimals on-chain.
const TOKEN_DECIMALS: u32 = 6;

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Good-til-cancelled limit order
    Gtc,
}

/// Signature type for CLOB orders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureType {
    /// EOA signature
    Eoa = 0,
}

/// Signed order ready for submission
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedOrder {
    pub salt: String,
    pub maker: String,
    pub signer: String,
    pub taker: String,
    pub token_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub side: String,
    pub expiration: String,
    pub nonce: String,
    pub fee_rate_bps: String,
    pub signature_type: u8,
    pub signature: String,
}

/// Order submission request body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPayload {
    pub order: SignedOrder,
    pub owner: String,
    pub order_type: OrderType,
}

/// Response from order placement
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    #[serde(default, alias = "orderID", alias = "id")]
    pub order_id: Option<String>,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_msg: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// CLOB API client bound to one user's credentials.
pub struct ClobClient {
    http: Client,
    base_url: String,
    signer: PrivateKeySigner,
    api_key: Zeroizing<String>,
    api_secret: Zeroizing<String>,
    api_passphrase: Zeroizing<String>,
    chain_id: u64,
}

fn side_code(side: TradeSide) -> u8 {
    match side {
        TradeSide::Buy => 0,
        TradeSide::Sell => 1,
    }
}

impl ClobClient {
    /// Create a new CLOB client.
    ///
    /// # Arguments
    /// * `credentials` - decrypted API key triple plus the signing key (hex, with or without 0x)
    /// * `base_url` - CLOB endpoint
    /// * `chain_id` - Polygon chain ID (137 for mainnet, 80002 for Amoy testnet)
    pub fn new(
        credentials: &ApiCredentials,
        base_url: &str,
        chain_id: u64,
        timeout: Duration,
    ) -> Result<Self> {
        let pk = credentials
            .private_key
            .trim()
            .strip_prefix("0x")
            .unwrap_or(credentials.private_key.trim());
        let signer = PrivateKeySigner::from_str(pk).context("Invalid private key")?;

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            signer,
            api_key: Zeroizing::new(credentials.api_key.clone()),
            api_secret: Zeroizing::new(credentials.api_secret.clone()),
            api_passphrase: Zeroizing::new(credentials.api_passphrase.clone()),
            chain_id,
        })
    }

    /// Get the wallet address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Get order book for a token. Public endpoint, no auth.
    pub async fn fetch_order_book(&self, token_id: &str) -> Result<OrderBook> {
        let url = format!("{}/book?token_id={}", self.base_url, token_id);
        let resp = self.http.get(&url).send().await.context("Failed to fetch order book")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to get order book: {} - {}", status, text));
        }

        resp.json().await.context("Failed to parse order book")
    }

    /// Place a signed order.
    pub async fn submit_order(
        &self,
        token_id: &str,
        side: TradeSide,
        size: Decimal,
        price: Decimal,
        order_type: OrderType,
    ) -> Result<OrderResponse> {
        let signed_order = self.build_signed_order(token_id, side, size, price).await?;

        let payload = OrderPayload {
            order: signed_order,
            owner: (*self.api_key).clone(),
            order_type,
        };
        let body = serde_json::to_string(&payload).context("Failed to encode order")?;

        let path = "/order";
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .headers(self.build_l2_headers("POST", path, Some(&body))?)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .context("Failed to submit order")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Order placement failed: {} - {}", status, text));
        }

        resp.json().await.context("Failed to parse order response")
    }

    /// Build a signed order for submission.
    async fn build_signed_order(
        &self,
        token_id: &str,
        side: TradeSide,
        size: Decimal,
        price: Decimal,
    ) -> Result<SignedOrder> {
        let maker = format!("{:?}", self.address());
        let signer = maker.clone();
        let taker = ZERO_ADDRESS.to_string();

        let (maker_amount, taker_amount) = Self::order_amounts(side, size, price)?;

        // GTC orders carry no expiration
        let expiration = "0".to_string();
        let nonce = "0".to_string();
        let salt = Self::generate_salt();
        let fee_rate_bps = "0".to_string();

        let signature = self
            .sign_order(
                &salt,
                &maker,
                &signer,
                &taker,
                token_id,
                &maker_amount,
                &taker_amount,
                side_code(side),
                &expiration,
                &nonce,
                &fee_rate_bps,
            )
            .await?;

        Ok(SignedOrder {
            salt,
            maker,
            signer,
            taker,
            token_id: token_id.to_string(),
            maker_amount,
            taker_amount,
            side: side.as_str().to_string(),
            expiration,
            nonce,
            fee_rate_bps,
            signature_type: SignatureType::Eoa as u8,
            signature,
        })
    }

    /// Maker/taker amounts in base units.
    /// BUY: maker gives USDC (size * price), receives shares.
    /// SELL: maker gives shares, receives USDC.
    fn order_amounts(side: TradeSide, size: Decimal, price: Decimal) -> Result<(String, String)> {
        let notional = size
            .checked_mul(price)
            .ok_or_else(|| anyhow!("Order notional overflows: {} x {}", size, price))?;
        let shares = Self::to_base_units(size)?;
        let usdc = Self::to_base_units(notional)?;
        Ok(match side {
            TradeSide::Buy => (usdc, shares),
            TradeSide::Sell => (shares, usdc),
        })
    }

    /// Sign an order using EIP-712 typed data.
    #[allow(clippy::too_many_arguments)]
    async fn sign_order(
        &self,
        salt: &str,
        maker: &str,
        signer: &str,
        taker: &str,
        token_id: &str,
        maker_amount: &str,
        taker_amount: &str,
        side: u8,
        expiration: &str,
        nonce: &str,
        fee_rate_bps: &str,
    ) -> Result<String> {
        let order_hash = Self::compute_order_hash(
            salt,
            maker,
            signer,
            taker,
            token_id,
            maker_amount,
            taker_amount,
            expiration,
            nonce,
            fee_rate_bps,
            side,
        )?;

        let domain_hash = self.compute_domain_separator()?;

        // keccak256("\x19\x01" + domainSeparator + orderHash)
        let mut message = vec![0x19, 0x01];
        message.extend_from_slice(&domain_hash);
        message.extend_from_slice(&order_hash);

        let final_hash = alloy_primitives::keccak256(&message);

        let signature = self
            .signer
            .sign_hash(&final_hash)
            .await
            .context("Failed to sign order")?;

        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }

    /// Compute the EIP-712 order struct hash.
    #[allow(clippy::too_many_arguments)]
    fn compute_order_hash(
        salt: &str,
        maker: &str,
        signer: &str,
        taker: &str,
        token_id: &str,
        maker_amount: &str,
        taker_amount: &str,
        expiration: &str,
        nonce: &str,
        fee_rate_bps: &str,
        side: u8,
    ) -> Result<[u8; 32]> {
        let type_hash = alloy_primitives::keccak256(
            b"Order(uint256 salt,address maker,address signer,address taker,uint256 tokenId,uint256 makerAmount,uint256 takerAmount,uint256 expiration,uint256 nonce,uint256 feeRateBps,uint8 side,uint8 signatureType)"
        );

        let mut encoded = Vec::with_capacity(13 * 32);
        encoded.extend_from_slice(type_hash.as_slice());
        encoded.extend_from_slice(&Self::encode_uint256(salt)?);
        encoded.extend_from_slice(&Self::encode_address(maker)?);
        encoded.extend_from_slice(&Self::encode_address(signer)?);
        encoded.extend_from_slice(&Self::encode_address(taker)?);
        encoded.extend_from_slice(&Self::encode_uint256(token_id)?);
        encoded.extend_from_slice(&Self::encode_uint256(maker_amount)?);
        encoded.extend_from_slice(&Self::encode_uint256(taker_amount)?);
        encoded.extend_from_slice(&Self::encode_uint256(expiration)?);
        encoded.extend_from_slice(&Self::encode_uint256(nonce)?);
        encoded.extend_from_slice(&Self::encode_uint256(fee_rate_bps)?);
        encoded.extend_from_slice(&Self::encode_uint8(side));
        encoded.extend_from_slice(&Self::encode_uint8(SignatureType::Eoa as u8));

        Ok(alloy_primitives::keccak256(&encoded).0)
    }

    /// Compute the EIP-712 domain separator.
    fn compute_domain_separator(&self) -> Result<[u8; 32]> {
        let type_hash = alloy_primitives::keccak256(
            b"EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)",
        );

        let name_hash = alloy_primitives::keccak256(b"Polymarket CTF Exchange");
        let version_hash = alloy_primitives::keccak256(b"1");

        let mut encoded = Vec::with_capacity(5 * 32);
        encoded.extend_from_slice(type_hash.as_slice());
        encoded.extend_from_slice(name_hash.as_slice());
        encoded.extend_from_slice(version_hash.as_slice());
        encoded.extend_from_slice(&Self::encode_uint256(&self.chain_id.to_string())?);
        encoded.extend_from_slice(&Self::encode_address(CTF_EXCHANGE)?);

        Ok(alloy_primitives::keccak256(&encoded).0)
    }

    /// Build L2 authentication headers for a request.
    fn build_l2_headers(&self, method: &str, path: &str, body: Option<&str>) -> Result<HeaderMap> {
        let timestamp = Utc::now().timestamp();
        let signature = Self::sign_l2(&self.api_secret, timestamp, method, path, body)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("poly_address"),
            HeaderValue::from_str(&format!("{:?}", self.address()))?,
        );
        headers.insert(
            HeaderName::from_static("poly_signature"),
            HeaderValue::from_str(&signature)?,
        );
        headers.insert(
            HeaderName::from_static("poly_timestamp"),
            HeaderValue::from_str(&timestamp.to_string())?,
        );
        headers.insert(
            HeaderName::from_static("poly_api_key"),
            HeaderValue::from_str(&self.api_key)?,
        );
        headers.insert(
            HeaderName::from_static("poly_passphrase"),
            HeaderValue::from_str(&self.api_passphrase)?,
        );

        Ok(headers)
    }

    /// HMAC-SHA256 over `timestamp + METHOD + path + body`, keyed with the
    /// url-safe base64 API secret.
    fn sign_l2(
        secret: &str,
        timestamp: i64,
        method: &str,
        path: &str,
        body: Option<&str>,
    ) -> Result<String> {
        let key = Zeroizing::new(
            URL_SAFE
                .decode(secret.trim())
                .context("Invalid API secret encoding")?,
        );

        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| anyhow!("HMAC init failed: {}", e))?;

        let message = format!(
            "{}{}{}{}",
            timestamp,
            method.to_uppercase(),
            path,
            body.unwrap_or_default()
        );
        mac.update(message.as_bytes());

        Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
    }

    /// Convert a decimal amount to 6-decimal base units, rounding down.
    fn to_base_units(amount: Decimal) -> Result<String> {
        let scaled = amount
            .checked_mul(Decimal::from(10u64.pow(TOKEN_DECIMALS)))
            .ok_or_else(|| anyhow!("Amount {} too large for base units", amount))?;
        Ok(scaled.trunc().normalize().to_string())
    }

    /// Encode address to 32-byte padded format.
    fn encode_address(addr: &str) -> Result<[u8; 32]> {
        let addr = Address::from_str(addr).with_context(|| format!("Invalid address {}", addr))?;
        let mut buf = [0u8; 32];
        buf[12..].copy_from_slice(addr.as_slice());
        Ok(buf)
    }

    /// Encode uint256 from a decimal string.
    fn encode_uint256(value: &str) -> Result<[u8; 32]> {
        let n = U256::from_str_radix(value, 10)
            .map_err(|e| anyhow!("Invalid uint256 {:?}: {}", value, e))?;
        Ok(n.to_be_bytes())
    }

    /// Encode uint8 to 32-byte padded format.
    fn encode_uint8(value: u8) -> [u8; 32] {
        let mut buf = [0u8; 32];
        buf[31] = value;
        buf
    }

    /// Generate a random salt.
    fn generate_salt() -> String {
        // 53 bits, sent as a decimal string
        (uuid::Uuid::new_v4().as_u128() & ((1u128 << 53) - 1)).to_string()
    }
}

#[async_trait]
impl Exchange for ClobClient {
    async fn get_order_book(&self, market_id: &str) -> Result<OrderBook> {
        self.fetch_order_book(market_id).await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<PlacedOrder> {
        debug!(
            market = %order.market_id,
            side = %order.side,
            price = %order.price,
            size = %order.size,
            "Submitting GTC limit order"
        );

        let resp = self
            .submit_order(&order.market_id, order.side, order.size, order.price, OrderType::Gtc)
            .await?;

        if !resp.success {
            return Err(anyhow!(
                "Order rejected: {}",
                if resp.error_msg.is_empty() { "no reason given" } else { &resp.error_msg }
            ));
        }

        let order_id = resp
            .order_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| anyhow!("Order accepted without an order id"))?;

        debug!(
            order_id = %order_id,
            status = resp.status.as_deref().unwrap_or("unknown"),
            "Order accepted"
        );

        Ok(PlacedOrder { order_id })
    }
}

/// Opens CLOB sessions for individual users.
#[derive(Debug, Clone)]
pub struct ClobConnector {
    base_url: String,
    chain_id: u64,
    timeout: Duration,
}

impl ClobConnector {
    pub fn new(base_url: String, chain_id: u64, timeout: Duration) -> Self {
        Self {
            base_url,
            chain_id,
            timeout,
        }
    }
}

impl ExchangeConnector for ClobConnector {
    fn connect(&self, credentials: &ApiCredentials) -> Result<Box<dyn Exchange>> {
        let client = ClobClient::new(credentials, &self.base_url, self.chain_id, self.timeout)?;
        Ok(Box::new(client))
    }
}
